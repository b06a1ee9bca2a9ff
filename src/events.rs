//! Engine callbacks and host notifications.
//!
//! The engine calls back on threads it owns. The callbacks installed here
//! only push onto an unbounded channel; one dispatcher task drains it in
//! order. A texture output's value change is therefore always handled
//! before the frame finish that follows it.
//!
//! # Main Types
//!
//! - [`TouchEvent`]: what the host can observe through
//!   [`TouchEngine::subscribe`](crate::engine::TouchEngine::subscribe).
//! - [`Dispatcher`]: routes callbacks to the cooker, finalizer and variable manager.

use crate::cook::{FrameCooker, FrameFinalizer};
use crate::error_log::DiagnosticKind;
use crate::sdk::{
    EventCallback, EventKind, InstanceEvent, InstanceSlot, LinkCallback, LinkEvent, LinkInterest, LinkScope, LinkType,
    TeResult,
};
use crate::variables::VariableManager;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Capacity of the host notification bus.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Raw callback as delivered by the engine.
#[derive(Debug, Clone)]
pub(crate) enum Callback {
    Instance(InstanceEvent),
    Link(LinkEvent, String),
}

/// Notifications published to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchEvent {
    Ready,
    Loaded,
    Unloaded,
    /// A general error reported by the engine outside of any frame.
    Error(TeResult),
    FrameFinished { frame_id: Option<u64>, result: TeResult, frame_dropped: bool },
    /// A link was added, removed or reconfigured.
    LinksChanged(String),
    OutputChanged { identifier: String, frame_id: Option<u64> },
}

/// Callbacks that forward into `tx`. Sending never blocks.
pub(crate) fn callbacks(tx: mpsc::UnboundedSender<Callback>) -> (EventCallback, LinkCallback) {
    let links = tx.clone();
    let on_event: EventCallback = Arc::new(move |event| {
        if tx.send(Callback::Instance(event)).is_err() {
            log::debug!("dropping {:?} event, dispatcher is gone", event.kind);
        }
    });
    let on_link: LinkCallback = Arc::new(move |event, identifier| {
        if links.send(Callback::Link(event, identifier.to_string())).is_err() {
            log::debug!("dropping {event:?} on '{identifier}', dispatcher is gone");
        }
    });
    (on_event, on_link)
}

pub(crate) struct Dispatcher {
    pub instance: InstanceSlot,
    pub cooker: Arc<FrameCooker>,
    pub finalizer: Arc<FrameFinalizer>,
    pub variables: Arc<VariableManager>,
    pub import_texture_outputs: bool,
    pub events: broadcast::Sender<TouchEvent>,
}

impl Dispatcher {
    /// Runs until every sender of `rx` is gone.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<Callback>, runtime: &Handle) -> JoinHandle<()> {
        runtime.spawn(async move {
            while let Some(callback) = rx.recv().await {
                match callback {
                    Callback::Instance(event) => self.on_instance_event(event),
                    Callback::Link(event, identifier) => self.on_link_event(event, identifier),
                }
            }
            log::debug!("event channel closed, dispatcher stopping");
        })
    }

    fn publish(&self, event: TouchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn on_instance_event(&self, event: InstanceEvent) {
        match event.kind {
            EventKind::FrameDidFinish => {
                let frame_id = self.cooker.cooking_frame_id();
                self.cooker.on_frame_finished(event);
                self.publish(TouchEvent::FrameFinished {
                    frame_id,
                    result: event.result,
                    frame_dropped: event.frame_dropped,
                });
            }
            EventKind::InstanceReady => self.publish(TouchEvent::Ready),
            EventKind::InstanceDidLoad => {
                log::info!("engine instance loaded ({:?})", event.result);
                self.publish(TouchEvent::Loaded);
            }
            EventKind::InstanceDidUnload => self.publish(TouchEvent::Unloaded),
            EventKind::GeneralError => {
                log::error!("engine reported {:?}", event.result);
                self.publish(TouchEvent::Error(event.result));
            }
        }
    }

    fn on_link_event(&self, event: LinkEvent, identifier: String) {
        match event {
            LinkEvent::ValueChange => self.on_value_change(identifier),
            LinkEvent::Added | LinkEvent::Removed | LinkEvent::Modified | LinkEvent::Moved => {
                self.publish(TouchEvent::LinksChanged(identifier))
            }
            LinkEvent::StateChange | LinkEvent::ChildChange => {}
        }
    }

    fn on_value_change(&self, identifier: String) {
        let Some(instance) = self.instance.get() else {
            return;
        };
        let info = match instance.link_info(&identifier) {
            Ok(info) if info.scope == LinkScope::Output => info,
            Ok(_) => return,
            Err(result) => {
                log::debug!("value change on unknown link '{identifier}': {result:?}");
                return;
            }
        };

        let cooking = self.cooker.cooking_frame_id();
        // Outside a cook the change belongs to the frame issued last.
        let frame_id = cooking.unwrap_or_else(|| self.cooker.next_frame_id().saturating_sub(1));

        if info.link_type == LinkType::Texture {
            if !self.import_texture_outputs {
                return;
            }
            match instance.get_texture(&identifier) {
                Ok(Some(texture)) => {
                    if let Err(result) = instance.set_link_interest(&identifier, LinkInterest::SubsequentValues) {
                        log::debug!("could not narrow interest in '{identifier}': {result:?}");
                    }
                    // Untracked imports still land in the output table.
                    if let Err(e) = self.finalizer.import_texture_for_frame(frame_id, &identifier, texture) {
                        log::debug!("import of '{identifier}' not attributed to frame {frame_id}: {e}");
                    }
                }
                Ok(None) => log::debug!("texture output '{identifier}' changed to empty"),
                Err(result) => {
                    self.variables.error_log().add_result(
                        "on_value_change",
                        &identifier,
                        DiagnosticKind::LinkGetValueError,
                        result,
                    );
                    return;
                }
            }
        } else {
            self.variables.mark_output_updated(&identifier, frame_id);
        }

        self.publish(TouchEvent::OutputChanged { identifier, frame_id: cooking });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeMode;
    use crate::cook::fixture::{pipeline, wait_until, Pipeline};
    use crate::cook::CookFrameRequest;
    use crate::render::provider::{PixelFormat, TextureDesc};
    use crate::sdk::null::{Call, LinkValue, NullTexture};
    use crate::sdk::{TextureKind, TouchInstance};
    use std::time::Duration;

    fn dispatch(p: &Pipeline, import_texture_outputs: bool) -> broadcast::Receiver<TouchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, host_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (on_event, on_link) = callbacks(tx);
        p.instance.set_callbacks(on_event, on_link);
        Dispatcher {
            instance: p.slot.clone(),
            cooker: p.cooker.clone(),
            finalizer: p.finalizer.clone(),
            variables: p.variables.clone(),
            import_texture_outputs,
            events,
        }
        .spawn(rx, &Handle::current());
        host_rx
    }

    async fn cooking(p: &Pipeline, frame_id: u64) {
        let cooker = p.cooker.clone();
        wait_until(move || cooker.cooking_frame_id() == Some(frame_id)).await;
    }

    fn texture_output(p: &Pipeline) -> Arc<NullTexture> {
        let tex = NullTexture::new(TextureKind::Memory, TextureDesc::new(16, 16, PixelFormat::Rgba8));
        p.instance.add_link(
            "op/out_tex",
            LinkScope::Output,
            LinkType::Texture,
            1,
            LinkValue::Texture(Some(tex.foreign_ref())),
        );
        tex
    }

    #[tokio::test]
    async fn texture_output_is_imported_for_the_frame_in_flight() {
        let p = pipeline(TimeMode::Internal);
        let mut host = dispatch(&p, true);
        let _tex = texture_output(&p);

        let cook = p.cooker.cook_frame(CookFrameRequest::at(0, 60_000));
        assert_eq!(cook.frame_id(), 1);
        cooking(&p, 1).await;
        let finalized = p.finalizer.on_frame_finalized(1);

        p.instance.fire_link(LinkEvent::ValueChange, "op/out_tex");
        p.instance.finish_frame(TeResult::Success);

        assert!(cook.await.is_success());
        let frame = tokio::time::timeout(Duration::from_secs(1), finalized).await.unwrap().unwrap();
        assert_eq!(frame.imported, vec!["op/out_tex".to_string()]);
        assert!(p.variables.linked_output("op/out_tex").is_some());
        assert_eq!(p.variables.frame_last_updated("op/out_tex"), Some(1));
        assert!(p
            .instance
            .calls()
            .contains(&Call::SetInterest("op/out_tex".into(), LinkInterest::SubsequentValues)));

        assert_eq!(
            host.recv().await.unwrap(),
            TouchEvent::OutputChanged { identifier: "op/out_tex".into(), frame_id: Some(1) }
        );
        assert_eq!(
            host.recv().await.unwrap(),
            TouchEvent::FrameFinished { frame_id: Some(1), result: TeResult::Success, frame_dropped: false }
        );
    }

    #[tokio::test]
    async fn texture_imports_can_be_turned_off() {
        let p = pipeline(TimeMode::Internal);
        let _host = dispatch(&p, false);
        let _tex = texture_output(&p);

        let cook = p.cooker.cook_frame(CookFrameRequest::at(0, 60_000));
        cooking(&p, 1).await;
        let finalized = p.finalizer.on_frame_finalized(1);
        p.instance.fire_link(LinkEvent::ValueChange, "op/out_tex");
        p.instance.finish_frame(TeResult::Success);

        cook.await;
        let frame = tokio::time::timeout(Duration::from_secs(1), finalized).await.unwrap().unwrap();
        assert!(frame.imported.is_empty());
        assert!(p.variables.linked_output("op/out_tex").is_none());
    }

    #[tokio::test]
    async fn other_outputs_record_the_frame_they_changed_in() {
        let p = pipeline(TimeMode::Internal);
        let _host = dispatch(&p, true);
        p.instance.add_link("op/level", LinkScope::Output, LinkType::Double, 1, LinkValue::Doubles(vec![0.5]));

        let cook = p.cooker.cook_frame(CookFrameRequest::at(0, 60_000));
        cooking(&p, 1).await;
        p.instance.fire_link(LinkEvent::ValueChange, "op/level");
        p.instance.finish_frame(TeResult::Success);
        cook.await;

        let variables = p.variables.clone();
        wait_until(move || variables.frame_last_updated("op/level") == Some(1)).await;
    }

    #[tokio::test]
    async fn lifecycle_events_reach_the_host() {
        let p = pipeline(TimeMode::Internal);
        let mut host = dispatch(&p, true);

        p.instance.fire_link(LinkEvent::Added, "op/new");
        p.instance.fire_event(InstanceEvent {
            kind: EventKind::GeneralError,
            result: TeResult::LostConnection,
            frame_dropped: false,
            start_time: Default::default(),
            end_time: Default::default(),
        });

        assert_eq!(host.recv().await.unwrap(), TouchEvent::LinksChanged("op/new".into()));
        assert_eq!(host.recv().await.unwrap(), TouchEvent::Error(TeResult::LostConnection));
    }

    #[tokio::test]
    async fn texture_changes_outside_a_cook_are_still_imported() {
        let p = pipeline(TimeMode::Internal);
        let mut host = dispatch(&p, true);
        let _tex = texture_output(&p);

        p.instance.fire_link(LinkEvent::ValueChange, "op/out_tex");
        assert_eq!(
            host.recv().await.unwrap(),
            TouchEvent::OutputChanged { identifier: "op/out_tex".into(), frame_id: None }
        );
        let variables = p.variables.clone();
        wait_until(move || variables.linked_output("op/out_tex").is_some()).await;

        p.instance.fire_link(LinkEvent::Removed, "op/out_tex");
        assert_eq!(host.recv().await.unwrap(), TouchEvent::LinksChanged("op/out_tex".into()));
    }

    #[tokio::test]
    async fn callbacks_outliving_the_dispatcher_are_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let (on_event, on_link) = callbacks(tx);

        on_link(LinkEvent::Added, "op/new");
        on_event(InstanceEvent {
            kind: EventKind::InstanceReady,
            result: TeResult::Success,
            frame_dropped: false,
            start_time: Default::default(),
            end_time: Default::default(),
        });
    }
}
