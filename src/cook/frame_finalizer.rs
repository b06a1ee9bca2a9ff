use super::data::{CookFrameResult, FinalizedFrame};
use crate::errors::FinalizationError;
use crate::handle::ForeignRef;
use crate::render::importing::{ImportRequest, TextureImporter};
use crate::sdk::{InstanceSlot, TeTexture};
use crate::task_suspender::lock;
use crate::variables::VariableManager;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

pub type FinalizeResult = Result<FinalizedFrame, FinalizationError>;

#[derive(Debug, Default)]
struct Record {
    cook: Option<CookFrameResult>,
    pending_imports: usize,
    imported: Vec<String>,
    failed: Vec<String>,
    listeners: Vec<oneshot::Sender<FinalizedFrame>>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<u64, Record>,
    highest_enqueued: u64,
}

impl State {
    fn missing(&self, frame_id: u64) -> FinalizationError {
        if frame_id != 0 && frame_id <= self.highest_enqueued {
            FinalizationError::AlreadyFinalized(frame_id)
        } else {
            FinalizationError::NotStarted(frame_id)
        }
    }

    /// Removes the record once both the cook result and every import are in.
    fn take_finalized(&mut self, frame_id: u64) -> Option<(Vec<oneshot::Sender<FinalizedFrame>>, FinalizedFrame)> {
        let ready = self
            .records
            .get(&frame_id)
            .is_some_and(|r| r.pending_imports == 0 && r.cook.is_some());
        if !ready {
            return None;
        }
        let record = self.records.remove(&frame_id)?;
        let cook = record.cook?;
        let frame = FinalizedFrame { frame_id, cook, imported: record.imported, failed_imports: record.failed };
        Some((record.listeners, frame))
    }
}

/// Join barrier between a frame's cook result and the texture imports it triggered.
///
/// A record is created when the cook is accepted and removed once the
/// result is stored and no import is pending, in whichever order those
/// arrive. Listeners are fulfilled after the record is gone and the lock
/// is released.
pub struct FrameFinalizer {
    instance: InstanceSlot,
    importer: Arc<TextureImporter>,
    variables: Arc<VariableManager>,
    runtime: Handle,
    state: Mutex<State>,
}

impl std::fmt::Debug for FrameFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameFinalizer")
            .field("pending_frames", &self.pending_frames())
            .finish_non_exhaustive()
    }
}

impl FrameFinalizer {
    pub fn new(
        instance: InstanceSlot,
        importer: Arc<TextureImporter>,
        variables: Arc<VariableManager>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self { instance, importer, variables, runtime, state: Mutex::new(State::default()) })
    }

    pub fn pending_frames(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn pending_imports(&self, frame_id: u64) -> Option<usize> {
        lock(&self.state).records.get(&frame_id).map(|r| r.pending_imports)
    }

    /// Must be called before the frame can reference any import.
    pub fn notify_frame_enqueued(&self, frame_id: u64) {
        let mut state = lock(&self.state);
        state.records.entry(frame_id).or_default();
        state.highest_enqueued = state.highest_enqueued.max(frame_id);
    }

    /// Imports `texture` as the new value of `parameter` and holds the
    /// frame open until the import completes, successfully or not.
    ///
    /// With no record for `frame_id` the import still runs and updates the
    /// output, but nothing waits for it and the lookup error is returned.
    pub fn import_texture_for_frame(
        self: &Arc<Self>,
        frame_id: u64,
        parameter: &str,
        texture: ForeignRef<dyn TeTexture>,
    ) -> Result<(), FinalizationError> {
        let tracked = {
            let mut state = lock(&self.state);
            match state.records.get_mut(&frame_id) {
                Some(record) => {
                    record.pending_imports += 1;
                    Ok(())
                }
                None => Err(state.missing(frame_id)),
            }
        };
        if let Err(e) = &tracked {
            log::warn!("importing '{parameter}' outside of a tracked frame: {e}");
        }

        let Some(instance) = self.instance.get() else {
            log::debug!("instance gone, skipping import of '{parameter}'");
            if tracked.is_ok() {
                self.on_import_finished(frame_id, parameter.to_string(), false);
            }
            return tracked;
        };

        self.variables.allocate_linked_output(parameter);
        let import = self
            .importer
            .import_texture(instance, ImportRequest { parameter: parameter.to_string(), texture });

        let this = self.clone();
        let parameter = parameter.to_string();
        let counted = tracked.is_ok();
        self.runtime.spawn(async move {
            let ok = match import.await {
                Ok(host) => {
                    this.variables.update_linked_output(&parameter, host, frame_id);
                    true
                }
                Err(e) => {
                    log::warn!("import of '{parameter}' for frame {frame_id} failed: {e}");
                    false
                }
            };
            if counted {
                this.on_import_finished(frame_id, parameter, ok);
            }
        });

        tracked
    }

    /// Stores the cook result of `result.frame_id`.
    pub fn notify_frame_finished_cooking(&self, result: CookFrameResult) {
        let frame_id = result.frame_id;
        let finalized = {
            let mut state = lock(&self.state);
            match state.records.get_mut(&frame_id) {
                Some(record) => {
                    if record.cook.is_some() {
                        log::warn!("frame {frame_id} reported finished twice, keeping the latest result");
                    }
                    record.cook = Some(result);
                    state.take_finalized(frame_id)
                }
                None => {
                    log::warn!("cook result for untracked frame {frame_id}: {}", state.missing(frame_id));
                    None
                }
            }
        };
        Self::fulfil(finalized);
    }

    /// Resolves once `frame_id` is finalized. May be called several times per frame.
    pub fn on_frame_finalized(&self, frame_id: u64) -> BoxFuture<'static, FinalizeResult> {
        let rx = {
            let mut state = lock(&self.state);
            let missing = state.missing(frame_id);
            match state.records.get_mut(&frame_id) {
                Some(record) => {
                    let (tx, rx) = oneshot::channel();
                    record.listeners.push(tx);
                    rx
                }
                None => return futures::future::ready(Err(missing)).boxed(),
            }
        };
        async move { rx.await.map_err(|_| FinalizationError::Abandoned(frame_id)) }.boxed()
    }

    fn on_import_finished(&self, frame_id: u64, parameter: String, ok: bool) {
        let finalized = {
            let mut state = lock(&self.state);
            let Some(record) = state.records.get_mut(&frame_id) else {
                log::error!("import finished for frame {frame_id} after it was finalized");
                return;
            };
            record.pending_imports = record.pending_imports.saturating_sub(1);
            if ok {
                record.imported.push(parameter);
            } else {
                record.failed.push(parameter);
            }
            state.take_finalized(frame_id)
        };
        Self::fulfil(finalized);
    }

    fn fulfil(finalized: Option<(Vec<oneshot::Sender<FinalizedFrame>>, FinalizedFrame)>) {
        let Some((listeners, frame)) = finalized else {
            return;
        };
        log::trace!("frame {} finalized ({} imports)", frame.frame_id, frame.imported.len());
        for tx in listeners {
            let _ = tx.send(frame.clone());
        }
    }
}
