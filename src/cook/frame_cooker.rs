//! One-in-flight frame cooking.
//!
//! The cooker keeps at most two requests: the one in progress and one
//! waiting. A request arriving while the waiting slot is taken is combined
//! into it and the older request resolves with [`CookError::Replaced`].
//!
//! # Lifecycle of a request
//!
//! 1. Accepted: gets a frame id and a finalization record.
//! 2. Waiting for exports: texture inputs set before the request must reach
//!    the engine first.
//! 3. Cooking: the frame start call was issued; the engine reports back
//!    through [`FrameCooker::on_frame_finished`], possibly from inside the
//!    start call itself.
//!
//! No lock is held while calling into the engine or fulfilling promises.

use super::data::{CookFrameRequest, CookFrameResult, FIRST_FRAME_ID};
use super::frame_finalizer::FrameFinalizer;
use crate::config::TimeMode;
use crate::errors::CookError;
use crate::sdk::{InstanceEvent, InstanceSlot, TeResult, TeTime};
use crate::task_suspender::lock;
use crate::variables::{TextureUpdateId, VariableManager};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

#[derive(Debug)]
struct PendingCook {
    frame_id: u64,
    request: CookFrameRequest,
    created: Instant,
    /// Texture inputs issued before this request.
    exports: TextureUpdateId,
    promise: oneshot::Sender<CookFrameResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    WaitingForExports,
    Cooking { started: Instant },
}

#[derive(Debug)]
struct InProgress {
    cook: PendingCook,
    stage: Stage,
}

/// The waiting slot. Depth one, never a queue.
#[derive(Debug, Default)]
enum NextCook {
    #[default]
    Empty,
    Occupied(PendingCook),
}

impl NextCook {
    /// Puts `newer` in the slot. A request already waiting hands its
    /// creation time and any inputs `newer` does not override to `newer`,
    /// then is handed back to be resolved.
    fn combine(&mut self, mut newer: PendingCook) -> Option<PendingCook> {
        match std::mem::take(self) {
            NextCook::Empty => {
                *self = NextCook::Occupied(newer);
                None
            }
            NextCook::Occupied(mut older) => {
                newer.created = older.created;
                newer.request.absorb_inputs(&mut older.request);
                *self = NextCook::Occupied(newer);
                Some(older)
            }
        }
    }

    fn take(&mut self) -> Option<PendingCook> {
        match std::mem::take(self) {
            NextCook::Empty => None,
            NextCook::Occupied(cook) => Some(cook),
        }
    }

    fn is_occupied(&self) -> bool {
        matches!(self, NextCook::Occupied(_))
    }
}

#[derive(Debug)]
struct State {
    next_frame_id: u64,
    in_progress: Option<InProgress>,
    next: NextCook,
    /// Set from the frame start call until the engine reports the frame
    /// finished, even when the cook itself was cancelled meanwhile.
    engine_busy_since: Option<Instant>,
    accumulated_time: i64,
    frame_last_updated: Option<u64>,
}

impl State {
    /// Promotes the waiting request once nothing is in flight.
    fn advance(&mut self) -> Option<(u64, TextureUpdateId)> {
        if self.in_progress.is_some() || self.engine_busy_since.is_some() {
            return None;
        }
        let cook = self.next.take()?;
        let started = (cook.frame_id, cook.exports);
        self.in_progress = Some(InProgress { cook, stage: Stage::WaitingForExports });
        Some(started)
    }
}

/// Future returned by [`FrameCooker::cook_frame`].
#[must_use = "the cook result is lost if the future is dropped"]
pub struct CookFuture {
    frame_id: u64,
    inner: BoxFuture<'static, CookFrameResult>,
}

impl CookFuture {
    /// Id of the frame, usable with
    /// [`FrameFinalizer::on_frame_finalized`] right away. `0` if rejected.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Resolves at once with [`CookError::BadRequest`].
    pub(crate) fn rejected() -> Self {
        Self {
            frame_id: 0,
            inner: futures::future::ready(CookFrameResult::unstarted(0, CookError::BadRequest, None)).boxed(),
        }
    }
}

impl Future for CookFuture {
    type Output = CookFrameResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CookFrameResult> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for CookFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookFuture").field("frame_id", &self.frame_id).finish_non_exhaustive()
    }
}

pub struct FrameCooker {
    instance: InstanceSlot,
    time_mode: TimeMode,
    variables: Arc<VariableManager>,
    finalizer: Arc<FrameFinalizer>,
    runtime: Handle,
    state: Mutex<State>,
}

impl std::fmt::Debug for FrameCooker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FrameCooker")
            .field("time_mode", &self.time_mode)
            .field("in_progress", &state.in_progress.as_ref().map(|c| c.cook.frame_id))
            .field("next_occupied", &state.next.is_occupied())
            .finish_non_exhaustive()
    }
}

impl FrameCooker {
    pub fn new(
        instance: InstanceSlot,
        time_mode: TimeMode,
        variables: Arc<VariableManager>,
        finalizer: Arc<FrameFinalizer>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance,
            time_mode,
            variables,
            finalizer,
            runtime,
            state: Mutex::new(State {
                next_frame_id: FIRST_FRAME_ID,
                in_progress: None,
                next: NextCook::Empty,
                engine_busy_since: None,
                accumulated_time: 0,
                frame_last_updated: None,
            }),
        })
    }

    pub fn next_frame_id(&self) -> u64 {
        lock(&self.state).next_frame_id
    }

    /// Last frame the engine actually updated outputs for.
    pub fn frame_last_updated(&self) -> Option<u64> {
        lock(&self.state).frame_last_updated
    }

    pub fn is_cooking(&self) -> bool {
        lock(&self.state).in_progress.is_some()
    }

    /// Frame the engine is currently cooking, if a start call was issued.
    pub fn cooking_frame_id(&self) -> Option<u64> {
        let state = lock(&self.state);
        match &state.in_progress {
            Some(InProgress { cook, stage: Stage::Cooking { .. } }) => Some(cook.frame_id),
            _ => None,
        }
    }

    /// Queues a cook. Never blocks.
    ///
    /// Resolves with [`CookError::BadRequest`] once the instance is gone.
    pub fn cook_frame(self: &Arc<Self>, request: CookFrameRequest) -> CookFuture {
        if !self.instance.is_live() {
            return CookFuture::rejected();
        }

        let exports = self.variables.texture_updates().latest();
        let (tx, rx) = oneshot::channel();
        let (frame_id, replaced, start) = {
            let mut state = lock(&self.state);
            let frame_id = state.next_frame_id;
            state.next_frame_id += 1;
            self.finalizer.notify_frame_enqueued(frame_id);

            let cook = PendingCook { frame_id, request, created: Instant::now(), exports, promise: tx };
            if state.in_progress.is_some() || state.engine_busy_since.is_some() {
                (frame_id, state.next.combine(cook), None)
            } else {
                state.in_progress = Some(InProgress { cook, stage: Stage::WaitingForExports });
                (frame_id, None, Some(exports))
            }
        };

        if let Some(older) = replaced {
            log::debug!("cook {} replaced by cook {frame_id}", older.frame_id);
            let frame_last_updated = self.frame_last_updated();
            self.resolve(older, CookFrameResult::unstarted(0, CookError::Replaced, frame_last_updated));
        }
        if let Some(exports) = start {
            self.dispatch(frame_id, exports);
        }

        CookFuture {
            frame_id,
            inner: async move {
                rx.await
                    .unwrap_or_else(|_| CookFrameResult::unstarted(frame_id, CookError::Cancelled, None))
            }
            .boxed(),
        }
    }

    /// Handles the engine's frame finished event.
    pub fn on_frame_finished(self: &Arc<Self>, event: InstanceEvent) {
        let outcome = match event.result {
            TeResult::Success | TeResult::ComponentWarnings => Ok(()),
            TeResult::Cancelled => Err(CookError::EngineFrameCancelled),
            _ => Err(CookError::InternalEngineError),
        };
        self.finish_frame(None, outcome, event);
    }

    /// Resolves both slots with [`CookError::Cancelled`] and asks the engine
    /// to drop the frame in flight. Calling it again does nothing.
    pub fn cancel_current_and_next(self: &Arc<Self>) {
        self.cancel(None, CookError::Cancelled, true);
    }

    /// Cancels the cook in progress if it is `frame_id`. The waiting cook, if
    /// any, starts once the engine has let go of the cancelled frame.
    pub fn cancel_current_frame(self: &Arc<Self>, frame_id: u64) -> bool {
        self.cancel(Some(frame_id), CookError::Cancelled, false)
    }

    /// Resolves the cook in flight with [`CookError::Timeout`] once it has
    /// been cooking for longer than `timeout`.
    pub fn check_if_cook_timed_out(self: &Arc<Self>, timeout: Duration) -> bool {
        let (timed_out, next) = {
            let mut state = lock(&self.state);
            match state.in_progress.as_ref().map(|c| (c.cook.frame_id, c.stage)) {
                Some((frame_id, Stage::Cooking { started })) if started.elapsed() > timeout => (Some(frame_id), None),
                Some(_) => (None, None),
                // The engine never reported back on a cancelled frame.
                None if state.engine_busy_since.is_some_and(|since| since.elapsed() > timeout) => {
                    log::warn!("engine did not acknowledge a cancelled frame within {timeout:?}");
                    state.engine_busy_since = None;
                    (None, state.advance())
                }
                None => (None, None),
            }
        };

        if let Some((frame_id, exports)) = next {
            self.dispatch(frame_id, exports);
        }
        match timed_out {
            Some(frame_id) => {
                log::warn!("cook {frame_id} timed out after {timeout:?}");
                self.cancel(Some(frame_id), CookError::Timeout, false)
            }
            None => false,
        }
    }

    fn cancel(self: &Arc<Self>, frame_id: Option<u64>, error: CookError, include_next: bool) -> bool {
        let (resolved, cancel_engine, next, frame_last_updated) = {
            let mut state = lock(&self.state);
            let matches = state
                .in_progress
                .as_ref()
                .is_some_and(|c| frame_id.map_or(true, |id| id == c.cook.frame_id));

            let mut resolved = Vec::new();
            let mut cancel_engine = false;
            if matches {
                if let Some(current) = state.in_progress.take() {
                    cancel_engine = matches!(current.stage, Stage::Cooking { .. });
                    resolved.push(current.cook);
                }
            }
            if include_next {
                resolved.extend(state.next.take());
            }
            let next = state.advance();
            (resolved, cancel_engine, next, state.frame_last_updated)
        };

        let cancelled_any = !resolved.is_empty();
        for cook in resolved {
            self.resolve(cook, CookFrameResult::unstarted(0, error, frame_last_updated));
        }
        if cancel_engine {
            if let Some(instance) = self.instance.get() {
                if let Err(e) = instance.cancel_frame() {
                    log::warn!("engine refused to cancel the frame: {e:?}");
                }
            }
        }
        if let Some((frame_id, exports)) = next {
            self.dispatch(frame_id, exports);
        }
        cancelled_any
    }

    /// Starts `frame_id` once the texture inputs it depends on are in.
    fn dispatch(self: &Arc<Self>, frame_id: u64, exports: TextureUpdateId) {
        if self.variables.texture_updates().is_done_up_to(exports) {
            self.start_frame(frame_id);
            return;
        }

        log::trace!("cook {frame_id} waiting for texture exports up to {exports:?}");
        let this = self.clone();
        let ready = self.variables.texture_updates().wait_up_to(exports);
        self.runtime.spawn(async move {
            ready.await;
            this.start_frame(frame_id);
        });
    }

    fn start_frame(self: &Arc<Self>, frame_id: u64) {
        let (instance, time, discontinuity, inputs) = {
            let mut state = lock(&self.state);
            let Some(instance) = self.instance.get() else {
                drop(state);
                self.cancel(Some(frame_id), CookError::Cancelled, false);
                return;
            };
            let Some(current) = state
                .in_progress
                .as_mut()
                .filter(|c| c.cook.frame_id == frame_id && c.stage == Stage::WaitingForExports)
            else {
                log::debug!("cook {frame_id} no longer waiting to start");
                return;
            };

            let now = Instant::now();
            current.stage = Stage::Cooking { started: now };
            let request = &mut current.cook.request;
            let inputs = std::mem::take(&mut request.inputs);
            // Time spent waiting counts towards the frame.
            let waited_ms = now.duration_since(current.cook.created).as_millis() as i64;
            let frame_time = request.frame_time + request.time_scale * waited_ms / 1000;
            let (time_scale, discontinuity) = (request.time_scale, request.discontinuity);

            let time = match self.time_mode {
                TimeMode::Internal => TeTime { value: 0, scale: 0 },
                TimeMode::External => {
                    state.accumulated_time += frame_time;
                    TeTime { value: state.accumulated_time, scale: time_scale }
                }
            };
            state.engine_busy_since = Some(now);
            (instance, time, discontinuity, inputs)
        };

        for (identifier, value) in &inputs {
            // Failures are already in the error log.
            if let Err(e) = self.variables.apply_input(identifier, value) {
                log::debug!("cook {frame_id} could not send '{identifier}': {e}");
            }
        }

        log::trace!("starting cook {frame_id} at {time:?}");
        if let Err(result) = instance.start_frame_at_time(time, discontinuity) {
            log::warn!("engine rejected the start of cook {frame_id}: {result:?}");
            self.finish_frame(
                Some(frame_id),
                Err(CookError::FailedToStartCook),
                InstanceEvent {
                    kind: crate::sdk::EventKind::FrameDidFinish,
                    result,
                    frame_dropped: false,
                    start_time: time,
                    end_time: time,
                },
            );
        }
    }

    fn finish_frame(self: &Arc<Self>, frame_id: Option<u64>, outcome: Result<(), CookError>, event: InstanceEvent) {
        let (finished, next) = {
            let mut state = lock(&self.state);
            let engine_was_busy = state.engine_busy_since.take().is_some();
            let matches = state.in_progress.as_ref().is_some_and(|c| {
                matches!(c.stage, Stage::Cooking { .. }) && frame_id.map_or(true, |id| id == c.cook.frame_id)
            });

            let finished = if matches { state.in_progress.take() } else { None };
            if finished.is_none() && !engine_was_busy {
                log::debug!("frame finished with no cook in flight ({:?})", event.result);
                return;
            }

            let finished = finished.map(|current| {
                let id = current.cook.frame_id;
                if outcome.is_ok() && !event.frame_dropped {
                    state.frame_last_updated = Some(id);
                }
                let result = CookFrameResult {
                    frame_id: id,
                    result: outcome,
                    engine_result: event.result,
                    frame_dropped: event.frame_dropped,
                    frame_last_updated: state.frame_last_updated,
                    start_time: event.start_time,
                    end_time: event.end_time,
                };
                (current.cook, result)
            });
            (finished, state.advance())
        };

        if let Some((cook, result)) = finished {
            self.resolve(cook, result);
        }
        if let Some((frame_id, exports)) = next {
            self.dispatch(frame_id, exports);
        }
    }

    /// Fulfils `cook` and hands the result to the finalizer.
    fn resolve(&self, cook: PendingCook, mut result: CookFrameResult) {
        result.frame_id = cook.frame_id;
        let _ = cook.promise.send(result.clone());
        self.finalizer.notify_frame_finished_cooking(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cook::fixture::{pipeline, wait_until};
    use crate::cook::InputValue;
    use crate::sdk::null::{Call, LinkValue};
    use crate::sdk::{LinkScope, LinkType};

    fn at(time: i64) -> CookFrameRequest {
        CookFrameRequest::at(time, 60_000)
    }

    #[tokio::test]
    async fn single_cook_round_trip() {
        let p = pipeline(TimeMode::Internal);
        let cook = p.cooker.cook_frame(at(0));
        assert_eq!(cook.frame_id(), FIRST_FRAME_ID);
        assert_eq!(p.cooker.cooking_frame_id(), Some(FIRST_FRAME_ID));
        assert_eq!(p.instance.started_frames(), vec![TeTime { value: 0, scale: 0 }]);

        p.instance.finish_frame(TeResult::Success);
        let result = cook.await;
        assert_eq!(result.result, Ok(()));
        assert_eq!(result.frame_last_updated, Some(FIRST_FRAME_ID));
        assert!(!p.cooker.is_cooking());
    }

    #[tokio::test]
    async fn third_request_replaces_the_queued_one() {
        let p = pipeline(TimeMode::External);
        let first = p.cooker.cook_frame(at(0));
        let second = p.cooker.cook_frame(at(1));
        let third = p.cooker.cook_frame(CookFrameRequest { discontinuity: true, ..at(1) });
        assert_eq!(p.instance.started_frames().len(), 1);

        let replaced = second.await;
        assert_eq!(replaced.result, Err(CookError::Replaced));
        assert_eq!(replaced.frame_id, 2);

        p.instance.finish_frame(TeResult::Success);
        assert_eq!(first.await.result, Ok(()));

        assert_eq!(p.cooker.cooking_frame_id(), Some(3));
        assert!(p
            .instance
            .calls()
            .iter()
            .any(|c| matches!(c, Call::StartFrame { discontinuity: true, .. })));

        p.instance.finish_frame(TeResult::Success);
        let last = third.await;
        assert_eq!(last.frame_id, 3);
        assert_eq!(last.result, Ok(()));
        assert_eq!(p.instance.started_frames().len(), 2);
    }

    #[tokio::test]
    async fn inputs_reach_the_engine_before_the_frame_starts() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/level", LinkScope::Input, LinkType::Double, 1, LinkValue::Doubles(vec![0.0]));

        let cook = p.cooker.cook_frame(at(0).with_input("op/level", InputValue::Doubles(vec![0.75])));
        let calls = p.instance.calls();
        let set = calls.iter().position(|c| *c == Call::SetValue("op/level".into())).unwrap();
        let start = calls.iter().position(|c| matches!(c, Call::StartFrame { .. })).unwrap();
        assert!(set < start);
        assert!(matches!(p.instance.value("op/level"), Some(LinkValue::Doubles(v)) if v == vec![0.75]));

        p.instance.finish_frame(TeResult::Success);
        assert!(cook.await.is_success());
    }

    #[tokio::test]
    async fn replacing_a_queued_request_keeps_its_unreplaced_inputs() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/a", LinkScope::Input, LinkType::Int, 1, LinkValue::Ints(vec![0]));
        p.instance.add_link("op/b", LinkScope::Input, LinkType::Int, 1, LinkValue::Ints(vec![0]));

        let first = p.cooker.cook_frame(at(0));
        let second = p.cooker.cook_frame(
            at(1).with_input("op/a", InputValue::Ints(vec![1])).with_input("op/b", InputValue::Ints(vec![1])),
        );
        let third = p.cooker.cook_frame(at(2).with_input("op/b", InputValue::Ints(vec![2])));
        assert_eq!(second.await.result, Err(CookError::Replaced));
        assert_eq!(p.instance.count_calls(|c| matches!(c, Call::SetValue(_))), 0);

        p.instance.finish_frame(TeResult::Success);
        first.await;
        assert_eq!(p.cooker.cooking_frame_id(), Some(3));
        assert!(matches!(p.instance.value("op/a"), Some(LinkValue::Ints(v)) if v == vec![1]));
        assert!(matches!(p.instance.value("op/b"), Some(LinkValue::Ints(v)) if v == vec![2]));

        p.instance.finish_frame(TeResult::Success);
        assert!(third.await.is_success());
    }

    #[test]
    fn combining_keeps_the_older_creation_time() {
        let pending = |frame_id: u64, created: Instant, request: CookFrameRequest| PendingCook {
            frame_id,
            request,
            created,
            exports: TextureUpdateId::default(),
            promise: oneshot::channel().0,
        };
        let earlier = Instant::now() - Duration::from_millis(50);
        let mut slot = NextCook::Empty;

        assert!(slot.combine(pending(2, earlier, at(1))).is_none());
        let older = slot.combine(pending(3, Instant::now(), at(2))).unwrap();
        assert_eq!(older.frame_id, 2);

        let waiting = slot.take().unwrap();
        assert_eq!(waiting.frame_id, 3);
        assert_eq!(waiting.created, earlier);
        assert_eq!(waiting.request.frame_time, 2);
    }

    #[tokio::test]
    async fn external_clock_accumulates_frame_times() {
        let p = pipeline(TimeMode::External);
        let a = p.cooker.cook_frame(at(1000));
        p.instance.finish_frame(TeResult::Success);
        a.await;
        let b = p.cooker.cook_frame(at(1000));
        p.instance.finish_frame(TeResult::Success);
        b.await;

        let times = p.instance.started_frames();
        assert_eq!(times.len(), 2);
        assert!(times[0].value >= 1000);
        assert!(times[1].value >= times[0].value + 1000);
        assert!(times.iter().all(|t| t.scale == 60_000));
    }

    #[tokio::test]
    async fn engine_results_are_mapped() {
        let p = pipeline(TimeMode::Internal);
        let cancelled = p.cooker.cook_frame(at(0));
        p.instance.finish_frame(TeResult::Cancelled);
        assert_eq!(cancelled.await.result, Err(CookError::EngineFrameCancelled));

        let failed = p.cooker.cook_frame(at(0));
        p.instance.finish_frame(TeResult::InternalError);
        let failed = failed.await;
        assert_eq!(failed.result, Err(CookError::InternalEngineError));
        assert_eq!(failed.engine_result, TeResult::InternalError);
        assert_eq!(failed.frame_last_updated, None);
    }

    #[tokio::test]
    async fn dropped_frame_keeps_previous_outputs_current() {
        let p = pipeline(TimeMode::Internal);
        let a = p.cooker.cook_frame(at(0));
        p.instance.finish_frame(TeResult::Success);
        a.await;

        let b = p.cooker.cook_frame(at(0));
        p.instance.drop_frame();
        let b = b.await;
        assert!(b.frame_dropped);
        assert_eq!(b.frame_last_updated, Some(FIRST_FRAME_ID));
    }

    #[tokio::test]
    async fn rejected_start_advances_to_the_next_cook() {
        let p = pipeline(TimeMode::Internal);
        let blocker = p.cooker.cook_frame(at(0));
        let queued = p.cooker.cook_frame(at(0));

        p.instance.fail_frame_starts(Some(TeResult::BadUsage));
        p.instance.finish_frame(TeResult::Success);
        blocker.await;

        let failed = queued.await;
        assert_eq!(failed.result, Err(CookError::FailedToStartCook));
        assert_eq!(failed.engine_result, TeResult::BadUsage);
        assert!(!p.cooker.is_cooking());
    }

    #[tokio::test]
    async fn engine_may_finish_inside_the_start_call() {
        let p = pipeline(TimeMode::Internal);
        p.instance.finish_frames_on_start(Some(TeResult::Success));

        let a = p.cooker.cook_frame(at(0));
        let b = p.cooker.cook_frame(at(0));
        assert_eq!(a.await.result, Ok(()));
        assert_eq!(b.await.result, Ok(()));
        assert_eq!(p.instance.started_frames().len(), 2);
    }

    #[tokio::test]
    async fn cancel_resolves_both_slots_once() {
        let p = pipeline(TimeMode::Internal);
        let current = p.cooker.cook_frame(at(0));
        let next = p.cooker.cook_frame(at(0));

        p.cooker.cancel_current_and_next();
        p.cooker.cancel_current_and_next();

        assert_eq!(current.await.result, Err(CookError::Cancelled));
        assert_eq!(next.await.result, Err(CookError::Cancelled));
        assert_eq!(p.instance.count_calls(|c| *c == Call::CancelFrame), 1);
    }

    #[tokio::test]
    async fn waiting_cook_starts_after_the_engine_acknowledges_a_cancel() {
        let p = pipeline(TimeMode::Internal);
        let current = p.cooker.cook_frame(at(0));
        let next = p.cooker.cook_frame(at(0));

        assert!(!p.cooker.cancel_current_frame(current.frame_id() + 7));
        assert!(p.cooker.cancel_current_frame(current.frame_id()));
        assert_eq!(current.await.result, Err(CookError::Cancelled));
        assert_eq!(p.instance.started_frames().len(), 1);

        // Late finish of the cancelled frame.
        p.instance.finish_frame(TeResult::Cancelled);
        assert_eq!(p.cooker.cooking_frame_id(), Some(next.frame_id()));
        p.instance.finish_frame(TeResult::Success);
        assert_eq!(next.await.result, Ok(()));
    }

    #[tokio::test]
    async fn timed_out_cook_is_cancelled() {
        let p = pipeline(TimeMode::Internal);
        let cook = p.cooker.cook_frame(at(0));
        assert!(!p.cooker.check_if_cook_timed_out(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(p.cooker.check_if_cook_timed_out(Duration::from_millis(1)));
        assert_eq!(cook.await.result, Err(CookError::Timeout));
        assert!(p.instance.calls().contains(&Call::CancelFrame));
    }

    #[tokio::test]
    async fn cleared_instance_rejects_new_cooks() {
        let p = pipeline(TimeMode::Internal);
        let running = p.cooker.cook_frame(at(0));
        p.slot.clear();
        p.cooker.cancel_current_and_next();

        assert_eq!(running.await.result, Err(CookError::Cancelled));
        let rejected = p.cooker.cook_frame(at(0));
        assert_eq!(rejected.frame_id(), 0);
        assert_eq!(rejected.await.result, Err(CookError::BadRequest));
        assert_eq!(p.finalizer.pending_frames(), 0);
    }

    #[tokio::test]
    async fn cook_waits_for_earlier_texture_exports() {
        let p = pipeline(TimeMode::Internal);
        let update = p.variables.texture_updates().begin();

        let cook = p.cooker.cook_frame(at(0));
        tokio::task::yield_now().await;
        assert!(p.instance.started_frames().is_empty());
        assert_eq!(p.cooker.cooking_frame_id(), None);
        assert!(p.cooker.is_cooking());

        let later = p.variables.texture_updates().begin();
        drop(update);
        let instance = p.instance.clone();
        wait_until(move || instance.started_frames().len() == 1).await;
        drop(later);

        p.instance.finish_frame(TeResult::Success);
        assert_eq!(cook.await.result, Ok(()));
    }

    #[tokio::test]
    async fn replaced_and_cancelled_cooks_are_finalized() {
        let p = pipeline(TimeMode::Internal);
        let first = p.cooker.cook_frame(at(0));
        let second = p.cooker.cook_frame(at(0));
        let second_finalized = p.finalizer.on_frame_finalized(second.frame_id());
        let _third = p.cooker.cook_frame(at(0));

        let finalized = second_finalized.await.unwrap();
        assert_eq!(finalized.cook.result, Err(CookError::Replaced));
        assert_eq!(
            p.finalizer.on_frame_finalized(second.frame_id()).await,
            Err(crate::errors::FinalizationError::AlreadyFinalized(2))
        );

        let first_id = first.frame_id();
        let first_finalized = p.finalizer.on_frame_finalized(first_id);
        p.cooker.cancel_current_and_next();
        assert_eq!(first_finalized.await.unwrap().cook.result, Err(CookError::Cancelled));
        assert_eq!(p.finalizer.pending_frames(), 0);
    }
}
