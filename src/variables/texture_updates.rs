use crate::task_suspender::lock;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Sequence number of a texture input update. Zero means "none issued yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureUpdateId(pub u64);

#[derive(Debug, Default)]
struct State {
    last_issued: u64,
    in_progress: BTreeSet<u64>,
    waiters: Vec<(u64, oneshot::Sender<()>)>,
}

impl State {
    fn done_up_to(&self, id: u64) -> bool {
        self.in_progress.first().map_or(true, |oldest| *oldest > id)
    }
}

/// Tracks texture inputs on their way to the engine.
///
/// A cook waits for the updates issued before it was requested, never for
/// ones issued afterwards.
#[derive(Debug, Default)]
pub struct TextureUpdates {
    state: Mutex<State>,
}

/// Marks one update as running until dropped.
#[derive(Debug)]
pub struct TextureUpdateGuard {
    id: TextureUpdateId,
    owner: Arc<TextureUpdates>,
}

impl TextureUpdateGuard {
    pub fn id(&self) -> TextureUpdateId {
        self.id
    }
}

impl Drop for TextureUpdateGuard {
    fn drop(&mut self) {
        self.owner.finish(self.id);
    }
}

impl TextureUpdates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>) -> TextureUpdateGuard {
        let mut state = lock(&self.state);
        state.last_issued += 1;
        let id = state.last_issued;
        state.in_progress.insert(id);
        TextureUpdateGuard { id: TextureUpdateId(id), owner: self.clone() }
    }

    /// Id of the most recently issued update.
    pub fn latest(&self) -> TextureUpdateId {
        TextureUpdateId(lock(&self.state).last_issued)
    }

    pub fn in_progress(&self) -> usize {
        lock(&self.state).in_progress.len()
    }

    pub fn is_done_up_to(&self, id: TextureUpdateId) -> bool {
        lock(&self.state).done_up_to(id.0)
    }

    /// Resolves once every update up to and including `id` has finished.
    pub fn wait_up_to(&self, id: TextureUpdateId) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if state.done_up_to(id.0) {
                let _ = tx.send(());
            } else {
                state.waiters.push((id.0, tx));
            }
        }
        async move {
            let _ = rx.await;
        }
    }

    fn finish(&self, id: TextureUpdateId) {
        let ready = {
            let mut state = lock(&self.state);
            state.in_progress.remove(&id.0);
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|(up_to, _)| state.done_up_to(*up_to));
            state.waiters = waiting;
            ready
        };
        for (_, tx) in ready {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn nothing_issued_is_done() {
        let updates = TextureUpdates::new();
        assert_eq!(updates.latest(), TextureUpdateId(0));
        assert!(updates.wait_up_to(updates.latest()).now_or_never().is_some());
    }

    #[test]
    fn waits_only_for_earlier_updates() {
        let updates = TextureUpdates::new();
        let first = updates.begin();
        let barrier = updates.latest();
        let mut wait = Box::pin(updates.wait_up_to(barrier));

        let later = updates.begin();
        assert!((&mut wait).now_or_never().is_none());

        drop(first);
        assert!(wait.now_or_never().is_some());
        assert!(!updates.is_done_up_to(later.id()));
        assert_eq!(updates.in_progress(), 1);
    }

    #[test]
    fn out_of_order_completion() {
        let updates = TextureUpdates::new();
        let a = updates.begin();
        let b = updates.begin();
        let mut wait_b = Box::pin(updates.wait_up_to(b.id()));

        drop(b);
        assert!((&mut wait_b).now_or_never().is_none());
        drop(a);
        assert!(wait_b.now_or_never().is_some());
    }
}
