use crate::handle::ForeignRef;
use crate::render::provider::{ExportedPlatformTexture, HostTexture, TextureDesc};
use crate::sdk::{ObjectEvent, TeTexture, TextureTransfer};
use crate::task_suspender::lock;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct UseState {
    ever_used: bool,
    in_use: bool,
    released: bool,
    release_waiter: Option<oneshot::Sender<()>>,
}

/// A shared texture handed to the engine.
///
/// The engine reports `BeginUse`/`EndUse` while it reads the texture and
/// `Release` once it will never touch it again. The GPU allocation is only
/// freed when this object is dropped, which must not happen while the
/// engine still uses it.
#[derive(Debug)]
pub struct ExportedTexture {
    desc: TextureDesc,
    allocation: Box<dyn ExportedPlatformTexture>,
    te_texture: Mutex<Option<ForeignRef<dyn TeTexture>>>,
    state: Mutex<UseState>,
}

impl ExportedTexture {
    pub fn new(allocation: Box<dyn ExportedPlatformTexture>) -> Arc<Self> {
        let te_texture = allocation.create_te_texture();
        let exported = Arc::new(Self {
            desc: allocation.desc(),
            allocation,
            te_texture: Mutex::new(Some(te_texture.clone())),
            state: Mutex::new(UseState::default()),
        });

        let weak: Weak<Self> = Arc::downgrade(&exported);
        te_texture.set_callback(Some(Arc::new(move |event| {
            if let Some(exported) = weak.upgrade() {
                exported.on_use_update(event);
            }
        })));

        exported
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    /// Whether a host texture fits into this allocation without recreating it.
    pub fn can_fit(&self, desc: &TextureDesc) -> bool {
        self.desc == *desc
    }

    /// Engine side handle, `None` once released.
    pub fn te_texture(&self) -> Option<ForeignRef<dyn TeTexture>> {
        lock(&self.te_texture).clone()
    }

    pub fn is_in_use(&self) -> bool {
        lock(&self.state).in_use
    }

    pub fn was_ever_used(&self) -> bool {
        lock(&self.state).ever_used
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    pub(crate) fn copy_from(&self, source: &dyn HostTexture) -> anyhow::Result<Option<TextureTransfer>> {
        self.allocation.copy_from(source)
    }

    /// Drops the engine side handle. The future resolves once the engine
    /// no longer uses the texture, after which the allocation may be freed.
    pub fn release(&self) -> impl Future<Output = ()> + Send + 'static {
        let representation = lock(&self.te_texture).take();

        let (tx, rx) = oneshot::channel();
        let ready = {
            let mut state = lock(&self.state);
            if !state.in_use {
                state.released = true;
                Some(tx)
            } else {
                assert!(state.release_waiter.is_none(), "ExportedTexture::release called twice");
                state.release_waiter = Some(tx);
                None
            }
        };
        // The engine keeps its own reference until it reports `Release`.
        drop(representation);

        if let Some(tx) = ready {
            let _ = tx.send(());
        }
        async move {
            let _ = rx.await;
        }
    }

    fn on_use_update(&self, event: ObjectEvent) {
        let waiter = {
            let mut state = lock(&self.state);
            match event {
                ObjectEvent::BeginUse => {
                    state.ever_used = true;
                    state.in_use = true;
                    None
                }
                ObjectEvent::EndUse => {
                    state.in_use = false;
                    None
                }
                ObjectEvent::Release => {
                    state.in_use = false;
                    state.released = true;
                    state.release_waiter.take()
                }
            }
        };

        if let Some(tx) = waiter {
            let _ = tx.send(());
        }
    }
}

impl Drop for ExportedTexture {
    fn drop(&mut self) {
        let in_use = lock(&self.state).in_use;
        if in_use {
            log::error!(
                "ExportedTexture {}x{} dropped while the engine still uses it",
                self.desc.width,
                self.desc.height
            );
            if !std::thread::panicking() {
                panic!("exported texture freed while in use by the engine");
            }
        }
        if let Some(te) = lock(&self.te_texture).take() {
            te.set_callback(None);
        }
    }
}
