use crate::errors::ImportError;
use crate::handle::ForeignRef;
use crate::render::provider::{HostTexture, ImportedPlatformTexture, ResourceProvider};
use crate::render::render_queue::{panic_message, RenderQueue};
use crate::sdk::{NativeHandle, ObjectEvent, TeTexture, TouchInstance};
use crate::task_suspender::{lock, TaskSuspender};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;

pub type ImportResult = Result<Arc<dyn HostTexture>, ImportError>;

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub parameter: String,
    pub texture: ForeignRef<dyn TeTexture>,
}

struct QueuedImport {
    instance: Arc<dyn TouchInstance>,
    request: ImportRequest,
    promise: oneshot::Sender<ImportResult>,
}

#[derive(Default)]
struct LinkData {
    in_progress: bool,
    execute_next: Option<QueuedImport>,
    /// Host texture of the last import, reused while it still fits.
    host_texture: Option<Arc<dyn HostTexture>>,
}

type PlatformCache = Mutex<HashMap<NativeHandle, Arc<dyn ImportedPlatformTexture>>>;

struct Shared {
    provider: Arc<dyn ResourceProvider>,
    render_queue: Arc<RenderQueue>,
    links: Mutex<HashMap<String, LinkData>>,
    platform_textures: Arc<PlatformCache>,
}

/// Copies engine textures into host textures.
///
/// One import per parameter runs at a time. A request arriving while one
/// runs waits in a single slot; a newer request replaces it and the
/// replaced one resolves with [`ImportError::Cancelled`].
pub struct TextureImporter {
    shared: Arc<Shared>,
    tasks: TaskSuspender,
}

impl std::fmt::Debug for TextureImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureImporter")
            .field("provider", &self.shared.provider.name())
            .field("active_imports", &self.tasks.active_tasks())
            .finish_non_exhaustive()
    }
}

impl TextureImporter {
    pub fn new(provider: Arc<dyn ResourceProvider>, render_queue: Arc<RenderQueue>) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                render_queue,
                links: Mutex::new(HashMap::new()),
                platform_textures: Arc::new(Mutex::new(HashMap::new())),
            }),
            tasks: TaskSuspender::new(),
        }
    }

    pub fn cached_platform_textures(&self) -> usize {
        lock(&self.shared.platform_textures).len()
    }

    pub fn import_texture(&self, instance: Arc<dyn TouchInstance>, request: ImportRequest) -> BoxFuture<'static, ImportResult> {
        let Some(token) = self.tasks.try_start_task() else {
            return futures::future::ready(Err(ImportError::Cancelled)).boxed();
        };

        let (tx, rx) = oneshot::channel();
        let queued = QueuedImport { instance, request, promise: tx };

        let (start, replaced) = {
            let mut links = lock(&self.shared.links);
            let link = links.entry(queued.request.parameter.clone()).or_default();
            if link.in_progress {
                (None, link.execute_next.replace(queued))
            } else {
                link.in_progress = true;
                (Some(queued), None)
            }
        };

        if let Some(replaced) = replaced {
            log::debug!("import of '{}' replaced by a newer one", replaced.request.parameter);
            let _ = replaced.promise.send(Err(ImportError::Cancelled));
        }
        if let Some(queued) = start {
            Shared::execute(&self.shared, queued);
        }

        async move {
            let result = rx.await.unwrap_or(Err(ImportError::Cancelled));
            drop(token);
            result
        }
        .boxed()
    }

    /// Cancels queued imports, waits for running ones and drops cached platform textures.
    pub fn suspend_async_tasks(&self) -> BoxFuture<'static, ()> {
        let cancelled: Vec<QueuedImport> = lock(&self.shared.links)
            .values_mut()
            .filter_map(|link| link.execute_next.take())
            .collect();
        for queued in cancelled {
            let _ = queued.promise.send(Err(ImportError::Cancelled));
        }

        let running = self.tasks.suspend();
        let shared = self.shared.clone();
        async move {
            running.await;
            lock(&shared.platform_textures).clear();
        }
        .boxed()
    }
}

impl Shared {
    fn execute(this: &Arc<Self>, queued: QueuedImport) {
        let shared = this.clone();
        this.render_queue.submit(move || {
            let QueuedImport { instance, request, promise } = queued;
            let previous = lock(&shared.links)
                .get(&request.parameter)
                .and_then(|link| link.host_texture.clone());

            let result = catch_unwind(AssertUnwindSafe(|| {
                shared.import_on_render_thread(instance.as_ref(), &request, previous)
            }))
            .unwrap_or_else(|panic| {
                Err(ImportError::FailedToCopyResources(panic_message(panic.as_ref()).to_string()))
            });
            if let Err(e) = &result {
                log::warn!("import of '{}' failed: {e}", request.parameter);
            }

            let next = {
                let mut links = lock(&shared.links);
                let link = links.entry(request.parameter.clone()).or_default();
                if let Ok(texture) = &result {
                    link.host_texture = Some(texture.clone());
                }
                let next = link.execute_next.take();
                link.in_progress = next.is_some();
                next
            };

            let _ = promise.send(result);
            if let Some(next) = next {
                Shared::execute(&shared, next);
            }
        });
    }

    fn import_on_render_thread(
        &self,
        instance: &dyn TouchInstance,
        request: &ImportRequest,
        previous: Option<Arc<dyn HostTexture>>,
    ) -> ImportResult {
        let platform = self.platform_texture(&request.texture)?;

        let target = match previous {
            Some(target) if platform.can_copy_into(target.as_ref()) => target,
            _ => self
                .provider
                .create_host_texture(platform.desc())
                .map_err(|e| ImportError::FailedToCreateHostTexture(e.to_string()))?,
        };

        // No pending transfer means the host already owns the texture.
        let transfer = if instance.has_texture_transfer(&request.texture) {
            let transfer = instance
                .get_texture_transfer(&request.texture)
                .map_err(|r| ImportError::FailedTextureTransfer(format!("{r:?}")))?;
            platform
                .acquire(&transfer)
                .map_err(|e| ImportError::FailedTextureTransfer(e.to_string()))?;
            Some(transfer)
        } else {
            None
        };

        let copied = platform
            .copy_into(target.as_ref())
            .map_err(|e| ImportError::FailedToCopyResources(e.to_string()));

        if let Some(transfer) = transfer {
            let handed_back = platform
                .release(&transfer, instance.requires_keyed_mutex_release_to_zero())
                .map_err(|e| ImportError::FailedTextureTransfer(e.to_string()))?;
            if let Some(back) = handed_back {
                instance
                    .add_texture_transfer(&request.texture, back)
                    .map_err(|r| ImportError::FailedTextureTransfer(format!("{r:?}")))?;
            }
        }

        copied?;
        Ok(target)
    }

    /// Opens the native handle once and keeps it until the engine releases the texture.
    fn platform_texture(&self, texture: &ForeignRef<dyn TeTexture>) -> Result<Arc<dyn ImportedPlatformTexture>, ImportError> {
        let handle = texture.native_handle();
        if let Some(cached) = lock(&self.platform_textures).get(&handle) {
            return Ok(cached.clone());
        }

        let opened = self
            .provider
            .open_shared_texture(texture)
            .map_err(|e| ImportError::FailedToCreatePlatformTexture(e.to_string()))?;
        lock(&self.platform_textures).insert(handle, opened.clone());

        let cache: Weak<PlatformCache> = Arc::downgrade(&self.platform_textures);
        texture.set_callback(Some(Arc::new(move |event| {
            if event == ObjectEvent::Release {
                if let Some(cache) = cache.upgrade() {
                    lock(&cache).remove(&handle);
                }
            }
        })));

        Ok(opened)
    }
}
