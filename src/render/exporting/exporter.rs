use super::{ExportedTexture, ExportedTextureCache};
use crate::errors::ExportError;
use crate::handle::ForeignRef;
use crate::render::provider::{HostTexture, ResourceProvider};
use crate::render::render_queue::RenderQueue;
use crate::sdk::{TeTexture, TouchInstance};
use crate::task_suspender::{lock, TaskSuspender};
use futures::future::{BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

pub type ExportResult = Result<Option<ForeignRef<dyn TeTexture>>, ExportError>;

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub parameter: String,
    /// `None` clears the input.
    pub texture: Option<Arc<dyn HostTexture>>,
    /// The host texture is unchanged since the last export; skip the copy.
    pub reuse_existing: bool,
}

/// Turns host textures into shared textures the engine can read.
pub struct TextureExporter {
    provider: Arc<dyn ResourceProvider>,
    render_queue: Arc<RenderQueue>,
    cache: Arc<Mutex<ExportedTextureCache>>,
    tasks: TaskSuspender,
}

impl std::fmt::Debug for TextureExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureExporter")
            .field("provider", &self.provider.name())
            .field("active_exports", &self.tasks.active_tasks())
            .finish_non_exhaustive()
    }
}

impl TextureExporter {
    pub fn new(provider: Arc<dyn ResourceProvider>, render_queue: Arc<RenderQueue>, runtime: Handle) -> Self {
        Self {
            provider,
            render_queue,
            cache: Arc::new(Mutex::new(ExportedTextureCache::new(runtime))),
            tasks: TaskSuspender::new(),
        }
    }

    pub fn active_exports(&self) -> usize {
        self.tasks.active_tasks()
    }

    pub fn cached_textures(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Exports `request.texture` for `request.parameter`.
    ///
    /// Rejected with [`ExportError::Cancelled`] once async tasks are suspended.
    pub fn export_texture(&self, instance: Arc<dyn TouchInstance>, request: ExportRequest) -> BoxFuture<'static, ExportResult> {
        let Some(token) = self.tasks.try_start_task() else {
            log::warn!("export of '{}' rejected, async tasks are suspended", request.parameter);
            return futures::future::ready(Err(ExportError::Cancelled)).boxed();
        };

        let Some(texture) = request.texture else {
            return futures::future::ready(Ok(None)).boxed();
        };
        if !self.provider.supports_host_texture(texture.as_ref()) {
            return futures::future::ready(Err(ExportError::UnsupportedTextureObject)).boxed();
        }
        if !self.provider.can_export_pixel_format(texture.desc().format) {
            return futures::future::ready(Err(ExportError::UnsupportedPixelFormat)).boxed();
        }

        let provider = self.provider.clone();
        let cache = self.cache.clone();
        let parameter = request.parameter;
        let reuse_existing = request.reuse_existing;
        let job = self.render_queue.run(move || -> ExportResult {
            let pooled = lock(&cache)
                .get_or_create(&parameter, &texture, reuse_existing, |desc| {
                    Ok(ExportedTexture::new(provider.create_exported_texture(desc)?))
                })
                .map_err(|e| ExportError::GraphicsDriverError(e.to_string()))?;

            let te_texture = pooled.exported.te_texture().ok_or(ExportError::Unknown)?;
            if pooled.needs_copy {
                let transfer = pooled
                    .exported
                    .copy_from(texture.as_ref())
                    .map_err(|e| ExportError::GraphicsDriverError(e.to_string()))?;
                if let Some(transfer) = transfer {
                    instance
                        .add_texture_transfer(&te_texture, transfer)
                        .map_err(|_| ExportError::FailedTextureTransfer)?;
                }
            }
            Ok(Some(te_texture))
        });

        async move {
            let result = job.await.unwrap_or(Err(ExportError::Cancelled));
            drop(token);
            result
        }
        .boxed()
    }

    /// Drops every cached shared texture. Resolves once the engine has let
    /// go of all of them; exports keep working afterwards.
    pub fn release_textures(&self) -> BoxFuture<'static, ()> {
        lock(&self.cache).release_all().boxed()
    }

    /// Rejects new exports, waits for running ones, then releases every
    /// cached shared texture once the engine is done with it.
    pub fn suspend_async_tasks(&self) -> BoxFuture<'static, ()> {
        let running = self.tasks.suspend();
        let cache = self.cache.clone();
        async move {
            running.await;
            let released = lock(&cache).release_all();
            released.await;
        }
        .boxed()
    }
}
