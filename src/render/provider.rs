use crate::handle::ForeignRef;
use crate::sdk::{TeTexture, TextureKind, TextureTransfer, TouchInstance};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    Bgra8,
    Srgba8,
    R16F,
    Rgba16F,
    R32F,
    Rgba32F,
    Rgb10A2,
}

/// Width, height and format of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self { width, height, format }
    }
}

/// A texture owned by the host renderer.
pub trait HostTexture: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn desc(&self) -> TextureDesc;
}

/// Outcome of validating a freshly loaded instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadInstanceResult {
    Success,
    Failure(String),
}

impl LoadInstanceResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadInstanceResult::Success)
    }
}

/// A shared allocation the host writes and the engine reads.
///
/// Lives until the engine has released every use of it; see
/// [`ExportedTexture`](crate::render::exporting::ExportedTexture).
pub trait ExportedPlatformTexture: Send + Sync + fmt::Debug {
    fn desc(&self) -> TextureDesc;

    /// Creates the engine side representation of this allocation.
    fn create_te_texture(&self) -> ForeignRef<dyn TeTexture>;

    /// Copies `source` into the allocation. Fence based APIs return the
    /// transfer the engine must wait on before reading.
    fn copy_from(&self, source: &dyn HostTexture) -> anyhow::Result<Option<TextureTransfer>>;
}

/// A texture produced by the engine, opened on the host's graphics API.
pub trait ImportedPlatformTexture: Send + Sync + fmt::Debug {
    fn desc(&self) -> TextureDesc;

    fn can_copy_into(&self, target: &dyn HostTexture) -> bool {
        target.desc() == self.desc()
    }

    /// Queues the GPU wait for `transfer` (keyed mutex acquire or fence wait).
    fn acquire(&self, transfer: &TextureTransfer) -> anyhow::Result<()>;

    fn copy_into(&self, target: &dyn HostTexture) -> anyhow::Result<()>;

    /// Hands the texture back after a copy. Returns the transfer to register
    /// with the engine when the API signals a fence of its own.
    fn release(&self, transfer: &TextureTransfer, release_to_zero: bool) -> anyhow::Result<Option<TextureTransfer>>;
}

/// Per graphics API glue between the host renderer and the engine.
///
/// Export and import hooks are only called from the render queue.
pub trait ResourceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Texture kind this provider exchanges with the engine.
    fn texture_kind(&self) -> TextureKind;

    /// Hands the provider's device or context to the instance before loading.
    fn configure_instance(&self, instance: &dyn TouchInstance) -> anyhow::Result<()>;

    fn validate_loaded_instance(&self, instance: &dyn TouchInstance) -> LoadInstanceResult;

    fn exportable_pixel_formats(&self) -> Vec<PixelFormat>;

    fn can_export_pixel_format(&self, format: PixelFormat) -> bool {
        self.exportable_pixel_formats().contains(&format)
    }

    /// Whether the host texture object is one this API can share.
    fn supports_host_texture(&self, texture: &dyn HostTexture) -> bool;

    fn create_exported_texture(&self, desc: TextureDesc) -> anyhow::Result<Box<dyn ExportedPlatformTexture>>;

    /// Opens the native shared handle behind an engine texture.
    fn open_shared_texture(&self, texture: &ForeignRef<dyn TeTexture>) -> anyhow::Result<Arc<dyn ImportedPlatformTexture>>;

    fn create_host_texture(&self, desc: TextureDesc) -> anyhow::Result<Arc<dyn HostTexture>>;
}
