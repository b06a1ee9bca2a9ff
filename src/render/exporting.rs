//! Host to engine texture export.

mod cache;
mod exported_texture;
mod exporter;

pub use cache::{ExportedTextureCache, PooledTexture};
pub use exported_texture::ExportedTexture;
pub use exporter::{ExportRequest, ExportResult, TextureExporter};
