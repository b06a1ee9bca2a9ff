//! Graphics side of the bridge: resource providers, the render queue and
//! the texture export/import pipelines.

pub mod exporting;
pub mod importing;
pub mod provider;
#[cfg(any(test, feature = "test-util"))]
pub mod providers;
pub mod render_queue;

pub use provider::{HostTexture, PixelFormat, ResourceProvider, TextureDesc};
pub use render_queue::RenderQueue;
