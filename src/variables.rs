//! Typed access to the engine's links.
//!
//! Nothing about a link is cached: every access asks the engine for the
//! link's current scope, type and count before the typed call. Texture
//! outputs are the exception; they are imported by the frame finalizer and
//! read back from a table kept here.

mod manager;
mod texture_updates;

pub use manager::VariableManager;
pub use texture_updates::{TextureUpdateGuard, TextureUpdateId, TextureUpdates};
