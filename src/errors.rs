//! Error types.
//!
//! Every failure that crosses an async boundary is translated into one of
//! these enums and handed to the waiting future. Nothing here is ever
//! thrown across a callback from the external engine.

use crate::sdk::TeResult;

/// Outcome of a cook that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CookError {
    #[error("Bad cook request (no live engine instance)")]
    BadRequest,

    #[error("Cook request replaced by a newer request before it started")]
    Replaced,

    #[error("Cook cancelled")]
    Cancelled,

    #[error("The engine rejected the frame start call")]
    FailedToStartCook,

    #[error("The engine failed to cook the frame")]
    InternalEngineError,

    #[error("The engine reported the frame as cancelled")]
    EngineFrameCancelled,

    /// Never produced by [`FrameCooker`](crate::cook::FrameCooker); a dropped
    /// frame resolves `Ok` with `frame_dropped` set. Kept for hosts that
    /// match the engine's full cook result set.
    #[error("Inputs were discarded before the frame started")]
    InputsDiscarded,

    #[error("Cook timed out")]
    Timeout,
}

/// Returned by [`FrameFinalizer::on_frame_finalized`](crate::cook::FrameFinalizer::on_frame_finalized)
/// when no record for the frame exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FinalizationError {
    #[error("Frame {0} was already finalized")]
    AlreadyFinalized(u64),

    #[error("Frame {0} was never started")]
    NotStarted(u64),

    #[error("Frame {0} was dropped before it could be finalized")]
    Abandoned(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    #[error("No engine instance is loaded")]
    NotLoaded,

    #[error("Variable '{0}' not found")]
    NotFound(String),

    #[error("Variable '{name}' has the wrong scope (expected {expected})")]
    ScopeMismatch { name: String, expected: &'static str },

    #[error("Variable '{name}' has the wrong type (expected {expected})")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Variable '{name}' expects {expected} values, got {actual}")]
    CountMismatch { name: String, expected: usize, actual: usize },

    #[error("Engine call failed for '{name}': {result:?}")]
    Engine { name: String, result: TeResult },

    #[error("Texture export failed for '{name}': {source}")]
    Export { name: String, source: ExportError },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    #[error("Export cancelled (async tasks suspended)")]
    Cancelled,

    #[error("Texture object is not supported by this graphics API")]
    UnsupportedTextureObject,

    #[error("Pixel format is not exportable")]
    UnsupportedPixelFormat,

    #[error("Graphics driver error: {0}")]
    GraphicsDriverError(String),

    #[error("Failed texture transfer")]
    FailedTextureTransfer,

    #[error("Unknown export failure")]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("Import cancelled")]
    Cancelled,

    #[error("Failed to open the shared texture: {0}")]
    FailedToCreatePlatformTexture(String),

    #[error("Failed to create host texture: {0}")]
    FailedToCreateHostTexture(String),

    #[error("Failed to copy resources: {0}")]
    FailedToCopyResources(String),

    #[error("Failed texture transfer: {0}")]
    FailedTextureTransfer(String),
}

/// Facade level errors returned by [`TouchEngine`](crate::engine::TouchEngine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No engine instance is loaded")]
    NotLoaded,

    #[error("Engine instance is already loaded")]
    AlreadyLoaded,

    #[error("Loading failed: {0}")]
    LoadFailed(String),

    #[error("Engine call failed: {0:?}")]
    Sdk(TeResult),

    #[error("Failed to start the render thread: {0}")]
    RenderThread(#[from] std::io::Error),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Config(#[from] crate::config::EngineConfigError),
}
