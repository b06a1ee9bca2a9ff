//! Frame cooking and finalization.
//!
//! [`FrameCooker`] drives the engine one frame at a time. [`FrameFinalizer`]
//! waits, per frame, for the cook result and for every texture import the
//! frame triggered before declaring the frame done.

mod data;
mod frame_cooker;
mod frame_finalizer;

#[cfg(test)]
pub(crate) mod fixture;

pub use data::{CookFrameRequest, CookFrameResult, FinalizedFrame, InputValue, FIRST_FRAME_ID};
pub use frame_cooker::{CookFuture, FrameCooker};
pub use frame_finalizer::{FinalizeResult, FrameFinalizer};
