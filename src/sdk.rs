//! Contract of the external engine.
//!
//! The external engine is reached through [`TouchInstance`]. Its objects
//! (textures, semaphores, tables, float buffers) are foreign reference
//! counted and always handled through [`ForeignRef`]. Event, link and
//! object callbacks may be invoked from any thread, including the
//! engine's own workers.
//!
//! With the `test-util` feature, `null::NullInstance` is an in-memory
//! instance that records every call and lets the caller drive the
//! callbacks by hand.

#[cfg(any(test, feature = "test-util"))]
pub mod null;

use crate::config::TimeMode;
use crate::handle::{ForeignObject, ForeignRef};
use crate::render::provider::TextureDesc;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Foreign result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeResult {
    Success,
    Cancelled,
    ComponentWarnings,
    ComponentErrors,
    FileError,
    IncompatibleEngineVersion,
    InternalError,
    MissingResource,
    BadUsage,
    InvalidArgument,
    NoMatchingEntity,
    TextureFormatNotSupported,
    GpuAllocationFailed,
    LostConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    None,
    Warning,
    Error,
}

impl TeResult {
    pub fn severity(self) -> Severity {
        match self {
            TeResult::Success | TeResult::Cancelled => Severity::None,
            TeResult::ComponentWarnings | TeResult::IncompatibleEngineVersion => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_success(self) -> bool {
        self == TeResult::Success
    }

    /// Turns anything that is not a hard error into `Ok`.
    pub fn into_result(self) -> Result<(), TeResult> {
        match self.severity() {
            Severity::Error => Err(self),
            _ => Ok(()),
        }
    }
}

/// Engine time value, `value / scale` seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeTime {
    pub value: i64,
    pub scale: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    GeneralError,
    InstanceReady,
    InstanceDidLoad,
    InstanceDidUnload,
    FrameDidFinish,
}

/// Payload of the event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceEvent {
    pub kind: EventKind,
    pub result: TeResult,
    /// The engine skipped the frame; outputs still hold the previous frame's values.
    pub frame_dropped: bool,
    pub start_time: TeTime,
    pub end_time: TeTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Added,
    Removed,
    Modified,
    Moved,
    StateChange,
    ChildChange,
    ValueChange,
}

/// Use events delivered for every shared texture and semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEvent {
    BeginUse,
    EndUse,
    Release,
}

pub type EventCallback = Arc<dyn Fn(InstanceEvent) + Send + Sync>;
pub type LinkCallback = Arc<dyn Fn(LinkEvent, &str) + Send + Sync>;
pub type ObjectCallback = Arc<dyn Fn(ObjectEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScope {
    Input,
    Output,
}

impl LinkScope {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkScope::Input => "input",
            LinkScope::Output => "output",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Boolean,
    Double,
    Int,
    String,
    Texture,
    FloatBuffer,
    /// Table of strings.
    StringData,
    Separator,
    Group,
    Complex,
    Pulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDomain {
    None,
    Parameter,
    ParameterPage,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInterest {
    AllValues,
    SubsequentValues,
    NoValues,
}

/// Transient description of a link, re-queried on every access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub identifier: String,
    pub scope: LinkScope,
    pub link_type: LinkType,
    pub count: usize,
    pub domain: LinkDomain,
}

/// Native shared handle of a texture (HANDLE, fd, GL name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D3D11,
    D3DShared,
    Vulkan,
    OpenGL,
    Memory,
}

pub trait TeTexture: ForeignObject + fmt::Debug {
    fn kind(&self) -> TextureKind;
    fn desc(&self) -> TextureDesc;
    fn native_handle(&self) -> NativeHandle;
    /// Replaces the use callback. `None` clears it.
    fn set_callback(&self, callback: Option<ObjectCallback>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreKind {
    /// D3D11 keyed mutex, waited for with `AcquireSync`.
    KeyedMutex,
    /// D3D12 fence or Vulkan timeline semaphore.
    Fence,
}

pub trait TeSemaphore: ForeignObject + fmt::Debug {
    fn kind(&self) -> SemaphoreKind;
    fn native_handle(&self) -> NativeHandle;
    fn set_callback(&self, callback: Option<ObjectCallback>);
}

/// GPU ownership handoff for a shared texture.
#[derive(Debug, Clone)]
pub struct TextureTransfer {
    pub semaphore: ForeignRef<dyn TeSemaphore>,
    pub value: u64,
}

pub trait TeTable: ForeignObject + fmt::Debug {
    fn rows(&self) -> usize;
    fn columns(&self) -> usize;
    fn cell(&self, row: usize, column: usize) -> Option<String>;
}

pub trait TeFloatBuffer: ForeignObject + fmt::Debug {
    fn channel_names(&self) -> Vec<String>;
    /// One vector of samples per channel.
    fn values(&self) -> Vec<Vec<f32>>;
    fn sample_rate(&self) -> f64;
}

/// Plain table data passed to the engine on set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn single(value: impl Into<String>) -> Self {
        Self { rows: vec![vec![value.into()]] }
    }

    pub fn columns(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Plain float buffer data passed to the engine on set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatBufferData {
    pub channel_names: Vec<String>,
    pub values: Vec<Vec<f32>>,
    pub sample_rate: f64,
}

/// An opaque, loaded or loadable external engine instance.
///
/// Every call may be made from any thread. Frame completion is reported
/// through the event callback, possibly before `start_frame_at_time`
/// returns.
pub trait TouchInstance: Send + Sync {
    fn set_callbacks(&self, events: EventCallback, links: LinkCallback);
    fn configure(&self, time_mode: TimeMode, frame_rate: u32, input_buffer_limit: u32) -> Result<(), TeResult>;
    fn load(&self, path: &str) -> Result<(), TeResult>;
    fn resume(&self) -> Result<(), TeResult>;
    fn suspend(&self) -> Result<(), TeResult>;
    fn unload(&self) -> Result<(), TeResult>;

    fn start_frame_at_time(&self, time: TeTime, discontinuity: bool) -> Result<(), TeResult>;
    fn cancel_frame(&self) -> Result<(), TeResult>;

    fn link_info(&self, identifier: &str) -> Result<LinkInfo, TeResult>;
    fn set_link_interest(&self, identifier: &str, interest: LinkInterest) -> Result<(), TeResult>;

    fn get_bool(&self, identifier: &str) -> Result<bool, TeResult>;
    fn get_doubles(&self, identifier: &str, count: usize) -> Result<Vec<f64>, TeResult>;
    fn get_ints(&self, identifier: &str, count: usize) -> Result<Vec<i32>, TeResult>;
    fn get_string(&self, identifier: &str) -> Result<String, TeResult>;
    fn get_texture(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeTexture>>, TeResult>;
    fn get_float_buffer(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeFloatBuffer>>, TeResult>;
    fn get_table(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeTable>>, TeResult>;

    fn set_bool(&self, identifier: &str, value: bool) -> Result<(), TeResult>;
    fn set_doubles(&self, identifier: &str, values: &[f64]) -> Result<(), TeResult>;
    fn set_ints(&self, identifier: &str, values: &[i32]) -> Result<(), TeResult>;
    fn set_string(&self, identifier: &str, value: &str) -> Result<(), TeResult>;
    fn set_texture(&self, identifier: &str, texture: Option<&ForeignRef<dyn TeTexture>>) -> Result<(), TeResult>;
    fn set_float_buffer(&self, identifier: &str, buffer: &FloatBufferData) -> Result<(), TeResult>;
    fn set_table(&self, identifier: &str, table: &TableData) -> Result<(), TeResult>;

    fn has_texture_transfer(&self, texture: &ForeignRef<dyn TeTexture>) -> bool;
    fn get_texture_transfer(&self, texture: &ForeignRef<dyn TeTexture>) -> Result<TextureTransfer, TeResult>;
    fn add_texture_transfer(&self, texture: &ForeignRef<dyn TeTexture>, transfer: TextureTransfer) -> Result<(), TeResult>;
    /// D3D11 only: keyed mutexes are released with key 0 instead of the wait value.
    fn requires_keyed_mutex_release_to_zero(&self) -> bool;
}

/// The loaded instance, shared by every component that talks to it.
///
/// Clearing the slot marks the owner as shutting down: components check it
/// before any call that cannot be cancelled.
#[derive(Clone, Default)]
pub struct InstanceSlot {
    inner: Arc<RwLock<Option<Arc<dyn TouchInstance>>>>,
}

impl InstanceSlot {
    pub fn new(instance: Arc<dyn TouchInstance>) -> Self {
        Self { inner: Arc::new(RwLock::new(Some(instance))) }
    }

    pub fn get(&self) -> Option<Arc<dyn TouchInstance>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, instance: Arc<dyn TouchInstance>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(instance);
    }

    pub fn clear(&self) -> Option<Arc<dyn TouchInstance>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_live(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl fmt::Debug for InstanceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceSlot").field("live", &self.is_live()).finish()
    }
}
