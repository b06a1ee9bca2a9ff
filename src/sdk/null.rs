//! In-memory engine instance.
//!
//! Nothing is cooked. Links are plain values in a table, every call is
//! recorded, and frame completion, link changes and object use events are
//! fired by hand through the `fire_*`/`finish_frame` helpers. Hosts can use
//! it to run the pipeline without the engine installed; the tests in this
//! crate use it to script the engine side.

use crate::config::TimeMode;
use crate::handle::{ForeignObject, ForeignRef};
use crate::render::provider::TextureDesc;
use crate::sdk::*;
use crate::task_suspender::lock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> NativeHandle {
    NativeHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Default)]
struct RefCount(AtomicIsize);

impl RefCount {
    fn retain(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let prev = self.0.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            log::error!("foreign object released more often than retained");
        }
    }

    fn get(&self) -> isize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct CallbackSlot(Mutex<Option<ObjectCallback>>);

impl CallbackSlot {
    fn set(&self, cb: Option<ObjectCallback>) {
        *lock(&self.0) = cb;
    }

    fn fire(&self, event: ObjectEvent) {
        let cb = lock(&self.0).clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }

    fn is_set(&self) -> bool {
        lock(&self.0).is_some()
    }
}

impl fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackSlot({})", if self.is_set() { "set" } else { "empty" })
    }
}

#[derive(Debug)]
pub struct NullTexture {
    kind: TextureKind,
    desc: TextureDesc,
    handle: NativeHandle,
    refs: RefCount,
    callback: CallbackSlot,
}

impl NullTexture {
    pub fn new(kind: TextureKind, desc: TextureDesc) -> Arc<Self> {
        Self::with_handle(kind, desc, next_handle())
    }

    /// A second engine object referring to an existing native handle.
    pub fn with_handle(kind: TextureKind, desc: TextureDesc, handle: NativeHandle) -> Arc<Self> {
        Arc::new(Self {
            kind,
            desc,
            handle,
            refs: RefCount::default(),
            callback: CallbackSlot::default(),
        })
    }

    pub fn foreign_ref(self: &Arc<Self>) -> ForeignRef<dyn TeTexture> {
        let obj: Arc<dyn TeTexture> = self.clone();
        ForeignRef::new(obj)
    }

    /// Simulates the engine reporting a use event.
    pub fn fire(&self, event: ObjectEvent) {
        self.callback.fire(event);
    }

    pub fn ref_count(&self) -> isize {
        self.refs.get()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_set()
    }
}

impl ForeignObject for NullTexture {
    fn retain(&self) {
        self.refs.retain();
    }
    fn release(&self) {
        self.refs.release();
    }
}

impl TeTexture for NullTexture {
    fn kind(&self) -> TextureKind {
        self.kind
    }
    fn desc(&self) -> TextureDesc {
        self.desc
    }
    fn native_handle(&self) -> NativeHandle {
        self.handle
    }
    fn set_callback(&self, callback: Option<ObjectCallback>) {
        self.callback.set(callback);
    }
}

#[derive(Debug)]
pub struct NullSemaphore {
    kind: SemaphoreKind,
    handle: NativeHandle,
    refs: RefCount,
    callback: CallbackSlot,
}

impl NullSemaphore {
    pub fn new(kind: SemaphoreKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            handle: next_handle(),
            refs: RefCount::default(),
            callback: CallbackSlot::default(),
        })
    }

    pub fn foreign_ref(self: &Arc<Self>) -> ForeignRef<dyn TeSemaphore> {
        let obj: Arc<dyn TeSemaphore> = self.clone();
        ForeignRef::new(obj)
    }

    pub fn fire(&self, event: ObjectEvent) {
        self.callback.fire(event);
    }

    pub fn ref_count(&self) -> isize {
        self.refs.get()
    }
}

impl ForeignObject for NullSemaphore {
    fn retain(&self) {
        self.refs.retain();
    }
    fn release(&self) {
        self.refs.release();
    }
}

impl TeSemaphore for NullSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn native_handle(&self) -> NativeHandle {
        self.handle
    }
    fn set_callback(&self, callback: Option<ObjectCallback>) {
        self.callback.set(callback);
    }
}

#[derive(Debug)]
struct NullTable {
    data: TableData,
    refs: RefCount,
}

impl ForeignObject for NullTable {
    fn retain(&self) {
        self.refs.retain();
    }
    fn release(&self) {
        self.refs.release();
    }
}

impl TeTable for NullTable {
    fn rows(&self) -> usize {
        self.data.rows.len()
    }
    fn columns(&self) -> usize {
        self.data.columns()
    }
    fn cell(&self, row: usize, column: usize) -> Option<String> {
        self.data.rows.get(row)?.get(column).cloned()
    }
}

#[derive(Debug)]
struct NullFloatBuffer {
    data: FloatBufferData,
    refs: RefCount,
}

impl ForeignObject for NullFloatBuffer {
    fn retain(&self) {
        self.refs.retain();
    }
    fn release(&self) {
        self.refs.release();
    }
}

impl TeFloatBuffer for NullFloatBuffer {
    fn channel_names(&self) -> Vec<String> {
        self.data.channel_names.clone()
    }
    fn values(&self) -> Vec<Vec<f32>> {
        self.data.values.clone()
    }
    fn sample_rate(&self) -> f64 {
        self.data.sample_rate
    }
}

/// Value stored for a link.
#[derive(Debug, Clone)]
pub enum LinkValue {
    Empty,
    Bool(bool),
    Doubles(Vec<f64>),
    Ints(Vec<i32>),
    String(String),
    Texture(Option<ForeignRef<dyn TeTexture>>),
    FloatBuffer(FloatBufferData),
    Table(TableData),
}

/// Calls recorded by [`NullInstance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Configure { time_mode: TimeMode, frame_rate: u32, input_buffer_limit: u32 },
    Load(String),
    Resume,
    Suspend,
    Unload,
    StartFrame { time: TeTime, discontinuity: bool },
    CancelFrame,
    SetInterest(String, LinkInterest),
    SetValue(String),
    AddTransfer { texture: NativeHandle, value: u64 },
}

#[derive(Default)]
pub struct NullInstance {
    links: Mutex<BTreeMap<String, (LinkInfo, LinkValue)>>,
    calls: Mutex<Vec<Call>>,
    event_callback: Mutex<Option<EventCallback>>,
    link_callback: Mutex<Option<LinkCallback>>,
    start_failure: Mutex<Option<TeResult>>,
    finish_on_start: Mutex<Option<TeResult>>,
    pending_transfers: Mutex<HashMap<usize, TextureTransfer>>,
    release_to_zero: AtomicBool,
}

impl fmt::Debug for NullInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullInstance")
            .field("links", &lock(&self.links).len())
            .field("calls", &lock(&self.calls).len())
            .finish_non_exhaustive()
    }
}

impl NullInstance {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_link(&self, identifier: &str, scope: LinkScope, link_type: LinkType, count: usize, value: LinkValue) {
        let info = LinkInfo {
            identifier: identifier.to_string(),
            scope,
            link_type,
            count,
            domain: LinkDomain::Operator,
        };
        lock(&self.links).insert(identifier.to_string(), (info, value));
    }

    pub fn remove_link(&self, identifier: &str) {
        lock(&self.links).remove(identifier);
    }

    pub fn value(&self, identifier: &str) -> Option<LinkValue> {
        lock(&self.links).get(identifier).map(|(_, v)| v.clone())
    }

    /// Writes a value as the engine would after a cook.
    pub fn set_output(&self, identifier: &str, value: LinkValue) {
        if let Some(entry) = lock(&self.links).get_mut(identifier) {
            entry.1 = value;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn started_frames(&self) -> Vec<TeTime> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                Call::StartFrame { time, .. } => Some(*time),
                _ => None,
            })
            .collect()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    /// Makes the next frame start calls fail with `result`.
    pub fn fail_frame_starts(&self, result: Option<TeResult>) {
        *lock(&self.start_failure) = result;
    }

    /// Reports the frame finished from inside `start_frame_at_time`.
    pub fn finish_frames_on_start(&self, result: Option<TeResult>) {
        *lock(&self.finish_on_start) = result;
    }

    pub fn set_release_to_zero(&self, on: bool) {
        self.release_to_zero.store(on, Ordering::SeqCst);
    }

    /// Registers an ownership handoff the host must wait on before reading `texture`.
    pub fn set_pending_transfer(&self, texture: &ForeignRef<dyn TeTexture>, transfer: TextureTransfer) {
        lock(&self.pending_transfers).insert(texture.addr(), transfer);
    }

    pub fn fire_event(&self, event: InstanceEvent) {
        let cb = lock(&self.event_callback).clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }

    pub fn finish_frame(&self, result: TeResult) {
        self.finish(result, false);
    }

    /// Reports a frame the engine skipped without updating outputs.
    pub fn drop_frame(&self) {
        self.finish(TeResult::Success, true);
    }

    fn finish(&self, result: TeResult, frame_dropped: bool) {
        self.fire_event(InstanceEvent {
            kind: EventKind::FrameDidFinish,
            result,
            frame_dropped,
            start_time: TeTime::default(),
            end_time: TeTime::default(),
        });
    }

    pub fn fire_link(&self, event: LinkEvent, identifier: &str) {
        let cb = lock(&self.link_callback).clone();
        if let Some(cb) = cb {
            cb(event, identifier);
        }
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn with_value<R>(&self, identifier: &str, f: impl FnOnce(&LinkValue) -> Option<R>) -> Result<R, TeResult> {
        let links = lock(&self.links);
        let (_, value) = links.get(identifier).ok_or(TeResult::NoMatchingEntity)?;
        f(value).ok_or(TeResult::InvalidArgument)
    }

    fn store(&self, identifier: &str, value: LinkValue) -> Result<(), TeResult> {
        {
            let mut links = lock(&self.links);
            let entry = links.get_mut(identifier).ok_or(TeResult::NoMatchingEntity)?;
            entry.1 = value;
        }
        self.record(Call::SetValue(identifier.to_string()));
        Ok(())
    }
}

impl TouchInstance for NullInstance {
    fn set_callbacks(&self, events: EventCallback, links: LinkCallback) {
        *lock(&self.event_callback) = Some(events);
        *lock(&self.link_callback) = Some(links);
    }

    fn configure(&self, time_mode: TimeMode, frame_rate: u32, input_buffer_limit: u32) -> Result<(), TeResult> {
        self.record(Call::Configure { time_mode, frame_rate, input_buffer_limit });
        Ok(())
    }

    fn load(&self, path: &str) -> Result<(), TeResult> {
        self.record(Call::Load(path.to_string()));
        Ok(())
    }

    fn resume(&self) -> Result<(), TeResult> {
        self.record(Call::Resume);
        Ok(())
    }

    fn suspend(&self) -> Result<(), TeResult> {
        self.record(Call::Suspend);
        Ok(())
    }

    fn unload(&self) -> Result<(), TeResult> {
        self.record(Call::Unload);
        Ok(())
    }

    fn start_frame_at_time(&self, time: TeTime, discontinuity: bool) -> Result<(), TeResult> {
        self.record(Call::StartFrame { time, discontinuity });
        if let Some(failure) = *lock(&self.start_failure) {
            return Err(failure);
        }
        let finish = *lock(&self.finish_on_start);
        if let Some(result) = finish {
            self.finish_frame(result);
        }
        Ok(())
    }

    fn cancel_frame(&self) -> Result<(), TeResult> {
        self.record(Call::CancelFrame);
        Ok(())
    }

    fn link_info(&self, identifier: &str) -> Result<LinkInfo, TeResult> {
        lock(&self.links)
            .get(identifier)
            .map(|(info, _)| info.clone())
            .ok_or(TeResult::NoMatchingEntity)
    }

    fn set_link_interest(&self, identifier: &str, interest: LinkInterest) -> Result<(), TeResult> {
        self.record(Call::SetInterest(identifier.to_string(), interest));
        Ok(())
    }

    fn get_bool(&self, identifier: &str) -> Result<bool, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::Bool(b) => Some(*b),
            _ => None,
        })
    }

    fn get_doubles(&self, identifier: &str, count: usize) -> Result<Vec<f64>, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::Doubles(d) => Some(d.iter().copied().take(count).collect()),
            _ => None,
        })
    }

    fn get_ints(&self, identifier: &str, count: usize) -> Result<Vec<i32>, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::Ints(i) => Some(i.iter().copied().take(count).collect()),
            _ => None,
        })
    }

    fn get_string(&self, identifier: &str) -> Result<String, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    fn get_texture(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeTexture>>, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::Texture(t) => Some(t.clone()),
            LinkValue::Empty => Some(None),
            _ => None,
        })
    }

    fn get_float_buffer(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeFloatBuffer>>, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::FloatBuffer(data) => {
                let obj: Arc<dyn TeFloatBuffer> = Arc::new(NullFloatBuffer { data: data.clone(), refs: RefCount::default() });
                Some(Some(ForeignRef::new(obj)))
            }
            LinkValue::Empty => Some(None),
            _ => None,
        })
    }

    fn get_table(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeTable>>, TeResult> {
        self.with_value(identifier, |v| match v {
            LinkValue::Table(data) => {
                let obj: Arc<dyn TeTable> = Arc::new(NullTable { data: data.clone(), refs: RefCount::default() });
                Some(Some(ForeignRef::new(obj)))
            }
            LinkValue::Empty => Some(None),
            _ => None,
        })
    }

    fn set_bool(&self, identifier: &str, value: bool) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::Bool(value))
    }

    fn set_doubles(&self, identifier: &str, values: &[f64]) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::Doubles(values.to_vec()))
    }

    fn set_ints(&self, identifier: &str, values: &[i32]) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::Ints(values.to_vec()))
    }

    fn set_string(&self, identifier: &str, value: &str) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::String(value.to_string()))
    }

    fn set_texture(&self, identifier: &str, texture: Option<&ForeignRef<dyn TeTexture>>) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::Texture(texture.cloned()))
    }

    fn set_float_buffer(&self, identifier: &str, buffer: &FloatBufferData) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::FloatBuffer(buffer.clone()))
    }

    fn set_table(&self, identifier: &str, table: &TableData) -> Result<(), TeResult> {
        self.store(identifier, LinkValue::Table(table.clone()))
    }

    fn has_texture_transfer(&self, texture: &ForeignRef<dyn TeTexture>) -> bool {
        lock(&self.pending_transfers).contains_key(&texture.addr())
    }

    fn get_texture_transfer(&self, texture: &ForeignRef<dyn TeTexture>) -> Result<TextureTransfer, TeResult> {
        lock(&self.pending_transfers)
            .remove(&texture.addr())
            .ok_or(TeResult::BadUsage)
    }

    fn add_texture_transfer(&self, texture: &ForeignRef<dyn TeTexture>, transfer: TextureTransfer) -> Result<(), TeResult> {
        self.record(Call::AddTransfer { texture: texture.native_handle(), value: transfer.value });
        Ok(())
    }

    fn requires_keyed_mutex_release_to_zero(&self) -> bool {
        self.release_to_zero.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::provider::PixelFormat;

    fn desc() -> TextureDesc {
        TextureDesc::new(4, 4, PixelFormat::Rgba8)
    }

    #[test]
    fn texture_refs_follow_foreign_refs() {
        let tex = NullTexture::new(TextureKind::Memory, desc());
        let a = tex.foreign_ref();
        let b = a.clone();
        assert_eq!(tex.ref_count(), 2);
        drop((a, b));
        assert_eq!(tex.ref_count(), 0);
    }

    #[test]
    fn finish_on_start_reenters_event_callback() {
        let instance = NullInstance::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        instance.set_callbacks(
            Arc::new(move |ev: InstanceEvent| sink.lock().unwrap().push(ev.result)),
            Arc::new(|_, _| {}),
        );
        instance.finish_frames_on_start(Some(TeResult::Success));

        instance.start_frame_at_time(TeTime::default(), false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![TeResult::Success]);
    }

    #[test]
    fn pending_transfer_is_consumed_on_get() {
        let instance = NullInstance::new();
        let tex = NullTexture::new(TextureKind::D3DShared, desc()).foreign_ref();
        let sem = NullSemaphore::new(SemaphoreKind::Fence).foreign_ref();
        instance.set_pending_transfer(&tex, TextureTransfer { semaphore: sem, value: 7 });

        assert!(instance.has_texture_transfer(&tex));
        assert_eq!(instance.get_texture_transfer(&tex).unwrap().value, 7);
        assert!(!instance.has_texture_transfer(&tex));
    }

    #[test]
    fn set_on_unknown_link_fails() {
        let instance = NullInstance::new();
        assert_eq!(instance.set_bool("missing", true), Err(TeResult::NoMatchingEntity));
    }
}
