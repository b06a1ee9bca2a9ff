//! Null resource provider.
//!
//! Emulates a graphics API in memory. "GPU memory" behind each native
//! handle is a single stamp value, so tests can follow data from a host
//! texture through the engine and back. Every GPU operation is recorded.

use crate::handle::ForeignRef;
use crate::render::provider::{
    ExportedPlatformTexture, HostTexture, ImportedPlatformTexture, LoadInstanceResult, PixelFormat,
    ResourceProvider, TextureDesc,
};
use crate::sdk::null::{NullSemaphore, NullTexture};
use crate::sdk::{NativeHandle, SemaphoreKind, TeTexture, TextureKind, TextureTransfer, TouchInstance};
use crate::task_suspender::lock;
use anyhow::{anyhow, bail, Result};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// Host texture of the null provider.
#[derive(Debug)]
pub struct NullHostTexture {
    pub id: u64,
    desc: TextureDesc,
    stamp: AtomicU64,
}

impl NullHostTexture {
    pub fn new(desc: TextureDesc) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed),
            desc,
            stamp: AtomicU64::new(0),
        })
    }

    /// Writes new "pixels".
    pub fn fill(&self, stamp: u64) {
        self.stamp.store(stamp, Ordering::SeqCst);
    }

    pub fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::SeqCst)
    }
}

impl HostTexture for NullHostTexture {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn desc(&self) -> TextureDesc {
        self.desc
    }
}

/// GPU operations recorded by the null provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuOp {
    CreateShared { handle: NativeHandle },
    CopyToShared { handle: NativeHandle },
    OpenShared { handle: NativeHandle },
    CreateHost { id: u64 },
    Acquire { kind: SemaphoreKind, value: u64 },
    CopyFromShared { handle: NativeHandle, host: u64 },
    ReleaseKeyedMutex { value: u64 },
    SignalFence { value: u64 },
}

#[derive(Debug, Default)]
struct Device {
    memory: Mutex<HashMap<NativeHandle, u64>>,
    ops: Mutex<Vec<GpuOp>>,
    exported: Mutex<Vec<Arc<NullTexture>>>,
    next_handle: AtomicU64,
    fail_copies: AtomicBool,
    configured: AtomicUsize,
}

impl Device {
    fn record(&self, op: GpuOp) {
        lock(&self.ops).push(op);
    }

    fn allocate_handle(&self) -> NativeHandle {
        // High range so engine created handles never collide.
        NativeHandle(0x1000_0000 + self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

fn host(texture: &dyn HostTexture) -> Result<&NullHostTexture> {
    texture
        .as_any()
        .downcast_ref::<NullHostTexture>()
        .ok_or_else(|| anyhow!("null provider used with a foreign host texture"))
}

#[derive(Debug)]
struct NullExportedAllocation {
    desc: TextureDesc,
    kind: TextureKind,
    handle: NativeHandle,
    fence: Option<Arc<NullSemaphore>>,
    fence_value: AtomicU64,
    device: Arc<Device>,
}

impl ExportedPlatformTexture for NullExportedAllocation {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn create_te_texture(&self) -> ForeignRef<dyn TeTexture> {
        let texture = NullTexture::with_handle(self.kind, self.desc, self.handle);
        lock(&self.device.exported).push(texture.clone());
        texture.foreign_ref()
    }

    fn copy_from(&self, source: &dyn HostTexture) -> Result<Option<TextureTransfer>> {
        if self.device.fail_copies.load(Ordering::SeqCst) {
            bail!("device lost");
        }
        let source = host(source)?;
        if source.desc() != self.desc {
            bail!("source {:?} does not fit shared texture {:?}", source.desc(), self.desc);
        }
        lock(&self.device.memory).insert(self.handle, source.stamp());
        self.device.record(GpuOp::CopyToShared { handle: self.handle });

        Ok(self.fence.as_ref().map(|fence| {
            let value = self.fence_value.fetch_add(1, Ordering::SeqCst) + 1;
            self.device.record(GpuOp::SignalFence { value });
            TextureTransfer { semaphore: fence.foreign_ref(), value }
        }))
    }
}

#[derive(Debug)]
struct NullImportedTexture {
    desc: TextureDesc,
    handle: NativeHandle,
    release_fence: Arc<NullSemaphore>,
    device: Arc<Device>,
}

impl ImportedPlatformTexture for NullImportedTexture {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn acquire(&self, transfer: &TextureTransfer) -> Result<()> {
        self.device.record(GpuOp::Acquire { kind: transfer.semaphore.kind(), value: transfer.value });
        Ok(())
    }

    fn copy_into(&self, target: &dyn HostTexture) -> Result<()> {
        if self.device.fail_copies.load(Ordering::SeqCst) {
            bail!("device lost");
        }
        let target = host(target)?;
        if !self.can_copy_into(target) {
            bail!("target {:?} does not match {:?}", target.desc(), self.desc);
        }
        let stamp = lock(&self.device.memory).get(&self.handle).copied().unwrap_or(0);
        target.fill(stamp);
        self.device.record(GpuOp::CopyFromShared { handle: self.handle, host: target.id });
        Ok(())
    }

    fn release(&self, transfer: &TextureTransfer, release_to_zero: bool) -> Result<Option<TextureTransfer>> {
        match transfer.semaphore.kind() {
            SemaphoreKind::KeyedMutex => {
                let value = if release_to_zero { 0 } else { transfer.value };
                self.device.record(GpuOp::ReleaseKeyedMutex { value });
                Ok(None)
            }
            SemaphoreKind::Fence => {
                let value = transfer.value + 1;
                self.device.record(GpuOp::SignalFence { value });
                Ok(Some(TextureTransfer { semaphore: self.release_fence.foreign_ref(), value }))
            }
        }
    }
}

/// In-memory [`ResourceProvider`].
#[derive(Debug)]
pub struct NullProvider {
    kind: TextureKind,
    formats: Vec<PixelFormat>,
    device: Arc<Device>,
    validation_failure: Mutex<Option<String>>,
}

impl Default for NullProvider {
    fn default() -> Self {
        Self::with_kind(TextureKind::Memory)
    }
}

impl NullProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `D3DShared` and `Vulkan` emulate fence based sharing, `D3D11` keyed mutexes.
    pub fn with_kind(kind: TextureKind) -> Self {
        Self {
            kind,
            formats: vec![
                PixelFormat::R8,
                PixelFormat::Rg8,
                PixelFormat::Rgba8,
                PixelFormat::Bgra8,
                PixelFormat::R16F,
                PixelFormat::Rgba16F,
                PixelFormat::R32F,
                PixelFormat::Rgba32F,
            ],
            device: Arc::new(Device::default()),
            validation_failure: Mutex::new(None),
        }
    }

    pub fn ops(&self) -> Vec<GpuOp> {
        lock(&self.device.ops).clone()
    }

    pub fn count_ops(&self, pred: impl Fn(&GpuOp) -> bool) -> usize {
        lock(&self.device.ops).iter().filter(|op| pred(op)).count()
    }

    pub fn exported_te_textures(&self) -> Vec<Arc<NullTexture>> {
        lock(&self.device.exported).clone()
    }

    pub fn last_exported_te_texture(&self) -> Option<Arc<NullTexture>> {
        lock(&self.device.exported).last().cloned()
    }

    /// Writes `stamp` into the shared memory behind `handle`, as the engine would.
    pub fn write_shared(&self, handle: NativeHandle, stamp: u64) {
        lock(&self.device.memory).insert(handle, stamp);
    }

    pub fn read_shared(&self, handle: NativeHandle) -> Option<u64> {
        lock(&self.device.memory).get(&handle).copied()
    }

    pub fn fail_copies(&self, on: bool) {
        self.device.fail_copies.store(on, Ordering::SeqCst);
    }

    pub fn fail_validation(&self, message: Option<&str>) {
        *lock(&self.validation_failure) = message.map(str::to_string);
    }

    pub fn configured_count(&self) -> usize {
        self.device.configured.load(Ordering::SeqCst)
    }

    fn uses_fences(&self) -> bool {
        matches!(self.kind, TextureKind::D3DShared | TextureKind::Vulkan)
    }
}

impl ResourceProvider for NullProvider {
    fn name(&self) -> &str {
        "NullProvider"
    }

    fn texture_kind(&self) -> TextureKind {
        self.kind
    }

    fn configure_instance(&self, _instance: &dyn TouchInstance) -> Result<()> {
        self.device.configured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn validate_loaded_instance(&self, _instance: &dyn TouchInstance) -> LoadInstanceResult {
        match lock(&self.validation_failure).clone() {
            Some(message) => LoadInstanceResult::Failure(message),
            None => LoadInstanceResult::Success,
        }
    }

    fn exportable_pixel_formats(&self) -> Vec<PixelFormat> {
        self.formats.clone()
    }

    fn supports_host_texture(&self, texture: &dyn HostTexture) -> bool {
        texture.as_any().is::<NullHostTexture>()
    }

    fn create_exported_texture(&self, desc: TextureDesc) -> Result<Box<dyn ExportedPlatformTexture>> {
        let handle = self.device.allocate_handle();
        self.device.record(GpuOp::CreateShared { handle });
        Ok(Box::new(NullExportedAllocation {
            desc,
            kind: self.kind,
            handle,
            fence: self.uses_fences().then(|| NullSemaphore::new(SemaphoreKind::Fence)),
            fence_value: AtomicU64::new(0),
            device: self.device.clone(),
        }))
    }

    fn open_shared_texture(&self, texture: &ForeignRef<dyn TeTexture>) -> Result<Arc<dyn ImportedPlatformTexture>> {
        if texture.kind() != self.kind {
            bail!("cannot open {:?} texture on a {:?} device", texture.kind(), self.kind);
        }
        let handle = texture.native_handle();
        self.device.record(GpuOp::OpenShared { handle });
        Ok(Arc::new(NullImportedTexture {
            desc: texture.desc(),
            handle,
            release_fence: NullSemaphore::new(SemaphoreKind::Fence),
            device: self.device.clone(),
        }))
    }

    fn create_host_texture(&self, desc: TextureDesc) -> Result<Arc<dyn HostTexture>> {
        let texture = NullHostTexture::new(desc);
        self.device.record(GpuOp::CreateHost { id: texture.id });
        Ok(texture)
    }
}
