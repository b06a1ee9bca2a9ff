//! The host facing engine.
//!
//! [`TouchEngine`] owns one engine instance at a time together with the
//! pipeline built around it: cooker, finalizer, variable manager, texture
//! exporter and importer, and the event dispatcher.
//!
//! # Shutdown
//!
//! [`TouchEngine::unload`] first clears the shared instance handle so no new
//! work can reach the engine, then cancels both cook slots, then drains the
//! exporter and importer. Only after that is the instance unloaded.

use crate::config::EngineConfig;
use crate::cook::{CookFrameRequest, CookFuture, FinalizeResult, FrameCooker, FrameFinalizer};
use crate::error_log::{Diagnostic, ErrorLog};
use crate::errors::{EngineError, FinalizationError};
use crate::events::{self, Dispatcher, TouchEvent, EVENT_CHANNEL_CAPACITY};
use crate::render::exporting::TextureExporter;
use crate::render::importing::TextureImporter;
use crate::render::provider::LoadInstanceResult;
use crate::render::{RenderQueue, ResourceProvider};
use crate::sdk::{InstanceSlot, TouchInstance};
use crate::task_suspender::lock;
use crate::variables::VariableManager;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identifies one successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that lives exactly as long as one loaded instance.
struct Loaded {
    id: InstanceId,
    instance: Arc<dyn TouchInstance>,
    cooker: Arc<FrameCooker>,
    finalizer: Arc<FrameFinalizer>,
    variables: Arc<VariableManager>,
    exporter: Arc<TextureExporter>,
    importer: Arc<TextureImporter>,
    dispatcher: JoinHandle<()>,
}

pub struct TouchEngine {
    config: EngineConfig,
    provider: Arc<dyn ResourceProvider>,
    render_queue: Arc<RenderQueue>,
    runtime: Handle,
    slot: InstanceSlot,
    error_log: Arc<ErrorLog>,
    events: broadcast::Sender<TouchEvent>,
    loaded: Mutex<Option<Loaded>>,
}

impl fmt::Debug for TouchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TouchEngine")
            .field("provider", &self.provider.name())
            .field("instance", &self.instance_id())
            .finish_non_exhaustive()
    }
}

impl TouchEngine {
    /// Creates an engine with nothing loaded. Async work runs on `runtime`.
    pub fn new(config: EngineConfig, provider: Arc<dyn ResourceProvider>, runtime: Handle) -> Result<Self, EngineError> {
        crate::config::validate(&config)?;
        config.init_logging();
        let render_queue = Arc::new(RenderQueue::new(&config.render_thread_name)?);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            provider,
            render_queue,
            runtime,
            slot: InstanceSlot::default(),
            error_log: Arc::new(ErrorLog::new()),
            events,
            loaded: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TouchEvent> {
        self.events.subscribe()
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        lock(&self.loaded).as_ref().map(|l| l.id)
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.is_live()
    }

    /// Configures `instance`, loads `path` into it and wires up the pipeline.
    pub fn load(&self, instance: Arc<dyn TouchInstance>, path: &str) -> Result<InstanceId, EngineError> {
        let mut loaded = lock(&self.loaded);
        if loaded.is_some() {
            return Err(EngineError::AlreadyLoaded);
        }

        instance
            .configure(self.config.time_mode, self.config.frame_rate, self.config.input_buffer_limit)
            .map_err(EngineError::Sdk)?;
        self.provider
            .configure_instance(&*instance)
            .map_err(|e| EngineError::LoadFailed(e.to_string()))?;

        let exporter = Arc::new(TextureExporter::new(
            self.provider.clone(),
            self.render_queue.clone(),
            self.runtime.clone(),
        ));
        let importer = Arc::new(TextureImporter::new(self.provider.clone(), self.render_queue.clone()));
        let variables = Arc::new(VariableManager::new(
            self.slot.clone(),
            exporter.clone(),
            self.error_log.clone(),
            self.runtime.clone(),
        ));
        let finalizer = FrameFinalizer::new(self.slot.clone(), importer.clone(), variables.clone(), self.runtime.clone());
        let cooker = FrameCooker::new(
            self.slot.clone(),
            self.config.time_mode,
            variables.clone(),
            finalizer.clone(),
            self.runtime.clone(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (on_event, on_link) = events::callbacks(tx);
        instance.set_callbacks(on_event, on_link);
        let dispatcher = Dispatcher {
            instance: self.slot.clone(),
            cooker: cooker.clone(),
            finalizer: finalizer.clone(),
            variables: variables.clone(),
            import_texture_outputs: self.config.import_texture_outputs,
            events: self.events.clone(),
        }
        .spawn(rx, &self.runtime);

        let failed = |error: EngineError| {
            dispatcher.abort();
            error
        };
        instance.load(path).map_err(|r| failed(EngineError::Sdk(r)))?;
        if let LoadInstanceResult::Failure(message) = self.provider.validate_loaded_instance(&*instance) {
            log::error!("{} rejected '{path}': {message}", self.provider.name());
            if let Err(result) = instance.unload() {
                log::warn!("unloading the rejected instance failed: {result:?}");
            }
            return Err(failed(EngineError::LoadFailed(message)));
        }

        let id = InstanceId::new();
        self.slot.set(instance.clone());
        *loaded = Some(Loaded { id, instance, cooker, finalizer, variables, exporter, importer, dispatcher });
        log::info!("loaded '{path}' as {id}");
        Ok(id)
    }

    /// Tears the pipeline down and unloads the instance.
    pub async fn unload(&self) -> Result<(), EngineError> {
        let loaded = lock(&self.loaded).take().ok_or(EngineError::NotLoaded)?;

        self.slot.clear();
        loaded.cooker.cancel_current_and_next();
        let exports = loaded.exporter.suspend_async_tasks();
        let imports = loaded.importer.suspend_async_tasks();
        futures::join!(exports, imports);

        loaded.variables.clear_saved_data();
        let result = loaded.instance.unload().map_err(EngineError::Sdk);
        loaded.dispatcher.abort();
        log::info!("unloaded {}", loaded.id);
        result
    }

    fn with_loaded<R>(&self, f: impl FnOnce(&Loaded) -> R) -> Option<R> {
        lock(&self.loaded).as_ref().map(f)
    }

    /// A request advancing the clock by `delta`, in ticks of the configured frame rate.
    pub fn frame_request(&self, delta: Duration) -> CookFrameRequest {
        let scale = self.config.time_scale();
        CookFrameRequest::at((delta.as_secs_f64() * scale as f64).round() as i64, scale)
    }

    /// Queues a cook. Resolves with `BadRequest` when nothing is loaded.
    pub fn cook_frame(&self, request: CookFrameRequest) -> CookFuture {
        self.with_loaded(|l| l.cooker.cook_frame(request))
            .unwrap_or_else(CookFuture::rejected)
    }

    pub fn on_frame_finalized(&self, frame_id: u64) -> BoxFuture<'static, FinalizeResult> {
        self.with_loaded(|l| l.finalizer.on_frame_finalized(frame_id))
            .unwrap_or_else(|| futures::future::ready(Err(FinalizationError::NotStarted(frame_id))).boxed())
    }

    pub fn cancel_frame(&self, frame_id: u64) -> bool {
        self.with_loaded(|l| l.cooker.cancel_current_frame(frame_id)).unwrap_or(false)
    }

    /// Times out the cook in flight once it exceeds the configured cook timeout.
    pub fn check_if_cook_timed_out(&self) -> bool {
        let timeout = self.config.cook_timeout;
        self.with_loaded(|l| l.cooker.check_if_cook_timed_out(timeout)).unwrap_or(false)
    }

    /// Last frame whose outputs the engine updated.
    pub fn frame_last_updated(&self) -> Option<u64> {
        self.with_loaded(|l| l.cooker.frame_last_updated()).flatten()
    }

    /// Typed access to the loaded instance's links.
    pub fn variables(&self) -> Result<Arc<VariableManager>, EngineError> {
        self.with_loaded(|l| l.variables.clone()).ok_or(EngineError::NotLoaded)
    }

    /// Stops new exports and imports and waits for running ones.
    pub fn suspend_async_tasks(&self) -> BoxFuture<'static, ()> {
        let Some((exporter, importer)) = self.with_loaded(|l| (l.exporter.clone(), l.importer.clone())) else {
            return futures::future::ready(()).boxed();
        };
        async move {
            futures::join!(exporter.suspend_async_tasks(), importer.suspend_async_tasks());
        }
        .boxed()
    }

    /// Flushes diagnostics collected since the last call.
    pub fn output_messages(&self) -> Vec<Diagnostic> {
        self.error_log.output_messages()
    }
}
