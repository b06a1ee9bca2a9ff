//! Host side bridge to an external real-time engine.
//!
//! A host loads an engine instance through [`TouchEngine`], feeds it input
//! values and textures, cooks frames one at a time and reads back outputs.
//! Texture outputs are copied into host textures on a dedicated render
//! thread before the frame that produced them is reported as finalized.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use touch_engine::{EngineConfig, TouchEngine, CookFrameRequest};
//! # use touch_engine::render::ResourceProvider;
//! # use touch_engine::sdk::TouchInstance;
//! # async fn run(provider: Arc<dyn ResourceProvider>, instance: Arc<dyn TouchInstance>) -> Result<(), touch_engine::EngineError> {
//! let engine = TouchEngine::new(EngineConfig::default(), provider, tokio::runtime::Handle::current())?;
//! engine.load(instance, "scene.tox")?;
//! let cook = engine.cook_frame(CookFrameRequest::at(0, 60_000));
//! let finalized = engine.on_frame_finalized(cook.frame_id());
//! let _result = cook.await;
//! let _frame = finalized.await;
//! engine.unload().await
//! # }
//! ```

pub mod config;
pub mod cook;
pub mod engine;
pub mod error_log;
pub mod errors;
pub mod events;
pub mod handle;
pub mod render;
pub mod sdk;
pub mod task_suspender;
pub mod variables;

pub use config::{EngineConfig, EngineConfigBuilder, TimeMode};
pub use cook::{CookFrameRequest, CookFrameResult, FinalizedFrame, InputValue};
pub use engine::{InstanceId, TouchEngine};
pub use errors::{CookError, EngineError, ExportError, FinalizationError, ImportError, VariableError};
pub use events::TouchEvent;
