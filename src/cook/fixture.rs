//! Everything needed to cook against a scripted instance.

use super::{FrameCooker, FrameFinalizer};
use crate::config::TimeMode;
use crate::error_log::ErrorLog;
use crate::render::exporting::TextureExporter;
use crate::render::importing::TextureImporter;
use crate::render::providers::null::NullProvider;
use crate::render::RenderQueue;
use crate::sdk::null::NullInstance;
use crate::sdk::{EventKind, InstanceSlot, TouchInstance};
use crate::variables::VariableManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub(crate) struct Pipeline {
    pub instance: Arc<NullInstance>,
    pub slot: InstanceSlot,
    pub provider: Arc<NullProvider>,
    pub queue: Arc<RenderQueue>,
    pub error_log: Arc<ErrorLog>,
    pub variables: Arc<VariableManager>,
    pub finalizer: Arc<FrameFinalizer>,
    pub cooker: Arc<FrameCooker>,
}

/// Builds a pipeline whose instance reports finished frames straight to the cooker.
/// Must run inside a tokio runtime.
pub(crate) fn pipeline(time_mode: TimeMode) -> Pipeline {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = Handle::current();
    let instance = NullInstance::new();
    let slot = InstanceSlot::new(instance.clone());
    let provider = Arc::new(NullProvider::new());
    let queue = Arc::new(RenderQueue::new("cook-test").unwrap());
    let exporter = Arc::new(TextureExporter::new(provider.clone(), queue.clone(), runtime.clone()));
    let importer = Arc::new(TextureImporter::new(provider.clone(), queue.clone()));
    let error_log = Arc::new(ErrorLog::new());
    let variables = Arc::new(VariableManager::new(slot.clone(), exporter, error_log.clone(), runtime.clone()));
    let finalizer = FrameFinalizer::new(slot.clone(), importer, variables.clone(), runtime.clone());
    let cooker = FrameCooker::new(slot.clone(), time_mode, variables.clone(), finalizer.clone(), runtime);

    let weak = Arc::downgrade(&cooker);
    instance.set_callbacks(
        Arc::new(move |event| {
            if event.kind == EventKind::FrameDidFinish {
                if let Some(cooker) = weak.upgrade() {
                    cooker.on_frame_finished(event);
                }
            }
        }),
        Arc::new(|_, _| {}),
    );

    Pipeline { instance, slot, provider, queue, error_log, variables, finalizer, cooker }
}

/// Polls `condition` until it holds, failing after one second.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
