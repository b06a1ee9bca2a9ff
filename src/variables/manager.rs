use super::TextureUpdates;
use crate::cook::InputValue;
use crate::error_log::{DiagnosticKind, ErrorLog};
use crate::errors::{ExportError, VariableError};
use crate::handle::ForeignRef;
use crate::render::exporting::{ExportRequest, TextureExporter};
use crate::render::HostTexture;
use crate::sdk::{
    FloatBufferData, InstanceSlot, LinkInfo, LinkInterest, LinkScope, LinkType, TableData, TeResult, TeTable,
    TouchInstance,
};
use crate::task_suspender::lock;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

#[derive(Default)]
struct Outputs {
    /// `None` while an import is allocated but has not landed yet.
    textures: HashMap<String, Option<Arc<dyn HostTexture>>>,
    /// Last float buffer read per link, returned while the engine has none.
    float_buffers: HashMap<String, FloatBufferData>,
    frame_last_updated: HashMap<String, u64>,
}

/// Validated get/set of engine links.
pub struct VariableManager {
    instance: InstanceSlot,
    exporter: Arc<TextureExporter>,
    error_log: Arc<ErrorLog>,
    texture_updates: Arc<TextureUpdates>,
    runtime: Handle,
    outputs: Mutex<Outputs>,
}

impl std::fmt::Debug for VariableManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableManager")
            .field("texture_outputs", &lock(&self.outputs).textures.len())
            .field("texture_updates_in_progress", &self.texture_updates.in_progress())
            .finish_non_exhaustive()
    }
}

impl VariableManager {
    pub fn new(instance: InstanceSlot, exporter: Arc<TextureExporter>, error_log: Arc<ErrorLog>, runtime: Handle) -> Self {
        Self {
            instance,
            exporter,
            error_log,
            texture_updates: TextureUpdates::new(),
            runtime,
            outputs: Mutex::new(Outputs::default()),
        }
    }

    pub fn texture_updates(&self) -> &Arc<TextureUpdates> {
        &self.texture_updates
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    // ---------- Lookup ----------

    /// Fetches the live link info and checks it against what the caller expects.
    fn link(
        &self,
        call_site: &'static str,
        identifier: &str,
        scope: LinkScope,
        types: &[LinkType],
        expected: &'static str,
    ) -> Result<(Arc<dyn TouchInstance>, LinkInfo), VariableError> {
        let instance = self.instance.get().ok_or(VariableError::NotLoaded)?;
        let info = instance.link_info(identifier).map_err(|result| {
            if result == TeResult::NoMatchingEntity {
                self.error_log.not_found(call_site, identifier);
                VariableError::NotFound(identifier.to_string())
            } else {
                self.error_log.add_result(call_site, identifier, DiagnosticKind::LinkGetInfoError, result);
                VariableError::Engine { name: identifier.to_string(), result }
            }
        })?;

        if info.scope != scope {
            self.error_log.scope_mismatch(call_site, identifier, scope);
            return Err(VariableError::ScopeMismatch { name: identifier.to_string(), expected: scope.as_str() });
        }
        if !types.contains(&info.link_type) {
            self.error_log.type_mismatch(call_site, identifier, expected);
            return Err(VariableError::TypeMismatch { name: identifier.to_string(), expected });
        }
        Ok((instance, info))
    }

    fn engine_error(&self, call_site: &'static str, identifier: &str, kind: DiagnosticKind, result: TeResult) -> VariableError {
        self.error_log.add_result(call_site, identifier, kind, result);
        VariableError::Engine { name: identifier.to_string(), result }
    }

    /// Truncates to the declared count. Fewer values than declared is an error.
    fn fit_count<'a, T>(
        &self,
        call_site: &'static str,
        identifier: &str,
        info: &LinkInfo,
        values: &'a [T],
    ) -> Result<&'a [T], VariableError> {
        if values.len() < info.count {
            self.error_log.count_mismatch(call_site, identifier, info.count, values.len());
            return Err(VariableError::CountMismatch {
                name: identifier.to_string(),
                expected: info.count,
                actual: values.len(),
            });
        }
        if values.len() > info.count {
            self.error_log.count_mismatch(call_site, identifier, info.count, values.len());
        }
        Ok(&values[..info.count])
    }

    // ---------- Outputs ----------

    pub fn get_bool(&self, identifier: &str) -> Result<bool, VariableError> {
        let (instance, _) = self.link("get_bool", identifier, LinkScope::Output, &[LinkType::Boolean], "boolean")?;
        instance
            .get_bool(identifier)
            .map_err(|r| self.engine_error("get_bool", identifier, DiagnosticKind::LinkGetValueError, r))
    }

    pub fn get_doubles(&self, identifier: &str) -> Result<Vec<f64>, VariableError> {
        let (instance, info) = self.link("get_doubles", identifier, LinkScope::Output, &[LinkType::Double], "double")?;
        instance
            .get_doubles(identifier, info.count)
            .map_err(|r| self.engine_error("get_doubles", identifier, DiagnosticKind::LinkGetValueError, r))
    }

    /// First value of a double link.
    pub fn get_double(&self, identifier: &str) -> Result<f64, VariableError> {
        let values = self.get_doubles(identifier)?;
        values.first().copied().ok_or(VariableError::CountMismatch {
            name: identifier.to_string(),
            expected: 1,
            actual: 0,
        })
    }

    pub fn get_ints(&self, identifier: &str) -> Result<Vec<i32>, VariableError> {
        let (instance, info) = self.link("get_ints", identifier, LinkScope::Output, &[LinkType::Int], "integer")?;
        instance
            .get_ints(identifier, info.count)
            .map_err(|r| self.engine_error("get_ints", identifier, DiagnosticKind::LinkGetValueError, r))
    }

    pub fn get_int(&self, identifier: &str) -> Result<i32, VariableError> {
        let values = self.get_ints(identifier)?;
        values.first().copied().ok_or(VariableError::CountMismatch {
            name: identifier.to_string(),
            expected: 1,
            actual: 0,
        })
    }

    /// Reads a string link, or the first cell of a table link.
    pub fn get_string(&self, identifier: &str) -> Result<String, VariableError> {
        let (instance, info) = self.link(
            "get_string",
            identifier,
            LinkScope::Output,
            &[LinkType::String, LinkType::StringData],
            "string",
        )?;
        let map_err = |r| self.engine_error("get_string", identifier, DiagnosticKind::LinkGetValueError, r);
        match info.link_type {
            LinkType::StringData => {
                let table = instance.get_table(identifier).map_err(map_err)?;
                Ok(table.and_then(|t| t.cell(0, 0)).unwrap_or_default())
            }
            _ => instance.get_string(identifier).map_err(map_err),
        }
    }

    /// The engine's table object. The reference is released when dropped.
    pub fn get_table(&self, identifier: &str) -> Result<Option<ForeignRef<dyn TeTable>>, VariableError> {
        let (instance, _) = self.link("get_table", identifier, LinkScope::Output, &[LinkType::StringData], "table")?;
        instance
            .get_table(identifier)
            .map_err(|r| self.engine_error("get_table", identifier, DiagnosticKind::LinkGetValueError, r))
    }

    /// Copy of the table, row major.
    pub fn get_table_data(&self, identifier: &str) -> Result<TableData, VariableError> {
        let Some(table) = self.get_table(identifier)? else {
            return Ok(TableData::default());
        };
        let rows = (0..table.rows())
            .map(|row| (0..table.columns()).map(|col| table.cell(row, col).unwrap_or_default()).collect())
            .collect();
        Ok(TableData { rows })
    }

    /// All channels and samples. Falls back to the last buffer read while
    /// the engine has none.
    pub fn get_float_buffer(&self, identifier: &str) -> Result<FloatBufferData, VariableError> {
        let (instance, _) =
            self.link("get_float_buffer", identifier, LinkScope::Output, &[LinkType::FloatBuffer], "float buffer")?;
        let buffer = instance
            .get_float_buffer(identifier)
            .map_err(|r| self.engine_error("get_float_buffer", identifier, DiagnosticKind::LinkGetValueError, r))?;

        let mut outputs = lock(&self.outputs);
        match buffer {
            Some(buffer) => {
                let data = FloatBufferData {
                    channel_names: buffer.channel_names(),
                    values: buffer.values(),
                    sample_rate: buffer.sample_rate(),
                };
                outputs.float_buffers.insert(identifier.to_string(), data.clone());
                Ok(data)
            }
            None => Ok(outputs.float_buffers.get(identifier).cloned().unwrap_or_default()),
        }
    }

    /// Latest sample of every channel.
    pub fn get_float_buffer_sample(&self, identifier: &str) -> Result<FloatBufferData, VariableError> {
        let mut data = self.get_float_buffer(identifier)?;
        data.values = data
            .values
            .into_iter()
            .map(|channel| channel.last().copied().into_iter().collect())
            .collect();
        Ok(data)
    }

    pub fn get_float_buffer_channel_names(&self, identifier: &str) -> Result<Vec<String>, VariableError> {
        Ok(self.get_float_buffer(identifier)?.channel_names)
    }

    /// Most recently imported texture. `None` until the first import lands.
    pub fn get_texture(&self, identifier: &str) -> Result<Option<Arc<dyn HostTexture>>, VariableError> {
        if let Some(texture) = lock(&self.outputs).textures.get(identifier) {
            return Ok(texture.clone());
        }
        self.link("get_texture", identifier, LinkScope::Output, &[LinkType::Texture], "texture")?;
        Ok(None)
    }

    // ---------- Inputs ----------

    pub fn set_bool(&self, identifier: &str, value: bool) -> Result<(), VariableError> {
        let (instance, _) = self.link("set_bool", identifier, LinkScope::Input, &[LinkType::Boolean], "boolean")?;
        instance
            .set_bool(identifier, value)
            .map_err(|r| self.engine_error("set_bool", identifier, DiagnosticKind::LinkSetValueError, r))
    }

    pub fn set_doubles(&self, identifier: &str, values: &[f64]) -> Result<(), VariableError> {
        let (instance, info) = self.link("set_doubles", identifier, LinkScope::Input, &[LinkType::Double], "double")?;
        let values = self.fit_count("set_doubles", identifier, &info, values)?;
        instance
            .set_doubles(identifier, values)
            .map_err(|r| self.engine_error("set_doubles", identifier, DiagnosticKind::LinkSetValueError, r))
    }

    pub fn set_double(&self, identifier: &str, value: f64) -> Result<(), VariableError> {
        self.set_doubles(identifier, &[value])
    }

    pub fn set_ints(&self, identifier: &str, values: &[i32]) -> Result<(), VariableError> {
        let (instance, info) = self.link("set_ints", identifier, LinkScope::Input, &[LinkType::Int], "integer")?;
        let values = self.fit_count("set_ints", identifier, &info, values)?;
        instance
            .set_ints(identifier, values)
            .map_err(|r| self.engine_error("set_ints", identifier, DiagnosticKind::LinkSetValueError, r))
    }

    pub fn set_int(&self, identifier: &str, value: i32) -> Result<(), VariableError> {
        self.set_ints(identifier, &[value])
    }

    /// Sets a string link, or a 1x1 table when the link holds table data.
    pub fn set_string(&self, identifier: &str, value: &str) -> Result<(), VariableError> {
        let (instance, info) = self.link(
            "set_string",
            identifier,
            LinkScope::Input,
            &[LinkType::String, LinkType::StringData],
            "string",
        )?;
        let set = match info.link_type {
            LinkType::StringData => instance.set_table(identifier, &TableData::single(value)),
            _ => instance.set_string(identifier, value),
        };
        set.map_err(|r| self.engine_error("set_string", identifier, DiagnosticKind::LinkSetValueError, r))
    }

    pub fn set_table(&self, identifier: &str, table: &TableData) -> Result<(), VariableError> {
        let (instance, _) = self.link("set_table", identifier, LinkScope::Input, &[LinkType::StringData], "table")?;
        instance
            .set_table(identifier, table)
            .map_err(|r| self.engine_error("set_table", identifier, DiagnosticKind::LinkSetValueError, r))
    }

    /// Channels beyond the link's count are dropped.
    pub fn set_float_buffer(&self, identifier: &str, buffer: &FloatBufferData) -> Result<(), VariableError> {
        let (instance, info) =
            self.link("set_float_buffer", identifier, LinkScope::Input, &[LinkType::FloatBuffer], "float buffer")?;
        let channels = self.fit_count("set_float_buffer", identifier, &info, &buffer.values)?;
        let truncated;
        let buffer = if channels.len() < buffer.values.len() {
            truncated = FloatBufferData {
                channel_names: buffer.channel_names.iter().take(channels.len()).cloned().collect(),
                values: channels.to_vec(),
                sample_rate: buffer.sample_rate,
            };
            &truncated
        } else {
            buffer
        };
        instance
            .set_float_buffer(identifier, buffer)
            .map_err(|r| self.engine_error("set_float_buffer", identifier, DiagnosticKind::LinkSetValueError, r))
    }

    /// One sample per channel.
    pub fn set_float_buffer_sample(
        &self,
        identifier: &str,
        channel_names: &[&str],
        values: &[f32],
    ) -> Result<(), VariableError> {
        if channel_names.len() != values.len() {
            return Err(VariableError::CountMismatch {
                name: identifier.to_string(),
                expected: channel_names.len(),
                actual: values.len(),
            });
        }
        let buffer = FloatBufferData {
            channel_names: channel_names.iter().map(|n| n.to_string()).collect(),
            values: values.iter().map(|v| vec![*v]).collect(),
            sample_rate: 0.0,
        };
        self.set_float_buffer(identifier, &buffer)
    }

    /// Writes one value carried by a cook request.
    pub fn apply_input(&self, identifier: &str, value: &InputValue) -> Result<(), VariableError> {
        match value {
            InputValue::Bool(v) => self.set_bool(identifier, *v),
            InputValue::Doubles(v) => self.set_doubles(identifier, v),
            InputValue::Ints(v) => self.set_ints(identifier, v),
            InputValue::String(v) => self.set_string(identifier, v),
            InputValue::Table(v) => self.set_table(identifier, v),
            InputValue::FloatBuffer(v) => self.set_float_buffer(identifier, v),
        }
    }

    /// Exports `texture` and hands it to the engine. `None` clears the input.
    ///
    /// Counts as a texture update until the engine has the texture, so cooks
    /// requested after this call wait for it.
    pub fn set_texture(
        &self,
        identifier: &str,
        texture: Option<Arc<dyn HostTexture>>,
        reuse_existing: bool,
    ) -> BoxFuture<'static, Result<(), VariableError>> {
        let (instance, _) = match self.link("set_texture", identifier, LinkScope::Input, &[LinkType::Texture], "texture")
        {
            Ok(found) => found,
            Err(e) => return futures::future::ready(Err(e)).boxed(),
        };

        let update = self.texture_updates.begin();
        let name = identifier.to_string();
        let export = self.exporter.export_texture(
            instance.clone(),
            ExportRequest { parameter: name.clone(), texture, reuse_existing },
        );
        let error_log = self.error_log.clone();

        let task = self.runtime.spawn(async move {
            let _update = update;
            let exported = match export.await {
                Ok(exported) => exported,
                Err(source) => {
                    error_log.export_failed("set_texture", &name, &source);
                    return Err(VariableError::Export { name, source });
                }
            };
            if let Err(result) = instance.set_texture(&name, exported.as_ref()) {
                error_log.add_result("set_texture", &name, DiagnosticKind::LinkSetValueError, result);
                return Err(VariableError::Engine { name, result });
            }
            // Inputs are never read back.
            if let Err(result) = instance.set_link_interest(&name, LinkInterest::NoValues) {
                log::debug!("could not drop interest in '{name}': {result:?}");
            }
            Ok(())
        });

        let name = identifier.to_string();
        async move {
            task.await
                .unwrap_or_else(|_| Err(VariableError::Export { name, source: ExportError::Cancelled }))
        }
        .boxed()
    }

    // ---------- Imported texture outputs ----------

    /// Registers an import in flight so reads of `identifier` do not fail meanwhile.
    pub fn allocate_linked_output(&self, identifier: &str) {
        lock(&self.outputs).textures.entry(identifier.to_string()).or_insert(None);
    }

    pub fn update_linked_output(&self, identifier: &str, texture: Arc<dyn HostTexture>, frame_id: u64) {
        let mut outputs = lock(&self.outputs);
        outputs.textures.insert(identifier.to_string(), Some(texture));
        outputs.frame_last_updated.insert(identifier.to_string(), frame_id);
    }

    pub fn linked_output(&self, identifier: &str) -> Option<Arc<dyn HostTexture>> {
        lock(&self.outputs).textures.get(identifier).cloned().flatten()
    }

    /// Records that the engine changed `identifier` while cooking `frame_id`.
    pub fn mark_output_updated(&self, identifier: &str, frame_id: u64) {
        lock(&self.outputs).frame_last_updated.insert(identifier.to_string(), frame_id);
    }

    pub fn frame_last_updated(&self, identifier: &str) -> Option<u64> {
        lock(&self.outputs).frame_last_updated.get(identifier).copied()
    }

    /// Forgets imported textures, cached buffers and update bookkeeping.
    pub fn clear_saved_data(&self) {
        let mut outputs = lock(&self.outputs);
        outputs.textures.clear();
        outputs.float_buffers.clear();
        outputs.frame_last_updated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeMode;
    use crate::cook::fixture::pipeline;
    use crate::render::providers::null::NullHostTexture;
    use crate::render::{PixelFormat, TextureDesc};
    use crate::sdk::null::{Call, LinkValue};

    #[tokio::test]
    async fn type_mismatch_leaves_value_and_reports_once() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/count", LinkScope::Input, LinkType::Int, 1, LinkValue::Ints(vec![5]));

        for _ in 0..3 {
            let err = p.variables.set_bool("op/count", true).unwrap_err();
            assert_eq!(err, VariableError::TypeMismatch { name: "op/count".into(), expected: "boolean" });
        }

        assert!(matches!(p.instance.value("op/count"), Some(LinkValue::Ints(v)) if v == vec![5]));
        assert_eq!(p.instance.count_calls(|c| matches!(c, Call::SetValue(_))), 0);
        assert_eq!(p.error_log.pending(), 1);
    }

    #[tokio::test]
    async fn scope_and_existence_are_checked() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/out", LinkScope::Output, LinkType::Boolean, 1, LinkValue::Bool(false));

        assert!(matches!(p.variables.set_bool("op/out", true), Err(VariableError::ScopeMismatch { .. })));
        assert_eq!(p.variables.get_bool("op/missing"), Err(VariableError::NotFound("op/missing".into())));
        assert!(!p.variables.get_bool("op/out").unwrap());
    }

    #[tokio::test]
    async fn extra_values_are_truncated_and_missing_ones_rejected() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/xyz", LinkScope::Input, LinkType::Double, 3, LinkValue::Doubles(vec![0.0; 3]));

        p.variables.set_doubles("op/xyz", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(matches!(p.instance.value("op/xyz"), Some(LinkValue::Doubles(v)) if v == vec![1.0, 2.0, 3.0]));

        let err = p.variables.set_doubles("op/xyz", &[9.0]).unwrap_err();
        assert_eq!(err, VariableError::CountMismatch { name: "op/xyz".into(), expected: 3, actual: 1 });
        assert!(matches!(p.instance.value("op/xyz"), Some(LinkValue::Doubles(v)) if v == vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn strings_go_into_single_cell_tables() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/dat", LinkScope::Input, LinkType::StringData, 1, LinkValue::Empty);
        p.instance.add_link("op/dat_out", LinkScope::Output, LinkType::StringData, 1, LinkValue::Table(TableData::single("hi")));

        p.variables.set_string("op/dat", "hello").unwrap();
        assert!(matches!(p.instance.value("op/dat"), Some(LinkValue::Table(t)) if t == TableData::single("hello")));
        assert_eq!(p.variables.get_string("op/dat_out").unwrap(), "hi");
        assert_eq!(p.variables.get_table_data("op/dat_out").unwrap(), TableData::single("hi"));
    }

    #[tokio::test]
    async fn float_buffers_keep_the_last_read() {
        let p = pipeline(TimeMode::Internal);
        let data = FloatBufferData {
            channel_names: vec!["tx".into(), "ty".into()],
            values: vec![vec![0.0, 1.0], vec![2.0, 3.0]],
            sample_rate: 60.0,
        };
        p.instance.add_link("op/chop", LinkScope::Output, LinkType::FloatBuffer, 2, LinkValue::FloatBuffer(data.clone()));

        assert_eq!(p.variables.get_float_buffer("op/chop").unwrap(), data);
        assert_eq!(p.variables.get_float_buffer_sample("op/chop").unwrap().values, vec![vec![1.0], vec![3.0]]);
        assert_eq!(p.variables.get_float_buffer_channel_names("op/chop").unwrap(), vec!["tx", "ty"]);

        p.instance.set_output("op/chop", LinkValue::Empty);
        assert_eq!(p.variables.get_float_buffer("op/chop").unwrap(), data);
    }

    #[tokio::test]
    async fn float_buffer_channels_follow_the_link_count() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/chop_in", LinkScope::Input, LinkType::FloatBuffer, 2, LinkValue::Empty);

        let short = FloatBufferData { channel_names: vec!["tx".into()], values: vec![vec![1.0]], sample_rate: 60.0 };
        let err = p.variables.set_float_buffer("op/chop_in", &short).unwrap_err();
        assert_eq!(err, VariableError::CountMismatch { name: "op/chop_in".into(), expected: 2, actual: 1 });
        assert!(matches!(p.instance.value("op/chop_in"), Some(LinkValue::Empty)));

        let wide = FloatBufferData {
            channel_names: vec!["tx".into(), "ty".into(), "tz".into()],
            values: vec![vec![1.0], vec![2.0], vec![3.0]],
            sample_rate: 60.0,
        };
        p.variables.set_float_buffer("op/chop_in", &wide).unwrap();
        let expected = FloatBufferData {
            channel_names: vec!["tx".into(), "ty".into()],
            values: vec![vec![1.0], vec![2.0]],
            sample_rate: 60.0,
        };
        assert!(matches!(p.instance.value("op/chop_in"), Some(LinkValue::FloatBuffer(b)) if b == expected));
    }

    #[tokio::test]
    async fn texture_input_is_exported_then_set() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/tex_in", LinkScope::Input, LinkType::Texture, 1, LinkValue::Empty);
        let tex: Arc<dyn HostTexture> = NullHostTexture::new(TextureDesc::new(8, 8, PixelFormat::Rgba8));

        let pending = p.variables.set_texture("op/tex_in", Some(tex), false);
        assert_eq!(p.variables.texture_updates().in_progress(), 1);
        pending.await.unwrap();

        assert_eq!(p.variables.texture_updates().in_progress(), 0);
        assert!(matches!(p.instance.value("op/tex_in"), Some(LinkValue::Texture(Some(_)))));
        assert!(p
            .instance
            .calls()
            .contains(&Call::SetInterest("op/tex_in".into(), LinkInterest::NoValues)));
    }

    #[tokio::test]
    async fn texture_outputs_come_from_the_import_table() {
        let p = pipeline(TimeMode::Internal);
        p.instance.add_link("op/tex_out", LinkScope::Output, LinkType::Texture, 1, LinkValue::Empty);

        assert!(p.variables.get_texture("op/tex_out").unwrap().is_none());
        assert!(matches!(p.variables.get_texture("op/nope"), Err(VariableError::NotFound(_))));

        let tex: Arc<dyn HostTexture> = NullHostTexture::new(TextureDesc::new(8, 8, PixelFormat::Rgba8));
        p.variables.allocate_linked_output("op/tex_out");
        assert!(p.variables.get_texture("op/tex_out").unwrap().is_none());
        p.variables.update_linked_output("op/tex_out", tex.clone(), 4);

        let got = p.variables.get_texture("op/tex_out").unwrap().unwrap();
        assert!(Arc::ptr_eq(&got, &tex));
        assert_eq!(p.variables.frame_last_updated("op/tex_out"), Some(4));

        p.variables.clear_saved_data();
        assert!(p.variables.linked_output("op/tex_out").is_none());
        assert_eq!(p.variables.frame_last_updated("op/tex_out"), None);
    }

    #[tokio::test]
    async fn unloaded_instance_is_reported() {
        let p = pipeline(TimeMode::Internal);
        p.slot.clear();
        assert_eq!(p.variables.get_int("op/any"), Err(VariableError::NotLoaded));
    }
}
