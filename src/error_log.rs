//! De-duplicated diagnostics for parameter level problems.
//!
//! Missing variables, type or scope mismatches and failed engine calls are
//! reported here instead of failing the cook pipeline. Each distinct
//! (severity, variable, call site) triple is reported once. Entries can be
//! added from any thread; [`ErrorLog::output_messages`] forwards the
//! pending ones to the `log` facade and hands them to the caller.

use crate::sdk::{LinkScope, Severity, TeResult};
use crate::task_suspender::lock;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    VariableNotFound,
    LinkGetInfoError,
    LinkGetValueError,
    LinkSetValueError,
    VariableTypeMismatch,
    VariableScopeMismatch,
    VariableCountMismatch,
    TextureExportError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub variable: String,
    pub call_site: &'static str,
    pub message: String,
}

type Key = (Severity, String, &'static str);

#[derive(Debug, Default)]
pub struct ErrorLog {
    triggered: Mutex<HashSet<Key>>,
    pending: Mutex<Vec<Diagnostic>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `diagnostic` unless the same triple was reported before.
    /// Returns whether it was queued.
    pub fn add(&self, diagnostic: Diagnostic) -> bool {
        let key = (diagnostic.severity, diagnostic.variable.clone(), diagnostic.call_site);
        if !lock(&self.triggered).insert(key) {
            return false;
        }
        lock(&self.pending).push(diagnostic);
        true
    }

    pub fn add_result(&self, call_site: &'static str, variable: &str, kind: DiagnosticKind, result: TeResult) -> bool {
        self.add(Diagnostic {
            severity: result.severity(),
            kind,
            variable: variable.to_string(),
            call_site,
            message: format!("{call_site}: engine returned {result:?} for '{variable}'"),
        })
    }

    pub fn not_found(&self, call_site: &'static str, variable: &str) -> bool {
        self.add(Diagnostic {
            severity: Severity::Error,
            kind: DiagnosticKind::VariableNotFound,
            variable: variable.to_string(),
            call_site,
            message: format!("{call_site}: no variable named '{variable}'"),
        })
    }

    pub fn type_mismatch(&self, call_site: &'static str, variable: &str, expected: &str) -> bool {
        self.add(Diagnostic {
            severity: Severity::Error,
            kind: DiagnosticKind::VariableTypeMismatch,
            variable: variable.to_string(),
            call_site,
            message: format!("{call_site}: '{variable}' is not a {expected} variable"),
        })
    }

    pub fn scope_mismatch(&self, call_site: &'static str, variable: &str, expected: LinkScope) -> bool {
        self.add(Diagnostic {
            severity: Severity::Error,
            kind: DiagnosticKind::VariableScopeMismatch,
            variable: variable.to_string(),
            call_site,
            message: format!("{call_site}: '{variable}' is not an {} variable", expected.as_str()),
        })
    }

    /// Too few values is an error, too many only a warning since the extra values are dropped.
    pub fn count_mismatch(&self, call_site: &'static str, variable: &str, expected: usize, actual: usize) -> bool {
        let severity = if actual < expected { Severity::Error } else { Severity::Warning };
        self.add(Diagnostic {
            severity,
            kind: DiagnosticKind::VariableCountMismatch,
            variable: variable.to_string(),
            call_site,
            message: format!("{call_site}: '{variable}' expects {expected} values, got {actual}"),
        })
    }

    pub fn export_failed(&self, call_site: &'static str, variable: &str, error: &crate::errors::ExportError) -> bool {
        self.add(Diagnostic {
            severity: Severity::Error,
            kind: DiagnosticKind::TextureExportError,
            variable: variable.to_string(),
            call_site,
            message: format!("{call_site}: exporting '{variable}' failed: {error}"),
        })
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Logs and returns every queued diagnostic.
    pub fn output_messages(&self) -> Vec<Diagnostic> {
        let messages = std::mem::take(&mut *lock(&self.pending));
        for d in &messages {
            match d.severity {
                Severity::None => log::info!("{}", d.message),
                Severity::Warning => log::warn!("{}", d.message),
                Severity::Error => log::error!("{}", d.message),
            }
        }
        messages
    }

    /// Forgets what was reported, e.g. after the engine reloads.
    pub fn reset(&self) {
        lock(&self.triggered).clear();
        lock(&self.pending).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_triple_is_reported_once() {
        let log = ErrorLog::new();
        assert!(log.type_mismatch("set_bool", "op/x", "boolean"));
        assert!(!log.type_mismatch("set_bool", "op/x", "boolean"));
        assert!(!log.type_mismatch("set_bool", "op/x", "boolean"));
        assert_eq!(log.pending(), 1);
    }

    #[test]
    fn different_call_site_or_variable_is_new() {
        let log = ErrorLog::new();
        assert!(log.type_mismatch("set_bool", "op/x", "boolean"));
        assert!(log.type_mismatch("set_int", "op/x", "integer"));
        assert!(log.type_mismatch("set_bool", "op/y", "boolean"));
        assert_eq!(log.pending(), 3);
    }

    #[test]
    fn count_mismatch_severity_depends_on_direction() {
        let log = ErrorLog::new();
        log.count_mismatch("set_doubles", "op/v", 3, 2);
        log.count_mismatch("set_doubles", "op/v", 3, 5);
        let out = log.output_messages();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].severity, Severity::Error);
        assert_eq!(out[1].severity, Severity::Warning);
    }

    #[test]
    fn output_drains_but_keeps_dedup_state() {
        let _ = env_logger::builder().is_test(true).try_init();
        let log = ErrorLog::new();
        log.not_found("get_string", "op/missing");
        assert_eq!(log.output_messages().len(), 1);
        assert_eq!(log.pending(), 0);

        assert!(!log.not_found("get_string", "op/missing"));
        log.reset();
        assert!(log.not_found("get_string", "op/missing"));
    }

    #[test]
    fn engine_result_maps_to_severity() {
        let log = ErrorLog::new();
        log.add_result("get_double", "op/d", DiagnosticKind::LinkGetValueError, TeResult::ComponentWarnings);
        assert_eq!(log.output_messages()[0].severity, Severity::Warning);
    }
}
