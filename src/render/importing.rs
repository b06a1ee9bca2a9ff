//! Engine to host texture import.

mod importer;

pub use importer::{ImportRequest, ImportResult, TextureImporter};
