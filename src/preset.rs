//! Preset definitions and the registry that holds them.
//!
//! A preset is a named, ordered list of operations plus optional encoder
//! (`save`) options. In `imagecache.toml` a preset is written either as a
//! table of `operation = arguments` entries, kept in document order, or as an
//! array of such tables:
//!
//! ```toml
//! [presets.thumb_100x100]
//! thumbnail = [100, 100, "inset"]
//!
//! [presets.card]
//! fit = { width = 320, height = 200 }
//! frame = { margin = 4, color = "ddd" }
//! save = { quality = 80 }
//!
//! [presets]
//! banner = [{ crop = [1200, 400, [0, 100]] }, { resize = [600, 200] }]
//! ```
//!
//! [`normalize`] turns either form into a [`Preset`]: a flat operation list
//! with the reserved `save` key pulled out into [`SaveOptions`]. Operation
//! names are *not* checked here; an unknown name fails when the pipeline
//! runs, so a single broken preset cannot prevent startup.
//!
//! Presets can also be built in code with custom callbacks
//! ([`Operation::Custom`]) and added to the [`PresetRegistry`] before it is
//! handed to the resolver. After that the registry is read-only.

use crate::imaging::{ImageHandle, SaveOptions};
use crate::pipeline::{PipelineContext, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Key reserved for encoder options inside a preset definition.
pub const SAVE_KEY: &str = "save";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresetError {
    #[error("Preset \"{0}\" does not exist")]
    Unknown(String),
    #[error("Invalid preset name {0:?}")]
    InvalidName(String),
    #[error("Preset \"{0}\" is defined twice")]
    Duplicate(String),
    #[error("Preset \"{preset}\": invalid save options: {message}")]
    InvalidSave { preset: String, message: String },
}

/// Signature of a custom pipeline step.
pub type CustomFn =
    dyn Fn(ImageHandle, &PipelineContext<'_>) -> Result<ImageHandle, PipelineError> + Send + Sync;

/// A user-supplied pipeline step.
#[derive(Clone)]
pub struct CustomOp {
    label: String,
    func: Arc<CustomFn>,
}

impl CustomOp {
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(ImageHandle, &PipelineContext<'_>) -> Result<ImageHandle, PipelineError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn call(&self, image: ImageHandle, ctx: &PipelineContext<'_>) -> Result<ImageHandle, PipelineError> {
        (self.func)(image, ctx)
    }
}

impl fmt::Debug for CustomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomOp").field(&self.label).finish()
    }
}

impl PartialEq for CustomOp {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && Arc::ptr_eq(&self.func, &other.func)
    }
}

/// One pipeline step.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Resolved by name when the pipeline runs; `args` is the raw TOML value.
    Builtin { name: String, args: toml::Value },
    /// Called with the current handle and the pipeline context.
    Custom(CustomOp),
}

impl Operation {
    pub fn label(&self) -> &str {
        match self {
            Operation::Builtin { name, .. } => name,
            Operation::Custom(op) => op.label(),
        }
    }
}

/// A validated preset: operations in execution order plus encoder options.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    name: String,
    operations: Vec<Operation>,
    save: SaveOptions,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
            save: SaveOptions::default(),
        }
    }

    pub fn with_operation(mut self, name: impl Into<String>, args: impl Into<toml::Value>) -> Self {
        self.operations.push(Operation::Builtin {
            name: name.into(),
            args: args.into(),
        });
        self
    }

    pub fn with_custom(mut self, op: CustomOp) -> Self {
        self.operations.push(Operation::Custom(op));
        self
    }

    pub fn with_save(mut self, save: SaveOptions) -> Self {
        self.save = save;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Encoder options from the preset's `save` entry (unmerged).
    pub fn save(&self) -> &SaveOptions {
        &self.save
    }

    /// The raw form of this preset, or `None` if it contains custom callbacks.
    pub fn to_raw(&self) -> Option<RawPreset> {
        let mut tables = Vec::with_capacity(self.operations.len() + 1);
        for op in &self.operations {
            let Operation::Builtin { name, args } = op else {
                return None;
            };
            let mut table = toml::Table::new();
            table.insert(name.clone(), args.clone());
            tables.push(table);
        }
        if self.save != SaveOptions::default() {
            let save = toml::Value::try_from(&self.save).ok()?;
            let mut table = toml::Table::new();
            table.insert(SAVE_KEY.to_string(), save);
            tables.push(table);
        }
        Some(RawPreset::List(tables))
    }
}

/// A preset as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPreset {
    List(Vec<toml::Table>),
    Single(toml::Table),
}

/// Flatten a raw definition into a [`Preset`].
///
/// A single table is treated exactly like a one-element list. Every `save`
/// entry is removed from the operation list; when there are several, later
/// keys override earlier ones.
pub fn normalize(name: &str, raw: &RawPreset) -> Result<Preset, PresetError> {
    validate_name(name)?;
    let tables: &[toml::Table] = match raw {
        RawPreset::List(tables) => tables,
        RawPreset::Single(table) => std::slice::from_ref(table),
    };

    let mut preset = Preset::new(name);
    for table in tables {
        for (key, value) in table {
            if key == SAVE_KEY {
                let save = parse_save(name, value)?;
                preset.save = save.merged_over(&preset.save);
            } else {
                preset.operations.push(Operation::Builtin {
                    name: key.clone(),
                    args: value.clone(),
                });
            }
        }
    }
    Ok(preset)
}

fn parse_save(preset: &str, value: &toml::Value) -> Result<SaveOptions, PresetError> {
    let invalid = |message: String| PresetError::InvalidSave {
        preset: preset.to_string(),
        message,
    };
    let save: SaveOptions = value.clone().try_into().map_err(|e: toml::de::Error| invalid(e.to_string()))?;
    save.validate().map_err(|e| invalid(e.to_string()))?;
    Ok(save)
}

/// Preset names become a path segment and a URL segment.
fn validate_name(name: &str) -> Result<(), PresetError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '?', '#'])
        || name.chars().any(char::is_whitespace);
    if bad {
        return Err(PresetError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// All known presets by name.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, Preset>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize every raw definition from configuration.
    pub fn from_raw(raw: &BTreeMap<String, RawPreset>) -> Result<Self, PresetError> {
        let mut registry = Self::new();
        for (name, definition) in raw {
            registry.insert(normalize(name, definition)?)?;
        }
        Ok(registry)
    }

    /// Add a preset. Names must be unique.
    pub fn insert(&mut self, preset: Preset) -> Result<(), PresetError> {
        validate_name(preset.name())?;
        if self.presets.contains_key(preset.name()) {
            return Err(PresetError::Duplicate(preset.name().to_string()));
        }
        self.presets.insert(preset.name().to_string(), preset);
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Preset, PresetError> {
        self.presets
            .get(name)
            .ok_or_else(|| PresetError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawPreset {
        #[derive(Deserialize)]
        struct Wrapper {
            preset: RawPreset,
        }
        toml::from_str::<Wrapper>(toml_src).unwrap().preset
    }

    fn op_names(preset: &Preset) -> Vec<&str> {
        preset.operations().iter().map(Operation::label).collect()
    }

    #[test]
    fn table_form_keeps_document_order() {
        let preset = normalize(
            "p",
            &raw("[preset]\nresize = [10, 10]\ncrop = [5, 5]\nframe = {}\n"),
        )
        .unwrap();
        assert_eq!(op_names(&preset), ["resize", "crop", "frame"]);
    }

    #[test]
    fn list_form_flattens_tables() {
        let preset = normalize(
            "p",
            &raw("preset = [{ crop = [5, 5] }, { resize = [2, 2] }, { frame = 3 }]\n"),
        )
        .unwrap();
        assert_eq!(op_names(&preset), ["crop", "resize", "frame"]);
    }

    #[test]
    fn single_definition_equals_one_element_list() {
        let single = normalize("p", &raw("preset = { thumbnail = [100, 100] }\n")).unwrap();
        let list = normalize("p", &raw("preset = [{ thumbnail = [100, 100] }]\n")).unwrap();
        assert_eq!(single, list);
        assert_eq!(single.operations().len(), 1);
    }

    #[test]
    fn save_key_is_extracted() {
        let preset = normalize(
            "p",
            &raw("[preset]\nthumbnail = [100, 100]\nsave = { quality = 70 }\n"),
        )
        .unwrap();
        assert_eq!(op_names(&preset), ["thumbnail"]);
        assert_eq!(preset.save().quality, Some(70));
        assert!(preset.operations().iter().all(|op| op.label() != SAVE_KEY));
    }

    #[test]
    fn later_save_entries_override_earlier() {
        let preset = normalize(
            "p",
            &raw(
                "preset = [{ save = { quality = 50, png_compression = \"fast\" } }, { resize = [1, 1] }, { save = { quality = 60 } }]\n",
            ),
        )
        .unwrap();
        assert_eq!(preset.save().quality, Some(60));
        assert_eq!(
            preset.save().png_compression,
            Some(crate::imaging::PngCompression::Fast)
        );
    }

    #[test]
    fn invalid_save_options_rejected() {
        let result = normalize("p", &raw("[preset]\nsave = { quality = 0 }\n"));
        assert!(matches!(result, Err(PresetError::InvalidSave { .. })));

        let result = normalize("p", &raw("[preset]\nsave = { speed = 3 }\n"));
        assert!(matches!(result, Err(PresetError::InvalidSave { .. })));
    }

    #[test]
    fn unknown_operation_names_survive_normalization() {
        let preset = normalize("p", &raw("[preset]\nsepia = []\n")).unwrap();
        assert_eq!(op_names(&preset), ["sepia"]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let first = normalize(
            "p",
            &raw("[preset]\nfit = [10, 10]\nframe = { margin = 2 }\nsave = { quality = 80 }\n"),
        )
        .unwrap();
        let second = normalize("p", &first.to_raw().unwrap()).unwrap();
        assert_eq!(first, second);
        let third = normalize("p", &second.to_raw().unwrap()).unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn custom_ops_have_no_raw_form() {
        let preset = Preset::new("p").with_custom(CustomOp::new("noop", |image, _| Ok(image)));
        assert_eq!(preset.to_raw(), None);
    }

    #[test]
    fn invalid_names_rejected() {
        for name in ["", "a/b", "..", "with space"] {
            let result = normalize(name, &RawPreset::List(Vec::new()));
            assert!(matches!(result, Err(PresetError::InvalidName(_))), "{name:?}");
        }
    }

    #[test]
    fn registry_lookup() {
        let mut raw_presets = BTreeMap::new();
        raw_presets.insert("small".to_string(), raw("preset = { resize = [10, 10] }\n"));
        let registry = PresetRegistry::from_raw(&raw_presets).unwrap();

        assert!(registry.has("small"));
        assert!(!registry.has("large"));
        assert_eq!(registry.get("small").unwrap().name(), "small");
        assert_eq!(
            registry.get("large").unwrap_err(),
            PresetError::Unknown("large".into())
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), ["small"]);
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = PresetRegistry::new();
        registry.insert(Preset::new("a")).unwrap();
        assert_eq!(
            registry.insert(Preset::new("a")),
            Err(PresetError::Duplicate("a".into()))
        );
    }
}
