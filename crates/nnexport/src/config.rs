//! Layered configuration
//!
//! Sources are applied in order, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. the user config file, `<config dir>/nnexport/nnexport.toml`
//! 3. the file named by `NNEXPORT_CONFIG`
//! 4. a file given explicitly (the CLI `--config` flag)
//!
//! Command-line flags are applied on top by the binary.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use etcetera::BaseStrategy;
use log::debug;
use ruff_python_stdlib::{identifiers::is_identifier, keyword::is_keyword};
use serde::Deserialize;

use crate::{
    exporting::{DEFAULT_FRAMEWORK, EmitterOptions, ExportOptions},
    format::{FormatOptions, Indent, LineBreak},
    layer_types::{LayerTypeRegistry, LayerTypeSchema},
    types::FxIndexMap,
};

/// Environment variable naming an extra config file
pub const CONFIG_ENV: &str = "NNEXPORT_CONFIG";

const APP_DIR: &str = "nnexport";
const CONFIG_FILE: &str = "nnexport.toml";

/// Effective settings after all layers are merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub framework: String,
    pub line_break: LineBreak,
    pub indent: Indent,
    pub prefer_sequential: bool,
    /// Forwarded verbatim to the framework emitter
    pub emitter_options: FxIndexMap<String, String>,
    /// Layer types added to (or overriding) the built-in registry
    pub layer_types: FxIndexMap<String, LayerTypeSchema>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framework: DEFAULT_FRAMEWORK.to_owned(),
            line_break: LineBreak::default(),
            indent: Indent::default(),
            prefer_sequential: false,
            emitter_options: FxIndexMap::default(),
            layer_types: FxIndexMap::default(),
        }
    }
}

/// One config file as written; absent keys leave the current value alone
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    framework: Option<String>,
    line_break: Option<String>,
    indent: Option<String>,
    prefer_sequential: Option<bool>,
    #[serde(default)]
    emitter_options: FxIndexMap<String, toml::Value>,
    #[serde(default)]
    layer_types: FxIndexMap<String, LayerTypeSchema>,
}

impl Config {
    /// Merge every available config layer over the defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = user_config_path()
            && path.is_file()
        {
            config.merge_file(&path)?;
        }
        if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
            config.merge_file(Path::new(&path))?;
        }
        if let Some(path) = explicit {
            config.merge_file(path)?;
        }

        Ok(config)
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        debug!("Loading configuration from {}", path.display());
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        self.merge_str(&source)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Merge one TOML document over the current settings
    pub fn merge_str(&mut self, source: &str) -> Result<()> {
        let layer: ConfigLayer = toml::from_str(source)?;
        if let Some(name) = layer
            .layer_types
            .keys()
            .find(|name| !is_identifier(name) || is_keyword(name))
        {
            bail!("Layer type '{name}' is not a valid Python class name");
        }

        if let Some(framework) = layer.framework {
            self.framework = framework;
        }
        if let Some(line_break) = layer.line_break {
            self.line_break = line_break.parse()?;
        }
        if let Some(indent) = layer.indent {
            self.indent = indent.parse()?;
        }
        if let Some(prefer_sequential) = layer.prefer_sequential {
            self.prefer_sequential = prefer_sequential;
        }
        for (key, value) in layer.emitter_options {
            self.emitter_options.insert(key, option_text(value));
        }
        self.layer_types.extend(layer.layer_types);
        Ok(())
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            framework: self.framework.clone(),
            format: FormatOptions {
                line_break: self.line_break,
                indent: self.indent,
            },
            prefer_sequential: self.prefer_sequential,
            emitter_options: self
                .emitter_options
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect::<EmitterOptions>(),
        }
    }

    /// Built-in layer types plus the configured ones
    pub fn layer_registry(&self) -> LayerTypeRegistry {
        let mut registry = LayerTypeRegistry::default();
        for (name, schema) in &self.layer_types {
            registry.register(name.clone(), schema.clone());
        }
        registry
    }
}

/// `<config dir>/nnexport/nnexport.toml` for the current user
pub fn user_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join(APP_DIR).join(CONFIG_FILE))
}

fn option_text(value: toml::Value) -> String {
    match value {
        toml::Value::String(text) => text,
        other => other.to_string(),
    }
}
