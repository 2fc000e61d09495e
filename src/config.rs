//! Compile configuration, optionally loaded from TOML
//!
//! ```toml
//! basedir = "views"
//!
//! [filter_aliases]
//! md = "markdown"
//!
//! [filter_options.markdown]
//! flavor = "gfm"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::filters::{ConstValue, Filter, FilterConfig};
use crate::loader::{Capabilities, CapabilitiesBuilder};

/// Everything a compile needs beyond the entry template
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Root for template paths starting with `/`
    pub basedir: Option<PathBuf>,
    pub filters: FilterConfig,
}

/// TOML structure for deserializing configuration files
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    basedir: Option<PathBuf>,
    #[serde(default)]
    filter_aliases: HashMap<String, String>,
    #[serde(default)]
    filter_options: HashMap<String, BTreeMap<String, ConstValue>>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            basedir: None,
            filters: FilterConfig::with_builtins(),
        }
    }
}

impl CompileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    ///
    /// A relative `basedir` is taken relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        if let (Some(basedir), Some(dir)) = (&config.basedir, path.parent()) {
            if basedir.is_relative() {
                config.basedir = Some(dir.join(basedir));
            }
        }
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let parsed: TomlConfig = toml::from_str(content)?;

        let mut filters = FilterConfig::with_builtins();
        for (alias, target) in parsed.filter_aliases {
            filters = filters.with_alias(alias, target);
        }
        for (filter, options) in parsed.filter_options {
            for (option, value) in options {
                filters = filters.with_default_option(filter.clone(), option, value);
            }
        }

        Ok(CompileConfig {
            basedir: parsed.basedir,
            filters,
        })
    }

    pub fn with_basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(basedir.into());
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: impl Filter + 'static) -> Self {
        self.filters.insert_filter(name, filter);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.filters = self.filters.with_alias(alias, target);
        self
    }

    pub fn with_filter_option(
        mut self,
        filter: impl Into<String>,
        option: impl Into<String>,
        value: ConstValue,
    ) -> Self {
        self.filters = self.filters.with_default_option(filter, option, value);
        self
    }

    /// Default-syntax capabilities rooted at the configured base directory
    pub fn capabilities(&self) -> Result<Capabilities, ConfigError> {
        let mut builder = CapabilitiesBuilder::with_default_syntax();
        if let Some(basedir) = &self.basedir {
            builder = builder.basedir(basedir.clone());
        }
        builder.build()
    }
}
