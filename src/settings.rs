use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cache::{DEFAULT_INDEX_CAPACITY, VaryOptions};
use crate::logging::LogFormat;

const ENV_PREFIX: &str = "HTTPCACHE";

fn default_index_capacity() -> usize {
    DEFAULT_INDEX_CAPACITY
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory of the file backing store. Without it entries are kept in
    /// memory only.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default = "default_index_capacity")]
    pub index_capacity: usize,
    #[serde(default)]
    pub vary_authorization: bool,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_dir: None,
            index_capacity: default_index_capacity(),
            vary_authorization: false,
            log: default_log_format(),
        }
    }
}

impl Settings {
    /// Loads settings from an optional TOML file, then applies
    /// `HTTPCACHE__*` environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = config_path {
            settings.apply_base_dir(path);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.index_capacity > 0,
            "index_capacity must be greater than 0 (got {})",
            self.index_capacity
        );
        if let Some(dir) = &self.storage_dir {
            ensure!(
                !dir.as_os_str().is_empty(),
                "storage_dir must not be empty when set"
            );
        }
        Ok(())
    }

    pub fn index_capacity_nonzero(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.index_capacity)
            .ok_or_else(|| anyhow!("index_capacity must be greater than 0"))
    }

    pub fn vary_options(&self) -> VaryOptions {
        VaryOptions {
            authorization: self.vary_authorization,
        }
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if let Some(dir) = self.storage_dir.take() {
            self.storage_dir = Some(absolutize(&dir, base_dir));
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow!(err)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
