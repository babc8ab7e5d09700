//! Bot settings — one TOML file per bot.
//!
//! Top-level tables mirror [`BotConfig`] (`[entry]`, `[trailing]`, `[exit]`,
//! `[regime]`, `[guards]`, ...) plus runner-only tables:
//! - `[live]`: broker-facing stop update throttle
//! - `[backtest]`: simulated slippage
//! - `[rules]`: optional path to a rules document (relative to the settings file)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use tradepilot_core::components::factory::FactoryError;
use tradepilot_core::components::DecisionPipeline;
use tradepilot_core::config::BotConfig;
use tradepilot_core::fingerprint::{config_fingerprint, Fingerprint};
use tradepilot_core::rules::{RulesDocument, RulesEngine, RulesError};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid component parameters: {0}")]
    Component(#[from] FactoryError),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Rules(#[from] RulesError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// Minimum seconds between broker-facing stop updates.
    pub stop_update_interval_secs: i64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            stop_update_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Adverse slippage applied to simulated entry fills, in basis points.
    pub slippage_bps: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    #[serde(flatten)]
    pub bot: BotConfig,
    pub live: LiveSettings,
    pub backtest: BacktestSettings,
    pub rules: RulesSettings,
    /// Directory the settings were loaded from; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl BotSettings {
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml(&content)?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        info!(path = %path.display(), fingerprint = %settings.fingerprint().short(), "settings loaded");
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject parameter sets the components would refuse.
    pub fn validate(&self) -> Result<(), SettingsError> {
        DecisionPipeline::from_config(&self.bot)?;
        let entry = &self.bot.entry;
        if !(0.0..=1.0).contains(&entry.threshold) {
            return Err(invalid("entry.threshold", format!("{} not in [0, 1]", entry.threshold)));
        }
        if !(entry.stop_loss_pct > 0.0 && entry.stop_loss_pct < 100.0) {
            return Err(invalid("entry.stop_loss_pct", format!("{} not in (0, 100)", entry.stop_loss_pct)));
        }
        if entry.signal_timeout_secs <= 0 {
            return Err(invalid("entry.signal_timeout_secs", "must be positive".into()));
        }
        if !(self.bot.sizing.quantity > 0.0) {
            return Err(invalid("sizing.quantity", "must be positive".into()));
        }
        if self.live.stop_update_interval_secs < 0 {
            return Err(invalid("live.stop_update_interval_secs", "must not be negative".into()));
        }
        if !(self.backtest.slippage_bps >= 0.0) {
            return Err(invalid("backtest.slippage_bps", "must not be negative".into()));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        config_fingerprint(&self.bot)
    }

    /// Resolved rules document path, if one is configured.
    pub fn rules_path(&self) -> Option<PathBuf> {
        let path = self.rules.path.as_ref()?;
        Some(match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.clone(),
        })
    }

    /// Load the configured rules document. `None` when no path is set, or
    /// when the document is unreadable or invalid; the failure is logged and
    /// the built-in classifier and scorer take over.
    pub fn load_rules(&self) -> Option<RulesEngine> {
        let path = self.rules_path()?;
        rules_or_builtin(&path, RulesEngine::from_path(&path))
    }

    /// Like [`load_rules`](Self::load_rules), but a bad document is an error.
    pub fn load_rules_strict(&self) -> Result<Option<RulesEngine>, SettingsError> {
        match self.rules_path() {
            Some(path) => Ok(Some(RulesEngine::from_path(&path)?)),
            None => Ok(None),
        }
    }

    /// The configured document itself, for jobs that build their own engine.
    /// Falls back the same way as [`load_rules`](Self::load_rules).
    pub fn load_rules_document(&self) -> Option<RulesDocument> {
        let path = self.rules_path()?;
        rules_or_builtin(&path, RulesDocument::load(&path))
    }
}

/// Keep a loaded rules artifact, or log the failure and use the built-ins.
pub fn rules_or_builtin<T>(path: &Path, loaded: Result<T, RulesError>) -> Option<T> {
    match loaded {
        Ok(rules) => Some(rules),
        Err(e) => {
            error!(path = %path.display(), error = %e, "rules document unusable; falling back to built-in classifier and scorer");
            None
        }
    }
}

fn invalid(field: &'static str, reason: String) -> SettingsError {
    SettingsError::Invalid { field, reason }
}
