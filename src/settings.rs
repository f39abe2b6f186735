use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::aggregation::{TrendQuery, TrendWindow, MAX_TREND_BUCKETS};
use crate::error::{AnalyticsError, AnalyticsResult};

pub const WORKER_ENV: &str = "OPSDESK_ANALYTICS_WORKER";
pub const WORKER_TIMEOUT_ENV: &str = "OPSDESK_ANALYTICS_WORKER_TIMEOUT_MS";
pub const EPHEMERAL_ENV: &str = "OPSDESK_ANALYTICS_EPHEMERAL";

const DEFAULT_WORKER_TIMEOUT_MS: u64 = 5_000;

/// What to do when the worker does not answer within the timeout.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutPolicy {
    /// Compute the view in-process instead.
    #[default]
    Fallback,
    /// Report `ComputationTimeout` for that view.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsSettings {
    pub worker_enabled: bool,
    pub worker_timeout_ms: u64,
    pub timeout_policy: TimeoutPolicy,
    pub trend: TrendQuery,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            worker_timeout_ms: DEFAULT_WORKER_TIMEOUT_MS,
            timeout_policy: TimeoutPolicy::default(),
            trend: TrendQuery::default(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl AnalyticsSettings {
    /// Reads settings from `path`, using defaults when the file is missing or
    /// unreadable, then applies environment overrides.
    pub fn load(path: &Path) -> Self {
        let mut settings = if path.exists() {
            match Self::read_file(path) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!("Ignoring analytics settings at {}: {err:#}", path.display());
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    fn read_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        settings.validate().map_err(anyhow::Error::new)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> AnalyticsResult<()> {
        self.validate()?;
        let serialized = serde_json::to_string_pretty(self)
            .map_err(|err| AnalyticsError::Config(err.to_string()))?;
        fs::write(path, serialized).map_err(|err| {
            AnalyticsError::Config(format!(
                "Failed to write settings to {}: {err}",
                path.display()
            ))
        })
    }

    /// Applies `OPSDESK_ANALYTICS_*` overrides read through `lookup`.
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(WORKER_ENV) {
            match parse_flag(&raw) {
                Some(enabled) => {
                    info!("{WORKER_ENV} override: worker_enabled={enabled}");
                    self.worker_enabled = enabled;
                }
                None => warn!("Ignoring {WORKER_ENV}={raw:?}"),
            }
        }
        if let Some(raw) = lookup(WORKER_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.worker_timeout_ms = ms,
                _ => warn!("Ignoring {WORKER_TIMEOUT_ENV}={raw:?}"),
            }
        }
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.worker_timeout_ms == 0 {
            return Err(AnalyticsError::Config(
                "workerTimeoutMs must be greater than zero".into(),
            ));
        }
        if let TrendWindow::Trailing { buckets } = self.trend.window {
            if buckets == 0 {
                return Err(AnalyticsError::Config(
                    "a trailing trend window needs at least one bucket".into(),
                ));
            }
            if buckets > MAX_TREND_BUCKETS {
                return Err(AnalyticsError::Config(format!(
                    "a trailing trend window holds at most {MAX_TREND_BUCKETS} buckets, got {buckets}"
                )));
            }
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}

/// Capabilities of the execution context the coordinator runs in.
pub trait EnvironmentProbe: Send + Sync {
    fn supports_background_workers(&self) -> bool;
    fn supports_persistent_storage(&self) -> bool;
}

/// The current process. Threads are always available; persistent storage
/// can be switched off with `OPSDESK_ANALYTICS_EPHEMERAL=1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEnvironment;

impl EnvironmentProbe for HostEnvironment {
    fn supports_background_workers(&self) -> bool {
        true
    }

    fn supports_persistent_storage(&self) -> bool {
        !std::env::var(EPHEMERAL_ENV)
            .ok()
            .and_then(|value| parse_flag(&value))
            .unwrap_or(false)
    }
}
