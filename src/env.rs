//! Environment-based configuration.
//!
//! | Variable | Field |
//! |---|---|
//! | `PAGEPRESS_MAX_CONCURRENT` | `max_concurrent` |
//! | `PAGEPRESS_QUEUE_TIMEOUT_SECS` | `queue_timeout_ms` |
//! | `PAGEPRESS_JOB_TIMEOUT_SECS` | `job_timeout_ms` |
//! | `PAGEPRESS_RECYCLE_AFTER` | `recycle.after_requests` |
//! | `PAGEPRESS_RECYCLE_HARD_CAP` | `recycle.hard_cap` |
//! | `PAGEPRESS_RESULT_CACHE_TTL_SECS` | `result_cache.ttl_secs` (enables the cache) |
//! | `PAGEPRESS_RESULT_CACHE_MAX` | `result_cache.max_entries` (enables the cache) |
//! | `PAGEPRESS_FONT_POLICY` | `fonts.policy` (`best-effort` or `required`) |
//! | `CHROME_PATH` | `launch.chrome_path` |
//!
//! Unset or empty variables keep the default.

use crate::{Error, FontPolicy, PoolConfig, Result, ResultCacheConfig};
use config::{Config, Environment, Map};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix shared by every pool variable
pub const PREFIX: &str = "PAGEPRESS";

pub const MAX_CONCURRENT: &str = "PAGEPRESS_MAX_CONCURRENT";
pub const QUEUE_TIMEOUT_SECS: &str = "PAGEPRESS_QUEUE_TIMEOUT_SECS";
pub const JOB_TIMEOUT_SECS: &str = "PAGEPRESS_JOB_TIMEOUT_SECS";
pub const RECYCLE_AFTER: &str = "PAGEPRESS_RECYCLE_AFTER";
pub const RECYCLE_HARD_CAP: &str = "PAGEPRESS_RECYCLE_HARD_CAP";
pub const RESULT_CACHE_TTL_SECS: &str = "PAGEPRESS_RESULT_CACHE_TTL_SECS";
pub const RESULT_CACHE_MAX: &str = "PAGEPRESS_RESULT_CACHE_MAX";
pub const FONT_POLICY: &str = "PAGEPRESS_FONT_POLICY";
pub const CHROME_PATH: &str = "CHROME_PATH";

impl FromStr for FontPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Ok(FontPolicy::BestEffort),
            "required" => Ok(FontPolicy::Required),
            other => Err(Error::Config(format!("unknown font policy '{}'", other))),
        }
    }
}

/// Overrides as read from the environment, before they touch the defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    max_concurrent: Option<usize>,
    queue_timeout_secs: Option<u64>,
    job_timeout_secs: Option<u64>,
    recycle_after: Option<u64>,
    recycle_hard_cap: Option<u64>,
    result_cache_ttl_secs: Option<u64>,
    result_cache_max: Option<usize>,
    font_policy: Option<String>,
    chrome_path: Option<PathBuf>,
}

impl EnvOverrides {
    fn load(vars: Option<Map<String, String>>) -> Result<Self> {
        let chrome_path = match &vars {
            Some(vars) => vars.get(CHROME_PATH).cloned(),
            None => std::env::var(CHROME_PATH).ok(),
        }
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

        let overrides = Config::builder()
            .add_source(Environment::with_prefix(PREFIX).ignore_empty(true).source(vars))
            .set_override_option("chrome_path", chrome_path)?
            .build()?
            .try_deserialize()?;
        Ok(overrides)
    }

    fn apply(self, mut cfg: PoolConfig) -> Result<PoolConfig> {
        if let Some(v) = self.max_concurrent {
            cfg.max_concurrent = v;
        }
        if let Some(v) = self.queue_timeout_secs {
            cfg.queue_timeout_ms = v.saturating_mul(1000);
        }
        if let Some(v) = self.job_timeout_secs {
            cfg.job_timeout_ms = v.saturating_mul(1000);
        }
        if let Some(v) = self.recycle_after {
            cfg.recycle.after_requests = v;
        }
        if self.recycle_hard_cap.is_some() {
            cfg.recycle.hard_cap = self.recycle_hard_cap;
        }

        if self.result_cache_ttl_secs.is_some() || self.result_cache_max.is_some() {
            let mut rc = ResultCacheConfig::default();
            if let Some(v) = self.result_cache_ttl_secs {
                rc.ttl_secs = v;
            }
            if let Some(v) = self.result_cache_max {
                rc.max_entries = v;
            }
            cfg.result_cache = Some(rc);
        }

        if let Some(v) = self.font_policy {
            cfg.fonts.policy = v.parse()?;
        }
        if self.chrome_path.is_some() {
            cfg.launch.chrome_path = self.chrome_path;
        }
        Ok(cfg)
    }
}

impl PoolConfig {
    /// Defaults overridden from the process environment, then validated
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Like [`from_env`](Self::from_env) but reads the given variables instead
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Map<String, String> = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::load(Some(vars))
    }

    fn load(vars: Option<Map<String, String>>) -> Result<Self> {
        let cfg = EnvOverrides::load(vars)?.apply(PoolConfig::default())?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<PoolConfig> {
        PoolConfig::from_vars(pairs.iter().copied())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.max_concurrent, 100);
        assert!(cfg.result_cache.is_none());
        assert_eq!(cfg.fonts.policy, FontPolicy::BestEffort);
        assert_eq!(cfg.launch.chrome_path, None);
    }

    #[test]
    fn overrides_apply() {
        let cfg = from_pairs(&[
            (MAX_CONCURRENT, "8"),
            (QUEUE_TIMEOUT_SECS, "5"),
            (JOB_TIMEOUT_SECS, "30"),
            (RECYCLE_AFTER, "50"),
            (RECYCLE_HARD_CAP, "80"),
            (RESULT_CACHE_MAX, "20"),
            (FONT_POLICY, "Required"),
            (CHROME_PATH, "/usr/bin/chromium"),
        ])
        .unwrap();
        assert_eq!(cfg.max_concurrent, 8);
        assert_eq!(cfg.queue_timeout_ms, 5_000);
        assert_eq!(cfg.job_timeout_ms, 30_000);
        assert_eq!(cfg.recycle.after_requests, 50);
        assert_eq!(cfg.recycle.hard_cap, Some(80));
        assert_eq!(
            cfg.result_cache,
            Some(ResultCacheConfig {
                ttl_secs: 3600,
                max_entries: 20
            })
        );
        assert_eq!(cfg.fonts.policy, FontPolicy::Required);
        assert_eq!(cfg.launch.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        let cfg = from_pairs(&[("PATH", "/usr/bin"), ("PAGEPRESS_UNKNOWN", "1"), ("MAX_CONCURRENT", "3")]).unwrap();
        assert_eq!(cfg.max_concurrent, 100);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let unparsable = from_pairs(&[(MAX_CONCURRENT, "lots")]).unwrap_err();
        assert!(matches!(unparsable, Error::Env(_)));
        assert_eq!(unparsable.kind(), ErrorKind::Config);

        assert!(matches!(from_pairs(&[(MAX_CONCURRENT, "0")]), Err(Error::Config(_))));
        assert!(matches!(from_pairs(&[(FONT_POLICY, "sometimes")]), Err(Error::Config(_))));
        assert!(from_pairs(&[(MAX_CONCURRENT, "")]).is_ok());
    }
}
