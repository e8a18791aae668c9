use crate::compressor::paths::CompressorPaths;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub branch_menu_timeout_ms: u64,
    pub prompt_change_timeout_ms: u64,
    pub rehook_interval_ms: u64,
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
}

fn default_run_timeout_ms() -> u64 {
    180_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150,
            branch_menu_timeout_ms: 5_000,
            prompt_change_timeout_ms: 15_000,
            rehook_interval_ms: 2_000,
            run_timeout_ms: default_run_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn branch_menu_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_menu_timeout_ms)
    }

    pub fn prompt_change_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_change_timeout_ms)
    }

    /// Period of the lifecycle tick that re-runs hooking and stale-run expiry.
    pub fn rehook_interval(&self) -> Duration {
        Duration::from_millis(self.rehook_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub origin: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    45
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            origin: "https://aistudio.google.com".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompressorConfig {
    pub timing: TimingConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCompressorConfig {
    timing: Option<TimingConfig>,
    host: Option<HostConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &CompressorConfig) -> Result<()> {
    let t = &cfg.timing;
    if t.poll_interval_ms == 0 {
        return Err(anyhow!("invalid poll interval: must be >= 1ms"));
    }
    if t.branch_menu_timeout_ms < t.poll_interval_ms {
        return Err(anyhow!(
            "invalid branch menu timeout: must be >= poll interval"
        ));
    }
    if t.prompt_change_timeout_ms < t.poll_interval_ms {
        return Err(anyhow!(
            "invalid prompt change timeout: must be >= poll interval"
        ));
    }
    if t.rehook_interval_ms == 0 {
        return Err(anyhow!("invalid rehook interval: must be >= 1ms"));
    }
    if t.run_timeout_ms == 0 {
        return Err(anyhow!("invalid run timeout: must be >= 1ms"));
    }
    if cfg.host.request_timeout_secs == 0 {
        return Err(anyhow!("invalid host request timeout: must be >= 1 second"));
    }
    reqwest::Url::parse(&cfg.host.origin)
        .map_err(|err| anyhow!("invalid host origin `{}`: {err}", cfg.host.origin))?;
    Ok(())
}

fn merge_file_config(base: &mut CompressorConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialCompressorConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse compressor config {}: {err}", path.display()))?;
    if let Some(timing) = parsed.timing {
        base.timing = timing;
    }
    if let Some(host) = parsed.host {
        base.host = host;
    }
    Ok(())
}

pub fn load_config(paths: &CompressorPaths) -> Result<CompressorConfig> {
    let mut cfg = CompressorConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;

    cfg.timing.poll_interval_ms =
        env_or_u64("COMPRESSOR_POLL_INTERVAL_MS", cfg.timing.poll_interval_ms);
    cfg.timing.branch_menu_timeout_ms = env_or_u64(
        "COMPRESSOR_BRANCH_MENU_TIMEOUT_MS",
        cfg.timing.branch_menu_timeout_ms,
    );
    cfg.timing.prompt_change_timeout_ms = env_or_u64(
        "COMPRESSOR_PROMPT_CHANGE_TIMEOUT_MS",
        cfg.timing.prompt_change_timeout_ms,
    );
    cfg.timing.rehook_interval_ms =
        env_or_u64("COMPRESSOR_REHOOK_INTERVAL_MS", cfg.timing.rehook_interval_ms);
    cfg.timing.run_timeout_ms = env_or_u64("COMPRESSOR_RUN_TIMEOUT_MS", cfg.timing.run_timeout_ms);
    cfg.host.origin = env_or_string("COMPRESSOR_HOST_ORIGIN", &cfg.host.origin);
    cfg.host.request_timeout_secs = env_or_u64(
        "COMPRESSOR_REQUEST_TIMEOUT_SECS",
        cfg.host.request_timeout_secs,
    );

    validate(&cfg)?;
    Ok(cfg)
}
