use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use aistudio_compressor::compressor::config::load_config;
use aistudio_compressor::compressor::paths::resolve_paths;

include!(concat!(env!("OUT_DIR"), "/compressor_env_allowlist.rs"));

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build={}", env!("BUILD_UUID")));
    report.detail(format!("compressor_home={}", paths.compressor_home.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));
    report.detail(format!("settings_file={}", paths.settings_file.display()));
    if !paths.settings_file.exists() {
        report.detail("settings_file_state=missing (defaults in effect)");
    }

    match load_config(&paths) {
        Ok(config) => {
            let timing = &config.timing;
            report.detail(format!("host_origin={}", config.host.origin));
            report.detail(format!(
                "timing poll={}ms branch_menu={}ms prompt_change={}ms rehook={}ms run={}ms",
                timing.poll_interval_ms,
                timing.branch_menu_timeout_ms,
                timing.prompt_change_timeout_ms,
                timing.rehook_interval_ms,
                timing.run_timeout_ms
            ));
            report.detail(format!(
                "request_timeout={}s",
                config.host.request_timeout_secs
            ));
        }
        Err(err) => report.issue(format!("config invalid: {err:#}")),
    }

    let set_vars = GENERATED_COMPRESSOR_ENV_ALLOWLIST
        .iter()
        .filter(|key| env::var_os(key).is_some())
        .copied()
        .collect::<Vec<_>>();
    if set_vars.is_empty() {
        report.detail("env_overrides=none");
    } else {
        report.detail(format!("env_overrides={}", set_vars.join(",")));
    }

    Ok(report)
}
