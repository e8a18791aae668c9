use anyhow::Result;
use std::path::Path;

use crate::commands::{CommandReport, read_text};
use aistudio_compressor::compressor::fingerprint::Fingerprint;
use aistudio_compressor::compressor::paths::resolve_paths;
use aistudio_compressor::compressor::settings::{Settings, SettingsPatch, SettingsStore};

fn store() -> Result<SettingsStore> {
    Ok(SettingsStore::from_paths(&resolve_paths()?))
}

fn describe(report: &mut CommandReport, store: &SettingsStore, settings: &Settings) {
    report.detail(format!("settings_file={}", store.path().display()));
    report.detail(format!("tail_percent={}", settings.tail_percent));
    report.detail(format!("tail_min_chars={}", settings.tail_min_chars));
    report.detail(format!(
        "snapshot_regex={}",
        settings.snapshot_pattern().unwrap_or("(none)")
    ));
    report.detail(format!(
        "compress_prompt_chars={}",
        settings.effective_prompt().chars().count()
    ));
    report.detail(format!(
        "fingerprint={}",
        Fingerprint::from_prompt(settings.effective_prompt()).snippet()
    ));
}

pub fn show() -> Result<CommandReport> {
    let store = store()?;
    let mut report = CommandReport::new("settings-show");
    let settings = store.load();
    describe(&mut report, &store, &settings);
    Ok(report)
}

pub fn reset() -> Result<CommandReport> {
    let store = store()?;
    let mut report = CommandReport::new("settings-reset");
    let settings = store.reset()?;
    describe(&mut report, &store, &settings);
    Ok(report)
}

pub struct SetOptions<'a> {
    pub tail_percent: Option<f64>,
    pub tail_min_chars: Option<u64>,
    pub snapshot_regex: Option<String>,
    pub prompt_file: Option<&'a Path>,
}

pub fn set(options: SetOptions<'_>) -> Result<CommandReport> {
    let store = store()?;
    let mut report = CommandReport::new("settings-set");

    let compress_prompt = match options.prompt_file {
        Some(path) => Some(read_text(path)?),
        None => None,
    };
    let patch = SettingsPatch {
        compress_prompt,
        snapshot_regex: options.snapshot_regex,
        tail_percent: options.tail_percent,
        tail_min_chars: options.tail_min_chars,
    };
    if patch.is_empty() {
        report.issue("no settings provided; pass at least one option");
        return Ok(report);
    }
    if let Err(err) = patch.validate() {
        report.issue(format!("{} {err}", err.code().as_str()));
        return Ok(report);
    }

    let settings = store.update(&patch)?;
    describe(&mut report, &store, &settings);
    Ok(report)
}
