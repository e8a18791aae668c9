use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CompressorPaths {
    pub compressor_home: PathBuf,
    pub config_file: PathBuf,
    pub settings_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<CompressorPaths> {
    let compressor_home = match env::var("COMPRESSOR_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".aistudio-compressor"),
    };

    let config_file = env_or_default_path(
        "COMPRESSOR_CONFIG_PATH",
        compressor_home.join("compressor.toml"),
    );
    let settings_file = env_or_default_path(
        "COMPRESSOR_SETTINGS_PATH",
        compressor_home.join("settings.json"),
    );

    Ok(CompressorPaths {
        compressor_home,
        config_file,
        settings_file,
    })
}
