use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "integra";
pub const APP_NAME: &str = "integra";

/// Overrides the location of the settings file.
pub const CONFIG_ENV: &str = "INTEGRA_CONFIG";
/// Overrides the object list path stored in the settings.
pub const OBJECT_LIST_ENV: &str = "INTEGRA_OBJECT_LIST";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("settings.json"))
}

/// The findings journal lives next to the settings file.
pub fn journal_path() -> anyhow::Result<PathBuf> {
    let settings = settings_path()?;
    let dir = settings
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    Ok(dir.join("logs").join("findings.log"))
}
