/**
 * App Directories Module
 *
 * All client data is stored under:
 * - macOS: ~/Library/Application Support/com.framenote/
 * - Windows: %APPDATA%/com.framenote/
 * - Linux: ~/.local/share/com.framenote/
 */
use std::path::{Path, PathBuf};

/// Bundle identifier for the client
pub const BUNDLE_ID: &str = "com.framenote";

/// Get the app data directory
pub fn get_app_data_dir() -> Result<PathBuf, String> {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return Ok(home.join("Library/Application Support").join(BUNDLE_ID));
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return Ok(PathBuf::from(appdata).join(BUNDLE_ID));
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if let Some(data) = dirs::data_dir() {
            return Ok(data.join(BUNDLE_ID));
        }
    }

    Err("unable to determine the app data directory".to_string())
}

/// Returns: {app_data_dir}/config.toml
pub fn get_config_path() -> Result<PathBuf, String> {
    Ok(get_app_data_dir()?.join("config.toml"))
}

/// Returns: {app_data_dir}/framenote.db
pub fn get_database_path() -> Result<PathBuf, String> {
    Ok(get_app_data_dir()?.join("framenote.db"))
}

/// Returns: {app_data_dir}/downloads/
pub fn get_downloads_dir() -> Result<PathBuf, String> {
    Ok(get_app_data_dir()?.join("downloads"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir_exists(path: &Path) -> Result<(), String> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(|e| format!("failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Ensure the parent directory of a file path exists
pub fn ensure_parent_exists(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
        _ => Ok(()),
    }
}
