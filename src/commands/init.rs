/*!
 * `remotebuild init`: write a starter configuration document
 */

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, FileConfig};

/// Default document name, matching the `--config` default
pub const DEFAULT_CONFIG_NAME: &str = "config.json";

/// Write [`FileConfig::template`] to `path` in the format its extension picks
///
/// An existing file is left alone unless `force` is set.
pub fn write_starter_config(path: Option<&Path>, force: bool) -> Result<PathBuf, ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME));

    if path.exists() && !force {
        return Err(ConfigError::Write {
            path,
            message: "file already exists (pass --force to overwrite)".to_string(),
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
    }

    FileConfig::template().to_file(&path)?;
    tracing::info!("Wrote starter configuration to {}", path.display());
    Ok(path)
}
