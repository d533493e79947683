//! Config file handling for `~/.prevdesk/config.json`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ReconcileError;
use crate::types::ReconcileConfig;

/// Get the canonical config file path (~/.prevdesk/config.json)
pub fn config_path() -> Result<PathBuf, ReconcileError> {
    let home = dirs::home_dir()
        .ok_or_else(|| ReconcileError::Configuration("Could not find home directory".into()))?;
    Ok(home.join(".prevdesk").join("config.json"))
}

/// Load configuration from ~/.prevdesk/config.json
///
/// A missing file means defaults. A present but unreadable or invalid file is
/// an error.
pub fn load_config() -> Result<ReconcileConfig, ReconcileError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<ReconcileConfig, ReconcileError> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(ReconcileConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ReconcileError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let config: ReconcileConfig = serde_json::from_str(&content).map_err(|e| {
        ReconcileError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &ReconcileConfig) -> Result<(), ReconcileError> {
    let unit = |name: &str, value: f64| {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ReconcileError::Configuration(format!(
                "{name} must be between 0 and 1, got {value}"
            )))
        }
    };
    unit("highImpactMissingRatio", config.high_impact_missing_ratio)?;
    unit("employerMatchThreshold", config.employer_match_threshold)?;

    if config.min_wage_ratio < 0.0 || config.min_meaningful_remuneration < 0.0 {
        return Err(ReconcileError::Configuration(
            "remuneration floors cannot be negative".into(),
        ));
    }
    if config.high_impact_min_missing_months == 0 {
        return Err(ReconcileError::Configuration(
            "highImpactMinMissingMonths must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Create or update the config file at `path`.
///
/// Loads the current file (or defaults), applies the mutator, validates, and
/// writes the result pretty-printed, creating the parent directory if needed.
pub fn create_or_update_config(
    path: &Path,
    mutator: impl FnOnce(&mut ReconcileConfig),
) -> Result<ReconcileConfig, ReconcileError> {
    let mut config = load_config_from(path)?;
    mutator(&mut config);
    validate(&config)?;

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                ReconcileError::Configuration(format!("Failed to create config dir: {}", e))
            })?;
        }
    }

    let content = serde_json::to_string_pretty(&config).map_err(|e| {
        ReconcileError::Configuration(format!("Failed to serialize config: {}", e))
    })?;
    fs::write(path, content)
        .map_err(|e| ReconcileError::Configuration(format!("Failed to write config: {}", e)))?;

    log::info!("Config written to {}", path.display());
    Ok(config)
}
