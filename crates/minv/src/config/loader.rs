use std::path::Path;

use crate::config::schema::{CollectionConfig, Settings, TASK_MODULES};
use crate::error::ConfigError;
use crate::inventory::record::RecordField;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut settings = load_settings_from_str(&content)?;
    settings.source_path = Some(path.to_path_buf());
    Ok(settings)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    match (&settings.daemon.socket_path, settings.daemon.port) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Validation {
                message: "daemon.socket_path and daemon.port are mutually exclusive".to_string(),
            })
        }
        (None, None) => {
            return Err(ConfigError::Validation {
                message: "one of daemon.socket_path or daemon.port is required".to_string(),
            })
        }
        _ => {}
    }

    if settings.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be > 0".to_string(),
        });
    }

    if settings.ingest.chunk_size == 0 {
        return Err(ConfigError::Validation {
            message: "ingest.chunk_size must be > 0".to_string(),
        });
    }

    if settings.task_modules.is_empty() {
        return Err(ConfigError::Validation {
            message: "task_modules must not be empty".to_string(),
        });
    }

    for module in &settings.task_modules {
        if !TASK_MODULES.contains(&module.as_str()) {
            return Err(ConfigError::UnknownTaskModule(module.clone()));
        }
    }

    Ok(())
}

/// Reads a collection configuration. A missing file yields the defaults.
pub fn load_collection_config<P: AsRef<Path>>(path: P) -> Result<CollectionConfig, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CollectionConfig::default()),
        Err(e) => Err(ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn save_collection_config<P: AsRef<Path>>(
    path: P,
    config: &CollectionConfig,
) -> Result<(), ConfigError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Returns every problem found in a collection configuration.
pub fn check_collection_configuration(config: &CollectionConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.harvest_interval().is_err() {
        errors.push("Invalid harvest_interval setting.".to_string());
    }
    if config.export_interval().is_err() {
        errors.push("Invalid export_interval setting.".to_string());
    }

    let mappings = std::iter::once(("metadata_mapping".to_string(), &config.metadata_mapping))
        .chain(
            config
                .location_mappings
                .iter()
                .map(|(url, mapping)| (format!("location_mappings.{}", url), mapping)),
        );

    for (section, mapping) in mappings {
        let unknown: Vec<&str> = mapping
            .keys()
            .filter(|target| RecordField::from_name(target).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            errors.push(format!("Invalid [{}] entries: {}", section, unknown.join(", ")));
        }
        if !mapping.contains_key("filename") {
            errors.push(format!("[{}] has no 'filename' entry", section));
        }
    }

    errors
}
