use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

/// Schemas compiled into the binary, used when no `contracts/` directory is found.
static BUILTIN_SCHEMAS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut schemas = BTreeMap::new();
    schemas.insert(
        "engine",
        include_str!("../../../contracts/config/engine-config.v1.json"),
    );
    schemas
});

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Schema not found for config: {name}")]
    SchemaNotFound { name: String },

    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed: {}", summarize(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("JSON parsing failed: {message}")]
    JsonParsingFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::SchemaNotFound { .. } => "CONFIG_SCHEMA_NOT_FOUND",
            ConfigError::ConfigFileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
            ConfigError::SchemaCompilationFailed { .. } => "CONFIG_SCHEMA_INVALID",
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED",
            ConfigError::JsonParsingFailed { .. } => "CONFIG_JSON_INVALID",
            ConfigError::IoError { .. } => "CONFIG_IO_ERROR",
        }
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.json_pointer.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.json_pointer, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

pub struct ConfigManager {
    contracts_dir: Option<PathBuf>,
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            contracts_dir: Self::find_contracts_dir(),
            config_dir: Self::find_config_dir(),
        }
    }

    pub fn with_dirs(contracts_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            contracts_dir: Some(contracts_dir),
            config_dir,
        }
    }

    /// Only the schemas compiled into the binary; config files come from `config_dir`.
    pub fn builtin(config_dir: PathBuf) -> Self {
        Self {
            contracts_dir: None,
            config_dir,
        }
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    fn find_contracts_dir() -> Option<PathBuf> {
        // Check environment variable first
        if let Ok(contracts_dir) = std::env::var("CONTRACTS_DIR") {
            let path = PathBuf::from(contracts_dir);
            if path.is_dir() {
                return Some(path);
            }
        }

        // Fall back to searching up the directory tree
        let mut current = std::env::current_dir().ok()?;
        loop {
            let contracts_path = current.join("contracts");
            if contracts_path.join("config").is_dir() {
                return Some(contracts_path);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    fn find_config_dir() -> PathBuf {
        if let Ok(config_dir) = std::env::var("SBOX_CONFIG_DIR") {
            return PathBuf::from(config_dir);
        }
        dirs::config_dir()
            .map(|dir| dir.join("sbox"))
            .unwrap_or_else(|| PathBuf::from(".sbox/config"))
    }

    #[instrument(skip(self))]
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        debug!("Loading config: {}", name);

        let config_value = self.load_config_file(name)?;
        self.validate_config(name, &config_value)?;

        serde_json::from_value(config_value).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub fn validate_config_file(&self, name: &str, config_path: &Path) -> Result<(), ConfigError> {
        debug!("Validating config file: {:?} for: {}", config_path, name);

        if !config_path.exists() {
            return Err(ConfigError::ConfigFileNotFound {
                path: config_path.to_string_lossy().to_string(),
            });
        }

        let config_value = read_json(config_path)?;
        self.validate_config(name, &config_value)
    }

    #[instrument(skip(self, config_value))]
    pub fn validate_config_value(&self, name: &str, config_value: &Value) -> Result<(), ConfigError> {
        self.validate_config(name, config_value)
    }

    fn load_config_file(&self, name: &str) -> Result<Value, ConfigError> {
        let config_path = self.config_dir.join(format!("{}.json", name));

        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            debug!("Config file not found, loading defaults from schema");
            return self.load_default_config(name);
        }

        // Fields the file leaves out fall back to schema defaults.
        let mut value = read_json(&config_path)?;
        if let (Value::Object(map), Value::Object(defaults)) =
            (&mut value, self.load_default_config(name)?)
        {
            for (key, default_value) in defaults {
                map.entry(key).or_insert(default_value);
            }
        }
        Ok(value)
    }

    fn load_default_config(&self, name: &str) -> Result<Value, ConfigError> {
        let schema_value = self.load_schema(name)?;

        let mut default_config = serde_json::Map::new();

        if let Some(properties) = schema_value.get("properties").and_then(|p| p.as_object()) {
            for (key, property) in properties {
                if let Some(default_value) = property.get("default") {
                    default_config.insert(key.clone(), default_value.clone());
                }
            }
        }

        let default_config_value = Value::Object(default_config);

        // Schema defaults must themselves satisfy the schema
        self.validate_config(name, &default_config_value)?;

        debug!("Loaded default config: {}", default_config_value);
        Ok(default_config_value)
    }

    fn validate_config(&self, name: &str, config: &Value) -> Result<(), ConfigError> {
        let schema = self.get_compiled_schema(name)?;
        let validation_result = schema.validate(config);

        if let Err(errors) = validation_result {
            let validation_errors: Vec<ValidationError> = errors
                .map(|error| ValidationError {
                    json_pointer: error.instance_path.to_string(),
                    message: error.to_string(),
                    schema_path: error.schema_path.to_string(),
                })
                .collect();

            return Err(ConfigError::ValidationFailed {
                errors: validation_errors,
            });
        }

        Ok(())
    }

    fn load_schema(&self, name: &str) -> Result<Value, ConfigError> {
        if let Some(dir) = &self.contracts_dir {
            let schema_path = dir.join("config").join(format!("{}-config.v1.json", name));
            if schema_path.exists() {
                return read_json(&schema_path);
            }
        }

        let builtin = BUILTIN_SCHEMAS
            .get(name)
            .ok_or_else(|| ConfigError::SchemaNotFound {
                name: name.to_string(),
            })?;
        serde_json::from_str(builtin).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })
    }

    fn get_compiled_schema(&self, name: &str) -> Result<JSONSchema, ConfigError> {
        let schema_value = self.load_schema(name)?;

        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| ConfigError::SchemaCompilationFailed {
                message: e.to_string(),
            })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;

    serde_json::from_str(&content).map_err(|e| ConfigError::JsonParsingFailed {
        message: e.to_string(),
    })
}
