//! JSON configuration files describing how to disassemble an executable.
//!
//! A config file has four recognized top-level keys: `config` (image layout), `symbols`,
//! `sections` and `objects`. Unknown fields are tolerated on load and preserved on save.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Image layout values under the `config` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageConfig {
    #[serde(rename = "codealign")]
    pub code_alignment: u32,
    #[serde(rename = "dataalign")]
    pub data_alignment: u32,
    #[serde(rename = "codepadding")]
    pub code_padding: u8,
    #[serde(rename = "datapadding")]
    pub data_padding: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            code_alignment: 16,
            data_alignment: 16,
            code_padding: 0xcc,
            data_padding: 0x00,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolConfig {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionConfig {
    pub name: String,
    /// `code`, `data` or `unknown`.
    #[serde(rename = "type")]
    pub section_type: String,
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectSectionConfig {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectConfig {
    pub name: String,
    pub sections: Vec<ObjectSectionConfig>,
}

/// The recognized contents of a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ImageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<SymbolConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<ObjectConfig>>,
}

/// Reads and parses a config file. Unrecognized fields are ignored.
pub fn read_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Writes a config file, merging with an existing file if present.
///
/// Recognized keys that already exist in the file are left untouched, so user edits survive a
/// re-dump. Unrecognized keys are carried over unchanged.
pub fn write_config(path: &Path, config: &ConfigFile) -> Result<(), ConfigError> {
    let mut root = match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str::<serde_json::Value>(&text)?,
        Err(_) => serde_json::Value::Object(serde_json::Map::new()),
    };
    if !root.is_object() {
        root = serde_json::Value::Object(serde_json::Map::new());
    }

    let map = root.as_object_mut().expect("checked above");
    let update = serde_json::to_value(config)?;
    if let serde_json::Value::Object(update) = update {
        for (key, value) in update {
            map.entry(key).or_insert(value);
        }
    }

    fs::write(path, format!("{:#}\n", root))?;
    Ok(())
}
