use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{
    normalize_slot_count, DEFAULT_BUILTIN_CHARACTERS, DEFAULT_FORMAT_VERSION, DEFAULT_SLOT_COUNT,
    SAVE_DIR_ENV,
};
use crate::error::ConfigError;
use crate::registry::is_valid_name;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CharacterManifest {
    pub name: String,
    #[serde(default = "default_multi_instance", alias = "multi_instance", rename = "multiInstance")]
    pub multi_instance: bool,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_multi_instance() -> bool {
    true
}

fn default_version() -> String {
    DEFAULT_FORMAT_VERSION.to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    #[serde(rename = "builtinCharacters", alias = "builtin_characters")]
    pub builtin_characters: Vec<String>,
    #[serde(rename = "firstCustomIndex", alias = "first_custom_index")]
    pub first_custom_index: Option<u32>,
    #[serde(rename = "slotCount", alias = "slot_count")]
    pub slot_count: usize,
    pub characters: Vec<CharacterManifest>,
    #[serde(rename = "saveDir", alias = "save_dir")]
    pub save_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            builtin_characters: DEFAULT_BUILTIN_CHARACTERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            first_custom_index: None,
            slot_count: DEFAULT_SLOT_COUNT,
            characters: Vec::new(),
            save_dir: None,
        }
    }
}

impl HostConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.normalized()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// `CHARACTER_SAVE_DIR` wins over the file's `saveDir`.
    pub fn apply_env(mut self) -> Self {
        if let Ok(dir) = std::env::var(SAVE_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.save_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }

    pub fn neutral_name(&self) -> &str {
        self.builtin_characters
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_BUILTIN_CHARACTERS[0])
    }

    /// Never below the number of built-ins, so custom indices cannot shadow them.
    pub fn first_custom_index(&self) -> u32 {
        let builtins = self.builtin_count();
        self.first_custom_index.unwrap_or(builtins).max(builtins)
    }

    fn builtin_count(&self) -> u32 {
        u32::try_from(self.builtin_characters.len()).unwrap_or(u32::MAX)
    }

    fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.builtin_characters.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one built-in character is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .builtin_characters
            .iter()
            .find(|name| !is_valid_name(name))
        {
            return Err(ConfigError::Invalid(format!("invalid built-in name `{bad}`")));
        }
        if let Some(first) = self.first_custom_index {
            if first < self.builtin_count() {
                return Err(ConfigError::Invalid(format!(
                    "firstCustomIndex {first} overlaps the {} built-in characters",
                    self.builtin_characters.len()
                )));
            }
        }
        self.slot_count = normalize_slot_count(Some(self.slot_count as i64));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_object() {
        let config = HostConfig::from_json_str("{}").expect("parse");
        assert_eq!(config.neutral_name(), "Survivor");
        assert_eq!(config.first_custom_index(), 3);
        assert_eq!(config.slot_count, DEFAULT_SLOT_COUNT);
        assert!(config.characters.is_empty());
    }

    #[test]
    fn parses_characters_and_overrides() {
        let raw = r#"{
  "builtinCharacters": ["White", "Yellow"],
  "firstCustomIndex": 10,
  "slotCount": 99,
  "characters": [
    { "name": "Gourmand", "multiInstance": false, "version": "3" },
    { "name": "Pup" }
  ]
}"#;
        let config = HostConfig::from_json_str(raw).expect("parse");
        assert_eq!(config.neutral_name(), "White");
        assert_eq!(config.first_custom_index(), 10);
        assert_eq!(config.slot_count, 32);
        assert_eq!(
            config.characters,
            vec![
                CharacterManifest {
                    name: "Gourmand".to_string(),
                    multi_instance: false,
                    version: "3".to_string(),
                },
                CharacterManifest {
                    name: "Pup".to_string(),
                    multi_instance: true,
                    version: "1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn rejects_missing_or_invalid_builtins() {
        assert!(matches!(
            HostConfig::from_json_str(r#"{"builtinCharacters": []}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_json_str(r#"{"builtinCharacters": ["bad:name"]}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HostConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn first_custom_index_must_not_overlap_builtins() {
        assert!(matches!(
            HostConfig::from_json_str(r#"{"firstCustomIndex": 1}"#),
            Err(ConfigError::Invalid(_))
        ));
        let config = HostConfig::from_json_str(r#"{"firstCustomIndex": 3}"#).expect("parse");
        assert_eq!(config.first_custom_index(), 3);

        let direct = HostConfig {
            first_custom_index: Some(0),
            ..HostConfig::default()
        };
        assert_eq!(direct.first_custom_index(), 3);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join(format!("character-roster-missing-{}.json", std::process::id()));
        assert!(matches!(HostConfig::load(&path), Err(ConfigError::Io(_))));
    }
}
