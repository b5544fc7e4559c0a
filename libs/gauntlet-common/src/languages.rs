// Language registry shared by the API, worker and CLI
// Loads and validates config/languages.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_LANGUAGES_PATH: &str = "config/languages.json";

#[derive(Debug, Error)]
pub enum LanguageConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse languages.json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate language '{0}' in languages.json")]
    Duplicate(String),

    #[error("no languages configured in languages.json")]
    Empty,

    #[error("no configuration found for language: {0}")]
    Unknown(String),
}

/// How one language is built and run inside the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    /// File the submission is written to inside the sandbox work dir
    pub source_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_command: Option<String>,
    pub run_command: String,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
}

fn default_cpu_limit() -> f32 {
    0.5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguagesFile {
    pub languages: Vec<LanguageConfig>,
}

/// Registry of configured languages, keyed by lowercase tag
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    configs: BTreeMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    pub fn from_configs(languages: Vec<LanguageConfig>) -> Result<Self, LanguageConfigError> {
        let mut configs = BTreeMap::new();
        for lang in languages {
            let key = lang.name.to_lowercase();
            if configs.insert(key.clone(), lang).is_some() {
                return Err(LanguageConfigError::Duplicate(key));
            }
        }
        if configs.is_empty() {
            return Err(LanguageConfigError::Empty);
        }
        Ok(Self { configs })
    }

    /// Load language configurations from languages.json
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LanguageConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LanguageConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: LanguagesFile = serde_json::from_str(&content)?;
        Self::from_configs(file.languages)
    }

    /// Get configuration for a language tag (case-insensitive)
    pub fn get(&self, language: &str) -> Result<&LanguageConfig, LanguageConfigError> {
        self.configs
            .get(&language.to_lowercase())
            .ok_or_else(|| LanguageConfigError::Unknown(language.to_string()))
    }

    pub fn is_enabled(&self, language: &str) -> bool {
        self.configs.contains_key(&language.to_lowercase())
    }

    /// List all supported languages
    pub fn names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> LanguageConfig {
        LanguageConfig {
            name: "python".to_string(),
            version: "3.12".to_string(),
            image: "python:3.12-slim".to_string(),
            source_file: "main.py".to_string(),
            compile_command: None,
            run_command: "python3 -u main.py".to_string(),
            cpu_limit: 0.5,
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = LanguageRegistry::from_configs(vec![python()]).unwrap();
        assert!(registry.get("Python").is_ok());
        assert!(registry.is_enabled("PYTHON"));
        assert!(matches!(
            registry.get("cobol"),
            Err(LanguageConfigError::Unknown(_))
        ));
    }

    #[test]
    fn test_duplicate_and_empty_rejected() {
        assert!(matches!(
            LanguageRegistry::from_configs(vec![python(), python()]),
            Err(LanguageConfigError::Duplicate(_))
        ));
        assert!(matches!(
            LanguageRegistry::from_configs(vec![]),
            Err(LanguageConfigError::Empty)
        ));
    }

    #[test]
    fn test_shipped_config_parses() {
        let registry = LanguageRegistry::load("../../config/languages.json").unwrap();
        for name in ["python", "javascript", "java", "rust"] {
            assert!(registry.is_enabled(name), "{} missing", name);
        }
        assert!(registry.get("java").unwrap().compile_command.is_some());
    }
}
