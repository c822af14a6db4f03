// Language registry
// Maps friendly language names to sandbox runtimes. Read-only once built.

use crate::config::ConfigError;
use crate::types::{Language, Runtime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub name: String,
    pub version: String,
    /// Sandbox runtime id, defaults to the language key
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageEntry>,
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    runtimes: HashMap<Language, Runtime>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageRegistry {
    /// Registry with the built-in runtime table only
    pub fn builtin() -> Self {
        let runtimes = Language::ALL
            .iter()
            .map(|lang| (*lang, Runtime::builtin(*lang)))
            .collect();
        Self { runtimes }
    }

    /// Built-in table overridden by the entries of a languages.json file.
    /// A missing file is not an error.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin();

        if !config_path.exists() {
            debug!(path = %config_path.display(), "No language config file, using built-in runtimes");
            return Ok(registry);
        }

        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let file: LanguagesFile = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;

        for entry in file.languages {
            let language = Language::from_name(&entry.name)
                .ok_or_else(|| ConfigError::UnknownLanguage(entry.name.clone()))?;
            let builtin = Runtime::builtin(language);
            registry.runtimes.insert(
                language,
                Runtime {
                    language,
                    runtime: entry.runtime.unwrap_or(builtin.runtime),
                    version: entry.version,
                    file_extension: entry
                        .file_extension
                        .map(|ext| ext.trim_start_matches('.').to_string())
                        .unwrap_or(builtin.file_extension),
                },
            );
        }

        Ok(registry)
    }

    pub fn get(&self, language: Language) -> Runtime {
        self.runtimes
            .get(&language)
            .cloned()
            .unwrap_or_else(|| Runtime::builtin(language))
    }

    /// Resolve a friendly name to a runtime, falling back to the default
    /// language when the name is not recognised
    pub fn resolve(&self, name: &str) -> Runtime {
        let language = match Language::from_name(name) {
            Some(language) => language,
            None => {
                let fallback = Language::default();
                warn!(requested = name, fallback = %fallback, "Unknown language, using default runtime");
                fallback
            }
        };
        self.get(language)
    }

    /// All runtimes, in a stable order
    pub fn list(&self) -> Vec<Runtime> {
        Language::ALL.iter().map(|lang| self.get(*lang)).collect()
    }
}
