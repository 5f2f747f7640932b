// Compiler settings, read from an optional TOML file.
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Flash available to the sketch on an Arduino Micro (32 KiB minus the 4 KiB bootloader).
pub const PROGMEM_CEILING: usize = 28672;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// PROGMEM budget in bytes
    pub progmem_ceiling: usize,
    /// Alignment boundary used by the memory estimate
    pub word_size: usize,
    /// Usage (in percent of the budget) from which the estimate is flagged
    pub warn_percent: u8,
    /// Sketch template replacing the built-in one
    pub template: Option<PathBuf>,
    /// Refuse to export invalid entities
    pub validate: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            progmem_ceiling: PROGMEM_CEILING,
            word_size: 2,
            warn_percent: 80,
            template: None,
            validate: true,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use crate::config::*;
    use crate::error::Error;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = CompilerConfig::from_toml_str("warn_percent = 90\ntemplate = \"my.cpp\"").unwrap();
        assert_eq!(config.warn_percent, 90);
        assert_eq!(config.template, Some(PathBuf::from("my.cpp")));
        assert_eq!(config.progmem_ceiling, 28672);
        assert!(config.validate);
        assert_eq!(CompilerConfig::from_toml_str("").unwrap(), CompilerConfig::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            CompilerConfig::from_toml_str("ceiling = 1"),
            Err(Error::Config(_))
        ));
    }
}
