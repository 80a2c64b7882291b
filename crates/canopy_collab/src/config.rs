//! Session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CollabError, Result};

/// Per-session settings.
///
/// Every field has a default, so an empty TOML document is a valid config:
///
/// ```toml
/// name = "Ada"
/// color = "#e11d48"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Label shown next to this peer's cursor.
    pub name: String,
    /// CSS color of this peer's cursor.
    pub color: String,
    /// Name of the root shared type in the document.
    pub root_name: String,
    /// Origin attached to transactions this session writes.
    pub origin: String,
    /// Drop selection rectangles spanning the whole editable width.
    pub suppress_full_width_rects: bool,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            name: "Anonymous".to_string(),
            color: "#3b82f6".to_string(),
            root_name: "root".to_string(),
            origin: "canopy-local".to_string(),
            suppress_full_width_rects: true,
        }
    }
}

impl CollabConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CollabError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Builder-style override of the cursor label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder-style override of the cursor color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = CollabConfig::from_toml_str("").unwrap();
        assert_eq!(config, CollabConfig::default());
        assert_eq!(config.root_name, "root");
        assert!(config.suppress_full_width_rects);
    }

    #[test]
    fn test_partial_override() {
        let config = CollabConfig::from_toml_str("name = \"Ada\"\ncolor = \"#e11d48\"").unwrap();
        assert_eq!(config.name, "Ada");
        assert_eq!(config.color, "#e11d48");
        assert_eq!(config.origin, "canopy-local");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root_name = \"body\"").unwrap();
        writeln!(file, "suppress_full_width_rects = false").unwrap();

        let config = CollabConfig::load(file.path()).unwrap();
        assert_eq!(config.root_name, "body");
        assert!(!config.suppress_full_width_rects);
    }

    #[test]
    fn test_load_errors() {
        let missing = CollabConfig::load("/definitely/not/here.toml");
        assert!(matches!(missing, Err(CollabError::Io { .. })));

        let invalid = CollabConfig::from_toml_str("name = [");
        assert!(matches!(invalid, Err(CollabError::Config(_))));
    }
}
