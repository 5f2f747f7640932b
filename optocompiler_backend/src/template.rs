//! Substitution of generated declarations into the sketch template.
//!
//! The template is an ordinary Arduino sketch in which some lines start with a marker comment,
//! optionally followed by a note on what the marker stands for:
//!
//! ```text
//!     // OPTOPLATE_CONFIG_HARDWARE
//!     // OPTOPLATE_CONFIG_DONE_AFTER : static const uint32_t s_done_after = N;
//! ```
//!
//! [`Template::populate`] replaces each such line as a whole by the declarations generated for
//! the marker's name (`HARDWARE` and `DONE_AFTER` above). Every replacement line is indented like the marker, so code
//! substituted into a function body stays aligned. Markers without a replacement are left in
//! place.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const BUILTIN_TEMPLATE: &str = include_str!("../resources/optoplate_template.cpp");

const MARKER_PATTERN: &str = r"^(?P<indent>[ \t]*)// OPTOPLATE_CONFIG_(?P<tag>[A-Z0-9_]+)\b.*$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
    origin: Option<PathBuf>,
}

impl Default for Template {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Template {
    /// The sketch shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            text: BUILTIN_TEMPLATE.to_string(),
            origin: None,
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            origin: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::TemplateIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded template {:?}", path);
        Ok(Self {
            text,
            origin: Some(path.to_path_buf()),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// File the template was read from, `None` for the built-in one.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Marker names in order of appearance.
    pub fn markers(&self) -> Result<Vec<String>> {
        let re = Regex::new(MARKER_PATTERN)?;
        Ok(self
            .text
            .lines()
            .filter_map(|line| re.captures(line))
            .map(|caps| caps["tag"].to_string())
            .collect())
    }

    /// Replaces every marker line named in `replacements`.
    ///
    /// # Examples
    ///
    /// ```
    /// use indexmap::IndexMap;
    /// use optocompiler_backend::template::Template;
    ///
    /// let template = Template::from_text("void setup()\n{\n    // OPTOPLATE_CONFIG_HARDWARE\n}\n");
    /// let mut replacements = IndexMap::new();
    /// replacements.insert("HARDWARE", "pinMode(11, OUTPUT);\nanalogWrite(11, 100);".to_string());
    /// assert_eq!(
    ///     template.populate(&replacements).unwrap(),
    ///     "void setup()\n{\n    pinMode(11, OUTPUT);\n    analogWrite(11, 100);\n}\n"
    /// );
    /// ```
    pub fn populate(&self, replacements: &IndexMap<&str, String>) -> Result<String> {
        let re = Regex::new(MARKER_PATTERN)?;
        let mut populated = String::with_capacity(self.text.len());
        let mut seen = Vec::new();

        for line in self.text.split_inclusive('\n') {
            let content = line.trim_end_matches(['\n', '\r']);
            let ending = &line[content.len()..];
            let Some(caps) = re.captures(content) else {
                populated.push_str(line);
                continue;
            };
            let tag = &caps["tag"];
            let Some(replacement) = replacements.get(tag) else {
                warn!("no replacement for template marker {}", tag);
                populated.push_str(line);
                continue;
            };
            let indent = &caps["indent"];
            let indented: Vec<String> = replacement
                .lines()
                .map(|l| {
                    if l.is_empty() {
                        String::new()
                    } else {
                        format!("{}{}", indent, l)
                    }
                })
                .collect();
            populated.push_str(&indented.join("\n"));
            populated.push_str(ending);
            seen.push(tag.to_string());
        }

        for tag in replacements.keys() {
            if !seen.iter().any(|s| s == tag) {
                warn!("template has no marker for {}", tag);
            }
        }
        Ok(populated)
    }
}

#[cfg(test)]
mod test {
    use indexmap::IndexMap;

    use crate::error::Error;
    use crate::template::*;

    #[test]
    fn builtin_has_all_markers() {
        let mut markers = Template::builtin().markers().unwrap();
        markers.sort();
        assert_eq!(
            markers,
            vec![
                "CORRECTION_FACTORS",
                "DONE_AFTER",
                "HARDWARE",
                "N_ADVANCED_ARR_SIZE",
                "N_COLORS",
                "PERFORM_INTENSITY_CORRECTION",
                "PROGRAMS",
                "STEPS",
                "WELLS",
            ]
        );
    }

    #[test]
    fn indentation_and_untouched_lines() {
        let template = Template::from_text(
            "a\n        // OPTOPLATE_CONFIG_X\n// OPTOPLATE_CONFIG_UNKNOWN\n// OPTOPLATE_CONFIG_Y",
        );
        let mut replacements = IndexMap::new();
        replacements.insert("X", "one\n\ntwo".to_string());
        replacements.insert("Y", "last".to_string());
        assert_eq!(
            template.populate(&replacements).unwrap(),
            "a\n        one\n\n        two\n// OPTOPLATE_CONFIG_UNKNOWN\nlast"
        );
    }

    #[test]
    fn trailing_text_after_marker() {
        let template = Template::from_text(
            "void loop()\n{\n    // OPTOPLATE_CONFIG_DONE_AFTER : static const uint32_t s_done_after = N;\n}\n",
        );
        assert_eq!(template.markers().unwrap(), vec!["DONE_AFTER"]);
        let mut replacements = IndexMap::new();
        replacements.insert("DONE_AFTER", "static const uint32_t s_done_after = 1000;".to_string());
        assert_eq!(
            template.populate(&replacements).unwrap(),
            "void loop()\n{\n    static const uint32_t s_done_after = 1000;\n}\n"
        );
    }

    #[test]
    fn markers_after_code_are_ignored() {
        let template = Template::from_text("int x; // OPTOPLATE_CONFIG_X\n// OPTOPLATE_CONFIG_XY\n");
        let mut replacements = IndexMap::new();
        replacements.insert("X", "replaced".to_string());
        assert_eq!(
            template.populate(&replacements).unwrap(),
            "int x; // OPTOPLATE_CONFIG_X\n// OPTOPLATE_CONFIG_XY\n"
        );
    }

    #[test]
    fn missing_file() {
        let err = Template::from_path(Path::new("/nonexistent/template.cpp")).unwrap_err();
        assert!(matches!(err, Error::TemplateIo { .. }));
    }
}
