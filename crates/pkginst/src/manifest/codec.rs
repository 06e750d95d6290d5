//! Reading and writing composer.json documents without losing unknown content.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{InstallError, Result};

const DEFAULT_INDENT: &str = "    ";

/// A parsed composer.json: an ordered JSON object plus the indentation it was written with.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    root: Map<String, Value>,
    indent: String,
}

impl ManifestDocument {
    pub fn new() -> Self {
        Self {
            root: Map::new(),
            indent: DEFAULT_INDENT.to_string(),
        }
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.root
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn indent(&self) -> &str {
        &self.indent
    }

    pub fn set_indent(&mut self, indent: impl Into<String>) {
        self.indent = indent.into();
    }
}

impl Default for ManifestDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a manifest. The top level must be a JSON object.
pub fn parse(bytes: &[u8]) -> Result<ManifestDocument> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| InstallError::MalformedManifest {
        reason: e.to_string(),
    })?;

    let Value::Object(root) = value else {
        return Err(InstallError::MalformedManifest {
            reason: "top-level value is not an object".to_string(),
        });
    };

    Ok(ManifestDocument {
        root,
        indent: detect_indent(bytes),
    })
}

/// Pretty-print a manifest with its own indentation and a trailing newline.
///
/// serde_json never escapes `/`, so path repository urls stay readable.
pub fn serialize(doc: &ManifestDocument) -> Vec<u8> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(doc.indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);

    // Writing a Map into a Vec cannot fail: keys are strings and there is no I/O.
    if doc.root.serialize(&mut serializer).is_err() {
        out.clear();
        out.extend_from_slice(b"{}");
    }

    out.push(b'\n');
    out
}

/// Indentation of the first indented line, defaulting to four spaces.
fn detect_indent(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);

    for line in text.lines().skip(1) {
        let indent: String = line
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();

        if indent.is_empty() || indent.len() == line.len() {
            continue;
        }

        if indent.starts_with('\t') {
            return "\t".to_string();
        }
        return indent;
    }

    DEFAULT_INDENT.to_string()
}
