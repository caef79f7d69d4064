//! Declarative structural schema for the assembling document.
//!
//! The document grammar is small enough to describe as a flat table of
//! elements, their allowed attributes and their allowed children. The table
//! ships built-in; a JSON sidecar file can override it per deployment. When
//! neither strict source is available the parser falls back to lenient mode
//! (unknown elements are skipped with a warning instead of rejected).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable pointing at the directory holding the schema file.
pub const SCHEMA_DIR_ENV: &str = "DMA_SCHEMA_DIR";
/// File name of the schema sidecar.
pub const SCHEMA_FILE_NAME: &str = "assembling.schema.json";

/// Constraints for one element of the document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementRule {
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Element-name-keyed grammar of the assembling document.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSchema {
    pub elements: HashMap<String, ElementRule>,
}

impl DocumentSchema {
    /// The grammar the parser was written against.
    pub fn builtin() -> Self {
        let mut elements = HashMap::new();
        let mut rule = |name: &str, attributes: &[&str], children: &[&str]| {
            elements.insert(
                name.to_string(),
                ElementRule {
                    attributes: attributes.iter().map(|s| s.to_string()).collect(),
                    children: children.iter().map(|s| s.to_string()).collect(),
                },
            );
        };
        rule(
            "assembling",
            &[],
            &[
                "macroConnection",
                "singleAssociation",
                "multipleAssociation",
                "dynamicAutomaton",
            ],
        );
        rule("macroConnection", &["id"], &["connection"]);
        rule("connection", &["var1", "var2"], &[]);
        rule(
            "singleAssociation",
            &["id"],
            &["bus", "line", "tfo", "shunt", "generator"],
        );
        rule("bus", &["voltageLevel"], &[]);
        rule("line", &["name"], &[]);
        rule("tfo", &["name"], &[]);
        // "shunt" is name-keyed under a single association and
        // voltage-level-keyed under a multiple association
        rule("shunt", &["name", "voltageLevel"], &[]);
        rule("generator", &["name"], &[]);
        rule("multipleAssociation", &["id"], &["shunt"]);
        rule("dynamicAutomaton", &["id", "lib"], &["macroConnect"]);
        rule("macroConnect", &["macroConnection", "id"], &[]);
        DocumentSchema { elements }
    }

    /// Whether an element name is part of the grammar.
    pub fn knows_element(&self, name: &str) -> bool {
        self.elements.contains_key(name)
    }

    /// Whether an attribute is allowed on the given element.
    pub fn allows_attribute(&self, element: &str, attribute: &str) -> bool {
        self.elements
            .get(element)
            .map(|r| r.attributes.iter().any(|a| a == attribute))
            .unwrap_or(false)
    }

    /// Whether `child` may nest directly under `parent`.
    pub fn allows_child(&self, parent: &str, child: &str) -> bool {
        self.elements
            .get(parent)
            .map(|r| r.children.iter().any(|c| c == child))
            .unwrap_or(false)
    }

    /// Candidate path of the sidecar schema for a document at `document_path`:
    /// the directory named by `DMA_SCHEMA_DIR` when set, the document's own
    /// directory otherwise.
    pub fn sidecar_path(document_path: &Path) -> PathBuf {
        let dir = std::env::var_os(SCHEMA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| document_path.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        dir.join(SCHEMA_FILE_NAME)
    }

    /// Load the sidecar schema next to a document. `None` when the file does
    /// not exist (the caller downgrades to lenient parsing).
    pub fn locate(document_path: &Path) -> Option<Self> {
        let path = Self::sidecar_path(document_path);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(schema) => Some(schema),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "unreadable schema sidecar, skipping validation");
                None
            }
        }
    }
}
