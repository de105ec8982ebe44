use std::fmt;

use indexmap::{IndexMap, IndexSet};

/// Classification of a script, derived from its syntax tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Strategy,
    Indicator,
    Library,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ScriptKind::Strategy => "strategy",
            ScriptKind::Indicator => "indicator",
            ScriptKind::Library => "library",
        };
        write!(f, "{text}")
    }
}

/// Metadata derived from a successful parse.
#[derive(Debug, Clone)]
pub struct ScriptMetadata {
    /// Caller-supplied identifier, typically the registration name.
    pub id: String,
    /// Optional descriptive name; defaults to the id.
    pub name: Option<String>,
    pub kind: ScriptKind,
    /// Top-level `export` assignments; always contains `export` for a library.
    pub exports: IndexSet<String>,
    /// Local alias to imported script name, for statically recognizable
    /// `alias = import_script("name")` bindings.
    pub imports: IndexMap<String, String>,
}

/// An immutable pair of source text plus derived metadata. Produced only by
/// a successful parse and validation.
#[derive(Debug, Clone)]
pub struct Script {
    source: String,
    metadata: ScriptMetadata,
}

impl Script {
    pub(crate) fn new(source: String, metadata: ScriptMetadata) -> Self {
        Self { source, metadata }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or(&self.metadata.id)
    }

    pub fn kind(&self) -> ScriptKind {
        self.metadata.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &ScriptMetadata {
        &self.metadata
    }
}
