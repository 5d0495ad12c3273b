//! Symbol and edge descriptors for the frozen call graph.
//!
//! Nodes are program symbols (functions, types, interfaces) identified by a
//! stable string id; edges are typed code relationships between two symbol
//! ids. Both carry enough source metadata for the upstream reasoning agent
//! to plan exploration without re-reading source files.

use serde::{Deserialize, Serialize};

/// What kind of program symbol a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Type,
    Interface,
    Variable,
    Constant,
    Module,
}

/// The relationship an edge encodes between two symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Caller -> callee.
    Calls,
    /// Implementor -> interface.
    Implements,
    /// Referencer -> referenced symbol.
    References,
    /// Importer -> imported symbol.
    Imports,
}

/// A half-open source position where an edge was observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Location {
            file: file.into(),
            line,
        }
    }
}

/// Inclusive line span of a symbol's definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Descriptor attached to every graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Unqualified symbol name (e.g. `freeze`, `Handler`).
    pub name: String,
    pub kind: SymbolKind,
    /// Path of the defining source file, if known.
    pub file: String,
    /// Package or module path the symbol belongs to.
    pub package: String,
    pub span: LineRange,
    /// Source language tag (e.g. `"go"`, `"rust"`).
    pub language: String,
}

impl Symbol {
    /// Creates a symbol with the given name and kind; source metadata is
    /// filled in by the `with_*` setters.
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Symbol {
            name: name.into(),
            kind,
            file: String::new(),
            package: String::new(),
            span: LineRange::default(),
            language: String::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_span(mut self, start: u32, end: u32) -> Self {
        self.span = LineRange { start, end };
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// The symbol's package, falling back to the parent directory of its
    /// file when no package was recorded. Used for community labelling.
    pub fn package_or_dir(&self) -> &str {
        if !self.package.is_empty() {
            return &self.package;
        }
        match self.file.rfind('/') {
            Some(pos) => &self.file[..pos],
            None => "",
        }
    }
}

/// A typed edge between two symbol ids.
///
/// Endpoints are ids, not indices: edge records outlive any dense numbering
/// an individual analysis assigns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub location: Location,
}
