//! Core library for the FirScript backtesting script runtime. Implements
//! parsing and validation of strategy/indicator/library scripts, isolated
//! execution contexts over a restricted builtin scope, and lazy script
//! importing with cycle detection.

pub mod ast;
pub mod builtins;
pub mod context;
pub mod diagnostics;
pub mod environment;
pub mod importer;
pub mod lexer;
pub mod namespaces;
pub mod parser;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod validator;
pub mod value;

pub use context::ExecutionContext;
pub use diagnostics::{Result, ScriptEngineError, SourceSpan};
pub use importer::Importer;
pub use registry::{Namespace, NamespaceRegistry, SharedMap};
pub use script::{Script, ScriptKind, ScriptMetadata};
pub use validator::ScriptParser;
pub use value::{Value, ValueKind};
