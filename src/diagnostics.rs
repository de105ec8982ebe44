use thiserror::Error;

/// Represents a byte span within a script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Maps a byte offset into 1-based line and column numbers.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Returns the text of a 1-based source line with the trailing newline stripped.
pub fn line_text(source: &str, line_no: usize) -> String {
    source
        .lines()
        .nth(line_no.saturating_sub(1))
        .unwrap_or("")
        .to_string()
}

/// A surface-syntax failure produced by the lexer or parser, before a script
/// id is known. The validator and the execution context wrap it into a typed
/// [`ScriptEngineError`].
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub span: SourceSpan,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Unified error type for the FirScript engine. Parse-time variants carry the
/// script id plus 1-based line/column of the offending node; runtime variants
/// carry the display name, the failing line number and the source line text.
#[derive(Debug, Error)]
pub enum ScriptEngineError {
    #[error("{source_id}:{line}:{col}: syntax error: {message}")]
    Parse {
        source_id: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{source_id}:{line}:{col}: cannot determine script kind: {message}")]
    MissingKind {
        source_id: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{source_id}:{line}:{col}: conflicting script kind: {message}")]
    ConflictingKind {
        source_id: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{source_id}:{line}:{col}: {message}")]
    MissingRequiredFunctions {
        source_id: String,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("{source_id}:{line}:{col}: library defines no `export`")]
    NoExports {
        source_id: String,
        line: usize,
        col: usize,
    },

    #[error("{source_id}:{line}:{col}: `export` is assigned more than once")]
    MultipleExports {
        source_id: String,
        line: usize,
        col: usize,
    },

    #[error("{source_id}:{line}:{col}: input declarations are only allowed inside setup()")]
    InvalidInputUsage {
        source_id: String,
        line: usize,
        col: usize,
    },

    #[error("{source_id}:{line}:{col}: top-level assignment to `{name}` is not allowed; declare state inside setup()")]
    StrategyGlobalVariable {
        source_id: String,
        line: usize,
        col: usize,
        name: String,
    },

    #[error("{source_id}:{line}:{col}: strategy functions cannot be used in this script kind")]
    StrategyFunctionInIndicator {
        source_id: String,
        line: usize,
        col: usize,
    },

    #[error("{source_id}:{line}:{col}: `{name}` is a reserved name and cannot be exported or bound")]
    ReservedVariableName {
        source_id: String,
        line: usize,
        col: usize,
        name: String,
    },

    #[error("compilation of `{name}` failed at line {line_no}: {message}")]
    Compilation {
        name: String,
        line_no: usize,
        line_str: String,
        message: String,
    },

    #[error("runtime error in `{name}` at line {line_no}: {message}")]
    ScriptRuntime {
        name: String,
        line_no: usize,
        col_no: usize,
        line_str: String,
        message: String,
    },

    #[error("script `{name}` is not registered")]
    ScriptNotFound { name: String },

    #[error("no main script has been designated")]
    EntrypointNotFound,

    #[error("circular import of `{name}` while resolving `{current}`")]
    CircularImport { name: String, current: String },

    #[error("use of `{builtin}` is not allowed in `{name}` at line {line_no}")]
    NotAllowed {
        name: String,
        builtin: String,
        line_no: usize,
        line_str: String,
    },
}

pub type Result<T> = std::result::Result<T, ScriptEngineError>;

/// Internal fault raised while evaluating script code. The owning
/// execution context maps it onto a typed [`ScriptEngineError`] with line
/// information resolved against the stored source.
#[derive(Debug)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub span: Option<SourceSpan>,
}

#[derive(Debug)]
pub enum EvalErrorKind {
    /// Ordinary runtime fault described by a message.
    Message(String),
    /// A deny-listed builtin was invoked.
    NotAllowed(String),
    /// A typed engine error from a nested call (e.g. `import_script`),
    /// propagated unchanged so the driver sees the most specific type.
    Engine(Box<ScriptEngineError>),
}

impl EvalError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::Message(message.into()),
            span: None,
        }
    }

    pub fn not_allowed(builtin: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::NotAllowed(builtin.into()),
            span: None,
        }
    }

    pub fn engine(error: ScriptEngineError) -> Self {
        Self {
            kind: EvalErrorKind::Engine(Box::new(error)),
            span: None,
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches a span only if none is set, so the innermost location wins.
    pub fn or_span(mut self, span: SourceSpan) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;
