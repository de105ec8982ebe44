use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    ast::Stmt,
    builtins,
    diagnostics::{
        line_col, line_text, EvalError, EvalErrorKind, Result, ScriptEngineError,
    },
    environment::Environment,
    parser,
    registry::{self, Namespace},
    runtime::Evaluator,
    value::{Value, ValueKind},
};

/// A prepared restricted scope for one script instance.
///
/// The globals mapping is assembled in layers: the restricted builtin set
/// first, then the namespace bundle (namespaces win on name collision), then
/// any injected capabilities such as `import_script`. Globals and locals are
/// one environment, so module-level bindings (including those made through
/// `global` inside `setup`) stay visible to every later invocation.
pub struct ExecutionContext {
    source: String,
    display_name: String,
    namespaces: IndexMap<String, Rc<dyn Namespace>>,
    evaluator: Evaluator,
    program: RefCell<Option<Rc<Vec<Stmt>>>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        source: &str,
        namespaces: IndexMap<String, Rc<dyn Namespace>>,
        display_name: &str,
    ) -> Self {
        let globals = Environment::new();
        builtins::install(&globals);
        for (name, namespace) in &namespaces {
            globals
                .borrow_mut()
                .define(name.clone(), Value::namespace(Rc::clone(namespace)));
        }
        Self {
            source: source.to_string(),
            display_name: display_name.to_string(),
            namespaces,
            evaluator: Evaluator::new(globals),
            program: RefCell::new(None),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn namespaces(&self) -> &IndexMap<String, Rc<dyn Namespace>> {
        &self.namespaces
    }

    pub fn namespace(&self, name: &str) -> Option<Rc<dyn Namespace>> {
        self.namespaces.get(name).cloned()
    }

    /// Installs a non-namespace entry into the script's globals, e.g. the
    /// importer's `import_script` capability. Must happen before `compile`.
    pub fn define_global(&self, name: &str, value: Value) {
        self.evaluator
            .globals()
            .borrow_mut()
            .define(name.to_string(), value);
    }

    /// Parses the source and executes its top level once, materializing
    /// function definitions and top-level bindings. Idempotent.
    pub fn compile(&self) -> Result<()> {
        if self.program.borrow().is_some() {
            return Ok(());
        }
        debug!(script = %self.display_name, "compiling script");
        let program = parser::parse_program(&self.source).map_err(|err| {
            let (line_no, _) = line_col(&self.source, err.span.start);
            ScriptEngineError::Compilation {
                name: self.display_name.clone(),
                line_no,
                line_str: line_text(&self.source, line_no),
                message: err.message,
            }
        })?;
        self.evaluator
            .exec_program(&program)
            .map_err(|err| self.map_eval_error(err))?;
        *self.program.borrow_mut() = Some(Rc::new(program));
        Ok(())
    }

    /// Invokes the top-level `setup` function, if the script defines one.
    pub fn run_setup(&self) -> Result<()> {
        debug!(script = %self.display_name, "running setup()");
        self.invoke_entry("setup").map(|_| ())
    }

    /// Invokes the top-level `process` function, if defined, and returns its
    /// return value.
    pub fn run_process(&self) -> Result<Value> {
        self.invoke_entry("process")
            .map(|value| value.unwrap_or_else(Value::none))
    }

    fn invoke_entry(&self, name: &str) -> Result<Option<Value>> {
        if self.program.borrow().is_none() {
            return Err(ScriptEngineError::ScriptRuntime {
                name: self.display_name.clone(),
                line_no: 0,
                col_no: 0,
                line_str: String::new(),
                message: format!("cannot call {name}() before compile()"),
            });
        }
        let callee = match self.evaluator.globals().borrow().get_local(name) {
            Some(value) => value,
            None => return Ok(None),
        };
        if !matches!(
            &*callee.0,
            ValueKind::Function(_) | ValueKind::Native(_)
        ) {
            return Ok(None);
        }
        self.evaluator
            .call_value(&callee, Vec::new(), IndexMap::new(), None)
            .map(Some)
            .map_err(|err| self.map_eval_error(err))
    }

    /// Calls an arbitrary callable value under this context's error mapping.
    /// This is the handle drivers use to exercise library exports.
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        self.evaluator
            .call_value(callee, args, IndexMap::new(), None)
            .map_err(|err| self.map_eval_error(err))
    }

    /// Returns the top-level binding named `export`, if any. Mappings are
    /// already dot-accessible in this runtime, so the wrap the importer
    /// relies on is the identity.
    pub fn get_export(&self) -> Option<Value> {
        self.evaluator.globals().borrow().get_local("export")
    }

    pub fn generate_outputs(&self) -> IndexMap<String, Value> {
        registry::generate_outputs(&self.namespaces)
    }

    pub fn generate_metadatas(&self) -> IndexMap<String, Value> {
        registry::generate_metadatas(&self.namespaces)
    }

    /// Attribute protocol for contexts handed to importing scripts: an
    /// imported indicator or strategy exposes the same handle the driver
    /// uses.
    pub(crate) fn handle_attr(ctx: &Rc<ExecutionContext>, name: &str) -> Option<Value> {
        match name {
            "run_setup" => {
                let ctx = Rc::clone(ctx);
                Some(Value::native("run_setup", move |_, _, _| {
                    ctx.run_setup().map(|_| Value::none()).map_err(EvalError::engine)
                }))
            }
            "run_process" => {
                let ctx = Rc::clone(ctx);
                Some(Value::native("run_process", move |_, _, _| {
                    ctx.run_process().map_err(EvalError::engine)
                }))
            }
            "get_export" => {
                let ctx = Rc::clone(ctx);
                Some(Value::native("get_export", move |_, _, _| {
                    Ok(ctx.get_export().unwrap_or_else(Value::none))
                }))
            }
            "export" => Some(ctx.get_export().unwrap_or_else(Value::none)),
            _ => None,
        }
    }

    /// Converts an evaluation fault into the user-visible typed error,
    /// resolving the innermost recorded span against the stored source.
    /// Typed errors from nested invocations pass through unchanged.
    fn map_eval_error(&self, err: EvalError) -> ScriptEngineError {
        let (line_no, col_no) = err
            .span
            .map(|span| line_col(&self.source, span.start))
            .unwrap_or((0, 0));
        let line_str = if line_no > 0 {
            line_text(&self.source, line_no)
        } else {
            String::new()
        };
        match err.kind {
            EvalErrorKind::Engine(inner) => *inner,
            EvalErrorKind::NotAllowed(builtin) => ScriptEngineError::NotAllowed {
                name: self.display_name.clone(),
                builtin,
                line_no,
                line_str,
            },
            EvalErrorKind::Message(message) => ScriptEngineError::ScriptRuntime {
                name: self.display_name.clone(),
                line_no,
                col_no,
                line_str,
                message,
            },
        }
    }
}
