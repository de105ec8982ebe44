use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    context::ExecutionContext,
    diagnostics::{EvalError, Result, ScriptEngineError},
    registry::NamespaceRegistry,
    script::{Script, ScriptKind},
    validator::ScriptParser,
    value::{expect_str, Value},
};

/// Named script pool with lazy, memoized resolution of `import_script`.
///
/// Scripts register under a name; one is designated as the main script and
/// compiled into a driveable [`ExecutionContext`]. Running scripts resolve
/// `import_script("name")` through this importer: a library resolves to its
/// export value, an indicator or strategy resolves to its context handle.
/// Resolution is cycle-checked through an import stack and cached, so an
/// imported script's top level executes at most once per driver run.
pub struct Importer {
    inner: Rc<ImporterInner>,
}

struct ImporterInner {
    parser: ScriptParser,
    registry: Rc<RefCell<NamespaceRegistry>>,
    scripts: RefCell<IndexMap<String, Script>>,
    main_name: RefCell<Option<String>>,
    import_stack: RefCell<Vec<String>>,
    resolved: RefCell<IndexMap<String, Value>>,
}

impl Importer {
    pub fn new(registry: Rc<RefCell<NamespaceRegistry>>) -> Self {
        Self {
            inner: Rc::new(ImporterInner {
                parser: ScriptParser::new(),
                registry,
                scripts: RefCell::new(IndexMap::new()),
                main_name: RefCell::new(None),
                import_stack: RefCell::new(Vec::new()),
                resolved: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Parses and registers a script source under `name`.
    pub fn add_script(&self, name: &str, source: &str, is_main: bool) -> Result<()> {
        let script = self.inner.parser.parse(source, name, None)?;
        self.add_parsed(script, is_main);
        Ok(())
    }

    /// Registers a prebuilt script under its own id.
    pub fn add_parsed(&self, script: Script, is_main: bool) {
        debug!(script = script.id(), kind = %script.kind(), is_main, "registering script");
        if is_main {
            *self.inner.main_name.borrow_mut() = Some(script.id().to_string());
        }
        self.inner
            .scripts
            .borrow_mut()
            .insert(script.id().to_string(), script);
    }

    /// The designated main script name; falls back to the sole registered
    /// script when exactly one exists and none was marked.
    pub fn main_name(&self) -> Option<String> {
        if let Some(name) = self.inner.main_name.borrow().clone() {
            return Some(name);
        }
        let scripts = self.inner.scripts.borrow();
        if scripts.len() == 1 {
            return scripts.keys().next().cloned();
        }
        None
    }

    /// Builds and compiles the main script's execution context, with the
    /// namespace bundle from the registry plus the `import_script`
    /// capability bound to this importer.
    pub fn build_main_script(&self) -> Result<Rc<ExecutionContext>> {
        let name = self.main_name().ok_or(ScriptEngineError::EntrypointNotFound)?;
        let script = self
            .inner
            .scripts
            .borrow()
            .get(&name)
            .cloned()
            .ok_or(ScriptEngineError::EntrypointNotFound)?;
        debug!(script = script.id(), "building main script context");
        self.inner.build_context(&script)
    }

    /// Resolves an import by name, as scripts do through the injected
    /// capability.
    pub fn import_script(&self, name: &str) -> Result<Value> {
        self.inner.import_script(name)
    }
}

impl ImporterInner {
    fn build_context(self: &Rc<Self>, script: &Script) -> Result<Rc<ExecutionContext>> {
        let bundle = self.registry.borrow().build();
        let ctx = Rc::new(ExecutionContext::new(script.source(), bundle, script.id()));
        ctx.define_global("import_script", self.capability());
        ctx.compile()?;
        Ok(ctx)
    }

    /// The `import_script` value injected into every context's globals. The
    /// closure holds a weak reference; resolved values may capture their
    /// context (and through it this capability), and a strong reference
    /// would pin the importer in a cycle.
    fn capability(self: &Rc<Self>) -> Value {
        let importer: Weak<ImporterInner> = Rc::downgrade(self);
        Value::native("import_script", move |_, args, _| {
            if args.len() != 1 {
                return Err(EvalError::msg(
                    "import_script expects a single script name",
                ));
            }
            let name = expect_str(&args[0], "import_script")?;
            let inner = importer
                .upgrade()
                .ok_or_else(|| EvalError::msg("script importer is no longer alive"))?;
            inner.import_script(&name).map_err(EvalError::engine)
        })
    }

    fn import_script(self: &Rc<Self>, name: &str) -> Result<Value> {
        if let Some(value) = self.resolved.borrow().get(name) {
            debug!(script = name, "import served from cache");
            return Ok(value.clone());
        }
        if self.import_stack.borrow().iter().any(|entry| entry == name) {
            let current = self
                .import_stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(|| "<main>".to_string());
            return Err(ScriptEngineError::CircularImport {
                name: name.to_string(),
                current,
            });
        }
        let script = self
            .scripts
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptEngineError::ScriptNotFound {
                name: name.to_string(),
            })?;

        debug!(script = name, kind = %script.kind(), "resolving import");
        self.import_stack.borrow_mut().push(name.to_string());
        let result = self.resolve(&script);
        self.import_stack.borrow_mut().pop();
        let value = result?;
        self.resolved
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn resolve(self: &Rc<Self>, script: &Script) -> Result<Value> {
        let ctx = self.build_context(script)?;
        match script.kind() {
            // A library's export is bound by compile(); return the value.
            ScriptKind::Library => Ok(ctx.get_export().unwrap_or_else(Value::none)),
            // Indicators and strategies hand back the context itself; the
            // importing script decides whether to drive it further. Bar
            // advancement stays with the driver and the main script.
            ScriptKind::Indicator | ScriptKind::Strategy => {
                ctx.run_setup()?;
                Ok(Value::context(ctx))
            }
        }
    }
}
