use std::{any::Any, cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{EvalError, EvalResult},
    namespaces::{
        ChartNamespace, ColorNamespace, DataNamespace, InputNamespace, LogNamespace,
        StrategyNamespace, TaNamespace,
    },
    runtime::Evaluator,
    value::{NativeCallback, Value},
};

/// The mapping shared by reference between every namespace a registry
/// constructs; the only cross-namespace state channel.
pub type SharedMap = Rc<RefCell<IndexMap<String, Value>>>;

/// Protocol required of anything registered as a namespace. Attribute access
/// is how scripts reach a namespace's operations; the generate hooks let the
/// driver collect post-run outputs and metadata.
pub trait Namespace {
    fn attr(&self, name: &str) -> Option<Value>;

    /// Invoked when a script calls the namespace itself, for namespaces
    /// registered as bare callables.
    fn call(
        &self,
        _eval: &Evaluator,
        _args: &[Value],
        _kwargs: &IndexMap<String, Value>,
    ) -> EvalResult<Value> {
        Err(EvalError::msg("namespace object is not callable"))
    }

    fn generate_output(&self) -> Option<Value> {
        None
    }

    fn generate_metadata(&self) -> Option<Value> {
        None
    }

    /// Enables driver-side downcasting, e.g. to feed bars into the `data`
    /// namespace between `run_process` calls.
    fn as_any(&self) -> &dyn Any;
}

/// Adapter that registers a bare callable under a namespace name.
pub struct CallableNamespace {
    func: Rc<NativeCallback>,
}

impl CallableNamespace {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Evaluator, &[Value], &IndexMap<String, Value>) -> EvalResult<Value> + 'static,
    {
        Self {
            func: Rc::new(func),
        }
    }
}

impl Namespace for CallableNamespace {
    fn attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn call(
        &self,
        eval: &Evaluator,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> EvalResult<Value> {
        (self.func)(eval, args, kwargs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Mapping from namespace name to namespace object. Later registrations
/// override earlier ones under the same name.
pub struct NamespaceRegistry {
    namespaces: IndexMap<String, Rc<dyn Namespace>>,
    shared: SharedMap,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self {
            namespaces: IndexMap::new(),
            shared: Rc::new(RefCell::new(IndexMap::new())),
        }
    }

    /// The shared mapping handed to every namespace this registry builds.
    pub fn shared(&self) -> SharedMap {
        Rc::clone(&self.shared)
    }

    pub fn register(&mut self, name: &str, namespace: Rc<dyn Namespace>) {
        tracing::debug!(namespace = name, "registering namespace");
        self.namespaces.insert(name.to_string(), namespace);
    }

    /// Installs the canonical namespace set (`ta`, `input`, `chart`,
    /// `color`, `strategy`, `data`, `log`), configured with the given input
    /// override map and bar column remapping.
    pub fn register_defaults(
        &mut self,
        input_overrides: IndexMap<String, Value>,
        column_mapping: IndexMap<String, String>,
    ) {
        self.register("ta", Rc::new(TaNamespace::new()));
        self.register("input", Rc::new(InputNamespace::new(input_overrides)));
        self.register("chart", Rc::new(ChartNamespace::new()));
        self.register("color", Rc::new(ColorNamespace::new()));
        self.register(
            "strategy",
            Rc::new(StrategyNamespace::new(self.shared())),
        );
        self.register(
            "data",
            Rc::new(DataNamespace::new(self.shared(), column_mapping)),
        );
        self.register("log", Rc::new(LogNamespace::new()));
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Namespace>> {
        self.namespaces.get(name).cloned()
    }

    /// Returns a fresh shallow copy of the namespace table for use as an
    /// execution context's bundle.
    pub fn build(&self) -> IndexMap<String, Rc<dyn Namespace>> {
        self.namespaces.clone()
    }
}

/// Collects `generate_output` results from every namespace that produces one.
pub fn generate_outputs(
    namespaces: &IndexMap<String, Rc<dyn Namespace>>,
) -> IndexMap<String, Value> {
    let mut outputs = IndexMap::new();
    for (name, namespace) in namespaces {
        if let Some(output) = namespace.generate_output() {
            outputs.insert(name.clone(), output);
        }
    }
    outputs
}

/// Collects `generate_metadata` results from every namespace that produces one.
pub fn generate_metadatas(
    namespaces: &IndexMap<String, Rc<dyn Namespace>>,
) -> IndexMap<String, Value> {
    let mut metadatas = IndexMap::new();
    for (name, namespace) in namespaces {
        if let Some(metadata) = namespace.generate_metadata() {
            metadatas.insert(name.clone(), metadata);
        }
    }
    metadatas
}
