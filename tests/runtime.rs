use std::{any::Any, cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use firscript::{
    namespaces::DataNamespace, ExecutionContext, Importer, Namespace, NamespaceRegistry,
    ScriptEngineError, Value, ValueKind,
};

fn expect_int(value: &Value) -> i64 {
    match &*value.0 {
        ValueKind::Int(n) => *n,
        _ => panic!("expected int, found {}", value.type_name()),
    }
}

fn expect_float(value: &Value) -> f64 {
    match &*value.0 {
        ValueKind::Float(f) => *f,
        _ => panic!("expected float, found {}", value.type_name()),
    }
}

fn empty_registry() -> Rc<RefCell<NamespaceRegistry>> {
    Rc::new(RefCell::new(NamespaceRegistry::new()))
}

fn bare_context(source: &str, name: &str) -> ExecutionContext {
    ExecutionContext::new(source, IndexMap::new(), name)
}

/// Counts how many times scripts called `counter.bump()`; used to observe
/// how often an imported script's top level actually runs.
struct CountingNamespace {
    count: Rc<RefCell<i64>>,
}

impl CountingNamespace {
    fn new() -> (Self, Rc<RefCell<i64>>) {
        let count = Rc::new(RefCell::new(0));
        (
            Self {
                count: Rc::clone(&count),
            },
            count,
        )
    }
}

impl Namespace for CountingNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "bump" => {
                let count = Rc::clone(&self.count);
                Some(Value::native("counter.bump", move |_, _, _| {
                    *count.borrow_mut() += 1;
                    Ok(Value::none())
                }))
            }
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn library_export_calls_through() {
    // Scenario A: a library function reachable through the export mapping.
    let source = "def f(x):\n    return x + 1\n\nexport = {\"inc\": f}\n";
    let ctx = bare_context(source, "mathlib");
    ctx.compile().expect("compile");
    let export = ctx.get_export().expect("export bound");
    let inc = match &*export.0 {
        ValueKind::Map(map) => map.get("inc").cloned().expect("inc key"),
        _ => panic!("expected map export, found {}", export.type_name()),
    };
    let result = ctx.call(&inc, vec![Value::int(41)]).expect("call inc");
    assert_eq!(expect_int(&result), 42);
}

#[test]
fn imported_library_exports_support_attribute_access() {
    // Scenario B: setup imports a library, process uses it by attribute.
    let registry = empty_registry();
    let importer = Importer::new(registry);
    importer
        .add_script("util", "export = {\"add\": lambda a, b: a + b}\n", false)
        .expect("util parses");
    importer
        .add_script(
            "main",
            r#"
def setup():
    global u
    u = import_script("util")

def process():
    return u.add(2, 3)
"#,
            true,
        )
        .expect("main parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    let result = ctx.run_process().expect("process");
    assert_eq!(expect_int(&result), 5);
}

#[test]
fn circular_imports_are_detected() {
    // Scenario C: a imports b imports a.
    let a = r#"
def setup():
    global other
    other = import_script("b")

def process():
    pass
"#;
    let b = r#"
def setup():
    global other
    other = import_script("a")

def process():
    pass
"#;
    let registry = empty_registry();
    let importer = Importer::new(registry);
    importer.add_script("a", a, true).expect("a parses");
    importer.add_script("b", b, false).expect("b parses");
    let ctx = importer.build_main_script().expect("build");
    let err = ctx.run_setup().expect_err("cycle should be detected");
    match err {
        ScriptEngineError::CircularImport { name, current } => {
            let mut pair = vec![name, current];
            pair.sort();
            assert_eq!(pair, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn imports_are_memoized_across_setup_and_process() {
    let (counter, count) = CountingNamespace::new();
    let registry = empty_registry();
    registry.borrow_mut().register("counter", Rc::new(counter));

    let importer = Importer::new(registry);
    importer
        .add_script("lib", "counter.bump()\nexport = 1\n", false)
        .expect("lib parses");
    importer
        .add_script(
            "main",
            r#"
def setup():
    global one
    one = import_script("lib")
    two = import_script("lib")

def process():
    again = import_script("lib")
    return again
"#,
            true,
        )
        .expect("main parses");

    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    for _ in 0..3 {
        let value = ctx.run_process().expect("process");
        assert_eq!(expect_int(&value), 1);
    }
    assert_eq!(*count.borrow(), 1, "library top level must run exactly once");
}

#[test]
fn setup_state_persists_into_process() {
    let source = r#"
def setup():
    global x
    x = 0

def process():
    global x
    x = x + 1
    return x
"#;
    let ctx = bare_context(source, "stateful");
    ctx.compile().expect("compile");
    ctx.run_setup().expect("setup");
    assert_eq!(expect_int(&ctx.run_process().expect("first")), 1);
    assert_eq!(expect_int(&ctx.run_process().expect("second")), 2);
}

#[test]
fn denied_builtin_raises_not_allowed_at_call_site() {
    // Scenario F: open() inside setup, line 2 of the source.
    let source = "def setup():\n    open(\"/etc/passwd\")\n\ndef process():\n    pass\n";
    let ctx = bare_context(source, "sandboxed");
    ctx.compile().expect("compile");
    let err = ctx.run_setup().expect_err("open must be denied");
    match err {
        ScriptEngineError::NotAllowed {
            name,
            builtin,
            line_no,
            line_str,
        } => {
            assert_eq!(name, "sandboxed");
            assert_eq!(builtin, "open");
            assert_eq!(line_no, 2);
            assert_eq!(line_str, "    open(\"/etc/passwd\")");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn eval_and_import_primitives_are_denied() {
    for denied in ["eval", "exec", "compile", "__import__", "getattr"] {
        let source = format!("def setup():\n    {denied}(\"x\")\n\ndef process():\n    pass\n");
        let ctx = bare_context(&source, "sandboxed");
        ctx.compile().expect("compile");
        let err = ctx.run_setup().expect_err("denied builtin");
        match err {
            ScriptEngineError::NotAllowed { builtin, .. } => assert_eq!(builtin, denied),
            other => panic!("unexpected error for {denied}: {other}"),
        }
    }
}

#[test]
fn runtime_error_reports_failing_line() {
    let source = r#"
def setup():
    pass

def process():
    return missing_name
"#;
    let ctx = bare_context(source, "broken");
    ctx.compile().expect("compile");
    ctx.run_setup().expect("setup");
    let err = ctx.run_process().expect_err("undefined name");
    match err {
        ScriptEngineError::ScriptRuntime {
            line_no, line_str, ..
        } => {
            assert_eq!(line_no, 6);
            assert_eq!(line_str, "    return missing_name");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn top_level_failure_surfaces_during_compile() {
    let ctx = bare_context("export = 1 / 0\n", "libzero");
    let err = ctx.compile().expect_err("division by zero at top level");
    match err {
        ScriptEngineError::ScriptRuntime { line_no, message, .. } => {
            assert_eq!(line_no, 1);
            assert!(message.contains("division by zero"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn export_may_be_callable() {
    let registry = empty_registry();
    let importer = Importer::new(registry);
    importer
        .add_script("dbl", "export = lambda a: a * 2\n", false)
        .expect("dbl parses");
    importer
        .add_script(
            "main",
            r#"
def setup():
    global u
    u = import_script("dbl")

def process():
    return u(21)
"#,
            true,
        )
        .expect("main parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 42);
}

#[test]
fn imported_indicator_is_a_driveable_handle() {
    let registry = empty_registry();
    let importer = Importer::new(registry);
    importer
        .add_script(
            "ind",
            "def setup():\n    pass\n\ndef process():\n    return 7\n",
            false,
        )
        .expect("ind parses");
    importer
        .add_script(
            "main",
            r#"
def setup():
    global ind
    ind = import_script("ind")

def process():
    return ind.run_process()
"#,
            true,
        )
        .expect("main parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 7);
}

#[test]
fn missing_import_is_a_script_not_found_error() {
    let registry = empty_registry();
    let importer = Importer::new(registry);
    importer
        .add_script(
            "main",
            r#"
def setup():
    global u
    u = import_script("ghost")

def process():
    pass
"#,
            true,
        )
        .expect("main parses");
    let ctx = importer.build_main_script().expect("build");
    let err = ctx.run_setup().expect_err("ghost is unknown");
    match err {
        ScriptEngineError::ScriptNotFound { name } => assert_eq!(name, "ghost"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn sole_script_becomes_main_by_default() {
    let registry = empty_registry();
    let importer = Importer::new(registry);
    importer
        .add_script(
            "only",
            "def setup():\n    pass\n\ndef process():\n    return 1\n",
            false,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("sole script is main");
    ctx.run_setup().expect("setup");
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 1);
}

#[test]
fn two_unmarked_scripts_have_no_entrypoint() {
    let registry = empty_registry();
    let importer = Importer::new(registry);
    let source = "def setup():\n    pass\n\ndef process():\n    pass\n";
    importer.add_script("a", source, false).expect("parses");
    importer.add_script("b", source, false).expect("parses");
    let err = importer.build_main_script().expect_err("no main");
    assert!(
        matches!(err, ScriptEngineError::EntrypointNotFound),
        "{err}"
    );
}

#[test]
fn registered_namespace_overrides_default() {
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), IndexMap::new());
    let (counter, _count) = CountingNamespace::new();
    let custom: Rc<dyn Namespace> = Rc::new(counter);
    registry.register("ta", Rc::clone(&custom));
    let bundle = registry.build();
    assert!(Rc::ptr_eq(bundle.get("ta").expect("ta present"), &custom));
}

#[test]
fn input_overrides_take_precedence_over_defaults() {
    let mut overrides = IndexMap::new();
    overrides.insert("n".to_string(), Value::int(5));
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(overrides, IndexMap::new());
    let registry = Rc::new(RefCell::new(registry));

    let importer = Importer::new(registry);
    importer
        .add_script(
            "main",
            r#"
def setup():
    global n
    n = input.int("n", 14)

def process():
    return n
"#,
            true,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 5);

    let metadatas = ctx.generate_metadatas();
    let inputs = metadatas.get("input").expect("input metadata");
    match &*inputs.0 {
        ValueKind::Map(map) => {
            assert_eq!(expect_int(map.get("n").expect("declared input")), 5);
        }
        _ => panic!("expected map metadata"),
    }
}

#[test]
fn chart_plots_become_namespace_outputs() {
    let registry = Rc::new(RefCell::new(NamespaceRegistry::new()));
    registry
        .borrow_mut()
        .register_defaults(IndexMap::new(), IndexMap::new());
    let importer = Importer::new(registry);
    importer
        .add_script(
            "main",
            r#"
def setup():
    pass

def process():
    chart.plot(1.5, title="level")
"#,
            true,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    ctx.run_process().expect("bar 1");
    ctx.run_process().expect("bar 2");

    let outputs = ctx.generate_outputs();
    let plots = outputs.get("chart").expect("chart output");
    match &*plots.0 {
        ValueKind::List(values) => assert_eq!(values.len(), 2),
        _ => panic!("expected list of plots"),
    }
}

#[test]
fn strategy_orders_become_namespace_outputs() {
    let registry = Rc::new(RefCell::new(NamespaceRegistry::new()));
    registry
        .borrow_mut()
        .register_defaults(IndexMap::new(), IndexMap::new());
    let importer = Importer::new(registry);
    importer
        .add_script(
            "main",
            r#"
def setup():
    pass

def process():
    strategy.long(qty=2)
"#,
            true,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    ctx.run_process().expect("bar");

    let outputs = ctx.generate_outputs();
    let orders = outputs.get("strategy").expect("strategy output");
    match &*orders.0 {
        ValueKind::List(values) => {
            assert_eq!(values.len(), 1);
            match &*values[0].0 {
                ValueKind::Map(map) => {
                    assert_eq!(map.get("action").unwrap().to_string(), "long");
                    assert_eq!(expect_int(map.get("qty").unwrap()), 2);
                }
                _ => panic!("expected order record"),
            }
        }
        _ => panic!("expected list of orders"),
    }
}

#[test]
fn data_namespace_feeds_bars_with_column_mapping() {
    let mut mapping = IndexMap::new();
    mapping.insert("Close".to_string(), "close".to_string());
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), mapping);
    let registry = Rc::new(RefCell::new(registry));

    let importer = Importer::new(Rc::clone(&registry));
    importer
        .add_script(
            "main",
            r#"
def setup():
    pass

def process():
    return data.current.close + data.all.close[-1]
"#,
            true,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");

    let data_handle = ctx.namespace("data").expect("data namespace");
    let feed = data_handle
        .as_any()
        .downcast_ref::<DataNamespace>()
        .expect("default data namespace");

    let mut bar = IndexMap::new();
    bar.insert("Close".to_string(), Value::float(42.0));
    let mut columns = IndexMap::new();
    columns.insert(
        "Close".to_string(),
        Value::list(vec![Value::float(41.0), Value::float(42.0)]),
    );
    feed.set_all_bar(Value::map(columns));
    feed.set_current_bar(Value::map(bar));

    let result = ctx.run_process().expect("process");
    assert_eq!(expect_float(&result), 84.0);
}

#[test]
fn ta_helpers_are_available_through_defaults() {
    let registry = Rc::new(RefCell::new(NamespaceRegistry::new()));
    registry
        .borrow_mut()
        .register_defaults(IndexMap::new(), IndexMap::new());
    let importer = Importer::new(registry);
    importer
        .add_script(
            "main",
            r#"
def setup():
    pass

def process():
    return ta.sma([1.0, 2.0, 3.0, 4.0], 2)
"#,
            true,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    let value = ctx.run_process().expect("process");
    assert!((expect_float(&value) - 3.5).abs() < 1e-9);
}

#[test]
fn shared_map_bridges_namespaces() {
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), IndexMap::new());
    let shared = registry.shared();
    let registry = Rc::new(RefCell::new(registry));

    let importer = Importer::new(registry);
    importer
        .add_script(
            "main",
            r#"
def setup():
    pass

def process():
    strategy.long()
"#,
            true,
        )
        .expect("parses");
    let ctx = importer.build_main_script().expect("build");
    ctx.run_setup().expect("setup");
    ctx.run_process().expect("process");

    let shared = shared.borrow();
    let orders = shared.get("strategy").expect("orders mirrored into shared");
    match &*orders.0 {
        ValueKind::List(values) => assert_eq!(values.len(), 1),
        _ => panic!("expected order list in shared map"),
    }
}
