//! Behaviour of the embedded surface language, exercised through bare
//! execution contexts without any namespaces.

use indexmap::IndexMap;

use firscript::{ExecutionContext, Value, ValueKind};

fn context(source: &str) -> ExecutionContext {
    let ctx = ExecutionContext::new(source, IndexMap::new(), "lang-test");
    ctx.compile().expect("compile");
    ctx
}

/// Wraps an expression into a process() body and evaluates it once.
fn eval_expr(expr: &str) -> Value {
    let source = format!("def setup():\n    pass\n\ndef process():\n    return {expr}\n");
    let ctx = context(&source);
    ctx.run_process().expect("process")
}

fn run_body(body: &str) -> Value {
    let indented: String = body
        .lines()
        .map(|line| format!("    {line}\n"))
        .collect();
    let source = format!("def setup():\n    pass\n\ndef process():\n{indented}");
    let ctx = context(&source);
    ctx.run_process().expect("process")
}

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

fn expect_str(value: &Value) -> String {
    match &*value.0 {
        ValueKind::Str(s) => s.clone(),
        _ => panic!("expected str, found {}", value.type_name()),
    }
}

fn expect_list(value: &Value) -> Vec<Value> {
    match &*value.0 {
        ValueKind::List(values) => values.clone(),
        _ => panic!("expected list, found {}", value.type_name()),
    }
}

#[test]
fn arithmetic_follows_surface_semantics() {
    assert_eq!(expect_int(&eval_expr("2 + 3 * 4")), 14);
    assert_eq!(expect_float(&eval_expr("7 / 2")), 3.5);
    assert_eq!(expect_int(&eval_expr("7 // 2")), 3);
    assert_eq!(expect_int(&eval_expr("-7 % 3")), 2);
    assert_eq!(expect_int(&eval_expr("2 ** 8")), 256);
    assert_eq!(expect_float(&eval_expr("1.5 + 1")), 2.5);
    assert_eq!(expect_int(&eval_expr("-(3 + 4)")), -7);
}

#[test]
fn string_concat_and_comparison() {
    assert_eq!(expect_str(&eval_expr("\"fir\" + \"script\"")), "firscript");
    assert!(eval_expr("\"abc\" < \"abd\"").is_truthy());
    assert!(eval_expr("1 == 1.0").is_truthy());
    assert!(eval_expr("1 != 2").is_truthy());
}

#[test]
fn boolean_operators_return_operands() {
    assert_eq!(expect_int(&eval_expr("0 or 5")), 5);
    assert_eq!(expect_int(&eval_expr("3 and 5")), 5);
    assert!(eval_expr("None and missing_name").is_none());
    assert!(eval_expr("not 0").is_truthy());
}

#[test]
fn conditionals_and_loops() {
    let value = run_body(
        "total = 0\nfor item in [1, 2, 3, 4, 5]:\n    if item % 2 == 0:\n        continue\n    total += item\nreturn total",
    );
    assert_eq!(expect_int(&value), 9);

    let value = run_body(
        "n = 0\nwhile True:\n    n += 1\n    if n >= 4:\n        break\nreturn n",
    );
    assert_eq!(expect_int(&value), 4);

    let value = run_body(
        "x = 10\nif x > 100:\n    return \"big\"\nelif x > 5:\n    return \"medium\"\nelse:\n    return \"small\"",
    );
    assert_eq!(expect_str(&value), "medium");
}

#[test]
fn bindings_made_in_branches_stay_visible() {
    let value = run_body("if True:\n    y = 41\nreturn y + 1");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn functions_default_and_keyword_arguments() {
    let source = r#"
def scale(value, factor=10):
    return value * factor

def setup():
    pass

def process():
    return [scale(3), scale(3, 2), scale(value=4, factor=3)]
"#;
    let ctx = context(source);
    let values = expect_list(&ctx.run_process().expect("process"));
    assert_eq!(expect_int(&values[0]), 30);
    assert_eq!(expect_int(&values[1]), 6);
    assert_eq!(expect_int(&values[2]), 12);
}

#[test]
fn functions_without_return_yield_none() {
    let value = run_body("pass");
    assert!(value.is_none());
}

#[test]
fn lambdas_capture_their_defining_scope() {
    let source = r#"
def make_adder(n):
    return lambda x: x + n

def setup():
    pass

def process():
    add5 = make_adder(5)
    return add5(37)
"#;
    let ctx = context(source);
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 42);
}

#[test]
fn recursion_works() {
    let source = r#"
def fib(n):
    if n <= 1:
        return n
    return fib(n - 1) + fib(n - 2)

def setup():
    pass

def process():
    return fib(10)
"#;
    let ctx = context(source);
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 55);
}

#[test]
fn indexing_and_slicing() {
    assert_eq!(expect_int(&eval_expr("[10, 20, 30][1]")), 20);
    assert_eq!(expect_int(&eval_expr("[10, 20, 30][-1]")), 30);
    let tail = expect_list(&eval_expr("[1, 2, 3, 4, 5][-2:]"));
    assert_eq!(tail.len(), 2);
    assert_eq!(expect_int(&tail[0]), 4);
    let middle = expect_list(&eval_expr("[1, 2, 3, 4, 5][1:3]"));
    assert_eq!(middle.len(), 2);
    assert_eq!(expect_str(&eval_expr("\"hello\"[1:3]")), "el");
    assert_eq!(expect_str(&eval_expr("\"hello\"[-1]")), "o");
    let all = expect_list(&eval_expr("[1, 2, 3][:]"));
    assert_eq!(all.len(), 3);
}

#[test]
fn dict_literals_and_mutation() {
    let value = run_body(
        "d = {\"a\": 1, \"b\": 2}\nd[\"c\"] = 3\nd.b = 20\nreturn d[\"a\"] + d.b + d[\"c\"]",
    );
    assert_eq!(expect_int(&value), 24);
}

#[test]
fn list_element_assignment() {
    let value = run_body("xs = [1, 2, 3]\nxs[1] = xs[1] + 5\nreturn xs[1]");
    assert_eq!(expect_int(&value), 7);
}

#[test]
fn builtin_collection_helpers() {
    assert_eq!(expect_int(&eval_expr("len([1, 2, 3])")), 3);
    assert_eq!(expect_int(&eval_expr("len(\"hello\")")), 5);
    assert_eq!(expect_int(&eval_expr("sum([1, 2, 3, 4])")), 10);
    assert_eq!(expect_int(&eval_expr("min(4, 2, 9)")), 2);
    assert_eq!(expect_int(&eval_expr("max([4, 2, 9])")), 9);
    assert_eq!(expect_int(&eval_expr("abs(-5)")), 5);
    assert_eq!(expect_int(&eval_expr("round(3.6)")), 4);
    assert_eq!(expect_float(&eval_expr("round(3.14159, 2)")), 3.14);
    let range = expect_list(&eval_expr("range(2, 8, 2)"));
    assert_eq!(range.len(), 3);
    assert_eq!(expect_int(&range[2]), 6);
}

#[test]
fn higher_order_builtins() {
    let doubled = expect_list(&eval_expr("map(lambda x: x * 2, [1, 2, 3])"));
    assert_eq!(expect_int(&doubled[2]), 6);
    let odds = expect_list(&eval_expr("filter(lambda x: x % 2 == 1, [1, 2, 3, 4, 5])"));
    assert_eq!(odds.len(), 3);
    let ordered = expect_list(&eval_expr("sorted([3, 1, 2])"));
    assert_eq!(expect_int(&ordered[0]), 1);
    let reversed = expect_list(&eval_expr("sorted([3, 1, 2], reverse=True)"));
    assert_eq!(expect_int(&reversed[0]), 3);
    let pairs = expect_list(&eval_expr("zip([1, 2], [\"a\", \"b\"])"));
    assert_eq!(pairs.len(), 2);
    let enumerated = expect_list(&eval_expr("enumerate([\"x\", \"y\"], 1)"));
    let first = expect_list(&enumerated[0]);
    assert_eq!(expect_int(&first[0]), 1);
}

#[test]
fn iterators_and_conversions() {
    let value = run_body("it = iter([1, 2])\nfirst = next(it)\nsecond = next(it)\nthird = next(it, 99)\nreturn [first, second, third]");
    let values = expect_list(&value);
    assert_eq!(expect_int(&values[0]), 1);
    assert_eq!(expect_int(&values[1]), 2);
    assert_eq!(expect_int(&values[2]), 99);

    assert_eq!(expect_int(&eval_expr("int(\"42\")")), 42);
    assert_eq!(expect_int(&eval_expr("int(3.9)")), 3);
    assert_eq!(expect_float(&eval_expr("float(\"2.5\")")), 2.5);
    assert_eq!(expect_str(&eval_expr("str(42)")), "42");
    assert!(eval_expr("bool([1])").is_truthy());
    assert!(!eval_expr("bool([])").is_truthy());
    assert!(eval_expr("isinstance(1, int)").is_truthy());
    assert!(eval_expr("isinstance(1.0, [int, float])").is_truthy());
    assert!(!eval_expr("isinstance(\"x\", int)").is_truthy());
}

#[test]
fn iterating_dicts_yields_keys() {
    let value = run_body(
        "d = {\"a\": 1, \"b\": 2}\nkeys = \"\"\nfor k in d:\n    keys = keys + k\nreturn keys",
    );
    assert_eq!(expect_str(&value), "ab");
}

#[test]
fn semicolons_separate_simple_statements() {
    let value = run_body("a = 1; b = 2; c = a + b\nreturn c");
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn inline_suites_parse() {
    let source = "def setup(): pass\n\ndef process(): return 9\n";
    let ctx = context(source);
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 9);
}

#[test]
fn docstrings_are_tolerated() {
    let source = "\"\"\"\nModule docstring spanning lines.\n\"\"\"\n\ndef setup():\n    \"\"\"setup docstring\"\"\"\n    pass\n\ndef process():\n    return 1\n";
    let ctx = context(source);
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 1);
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let source = "# leading comment\n\ndef setup():\n    pass  # trailing\n\n# between\n\ndef process():\n    # inside\n    return 2\n";
    let ctx = context(source);
    assert_eq!(expect_int(&ctx.run_process().expect("process")), 2);
}

#[test]
fn multi_line_literals_join_implicitly() {
    let value = run_body("xs = [\n    1,\n    2,\n    3,\n]\nreturn sum(xs)");
    assert_eq!(expect_int(&value), 6);
}

#[test]
fn augmented_assignment_operators() {
    let value = run_body("x = 10\nx += 5\nx -= 3\nx *= 4\nx /= 2\nreturn x");
    assert_eq!(expect_float(&value), 24.0);
}

#[test]
fn division_by_zero_is_an_error() {
    let source = "def setup():\n    pass\n\ndef process():\n    return 1 / 0\n";
    let ctx = context(source);
    assert!(ctx.run_process().is_err());
}

#[test]
fn wrong_arity_is_an_error() {
    let source = "def f(a, b):\n    return a\n\ndef setup():\n    pass\n\ndef process():\n    return f(1)\n";
    let ctx = context(source);
    let err = ctx.run_process().expect_err("missing argument");
    assert!(err.to_string().contains("missing required argument"), "{err}");
}

#[test]
fn unknown_kwarg_is_an_error() {
    let source = "def f(a):\n    return a\n\ndef setup():\n    pass\n\ndef process():\n    return f(1, nope=2)\n";
    let ctx = context(source);
    let err = ctx.run_process().expect_err("unexpected kwarg");
    assert!(err.to_string().contains("unexpected keyword"), "{err}");
}
