use firscript::{ScriptEngineError, ScriptKind, ScriptParser};

fn parse(source: &str) -> Result<firscript::Script, ScriptEngineError> {
    ScriptParser::new().parse(source, "test", None)
}

fn parse_err(source: &str) -> ScriptEngineError {
    match parse(source) {
        Ok(script) => panic!("expected error, parsed {} script", script.kind()),
        Err(err) => err,
    }
}

const VALID_INDICATOR: &str = r#"
def setup():
    global length
    length = input.int("Length", 14)

def process():
    value = ta.sma(data.all.close, length)
    chart.plot(value, color=color.blue, title="SMA")
    return value
"#;

const VALID_STRATEGY: &str = r#"
def setup():
    global fast, slow
    fast = input.int("Fast", 10)
    slow = input.int("Slow", 20)

def process():
    fast_ma = ta.sma(data.all.close, fast)
    slow_ma = ta.sma(data.all.close, slow)
    if fast_ma > slow_ma:
        strategy.long()
    elif fast_ma < slow_ma:
        strategy.short()
"#;

const VALID_LIBRARY: &str = r#"
def momentum(series, length):
    if len(series) < length + 1:
        return 0.0
    return series[-1] - series[-1 - length]

export = {"momentum": momentum}
"#;

#[test]
fn classifies_indicator() {
    let script = parse(VALID_INDICATOR).expect("indicator parses");
    assert_eq!(script.kind(), ScriptKind::Indicator);
}

#[test]
fn classifies_strategy() {
    let script = parse(VALID_STRATEGY).expect("strategy parses");
    assert_eq!(script.kind(), ScriptKind::Strategy);
}

#[test]
fn classifies_library() {
    let script = parse(VALID_LIBRARY).expect("library parses");
    assert_eq!(script.kind(), ScriptKind::Library);
    assert!(script.metadata().exports.contains("export"));
}

#[test]
fn single_strategy_call_flips_indicator_to_strategy() {
    let source = r#"
def setup():
    pass

def process():
    strategy.long()
"#;
    let script = parse(source).expect("parses");
    assert_eq!(script.kind(), ScriptKind::Strategy);
}

#[test]
fn empty_script_has_no_kind() {
    let err = parse_err("x = 1\n");
    assert!(matches!(err, ScriptEngineError::MissingKind { .. }), "{err}");
}

#[test]
fn process_without_setup_conflicts() {
    let err = parse_err("def process():\n    pass\n");
    assert!(
        matches!(err, ScriptEngineError::ConflictingKind { .. }),
        "{err}"
    );
}

#[test]
fn setup_without_process_conflicts() {
    let err = parse_err("def setup():\n    pass\n");
    assert!(
        matches!(err, ScriptEngineError::ConflictingKind { .. }),
        "{err}"
    );
}

#[test]
fn supplied_kind_is_validated() {
    let err = ScriptParser::new()
        .parse("def setup():\n    pass\n", "test", Some(ScriptKind::Indicator))
        .expect_err("missing process");
    match err {
        ScriptEngineError::MissingRequiredFunctions { message, .. } => {
            assert!(message.contains("process"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = ScriptParser::new()
        .parse("x = 1\n", "test", Some(ScriptKind::Library))
        .expect_err("library without export");
    assert!(matches!(err, ScriptEngineError::NoExports { .. }), "{err}");
}

#[test]
fn library_with_two_exports_is_rejected() {
    let err = parse_err("export = 1\nexport = 2\n");
    match err {
        ScriptEngineError::MultipleExports { line, col, .. } => {
            assert_eq!(line, 2);
            assert!(col >= 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn library_with_setup_conflicts() {
    let source = r#"
def setup():
    pass

export = 1
"#;
    let err = parse_err(source);
    assert!(
        matches!(err, ScriptEngineError::ConflictingKind { .. }),
        "{err}"
    );
}

#[test]
fn library_cannot_touch_strategy_namespace() {
    let source = r#"
def helper():
    strategy.close()

export = {"helper": helper}
"#;
    let err = parse_err(source);
    match err {
        ScriptEngineError::StrategyFunctionInIndicator { line, col, .. } => {
            assert_eq!(line, 3);
            assert!(col >= 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn input_inside_process_is_rejected() {
    let source = r#"
def setup():
    pass

def process():
    input.int("n", 14)
"#;
    let err = parse_err(source);
    match err {
        ScriptEngineError::InvalidInputUsage { line, col, .. } => {
            assert_eq!(line, 6);
            assert_eq!(col, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn input_at_library_top_level_is_rejected() {
    let source = "x = input.int(\"n\", 14)\nexport = 1\n";
    let err = parse_err(source);
    assert!(
        matches!(err, ScriptEngineError::InvalidInputUsage { .. }),
        "{err}"
    );
}

#[test]
fn input_inside_setup_is_allowed() {
    parse(VALID_INDICATOR).expect("input.int inside setup is fine");
}

#[test]
fn top_level_state_in_strategy_is_rejected() {
    let source = r#"
counter = 0

def setup():
    pass

def process():
    pass
"#;
    let err = parse_err(source);
    match err {
        ScriptEngineError::StrategyGlobalVariable { name, line, col, .. } => {
            assert_eq!(name, "counter");
            assert_eq!(line, 2);
            assert_eq!(col, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn import_bindings_and_export_are_allowed_at_top_level() {
    let source = r#"
util = import_script("util")
export = 5

def setup():
    pass

def process():
    return util
"#;
    let script = parse(source).expect("parses");
    assert_eq!(script.kind(), ScriptKind::Indicator);
    assert_eq!(
        script.metadata().imports.get("util").map(String::as_str),
        Some("util")
    );
    assert!(script.metadata().exports.contains("export"));
}

#[test]
fn reserved_name_as_export_source() {
    let err = parse_err("export = __foo__\n");
    match err {
        ScriptEngineError::ReservedVariableName { name, line, col, .. } => {
            assert_eq!(name, "__foo__");
            assert_eq!(line, 1);
            assert!(col >= 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reserved_name_as_export_dict_key() {
    let err = parse_err("export = {\"__k__\": 1}\n");
    match err {
        ScriptEngineError::ReservedVariableName { name, .. } => assert_eq!(name, "__k__"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reserved_name_as_top_level_binding() {
    let err = parse_err("__bar__ = 1\nexport = 2\n");
    match err {
        ScriptEngineError::ReservedVariableName { name, .. } => assert_eq!(name, "__bar__"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reserved_check_wins_over_global_variable_check() {
    let source = r#"
__state__ = 1

def setup():
    pass

def process():
    pass
"#;
    let err = parse_err(source);
    assert!(
        matches!(err, ScriptEngineError::ReservedVariableName { .. }),
        "{err}"
    );
}

#[test]
fn syntax_error_carries_location() {
    let err = parse_err("def setup(:\n    pass\n");
    match err {
        ScriptEngineError::Parse {
            source_id,
            line,
            col,
            ..
        } => {
            assert_eq!(source_id, "test");
            assert_eq!(line, 1);
            assert!(col >= 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_indent_is_a_syntax_error() {
    let err = parse_err("def setup():\npass\n");
    assert!(matches!(err, ScriptEngineError::Parse { .. }), "{err}");
}

#[test]
fn metadata_records_setup_scoped_imports_only_when_top_level() {
    let source = r#"
def setup():
    global u
    u = import_script("util")

def process():
    return u
"#;
    let script = parse(source).expect("parses");
    // The binding is inside setup, not top level; resolution still works at
    // runtime but is not recorded statically.
    assert!(script.metadata().imports.is_empty());
}

#[test]
fn script_id_flows_into_metadata() {
    let script = ScriptParser::new()
        .parse(VALID_LIBRARY, "libs/momentum", None)
        .expect("parses");
    assert_eq!(script.id(), "libs/momentum");
    assert_eq!(script.name(), "libs/momentum");
}
