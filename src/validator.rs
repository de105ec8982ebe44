use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{Expr, ExprKind, Literal, Stmt, StmtKind},
    diagnostics::{line_col, ScriptEngineError, SourceSpan},
    parser,
    script::{Script, ScriptKind, ScriptMetadata},
};

/// Parses and validates script sources into [`Script`] values.
///
/// Classification is a pure function of the syntax tree: `setup` plus
/// `process` make a strategy or indicator (split on whether the tree touches
/// `strategy.*`), a lone top-level `export` assignment makes a library. The
/// validator then enforces the structural rules for the classified kind.
pub struct ScriptParser;

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

struct Shape {
    has_setup: bool,
    has_process: bool,
    export_spans: Vec<SourceSpan>,
    strategy_ref: Option<SourceSpan>,
}

impl ScriptParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(
        &self,
        source: &str,
        script_id: &str,
        kind: Option<ScriptKind>,
    ) -> Result<Script, ScriptEngineError> {
        let program = parser::parse_program(source).map_err(|err| {
            let (line, col) = line_col(source, err.span.start);
            ScriptEngineError::Parse {
                source_id: script_id.to_string(),
                line,
                col,
                message: err.message,
            }
        })?;

        let shape = analyze_shape(&program);
        let kind = self.classify(source, script_id, &shape, kind)?;
        let metadata = extract_metadata(&program, script_id, kind);
        self.validate(source, script_id, &program, &shape, kind)?;
        Ok(Script::new(source.to_string(), metadata))
    }

    fn classify(
        &self,
        _source: &str,
        script_id: &str,
        shape: &Shape,
        supplied: Option<ScriptKind>,
    ) -> Result<ScriptKind, ScriptEngineError> {
        if shape.has_setup && shape.has_process {
            if shape.strategy_ref.is_some() {
                return Ok(ScriptKind::Strategy);
            }
            return Ok(ScriptKind::Indicator);
        }
        if !shape.has_setup && !shape.has_process && !shape.export_spans.is_empty() {
            return Ok(ScriptKind::Library);
        }
        if let Some(kind) = supplied {
            // The caller asserted a kind the tree shape could not prove;
            // per-kind validation raises the most specific error if the
            // assertion does not hold.
            return Ok(kind);
        }
        if !shape.has_setup && !shape.has_process && shape.export_spans.is_empty() {
            return Err(ScriptEngineError::MissingKind {
                source_id: script_id.to_string(),
                line: 1,
                col: 1,
                message: "script defines neither setup()/process() nor a top-level `export`"
                    .into(),
            });
        }
        let message = if shape.has_setup {
            "script defines setup() without process()"
        } else {
            "script defines process() without setup()"
        };
        Err(ScriptEngineError::ConflictingKind {
            source_id: script_id.to_string(),
            line: 1,
            col: 1,
            message: message.into(),
        })
    }

    fn validate(
        &self,
        source: &str,
        script_id: &str,
        program: &[Stmt],
        shape: &Shape,
        kind: ScriptKind,
    ) -> Result<(), ScriptEngineError> {
        let at = |span: SourceSpan| line_col(source, span.start);

        // Reserved dunder names can never be bound or exported, whatever
        // the script kind.
        self.check_reserved_names(source, script_id, program)?;

        match kind {
            ScriptKind::Strategy | ScriptKind::Indicator => {
                if !shape.has_setup || !shape.has_process {
                    let mut missing = Vec::new();
                    if !shape.has_setup {
                        missing.push("setup");
                    }
                    if !shape.has_process {
                        missing.push("process");
                    }
                    return Err(ScriptEngineError::MissingRequiredFunctions {
                        source_id: script_id.to_string(),
                        line: 1,
                        col: 1,
                        message: format!(
                            "{kind} script is missing required functions: {}",
                            missing.join(", ")
                        ),
                    });
                }
                if kind == ScriptKind::Indicator {
                    if let Some(span) = shape.strategy_ref {
                        let (line, col) = at(span);
                        return Err(ScriptEngineError::StrategyFunctionInIndicator {
                            source_id: script_id.to_string(),
                            line,
                            col,
                        });
                    }
                }
                self.check_top_level_assignments(source, script_id, program)?;
            }
            ScriptKind::Library => {
                if shape.has_setup || shape.has_process {
                    return Err(ScriptEngineError::ConflictingKind {
                        source_id: script_id.to_string(),
                        line: 1,
                        col: 1,
                        message: "library scripts must not define setup() or process()".into(),
                    });
                }
                if let Some(span) = shape.strategy_ref {
                    let (line, col) = at(span);
                    return Err(ScriptEngineError::StrategyFunctionInIndicator {
                        source_id: script_id.to_string(),
                        line,
                        col,
                    });
                }
                match shape.export_spans.len() {
                    0 => {
                        return Err(ScriptEngineError::NoExports {
                            source_id: script_id.to_string(),
                            line: 1,
                            col: 1,
                        });
                    }
                    1 => {}
                    _ => {
                        let (line, col) = at(shape.export_spans[1]);
                        return Err(ScriptEngineError::MultipleExports {
                            source_id: script_id.to_string(),
                            line,
                            col,
                        });
                    }
                }
            }
        }

        self.check_input_usage(source, script_id, program)?;
        Ok(())
    }

    /// `input.*` calls may appear only inside the body of `setup`.
    fn check_input_usage(
        &self,
        source: &str,
        script_id: &str,
        program: &[Stmt],
    ) -> Result<(), ScriptEngineError> {
        let mut offending: Option<SourceSpan> = None;
        for stmt in program {
            if let StmtKind::FunctionDef { name, .. } = &stmt.kind {
                if name == "setup" {
                    continue;
                }
            }
            walk_stmt(stmt, &mut |expr| {
                if offending.is_some() {
                    return;
                }
                if let ExprKind::Call { callee, .. } = &expr.kind {
                    if let ExprKind::Attribute { target, .. } = &callee.kind {
                        if let ExprKind::Name(root) = &target.kind {
                            if root == "input" {
                                offending = Some(expr.span);
                            }
                        }
                    }
                }
            });
            if let Some(span) = offending {
                let (line, col) = line_col(source, span.start);
                return Err(ScriptEngineError::InvalidInputUsage {
                    source_id: script_id.to_string(),
                    line,
                    col,
                });
            }
        }
        Ok(())
    }

    /// Strategies and indicators may only bind `export` or an
    /// `import_script` alias at top level; persistent state is declared
    /// inside setup() through `global`.
    fn check_top_level_assignments(
        &self,
        source: &str,
        script_id: &str,
        program: &[Stmt],
    ) -> Result<(), ScriptEngineError> {
        for stmt in program {
            let (target, allowed) = match &stmt.kind {
                StmtKind::Assign { target, value } => {
                    let allowed = match &target.kind {
                        ExprKind::Name(name) if name == "export" => true,
                        ExprKind::Name(_) => is_import_call(value),
                        _ => false,
                    };
                    (Some(target), allowed)
                }
                StmtKind::AugAssign { target, .. } => (Some(target), false),
                _ => (None, true),
            };
            if !allowed {
                let target = target.expect("disallowed assignment always has a target");
                let name = match &target.kind {
                    ExprKind::Name(name) => name.clone(),
                    _ => "<expression>".to_string(),
                };
                let (line, col) = line_col(source, stmt.span.start);
                return Err(ScriptEngineError::StrategyGlobalVariable {
                    source_id: script_id.to_string(),
                    line,
                    col,
                    name,
                });
            }
        }
        Ok(())
    }

    /// Dunder names cannot be bound at top level, exported directly, or
    /// appear as string keys of a dict literal assigned to `export`.
    fn check_reserved_names(
        &self,
        source: &str,
        script_id: &str,
        program: &[Stmt],
    ) -> Result<(), ScriptEngineError> {
        let reserved = |name: &str, span: SourceSpan| {
            let (line, col) = line_col(source, span.start);
            ScriptEngineError::ReservedVariableName {
                source_id: script_id.to_string(),
                line,
                col,
                name: name.to_string(),
            }
        };
        for stmt in program {
            if let StmtKind::Assign { target, value } = &stmt.kind {
                if let ExprKind::Name(name) = &target.kind {
                    if is_reserved_name(name) {
                        return Err(reserved(name, target.span));
                    }
                    if name == "export" {
                        if let ExprKind::Name(value_name) = &value.kind {
                            if is_reserved_name(value_name) {
                                return Err(reserved(value_name, value.span));
                            }
                        }
                        if let ExprKind::Dict(entries) = &value.kind {
                            for (key, _) in entries {
                                if let ExprKind::Literal(Literal::Str(key_name)) = &key.kind {
                                    if is_reserved_name(key_name) {
                                        return Err(reserved(key_name, key.span));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_reserved_name(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn is_import_call(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call {
            callee,
            args,
            kwargs,
        } => {
            matches!(&callee.kind, ExprKind::Name(name) if name == "import_script")
                && kwargs.is_empty()
                && args.len() == 1
                && matches!(&args[0].kind, ExprKind::Literal(Literal::Str(_)))
        }
        _ => false,
    }
}

fn analyze_shape(program: &[Stmt]) -> Shape {
    let mut shape = Shape {
        has_setup: false,
        has_process: false,
        export_spans: Vec::new(),
        strategy_ref: None,
    };
    for stmt in program {
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } => {
                if name == "setup" {
                    shape.has_setup = true;
                } else if name == "process" {
                    shape.has_process = true;
                }
            }
            StmtKind::Assign { target, .. } => {
                if let ExprKind::Name(name) = &target.kind {
                    if name == "export" {
                        shape.export_spans.push(stmt.span);
                    }
                }
            }
            _ => {}
        }
    }
    for stmt in program {
        walk_stmt(stmt, &mut |expr| {
            if shape.strategy_ref.is_some() {
                return;
            }
            if let ExprKind::Attribute { target, .. } = &expr.kind {
                if let ExprKind::Name(root) = &target.kind {
                    if root == "strategy" {
                        shape.strategy_ref = Some(expr.span);
                    }
                }
            }
        });
    }
    shape
}

fn extract_metadata(program: &[Stmt], script_id: &str, kind: ScriptKind) -> ScriptMetadata {
    let mut exports = IndexSet::new();
    let mut imports = IndexMap::new();
    for stmt in program {
        if let StmtKind::Assign { target, value } = &stmt.kind {
            if let ExprKind::Name(name) = &target.kind {
                if name == "export" {
                    exports.insert(name.clone());
                }
                if is_import_call(value) {
                    if let ExprKind::Call { args, .. } = &value.kind {
                        if let ExprKind::Literal(Literal::Str(imported)) = &args[0].kind {
                            imports.insert(name.clone(), imported.clone());
                        }
                    }
                }
            }
        }
    }
    ScriptMetadata {
        id: script_id.to_string(),
        name: Some(script_id.to_string()),
        kind,
        exports,
        imports,
    }
}

/// Visits every expression in a statement tree, including nested function
/// bodies and default parameter values.
fn walk_stmt(stmt: &Stmt, visit: &mut impl FnMut(&Expr)) {
    match &stmt.kind {
        StmtKind::FunctionDef { params, body, .. } => {
            for param in params {
                if let Some(default) = &param.default {
                    walk_expr(default, visit);
                }
            }
            for stmt in body {
                walk_stmt(stmt, visit);
            }
        }
        StmtKind::Return(expr) => {
            if let Some(expr) = expr {
                walk_expr(expr, visit);
            }
        }
        StmtKind::Assign { target, value } => {
            walk_expr(target, visit);
            walk_expr(value, visit);
        }
        StmtKind::AugAssign { target, value, .. } => {
            walk_expr(target, visit);
            walk_expr(value, visit);
        }
        StmtKind::If {
            branches,
            else_body,
        } => {
            for (condition, body) in branches {
                walk_expr(condition, visit);
                for stmt in body {
                    walk_stmt(stmt, visit);
                }
            }
            if let Some(body) = else_body {
                for stmt in body {
                    walk_stmt(stmt, visit);
                }
            }
        }
        StmtKind::While { condition, body } => {
            walk_expr(condition, visit);
            for stmt in body {
                walk_stmt(stmt, visit);
            }
        }
        StmtKind::For { iterable, body, .. } => {
            walk_expr(iterable, visit);
            for stmt in body {
                walk_stmt(stmt, visit);
            }
        }
        StmtKind::Expr(expr) => walk_expr(expr, visit),
        StmtKind::Global(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
    }
}

fn walk_expr(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(expr);
    match &expr.kind {
        ExprKind::Binary { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        ExprKind::Unary { operand, .. } => walk_expr(operand, visit),
        ExprKind::Call {
            callee,
            args,
            kwargs,
        } => {
            walk_expr(callee, visit);
            for arg in args {
                walk_expr(arg, visit);
            }
            for (_, value) in kwargs {
                walk_expr(value, visit);
            }
        }
        ExprKind::Attribute { target, .. } => walk_expr(target, visit),
        ExprKind::Index { target, index } => {
            walk_expr(target, visit);
            walk_expr(index, visit);
        }
        ExprKind::Slice {
            target,
            lower,
            upper,
        } => {
            walk_expr(target, visit);
            if let Some(lower) = lower {
                walk_expr(lower, visit);
            }
            if let Some(upper) = upper {
                walk_expr(upper, visit);
            }
        }
        ExprKind::List(elements) => {
            for element in elements {
                walk_expr(element, visit);
            }
        }
        ExprKind::Dict(entries) => {
            for (key, value) in entries {
                walk_expr(key, visit);
                walk_expr(value, visit);
            }
        }
        ExprKind::Lambda { params, body } => {
            for param in params {
                if let Some(default) = &param.default {
                    walk_expr(default, visit);
                }
            }
            walk_expr(body, visit);
        }
        ExprKind::Literal(_) | ExprKind::Name(_) => {}
    }
}
