use std::cell::RefCell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Param, Stmt, StmtKind, UnaryOp},
    diagnostics::{EvalError, EvalResult, SourceSpan},
    environment::{Environment, EnvironmentRef},
    value::{ParamSpec, UserFunction, Value, ValueKind},
};

/// Tree-walking evaluator bound to one script's module globals.
///
/// Scoping is function-level: a call creates a single child scope whose
/// parent chain ends at the module globals, and plain assignment binds in
/// the current scope unless the name was declared `global`, in which case
/// it binds at module level. Blocks do not open scopes, so a binding made
/// inside `if`/`while`/`for` is visible for the rest of the function.
pub struct Evaluator {
    globals: EnvironmentRef,
}

struct Frame {
    env: EnvironmentRef,
    global_names: RefCell<IndexSet<String>>,
}

impl Frame {
    fn new(env: EnvironmentRef) -> Self {
        Self {
            env,
            global_names: RefCell::new(IndexSet::new()),
        }
    }

    fn is_global(&self, name: &str) -> bool {
        self.global_names.borrow().contains(name)
    }
}

enum FlowControl {
    Next,
    Return(Value),
    Break,
    Continue,
}

impl Evaluator {
    pub fn new(globals: EnvironmentRef) -> Self {
        Self { globals }
    }

    pub fn globals(&self) -> &EnvironmentRef {
        &self.globals
    }

    /// Executes top-level statements directly against the module globals.
    pub fn exec_program(&self, stmts: &[Stmt]) -> EvalResult<()> {
        let frame = Frame::new(Rc::clone(&self.globals));
        for stmt in stmts {
            match self.exec_stmt(&frame, stmt)? {
                FlowControl::Next => {}
                FlowControl::Return(_) => {
                    return Err(EvalError::msg("`return` outside function").with_span(stmt.span));
                }
                FlowControl::Break | FlowControl::Continue => {
                    return Err(
                        EvalError::msg("loop control flow outside loop").with_span(stmt.span)
                    );
                }
            }
        }
        Ok(())
    }

    fn exec_block(&self, frame: &Frame, stmts: &[Stmt]) -> EvalResult<FlowControl> {
        for stmt in stmts {
            match self.exec_stmt(frame, stmt)? {
                FlowControl::Next => {}
                other => return Ok(other),
            }
        }
        Ok(FlowControl::Next)
    }

    fn exec_stmt(&self, frame: &Frame, stmt: &Stmt) -> EvalResult<FlowControl> {
        match &stmt.kind {
            StmtKind::FunctionDef { name, params, body } => {
                let params = self.eval_params(frame, params)?;
                let function = UserFunction {
                    name: Some(name.clone()),
                    params,
                    body: Rc::new(body.clone()),
                    env: Rc::clone(&frame.env),
                };
                self.assign_name(frame, name, Value::new(ValueKind::Function(function)));
                Ok(FlowControl::Next)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(frame, expr)?,
                    None => Value::none(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Assign { target, value } => {
                let value = self.evaluate(frame, value)?;
                self.assign_target(frame, target, value)?;
                Ok(FlowControl::Next)
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.evaluate(frame, target)?;
                let operand = self.evaluate(frame, value)?;
                let combined = self.binary_op(*op, current, operand, stmt.span)?;
                self.rebind_target(frame, target, combined)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Global(names) => {
                let mut declared = frame.global_names.borrow_mut();
                for name in names {
                    declared.insert(name.clone());
                }
                Ok(FlowControl::Next)
            }
            StmtKind::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    if self.evaluate(frame, condition)?.is_truthy() {
                        return self.exec_block(frame, body);
                    }
                }
                if let Some(body) = else_body {
                    return self.exec_block(frame, body);
                }
                Ok(FlowControl::Next)
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(frame, condition)?.is_truthy() {
                    match self.exec_block(frame, body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(frame, iterable)?;
                for item in self.iterate_value(&iterable_value, iterable.span)? {
                    self.assign_name(frame, binding, item);
                    match self.exec_block(frame, body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Expr(expr) => {
                self.evaluate(frame, expr)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
            StmtKind::Pass => Ok(FlowControl::Next),
        }
    }

    fn eval_params(&self, frame: &Frame, params: &[Param]) -> EvalResult<Vec<ParamSpec>> {
        params
            .iter()
            .map(|param| {
                let default = match &param.default {
                    Some(expr) => Some(self.evaluate(frame, expr)?),
                    None => None,
                };
                Ok(ParamSpec {
                    name: param.name.clone(),
                    default,
                })
            })
            .collect()
    }

    fn assign_name(&self, frame: &Frame, name: &str, value: Value) {
        if frame.is_global(name) {
            self.globals.borrow_mut().define(name.to_string(), value);
        } else {
            frame.env.borrow_mut().define(name.to_string(), value);
        }
    }

    fn lookup_name(&self, frame: &Frame, name: &str, span: SourceSpan) -> EvalResult<Value> {
        let found = if frame.is_global(name) {
            self.globals.borrow().get_local(name)
        } else {
            Environment::get(&frame.env, name)
        };
        found.ok_or_else(|| {
            EvalError::msg(format!("name `{name}` is not defined")).with_span(span)
        })
    }

    fn assign_target(&self, frame: &Frame, target: &Expr, value: Value) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.assign_name(frame, name, value);
                Ok(())
            }
            _ => self.rebind_target(frame, target, value),
        }
    }

    /// Writes through attribute/index targets copy-on-write style, rebinding
    /// the owning name where it currently lives so mutations through a
    /// global container stay global.
    fn rebind_target(&self, frame: &Frame, target: &Expr, value: Value) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if frame.is_global(name) {
                    self.globals.borrow_mut().define(name.clone(), value);
                    return Ok(());
                }
                if Environment::update(&frame.env, name, value) {
                    Ok(())
                } else {
                    Err(EvalError::msg(format!("name `{name}` is not defined"))
                        .with_span(target.span))
                }
            }
            ExprKind::Attribute {
                target: owner,
                name,
            } => {
                let owner_value = self.evaluate(frame, owner)?;
                match &*owner_value.0 {
                    ValueKind::Map(map) => {
                        let mut new_map = map.clone();
                        new_map.insert(name.clone(), value);
                        self.rebind_target(frame, owner, Value::map(new_map))
                    }
                    ValueKind::Namespace(_) => Err(EvalError::msg(
                        "cannot assign to a namespace attribute",
                    )
                    .with_span(target.span)),
                    _ => Err(EvalError::msg(format!(
                        "cannot assign attribute on {}",
                        owner_value.type_name()
                    ))
                    .with_span(target.span)),
                }
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let owner_value = self.evaluate(frame, owner)?;
                let index_value = self.evaluate(frame, index)?;
                match &*owner_value.0 {
                    ValueKind::List(values) => {
                        let idx = self.list_index(&index_value, values.len(), index.span)?;
                        let mut new_values = values.clone();
                        new_values[idx] = value;
                        self.rebind_target(frame, owner, Value::list(new_values))
                    }
                    ValueKind::Map(map) => {
                        let key = self.map_key(&index_value, index.span)?;
                        let mut new_map = map.clone();
                        new_map.insert(key, value);
                        self.rebind_target(frame, owner, Value::map(new_map))
                    }
                    _ => Err(EvalError::msg(format!(
                        "cannot assign into {}",
                        owner_value.type_name()
                    ))
                    .with_span(target.span)),
                }
            }
            _ => Err(EvalError::msg("invalid assignment target").with_span(target.span)),
        }
    }

    fn evaluate(&self, frame: &Frame, expr: &Expr) -> EvalResult<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(self.literal(lit)),
            ExprKind::Name(name) => self.lookup_name(frame, name, expr.span),
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left_value = self.evaluate(frame, left)?;
                    if !left_value.is_truthy() {
                        return Ok(left_value);
                    }
                    self.evaluate(frame, right)
                }
                BinaryOp::Or => {
                    let left_value = self.evaluate(frame, left)?;
                    if left_value.is_truthy() {
                        return Ok(left_value);
                    }
                    self.evaluate(frame, right)
                }
                _ => {
                    let left_value = self.evaluate(frame, left)?;
                    let right_value = self.evaluate(frame, right)?;
                    self.binary_op(*op, left_value, right_value, expr.span)
                }
            },
            ExprKind::Unary { op, operand } => {
                let value = self.evaluate(frame, operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
                    UnaryOp::Neg => match &*value.0 {
                        ValueKind::Int(n) => Ok(Value::int(-n)),
                        ValueKind::Float(f) => Ok(Value::float(-f)),
                        _ => Err(EvalError::msg(format!(
                            "bad operand type for unary -: {}",
                            value.type_name()
                        ))
                        .with_span(expr.span)),
                    },
                    UnaryOp::Pos => match &*value.0 {
                        ValueKind::Int(_) | ValueKind::Float(_) => Ok(value),
                        _ => Err(EvalError::msg(format!(
                            "bad operand type for unary +: {}",
                            value.type_name()
                        ))
                        .with_span(expr.span)),
                    },
                }
            }
            ExprKind::Call {
                callee,
                args,
                kwargs,
            } => {
                let callee_value = self.evaluate(frame, callee)?;
                let mut eval_args = Vec::with_capacity(args.len());
                for arg in args {
                    eval_args.push(self.evaluate(frame, arg)?);
                }
                let mut eval_kwargs = IndexMap::new();
                for (name, value_expr) in kwargs {
                    let value = self.evaluate(frame, value_expr)?;
                    eval_kwargs.insert(name.clone(), value);
                }
                self.call_value(&callee_value, eval_args, eval_kwargs, Some(expr.span))
            }
            ExprKind::Attribute { target, name } => {
                let target_value = self.evaluate(frame, target)?;
                self.attribute(&target_value, name, expr.span)
            }
            ExprKind::Index { target, index } => {
                let target_value = self.evaluate(frame, target)?;
                let index_value = self.evaluate(frame, index)?;
                self.index(&target_value, &index_value, expr.span)
            }
            ExprKind::Slice {
                target,
                lower,
                upper,
            } => {
                let target_value = self.evaluate(frame, target)?;
                let lower = match lower {
                    Some(expr) => Some(self.evaluate(frame, expr)?),
                    None => None,
                };
                let upper = match upper {
                    Some(expr) => Some(self.evaluate(frame, expr)?),
                    None => None,
                };
                self.slice(&target_value, lower, upper, expr.span)
            }
            ExprKind::List(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(frame, element)?);
                }
                Ok(Value::list(values))
            }
            ExprKind::Dict(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key_value = self.evaluate(frame, key_expr)?;
                    let key = self.map_key(&key_value, key_expr.span)?;
                    let value = self.evaluate(frame, value_expr)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            ExprKind::Lambda { params, body } => {
                let params = self.eval_params(frame, params)?;
                let body_stmt = Stmt {
                    span: body.span,
                    kind: StmtKind::Return(Some((**body).clone())),
                };
                let function = UserFunction {
                    name: None,
                    params,
                    body: Rc::new(vec![body_stmt]),
                    env: Rc::clone(&frame.env),
                };
                Ok(Value::new(ValueKind::Function(function)))
            }
        }
    }

    /// Invokes any callable value. Natives receive the evaluator so that
    /// higher-order builtins (`map`, `filter`, `sorted`) can call back in.
    pub fn call_value(
        &self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: IndexMap<String, Value>,
        span: Option<SourceSpan>,
    ) -> EvalResult<Value> {
        let attach = |err: EvalError| match span {
            Some(span) => err.or_span(span),
            None => err,
        };
        match &*callee.0 {
            ValueKind::Native(fun) => fun.call(self, &args, &kwargs).map_err(attach),
            ValueKind::Namespace(ns) => ns.call(self, &args, &kwargs).map_err(attach),
            ValueKind::Function(fun) => {
                let env = self.bind_params(fun, args, kwargs).map_err(attach)?;
                let frame = Frame::new(env);
                match self.exec_block(&frame, &fun.body)? {
                    FlowControl::Return(value) => Ok(value),
                    FlowControl::Next => Ok(Value::none()),
                    FlowControl::Break | FlowControl::Continue => {
                        Err(attach(EvalError::msg("loop control flow outside loop")))
                    }
                }
            }
            _ => Err(attach(EvalError::msg(format!(
                "{} object is not callable",
                callee.type_name()
            )))),
        }
    }

    fn bind_params(
        &self,
        fun: &UserFunction,
        args: Vec<Value>,
        mut kwargs: IndexMap<String, Value>,
    ) -> EvalResult<EnvironmentRef> {
        let label = fun.name.clone().unwrap_or_else(|| "<lambda>".into());
        if args.len() > fun.params.len() {
            return Err(EvalError::msg(format!(
                "{label}() takes {} arguments but {} were given",
                fun.params.len(),
                args.len()
            )));
        }
        let env = Environment::with_parent(Rc::clone(&fun.env));
        let mut positional = args.into_iter();
        for param in &fun.params {
            let bound = match positional.next() {
                Some(value) => {
                    if kwargs.contains_key(&param.name) {
                        return Err(EvalError::msg(format!(
                            "{label}() got multiple values for argument `{}`",
                            param.name
                        )));
                    }
                    value
                }
                None => match kwargs.shift_remove(&param.name) {
                    Some(value) => value,
                    None => match &param.default {
                        Some(default) => default.clone(),
                        None => {
                            return Err(EvalError::msg(format!(
                                "{label}() missing required argument `{}`",
                                param.name
                            )));
                        }
                    },
                },
            };
            env.borrow_mut().define(param.name.clone(), bound);
        }
        if let Some(name) = kwargs.keys().next() {
            return Err(EvalError::msg(format!(
                "{label}() got an unexpected keyword argument `{name}`"
            )));
        }
        Ok(env)
    }

    fn literal(&self, literal: &Literal) -> Value {
        match literal {
            Literal::Int(n) => Value::int(*n),
            Literal::Float(n) => Value::float(*n),
            Literal::Bool(b) => Value::bool(*b),
            Literal::Str(s) => Value::string(s.clone()),
            Literal::None => Value::none(),
        }
    }

    fn binary_op(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        span: SourceSpan,
    ) -> EvalResult<Value> {
        use BinaryOp::*;
        match op {
            Add => match (&*left.0, &*right.0) {
                (ValueKind::Int(a), ValueKind::Int(b)) => Ok(Value::int(a + b)),
                (ValueKind::Str(a), ValueKind::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
                (ValueKind::List(a), ValueKind::List(b)) => {
                    let mut values = a.clone();
                    values.extend(b.iter().cloned());
                    Ok(Value::list(values))
                }
                _ => self
                    .numeric(&left, &right, "+", span)
                    .map(|(a, b)| Value::float(a + b)),
            },
            Sub => match (&*left.0, &*right.0) {
                (ValueKind::Int(a), ValueKind::Int(b)) => Ok(Value::int(a - b)),
                _ => self
                    .numeric(&left, &right, "-", span)
                    .map(|(a, b)| Value::float(a - b)),
            },
            Mul => match (&*left.0, &*right.0) {
                (ValueKind::Int(a), ValueKind::Int(b)) => Ok(Value::int(a * b)),
                _ => self
                    .numeric(&left, &right, "*", span)
                    .map(|(a, b)| Value::float(a * b)),
            },
            Div => {
                let (a, b) = self.numeric(&left, &right, "/", span)?;
                if b == 0.0 {
                    return Err(EvalError::msg("division by zero").with_span(span));
                }
                Ok(Value::float(a / b))
            }
            FloorDiv => match (&*left.0, &*right.0) {
                (ValueKind::Int(a), ValueKind::Int(b)) => {
                    if *b == 0 {
                        return Err(EvalError::msg("division by zero").with_span(span));
                    }
                    Ok(Value::int(a.div_euclid(*b)))
                }
                _ => {
                    let (a, b) = self.numeric(&left, &right, "//", span)?;
                    if b == 0.0 {
                        return Err(EvalError::msg("division by zero").with_span(span));
                    }
                    Ok(Value::float((a / b).floor()))
                }
            },
            Mod => match (&*left.0, &*right.0) {
                (ValueKind::Int(a), ValueKind::Int(b)) => {
                    if *b == 0 {
                        return Err(EvalError::msg("division by zero").with_span(span));
                    }
                    Ok(Value::int(a.rem_euclid(*b)))
                }
                _ => {
                    let (a, b) = self.numeric(&left, &right, "%", span)?;
                    if b == 0.0 {
                        return Err(EvalError::msg("division by zero").with_span(span));
                    }
                    Ok(Value::float(a - b * (a / b).floor()))
                }
            },
            Pow => match (&*left.0, &*right.0) {
                (ValueKind::Int(a), ValueKind::Int(b)) if *b >= 0 => {
                    match u32::try_from(*b).ok().and_then(|exp| a.checked_pow(exp)) {
                        Some(n) => Ok(Value::int(n)),
                        None => Ok(Value::float((*a as f64).powf(*b as f64))),
                    }
                }
                _ => self
                    .numeric(&left, &right, "**", span)
                    .map(|(a, b)| Value::float(a.powf(b))),
            },
            Eq => Ok(Value::bool(left.equal(&right))),
            NotEq => Ok(Value::bool(!left.equal(&right))),
            Lt | LtEq | Gt | GtEq => self.compare(op, &left, &right, span),
            And | Or => unreachable!("short-circuit operators are handled in evaluate"),
        }
    }

    fn numeric(
        &self,
        left: &Value,
        right: &Value,
        op: &str,
        span: SourceSpan,
    ) -> EvalResult<(f64, f64)> {
        match (left.number(), right.number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(EvalError::msg(format!(
                "unsupported operand types for {op}: {} and {}",
                left.type_name(),
                right.type_name()
            ))
            .with_span(span)),
        }
    }

    fn compare(
        &self,
        op: BinaryOp,
        left: &Value,
        right: &Value,
        span: SourceSpan,
    ) -> EvalResult<Value> {
        let ordering = match (&*left.0, &*right.0) {
            (ValueKind::Str(a), ValueKind::Str(b)) => a.partial_cmp(b),
            _ => match (left.number(), right.number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => {
                    return Err(EvalError::msg(format!(
                        "cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    ))
                    .with_span(span));
                }
            },
        };
        let result = match ordering {
            Some(ordering) => match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::GtEq => ordering.is_ge(),
                _ => unreachable!(),
            },
            // NaN comparisons are always false, as in the surface language.
            None => false,
        };
        Ok(Value::bool(result))
    }

    fn attribute(&self, target: &Value, name: &str, span: SourceSpan) -> EvalResult<Value> {
        match &*target.0 {
            ValueKind::Map(map) => map.get(name).cloned().ok_or_else(|| {
                EvalError::msg(format!("no attribute `{name}`")).with_span(span)
            }),
            ValueKind::Namespace(ns) => ns.attr(name).ok_or_else(|| {
                EvalError::msg(format!("namespace has no attribute `{name}`")).with_span(span)
            }),
            ValueKind::Context(ctx) => {
                crate::context::ExecutionContext::handle_attr(ctx, name).ok_or_else(|| {
                    EvalError::msg(format!("imported script has no attribute `{name}`"))
                        .with_span(span)
                })
            }
            _ => Err(EvalError::msg(format!(
                "{} object has no attribute `{name}`",
                target.type_name()
            ))
            .with_span(span)),
        }
    }

    fn index(&self, target: &Value, index: &Value, span: SourceSpan) -> EvalResult<Value> {
        match &*target.0 {
            ValueKind::List(values) => {
                let idx = self.list_index(index, values.len(), span)?;
                Ok(values[idx].clone())
            }
            ValueKind::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let idx = self.list_index(index, chars.len(), span)?;
                Ok(Value::string(chars[idx].to_string()))
            }
            ValueKind::Map(map) => {
                let key = self.map_key(index, span)?;
                map.get(&key)
                    .cloned()
                    .ok_or_else(|| EvalError::msg(format!("key `{key}` not found")).with_span(span))
            }
            _ => Err(EvalError::msg(format!(
                "{} object is not subscriptable",
                target.type_name()
            ))
            .with_span(span)),
        }
    }

    fn slice(
        &self,
        target: &Value,
        lower: Option<Value>,
        upper: Option<Value>,
        span: SourceSpan,
    ) -> EvalResult<Value> {
        let bound = |value: Option<Value>, default: usize, len: usize| -> EvalResult<usize> {
            match value {
                None => Ok(default),
                Some(value) => {
                    let raw = expect_index(&value).ok_or_else(|| {
                        EvalError::msg("slice bounds must be integers").with_span(span)
                    })?;
                    let resolved = if raw < 0 { raw + len as i64 } else { raw };
                    Ok(resolved.clamp(0, len as i64) as usize)
                }
            }
        };
        match &*target.0 {
            ValueKind::List(values) => {
                let len = values.len();
                let start = bound(lower, 0, len)?;
                let end = bound(upper, len, len)?;
                if start >= end {
                    return Ok(Value::list(Vec::new()));
                }
                Ok(Value::list(values[start..end].to_vec()))
            }
            ValueKind::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let len = chars.len();
                let start = bound(lower, 0, len)?;
                let end = bound(upper, len, len)?;
                if start >= end {
                    return Ok(Value::string(String::new()));
                }
                Ok(Value::string(chars[start..end].iter().collect::<String>()))
            }
            _ => Err(EvalError::msg(format!(
                "{} object cannot be sliced",
                target.type_name()
            ))
            .with_span(span)),
        }
    }

    fn list_index(&self, index: &Value, len: usize, span: SourceSpan) -> EvalResult<usize> {
        let raw = expect_index(index).ok_or_else(|| {
            EvalError::msg(format!("indices must be integers, not {}", index.type_name()))
                .with_span(span)
        })?;
        let resolved = if raw < 0 { raw + len as i64 } else { raw };
        if resolved < 0 || resolved >= len as i64 {
            return Err(EvalError::msg(format!("index {raw} out of range")).with_span(span));
        }
        Ok(resolved as usize)
    }

    fn map_key(&self, key: &Value, span: SourceSpan) -> EvalResult<String> {
        match &*key.0 {
            ValueKind::Str(s) => Ok(s.clone()),
            ValueKind::Int(n) => Ok(n.to_string()),
            _ => Err(EvalError::msg(format!(
                "dict keys must be str or int, not {}",
                key.type_name()
            ))
            .with_span(span)),
        }
    }

    /// Materializes the items of an iterable: lists yield elements, strings
    /// yield characters, dicts yield their keys.
    pub fn iterate_value(&self, value: &Value, span: SourceSpan) -> EvalResult<Vec<Value>> {
        match &*value.0 {
            ValueKind::List(values) => Ok(values.clone()),
            ValueKind::Str(text) => Ok(text
                .chars()
                .map(|ch| Value::string(ch.to_string()))
                .collect()),
            ValueKind::Map(map) => Ok(map.keys().map(|key| Value::string(key.clone())).collect()),
            ValueKind::Iterator(state) => {
                let mut state = state.borrow_mut();
                let pos = state.pos.min(state.items.len());
                let rest = state.items.split_off(pos);
                state.pos = state.items.len();
                Ok(rest)
            }
            _ => Err(EvalError::msg(format!(
                "{} object is not iterable",
                value.type_name()
            ))
            .with_span(span)),
        }
    }
}

fn expect_index(value: &Value) -> Option<i64> {
    match &*value.0 {
        ValueKind::Int(n) => Some(*n),
        ValueKind::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}
