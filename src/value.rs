use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Stmt,
    context::ExecutionContext,
    diagnostics::{EvalError, EvalResult},
    environment::EnvironmentRef,
    registry::Namespace,
    runtime::Evaluator,
};

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn none() -> Self {
        Self::new(ValueKind::None)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(value.into()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::new(ValueKind::List(values))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Map(entries))
    }

    pub fn namespace(ns: Rc<dyn Namespace>) -> Self {
        Self::new(ValueKind::Namespace(ns))
    }

    pub fn context(ctx: Rc<ExecutionContext>) -> Self {
        Self::new(ValueKind::Context(ctx))
    }

    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&Evaluator, &[Value], &IndexMap<String, Value>) -> EvalResult<Value> + 'static,
    {
        Self::new(ValueKind::Native(NativeFunction {
            name: Rc::from(name),
            func: Rc::new(func),
        }))
    }

    pub fn is_none(&self) -> bool {
        matches!(&*self.0, ValueKind::None)
    }

    pub fn is_int(&self) -> bool {
        matches!(&*self.0, ValueKind::Int(_))
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::None => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::Str(s) => !s.is_empty(),
            ValueKind::List(values) => !values.is_empty(),
            ValueKind::Map(map) => !map.is_empty(),
            ValueKind::Function(_)
            | ValueKind::Native(_)
            | ValueKind::Namespace(_)
            | ValueKind::Context(_)
            | ValueKind::Iterator(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::None => "NoneType",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::Str(_) => "str",
            ValueKind::List(_) => "list",
            ValueKind::Map(_) => "dict",
            ValueKind::Function(_) => "function",
            ValueKind::Native(_) => "builtin",
            ValueKind::Namespace(_) => "namespace",
            ValueKind::Context(_) => "script",
            ValueKind::Iterator(_) => "iterator",
        }
    }

    /// Numeric view shared by arithmetic and the `ta` helpers.
    pub fn number(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n as f64),
            ValueKind::Float(f) => Some(*f),
            ValueKind::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::None, ValueKind::None) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Float(a), ValueKind::Float(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Float(b)) | (ValueKind::Float(b), ValueKind::Int(a)) => {
                *a as f64 == *b
            }
            (ValueKind::Str(a), ValueKind::Str(b)) => a == b,
            (ValueKind::List(a), ValueKind::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(l, r)| l.equal(r))
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).map(|rhs| value.equal(rhs)).unwrap_or(false))
            }
            _ => false,
        }
    }

    fn fmt_repr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Str(s) => write!(f, "'{s}'"),
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::None => write!(f, "None"),
            ValueKind::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n:?}"),
            ValueKind::Str(s) => write!(f, "{s}"),
            ValueKind::List(values) => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    value.fmt_repr(f)?;
                }
                write!(f, "]")
            }
            ValueKind::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{key}': ")?;
                    value.fmt_repr(f)?;
                }
                write!(f, "}}")
            }
            ValueKind::Function(fun) => write!(
                f,
                "<function {}>",
                fun.name.clone().unwrap_or_else(|| "<lambda>".into())
            ),
            ValueKind::Native(fun) => write!(f, "<builtin {}>", fun.name),
            ValueKind::Namespace(_) => write!(f, "<namespace>"),
            ValueKind::Context(ctx) => write!(f, "<script {}>", ctx.display_name()),
            ValueKind::Iterator(_) => write!(f, "<iterator>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_repr(f)
    }
}

pub enum ValueKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Function(UserFunction),
    Native(NativeFunction),
    Namespace(Rc<dyn Namespace>),
    Context(Rc<ExecutionContext>),
    Iterator(Rc<RefCell<IterState>>),
}

pub struct IterState {
    pub items: Vec<Value>,
    pub pos: usize,
}

/// A function defined by script code. Parameter defaults are evaluated at
/// definition time; the captured environment is the defining scope.
#[derive(Clone)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<ParamSpec>,
    pub body: Rc<Vec<Stmt>>,
    pub env: EnvironmentRef,
}

#[derive(Clone)]
pub struct ParamSpec {
    pub name: String,
    pub default: Option<Value>,
}

pub type NativeCallback =
    dyn Fn(&Evaluator, &[Value], &IndexMap<String, Value>) -> EvalResult<Value>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: Rc<str>,
    pub func: Rc<NativeCallback>,
}

impl NativeFunction {
    pub fn call(
        &self,
        eval: &Evaluator,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> EvalResult<Value> {
        (self.func)(eval, args, kwargs)
    }
}

/// Helpers shared by builtins and namespace implementations.
pub fn expect_str(value: &Value, name: &str) -> EvalResult<String> {
    match &*value.0 {
        ValueKind::Str(s) => Ok(s.clone()),
        _ => Err(EvalError::msg(format!(
            "`{name}` expected str but found {}",
            value.type_name()
        ))),
    }
}

pub fn expect_int(value: &Value, name: &str) -> EvalResult<i64> {
    match &*value.0 {
        ValueKind::Int(n) => Ok(*n),
        _ => Err(EvalError::msg(format!(
            "`{name}` expected int but found {}",
            value.type_name()
        ))),
    }
}

pub fn expect_number(value: &Value, name: &str) -> EvalResult<f64> {
    value.number().ok_or_else(|| {
        EvalError::msg(format!(
            "`{name}` expected a number but found {}",
            value.type_name()
        ))
    })
}

pub fn expect_list(value: &Value, name: &str) -> EvalResult<Vec<Value>> {
    match &*value.0 {
        ValueKind::List(values) => Ok(values.clone()),
        _ => Err(EvalError::msg(format!(
            "`{name}` expected list but found {}",
            value.type_name()
        ))),
    }
}

pub fn ensure_arity(args: &[Value], expected: usize, name: &str) -> EvalResult<()> {
    if args.len() != expected {
        return Err(EvalError::msg(format!(
            "`{name}` expected {expected} arguments but received {}",
            args.len()
        )));
    }
    Ok(())
}

pub fn ensure_min_arity(args: &[Value], min: usize, name: &str) -> EvalResult<()> {
    if args.len() < min {
        return Err(EvalError::msg(format!(
            "`{name}` expected at least {min} arguments but received {}",
            args.len()
        )));
    }
    Ok(())
}
