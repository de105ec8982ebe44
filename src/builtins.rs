use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{EvalError, EvalResult},
    environment::EnvironmentRef,
    runtime::Evaluator,
    value::{
        ensure_arity, ensure_min_arity, expect_list, expect_number, IterState, Value, ValueKind,
    },
};

/// Builtins that scripts may not touch. Each is installed as a shim that
/// raises `NotAllowedError` at the call site, so a script reaching for one
/// fails before any side effect.
const DENIED: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "exit",
    "quit",
];

/// Installs the restricted builtin scope into a context's globals. Namespaces
/// are merged afterwards by the execution context, so they win on collision.
pub fn install(env: &EnvironmentRef) {
    let mut scope = env.borrow_mut();
    let mut define = |name: &str, value: Value| scope.define(name.to_string(), value);

    define("print", Value::native("print", builtin_print));
    define("len", Value::native("len", builtin_len));
    define("range", Value::native("range", builtin_range));
    define("abs", Value::native("abs", builtin_abs));
    define("min", Value::native("min", builtin_min));
    define("max", Value::native("max", builtin_max));
    define("sum", Value::native("sum", builtin_sum));
    define("round", Value::native("round", builtin_round));
    define("sorted", Value::native("sorted", builtin_sorted));
    define("enumerate", Value::native("enumerate", builtin_enumerate));
    define("zip", Value::native("zip", builtin_zip));
    define("map", Value::native("map", builtin_map));
    define("filter", Value::native("filter", builtin_filter));
    define("isinstance", Value::native("isinstance", builtin_isinstance));
    define("iter", Value::native("iter", builtin_iter));
    define("next", Value::native("next", builtin_next));
    define("int", Value::native("int", builtin_int));
    define("float", Value::native("float", builtin_float));
    define("str", Value::native("str", builtin_str));
    define("bool", Value::native("bool", builtin_bool));
    define("list", Value::native("list", builtin_list));
    define("dict", Value::native("dict", builtin_dict));

    for &name in DENIED {
        define(
            name,
            Value::native(name, move |_, _, _| Err(EvalError::not_allowed(name))),
        );
    }
}

fn builtin_print(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    let rendered: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::none())
}

fn builtin_len(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 1, "len")?;
    let len = match &*args[0].0 {
        ValueKind::Str(s) => s.chars().count(),
        ValueKind::List(values) => values.len(),
        ValueKind::Map(map) => map.len(),
        _ => {
            return Err(EvalError::msg(format!(
                "object of type {} has no len()",
                args[0].type_name()
            )));
        }
    };
    Ok(Value::int(len as i64))
}

fn builtin_range(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_min_arity(args, 1, "range")?;
    if args.len() > 3 {
        return Err(EvalError::msg("range expects at most 3 arguments"));
    }
    let as_int = |value: &Value| crate::value::expect_int(value, "range");
    let (start, stop, step) = match args.len() {
        1 => (0, as_int(&args[0])?, 1),
        2 => (as_int(&args[0])?, as_int(&args[1])?, 1),
        _ => (as_int(&args[0])?, as_int(&args[1])?, as_int(&args[2])?),
    };
    if step == 0 {
        return Err(EvalError::msg("range step must not be zero"));
    }
    let mut values = Vec::new();
    let mut current = start;
    if step > 0 {
        while current < stop {
            values.push(Value::int(current));
            current += step;
        }
    } else {
        while current > stop {
            values.push(Value::int(current));
            current += step;
        }
    }
    Ok(Value::list(values))
}

fn builtin_abs(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 1, "abs")?;
    match &*args[0].0 {
        ValueKind::Int(n) => Ok(Value::int(n.abs())),
        ValueKind::Float(f) => Ok(Value::float(f.abs())),
        _ => Err(EvalError::msg(format!(
            "bad operand type for abs(): {}",
            args[0].type_name()
        ))),
    }
}

fn extremum(args: &[Value], name: &str, want_max: bool) -> EvalResult<Value> {
    ensure_min_arity(args, 1, name)?;
    let candidates = if args.len() == 1 {
        expect_list(&args[0], name)?
    } else {
        args.to_vec()
    };
    if candidates.is_empty() {
        return Err(EvalError::msg(format!("{name}() arg is an empty sequence")));
    }
    let mut best = candidates[0].clone();
    for candidate in &candidates[1..] {
        let replace = match (&*best.0, &*candidate.0) {
            (ValueKind::Str(a), ValueKind::Str(b)) => {
                if want_max {
                    b > a
                } else {
                    b < a
                }
            }
            _ => {
                let a = expect_number(&best, name)?;
                let b = expect_number(candidate, name)?;
                if want_max {
                    b > a
                } else {
                    b < a
                }
            }
        };
        if replace {
            best = candidate.clone();
        }
    }
    Ok(best)
}

fn builtin_min(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    extremum(args, "min", false)
}

fn builtin_max(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    extremum(args, "max", true)
}

fn builtin_sum(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_min_arity(args, 1, "sum")?;
    let values = expect_list(&args[0], "sum")?;
    let mut all_int = true;
    let mut total = 0.0;
    if let Some(start) = args.get(1) {
        total = expect_number(start, "sum")?;
        all_int = start.is_int();
    }
    for value in &values {
        total += expect_number(value, "sum")?;
        all_int = all_int && value.is_int();
    }
    if all_int {
        Ok(Value::int(total as i64))
    } else {
        Ok(Value::float(total))
    }
}

fn builtin_round(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_min_arity(args, 1, "round")?;
    let number = expect_number(&args[0], "round")?;
    match args.get(1) {
        None => Ok(Value::int(number.round() as i64)),
        Some(digits) => {
            let digits = crate::value::expect_int(digits, "round")?;
            let factor = 10f64.powi(digits as i32);
            Ok(Value::float((number * factor).round() / factor))
        }
    }
}

fn builtin_sorted(
    eval: &Evaluator,
    args: &[Value],
    kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 1, "sorted")?;
    let mut values = expect_list(&args[0], "sorted")?;
    let reverse = kwargs
        .get("reverse")
        .map(|value| value.is_truthy())
        .unwrap_or(false);
    let key_fn = kwargs.get("key").cloned();

    let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(values.len());
    for value in values.drain(..) {
        let key = match &key_fn {
            Some(f) => eval.call_value(f, vec![value.clone()], IndexMap::new(), None)?,
            None => value.clone(),
        };
        keyed.push((key, value));
    }
    // Validate comparability up front, then sort with a total fallback.
    for pair in keyed.windows(2) {
        let comparable = matches!(
            (&*pair[0].0 .0, &*pair[1].0 .0),
            (ValueKind::Str(_), ValueKind::Str(_))
        ) || (pair[0].0.number().is_some() && pair[1].0.number().is_some());
        if !comparable {
            return Err(EvalError::msg("sorted() received uncomparable elements"));
        }
    }
    keyed.sort_by(|a, b| match (&*a.0 .0, &*b.0 .0) {
        (ValueKind::Str(x), ValueKind::Str(y)) => x.cmp(y),
        _ => {
            let x = a.0.number().unwrap_or(f64::NAN);
            let y = b.0.number().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
        }
    });
    if reverse {
        keyed.reverse();
    }
    Ok(Value::list(keyed.into_iter().map(|(_, v)| v).collect()))
}

fn builtin_enumerate(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_min_arity(args, 1, "enumerate")?;
    let values = expect_list(&args[0], "enumerate")?;
    let start = match args.get(1) {
        Some(value) => crate::value::expect_int(value, "enumerate")?,
        None => 0,
    };
    Ok(Value::list(
        values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| Value::list(vec![Value::int(start + idx as i64), value]))
            .collect(),
    ))
}

fn builtin_zip(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_min_arity(args, 1, "zip")?;
    let mut columns = Vec::with_capacity(args.len());
    for arg in args {
        columns.push(expect_list(arg, "zip")?);
    }
    let shortest = columns.iter().map(|col| col.len()).min().unwrap_or(0);
    let mut rows = Vec::with_capacity(shortest);
    for idx in 0..shortest {
        rows.push(Value::list(
            columns.iter().map(|col| col[idx].clone()).collect(),
        ));
    }
    Ok(Value::list(rows))
}

fn builtin_map(
    eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 2, "map")?;
    let values = expect_list(&args[1], "map")?;
    let mut mapped = Vec::with_capacity(values.len());
    for value in values {
        mapped.push(eval.call_value(&args[0], vec![value], IndexMap::new(), None)?);
    }
    Ok(Value::list(mapped))
}

fn builtin_filter(
    eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 2, "filter")?;
    let values = expect_list(&args[1], "filter")?;
    let mut kept = Vec::new();
    for value in values {
        let keep = if args[0].is_none() {
            value.is_truthy()
        } else {
            eval.call_value(&args[0], vec![value.clone()], IndexMap::new(), None)?
                .is_truthy()
        };
        if keep {
            kept.push(value);
        }
    }
    Ok(Value::list(kept))
}

fn type_matches(value: &Value, type_value: &Value) -> EvalResult<bool> {
    let type_name = match &*type_value.0 {
        ValueKind::Native(fun) => fun.name.to_string(),
        _ => {
            return Err(EvalError::msg(
                "isinstance() arg 2 must be a type or list of types",
            ));
        }
    };
    let matched = match type_name.as_str() {
        "int" => matches!(&*value.0, ValueKind::Int(_)),
        "float" => matches!(&*value.0, ValueKind::Float(_)),
        "str" => matches!(&*value.0, ValueKind::Str(_)),
        "bool" => matches!(&*value.0, ValueKind::Bool(_)),
        "list" => matches!(&*value.0, ValueKind::List(_)),
        "dict" => matches!(&*value.0, ValueKind::Map(_)),
        _ => {
            return Err(EvalError::msg(
                "isinstance() arg 2 must be a type or list of types",
            ));
        }
    };
    Ok(matched)
}

fn builtin_isinstance(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 2, "isinstance")?;
    match &*args[1].0 {
        ValueKind::List(types) => {
            for type_value in types {
                if type_matches(&args[0], type_value)? {
                    return Ok(Value::bool(true));
                }
            }
            Ok(Value::bool(false))
        }
        _ => Ok(Value::bool(type_matches(&args[0], &args[1])?)),
    }
}

fn builtin_iter(
    eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_arity(args, 1, "iter")?;
    let items = eval.iterate_value(&args[0], crate::diagnostics::SourceSpan::new(0, 0))?;
    Ok(Value::new(ValueKind::Iterator(Rc::new(RefCell::new(
        IterState { items, pos: 0 },
    )))))
}

fn builtin_next(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    ensure_min_arity(args, 1, "next")?;
    match &*args[0].0 {
        ValueKind::Iterator(state) => {
            let mut state = state.borrow_mut();
            if state.pos < state.items.len() {
                let value = state.items[state.pos].clone();
                state.pos += 1;
                Ok(value)
            } else {
                match args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(EvalError::msg("iterator is exhausted")),
                }
            }
        }
        _ => Err(EvalError::msg(format!(
            "{} object is not an iterator",
            args[0].type_name()
        ))),
    }
}

fn builtin_int(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::int(0));
    }
    ensure_arity(args, 1, "int")?;
    match &*args[0].0 {
        ValueKind::Int(n) => Ok(Value::int(*n)),
        ValueKind::Float(f) => Ok(Value::int(f.trunc() as i64)),
        ValueKind::Bool(b) => Ok(Value::int(if *b { 1 } else { 0 })),
        ValueKind::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::int)
            .map_err(|_| EvalError::msg(format!("invalid literal for int(): '{s}'"))),
        _ => Err(EvalError::msg(format!(
            "int() argument must be a number or string, not {}",
            args[0].type_name()
        ))),
    }
}

fn builtin_float(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::float(0.0));
    }
    ensure_arity(args, 1, "float")?;
    match &*args[0].0 {
        ValueKind::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| EvalError::msg(format!("could not convert string to float: '{s}'"))),
        _ => expect_number(&args[0], "float").map(Value::float),
    }
}

fn builtin_str(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::string(""));
    }
    ensure_arity(args, 1, "str")?;
    Ok(Value::string(args[0].to_string()))
}

fn builtin_bool(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::bool(false));
    }
    ensure_arity(args, 1, "bool")?;
    Ok(Value::bool(args[0].is_truthy()))
}

fn builtin_list(
    eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::list(Vec::new()));
    }
    ensure_arity(args, 1, "list")?;
    let items = eval.iterate_value(&args[0], crate::diagnostics::SourceSpan::new(0, 0))?;
    Ok(Value::list(items))
}

fn builtin_dict(
    _eval: &Evaluator,
    args: &[Value],
    _kwargs: &IndexMap<String, Value>,
) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::map(IndexMap::new()));
    }
    ensure_arity(args, 1, "dict")?;
    match &*args[0].0 {
        ValueKind::Map(map) => Ok(Value::map(map.clone())),
        _ => Err(EvalError::msg(format!(
            "dict() argument must be a dict, not {}",
            args[0].type_name()
        ))),
    }
}
