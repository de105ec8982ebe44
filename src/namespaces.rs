//! Default namespace implementations: `ta`, `input`, `chart`, `color`,
//! `strategy`, `data`, and `log`.

use std::{any::Any, cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{EvalError, EvalResult},
    registry::{Namespace, SharedMap},
    value::{ensure_arity, ensure_min_arity, expect_int, expect_str, Value, ValueKind},
};

fn expect_series(value: &Value, name: &str) -> EvalResult<Vec<f64>> {
    match &*value.0 {
        ValueKind::List(values) => values
            .iter()
            .map(|v| {
                v.number().ok_or_else(|| {
                    EvalError::msg(format!("`{name}` expected a numeric series"))
                })
            })
            .collect(),
        _ => Err(EvalError::msg(format!(
            "`{name}` expected a series (list of numbers) but found {}",
            value.type_name()
        ))),
    }
}

fn positive_length(value: &Value, name: &str) -> EvalResult<usize> {
    let length = expect_int(value, name)?;
    if length <= 0 {
        return Err(EvalError::msg(format!("`{name}` length must be positive")));
    }
    Ok(length as usize)
}

/// Technical-analysis helpers over bar series. Insufficient history yields
/// NaN rather than an error so warm-up bars stay silent.
pub struct TaNamespace;

impl TaNamespace {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TaNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for TaNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "sma" => Some(Value::native("ta.sma", |_, args, _| {
                ensure_arity(args, 2, "ta.sma")?;
                let series = expect_series(&args[0], "ta.sma")?;
                let length = positive_length(&args[1], "ta.sma")?;
                if series.len() < length {
                    return Ok(Value::float(f64::NAN));
                }
                let window = &series[series.len() - length..];
                Ok(Value::float(window.iter().sum::<f64>() / length as f64))
            })),
            "ema" => Some(Value::native("ta.ema", |_, args, _| {
                ensure_arity(args, 2, "ta.ema")?;
                let series = expect_series(&args[0], "ta.ema")?;
                let length = positive_length(&args[1], "ta.ema")?;
                if series.len() < length {
                    return Ok(Value::float(f64::NAN));
                }
                let alpha = 2.0 / (length as f64 + 1.0);
                let mut ema = series[..length].iter().sum::<f64>() / length as f64;
                for price in &series[length..] {
                    ema = alpha * price + (1.0 - alpha) * ema;
                }
                Ok(Value::float(ema))
            })),
            "rsi" => Some(Value::native("ta.rsi", |_, args, _| {
                ensure_arity(args, 2, "ta.rsi")?;
                let series = expect_series(&args[0], "ta.rsi")?;
                let length = positive_length(&args[1], "ta.rsi")?;
                if series.len() < length + 1 {
                    return Ok(Value::float(f64::NAN));
                }
                let deltas: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
                let window = &deltas[deltas.len() - length..];
                let gain: f64 = window.iter().filter(|d| **d > 0.0).sum::<f64>() / length as f64;
                let loss: f64 =
                    -window.iter().filter(|d| **d < 0.0).sum::<f64>() / length as f64;
                if loss == 0.0 {
                    return Ok(Value::float(100.0));
                }
                let rs = gain / loss;
                Ok(Value::float(100.0 - 100.0 / (1.0 + rs)))
            })),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct InputState {
    overrides: IndexMap<String, Value>,
    declared: RefCell<IndexMap<String, Value>>,
}

/// Script input parameters. Values come from the driver's override map and
/// fall back to the declared default; everything declared is reported back
/// through `generate_metadata`.
pub struct InputNamespace {
    state: Rc<InputState>,
}

impl InputNamespace {
    pub fn new(overrides: IndexMap<String, Value>) -> Self {
        Self {
            state: Rc::new(InputState {
                overrides,
                declared: RefCell::new(IndexMap::new()),
            }),
        }
    }

    fn accessor<F>(&self, name: &'static str, coerce: F) -> Value
    where
        F: Fn(&Value) -> EvalResult<Value> + 'static,
    {
        let state = Rc::clone(&self.state);
        Value::native(name, move |_, args, _| {
            ensure_min_arity(args, 2, name)?;
            let key = expect_str(&args[0], name)?;
            let raw = state.overrides.get(&key).unwrap_or(&args[1]);
            let resolved = coerce(raw)?;
            state
                .declared
                .borrow_mut()
                .insert(key, resolved.clone());
            Ok(resolved)
        })
    }
}

impl Namespace for InputNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "int" => Some(self.accessor("input.int", |value| match &*value.0 {
                ValueKind::Int(n) => Ok(Value::int(*n)),
                ValueKind::Float(f) => Ok(Value::int(*f as i64)),
                ValueKind::Str(s) => s.trim().parse::<i64>().map(Value::int).map_err(|_| {
                    EvalError::msg(format!("input.int could not parse `{s}`"))
                }),
                _ => Err(EvalError::msg(format!(
                    "input.int expected an integer, found {}",
                    value.type_name()
                ))),
            })),
            "float" => Some(self.accessor("input.float", |value| match &*value.0 {
                ValueKind::Str(s) => s.trim().parse::<f64>().map(Value::float).map_err(|_| {
                    EvalError::msg(format!("input.float could not parse `{s}`"))
                }),
                _ => value.number().map(Value::float).ok_or_else(|| {
                    EvalError::msg(format!(
                        "input.float expected a number, found {}",
                        value.type_name()
                    ))
                }),
            })),
            "bool" => Some(self.accessor("input.bool", |value| match &*value.0 {
                ValueKind::Str(s) => Ok(Value::bool(s.eq_ignore_ascii_case("true"))),
                _ => Ok(Value::bool(value.is_truthy())),
            })),
            "text" => Some(self.accessor("input.text", |value| {
                Ok(Value::string(value.to_string()))
            })),
            _ => None,
        }
    }

    fn generate_metadata(&self) -> Option<Value> {
        let declared = self.state.declared.borrow();
        if declared.is_empty() {
            return None;
        }
        Some(Value::map(declared.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Records plot requests for post-run rendering.
pub struct ChartNamespace {
    plots: Rc<RefCell<Vec<Value>>>,
}

impl ChartNamespace {
    pub fn new() -> Self {
        Self {
            plots: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn plots(&self) -> Vec<Value> {
        self.plots.borrow().clone()
    }
}

impl Default for ChartNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for ChartNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "plot" => {
                let plots = Rc::clone(&self.plots);
                Some(Value::native("chart.plot", move |_, args, kwargs| {
                    ensure_min_arity(args, 1, "chart.plot")?;
                    let mut record = IndexMap::new();
                    record.insert("value".to_string(), args[0].clone());
                    for (key, value) in kwargs {
                        record.insert(key.clone(), value.clone());
                    }
                    plots.borrow_mut().push(Value::map(record));
                    Ok(Value::none())
                }))
            }
            "line" => {
                let plots = Rc::clone(&self.plots);
                Some(Value::native("chart.line", move |_, args, kwargs| {
                    ensure_min_arity(args, 1, "chart.line")?;
                    let mut record = IndexMap::new();
                    record.insert("type".to_string(), Value::string("line"));
                    record.insert("price".to_string(), args[0].clone());
                    for (key, value) in kwargs {
                        record.insert(key.clone(), value.clone());
                    }
                    plots.borrow_mut().push(Value::map(record));
                    Ok(Value::none())
                }))
            }
            _ => None,
        }
    }

    fn generate_output(&self) -> Option<Value> {
        let plots = self.plots.borrow();
        if plots.is_empty() {
            return None;
        }
        Some(Value::list(plots.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Named colour constants plus an `rgb` helper.
pub struct ColorNamespace;

const COLORS: &[(&str, &str)] = &[
    ("red", "#FF0000"),
    ("green", "#00FF00"),
    ("blue", "#0000FF"),
    ("yellow", "#FFFF00"),
    ("black", "#000000"),
    ("white", "#FFFFFF"),
    ("gray", "#808080"),
    ("orange", "#FFA500"),
    ("purple", "#800080"),
    ("pink", "#FFC0CB"),
];

impl ColorNamespace {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ColorNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for ColorNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        if name == "rgb" {
            return Some(Value::native("color.rgb", |_, args, _| {
                ensure_arity(args, 3, "color.rgb")?;
                let channel = |value: &Value| -> EvalResult<u8> {
                    let n = expect_int(value, "color.rgb")?;
                    u8::try_from(n).map_err(|_| {
                        EvalError::msg("color.rgb channels must be in 0..=255")
                    })
                };
                let (r, g, b) = (channel(&args[0])?, channel(&args[1])?, channel(&args[2])?);
                Ok(Value::string(format!("#{r:02x}{g:02x}{b:02x}")))
            }));
        }
        COLORS
            .iter()
            .find(|(color, _)| *color == name)
            .map(|(_, hex)| Value::string(*hex))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct StrategyState {
    orders: RefCell<Vec<Value>>,
    shared: SharedMap,
}

impl StrategyState {
    fn record(&self, action: &str, kwargs: &IndexMap<String, Value>) {
        let mut record = IndexMap::new();
        record.insert("action".to_string(), Value::string(action));
        for (key, value) in kwargs {
            record.insert(key.clone(), value.clone());
        }
        self.orders.borrow_mut().push(Value::map(record));
        self.shared.borrow_mut().insert(
            "strategy".to_string(),
            Value::list(self.orders.borrow().clone()),
        );
    }
}

/// Order recording for strategy scripts. Emitted orders become the
/// namespace's post-run output and are mirrored into the shared mapping.
pub struct StrategyNamespace {
    state: Rc<StrategyState>,
}

impl StrategyNamespace {
    pub fn new(shared: SharedMap) -> Self {
        Self {
            state: Rc::new(StrategyState {
                orders: RefCell::new(Vec::new()),
                shared,
            }),
        }
    }

    pub fn orders(&self) -> Vec<Value> {
        self.state.orders.borrow().clone()
    }

    fn order_fn(&self, name: &'static str, action: &'static str) -> Value {
        let state = Rc::clone(&self.state);
        Value::native(name, move |_, _, kwargs| {
            state.record(action, kwargs);
            Ok(Value::none())
        })
    }
}

impl Namespace for StrategyNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "long" => Some(self.order_fn("strategy.long", "long")),
            "short" => Some(self.order_fn("strategy.short", "short")),
            "close" => Some(self.order_fn("strategy.close", "close")),
            "position" => {
                let state = Rc::clone(&self.state);
                Some(Value::native("strategy.position", move |_, _, _| {
                    if let Some(position) = state.shared.borrow().get("position") {
                        return Ok(position.clone());
                    }
                    let mut position = IndexMap::new();
                    position.insert("size".to_string(), Value::int(0));
                    position.insert("entry_price".to_string(), Value::float(0.0));
                    position.insert("profit".to_string(), Value::float(0.0));
                    Ok(Value::map(position))
                }))
            }
            _ => None,
        }
    }

    fn generate_output(&self) -> Option<Value> {
        let orders = self.state.orders.borrow();
        if orders.is_empty() {
            return None;
        }
        Some(Value::list(orders.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Bar access for scripts. The driver feeds bars in through
/// `set_current_bar` / `set_all_bar`; scripts read `data.current`,
/// `data.all` and `data.raw_all`. Column renames from the registry's
/// mapping are applied to `all` and `current`, never to `raw_all`.
pub struct DataNamespace {
    shared: SharedMap,
    column_mapping: IndexMap<String, String>,
    current: RefCell<Value>,
    all: RefCell<Value>,
    raw_all: RefCell<Value>,
}

impl DataNamespace {
    pub fn new(shared: SharedMap, column_mapping: IndexMap<String, String>) -> Self {
        Self {
            shared,
            column_mapping,
            current: RefCell::new(Value::none()),
            all: RefCell::new(Value::none()),
            raw_all: RefCell::new(Value::none()),
        }
    }

    fn rename_columns(&self, value: &Value) -> Value {
        if self.column_mapping.is_empty() {
            return value.clone();
        }
        match &*value.0 {
            ValueKind::Map(map) => {
                let mut renamed = IndexMap::new();
                for (key, column) in map {
                    let name = self
                        .column_mapping
                        .get(key)
                        .cloned()
                        .unwrap_or_else(|| key.clone());
                    renamed.insert(name, column.clone());
                }
                Value::map(renamed)
            }
            _ => value.clone(),
        }
    }

    fn mirror_shared(&self, key: &str, value: Value) {
        let mut shared = self.shared.borrow_mut();
        let mut entry = match shared.get("data") {
            Some(existing) => match &*existing.0 {
                ValueKind::Map(map) => map.clone(),
                _ => IndexMap::new(),
            },
            None => IndexMap::new(),
        };
        entry.insert(key.to_string(), value);
        shared.insert("data".to_string(), Value::map(entry));
    }

    /// Installs the record for the bar being processed.
    pub fn set_current_bar(&self, bar: Value) {
        let renamed = self.rename_columns(&bar);
        self.mirror_shared("current", renamed.clone());
        *self.current.borrow_mut() = renamed;
    }

    /// Installs the historical frame as a mapping from column name to series.
    pub fn set_all_bar(&self, bars: Value) {
        let renamed = self.rename_columns(&bars);
        self.mirror_shared("raw_all", bars.clone());
        self.mirror_shared("all", renamed.clone());
        *self.raw_all.borrow_mut() = bars;
        *self.all.borrow_mut() = renamed;
    }
}

impl Namespace for DataNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "current" => Some(self.current.borrow().clone()),
            "all" => Some(self.all.borrow().clone()),
            "raw_all" => Some(self.raw_all.borrow().clone()),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Forwards script log calls onto the host's `tracing` subscriber.
pub struct LogNamespace;

impl LogNamespace {
    pub fn new() -> Self {
        Self
    }

    fn emit(name: &'static str, level: &'static str) -> Value {
        Value::native(name, move |_, args, _| {
            ensure_min_arity(args, 1, name)?;
            let message = args
                .iter()
                .map(|arg| arg.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            match level {
                "debug" => tracing::debug!(target: "firscript::script", "{message}"),
                "info" => tracing::info!(target: "firscript::script", "{message}"),
                "warn" => tracing::warn!(target: "firscript::script", "{message}"),
                _ => tracing::error!(target: "firscript::script", "{message}"),
            }
            Ok(Value::none())
        })
    }
}

impl Default for LogNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for LogNamespace {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "debug" => Some(Self::emit("log.debug", "debug")),
            "info" => Some(Self::emit("log.info", "info")),
            "warn" => Some(Self::emit("log.warn", "warn")),
            "error" => Some(Self::emit("log.error", "error")),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
