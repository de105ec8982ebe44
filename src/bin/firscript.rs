use std::{cell::RefCell, fs, path::PathBuf, process, rc::Rc};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use tracing::error;

use firscript::{
    namespaces::DataNamespace, Importer, NamespaceRegistry, ScriptParser, Value,
};

#[derive(Parser)]
#[command(author, version, about = "FirScript backtesting script runtime")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a script without running it
    Check { script: PathBuf },
    /// Run a strategy or indicator bar-by-bar
    Run {
        script: PathBuf,
        /// Auxiliary scripts importable by name, given as name=path
        #[arg(long = "with", value_name = "NAME=PATH")]
        with: Vec<String>,
        /// CSV file of bars: date,open,high,low,close,volume
        #[arg(long)]
        data: Option<PathBuf>,
        /// Number of synthetic bars when no CSV is given
        #[arg(long, default_value = "30")]
        bars: usize,
        /// Input overrides, given as name=value
        #[arg(long = "input", value_name = "NAME=VALUE")]
        inputs: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "firscript=warn".into()),
        )
        .init();

    let args = Args::parse();
    let outcome = match args.command {
        Command::Check { script } => check(script),
        Command::Run {
            script,
            with,
            data,
            bars,
            inputs,
        } => run(script, with, data, bars, inputs),
    };
    if let Err(message) = outcome {
        error!("{message}");
        eprintln!("error: {message}");
        process::exit(1);
    }
}

fn check(path: PathBuf) -> Result<(), String> {
    let source = fs::read_to_string(&path).map_err(|err| format!("{}: {err}", path.display()))?;
    let id = script_id(&path);
    let parser = ScriptParser::new();
    let script = parser
        .parse(&source, &id, None)
        .map_err(|err| err.to_string())?;
    println!("{}: ok ({})", script.id(), script.kind());
    Ok(())
}

fn run(
    path: PathBuf,
    with: Vec<String>,
    data: Option<PathBuf>,
    bars: usize,
    inputs: Vec<String>,
) -> Result<(), String> {
    let source = fs::read_to_string(&path).map_err(|err| format!("{}: {err}", path.display()))?;
    let main_id = script_id(&path);

    let mut overrides = IndexMap::new();
    for entry in &inputs {
        let (name, value) = split_pair(entry)?;
        overrides.insert(name.to_string(), parse_input_value(value));
    }

    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(overrides, IndexMap::new());
    let registry = Rc::new(RefCell::new(registry));

    let importer = Importer::new(Rc::clone(&registry));
    importer
        .add_script(&main_id, &source, true)
        .map_err(|err| err.to_string())?;
    for entry in &with {
        let (name, aux_path) = split_pair(entry)?;
        let aux_source =
            fs::read_to_string(aux_path).map_err(|err| format!("{aux_path}: {err}"))?;
        importer
            .add_script(name, &aux_source, false)
            .map_err(|err| err.to_string())?;
    }

    let ctx = importer.build_main_script().map_err(|err| err.to_string())?;
    ctx.run_setup().map_err(|err| err.to_string())?;

    let series = match data {
        Some(csv_path) => load_bars(&csv_path)?,
        None => synthetic_bars(bars),
    };

    let data_handle = ctx
        .namespace("data")
        .ok_or_else(|| "the `data` namespace is not registered".to_string())?;
    let feed = data_handle
        .as_any()
        .downcast_ref::<DataNamespace>()
        .ok_or_else(|| "the `data` namespace is not the default implementation".to_string())?;

    for end in 1..=series.rows() {
        feed.set_all_bar(series.columns_until(end));
        feed.set_current_bar(series.row(end - 1));
        let result = ctx.run_process().map_err(|err| err.to_string())?;
        if !result.is_none() {
            println!("bar {end}: {result}");
        }
    }

    if let Some(export) = ctx.get_export() {
        println!("export: {export}");
    }
    for (name, output) in ctx.generate_outputs() {
        println!("output[{name}]: {output}");
    }
    for (name, metadata) in ctx.generate_metadatas() {
        println!("metadata[{name}]: {metadata}");
    }
    Ok(())
}

fn script_id(path: &PathBuf) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

fn split_pair(entry: &str) -> Result<(&str, &str), String> {
    entry
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{entry}`"))
}

fn parse_input_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::int(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::float(f);
    }
    match raw {
        "true" | "True" => Value::bool(true),
        "false" | "False" => Value::bool(false),
        _ => Value::string(raw),
    }
}

/// Bars held column-wise, mirroring the frame layout scripts consume.
struct BarSeries {
    timestamps: Vec<String>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl BarSeries {
    fn rows(&self) -> usize {
        self.close.len()
    }

    fn row(&self, idx: usize) -> Value {
        let mut bar = IndexMap::new();
        bar.insert(
            "timestamp".to_string(),
            Value::string(self.timestamps[idx].clone()),
        );
        bar.insert("open".to_string(), Value::float(self.open[idx]));
        bar.insert("high".to_string(), Value::float(self.high[idx]));
        bar.insert("low".to_string(), Value::float(self.low[idx]));
        bar.insert("close".to_string(), Value::float(self.close[idx]));
        bar.insert("volume".to_string(), Value::float(self.volume[idx]));
        Value::map(bar)
    }

    fn columns_until(&self, end: usize) -> Value {
        let floats =
            |values: &[f64]| Value::list(values[..end].iter().copied().map(Value::float).collect());
        let mut columns = IndexMap::new();
        columns.insert(
            "timestamp".to_string(),
            Value::list(
                self.timestamps[..end]
                    .iter()
                    .cloned()
                    .map(Value::string)
                    .collect(),
            ),
        );
        columns.insert("open".to_string(), floats(&self.open));
        columns.insert("high".to_string(), floats(&self.high));
        columns.insert("low".to_string(), floats(&self.low));
        columns.insert("close".to_string(), floats(&self.close));
        columns.insert("volume".to_string(), floats(&self.volume));
        Value::map(columns)
    }
}

fn load_bars(path: &PathBuf) -> Result<BarSeries, String> {
    let content = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut series = BarSeries {
        timestamps: Vec::new(),
        open: Vec::new(),
        high: Vec::new(),
        low: Vec::new(),
        close: Vec::new(),
        volume: Vec::new(),
    };
    for record in reader.records() {
        let record = record.map_err(|err| format!("CSV parse error: {err}"))?;
        let field = |idx: usize, name: &str| -> Result<&str, String> {
            record
                .get(idx)
                .ok_or_else(|| format!("missing {name} column"))
        };
        let date_str = field(0, "date")?;
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .map_err(|err| format!("invalid date `{date_str}`: {err}"))?;
        let number = |idx: usize, name: &str| -> Result<f64, String> {
            field(idx, name)?
                .parse::<f64>()
                .map_err(|err| format!("invalid {name} value: {err}"))
        };
        series.timestamps.push(date.format("%Y-%m-%d").to_string());
        series.open.push(number(1, "open")?);
        series.high.push(number(2, "high")?);
        series.low.push(number(3, "low")?);
        series.close.push(number(4, "close")?);
        series.volume.push(number(5, "volume").unwrap_or(0.0));
    }
    if series.rows() == 0 {
        return Err(format!("{}: no bars", path.display()));
    }
    Ok(series)
}

/// A deterministic drifting series for demo runs without a CSV.
fn synthetic_bars(count: usize) -> BarSeries {
    let mut series = BarSeries {
        timestamps: Vec::new(),
        open: Vec::new(),
        high: Vec::new(),
        low: Vec::new(),
        close: Vec::new(),
        volume: Vec::new(),
    };
    let mut price = 100.0;
    for idx in 0..count.max(1) {
        let wobble = ((idx * 7) % 5) as f64 * 0.4 - 0.8;
        let open = price;
        price += 0.3 + wobble;
        series.timestamps.push(format!("bar-{idx}"));
        series.open.push(open);
        series.high.push(open.max(price) + 0.2);
        series.low.push(open.min(price) - 0.2);
        series.close.push(price);
        series.volume.push(1000.0 + (idx as f64) * 10.0);
    }
    series
}
