use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const INDICATOR: &str = r#"
def setup():
    global length
    length = input.int("Length", 3)

def process():
    value = ta.sma(data.all.close, length)
    chart.plot(value, title="SMA")
    return value
"#;

const LIBRARY: &str = "export = {\"add\": lambda a, b: a + b}\n";

const STRATEGY_WITH_IMPORT: &str = r#"
def setup():
    global u
    u = import_script("mathlib")

def process():
    if u.add(1, 1) == 2:
        strategy.long()
"#;

#[test]
fn check_reports_script_kind() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("sma.fir");
    fs::write(&path, INDICATOR).expect("write script");

    let mut cmd = Command::cargo_bin("firscript").expect("binary exists");
    cmd.arg("check").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ok (indicator)"));
}

#[test]
fn check_rejects_invalid_scripts() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("broken.fir");
    fs::write(&path, "def process():\n    pass\n").expect("write script");

    let mut cmd = Command::cargo_bin("firscript").expect("binary exists");
    cmd.arg("check").arg(&path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn run_drives_indicator_over_synthetic_bars() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("sma.fir");
    fs::write(&path, INDICATOR).expect("write script");

    let mut cmd = Command::cargo_bin("firscript").expect("binary exists");
    cmd.arg("run").arg(&path).arg("--bars").arg("5");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("bar 5:"))
        .stdout(predicate::str::contains("output[chart]"))
        .stdout(predicate::str::contains("metadata[input]"));
}

#[test]
fn run_resolves_auxiliary_scripts() {
    let dir = tempdir().expect("create temp dir");
    let main_path = dir.path().join("main.fir");
    let lib_path = dir.path().join("mathlib.fir");
    fs::write(&main_path, STRATEGY_WITH_IMPORT).expect("write main");
    fs::write(&lib_path, LIBRARY).expect("write lib");

    let mut cmd = Command::cargo_bin("firscript").expect("binary exists");
    cmd.arg("run")
        .arg(&main_path)
        .arg("--with")
        .arg(format!("mathlib={}", lib_path.display()))
        .arg("--bars")
        .arg("3");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("output[strategy]"));
}

#[test]
fn run_loads_bars_from_csv() {
    let dir = tempdir().expect("create temp dir");
    let script_path = dir.path().join("close.fir");
    let csv_path = dir.path().join("bars.csv");
    fs::write(
        &script_path,
        "def setup():\n    pass\n\ndef process():\n    return data.current.close\n",
    )
    .expect("write script");
    fs::write(
        &csv_path,
        "date,open,high,low,close,volume\n2023-01-02,10,11,9,10.5,1000\n2023-01-03,10.5,12,10,11.5,1200\n",
    )
    .expect("write csv");

    let mut cmd = Command::cargo_bin("firscript").expect("binary exists");
    cmd.arg("run")
        .arg(&script_path)
        .arg("--data")
        .arg(&csv_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("bar 2: 11.5"));
}
