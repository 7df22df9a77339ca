use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn optobot(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_optobot"))
        .args(args)
        .output()
        .expect("Failed to execute binary")
}

fn experiment_dirs(output: &Path) -> Vec<PathBuf> {
    match fs::read_dir(output) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn iteration_numbers(exp_dir: &Path) -> Vec<u32> {
    let mut rdr = csv::Reader::from_path(exp_dir.join("all_data.csv")).unwrap();
    let mut numbers: Vec<u32> = rdr
        .records()
        .map(|r| r.unwrap()[0].parse::<f64>().unwrap() as u32)
        .filter(|&n| n > 0)
        .collect();
    numbers.dedup();
    numbers
}

#[test]
fn test_cli_plan_lists_wells_per_iteration() {
    let output = optobot(&["plan", "--iterations", "3"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("A1 .. A12"));
    assert!(stdout.contains("C1 .. C12"));
    assert!(!stdout.contains("D1 .. D12"));
}

#[test]
fn test_cli_plan_refuses_too_many_iterations() {
    let output = optobot(&["plan", "--iterations", "9"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not enough wells"));
}

#[test]
fn test_cli_dry_run_then_resume() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().to_str().unwrap();

    let output = optobot(&[
        "run", "--dry-run", "--iterations", "2", "--target", "10,10,10", "--seed", "1",
        "--output", out, "--name", "cli",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Experiment summary (2 iterations)"));

    let dirs = experiment_dirs(dir.path());
    assert_eq!(dirs.len(), 1);
    let exp_dir = &dirs[0];
    assert!(exp_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("cli_"));
    for file in [
        "liquid_volumes.csv",
        "measurements.csv",
        "errors.csv",
        "all_data.csv",
        "experiment.json",
        "generated_ot2_script.py",
    ] {
        assert!(exp_dir.join(file).exists(), "{} missing", file);
    }
    assert_eq!(iteration_numbers(exp_dir), vec![1, 2]);

    // Resuming with a larger budget only runs the missing iteration.
    let output = optobot(&[
        "run", "--dry-run", "--iterations", "3", "--target", "10,10,10", "--seed", "1",
        "--resume", exp_dir.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(iteration_numbers(exp_dir), vec![1, 2, 3]);
    assert_eq!(experiment_dirs(dir.path()).len(), 1);
}

#[test]
fn test_cli_run_rejects_bad_input_before_creating_anything() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("runs");

    let too_long = optobot(&[
        "run", "--dry-run", "--iterations", "9", "--target", "10,10,10",
        "--output", out.to_str().unwrap(),
    ]);
    assert!(!too_long.status.success());
    assert!(String::from_utf8_lossy(&too_long.stderr).contains("not enough wells"));

    let short_target = optobot(&[
        "run", "--dry-run", "--iterations", "2", "--target", "10,10",
        "--output", out.to_str().unwrap(),
    ]);
    assert!(!short_target.status.success());

    let greedy_space = optobot(&[
        "run", "--dry-run", "--iterations", "2", "--target", "10,10,10",
        "--search-space", "0:60,0:60,0:60", "--output", out.to_str().unwrap(),
    ]);
    assert!(!greedy_space.status.success());

    let config = dir.path().join("automatic.json");
    fs::write(&config, r#"{ "measurement_mode": "automatic" }"#).unwrap();
    let automatic = optobot(&[
        "run", "--config", config.to_str().unwrap(), "--iterations", "2",
        "--target", "10,10,10", "--output", out.to_str().unwrap(),
    ]);
    assert!(!automatic.status.success());
    assert!(String::from_utf8_lossy(&automatic.stderr).contains("automatic measurement"));

    assert!(experiment_dirs(&out).is_empty());
}
