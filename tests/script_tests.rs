use optobot::config::ExperimentConfig;
use optobot::dispense::{DispensePlan, ScriptGenerator, SCRIPT_FILE};
use optobot::experiment::dilute;
use regex::Regex;
use std::fs;
use tempfile::tempdir;

fn plan_for(config: &ExperimentConfig, iteration: usize) -> DispensePlan {
    let candidates: Vec<Vec<f64>> = (0..config.batch_size)
        .map(|i| vec![i as f64 * 1.5, 20.0, 1.0 / 3.0])
        .collect();
    let diluted = dilute(&candidates, config.total_volume, config.num_liquids()).unwrap();
    DispensePlan::build(config, &config.mapper(), iteration, &diluted).unwrap()
}

#[test]
fn test_regenerating_an_iteration_is_byte_identical() {
    let config = ExperimentConfig::default();
    let first = ScriptGenerator::new(&config)
        .render(&plan_for(&config, 3))
        .unwrap();
    let second = ScriptGenerator::new(&config.clone())
        .render(&plan_for(&config, 3))
        .unwrap();
    assert_eq!(first, second);

    let dir = tempdir().unwrap();
    let path = ScriptGenerator::new(&config)
        .write(dir.path(), &plan_for(&config, 3))
        .unwrap();
    assert_eq!(path, dir.path().join(SCRIPT_FILE));
    assert_eq!(fs::read_to_string(&path).unwrap(), first);
    assert!(!dir.path().join("generated_ot2_script.py.tmp").exists());
}

#[test]
fn test_script_embeds_iteration_volumes_and_targets() {
    let config = ExperimentConfig::default();
    let script = ScriptGenerator::new(&config)
        .render(&plan_for(&config, 3))
        .unwrap();

    assert!(script.contains("ITERATION = 3\n"));
    assert!(script.contains("WELLS_PER_ITERATION = 12\n"));
    assert!(script.contains("PLATE_LOCATIONS = [5]\n"));
    assert!(script.contains("LIQUIDS = [\"water\", \"blue\", \"yellow\", \"red\"]\n"));
    assert!(script.contains("\"apiLevel\": \"2.16\""));
    assert!(script.contains("MIX_AFTER = (3, 20.0)\n"));

    let volume_row = Regex::new(r"(?m)^    \[([0-9.e-]+), ([0-9.e-]+), ([0-9.e-]+), ([0-9.e-]+)\],$").unwrap();
    let rows: Vec<Vec<f64>> = volume_row
        .captures_iter(&script)
        .map(|c| (1..=4).map(|i| c[i].parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 12);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row[1], i as f64 * 1.5);
        assert_eq!(row[3], 1.0 / 3.0);
        assert!((row.iter().sum::<f64>() - 90.0).abs() < 1e-9);
    }

    let target = Regex::new(r#"(?m)^    \((\d+), "([A-Z]\d+)"\),$"#).unwrap();
    let wells: Vec<(usize, String)> = target
        .captures_iter(&script)
        .map(|c| (c[1].parse().unwrap(), c[2].to_string()))
        .collect();
    let expected: Vec<(usize, String)> = (1..=12).map(|c| (0, format!("D{}", c))).collect();
    assert_eq!(wells, expected);
}

#[test]
fn test_script_targets_follow_batches_across_plates() {
    let config = ExperimentConfig {
        plate_locations: vec![5, 6],
        batch_size: 10,
        ..Default::default()
    };
    let script = ScriptGenerator::new(&config)
        .render(&plan_for(&config, 9))
        .unwrap();

    assert!(script.contains("PLATE_LOCATIONS = [5, 6]\n"));
    let target = Regex::new(r#"(?m)^    \((\d+), "([A-Z]\d+)"\),$"#).unwrap();
    let wells: Vec<String> = target
        .captures_iter(&script)
        .map(|c| format!("{}:{}", &c[1], &c[2]))
        .collect();
    assert_eq!(
        wells,
        vec!["0:H7", "0:H8", "0:H9", "0:H10", "0:H11", "0:H12", "1:A1", "1:A2", "1:A3", "1:A4"]
    );
}

#[test]
fn test_no_mixing_when_cycles_are_zero() {
    let config = ExperimentConfig {
        mix_cycles: 0,
        ..Default::default()
    };
    let plan = plan_for(&config, 0);
    assert!(plan
        .passes
        .iter()
        .flat_map(|p| &p.transfers)
        .all(|t| t.mix_after.is_none()));

    let script = ScriptGenerator::new(&config).render(&plan).unwrap();
    assert!(script.contains("MIX_AFTER = None\n"));
}
