use chrono::{Local, TimeZone};
use optobot::config::ExperimentConfig;
use optobot::store::table::PlateTable;
use optobot::store::{
    experiment_dir_name, ExperimentStore, ALL_DATA_FILE, ERRORS_FILE, LIQUID_VOLUMES_FILE,
    MANIFEST_FILE, MEASUREMENTS_FILE,
};
use optobot::OptobotError;
use std::fs;
use tempfile::tempdir;

fn small_config() -> ExperimentConfig {
    ExperimentConfig {
        name: "store".to_string(),
        liquid_names: vec!["water".into(), "red".into(), "blue".into()],
        measured_parameter_names: vec!["r".into(), "g".into()],
        plate_rows: 2,
        plate_columns: 3,
        plate_locations: vec![4, 5],
        batch_size: 3,
        blank_row_space: 1,
        ..Default::default()
    }
}

fn batch(iteration: usize) -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<f64>) {
    let base = iteration as f64;
    let volumes = (0..3)
        .map(|i| vec![80.0 - base - i as f64, base + 1.0 / 3.0, i as f64 + 0.1])
        .collect();
    let measured = (0..3)
        .map(|i| vec![base * 10.0 + i as f64, 2.0 / 3.0])
        .collect();
    let errors = (0..3).map(|i| base + i as f64 * 0.25).collect();
    (volumes, measured, errors)
}

#[test]
fn test_new_experiment_writes_zeroed_tables() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();

    for file in [
        LIQUID_VOLUMES_FILE,
        MEASUREMENTS_FILE,
        ERRORS_FILE,
        ALL_DATA_FILE,
        MANIFEST_FILE,
    ] {
        assert!(dir.path().join(file).exists(), "{} missing", file);
    }
    assert_eq!(store.committed_iterations(), 0);

    // Two plates of two rows with one blank row between: 2 header rows + 5 data rows.
    let volumes = fs::read_to_string(dir.path().join(LIQUID_VOLUMES_FILE)).unwrap();
    let lines: Vec<&str> = volumes.lines().collect();
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[0], ",1,1,1,2,2,2,3,3,3");
    assert_eq!(lines[1], ",water,red,blue,water,red,blue,water,red,blue");
    assert!(lines[2].starts_with("A,0,"));
    assert!(lines[4].starts_with(",0,"));
    assert!(lines[5].starts_with("A,"));

    let all_data = fs::read_to_string(dir.path().join(ALL_DATA_FILE)).unwrap();
    let mut rows = all_data.lines();
    assert_eq!(
        rows.next().unwrap(),
        "iteration_number,vol_water,vol_red,vol_blue,r,g,error"
    );
    assert_eq!(rows.count(), 12);
}

#[test]
fn test_written_iteration_reads_back_exactly() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();

    let (volumes, measured, errors) = batch(0);
    store.write_iteration(0, &volumes, &measured, &errors).unwrap();

    let record = store.read_iteration(0).unwrap();
    assert_eq!(record.volumes, volumes);
    assert_eq!(record.measurements, measured);
    assert_eq!(record.errors, errors);

    // Row 0 of all_data is well 0 of iteration 0, numbered from 1.
    let row = store.all_data().row(0);
    assert_eq!(row[0], 1.0);
    assert_eq!(&row[1..4], &volumes[0][..]);
    assert_eq!(&row[4..6], &measured[0][..]);
    assert_eq!(row[6], errors[0]);
    assert_eq!(store.all_data().row(3)[0], 0.0);
}

#[test]
fn test_reopening_preserves_every_iteration() {
    let dir = tempdir().unwrap();
    let config = small_config();
    {
        let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();
        for iteration in 0..3 {
            let (v, m, e) = batch(iteration);
            store.write_iteration(iteration, &v, &m, &e).unwrap();
        }
    }

    let store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();
    assert_eq!(store.committed_iterations(), 3);
    for iteration in 0..3 {
        let (v, m, e) = batch(iteration);
        let record = store.read_iteration(iteration).unwrap();
        assert_eq!(record.volumes, v);
        assert_eq!(record.measurements, m);
        assert_eq!(record.errors, e);
    }
}

#[test]
fn test_iteration_on_second_plate_uses_gapped_rows() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();

    for iteration in 0..3 {
        let (v, m, e) = batch(iteration);
        store.write_iteration(iteration, &v, &m, &e).unwrap();
    }

    // Iteration 2 is the first row of plate 2, after the blank separator.
    let errors = fs::read_to_string(dir.path().join(ERRORS_FILE)).unwrap();
    let lines: Vec<&str> = errors.lines().collect();
    assert_eq!(lines[0], ",1,2,3");
    assert_eq!(lines[3], ",0,0,0");
    assert_eq!(lines[4], "A,2,2.25,2.5");
}

#[test]
fn test_unusable_iteration_is_kept_across_reopen() {
    let dir = tempdir().unwrap();
    let config = small_config();
    {
        let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();
        store.write_unusable(0).unwrap();
        assert_eq!(store.committed_iterations(), 1);
    }

    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();
    assert_eq!(store.committed_iterations(), 1);
    let record = store.read_iteration(0).unwrap();
    assert!(record.volumes.iter().flatten().all(|v| v.is_nan()));
    assert!(record.measurements.iter().flatten().all(|v| v.is_nan()));
    assert!(record.errors.iter().all(|e| e.is_nan()));
    assert_eq!(store.all_data().row(0)[0], 1.0);

    let (v, m, e) = batch(1);
    store.write_iteration(1, &v, &m, &e).unwrap();
    assert_eq!(store.read_iteration(1).unwrap().volumes, v);
}

#[test]
fn test_double_and_out_of_order_writes_are_refused() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();

    let (v, m, e) = batch(0);
    store.write_iteration(0, &v, &m, &e).unwrap();
    let before = fs::read_to_string(dir.path().join(ALL_DATA_FILE)).unwrap();

    assert!(matches!(
        store.write_iteration(0, &v, &m, &e),
        Err(OptobotError::Iteration(_))
    ));
    assert!(matches!(
        store.write_iteration(2, &v, &m, &e),
        Err(OptobotError::Iteration(_))
    ));
    assert_eq!(store.committed_iterations(), 1);
    assert_eq!(
        fs::read_to_string(dir.path().join(ALL_DATA_FILE)).unwrap(),
        before
    );
}

#[test]
fn test_misshapen_batch_is_refused_without_writing() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();

    let (v, mut m, e) = batch(0);
    m[1].pop();
    assert!(matches!(
        store.write_iteration(0, &v, &m, &e),
        Err(OptobotError::Validation(_))
    ));
    assert_eq!(store.committed_iterations(), 0);
    let record = store.read_iteration(0).unwrap();
    assert!(record.volumes.iter().flatten().all(|&x| x == 0.0));
}

#[test]
fn test_manual_measurements_are_read_from_edited_csv() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();
    let mapper = config.mapper();
    let path = dir.path().join(MEASUREMENTS_FILE);
    let fields = Some(config.measured_parameter_names.clone());

    // Simulate the operator typing values for iteration 1 (row B of plate 1).
    let mut table = PlateTable::read_csv(&path, mapper.row_labels(), 3, fields).unwrap();
    let wells = mapper.resolve_iteration(1).unwrap();
    for (i, well) in wells.iter().enumerate() {
        table.write_well(well, &[i as f64 + 0.5, 42.0]).unwrap();
    }
    table.write_csv(&path).unwrap();

    let measured = store.read_manual_measurements(1).unwrap();
    assert_eq!(
        measured,
        vec![vec![0.5, 42.0], vec![1.5, 42.0], vec![2.5, 42.0]]
    );
}

#[test]
fn test_missing_manual_value_names_the_well() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let mut store = ExperimentStore::open_or_create(dir.path(), &config).unwrap();
    let mapper = config.mapper();
    let path = dir.path().join(MEASUREMENTS_FILE);

    let mut table = PlateTable::read_csv(
        &path,
        mapper.row_labels(),
        3,
        Some(config.measured_parameter_names.clone()),
    )
    .unwrap();
    let wells = mapper.resolve_iteration(0).unwrap();
    table.write_well(&wells[0], &[1.0, 2.0]).unwrap();
    table.write_well(&wells[1], &[f64::NAN, 2.0]).unwrap();
    table.write_csv(&path).unwrap();

    let err = store.read_manual_measurements(0).unwrap_err();
    assert!(matches!(err, OptobotError::Measurement(_)));
    let msg = err.to_string();
    assert!(msg.contains("A2"), "{}", msg);
    assert!(msg.contains("'r'"), "{}", msg);
}

#[test]
fn test_tables_without_manifest_are_not_overwritten() {
    let dir = tempdir().unwrap();
    let config = small_config();
    let stray = dir.path().join(ALL_DATA_FILE);
    fs::write(&stray, "precious").unwrap();

    let err = ExperimentStore::open_or_create(dir.path(), &config).unwrap_err();
    assert!(matches!(err, OptobotError::Config(_)));
    assert_eq!(fs::read_to_string(stray).unwrap(), "precious");
}

#[test]
fn test_resume_with_different_layout_is_refused() {
    let dir = tempdir().unwrap();
    let config = small_config();
    ExperimentStore::open_or_create(dir.path(), &config).unwrap();

    let mut changed = config.clone();
    changed.batch_size = 2;
    assert!(matches!(
        ExperimentStore::open_or_create(dir.path(), &changed),
        Err(OptobotError::Config(_))
    ));

    // Settings that do not move wells may change between runs.
    let mut relabelled = config.clone();
    relabelled.name = "renamed".to_string();
    relabelled.mix_cycles = 0;
    assert!(ExperimentStore::open_or_create(dir.path(), &relabelled).is_ok());
}

#[test]
fn test_experiment_dir_name_format() {
    let at = Local.with_ymd_and_hms(2025, 3, 24, 12, 36, 20).unwrap();
    assert_eq!(
        experiment_dir_name("colours", at),
        "colours_Mon-24-Mar-2025-at-12-36-20PM"
    );
}
