pub mod manifest;
pub mod table;

use self::manifest::ExperimentManifest;
use self::table::{AllDataTable, PlateTable};
use crate::config::ExperimentConfig;
use crate::error::{OptResult, OptobotError};
use crate::geometry::{AddressMapper, WellAddress};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LIQUID_VOLUMES_FILE: &str = "liquid_volumes.csv";
pub const MEASUREMENTS_FILE: &str = "measurements.csv";
pub const ERRORS_FILE: &str = "errors.csv";
pub const ALL_DATA_FILE: &str = "all_data.csv";
pub const MANIFEST_FILE: &str = "experiment.json";

const TABLE_FILES: [&str; 4] = [
    LIQUID_VOLUMES_FILE,
    MEASUREMENTS_FILE,
    ERRORS_FILE,
    ALL_DATA_FILE,
];

/// `<name>_<timestamp>`, e.g. `colours_Mon-24-Mar-2025-at-12-36-20PM`.
pub fn experiment_dir_name(name: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", name, at.format("%a-%d-%b-%Y-at-%I-%M-%S%p"))
}

/// Creates a fresh, timestamped experiment directory under `parent`.
pub fn create_experiment_dir<P: AsRef<Path>>(parent: P, name: &str) -> OptResult<PathBuf> {
    let dir = parent.as_ref().join(experiment_dir_name(name, Local::now()));
    fs::create_dir_all(&dir)?;
    info!("📂 Experiment directory: {}", dir.display());
    Ok(dir)
}

/// The values of one iteration, read back from the plate-shaped tables.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub volumes: Vec<Vec<f64>>,
    pub measurements: Vec<Vec<f64>>,
    pub errors: Vec<f64>,
}

/// Owns the four tables of one experiment directory.
#[derive(Debug)]
pub struct ExperimentStore {
    dir: PathBuf,
    mapper: AddressMapper,
    liquid_names: Vec<String>,
    measured_names: Vec<String>,
    volumes: PlateTable,
    measurements: PlateTable,
    errors: PlateTable,
    all_data: AllDataTable,
    committed: usize,
}

impl ExperimentStore {
    /// Opens the experiment in `dir`, creating and zero-filling the tables on
    /// first use. An existing experiment is loaded back as-is, so nothing
    /// already recorded is lost.
    pub fn open_or_create<P: AsRef<Path>>(dir: P, config: &ExperimentConfig) -> OptResult<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(MANIFEST_FILE);

        if manifest_path.exists() {
            let manifest = ExperimentManifest::load(&manifest_path)?;
            let expected = ExperimentManifest::fingerprint(config)?;
            if manifest.fingerprint != expected {
                return Err(OptobotError::Config(format!(
                    "{} was created with a different plate/liquid layout; refusing to resume",
                    dir.display()
                )));
            }
            return Self::load(dir, config);
        }

        if let Some(existing) = TABLE_FILES.iter().find(|f| dir.join(f).exists()) {
            return Err(OptobotError::Config(format!(
                "{} already holds {} but no {}; refusing to overwrite it",
                dir.display(),
                existing,
                MANIFEST_FILE
            )));
        }

        Self::create(dir, config)
    }

    fn empty(dir: PathBuf, config: &ExperimentConfig) -> Self {
        let mapper = config.mapper();
        let labels = mapper.row_labels();
        let columns = config.plate_columns;
        Self {
            volumes: PlateTable::zeros(labels.clone(), columns, Some(config.liquid_names.clone())),
            measurements: PlateTable::zeros(
                labels.clone(),
                columns,
                Some(config.measured_parameter_names.clone()),
            ),
            errors: PlateTable::zeros(labels, columns, None),
            all_data: AllDataTable::zeros(all_data_headers(config), mapper.capacity()),
            dir,
            mapper,
            liquid_names: config.liquid_names.clone(),
            measured_names: config.measured_parameter_names.clone(),
            committed: 0,
        }
    }

    fn create(dir: PathBuf, config: &ExperimentConfig) -> OptResult<Self> {
        fs::create_dir_all(&dir)?;
        ExperimentManifest::new(config)?.save(dir.join(MANIFEST_FILE))?;

        let store = Self::empty(dir, config);
        store.volumes.write_csv(store.path(LIQUID_VOLUMES_FILE))?;
        store.measurements.write_csv(store.path(MEASUREMENTS_FILE))?;
        store.errors.write_csv(store.path(ERRORS_FILE))?;
        store.all_data.write_csv(store.path(ALL_DATA_FILE))?;

        info!(
            "Created tables for {} plate(s) of {}x{} ({} table rows) in {}",
            store.mapper.plate_count,
            store.mapper.geometry.rows,
            store.mapper.geometry.columns,
            store.mapper.table_rows(),
            store.dir.display()
        );
        Ok(store)
    }

    fn load(dir: PathBuf, config: &ExperimentConfig) -> OptResult<Self> {
        let mut store = Self::empty(dir, config);
        let labels = store.mapper.row_labels();
        let columns = config.plate_columns;

        store.volumes = PlateTable::read_csv(
            store.path(LIQUID_VOLUMES_FILE),
            labels.clone(),
            columns,
            Some(config.liquid_names.clone()),
        )?;
        store.measurements = PlateTable::read_csv(
            store.path(MEASUREMENTS_FILE),
            labels.clone(),
            columns,
            Some(config.measured_parameter_names.clone()),
        )?;
        store.errors = PlateTable::read_csv(store.path(ERRORS_FILE), labels, columns, None)?;
        store.all_data = AllDataTable::read_csv(
            store.path(ALL_DATA_FILE),
            all_data_headers(config),
            store.mapper.capacity(),
        )?;
        store.committed = store.all_data.recorded_iterations();

        warn!(
            "Resuming experiment in {} after {} committed iteration(s)",
            store.dir.display(),
            store.committed
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn mapper(&self) -> &AddressMapper {
        &self.mapper
    }

    /// Number of iterations whose data is on disk. The next iteration to run.
    pub fn committed_iterations(&self) -> usize {
        self.committed
    }

    pub fn all_data(&self) -> &AllDataTable {
        &self.all_data
    }

    /// Records one completed iteration and persists all four tables.
    ///
    /// Iterations must be written in order and exactly once; the in-memory
    /// tables only change once every file has been written.
    pub fn write_iteration(
        &mut self,
        iteration: usize,
        diluted_volumes: &[Vec<f64>],
        measurements: &[Vec<f64>],
        errors: &[f64],
    ) -> OptResult<()> {
        if iteration < self.committed {
            return Err(OptobotError::Iteration(format!(
                "iteration {} is already recorded",
                iteration
            )));
        }
        if iteration > self.committed {
            return Err(OptobotError::Iteration(format!(
                "iteration {} written before iteration {}",
                iteration, self.committed
            )));
        }

        let batch = self.mapper.batch_size;
        check_rows("volume", diluted_volumes, batch, self.liquid_names.len())?;
        check_rows("measurement", measurements, batch, self.measured_names.len())?;
        if errors.len() != batch {
            return Err(OptobotError::Validation(format!(
                "expected {} errors, got {}",
                batch,
                errors.len()
            )));
        }

        let wells = self.mapper.resolve_iteration(iteration)?;
        let mut volumes = self.volumes.clone();
        let mut measured = self.measurements.clone();
        let mut scored = self.errors.clone();
        let mut all_data = self.all_data.clone();

        for (i, well) in wells.iter().enumerate() {
            volumes.write_well(well, &diluted_volumes[i])?;
            measured.write_well(well, &measurements[i])?;
            scored.write_well(well, &[errors[i]])?;

            let mut row = Vec::with_capacity(all_data.width());
            row.push((iteration + 1) as f64);
            row.extend_from_slice(&diluted_volumes[i]);
            row.extend_from_slice(&measurements[i]);
            row.push(errors[i]);
            all_data.write_row(well.linear, &row)?;
        }

        // all_data goes last: a restart counts committed iterations from it.
        volumes.write_csv(self.path(LIQUID_VOLUMES_FILE))?;
        measured.write_csv(self.path(MEASUREMENTS_FILE))?;
        scored.write_csv(self.path(ERRORS_FILE))?;
        all_data.write_csv(self.path(ALL_DATA_FILE))?;

        self.volumes = volumes;
        self.measurements = measured;
        self.errors = scored;
        self.all_data = all_data;
        self.committed = iteration + 1;

        debug!(
            "Stored iteration {} in wells {}..{}",
            iteration,
            wells.first().map(|w| w.linear).unwrap_or_default(),
            wells.last().map(|w| w.linear + 1).unwrap_or_default()
        );
        Ok(())
    }

    /// Records `iteration` as unusable: every value of its wells is left
    /// empty, and the counter moves past them so no later batch reuses them.
    pub fn write_unusable(&mut self, iteration: usize) -> OptResult<()> {
        let batch = self.mapper.batch_size;
        let volumes = vec![vec![f64::NAN; self.liquid_names.len()]; batch];
        let measurements = vec![vec![f64::NAN; self.measured_names.len()]; batch];
        self.write_iteration(iteration, &volumes, &measurements, &vec![f64::NAN; batch])?;
        warn!(
            "Iteration {} recorded as unusable; its wells will not be reused",
            iteration
        );
        Ok(())
    }

    /// Reads one iteration's window back out of the plate-shaped tables.
    pub fn read_iteration(&self, iteration: usize) -> OptResult<IterationRecord> {
        let wells = self.mapper.resolve_iteration(iteration)?;
        Ok(IterationRecord {
            volumes: collect_wells(&self.volumes, &wells),
            measurements: collect_wells(&self.measurements, &wells),
            errors: wells.iter().map(|w| self.errors.read_well(w)[0]).collect(),
        })
    }

    /// Loads `measurements.csv` as edited by the operator and returns the
    /// window of `iteration`, shaped `(batch_size, measured parameters)`.
    pub fn read_manual_measurements(&mut self, iteration: usize) -> OptResult<Vec<Vec<f64>>> {
        let wells = self.mapper.resolve_iteration(iteration)?;
        let table = PlateTable::read_csv(
            self.path(MEASUREMENTS_FILE),
            self.mapper.row_labels(),
            self.mapper.geometry.columns,
            Some(self.measured_names.clone()),
        )?;

        let batch = collect_wells(&table, &wells);
        for (well, values) in wells.iter().zip(&batch) {
            if let Some(i) = values.iter().position(|v| !v.is_finite()) {
                return Err(OptobotError::Measurement(format!(
                    "well {} of plate {} has no value for '{}'",
                    well.name(),
                    well.plate + 1,
                    self.measured_names[i]
                )));
            }
        }

        self.measurements = table;
        Ok(batch)
    }
}

fn all_data_headers(config: &ExperimentConfig) -> Vec<String> {
    let mut headers = vec!["iteration_number".to_string()];
    headers.extend(config.liquid_names.iter().map(|n| format!("vol_{}", n)));
    headers.extend(config.measured_parameter_names.iter().cloned());
    headers.push("error".to_string());
    headers
}

fn collect_wells(table: &PlateTable, wells: &[WellAddress]) -> Vec<Vec<f64>> {
    wells.iter().map(|w| table.read_well(w)).collect()
}

fn check_rows(kind: &str, rows: &[Vec<f64>], expected_rows: usize, width: usize) -> OptResult<()> {
    if rows.len() != expected_rows {
        return Err(OptobotError::Validation(format!(
            "expected {} {} rows, got {}",
            expected_rows,
            kind,
            rows.len()
        )));
    }
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(OptobotError::Validation(format!(
            "{} rows need {} values, found one with {}",
            kind,
            width,
            bad.len()
        )));
    }
    Ok(())
}
