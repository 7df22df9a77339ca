use crate::config::ExperimentConfig;
use crate::error::OptResult;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Written once next to the tables so a restarted process can check it is
/// resuming the same experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentManifest {
    pub fingerprint: String,
    pub created_at: DateTime<Local>,
    pub config: ExperimentConfig,
}

// The fields that decide where a batch lands and what the tables look like.
#[derive(Serialize)]
struct LayoutKey<'a> {
    liquid_names: &'a [String],
    measured_parameter_names: &'a [String],
    plate_rows: usize,
    plate_columns: usize,
    plate_locations: &'a [u32],
    batch_size: usize,
    blank_row_space: usize,
    total_volume: f64,
}

impl ExperimentManifest {
    pub fn new(config: &ExperimentConfig) -> OptResult<Self> {
        Ok(Self {
            fingerprint: Self::fingerprint(config)?,
            created_at: Local::now(),
            config: config.clone(),
        })
    }

    /// Deterministic hash of the layout-defining part of the config.
    pub fn fingerprint(config: &ExperimentConfig) -> OptResult<String> {
        let key = LayoutKey {
            liquid_names: &config.liquid_names,
            measured_parameter_names: &config.measured_parameter_names,
            plate_rows: config.plate_rows,
            plate_columns: config.plate_columns,
            plate_locations: &config.plate_locations,
            batch_size: config.batch_size,
            blank_row_space: config.blank_row_space,
            total_volume: config.total_volume,
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(&key)?.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> OptResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> OptResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
