use crate::error::{OptResult, OptobotError};
use crate::geometry::{AddressMapper, PlateGeometry};
use clap::{parser::ValueSource, ArgMatches, Args};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// Where the per-well measurements come from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    /// An operator types the values into `measurements.csv`.
    #[default]
    Manual,
    /// A callable (vision pipeline or user function) returns the values.
    Automatic,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    #[arg(long, default_value = "experiment")]
    pub name: String,

    /// Ordered liquid names. The first one is the diluent.
    #[arg(long, value_delimiter = ',', default_values_t = default_liquid_names())]
    pub liquid_names: Vec<String>,

    #[arg(long, value_delimiter = ',', default_values_t = default_measured_names())]
    pub measured_parameter_names: Vec<String>,

    #[arg(long, default_value_t = 8)]
    pub plate_rows: usize,
    #[arg(long, default_value_t = 12)]
    pub plate_columns: usize,

    /// Deck slots of the plates, in the order they are filled.
    #[arg(long, value_delimiter = ',', default_values_t = vec![5u32])]
    pub plate_locations: Vec<u32>,

    /// Wells per iteration (the population size of the search).
    #[arg(long, default_value_t = 12)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 90.0)]
    pub total_volume: f64,

    /// Blank rows between stacked plates in the plate-shaped tables.
    #[arg(long, default_value_t = 1)]
    pub blank_row_space: usize,

    /// Set from JSON or by the library caller, which also supplies the
    /// matching measurement source.
    #[arg(skip)]
    pub measurement_mode: MeasurementMode,

    #[arg(long, default_value_t = 3)]
    pub mix_cycles: u32,
    #[arg(long, default_value_t = 20.0)]
    pub mix_volume: f64,

    #[command(flatten)]
    pub labware: LabwareParams,

    #[command(flatten)]
    pub timeouts: TimeoutParams,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabwareParams {
    #[arg(long, default_value = "opentrons_96_tiprack_1000ul")]
    pub tiprack: String,
    #[arg(long, default_value_t = 1)]
    pub tiprack_slot: u32,
    #[arg(long, default_value = "nest_12_reservoir_15ml")]
    pub reservoir: String,
    #[arg(long, default_value_t = 2)]
    pub reservoir_slot: u32,
    #[arg(long, default_value = "nest_96_wellplate_100ul_pcr_full_skirt")]
    pub plate_labware: String,
    #[arg(long, default_value = "p1000_single_gen2")]
    pub pipette: String,
    #[arg(long, default_value = "right")]
    pub pipette_mount: String,
    #[arg(long, default_value = "2.16")]
    pub api_level: String,
}

#[derive(Args, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutParams {
    /// Seconds to wait for the robot run to be confirmed. Unset waits forever.
    #[arg(long)]
    pub dispense_timeout_secs: Option<u64>,
    /// Seconds to wait for measurements. Unset waits forever.
    #[arg(long)]
    pub measurement_timeout_secs: Option<u64>,
}

fn default_liquid_names() -> Vec<String> {
    ["water", "blue", "yellow", "red"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_measured_names() -> Vec<String> {
    ["measured_red", "measured_green", "measured_blue"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "experiment".to_string(),
            liquid_names: default_liquid_names(),
            measured_parameter_names: default_measured_names(),
            plate_rows: 8,
            plate_columns: 12,
            plate_locations: vec![5],
            batch_size: 12,
            total_volume: 90.0,
            blank_row_space: 1,
            measurement_mode: MeasurementMode::Manual,
            mix_cycles: 3,
            mix_volume: 20.0,
            labware: LabwareParams::default(),
            timeouts: TimeoutParams::default(),
        }
    }
}

impl Default for LabwareParams {
    fn default() -> Self {
        Self {
            tiprack: "opentrons_96_tiprack_1000ul".to_string(),
            tiprack_slot: 1,
            reservoir: "nest_12_reservoir_15ml".to_string(),
            reservoir_slot: 2,
            plate_labware: "nest_96_wellplate_100ul_pcr_full_skirt".to_string(),
            pipette: "p1000_single_gen2".to_string(),
            pipette_mount: "right".to_string(),
            api_level: "2.16".to_string(),
        }
    }
}

impl ExperimentConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OptResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    #[inline]
    pub fn num_liquids(&self) -> usize {
        self.liquid_names.len()
    }

    #[inline]
    pub fn num_measured_parameters(&self) -> usize {
        self.measured_parameter_names.len()
    }

    #[inline]
    pub fn plate_count(&self) -> usize {
        self.plate_locations.len()
    }

    pub fn plate_geometry(&self) -> PlateGeometry {
        PlateGeometry::new(self.plate_rows, self.plate_columns)
    }

    /// Total number of wells across every configured plate.
    pub fn capacity(&self) -> usize {
        self.plate_count() * self.plate_rows * self.plate_columns
    }

    pub fn mapper(&self) -> AddressMapper {
        AddressMapper::new(
            self.plate_geometry(),
            self.plate_count(),
            self.batch_size,
            self.blank_row_space,
        )
    }

    pub fn dispense_timeout(&self) -> Option<Duration> {
        self.timeouts.dispense_timeout_secs.map(Duration::from_secs)
    }

    pub fn measurement_timeout(&self) -> Option<Duration> {
        self.timeouts.measurement_timeout_secs.map(Duration::from_secs)
    }

    /// Pre-flight checks that do not depend on how many iterations will run.
    pub fn validate(&self) -> OptResult<()> {
        if self.liquid_names.len() < 2 {
            return Err(OptobotError::Config(
                "at least two liquids are required (the diluent plus one more)".to_string(),
            ));
        }
        if self.measured_parameter_names.is_empty() {
            return Err(OptobotError::Config(
                "at least one measured parameter name is required".to_string(),
            ));
        }
        check_unique("liquid", &self.liquid_names)?;
        check_unique("measured parameter", &self.measured_parameter_names)?;

        if self.plate_rows == 0 || self.plate_columns == 0 {
            return Err(OptobotError::Config(format!(
                "plate shape {}x{} has no wells",
                self.plate_rows, self.plate_columns
            )));
        }
        if self.plate_rows > 26 {
            return Err(OptobotError::Config(format!(
                "plates with {} rows cannot be labelled A-Z",
                self.plate_rows
            )));
        }
        if self.plate_locations.is_empty() {
            return Err(OptobotError::Config(
                "at least one plate location is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for slot in &self.plate_locations {
            if !seen.insert(slot) {
                return Err(OptobotError::Config(format!(
                    "plate location {} is listed twice",
                    slot
                )));
            }
            if *slot == self.labware.tiprack_slot || *slot == self.labware.reservoir_slot {
                return Err(OptobotError::Config(format!(
                    "plate location {} is already used by the tip rack or reservoir",
                    slot
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(OptobotError::Config("batch size must be positive".to_string()));
        }
        if self.batch_size > self.capacity() {
            return Err(OptobotError::Config(format!(
                "batch size {} exceeds the {} available wells",
                self.batch_size,
                self.capacity()
            )));
        }
        if !self.total_volume.is_finite() || self.total_volume <= 0.0 {
            return Err(OptobotError::Config(format!(
                "total volume {} must be a positive number",
                self.total_volume
            )));
        }
        if !self.mix_volume.is_finite() || self.mix_volume < 0.0 {
            return Err(OptobotError::Config(format!(
                "mix volume {} must be a non-negative number",
                self.mix_volume
            )));
        }
        Ok(())
    }

    /// Fails when `iterations` batches would not fit on the configured plates.
    pub fn check_capacity(&self, iterations: usize) -> OptResult<()> {
        let needed = self.batch_size.saturating_mul(iterations);
        if needed > self.capacity() {
            return Err(OptobotError::Config(format!(
                "not enough wells: {} iterations of {} wells need {} wells, {} plate(s) of {}x{} hold {}",
                iterations,
                self.batch_size,
                needed,
                self.plate_count(),
                self.plate_rows,
                self.plate_columns,
                self.capacity()
            )));
        }
        Ok(())
    }

    pub fn merge_from_cli(&mut self, cli: &ExperimentConfig, matches: &ArgMatches) {
        macro_rules! update_if_present {
            ($($field:ident).+, $arg_name:expr) => {
                if matches.value_source($arg_name) == Some(ValueSource::CommandLine) {
                    self.$($field).+ = cli.$($field).+.clone();
                }
            };
        }

        update_if_present!(name, "name");
        update_if_present!(liquid_names, "liquid_names");
        update_if_present!(measured_parameter_names, "measured_parameter_names");
        update_if_present!(plate_rows, "plate_rows");
        update_if_present!(plate_columns, "plate_columns");
        update_if_present!(plate_locations, "plate_locations");
        update_if_present!(batch_size, "batch_size");
        update_if_present!(total_volume, "total_volume");
        update_if_present!(blank_row_space, "blank_row_space");
        update_if_present!(mix_cycles, "mix_cycles");
        update_if_present!(mix_volume, "mix_volume");

        update_if_present!(labware.tiprack, "tiprack");
        update_if_present!(labware.tiprack_slot, "tiprack_slot");
        update_if_present!(labware.reservoir, "reservoir");
        update_if_present!(labware.reservoir_slot, "reservoir_slot");
        update_if_present!(labware.plate_labware, "plate_labware");
        update_if_present!(labware.pipette, "pipette");
        update_if_present!(labware.pipette_mount, "pipette_mount");
        update_if_present!(labware.api_level, "api_level");

        update_if_present!(timeouts.dispense_timeout_secs, "dispense_timeout_secs");
        update_if_present!(
            timeouts.measurement_timeout_secs,
            "measurement_timeout_secs"
        );
    }
}

fn check_unique(kind: &str, names: &[String]) -> OptResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(OptobotError::Config(format!("empty {} name", kind)));
        }
        if name.trim() != name {
            return Err(OptobotError::Config(format!(
                "{} name '{}' has leading or trailing spaces",
                kind, name
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(OptobotError::Config(format!(
                "{} name '{}' is listed twice",
                kind, name
            )));
        }
    }
    Ok(())
}
