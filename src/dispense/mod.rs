//! Turning one diluted batch into liquid-handling steps.
//!
//! A [`DispensePlan`] is the single description of what the robot does for an
//! iteration. The script generator and the live handler both consume it, so
//! the wells a generated protocol fills are the wells the store records.

pub mod live;
pub mod script;

pub use live::{execute_plan, HandlerCall, LabwareHandle, LiquidHandler, RecordingHandler, WellRef};
pub use script::{ScriptGenerator, SCRIPT_FILE};

use crate::config::ExperimentConfig;
use crate::error::{OptResult, OptobotError};
use crate::geometry::{AddressMapper, WellAddress};
use serde::Serialize;
use strum_macros::Display;

/// When the pipette takes a fresh tip during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
pub enum TipPolicy {
    /// Keep the tip picked up for the whole liquid pass.
    Never,
    Once,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mix {
    pub cycles: u32,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub volume: f64,
    pub well: WellAddress,
    pub plate_slot: u32,
    pub mix_after: Option<Mix>,
}

/// Every transfer of one liquid, done with a single tip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidPass {
    pub liquid: String,
    /// Reservoir well holding the liquid (`A1` for the diluent).
    pub source: String,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispensePlan {
    pub iteration: usize,
    pub tiprack_slot: u32,
    pub reservoir_slot: u32,
    pub plate_slots: Vec<u32>,
    pub passes: Vec<LiquidPass>,
}

/// Reservoir well of liquid `index` (0-based, diluent first).
pub fn reservoir_source(index: usize) -> String {
    format!("A{}", index + 1)
}

impl DispensePlan {
    /// Resolves `diluted` (one row per well, diluent first) onto the wells of
    /// `iteration`. Only the last liquid mixes.
    pub fn build(
        config: &ExperimentConfig,
        mapper: &AddressMapper,
        iteration: usize,
        diluted: &[Vec<f64>],
    ) -> OptResult<Self> {
        let wells = mapper.resolve_iteration(iteration)?;
        if diluted.len() != wells.len() {
            return Err(OptobotError::Config(format!(
                "{} volume rows for a batch of {} wells",
                diluted.len(),
                wells.len()
            )));
        }
        let liquids = config.num_liquids();
        if let Some(row) = diluted.iter().find(|r| r.len() != liquids) {
            return Err(OptobotError::Config(format!(
                "volume row has {} columns but {} liquids are configured",
                row.len(),
                liquids
            )));
        }

        let mix = Mix {
            cycles: config.mix_cycles,
            volume: config.mix_volume,
        };
        let passes = config
            .liquid_names
            .iter()
            .enumerate()
            .map(|(liquid, name)| LiquidPass {
                liquid: name.clone(),
                source: reservoir_source(liquid),
                transfers: wells
                    .iter()
                    .zip(diluted)
                    .map(|(well, volumes)| Transfer {
                        volume: volumes[liquid],
                        well: *well,
                        plate_slot: config.plate_locations[well.plate],
                        mix_after: (liquid + 1 == liquids && mix.cycles > 0).then_some(mix),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            iteration,
            tiprack_slot: config.labware.tiprack_slot,
            reservoir_slot: config.labware.reservoir_slot,
            plate_slots: config.plate_locations.clone(),
            passes,
        })
    }

    /// Target wells in batch order.
    pub fn wells(&self) -> Vec<WellAddress> {
        self.passes
            .first()
            .map(|p| p.transfers.iter().map(|t| t.well).collect())
            .unwrap_or_default()
    }

    pub fn transfer_count(&self) -> usize {
        self.passes.iter().map(|p| p.transfers.len()).sum()
    }

    pub fn total_volume(&self) -> f64 {
        self.passes
            .iter()
            .flat_map(|p| p.transfers.iter())
            .map(|t| t.volume)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_last_liquid_mixes() {
        let config = ExperimentConfig::default();
        let diluted = vec![vec![30.0, 20.0, 20.0, 20.0]; config.batch_size];
        let plan = DispensePlan::build(&config, &config.mapper(), 0, &diluted).unwrap();

        assert_eq!(plan.passes.len(), 4);
        assert_eq!(plan.passes[0].source, "A1");
        assert_eq!(plan.passes[3].source, "A4");
        for pass in &plan.passes[..3] {
            assert!(pass.transfers.iter().all(|t| t.mix_after.is_none()));
        }
        assert!(plan.passes[3].transfers.iter().all(|t| t.mix_after.is_some()));
        assert_eq!(plan.transfer_count(), 48);
        assert!((plan.total_volume() - 90.0 * 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_row_width_mismatch() {
        let config = ExperimentConfig::default();
        let diluted = vec![vec![30.0, 60.0]; config.batch_size];
        assert!(matches!(
            DispensePlan::build(&config, &config.mapper(), 0, &diluted),
            Err(OptobotError::Config(_))
        ));
    }
}
