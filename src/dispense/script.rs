use super::{DispensePlan, Mix};
use crate::config::{ExperimentConfig, LabwareParams};
use crate::error::{OptResult, OptobotError};
use crate::geometry::WellAddress;
use itertools::Itertools;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SCRIPT_FILE: &str = "generated_ot2_script.py";

/// Renders a dispense plan as a self-contained OT-2 protocol.
///
/// The protocol recomputes its target wells from the iteration counter and
/// the plate shape, then checks them against the wells resolved here before
/// touching any liquid. Output depends only on the inputs, so regenerating a
/// past iteration reproduces the file byte for byte.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    labware: LabwareParams,
    plate_rows: usize,
    plate_columns: usize,
    batch_size: usize,
    liquid_names: Vec<String>,
}

impl ScriptGenerator {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self {
            labware: config.labware.clone(),
            plate_rows: config.plate_rows,
            plate_columns: config.plate_columns,
            batch_size: config.batch_size,
            liquid_names: config.liquid_names.clone(),
        }
    }

    pub fn render(&self, plan: &DispensePlan) -> OptResult<String> {
        let liquids = plan.passes.len();
        if liquids != self.liquid_names.len() {
            return Err(OptobotError::Config(format!(
                "plan has {} liquid passes, generator expects {}",
                liquids,
                self.liquid_names.len()
            )));
        }
        let wells = plan.wells();
        let mix = plan
            .passes
            .last()
            .and_then(|p| p.transfers.first())
            .and_then(|t| t.mix_after);

        let mut out = String::new();
        self.write_protocol(&mut out, plan, &wells, mix)
            .map_err(|_| {
                OptobotError::Config(format!(
                    "could not render the protocol for iteration {}",
                    plan.iteration
                ))
            })?;
        Ok(out)
    }

    fn write_protocol(
        &self,
        out: &mut impl fmt::Write,
        plan: &DispensePlan,
        wells: &[WellAddress],
        mix: Option<Mix>,
    ) -> fmt::Result {
        let lw = &self.labware;

        writeln!(out, "from opentrons import protocol_api")?;
        writeln!(out)?;
        writeln!(
            out,
            "requirements = {{\"robotType\": \"OT-2\", \"apiLevel\": \"{}\"}}",
            lw.api_level
        )?;
        writeln!(out)?;
        writeln!(out, "ITERATION = {}", plan.iteration)?;
        writeln!(out, "WELLS_PER_ITERATION = {}", self.batch_size)?;
        writeln!(out, "PLATE_ROWS = {}", self.plate_rows)?;
        writeln!(out, "PLATE_COLUMNS = {}", self.plate_columns)?;
        writeln!(
            out,
            "PLATE_LOCATIONS = [{}]",
            plan.plate_slots.iter().join(", ")
        )?;
        writeln!(
            out,
            "LIQUIDS = [{}]",
            self.liquid_names.iter().map(|n| format!("{:?}", n)).join(", ")
        )?;
        writeln!(out, "# One row per well, diluent first.")?;
        writeln!(out, "VOLUMES = [")?;
        for (i, _) in wells.iter().enumerate() {
            let row = plan
                .passes
                .iter()
                .map(|p| format!("{:?}", p.transfers[i].volume))
                .join(", ");
            writeln!(out, "    [{}],", row)?;
        }
        writeln!(out, "]")?;
        writeln!(out, "TARGET_WELLS = [")?;
        for well in wells {
            writeln!(out, "    ({}, \"{}\"),", well.plate, well.name())?;
        }
        writeln!(out, "]")?;
        match mix {
            Some(m) => writeln!(out, "MIX_AFTER = ({}, {:?})", m.cycles, m.volume)?,
            None => writeln!(out, "MIX_AFTER = None")?,
        }
        writeln!(out)?;
        writeln!(out)?;
        out.write_str(
            r#"def well_address(linear):
    wells_per_plate = PLATE_ROWS * PLATE_COLUMNS
    plate = linear // wells_per_plate
    in_plate = linear - plate * wells_per_plate
    row = in_plate // PLATE_COLUMNS
    column = in_plate % PLATE_COLUMNS
    # Wells are numbered down each column.
    return plate, column * PLATE_ROWS + row


"#,
        )?;
        writeln!(out, "def run(protocol: protocol_api.ProtocolContext):")?;
        writeln!(
            out,
            "    tips = protocol.load_labware(\"{}\", {})",
            lw.tiprack, plan.tiprack_slot
        )?;
        writeln!(
            out,
            "    reservoir = protocol.load_labware(\"{}\", {})",
            lw.reservoir, plan.reservoir_slot
        )?;
        writeln!(
            out,
            "    plates = [protocol.load_labware(\"{}\", slot) for slot in PLATE_LOCATIONS]",
            lw.plate_labware
        )?;
        writeln!(
            out,
            "    pipette = protocol.load_instrument(\"{}\", \"{}\", tip_racks=[tips])",
            lw.pipette, lw.pipette_mount
        )?;
        out.write_str(
            r#"
    start = ITERATION * WELLS_PER_ITERATION
    targets = []
    for offset, linear in enumerate(range(start, start + WELLS_PER_ITERATION)):
        plate, well_index = well_address(linear)
        well = plates[plate].wells()[well_index]
        expected_plate, expected_name = TARGET_WELLS[offset]
        if plate != expected_plate or well.well_name != expected_name:
            raise RuntimeError(
                "well %d resolved to plate %d %s, expected plate %d %s"
                % (linear, plate, well.well_name, expected_plate, expected_name)
            )
        targets.append(well)

    last = len(LIQUIDS) - 1
    for liquid in range(len(LIQUIDS)):
        source = reservoir["A%d" % (liquid + 1)]
        pipette.pick_up_tip()
        for target, volumes in zip(targets, VOLUMES):
            if liquid == last and MIX_AFTER is not None:
                pipette.transfer(volumes[liquid], source, target, new_tip="never", mix_after=MIX_AFTER)
            else:
                pipette.transfer(volumes[liquid], source, target, new_tip="never")
        pipette.drop_tip()
"#,
        )?;
        Ok(())
    }

    /// Writes the protocol to `<dir>/generated_ot2_script.py`, replacing the
    /// previous iteration's.
    pub fn write<P: AsRef<Path>>(&self, dir: P, plan: &DispensePlan) -> OptResult<PathBuf> {
        let path = dir.as_ref().join(SCRIPT_FILE);
        let tmp = path.with_extension("py.tmp");
        let script = self.render(plan)?;

        fs::write(&tmp, script)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                OptobotError::persistence(&path, e)
            })?;

        info!(
            "📝 Wrote protocol for iteration {} to {}",
            plan.iteration,
            path.display()
        );
        Ok(path)
    }
}
