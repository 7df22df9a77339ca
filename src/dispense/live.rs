use super::{DispensePlan, Mix, TipPolicy};
use crate::error::{OptResult, OptobotError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Labware the handler confirmed is loaded in a deck slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabwareHandle {
    pub slot: u32,
    pub name: String,
}

/// A well of a resolved labware, e.g. reservoir `A2` or plate `D7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellRef {
    pub slot: u32,
    pub well: String,
}

/// A connection to a liquid-handling robot that takes commands one by one.
pub trait LiquidHandler {
    fn resolve_labware(&mut self, slot: u32) -> OptResult<LabwareHandle>;
    fn pick_up_tip(&mut self) -> OptResult<()>;
    fn transfer(
        &mut self,
        volume: f64,
        source: &WellRef,
        destination: &WellRef,
        tip: TipPolicy,
        mix_after: Option<Mix>,
    ) -> OptResult<()>;
    fn drop_tip(&mut self) -> OptResult<()>;
}

/// Drives `handler` through `plan`: one tip per liquid, every well of the
/// batch in order, the diluent first.
///
/// A failure before the first transfer is returned unchanged. Once a transfer
/// has been issued the wells may hold liquid, so the failure comes back as
/// [`OptobotError::PartialDispense`]. A tip picked up for the failing pass is
/// dropped before returning.
pub fn execute_plan(handler: &mut dyn LiquidHandler, plan: &DispensePlan) -> OptResult<()> {
    let mut issued = 0;
    let result = run_passes(handler, plan, &mut issued);
    result.map_err(|e| {
        if issued == 0 {
            e
        } else {
            warn!("Dispense stopped after {} issued transfers: {}", issued, e);
            OptobotError::PartialDispense {
                issued_transfers: issued,
                reason: e.to_string(),
            }
        }
    })
}

fn run_passes(
    handler: &mut dyn LiquidHandler,
    plan: &DispensePlan,
    issued: &mut usize,
) -> OptResult<()> {
    let reservoir = handler.resolve_labware(plan.reservoir_slot)?;
    for slot in &plan.plate_slots {
        handler.resolve_labware(*slot)?;
    }

    for pass in &plan.passes {
        let source = WellRef {
            slot: reservoir.slot,
            well: pass.source.clone(),
        };
        handler.pick_up_tip()?;
        for t in &pass.transfers {
            let destination = WellRef {
                slot: t.plate_slot,
                well: t.well.name(),
            };
            *issued += 1;
            if let Err(e) =
                handler.transfer(t.volume, &source, &destination, TipPolicy::Never, t.mix_after)
            {
                if let Err(drop_err) = handler.drop_tip() {
                    warn!("Could not drop the tip after a failed transfer: {}", drop_err);
                }
                return Err(e);
            }
        }
        handler.drop_tip()?;
        debug!(
            "Dispensed {} into {} wells",
            pass.liquid,
            pass.transfers.len()
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerCall {
    ResolveLabware(u32),
    PickUpTip,
    Transfer {
        volume: f64,
        source: WellRef,
        destination: WellRef,
        tip: TipPolicy,
        mix_after: Option<Mix>,
    },
    DropTip,
}

/// Records every command instead of moving liquid. Clones share one log, so
/// a copy kept outside the loop sees what the loop dispensed.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<HandlerCall>>>,
    fail_after_transfers: Option<usize>,
    fail_first_command: bool,
    tripped: Arc<AtomicBool>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler whose connection drops once, after `n` successful transfers.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after_transfers: Some(n),
            ..Self::default()
        }
    }

    /// A handler whose connection drops once, on the very first command.
    pub fn disconnected_once() -> Self {
        Self {
            fail_first_command: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Number of calls matching `call`.
    pub fn count(&self, call: &HandlerCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Destinations of every transfer, in the order they were issued.
    pub fn destinations(&self) -> Vec<WellRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HandlerCall::Transfer { destination, .. } => Some(destination),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HandlerCall) -> OptResult<()> {
        let mut calls = self.calls.lock();
        if self.fail_first_command && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(OptobotError::Dispense(
                "robot did not answer the first command".to_string(),
            ));
        }
        if matches!(call, HandlerCall::Transfer { .. }) {
            let done = calls
                .iter()
                .filter(|c| matches!(c, HandlerCall::Transfer { .. }))
                .count();
            if self.fail_after_transfers.is_some_and(|n| done >= n)
                && !self.tripped.swap(true, Ordering::SeqCst)
            {
                return Err(OptobotError::Dispense(format!(
                    "connection lost after {} transfers",
                    done
                )));
            }
        }
        calls.push(call);
        Ok(())
    }
}

impl LiquidHandler for RecordingHandler {
    fn resolve_labware(&mut self, slot: u32) -> OptResult<LabwareHandle> {
        self.record(HandlerCall::ResolveLabware(slot))?;
        Ok(LabwareHandle {
            slot,
            name: format!("slot_{}", slot),
        })
    }

    fn pick_up_tip(&mut self) -> OptResult<()> {
        self.record(HandlerCall::PickUpTip)
    }

    fn transfer(
        &mut self,
        volume: f64,
        source: &WellRef,
        destination: &WellRef,
        tip: TipPolicy,
        mix_after: Option<Mix>,
    ) -> OptResult<()> {
        self.record(HandlerCall::Transfer {
            volume,
            source: source.clone(),
            destination: destination.clone(),
            tip,
            mix_after,
        })
    }

    fn drop_tip(&mut self) -> OptResult<()> {
        self.record(HandlerCall::DropTip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;

    fn plan() -> DispensePlan {
        let config = ExperimentConfig::default();
        let diluted = vec![vec![30.0, 20.0, 20.0, 20.0]; config.batch_size];
        DispensePlan::build(&config, &config.mapper(), 0, &diluted).unwrap()
    }

    #[test]
    fn test_failed_transfer_drops_the_tip_and_reports_partial_dispense() {
        let mut handler = RecordingHandler::failing_after(14);
        let err = execute_plan(&mut handler, &plan()).unwrap_err();

        assert!(matches!(
            err,
            OptobotError::PartialDispense {
                issued_transfers: 15,
                ..
            }
        ));
        assert!(!err.is_retryable());
        assert_eq!(handler.count(&HandlerCall::PickUpTip), 2);
        assert_eq!(handler.count(&HandlerCall::DropTip), 2);
    }

    #[test]
    fn test_failure_before_any_transfer_stays_retryable() {
        let mut handler = RecordingHandler::disconnected_once();
        let err = execute_plan(&mut handler, &plan()).unwrap_err();

        assert!(matches!(err, OptobotError::Dispense(_)));
        assert!(err.is_retryable());
        assert!(handler.calls().is_empty());

        execute_plan(&mut handler, &plan()).unwrap();
        assert_eq!(handler.destinations().len(), 48);
    }
}
