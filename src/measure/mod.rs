//! Where per-well measurements come from.

pub mod vision;

pub use vision::{FileCapture, ImageCapture, VisionPipeline, WellColourExtractor};

use crate::config::MeasurementMode;
use crate::error::{OptResult, OptobotError};
use crate::geometry::{PlateGeometry, WellAddress};
use std::fmt;
use std::path::Path;

/// Everything a measurement source may need about the batch it measures.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementRequest<'a> {
    pub iteration: usize,
    pub batch_size: usize,
    pub num_measured_parameters: usize,
    pub exp_dir: &'a Path,
    /// Dispensed volumes, diluent first, one row per well.
    pub diluted_volumes: &'a [Vec<f64>],
    pub wells: &'a [WellAddress],
    pub geometry: PlateGeometry,
}

pub type MeasureFn = Box<dyn FnMut(&MeasurementRequest<'_>) -> OptResult<Vec<Vec<f64>>>>;

/// Selected once when the loop is built.
#[derive(Default)]
pub enum MeasurementSource {
    /// An operator fills `measurements.csv`; the loop reads it back.
    #[default]
    Manual,
    /// A camera image per plate, reduced to one colour vector per well.
    Automatic(VisionPipeline),
    /// Any callable returning `(batch_size, num_measured_parameters)` values.
    UserSupplied(MeasureFn),
}

impl MeasurementSource {
    pub fn user_supplied<F>(f: F) -> Self
    where
        F: FnMut(&MeasurementRequest<'_>) -> OptResult<Vec<Vec<f64>>> + 'static,
    {
        Self::UserSupplied(Box::new(f))
    }

    pub fn mode(&self) -> MeasurementMode {
        match self {
            Self::Manual => MeasurementMode::Manual,
            Self::Automatic(_) | Self::UserSupplied(_) => MeasurementMode::Automatic,
        }
    }
}

impl fmt::Debug for MeasurementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("Manual"),
            Self::Automatic(p) => f.debug_tuple("Automatic").field(p).finish(),
            Self::UserSupplied(_) => f.write_str("UserSupplied(<fn>)"),
        }
    }
}

/// Treats the requested (non-diluent) volumes as the measurement. Lets the
/// loop run end to end without an instrument when there is one measured
/// parameter per non-diluent liquid.
pub fn requested_volumes(request: &MeasurementRequest<'_>) -> OptResult<Vec<Vec<f64>>> {
    request
        .diluted_volumes
        .iter()
        .map(|row| {
            let requested = row.get(1..).unwrap_or_default();
            if requested.len() != request.num_measured_parameters {
                return Err(OptobotError::MeasurementShape {
                    expected_rows: request.batch_size,
                    expected_cols: request.num_measured_parameters,
                    detail: format!("{} non-diluent liquids", requested.len()),
                });
            }
            Ok(requested.to_vec())
        })
        .collect()
}

/// Fails unless `values` is exactly `rows x cols` and every value is finite.
pub fn check_shape(values: &[Vec<f64>], rows: usize, cols: usize) -> OptResult<()> {
    if values.len() != rows {
        return Err(OptobotError::MeasurementShape {
            expected_rows: rows,
            expected_cols: cols,
            detail: format!("got {} rows", values.len()),
        });
    }
    for (i, row) in values.iter().enumerate() {
        if row.len() != cols {
            return Err(OptobotError::MeasurementShape {
                expected_rows: rows,
                expected_cols: cols,
                detail: format!("row {} has {} values", i, row.len()),
            });
        }
        if let Some(v) = row.iter().find(|v| !v.is_finite()) {
            return Err(OptobotError::Measurement(format!(
                "row {} holds the non-finite value {}",
                i, v
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape_distinguishes_shape_from_values() {
        let ok = vec![vec![1.0, 2.0]; 3];
        assert!(check_shape(&ok, 3, 2).is_ok());
        assert!(matches!(
            check_shape(&ok, 4, 2),
            Err(OptobotError::MeasurementShape { expected_rows: 4, .. })
        ));
        assert!(matches!(
            check_shape(&ok, 3, 3),
            Err(OptobotError::MeasurementShape { .. })
        ));
        let nan = vec![vec![1.0, f64::NAN]];
        assert!(matches!(
            check_shape(&nan, 1, 2),
            Err(OptobotError::Measurement(_))
        ));
    }
}
