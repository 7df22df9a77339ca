//! Well addressing.
//!
//! Everything here is a pure function of the iteration counter, the batch size
//! and the plate geometry. The dispense path, the measurement path and the
//! tables all resolve wells through [`AddressMapper`], so a recipe and its
//! recorded outcome always land on the same physical well.
//!
//! Wells of one experiment are numbered by a *linear index*: iteration `n`
//! owns `[n * batch_size, (n + 1) * batch_size)`. Inside a plate the linear
//! index runs row-major (A1, A2, ... A12, B1, ...), which is also the order of
//! the plate-shaped tables. The robot addresses wells column-major
//! (A1, B1, ... H1, A2, ...), so the physical well index is
//! `column * rows + row`.

use crate::error::{OptResult, OptobotError};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateGeometry {
    pub rows: usize,
    pub columns: usize,
}

impl PlateGeometry {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self { rows, columns }
    }

    #[inline(always)]
    pub fn wells_per_plate(&self) -> usize {
        self.rows * self.columns
    }

    /// Row label used in the tables and in well names (`A`, `B`, ...).
    pub fn row_label(row: usize) -> char {
        (b'A' + (row % 26) as u8) as char
    }

    /// `A1`-style well name (1-based column).
    pub fn well_name(row: usize, column: usize) -> String {
        format!("{}{}", Self::row_label(row), column + 1)
    }
}

/// Index of the plate holding the first well of `iteration`.
#[inline(always)]
pub fn well_plate_index(iteration: usize, batch_size: usize, wells_per_plate: usize) -> usize {
    (iteration * batch_size) / wells_per_plate
}

/// Robot well index for a (row, column) pair: wells are counted down each
/// column first, so a pipette finishes one column before moving on.
#[inline(always)]
pub fn column_major_well_index(row: usize, column: usize, rows_per_column: usize) -> usize {
    column * rows_per_column + row
}

/// Translates a linear well index into the flat (row-major) offset of the
/// gapped table, skipping the blank rows inserted before `plate`.
#[inline(always)]
pub fn linear_to_gapped_offset(
    linear_index: usize,
    wells_per_table_row: usize,
    blank_row_space: usize,
    plate: usize,
) -> usize {
    linear_index + plate * blank_row_space * wells_per_table_row
}

/// Linear well range owned by `iteration`.
#[inline(always)]
pub fn iteration_window(iteration: usize, batch_size: usize) -> Range<usize> {
    let start = iteration * batch_size;
    start..start + batch_size
}

/// One resolved well of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellAddress {
    /// Position in the experiment-wide well sequence.
    pub linear: usize,
    /// Index into the configured plate list.
    pub plate: usize,
    pub row: usize,
    pub column: usize,
    /// Column-major index the robot uses (`plate.wells()[well_index]`).
    pub well_index: usize,
    /// Row of the gapped, plate-stacked table (blank rows included).
    pub table_row: usize,
}

impl WellAddress {
    pub fn name(&self) -> String {
        PlateGeometry::well_name(self.row, self.column)
    }
}

/// First well of an iteration, as the robot sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationAnchor {
    pub start_index: usize,
    pub plate: usize,
    /// Plate row the batch starts on.
    pub row_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMapper {
    pub geometry: PlateGeometry,
    pub plate_count: usize,
    pub batch_size: usize,
    pub blank_row_space: usize,
}

impl AddressMapper {
    pub fn new(
        geometry: PlateGeometry,
        plate_count: usize,
        batch_size: usize,
        blank_row_space: usize,
    ) -> Self {
        Self {
            geometry,
            plate_count,
            batch_size,
            blank_row_space,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.plate_count * self.geometry.wells_per_plate()
    }

    /// Number of whole batches that fit on the plates.
    pub fn max_iterations(&self) -> usize {
        if self.batch_size == 0 {
            0
        } else {
            self.capacity() / self.batch_size
        }
    }

    /// Rows of every plate-shaped table: plates stacked with blank rows between them.
    pub fn table_rows(&self) -> usize {
        self.plate_count * self.geometry.rows
            + self.blank_row_space * self.plate_count.saturating_sub(1)
    }

    /// Row labels of the plate-shaped tables; blank separator rows are empty.
    pub fn row_labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.table_rows());
        for plate in 0..self.plate_count {
            for row in 0..self.geometry.rows {
                labels.push(PlateGeometry::row_label(row).to_string());
            }
            if plate + 1 != self.plate_count {
                labels.extend(std::iter::repeat(String::new()).take(self.blank_row_space));
            }
        }
        labels
    }

    pub fn window(&self, iteration: usize) -> Range<usize> {
        iteration_window(iteration, self.batch_size)
    }

    pub fn anchor(&self, iteration: usize) -> IterationAnchor {
        let wells = self.geometry.wells_per_plate();
        let start_index = iteration * self.batch_size;
        let plate = well_plate_index(iteration, self.batch_size, wells);
        IterationAnchor {
            start_index,
            plate,
            row_offset: (start_index - plate * wells) / self.geometry.columns,
        }
    }

    pub fn resolve(&self, linear: usize) -> OptResult<WellAddress> {
        if linear >= self.capacity() {
            return Err(OptobotError::Config(format!(
                "well {} is past the last of {} available wells",
                linear,
                self.capacity()
            )));
        }
        let wells = self.geometry.wells_per_plate();
        let plate = linear / wells;
        let in_plate = linear - plate * wells;
        let row = in_plate / self.geometry.columns;
        let column = in_plate % self.geometry.columns;
        let gapped = linear_to_gapped_offset(
            linear,
            self.geometry.columns,
            self.blank_row_space,
            plate,
        );

        Ok(WellAddress {
            linear,
            plate,
            row,
            column,
            well_index: column_major_well_index(row, column, self.geometry.rows),
            table_row: gapped / self.geometry.columns,
        })
    }

    /// Every well of `iteration`, in batch order. A batch may cross a row or a
    /// plate boundary; each well is resolved on its own.
    pub fn resolve_iteration(&self, iteration: usize) -> OptResult<Vec<WellAddress>> {
        self.window(iteration).map(|i| self.resolve(i)).collect()
    }

    /// Plates touched by `iteration`, in order of first use.
    pub fn plates_in_iteration(&self, iteration: usize) -> OptResult<Vec<usize>> {
        let mut plates: Vec<usize> = Vec::new();
        for well in self.resolve_iteration(iteration)? {
            if plates.last() != Some(&well.plate) {
                plates.push(well.plate);
            }
        }
        Ok(plates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_labels_insert_blank_rows_between_plates() {
        let mapper = AddressMapper::new(PlateGeometry::new(2, 3), 3, 3, 1);
        assert_eq!(mapper.table_rows(), 8);
        assert_eq!(
            mapper.row_labels(),
            vec!["A", "B", "", "A", "B", "", "A", "B"]
        );
    }

    #[test]
    fn test_single_plate_has_no_blank_rows() {
        let mapper = AddressMapper::new(PlateGeometry::new(8, 12), 1, 12, 4);
        assert_eq!(mapper.table_rows(), 8);
        assert!(mapper.row_labels().iter().all(|l| !l.is_empty()));
    }

    #[test]
    fn test_resolve_rejects_wells_past_capacity() {
        let mapper = AddressMapper::new(PlateGeometry::new(8, 12), 1, 12, 1);
        assert!(mapper.resolve(95).is_ok());
        assert!(matches!(mapper.resolve(96), Err(OptobotError::Config(_))));
    }
}
