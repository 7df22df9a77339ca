use crate::error::{OptResult, OptobotError};
use crate::geometry::WellAddress;
use itertools::Itertools;
use ndarray::{s, Array3, ArrayView1};
use std::fs::{self, File};
use std::path::Path;

/// A plate-shaped table: plates stacked vertically (with blank rows between
/// them), one column group per plate column, `width` values per well.
///
/// Values are held as a `(table_row, column, field)` array.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateTable {
    row_labels: Vec<String>,
    /// Per-well field names. `None` stores one unnamed value per well.
    fields: Option<Vec<String>>,
    data: Array3<f64>,
}

impl PlateTable {
    pub fn zeros(row_labels: Vec<String>, columns: usize, fields: Option<Vec<String>>) -> Self {
        let width = fields.as_ref().map_or(1, |f| f.len());
        let data = Array3::zeros((row_labels.len(), columns, width));
        Self {
            row_labels,
            fields,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.data.dim().0
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.data.dim().1
    }

    pub fn read_well(&self, well: &WellAddress) -> Vec<f64> {
        self.data.slice(s![well.table_row, well.column, ..]).to_vec()
    }

    pub fn write_well(&mut self, well: &WellAddress, values: &[f64]) -> OptResult<()> {
        if values.len() != self.width() {
            return Err(OptobotError::Validation(format!(
                "well {} expects {} values, got {}",
                well.name(),
                self.width(),
                values.len()
            )));
        }
        if well.table_row >= self.rows() || well.column >= self.columns() {
            return Err(OptobotError::Validation(format!(
                "well {} (table row {}) is outside a {}x{} table",
                well.name(),
                well.table_row,
                self.rows(),
                self.columns()
            )));
        }
        self.data
            .slice_mut(s![well.table_row, well.column, ..])
            .assign(&ArrayView1::from(values));
        Ok(())
    }

    fn header_rows(&self) -> Vec<Vec<String>> {
        match &self.fields {
            Some(fields) => {
                let mut top = vec![String::new()];
                let mut bottom = vec![String::new()];
                for (column, field) in (1..=self.columns()).cartesian_product(fields.iter()) {
                    top.push(column.to_string());
                    bottom.push(field.clone());
                }
                vec![top, bottom]
            }
            None => {
                let mut header = vec![String::new()];
                header.extend((1..=self.columns()).map(|c| c.to_string()));
                vec![header]
            }
        }
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> OptResult<()> {
        let row_len = self.columns() * self.width();
        write_atomically(path.as_ref(), |wtr| {
            for header in self.header_rows() {
                wtr.write_record(&header)?;
            }
            // Iterating a row in logical order yields column after column,
            // each with all of its fields.
            for (label, values) in self.row_labels.iter().zip(self.data.outer_iter()) {
                let mut record = Vec::with_capacity(row_len + 1);
                record.push(label.clone());
                record.extend(values.iter().map(|&v| format_cell(v)));
                wtr.write_record(&record)?;
            }
            Ok(())
        })
    }

    /// Loads a table written by [`PlateTable::write_csv`] (possibly edited by
    /// hand). Empty cells load as NaN.
    pub fn read_csv<P: AsRef<Path>>(
        path: P,
        row_labels: Vec<String>,
        columns: usize,
        fields: Option<Vec<String>>,
    ) -> OptResult<Self> {
        let path = path.as_ref();
        let mut table = Self::zeros(row_labels, columns, fields);
        let expected_headers = table.header_rows();
        let width = table.width();
        let row_len = table.columns() * width;

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut records = rdr.records();

        for expected in &expected_headers {
            let record = records.next().transpose()?.ok_or_else(|| {
                OptobotError::Validation(format!("{}: missing header row", path.display()))
            })?;
            let found: Vec<&str> = record.iter().map(str::trim).collect();
            if found != expected.iter().map(String::as_str).collect::<Vec<_>>() {
                return Err(OptobotError::Validation(format!(
                    "{}: header {:?} does not match the experiment layout {:?}",
                    path.display(),
                    found,
                    expected
                )));
            }
        }

        let mut row = 0;
        for record in records {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) && row >= table.rows() {
                continue;
            }
            if row >= table.rows() {
                return Err(OptobotError::Validation(format!(
                    "{}: more than {} data rows",
                    path.display(),
                    table.rows()
                )));
            }
            if record.len() != row_len + 1 {
                return Err(OptobotError::Validation(format!(
                    "{}: row {} has {} cells, expected {}",
                    path.display(),
                    row + 1,
                    record.len(),
                    row_len + 1
                )));
            }
            for (i, cell) in record.iter().skip(1).enumerate() {
                table.data[[row, i / width, i % width]] = parse_cell(cell).ok_or_else(|| {
                    OptobotError::Validation(format!(
                        "{}: row {} holds a non-numeric value '{}'",
                        path.display(),
                        row + 1,
                        cell
                    ))
                })?;
            }
            row += 1;
        }

        if row != table.rows() {
            return Err(OptobotError::Validation(format!(
                "{}: found {} data rows, expected {}",
                path.display(),
                row,
                table.rows()
            )));
        }
        Ok(table)
    }
}

/// The tall table: one ungapped row per well ever processed.
#[derive(Debug, Clone, PartialEq)]
pub struct AllDataTable {
    headers: Vec<String>,
    data: Vec<f64>,
}

impl AllDataTable {
    pub fn zeros(headers: Vec<String>, rows: usize) -> Self {
        let data = vec![0.0; headers.len() * rows];
        Self { headers, data }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.width()
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let w = self.width();
        &self.data[index * w..(index + 1) * w]
    }

    pub fn write_row(&mut self, index: usize, values: &[f64]) -> OptResult<()> {
        if values.len() != self.width() || index >= self.rows() {
            return Err(OptobotError::Validation(format!(
                "all-data row {} with {} values does not fit a {}x{} table",
                index,
                values.len(),
                self.rows(),
                self.width()
            )));
        }
        let w = self.width();
        self.data[index * w..(index + 1) * w].copy_from_slice(values);
        Ok(())
    }

    /// Highest 1-based iteration number recorded, which equals the number of
    /// iterations already committed.
    pub fn recorded_iterations(&self) -> usize {
        (0..self.rows())
            .map(|i| self.row(i)[0])
            .filter(|v| v.is_finite() && *v > 0.0)
            .fold(0.0f64, f64::max)
            .round() as usize
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> OptResult<()> {
        write_atomically(path.as_ref(), |wtr| {
            wtr.write_record(&self.headers)?;
            for values in self.data.chunks(self.width()) {
                wtr.write_record(values.iter().map(|&v| format_cell(v)))?;
            }
            Ok(())
        })
    }

    pub fn read_csv<P: AsRef<Path>>(path: P, headers: Vec<String>, rows: usize) -> OptResult<Self> {
        let path = path.as_ref();
        let mut table = Self::zeros(headers, rows);
        let mut rdr = csv::Reader::from_path(path)?;

        let found: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if found != table.headers {
            return Err(OptobotError::Validation(format!(
                "{}: header {:?} does not match the experiment layout {:?}",
                path.display(),
                found,
                table.headers
            )));
        }

        let width = table.width();
        let mut row = 0;
        for record in rdr.records() {
            let record = record?;
            if row >= rows || record.len() != width {
                return Err(OptobotError::Validation(format!(
                    "{}: unexpected row {} with {} cells",
                    path.display(),
                    row + 1,
                    record.len()
                )));
            }
            for (i, cell) in record.iter().enumerate() {
                table.data[row * width + i] = parse_cell(cell).ok_or_else(|| {
                    OptobotError::Validation(format!(
                        "{}: row {} holds a non-numeric value '{}'",
                        path.display(),
                        row + 1,
                        cell
                    ))
                })?;
            }
            row += 1;
        }
        if row != rows {
            return Err(OptobotError::Validation(format!(
                "{}: found {} rows, expected {}",
                path.display(),
                row,
                rows
            )));
        }
        Ok(table)
    }
}

// Shortest round-trip representation; NaN is written as an empty cell.
fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        Some(f64::NAN)
    } else {
        cell.parse().ok()
    }
}

/// Writes through a sibling temp file and renames it over `path`, so a failed
/// write never leaves a truncated table behind.
fn write_atomically<F>(path: &Path, fill: F) -> OptResult<()>
where
    F: FnOnce(&mut csv::Writer<File>) -> OptResult<()>,
{
    let tmp = path.with_extension("csv.tmp");
    let result = (|| -> OptResult<()> {
        let mut wtr = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(File::create(&tmp)?);
        fill(&mut wtr)?;
        wtr.flush()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    result.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        OptobotError::persistence(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_round_trip_through_text() {
        for v in [0.0, 1.0, 35.72546745, 1e-12, -3.5, 123456789.125] {
            assert_eq!(parse_cell(&format_cell(v)), Some(v));
        }
        assert!(parse_cell("").unwrap().is_nan());
        assert!(parse_cell("abc").is_none());
    }

    #[test]
    fn test_csv_rows_list_fields_within_each_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let labels = vec!["A".to_string(), String::new()];
        let fields = Some(vec!["x".to_string(), "y".to_string()]);
        let mut table = PlateTable::zeros(labels.clone(), 2, fields.clone());
        let well = WellAddress {
            linear: 1,
            plate: 0,
            row: 0,
            column: 1,
            well_index: 2,
            table_row: 0,
        };
        table.write_well(&well, &[1.5, f64::NAN]).unwrap();
        table.write_csv(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ",1,1,2,2");
        assert_eq!(lines[1], ",x,y,x,y");
        assert_eq!(lines[2], "A,0,0,1.5,");
        assert_eq!(lines[3], ",0,0,0,0");

        let back = PlateTable::read_csv(&path, labels, 2, fields).unwrap();
        assert_eq!(back.read_well(&well)[0], 1.5);
        assert!(back.read_well(&well)[1].is_nan());
        assert!(table.write_well(&WellAddress { table_row: 2, ..well }, &[0.0, 0.0]).is_err());
    }
}
