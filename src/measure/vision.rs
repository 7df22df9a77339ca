use super::MeasurementRequest;
use crate::error::{OptResult, OptobotError};
use crate::geometry::PlateGeometry;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const IMAGE_DIR: &str = "captured_images";

/// Takes a picture of one plate and stores it at `destination`.
pub trait ImageCapture {
    /// File extension of the images this capture produces.
    fn extension(&self) -> &str;
    fn capture(&mut self, plate: usize, destination: &Path) -> OptResult<()>;
}

/// Reduces a plate image to one colour vector per well, row-major
/// (A1, A2, ... then B1, ...).
pub trait WellColourExtractor {
    fn extract(&mut self, image: &Path, geometry: PlateGeometry) -> OptResult<Vec<Vec<f64>>>;
}

impl<F> WellColourExtractor for F
where
    F: FnMut(&Path, PlateGeometry) -> OptResult<Vec<Vec<f64>>>,
{
    fn extract(&mut self, image: &Path, geometry: PlateGeometry) -> OptResult<Vec<Vec<f64>>> {
        self(image, geometry)
    }
}

/// Copies a fixed image instead of driving a camera.
#[derive(Debug, Clone)]
pub struct FileCapture {
    source: PathBuf,
}

impl FileCapture {
    pub fn new<P: Into<PathBuf>>(source: P) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl ImageCapture for FileCapture {
    fn extension(&self) -> &str {
        self.source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
    }

    fn capture(&mut self, _plate: usize, destination: &Path) -> OptResult<()> {
        fs::copy(&self.source, destination).map_err(|e| {
            OptobotError::Measurement(format!(
                "cannot copy {} to {}: {}",
                self.source.display(),
                destination.display(),
                e
            ))
        })?;
        Ok(())
    }
}

pub struct VisionPipeline {
    capture: Box<dyn ImageCapture>,
    extractor: Box<dyn WellColourExtractor>,
}

impl fmt::Debug for VisionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionPipeline")
            .field("extension", &self.capture.extension())
            .finish_non_exhaustive()
    }
}

/// `captured_images/image_iteration_<n>[_plate_<p>].<ext>`
pub fn image_path(
    exp_dir: &Path,
    iteration: usize,
    plate: Option<usize>,
    extension: &str,
) -> PathBuf {
    let name = match plate {
        Some(p) => format!("image_iteration_{}_plate_{}.{}", iteration, p + 1, extension),
        None => format!("image_iteration_{}.{}", iteration, extension),
    };
    exp_dir.join(IMAGE_DIR).join(name)
}

impl VisionPipeline {
    pub fn new<C, E>(capture: C, extractor: E) -> Self
    where
        C: ImageCapture + 'static,
        E: WellColourExtractor + 'static,
    {
        Self {
            capture: Box::new(capture),
            extractor: Box::new(extractor),
        }
    }

    /// Photographs every plate the batch touches and picks out the batch's wells.
    pub fn measure(&mut self, request: &MeasurementRequest<'_>) -> OptResult<Vec<Vec<f64>>> {
        fs::create_dir_all(request.exp_dir.join(IMAGE_DIR))?;

        let mut plates: Vec<usize> = request.wells.iter().map(|w| w.plate).collect();
        plates.dedup();
        let spans_plates = plates.len() > 1;
        let wells_per_plate = request.geometry.wells_per_plate();

        let mut colours = Vec::with_capacity(plates.len());
        for &plate in &plates {
            let path = image_path(
                request.exp_dir,
                request.iteration,
                spans_plates.then_some(plate),
                self.capture.extension(),
            );
            self.capture.capture(plate, &path)?;
            info!("📷 Captured plate {} to {}", plate + 1, path.display());

            let per_well = self.extractor.extract(&path, request.geometry)?;
            if per_well.len() != wells_per_plate {
                return Err(OptobotError::MeasurementShape {
                    expected_rows: wells_per_plate,
                    expected_cols: request.num_measured_parameters,
                    detail: format!("extractor found {} wells in {}", per_well.len(), path.display()),
                });
            }
            colours.push((plate, per_well));
        }

        request
            .wells
            .iter()
            .map(|well| {
                let (_, per_well) = colours
                    .iter()
                    .find(|(p, _)| *p == well.plate)
                    .ok_or_else(|| {
                        OptobotError::Measurement(format!("no image of plate {}", well.plate + 1))
                    })?;
                let colour = &per_well[well.row * request.geometry.columns + well.column];
                debug!("{} -> {:?}", well.name(), colour);
                Ok(colour.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_names_carry_plate_only_when_needed() {
        let dir = Path::new("/exp");
        assert_eq!(
            image_path(dir, 4, None, "jpg"),
            PathBuf::from("/exp/captured_images/image_iteration_4.jpg")
        );
        assert_eq!(
            image_path(dir, 7, Some(1), "png"),
            PathBuf::from("/exp/captured_images/image_iteration_7_plate_2.png")
        );
    }
}
