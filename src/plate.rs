use image::RgbImage;

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

/// License-plate text extraction for a vehicle region.
///
/// An empty string means "nothing readable" and is not an error.
pub trait PlateReader {
    fn read_plate(&mut self, image: &RgbImage, vehicle: &BBox<Ltrb>) -> Result<String, Error>;
}

/// Reader used when no OCR backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlateReader;

impl PlateReader for NoPlateReader {
    #[inline]
    fn read_plate(&mut self, _image: &RgbImage, _vehicle: &BBox<Ltrb>) -> Result<String, Error> {
        Ok(String::new())
    }
}
