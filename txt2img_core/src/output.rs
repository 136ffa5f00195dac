use std::{fs, io::Cursor, path::Path};

use image::{DynamicImage, ImageFormat};

use crate::OutputError;

/// Encode fully in memory first so a failed encode never leaves a partial file behind.
pub(crate) fn save_image(
    image: &DynamicImage,
    path: &Path,
    format: ImageFormat,
) -> Result<(), OutputError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), format)
        .map_err(OutputError::Encode)?;
    fs::write(path, buf).map_err(OutputError::Write)
}
