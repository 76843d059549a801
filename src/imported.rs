//! `IMPORTED` images: decoded from disk once, uploaded through the driver, then sampled by name.

use image::{ImageReader, RgbaImage};

use crate::error::{EngineError, Result};
use crate::schema::{ImportedImage, Size};

/// A decoded image ready for upload.
pub struct DecodedImage {
    pub name: String,
    pub size: Size,
    pub pixels: RgbaImage,
}

pub fn decode(image: &ImportedImage) -> Result<DecodedImage> {
    let failure = |reason: String| EngineError::ImportedImage {
        name: image.name.clone(),
        path: image.path.clone(),
        reason,
    };
    let pixels = ImageReader::open(&image.path)
        .map_err(|error| failure(format!("failed opening: {error}")))?
        .with_guessed_format()
        .map_err(|error| failure(format!("failed reading: {error}")))?
        .decode()
        .map_err(|error| failure(format!("failed decoding: {error}")))?
        .to_rgba8();
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 {
        return Err(failure("image is empty".to_owned()));
    }
    tracing::debug!(
        name = %image.name,
        path = %image.path.display(),
        width,
        height,
        "decoded imported image"
    );
    Ok(DecodedImage {
        name: image.name.clone(),
        size: Size::new(width, height),
        pixels,
    })
}

/// Decodes every image, stopping at the first failure.
pub fn decode_all(images: &[ImportedImage]) -> Result<Vec<DecodedImage>> {
    images.iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::Rgba;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn decodes_png_to_rgba() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("noise.png");
        RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]))
            .save(&path)
            .expect("png saves");

        let decoded = decode(&ImportedImage {
            name: "noise".to_owned(),
            path,
        })
        .expect("decodes");
        assert_eq!(decoded.size, Size::new(3, 2));
        assert_eq!(decoded.pixels.get_pixel(2, 1), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn missing_and_corrupt_files_report_the_image_name() {
        let dir = tempdir().expect("tempdir");
        let missing = ImportedImage {
            name: "ghost".to_owned(),
            path: dir.path().join("ghost.png"),
        };
        let error = decode(&missing).err().expect("missing file");
        assert!(matches!(error, EngineError::ImportedImage { ref name, .. } if name == "ghost"));

        let corrupt_path = dir.path().join("corrupt.png");
        fs::write(&corrupt_path, b"not a png").expect("write");
        let corrupt = ImportedImage {
            name: "corrupt".to_owned(),
            path: corrupt_path,
        };
        let error = decode_all(&[corrupt]).err().expect("corrupt file");
        assert_eq!(error.code(), "imported_image");
    }
}
