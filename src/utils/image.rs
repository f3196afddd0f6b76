//! Image decoding

use std::io::Cursor;

use image::DynamicImage;

use crate::error::EmbeddingError;

/// Decode image bytes (JPEG, PNG) and apply the EXIF orientation, if any.
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, EmbeddingError> {
    if data.is_empty() {
        return Err(EmbeddingError::Image("empty image".to_string()));
    }
    let image = image::load_from_memory(data).map_err(|e| EmbeddingError::Image(e.to_string()))?;
    Ok(apply_orientation(image, exif_orientation(data)))
}

/// EXIF orientation tag, 1 when absent or unreadable.
fn exif_orientation(data: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

// https://exiftool.org/TagNames/EXIF.html
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tiny_png;
    use image::GenericImageView;

    #[test]
    fn decodes_png_without_exif() {
        let image = decode_image(&tiny_png(6, 4)).unwrap();
        assert_eq!(image.dimensions(), (6, 4));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_image(b"not an image"), Err(EmbeddingError::Image(_))));
        assert!(matches!(decode_image(&[]), Err(EmbeddingError::Image(_))));
    }

    #[test]
    fn orientation_six_rotates() {
        let image = DynamicImage::new_rgb8(6, 4);
        assert_eq!(apply_orientation(image, 6).dimensions(), (4, 6));
    }
}
