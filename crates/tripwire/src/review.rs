//! Evidence review helpers
//!
//! Loading an evidence image for display. Files are validated by decoding
//! them, since a truncated or foreign file with an image extension is
//! indexed like any other.

use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

use crate::error::DecodeError;
use crate::storage::EvidenceRecord;

/// Edge length of review thumbnails, in pixels
pub const THUMBNAIL_EDGE: u32 = 100;

/// Displayable image data
#[derive(Debug, Clone)]
pub struct ImageBytes {
    /// Encoded file contents (PNG or JPEG)
    pub encoded: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ImageBytes {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn decode_error(record: &EvidenceRecord, source: image::ImageError) -> DecodeError {
    DecodeError {
        id: record.id.clone(),
        path: record.path.clone(),
        source,
    }
}

fn decode(record: &EvidenceRecord) -> Result<(Vec<u8>, ImageFormat, DynamicImage), DecodeError> {
    let data = std::fs::read(&record.path)
        .map_err(|e| decode_error(record, image::ImageError::IoError(e)))?;
    let format = image::guess_format(&data).map_err(|e| decode_error(record, e))?;
    let img = image::load_from_memory_with_format(&data, format)
        .map_err(|e| decode_error(record, e))?;
    Ok((data, format, img))
}

/// Read the full image behind `record`, failing if it does not decode.
pub fn load_full(record: &EvidenceRecord) -> Result<ImageBytes, DecodeError> {
    let (data, format, img) = decode(record)?;
    let (width, height) = img.dimensions();
    debug!("Loaded evidence {} ({}x{})", record.id, width, height);

    Ok(ImageBytes {
        encoded: Bytes::from(data),
        format,
        width,
        height,
    })
}

/// Decode the image behind `record` and shrink it to fit in a
/// `max_edge` square, preserving aspect ratio. The result is PNG-encoded.
pub fn load_thumbnail(record: &EvidenceRecord, max_edge: u32) -> Result<ImageBytes, DecodeError> {
    let (_, _, img) = decode(record)?;
    let edge = max_edge.max(1);
    let thumb = img.thumbnail(edge, edge);

    let mut out = Cursor::new(Vec::new());
    thumb
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| decode_error(record, e))?;

    let (width, height) = thumb.dimensions();
    Ok(ImageBytes {
        encoded: Bytes::from(out.into_inner()),
        format: ImageFormat::Png,
        width,
        height,
    })
}
