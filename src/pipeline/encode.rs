//! Image encoding: `DynamicImage` → base64 PNG for inline model input.
//!
//! PNG rather than JPEG: compression artefacts around small print, subscripts
//! and option labels cost more transcription accuracy than the extra bytes.

use crate::backend::InlineImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<InlineImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(InlineImage::png(b64))
}
