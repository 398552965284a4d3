//! PDF rasterisation: every page of an exam paper to a base64 PNG.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! thread-local state. Rendering runs on tokio's blocking pool so the worker
//! threads stay free.
//!
//! ## Why cap pixels, not DPI?
//!
//! Scanned papers come in every physical size. `max_rendered_pixels` caps the
//! longest edge regardless, which bounds memory and keeps each page inside
//! the image-size range vision models read best.

use crate::backend::InlineImage;
use crate::config::RenderConfig;
use crate::error::ExamError;
use crate::pipeline::encode::encode_page;
use pdfium_render::prelude::*;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check that `path` exists and starts with the `%PDF` magic bytes.
pub fn validate_pdf_path(path: &Path) -> Result<(), ExamError> {
    let mut file = std::fs::File::open(path).map_err(|_| ExamError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(ExamError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library.
pub fn bind_pdfium() -> Result<Pdfium, ExamError> {
    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(env_path);
        let lib = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        return Pdfium::bind_to_library(&lib)
            .map(Pdfium::new)
            .map_err(|e| ExamError::PdfiumBindingFailed(format!("{}: {e}", lib.display())));
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ExamError::PdfiumBindingFailed(e.to_string()))
}

/// Rasterise every page of `pdf_path`, in page order.
pub async fn render_pdf(
    pdf_path: &Path,
    config: &RenderConfig,
) -> Result<Vec<InlineImage>, ExamError> {
    validate_pdf_path(pdf_path)?;
    let path = pdf_path.to_path_buf();
    let config = config.clone();

    tokio::task::spawn_blocking(move || render_pdf_blocking(&path, &config))
        .await
        .map_err(|e| ExamError::Internal(format!("Render task panicked: {e}")))?
}

/// Rasterise an in-memory PDF. The bytes are written to a temporary file that
/// is removed when rendering finishes.
pub async fn render_pdf_bytes(
    bytes: &[u8],
    config: &RenderConfig,
) -> Result<Vec<InlineImage>, ExamError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ExamError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExamError::Internal(format!("tempfile write: {e}")))?;
    render_pdf(tmp.path(), config).await
}

fn render_pdf_blocking(pdf_path: &Path, config: &RenderConfig) -> Result<Vec<InlineImage>, ExamError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, config.password.as_deref())
        .map_err(|e| ExamError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let render_config = PdfRenderConfig::new()
        .set_target_width(config.max_rendered_pixels as i32)
        .set_maximum_height(config.max_rendered_pixels as i32);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx + 1;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExamError::RasterisationFailed {
                page: page_number,
                detail: format!("{e:?}"),
            })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );
        let encoded = encode_page(&image).map_err(|e| ExamError::RasterisationFailed {
            page: page_number,
            detail: format!("PNG encoding failed: {e}"),
        })?;
        images.push(encoded);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let err = validate_pdf_path(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ExamError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PK\x03\x04 not a pdf").unwrap();
        match validate_pdf_path(tmp.path()).unwrap_err() {
            ExamError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pdf_magic_is_accepted() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7\n").unwrap();
        assert!(validate_pdf_path(tmp.path()).is_ok());
    }
}
