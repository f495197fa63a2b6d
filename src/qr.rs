//! Pairing code rendering: PNG for the HTTP endpoint, half-block text for
//! the terminal.

use std::io::Cursor;

use image::{ImageFormat, Luma};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use thiserror::Error;
use tracing::warn;

/// Minimum edge length of the PNG, in pixels.
pub const MIN_IMAGE_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("cannot encode QR payload: {0}")]
    Encode(#[from] qrcode::types::QrError),
    #[error("cannot write PNG: {0}")]
    Image(#[from] image::ImageError),
}

pub fn render_png(data: &str) -> Result<Vec<u8>, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_IMAGE_SIZE, MIN_IMAGE_SIZE)
        .quiet_zone(true)
        .build();

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn render_terminal(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Container logs are often the only place a pairing code can be seen.
pub fn print_to_stderr(data: &str) {
    match render_terminal(data) {
        Ok(art) => eprintln!("\nScan this QR code to pair the session:\n{art}"),
        Err(e) => warn!("Failed to render QR code: {}", e),
    }
}
