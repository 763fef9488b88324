use std::path::Path;

use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;

use crate::browser::{BrowserError, BrowserResult};

/// Reads the login QR artifact and re-renders it for the terminal so the
/// operator can scan it over SSH.
pub trait QrCodec: Send + Sync {
    fn decode(&self, path: &Path) -> BrowserResult<Option<String>>;
    fn render(&self, payload: &str) -> BrowserResult<String>;
}

#[derive(Debug, Default, Clone)]
pub struct TerminalQrCodec;

impl QrCodec for TerminalQrCodec {
    fn decode(&self, path: &Path) -> BrowserResult<Option<String>> {
        let image = image::open(path)
            .map_err(|err| BrowserError::Qr(format!("failed to open {}: {err}", path.display())))?
            .to_luma8();
        let (width, height) = image.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                image.get_pixel(x as u32, y as u32)[0]
            });
        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_, content)) => return Ok(Some(content)),
                Err(err) => tracing::debug!(error = %err, "qr grid failed to decode"),
            }
        }
        Ok(None)
    }

    fn render(&self, payload: &str) -> BrowserResult<String> {
        let code = QrCode::new(payload.as_bytes())
            .map_err(|err| BrowserError::Qr(format!("failed to encode payload: {err}")))?;
        Ok(code
            .render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .quiet_zone(true)
            .build())
    }
}

/// Decodes `path` and returns the terminal rendering, `None` when the image
/// holds no readable code.
pub fn render_artifact(codec: &dyn QrCodec, path: &Path) -> BrowserResult<Option<String>> {
    match codec.decode(path)? {
        Some(payload) => codec.render(&payload).map(Some),
        None => Ok(None),
    }
}
