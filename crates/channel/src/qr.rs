//! Pairing code rendering.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    qrcode::{
        EcLevel, QrCode,
        render::{svg, unicode},
        types::QrError,
    },
};

const IMAGE_SIZE: u32 = 400;

/// Render `code` as a `data:image/svg+xml;base64,...` URL for the web viewer.
pub fn render_data_url(code: &str) -> Result<String, QrError> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::H)?;
    let image = qr
        .render::<svg::Color<'_>>()
        .min_dimensions(IMAGE_SIZE, IMAGE_SIZE)
        .quiet_zone(true)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(image)))
}

/// Render `code` with half-block characters for pairing from a terminal.
pub fn render_terminal(code: &str) -> Result<String, QrError> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::L)?;
    Ok(qr
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
