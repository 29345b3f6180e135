use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

use crate::GeneratorError;

/// Mime type for an image file extension
pub fn image_mime_type(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

/// Encode image bytes as a `data:` URL
pub fn image_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Read an image file into a `data:` URL, typed by its extension
pub fn file_to_data_url(path: &Path) -> Result<String, GeneratorError> {
    let bytes = std::fs::read(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    Ok(image_data_url(&bytes, image_mime_type(extension)))
}
