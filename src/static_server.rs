use mime_guess::from_path;
use rust_embed::RustEmbed;
use spin_sdk::http::Response;

use crate::core::errors::ApiError;

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

/// Serves `/static/{file}` from the embedded asset folder.
pub fn serve_static(file: &str) -> Result<Response, ApiError> {
    let file_path = file.trim_start_matches('/');
    if file_path.is_empty() || file_path.split('/').any(|part| part == "..") {
        return Err(ApiError::NotFound(file.to_string()));
    }

    let asset = Assets::get(file_path).ok_or_else(|| ApiError::NotFound(file.to_string()))?;
    let mime = from_path(file_path).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", mime.as_ref())
        .header("Cache-Control", "public, max-age=3600")
        .body(asset.data.to_vec())
        .build())
}
