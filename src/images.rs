use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use mime_guess::from_path;
use spin_sdk::http::Response;
use uuid::Uuid;

use crate::config::*;
use crate::core::db::KvStore;
use crate::core::errors::ApiError;

const NOT_AN_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// An upload that decoded and sniffed as a supported image.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

/// Accepts a `data:<mime>;base64,<payload>` URL or bare base64.
pub fn decode_upload(raw: &str) -> Result<Vec<u8>, String> {
    let payload = match raw.trim().strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((meta, data)) if meta.ends_with(";base64") => data,
            _ => return Err(NOT_AN_IMAGE.to_string()),
        },
        None => raw.trim(),
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(|_| NOT_AN_IMAGE.to_string())
}

/// The content decides, never the file name or declared mime type.
pub fn validate_image(bytes: Vec<u8>) -> Result<ImageUpload, String> {
    if bytes.is_empty() {
        return Err("The submitted file is empty.".to_string());
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(format!("Images must be smaller than {} MB.", MAX_IMAGE_BYTES / (1024 * 1024)));
    }
    let format = match image::guess_format(&bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp)) => format,
        _ => return Err(NOT_AN_IMAGE.to_string()),
    };
    // A valid signature is not enough: the whole image has to decode.
    image::load_from_memory_with_format(&bytes, format).map_err(|_| NOT_AN_IMAGE.to_string())?;
    Ok(ImageUpload { bytes, format })
}

pub fn parse_upload(raw: &str) -> Result<ImageUpload, String> {
    validate_image(decode_upload(raw)?)
}

/// Stores the bytes and returns the reference kept on the post.
pub fn save_image(store: &dyn KvStore, upload: &ImageUpload) -> anyhow::Result<String> {
    let ext = upload.format.extensions_str().first().copied().unwrap_or("img");
    let name = format!("{}.{}", Uuid::new_v4(), ext);
    store.set(&image_key(&name), &upload.bytes)?;
    Ok(name)
}

pub fn delete_image(store: &dyn KvStore, name: &str) -> anyhow::Result<()> {
    store.delete(&image_key(name))
}

pub fn image_url(name: &str) -> String {
    format!("/media/posts/{}", name)
}

pub fn serve_image(store: &dyn KvStore, name: &str) -> Result<Response, ApiError> {
    let bytes = store
        .get(&image_key(name))?
        .ok_or_else(|| ApiError::NotFound("Image not found".to_string()))?;
    let mime = from_path(name).first_or_octet_stream();
    Ok(Response::builder()
        .status(200)
        .header("Content-Type", mime.as_ref())
        .header("Cache-Control", "public, max-age=86400")
        .body(bytes)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::test_support::TINY_GIF;

    #[test]
    fn data_url_gif_is_accepted() {
        let upload = parse_upload(&format!("data:image/gif;base64,{}", TINY_GIF)).unwrap();
        assert_eq!(upload.format, ImageFormat::Gif);
    }

    #[test]
    fn bare_base64_is_accepted() {
        assert!(parse_upload(TINY_GIF).is_ok());
    }

    #[test]
    fn text_file_is_rejected() {
        let text = STANDARD.encode("just some notes, definitely not a picture");
        assert!(parse_upload(&format!("data:text/plain;base64,{}", text)).is_err());
        assert!(parse_upload(&text).is_err());
        assert!(parse_upload("%%% not base64").is_err());
    }

    #[test]
    fn image_signature_without_image_data_is_rejected() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(b"these are meeting notes, not pixels");
        assert!(image::guess_format(&bytes).is_ok());
        assert_eq!(validate_image(bytes.clone()).unwrap_err(), NOT_AN_IMAGE);
        assert!(parse_upload(&STANDARD.encode(&bytes)).is_err());
    }

    #[test]
    fn truncated_gif_is_rejected() {
        let bytes = STANDARD.decode(TINY_GIF).unwrap();
        assert!(validate_image(bytes[..bytes.len() / 2].to_vec()).is_err());
    }

    #[test]
    fn saved_images_are_served_with_their_mime() {
        let store = MemoryStore::new();
        let upload = parse_upload(TINY_GIF).unwrap();
        let name = save_image(&store, &upload).unwrap();
        assert!(name.ends_with(".gif"));
        let resp = serve_image(&store, &name).unwrap();
        assert_eq!(resp.header("Content-Type").and_then(|h| h.as_str()), Some("image/gif"));
        assert_eq!(resp.body(), upload.bytes.as_slice());
        delete_image(&store, &name).unwrap();
        assert!(matches!(serve_image(&store, &name), Err(ApiError::NotFound(_))));
    }
}
