//! Payload classification and serialization

use crate::item::mime::default_encoding;
use encoding_rs::Encoding;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::fmt;
use std::io::Cursor;
use tracing::{debug, error, warn};

/// Typed interpretation of an item's payload
#[derive(Clone)]
pub enum Content {
    Empty,
    Text(String),
    Image(DynamicImage),
    Binary(Vec<u8>),
}

impl Content {
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Empty => "empty",
            Content::Text(_) => "text",
            Content::Image(_) => "image",
            Content::Binary(_) => "binary",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Content::Empty)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Empty => write!(f, "Empty"),
            Content::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Content::Image(image) => write!(f, "Image({}x{})", image.width(), image.height()),
            Content::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
        }
    }
}

/// Classify raw bytes according to their declared MIME type.
///
/// Never fails: a payload that does not decode as its declared kind is kept
/// as [`Content::Binary`].
pub fn classify(bytes: Vec<u8>, mime: &str, encoding: Option<&'static Encoding>) -> Content {
    if mime.starts_with("text/") {
        let encoding = encoding.unwrap_or_else(default_encoding);
        match encoding.decode_without_bom_handling_and_without_replacement(&bytes) {
            Some(text) => return Content::Text(text.into_owned()),
            None => debug!(
                "Payload declared {} is not valid {}, keeping raw bytes",
                mime,
                encoding.name()
            ),
        }
    } else if mime.starts_with("image/") {
        match image::load_from_memory(&bytes) {
            Ok(image) => return Content::Image(image),
            Err(e) => debug!("Payload declared {} failed to decode: {}", mime, e),
        }
    }

    Content::Binary(bytes)
}

/// Serialize content back to wire bytes
pub fn serialize(content: &Content, mime: &str, encoding: Option<&'static Encoding>) -> Vec<u8> {
    match content {
        Content::Empty => Vec::new(),
        Content::Binary(bytes) => bytes.clone(),
        Content::Text(text) => {
            let encoding = encoding.unwrap_or_else(default_encoding);
            let (bytes, _, unmappable) = encoding.encode(text);
            if unmappable {
                warn!("Text contains characters {} cannot represent", encoding.name());
            }
            bytes.into_owned()
        }
        Content::Image(image) => encode_image(image, mime),
    }
}

/// Encode an image as the declared subtype; jpeg at maximum quality, unknown
/// or unsupported subtypes as png
pub fn encode_image(image: &DynamicImage, mime: &str) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());

    let result = match mime {
        "image/jpeg" | "image/jpg" => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, 100);
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
        }
        _ => {
            let format = ImageFormat::from_mime_type(mime).unwrap_or(ImageFormat::Png);
            match image.write_to(&mut buffer, format) {
                Err(e) if format != ImageFormat::Png => {
                    debug!("Cannot write {:?} ({}), using png", format, e);
                    buffer = Cursor::new(Vec::new());
                    image.write_to(&mut buffer, ImageFormat::Png)
                }
                other => other,
            }
        }
    };

    match result {
        Ok(()) => buffer.into_inner(),
        Err(e) => {
            error!("Failed to encode image as {}: {}", mime, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_8, WINDOWS_1252};
    use image::{ImageReader, Rgb, RgbImage};

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(4, 3, |x, y| {
            Rgb([(x * 60) as u8, (y * 80) as u8, 200])
        }))
    }

    #[test]
    fn test_text_roundtrip_multibyte() {
        let content = Content::Text("héllo".to_string());
        let bytes = serialize(&content, "text/plain", Some(UTF_8));
        assert_eq!(bytes.len(), 6);

        match classify(bytes, "text/plain", Some(UTF_8)) {
            Content::Text(text) => assert_eq!(text, "héllo"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_text_declared_encoding() {
        // "café" in windows-1252
        let bytes = vec![0x63, 0x61, 0x66, 0xe9];
        match classify(bytes, "text/plain", Some(WINDOWS_1252)) {
            Content::Text(text) => assert_eq!(text, "café"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_text_falls_back_to_binary() {
        let bytes = vec![0xff, 0xfe, 0x00, 0xc3];
        match classify(bytes.clone(), "text/plain", None) {
            Content::Binary(raw) => assert_eq!(raw, bytes),
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_image_falls_back_to_binary() {
        let bytes = b"\x89PNG not really".to_vec();
        assert!(matches!(
            classify(bytes, "image/png", None),
            Content::Binary(_)
        ));
    }

    #[test]
    fn test_other_types_are_binary() {
        let bytes = b"{\"a\":1}".to_vec();
        assert!(matches!(
            classify(bytes, "application/json", None),
            Content::Binary(_)
        ));
    }

    #[test]
    fn test_image_png_roundtrip() {
        let bytes = encode_image(&sample_image(), "image/png");
        assert!(!bytes.is_empty());

        match classify(bytes, "image/png", None) {
            Content::Image(image) => {
                assert_eq!(image.width(), 4);
                assert_eq!(image.height(), 3);
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_image_jpeg_subtype() {
        let bytes = encode_image(&sample_image(), "image/jpeg");
        let format = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .unwrap()
            .format();
        assert_eq!(format, Some(ImageFormat::Jpeg));
    }

    #[test]
    fn test_unknown_image_subtype_writes_png() {
        let bytes = encode_image(&sample_image(), "image/x-unknown");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_empty_serializes_to_nothing() {
        assert!(serialize(&Content::Empty, "text/plain", None).is_empty());
    }
}
