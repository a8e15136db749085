//! MIME type, charset and filename helpers

use encoding_rs::{Encoding, UTF_8};
use std::path::Path;

/// Fallback type for payloads we cannot classify
pub const OCTET_STREAM: &str = "application/octet-stream";

/// MIME type for a file extension from the standard table
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        return None;
    }
    mime_guess::from_ext(extension).first_raw()
}

/// MIME type for a path, based on its extension
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
}

/// Encoding for an IANA charset label
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().trim_matches('"').as_bytes())
}

/// IANA name of an encoding, lowercased for use in a header
pub fn charset_name(encoding: &'static Encoding) -> String {
    encoding.output_encoding().name().to_ascii_lowercase()
}

/// Split a `Content-Type` header into its bare MIME type and charset.
///
/// The MIME type is lowercased; an unknown charset label is dropped.
pub fn split_content_type(header: &str) -> (String, Option<&'static Encoding>) {
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

    let encoding = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            encoding_for_label(value)
        } else {
            None
        }
    });

    (mime, encoding)
}

/// `Content-Type` header value with an optional charset parameter
pub fn content_type_header(mime: &str, encoding: Option<&'static Encoding>) -> String {
    match encoding {
        Some(encoding) => format!("{}; charset={}", mime, charset_name(encoding)),
        None => mime.to_string(),
    }
}

/// Filename from a `Content-Disposition` header
pub fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        // Never trust a path from the wire
        let name = value.rsplit(['/', '\\']).next().unwrap_or(value);
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

/// `Content-Disposition` header value for an attachment
pub fn attachment_header(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename.replace('"', "'"))
}

/// Default encoding for text payloads
pub fn default_encoding() -> &'static Encoding {
    UTF_8
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("png"), Some("image/png"));
        assert_eq!(mime_for_extension(".txt"), Some("text/plain"));
        assert_eq!(mime_for_extension("jpg"), Some("image/jpeg"));
        assert_eq!(mime_for_extension(""), None);
        assert_eq!(mime_for_extension("definitely-not-an-ext"), None);
    }

    #[test]
    fn test_split_content_type() {
        let (mime, enc) = split_content_type("Text/Plain; charset=UTF-8");
        assert_eq!(mime, "text/plain");
        assert_eq!(enc, Some(UTF_8));

        let (mime, enc) = split_content_type("text/html; charset=\"shift_jis\"");
        assert_eq!(mime, "text/html");
        assert_eq!(enc, Some(SHIFT_JIS));

        let (mime, enc) = split_content_type("image/png");
        assert_eq!(mime, "image/png");
        assert_eq!(enc, None);

        let (_, enc) = split_content_type("text/plain; charset=klingon");
        assert_eq!(enc, None);
    }

    #[test]
    fn test_content_type_header() {
        assert_eq!(
            content_type_header("text/plain", Some(UTF_8)),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            content_type_header("text/plain", Some(WINDOWS_1252)),
            "text/plain; charset=windows-1252"
        );
        assert_eq!(content_type_header("image/png", None), "image/png");
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename("attachment; filename=\"photo.jpg\""),
            Some("photo.jpg".to_string())
        );
        assert_eq!(
            disposition_filename("form-data; name=\"file\"; filename=notes.txt"),
            Some("notes.txt".to_string())
        );
        assert_eq!(
            disposition_filename("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
