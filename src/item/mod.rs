//! The exchanged clipboard item and its typed content

pub mod codec;
pub mod mime;

pub use codec::Content;

use encoding_rs::Encoding;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Summary of an item as reported by `/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub size: usize,
    #[serde(rename = "content-type")]
    pub content_type: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// One clipboard item: a MIME type, optional filename and typed content.
///
/// The content kind is decided once at construction from the MIME type.
#[derive(Debug, Clone)]
pub struct Item {
    content_type: String,
    encoding: Option<&'static Encoding>,
    filename: Option<String>,
    content: Content,
}

impl Default for Item {
    fn default() -> Self {
        Self::empty()
    }
}

impl Item {
    /// An empty `text/plain` item
    pub fn empty() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            encoding: None,
            filename: None,
            content: Content::Empty,
        }
    }

    pub fn text(text: impl Into<String>, content_type: &str, encoding: &'static Encoding) -> Self {
        Self {
            content_type: bare_type(content_type),
            encoding: Some(encoding),
            filename: None,
            content: Content::Text(text.into()),
        }
    }

    pub fn image(image: DynamicImage, content_type: &str, filename: Option<String>) -> Self {
        Self {
            content_type: bare_type(content_type),
            encoding: None,
            filename,
            content: Content::Image(image),
        }
    }

    /// Classify a payload by its declared type
    pub fn from_bytes(
        bytes: Vec<u8>,
        content_type: &str,
        encoding: Option<&'static Encoding>,
        filename: Option<String>,
    ) -> Self {
        let (mime, declared) = mime::split_content_type(content_type);
        let encoding = encoding.or(declared);
        let content = codec::classify(bytes, &mime, encoding);

        Self {
            content_type: mime,
            encoding,
            filename,
            content,
        }
    }

    /// Contents of a file, typed from its extension and classified like any
    /// other payload
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let content_type = mime::mime_for_path(path).unwrap_or(mime::OCTET_STREAM);
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        Ok(Self::from_bytes(bytes, content_type, None, filename))
    }

    /// Decode an HTTP body with its `Content-Type` and `Content-Disposition` headers
    pub fn from_http_parts(
        bytes: Vec<u8>,
        content_type: Option<&str>,
        content_disposition: Option<&str>,
    ) -> Self {
        let content_type = content_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(mime::OCTET_STREAM);
        let filename = content_disposition.and_then(mime::disposition_filename);
        Self::from_bytes(bytes, content_type, None, filename)
    }

    /// Replace every field with those of `other`
    pub fn update(&mut self, other: Item) {
        *self = other;
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.encoding
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Character count for text, otherwise the payload's byte length
    pub fn size(&self) -> usize {
        match &self.content {
            Content::Empty => 0,
            Content::Text(text) => text.chars().count(),
            Content::Binary(bytes) => bytes.len(),
            Content::Image(_) => self.http_body().len(),
        }
    }

    pub fn http_body(&self) -> Vec<u8> {
        codec::serialize(&self.content, &self.content_type, self.encoding)
    }

    /// `Content-Type` value; the charset is only added for text content
    pub fn http_content_type_header(&self) -> String {
        match &self.content {
            Content::Text(_) => mime::content_type_header(
                &self.content_type,
                Some(self.encoding.unwrap_or_else(mime::default_encoding)),
            ),
            _ => self.content_type.clone(),
        }
    }

    pub fn status(&self) -> ItemStatus {
        ItemStatus {
            size: self.size(),
            content_type: self.content_type.clone(),
            filename: self.filename.clone(),
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item({})", self.content_type)
    }
}

fn bare_type(content_type: &str) -> String {
    mime::split_content_type(content_type).0
}
