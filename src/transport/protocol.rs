//! Wire formats of the exchange protocol

use super::{Result, TransportError};
use crate::item::mime;
use crate::item::{Item, ItemStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Marker header sent with every request
pub const PROTOCOL_HEADER: &str = "X-RemoteStash-Protocol";

/// Protocol revision carried by [`PROTOCOL_HEADER`]
pub const PROTOCOL_VERSION: &str = "1";

/// Routes served by the exchange server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Status,
    Pull,
    Last,
    Push,
}

impl Route {
    pub fn parse(path: &str) -> Option<Route> {
        match path.trim_end_matches('/') {
            "/status" => Some(Route::Status),
            "/pull" => Some(Route::Pull),
            "/last" => Some(Route::Last),
            "/push" => Some(Route::Push),
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Route::Status => "status",
            Route::Pull => "pull",
            Route::Last => "last",
            Route::Push => "push",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Route::Push => "POST",
            _ => "GET",
        }
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub items_count: usize,
    #[serde(default)]
    pub last: Option<ItemStatus>,
}

impl ServerStatus {
    /// At most one item is held, so the count is 0 or 1
    pub fn from_item(item: Option<&Item>) -> Self {
        Self {
            items_count: usize::from(item.is_some()),
            last: item.map(Item::status),
        }
    }
}

/// Body of a successful `POST /push`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: u8,
}

impl PushResponse {
    pub fn ok() -> Self {
        Self { success: 1 }
    }
}

/// First file of a `multipart/form-data` body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// Turn a pushed request body into an item.
///
/// Raw bodies are typed by `Content-Type`; multipart uploads by their file
/// part. A filename whose extension disagrees with the declared type is
/// logged but accepted.
pub fn parse_push(
    content_type: Option<&str>,
    content_disposition: Option<&str>,
    body: Vec<u8>,
) -> Result<Item> {
    if let Some(boundary) = content_type.and_then(multipart_boundary) {
        let file = parse_multipart(&body, &boundary).ok_or_else(|| {
            TransportError::Malformed("multipart body without a part".to_string())
        })?;

        let declared = file
            .content_type
            .clone()
            .or_else(|| {
                file.filename
                    .as_deref()
                    .and_then(|name| mime::mime_for_path(Path::new(name)))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| mime::OCTET_STREAM.to_string());

        log_type_mismatch(&declared, file.filename.as_deref());
        return Ok(Item::from_bytes(file.data, &declared, None, file.filename));
    }

    let item = Item::from_http_parts(body, content_type, content_disposition);
    log_type_mismatch(item.content_type(), item.filename());
    Ok(item)
}

fn log_type_mismatch(declared: &str, filename: Option<&str>) {
    let Some(filename) = filename else {
        return;
    };
    let (declared, _) = mime::split_content_type(declared);
    if let Some(detected) = mime::mime_for_path(Path::new(filename)) {
        if detected != declared {
            info!(
                "Pushed file {} detected as {} but declared {}",
                filename, detected, declared
            );
        }
    }
}

/// `boundary` parameter of a `multipart/form-data` content type
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let mime = parts.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Pick the first part carrying a filename, or the first part at all
pub fn parse_multipart(body: &[u8], boundary: &str) -> Option<MultipartFile> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let separator = [b"\r\n".as_slice(), &delimiter].concat();

    let mut first = None;
    let mut pos = find(body, &delimiter, 0)? + delimiter.len();

    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        let head_start = if body[pos..].starts_with(b"\r\n") { pos + 2 } else { pos };
        let head_end = find(body, b"\r\n\r\n", head_start)?;
        let data_start = head_end + 4;
        let data_end = find(body, &separator, data_start)?;

        let head = String::from_utf8_lossy(&body[head_start..head_end]);
        let mut part = MultipartFile {
            content_type: None,
            filename: None,
            data: body[data_start..data_end].to_vec(),
        };
        for line in head.lines() {
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim();
                if name.trim().eq_ignore_ascii_case("Content-Type") {
                    part.content_type = Some(value.to_string());
                } else if name.trim().eq_ignore_ascii_case("Content-Disposition") {
                    part.filename = mime::disposition_filename(value);
                }
            }
        }

        if part.filename.is_some() {
            debug!("Multipart file part {:?}", part.filename);
            return Some(part);
        }
        if first.is_none() {
            first = Some(part);
        }

        pos = data_end + separator.len();
    }

    first
}
