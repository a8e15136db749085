//! Client side of the exchange protocol

use super::protocol::{Route, ServerStatus, PROTOCOL_HEADER, PROTOCOL_VERSION};
use super::Result;
use crate::auth::TrustVerifier;
use crate::discovery::{PeerAddress, PeerRecord};
use crate::item::{mime, Item};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Decoded response parts
struct Reply {
    content_type: Option<String>,
    content_disposition: Option<String>,
    body: Vec<u8>,
}

/// Talks to one discovered peer.
///
/// Every operation resolves to `None` on any failure; there is no retry.
pub struct PeerConnection {
    record: PeerRecord,
    client: Client,
    /// Most recent request; a new one replaces it without cancelling it
    in_flight: Mutex<Option<(Method, Url)>>,
}

impl PeerConnection {
    pub fn new(record: PeerRecord, verifier: Arc<TrustVerifier>, timeout: Duration) -> Result<Self> {
        let tls = verifier.client_config()?;
        let client = Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            record,
            client,
            in_flight: Mutex::new(None),
        })
    }

    pub fn record(&self) -> &PeerRecord {
        &self.record
    }

    /// First ipv4 address with a usable url, else the first address of any
    /// family that has one
    pub fn select_address(record: &PeerRecord) -> Option<PeerAddress> {
        let usable = |address: &&PeerAddress| address.url("").is_some();

        record
            .addresses
            .iter()
            .filter(|address| address.is_ipv4())
            .find(usable)
            .or_else(|| record.addresses.iter().find(usable))
            .copied()
    }

    /// Request for `path` on the selected address, carrying the protocol marker
    pub fn build_request(&self, path: &str, method: Method) -> Option<RequestBuilder> {
        let address = Self::select_address(&self.record)?;
        let url = address.url(path)?;
        Some(
            self.client
                .request(method, url)
                .header(PROTOCOL_HEADER, PROTOCOL_VERSION),
        )
    }

    /// The last request issued, if any
    pub fn in_flight(&self) -> Option<(Method, Url)> {
        self.in_flight.lock().ok().and_then(|guard| guard.clone())
    }

    async fn send(&self, builder: RequestBuilder) -> Option<Reply> {
        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid request for {}: {}", self.record.display_name, e);
                return None;
            }
        };

        let target = (request.method().clone(), request.url().clone());
        debug!("{} {}", target.0, target.1);
        if let Ok(mut in_flight) = self.in_flight.lock() {
            *in_flight = Some(target);
        }

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", self.record.display_name, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "{} answered {}",
                self.record.display_name,
                response.status()
            );
            return None;
        }

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);

        match response.bytes().await {
            Ok(body) => Some(Reply {
                content_type,
                content_disposition,
                body: body.to_vec(),
            }),
            Err(e) => {
                warn!("Failed to read body from {}: {}", self.record.display_name, e);
                None
            }
        }
    }

    async fn fetch_item(&self, builder: Option<RequestBuilder>) -> Option<Item> {
        let reply = self.send(builder?).await?;
        Some(Item::from_http_parts(
            reply.body,
            reply.content_type.as_deref(),
            reply.content_disposition.as_deref(),
        ))
    }

    /// Push an item; the server's reply is decoded as an item
    pub async fn push(&self, item: &Item) -> Option<Item> {
        let mut builder = self
            .build_request(Route::Push.path(), Method::POST)?
            .header(CONTENT_TYPE, item.http_content_type_header())
            .body(item.http_body());

        if let Some(filename) = item.filename() {
            builder = builder.header(CONTENT_DISPOSITION, mime::attachment_header(filename));
        }

        self.fetch_item(Some(builder)).await
    }

    /// The peer's current item, left in place on the peer
    pub async fn pull(&self) -> Option<Item> {
        self.fetch_item(self.build_request(Route::Pull.path(), Method::GET))
            .await
    }

    pub async fn last_item(&self) -> Option<Item> {
        self.fetch_item(self.build_request(Route::Last.path(), Method::GET))
            .await
    }

    pub async fn status(&self) -> Option<ServerStatus> {
        let builder = self.build_request(Route::Status.path(), Method::GET)?;
        let reply = self.send(builder).await?;

        match serde_json::from_slice(&reply.body) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Invalid status from {}: {}", self.record.display_name, e);
                None
            }
        }
    }
}
