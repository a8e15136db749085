//! The TLS exchange server and its mDNS advertisement

use super::http::{self, Request, Response};
use super::protocol::{self, PushResponse, Route, ServerStatus, PROTOCOL_HEADER, PROTOCOL_VERSION};
use super::TransportError;
use crate::auth::TlsIdentity;
use crate::config::Config;
use crate::discovery::{
    available_addresses, available_port, default_interface, Advertisement, ServiceAdvertiser,
};
use crate::item::{mime, Item};
use crate::stash::StashDelegate;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of an [`ExchangeServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

/// Application lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Resume serving
    Foreground,
    /// Stop serving
    Background,
}

/// How the server listens and advertises
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Server instance id published in the `uuid` TXT property
    pub id: Uuid,
    pub name: String,
    /// Interface whose addresses are advertised
    pub interface: Option<String>,
    /// Fixed port; `None` allocates an ephemeral one
    pub port: Option<u16>,
    pub advertise: bool,
    pub max_body_size: usize,
    /// Longest a connection may take to finish its handshake, and then its request
    pub idle_timeout: Duration,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            interface: config.network.interface.clone(),
            port: config.port(),
            advertise: config.network.advertise,
            max_body_size: config.server.max_body_size,
            idle_timeout: config.request_timeout(),
        }
    }
}

struct Running {
    port: u16,
    accept_loop: JoinHandle<()>,
}

/// Serves the stash delegate's current item over HTTPS
pub struct ExchangeServer {
    options: ServerOptions,
    identity: TlsIdentity,
    delegate: Arc<dyn StashDelegate>,
    advertiser: ServiceAdvertiser,
    state: RwLock<ServerState>,
    running: Mutex<Option<Running>>,
}

impl ExchangeServer {
    pub fn new(
        options: ServerOptions,
        identity: TlsIdentity,
        delegate: Arc<dyn StashDelegate>,
    ) -> Self {
        Self {
            options,
            identity,
            delegate,
            advertiser: ServiceAdvertiser::new(),
            state: RwLock::new(ServerState::Stopped),
            running: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.options.id
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Listening port while the server is up
    pub async fn port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|running| running.port)
    }

    async fn set_state(&self, state: ServerState) {
        *self.state.write().await = state;
    }

    /// Start listening and publish the discovery record.
    ///
    /// Failures are logged and leave the server `Stopped`; nothing is
    /// published unless the listener is up.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        self.set_state(ServerState::Starting).await;

        let port = match self.options.port {
            Some(port) => port,
            None => match available_port() {
                Some(address) => address.port,
                None => {
                    error!("No port available, not serving");
                    self.set_state(ServerState::Stopped).await;
                    return;
                }
            },
        };

        let acceptor = match self.identity.server_config() {
            Ok(config) => TlsAcceptor::from(Arc::new(config)),
            Err(e) => {
                error!("Failed to configure TLS: {}", e);
                self.set_state(ServerState::Stopped).await;
                return;
            }
        };

        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to listen on port {}: {}", port, e);
                self.set_state(ServerState::Stopped).await;
                return;
            }
        };

        let context = Arc::new(HandlerContext {
            delegate: self.delegate.clone(),
            max_body_size: self.options.max_body_size,
            idle_timeout: self.options.idle_timeout,
        });
        let accept_loop = tokio::spawn(accept_loop(listener, acceptor, context));

        *running = Some(Running { port, accept_loop });
        self.set_state(ServerState::Listening).await;
        drop(running);

        info!("Serving {} on port {}", self.options.name, port);
        self.delegate.server_started(port).await;

        if self.options.advertise {
            self.advertise(port).await;
        }
    }

    async fn advertise(&self, port: u16) {
        let interface = self.options.interface.clone().or_else(default_interface);
        let addresses = match &interface {
            Some(interface) => available_addresses(interface, Some(port)),
            None => Vec::new(),
        };

        let advertisement = Advertisement {
            id: self.options.id,
            name: self.options.name.clone(),
            port,
            addresses,
            temporary: true,
        };

        if let Err(e) = self.advertiser.publish(&advertisement).await {
            warn!("Failed to publish {}: {}", self.options.name, e);
        }
    }

    /// Unpublish and close the listener; safe to call repeatedly
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();

        if let Err(e) = self.advertiser.unpublish().await {
            warn!("Failed to unpublish {}: {}", self.options.name, e);
        }

        if let Some(running) = running {
            running.accept_loop.abort();
            info!("Stopped serving on port {}", running.port);
        }
        self.set_state(ServerState::Stopped).await;
    }

    /// Stop and release the mDNS daemon
    pub async fn shutdown(&self) {
        self.stop().await;
        if let Err(e) = self.advertiser.shutdown().await {
            debug!("mDNS shutdown: {}", e);
        }
    }

    /// Foreground resumes serving, background stops it
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        debug!("Lifecycle event {:?}", event);
        match event {
            LifecycleEvent::Foreground => self.start().await,
            LifecycleEvent::Background => self.stop().await,
        }
    }
}

struct HandlerContext {
    delegate: Arc<dyn StashDelegate>,
    max_body_size: usize,
    idle_timeout: Duration,
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor, context: Arc<HandlerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let context = context.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, acceptor, context).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    context: Arc<HandlerContext>,
) {
    let mut tls = match timeout(context.idle_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            debug!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("TLS handshake with {} timed out", peer);
            return;
        }
    };

    let request = timeout(
        context.idle_timeout,
        http::read_request(&mut tls, context.max_body_size),
    )
    .await;

    let response = match request {
        Err(_) => {
            debug!("Request from {} timed out, dropping connection", peer);
            return;
        }
        Ok(Ok(request)) => {
            debug!("{} {} from {}", request.method, request.path, peer);
            respond(&request, context.delegate.as_ref()).await
        }
        Ok(Err(TransportError::ConnectionClosed)) => return,
        Ok(Err(e)) => {
            warn!("Bad request from {}: {}", peer, e);
            Response::error(e.status_code(), &e.to_string())
        }
    };

    match timeout(context.idle_timeout, http::write_response(&mut tls, &response)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Failed to answer {}: {}", peer, e),
        Err(_) => {
            debug!("Answer to {} timed out", peer);
            return;
        }
    }
    let _ = tls.shutdown().await;
}

/// Route one request against the delegate
pub async fn respond(request: &Request, delegate: &dyn StashDelegate) -> Response {
    let Some(route) = Route::parse(request.route_path()) else {
        return Response::error(404, "not found");
    };

    if !request.method.eq_ignore_ascii_case(route.method()) {
        return Response::error(405, "method not allowed").with_header("Allow", route.method());
    }

    if request.header(PROTOCOL_HEADER).is_none() {
        debug!("Request without {} header", PROTOCOL_HEADER);
    }

    let response = match route {
        Route::Status => {
            let item = delegate.current_item().await;
            Response::json(200, &ServerStatus::from_item(item.as_ref()))
        }
        // Pull is a peek: the item stays in place
        Route::Pull | Route::Last => {
            let item = delegate.current_item().await.unwrap_or_default();
            item_response(&item)
        }
        Route::Push => match protocol::parse_push(
            request.header("Content-Type"),
            request.header("Content-Disposition"),
            request.body.clone(),
        ) {
            Ok(item) => {
                info!("Received {} ({} bytes)", item, request.body.len());
                delegate.received_item(item).await;
                Response::json(200, &PushResponse::ok())
            }
            Err(e) => Response::error(e.status_code(), &e.to_string()),
        },
    };

    response.with_header(PROTOCOL_HEADER, PROTOCOL_VERSION)
}

fn item_response(item: &Item) -> Response {
    let response = Response::new(200)
        .with_header("Content-Type", item.http_content_type_header())
        .with_body(item.http_body());

    match item.filename() {
        Some(filename) => response.with_header("Content-Disposition", mime::attachment_header(filename)),
        None => response,
    }
}
