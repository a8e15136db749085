//! Command line front-end for serving and exchanging stash items

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::auth::{TlsIdentity, TrustContext, TrustVerifier};
use crate::config::Config;
use crate::discovery::{DiscoveryEvent, DiscoveryService, PeerRecord};
use crate::item::Item;
use crate::stash::MemoryStash;
use crate::transport::{ExchangeServer, PeerConnection, ServerOptions, ServerState};

/// Content type assumed for data piped on stdin
const STDIN_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Parser)]
#[command(name = "remotestash")]
#[command(about = "Share a stash item with devices on the local network")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use the peer whose name contains this text
    #[arg(long, global = true)]
    pub peer: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Serve a stash on this device until interrupted")]
    Serve {
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    #[command(about = "Push a file or stdin to a remote stash")]
    Push {
        file: Option<PathBuf>,

        #[arg(short = 't', long)]
        content_type: Option<String>,
    },

    #[command(about = "Fetch the current item of a remote stash")]
    Pull {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    #[command(about = "Fetch the last item of a remote stash")]
    Last {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    #[command(about = "Show the status of a remote stash")]
    Status,

    #[command(about = "List remote stashes on the network")]
    Peers,

    #[command(about = "Generate the shared TLS certificate")]
    Cert {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

pub struct CliHandler {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
    peer: Option<String>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Arc::new(Config::load_config(config_path.as_deref())?);

        Ok(Self {
            config,
            config_path,
            peer: None,
        })
    }

    /// Restrict peer selection to names containing `peer`
    pub fn with_peer(mut self, peer: Option<String>) -> Self {
        self.peer = peer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Serve { name, port } => self.serve(name, port).await,
            Commands::Push { file, content_type } => self.push(file, content_type).await,
            Commands::Pull { output } => self.pull(output, false).await,
            Commands::Last { output } => self.pull(output, true).await,
            Commands::Status => self.show_status().await,
            Commands::Peers => self.show_peers().await,
            Commands::Cert { force } => self.generate_cert(force),
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    fn load_identity(&self) -> Result<TlsIdentity> {
        TlsIdentity::load(&self.config.tls.certificate, &self.config.tls.private_key)
            .with_context(|| {
                format!(
                    "Failed to load TLS identity from {}; run `remotestash cert` first",
                    self.config.tls.certificate.display()
                )
            })
    }

    async fn serve(&mut self, name: Option<String>, port: Option<u16>) -> Result<()> {
        let identity = self.load_identity()?;

        let mut options = ServerOptions::from_config(&self.config);
        if let Some(name) = name {
            options.name = name;
        }
        if let Some(port) = port.filter(|port| *port != 0) {
            options.port = Some(port);
        }

        let stash = Arc::new(MemoryStash::new());
        let server = ExchangeServer::new(options, identity, stash);
        server.start().await;
        if server.state().await != ServerState::Listening {
            bail!("Server failed to start");
        }

        let discovery = DiscoveryService::new(Some(server.id()), self.config.resolve_timeout());
        if let Err(e) = discovery.start_browsing().await {
            warn!("Browsing unavailable: {}", e);
        }
        let mut events = discovery.subscribe();

        println!(
            "Serving '{}' on port {} (Ctrl-C to stop)",
            server.name(),
            server.port().await.unwrap_or_default()
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(DiscoveryEvent::PeerAdded(peer)) => println!("Found {}", peer.display_name),
                    Err(RecvError::Lagged(skipped)) => debug!("Skipped {} discovery events", skipped),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("Shutting down");
        server.shutdown().await;
        discovery.stop().await?;
        Ok(())
    }

    /// Browse for a peer and open a connection to it
    async fn connect(&self) -> Result<PeerConnection> {
        let discovery = DiscoveryService::new(None, self.config.resolve_timeout());
        discovery.start_browsing().await?;

        let peer = discovery
            .wait_for_peer(self.peer.as_deref(), self.config.browse_timeout())
            .await;
        if let Err(e) = discovery.stop().await {
            debug!("Stopping discovery: {}", e);
        }

        let peer = peer.ok_or_else(|| match &self.peer {
            Some(name) => anyhow!("No remote stash matching '{}' found", name),
            None => anyhow!("No remote stash found"),
        })?;
        info!("Using {}", peer);

        let pinned = self.config.pinned_certificate();
        let context = TrustContext::load(pinned).with_context(|| {
            format!("Failed to load pinned certificate {}", pinned.display())
        })?;
        let verifier = Arc::new(TrustVerifier::new(context));

        Ok(PeerConnection::new(
            peer,
            verifier,
            self.config.request_timeout(),
        )?)
    }

    async fn push(&self, file: Option<PathBuf>, content_type: Option<String>) -> Result<()> {
        let item = read_item(file.as_deref(), content_type.as_deref())?;
        let connection = self.connect().await?;

        match connection.push(&item).await {
            Some(_) => {
                println!("Pushed {} to {}", item, connection.record().display_name);
                Ok(())
            }
            None => bail!("Push to {} failed", connection.record().display_name),
        }
    }

    async fn pull(&self, output: Option<PathBuf>, last: bool) -> Result<()> {
        let connection = self.connect().await?;
        let item = if last {
            connection.last_item().await
        } else {
            connection.pull().await
        };

        let item =
            item.ok_or_else(|| anyhow!("Nothing received from {}", connection.record().display_name))?;
        debug!("Received {}", item);
        write_item(&item, output.as_deref())
    }

    async fn show_status(&self) -> Result<()> {
        let connection = self.connect().await?;
        let status = connection
            .status()
            .await
            .ok_or_else(|| anyhow!("No status from {}", connection.record().display_name))?;

        println!("{} Status:", connection.record().display_name);
        println!("  Items: {}", status.items_count);
        if let Some(last) = status.last {
            println!("  Type: {}", last.content_type);
            println!("  Size: {}", last.size);
            if let Some(filename) = last.filename {
                println!("  Filename: {}", filename);
            }
        }
        Ok(())
    }

    async fn show_peers(&self) -> Result<()> {
        let discovery = DiscoveryService::new(None, self.config.resolve_timeout());
        discovery.start_browsing().await?;
        tokio::time::sleep(self.config.browse_timeout()).await;
        let peers = discovery.registry().peers().await;
        discovery.stop().await?;

        if peers.is_empty() {
            println!("No remote stashes found");
            return Ok(());
        }

        println!("Remote Stashes ({}):", peers.len());
        for peer in peers {
            println!("  {}", describe_peer(&peer));
        }
        Ok(())
    }

    fn generate_cert(&self, force: bool) -> Result<()> {
        let generated =
            TlsIdentity::generate_to(&self.config.tls.certificate, &self.config.tls.private_key, force)?;

        println!("Certificate: {}", self.config.tls.certificate.display());
        println!("Private key: {}", self.config.tls.private_key.display());
        println!("Fingerprint: {}", generated.identity.fingerprint());
        println!("Copy both files to every device that should exchange items.");
        Ok(())
    }

    fn handle_config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                println!("Current Configuration:");
                println!("{}", toml::to_string_pretty(self.config.as_ref())?);
            }
            ConfigAction::Init { force } => {
                let path = self
                    .config_path
                    .clone()
                    .or_else(Config::default_path)
                    .ok_or_else(|| anyhow!("Could not find config directory"))?;
                Config::write_example(&path, force)?;
                println!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                // Loading already validated it
                println!("Configuration is valid");
            }
        }
        Ok(())
    }
}

/// Item from a file, or from stdin when no file is given
fn read_item(file: Option<&Path>, content_type: Option<&str>) -> Result<Item> {
    match (file, content_type) {
        (Some(path), None) => Item::from_path(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (Some(path), Some(content_type)) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            Ok(Item::from_bytes(bytes, content_type, None, filename))
        }
        (None, content_type) => {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            Ok(Item::from_bytes(
                bytes,
                content_type.unwrap_or(STDIN_CONTENT_TYPE),
                None,
                None,
            ))
        }
    }
}

/// Write an item's bytes to a file, or to stdout
fn write_item(item: &Item, output: Option<&Path>) -> Result<()> {
    let body = item.http_body();
    match output {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved {} to {}", item, path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&body)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn describe_peer(peer: &PeerRecord) -> String {
    let addresses: Vec<String> = peer.addresses.iter().map(|a| a.to_string()).collect();
    format!(
        "{} [{}]{}",
        peer.display_name,
        addresses.join(", "),
        if peer.temporary { " (temporary)" } else { "" }
    )
}
