//! Common types for service discovery

use crate::discovery::address::PeerAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// DNS-SD service type, without the domain
pub const SERVICE_TYPE: &str = "_remotestash._tcp";

/// Fully qualified service type used with mDNS
pub const SERVICE_TYPE_DOMAIN: &str = "_remotestash._tcp.local.";

/// TXT key carrying the server instance uuid
pub const TXT_UUID: &str = "uuid";

/// TXT key flagging a temporary (in-memory) stash
pub const TXT_TEMPORARY: &str = "temporary";

/// A discovered remote stash.
///
/// Created as an empty shell when the browser first sees a record, then
/// filled in place once resolution completes. Two records are the same peer
/// when their ids match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Server instance id, taken from the `uuid` TXT property
    pub id: Option<Uuid>,
    /// Advertised instance name
    pub display_name: String,
    /// mDNS host name, once resolved
    pub host_name: Option<String>,
    /// Resolved addresses in the order the resolver returned them
    pub addresses: Vec<PeerAddress>,
    /// Raw TXT properties
    pub properties: HashMap<String, String>,
    /// Whether the peer advertises a temporary stash
    pub temporary: bool,
}

impl PeerRecord {
    /// Unresolved shell for a freshly discovered record
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
            host_name: None,
            addresses: Vec::new(),
            properties: HashMap::new(),
            temporary: true,
        }
    }

    /// A record is usable once it has an id and at least one address
    pub fn ready(&self) -> bool {
        self.id.is_some() && !self.addresses.is_empty()
    }

    /// Same peer as `other`; unresolved records never match
    pub fn same_as(&self, other: &PeerRecord) -> bool {
        self.id.is_some() && self.id == other.id
    }

    /// Append one resolved address per socket address
    pub fn add_addresses<I>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        self.addresses
            .extend(addresses.into_iter().map(|sock| PeerAddress::resolve(&sock, None)));
    }

    /// Append addresses reported as bare ips for a service port
    pub fn add_ips<I>(&mut self, ips: I, port: u16)
    where
        I: IntoIterator<Item = IpAddr>,
    {
        self.add_addresses(ips.into_iter().map(|ip| SocketAddr::new(ip, port)));
    }

    /// Replace the properties map and pick out the keys we understand
    pub fn apply_txt(&mut self, txt: &[(String, String)]) {
        self.properties.clear();

        for (key, value) in txt {
            self.properties.insert(key.clone(), value.clone());

            match key.as_str() {
                TXT_UUID => self.id = Uuid::parse_str(value.trim()).ok(),
                TXT_TEMPORARY => self.temporary = value.starts_with('y'),
                _ => {}
            }
        }
    }
}

impl PartialEq for PeerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} ({}, {} addresses)", self.display_name, id, self.addresses.len()),
            None => write!(f, "{} (unresolved)", self.display_name),
        }
    }
}

/// Discovery events delivered to the application layer
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A ready, non-duplicate peer was added to the registry
    PeerAdded(PeerRecord),
}

/// What happened to a record once its resolution completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored in the registry
    Added,
    /// Another record with the same id is already registered
    Duplicate,
    /// The should-add predicate declined it
    Rejected,
    /// Resolution did not produce an id and an address
    NotReady,
}
