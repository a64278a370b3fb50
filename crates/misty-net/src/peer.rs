//! Peer directory: this node's view of the overlay, rebuilt from each status snapshot.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::overlay::PeerStatus;

/// Role of a remote node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    #[default]
    Client,
    /// The node whose hostname is the hashed base name of the current identity.
    Server,
}

/// One remote node as last seen in a network-map snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "peer_hostname")]
    pub hostname: String,
    pub peer_type: PeerType,
    /// First IPv4 overlay address. Empty if the peer has none.
    #[serde(rename = "peer_address")]
    pub address: String,
}

impl PeerRecord {
    fn from_status(status: &PeerStatus) -> Self {
        Self {
            hostname: status.hostname.clone(),
            peer_type: PeerType::Client,
            address: first_ipv4(&status.addresses)
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
        }
    }
}

/// First IPv4 address in `addrs`, if any.
pub fn first_ipv4(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs.iter().copied().find(IpAddr::is_ipv4)
}

/// Hostname → record. Never patched in place: every refresh builds a new
/// directory with [`PeerDirectory::from_snapshot`] and swaps it in whole.
///
/// At most one record has type `Server`.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: HashMap<String, PeerRecord>,
    /// Hostname of the cached server record.
    server: Option<String>,
}

impl PeerDirectory {
    /// Build a directory from the peers of one snapshot. A peer whose
    /// hostname equals `server_hostname` is classified as the server.
    pub fn from_snapshot(peers: &[PeerStatus], server_hostname: Option<&str>) -> Self {
        let mut directory = Self::default();
        for status in peers {
            let mut record = PeerRecord::from_status(status);
            if server_hostname == Some(record.hostname.as_str()) {
                record.peer_type = PeerType::Server;
                directory.server = Some(record.hostname.clone());
            }
            directory.peers.insert(record.hostname.clone(), record);
        }
        directory
    }

    pub fn get(&self, hostname: &str) -> Option<&PeerRecord> {
        self.peers.get(hostname)
    }

    /// Snapshot of every record, in no particular order.
    pub fn records(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The server record. Served from the cache when set, otherwise found by
    /// a single scan and cached.
    pub fn server(&mut self) -> Option<PeerRecord> {
        if let Some(record) = self.server.as_ref().and_then(|h| self.peers.get(h)) {
            return Some(record.clone());
        }
        let found = self
            .peers
            .values()
            .find(|p| p.peer_type == PeerType::Server)
            .cloned();
        self.server = found.as_ref().map(|p| p.hostname.clone());
        found
    }
}
