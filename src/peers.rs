use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Host and port a node listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{}'", s))?;
        if host.is_empty() {
            return Err(format!("missing host in '{}'", s));
        }
        let port = port
            .parse()
            .map_err(|_| format!("invalid port in '{}'", s))?;
        Ok(Self::new(host, port))
    }
}

/// Delivery history for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHealth {
    pub added_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

impl PeerHealth {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            added_at: now,
            consecutive_failures: 0,
            last_failure: None,
        }
    }
}

/// Address book of the other nodes this node gossips to.
///
/// Entries are never removed. A peer that keeps failing is skipped as a gossip
/// target until its cooldown has passed, then tried again.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    own: PeerAddr,
    peers: HashMap<PeerAddr, PeerHealth>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl PeerDirectory {
    pub fn new(own: PeerAddr, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            own,
            peers: HashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    /// Record an address. Returns `true` if it was new; the node's own address is ignored.
    pub fn add(&mut self, addr: PeerAddr) -> bool {
        if addr == self.own || self.peers.contains_key(&addr) {
            return false;
        }
        self.peers.insert(addr, PeerHealth::new(Utc::now()));
        true
    }

    /// Record several addresses; returns how many were new.
    pub fn extend(&mut self, addrs: impl IntoIterator<Item = PeerAddr>) -> usize {
        addrs.into_iter().filter(|a| self.add(a.clone())).count()
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.peers.contains_key(addr)
    }

    /// Every known address, sorted.
    pub fn addresses(&self) -> Vec<PeerAddr> {
        let mut addrs: Vec<_> = self.peers.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn health(&self, addr: &PeerAddr) -> Option<&PeerHealth> {
        self.peers.get(addr)
    }

    pub fn record_success(&mut self, addr: &PeerAddr) {
        if let Some(h) = self.peers.get_mut(addr) {
            h.consecutive_failures = 0;
            h.last_failure = None;
        }
    }

    pub fn record_failure(&mut self, addr: &PeerAddr, now: DateTime<Utc>) {
        if let Some(h) = self.peers.get_mut(addr) {
            h.consecutive_failures += 1;
            h.last_failure = Some(now);
        }
    }

    /// Peers to announce to, minus `exclude` and any peer still cooling down.
    pub fn gossip_targets(&self, exclude: Option<&PeerAddr>, now: DateTime<Utc>) -> Vec<PeerAddr> {
        let mut targets: Vec<_> = self
            .peers
            .iter()
            .filter(|(addr, _)| Some(*addr) != exclude)
            .filter(|(_, h)| !self.is_suspended(h, now))
            .map(|(addr, _)| addr.clone())
            .collect();
        targets.sort();
        targets
    }

    fn is_suspended(&self, health: &PeerHealth, now: DateTime<Utc>) -> bool {
        match health.last_failure {
            Some(at) if health.consecutive_failures >= self.failure_threshold => {
                now.signed_duration_since(at) < self.cooldown
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
