//! The hosts file: one `id,hostname,ip` line per process.
//!
//! ```text
//! # id,hostname,ip
//! 0,node-a,10.0.0.1
//! 1,node-b,10.0.0.2
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use tracing::debug;

use crate::broadcast::{Peers, ProcessId};
use crate::common::config::ProtocolConfig;
use crate::common::error::{ConfigError, MembershipError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    pub id: ProcessId,
    pub hostname: String,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    processors: BTreeMap<ProcessId, Processor>,
}

impl Membership {
    pub fn load(path: &Path) -> Result<Self, MembershipError> {
        let contents = std::fs::read_to_string(path)?;
        let membership = Self::parse(&contents)?;
        debug!(path = %path.display(), processes = membership.len(), "Loaded hosts file");
        Ok(membership)
    }

    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse(contents: &str) -> Result<Self, MembershipError> {
        let mut processors = BTreeMap::new();

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            let &[id, hostname, ip] = parts.as_slice() else {
                return Err(MembershipError::MalformedLine(line.to_string()));
            };

            let id = id.parse::<ProcessId>().map_err(|e| MembershipError::BadId {
                value: id.to_string(),
                reason: e.to_string(),
            })?;
            let ip: IpAddr = ip
                .parse()
                .map_err(|_| MembershipError::BadAddress(ip.to_string()))?;

            let processor = Processor {
                id,
                hostname: hostname.to_string(),
                ip,
            };
            if processors.insert(id, processor).is_some() {
                return Err(MembershipError::DuplicateId(id));
            }
        }

        if processors.is_empty() {
            return Err(MembershipError::Empty);
        }
        Ok(Membership { processors })
    }

    pub fn get(&self, id: ProcessId) -> Option<&Processor> {
        self.processors.get(&id)
    }

    /// Checks that `id` is listed, for a process about to start as `id`.
    pub fn require(&self, id: ProcessId) -> Result<&Processor, MembershipError> {
        self.get(id).ok_or(MembershipError::UnknownSelf(id))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn peers(&self) -> Peers {
        Peers::new(self.processors.keys().copied().collect())
    }

    /// UDP address of every process; process `id` listens on `base_port + id`.
    pub fn addresses(&self, config: &ProtocolConfig) -> Result<HashMap<ProcessId, SocketAddr>, ConfigError> {
        self.processors
            .values()
            .map(|p| Ok((p.id, SocketAddr::new(p.ip, config.udp_port(p.id)?))))
            .collect()
    }
}
