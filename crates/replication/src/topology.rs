//! Cluster topology: the JSON-configured replication shape of a database
//! (§4.10, §6).
//!
//! A database is standalone, part of a Local-Write (LW) HA pair with a
//! witness, or part of a Global-Write (GW) pair replicating across regions
//! (whose sides may themselves be LW pairs). Leaves may be read-only
//! replicas.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default port assignments (§6).
pub mod default_ports {
    /// Replication endpoint default port.
    pub const REPLICATION: u16 = 7570;
    /// Elector endpoint default port.
    pub const ELECTOR: u16 = 7571;
    /// Administration endpoint default port.
    pub const ADMINISTRATION: u16 = 7569;
    /// Execution endpoint default port.
    pub const EXECUTION: u16 = 7568;
}

/// Default election timeout (§6).
pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(2);
/// Default remote file timeout for a shared-folder witness (§6).
pub const DEFAULT_REMOTE_FILE_TIMEOUT: Duration = Duration::from_secs(2);

/// A node's declared network endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEndpoints {
    /// Node name, unique within the cluster document. Must match
    /// `[A-Za-z0-9._ :\-]+` (§6).
    pub name: String,
    /// Host or address shared by every endpoint below.
    pub host: String,
    /// Replication endpoint port. Defaults to 7570.
    #[serde(default = "default_ports_replication")]
    pub replication_port: u16,
    /// Elector endpoint port. Defaults to 7571.
    #[serde(default = "default_ports_elector")]
    pub elector_port: u16,
    /// Administration endpoint port. Defaults to 7569.
    #[serde(default = "default_ports_administration")]
    pub administration_port: u16,
    /// Execution endpoint port. Defaults to 7568.
    #[serde(default = "default_ports_execution")]
    pub execution_port: u16,
}

fn default_ports_replication() -> u16 { default_ports::REPLICATION }
fn default_ports_elector() -> u16 { default_ports::ELECTOR }
fn default_ports_administration() -> u16 { default_ports::ADMINISTRATION }
fn default_ports_execution() -> u16 { default_ports::EXECUTION }

impl NodeEndpoints {
    /// Validate the node name against the character class required by §6.
    pub fn has_valid_name(&self) -> bool {
        !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ' ' | ':' | '-'))
    }
}

/// How a witness is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WitnessEndpoint {
    /// A path to a folder shared by both nodes of an LW pair.
    SharedFolder {
        /// Filesystem path to the shared folder.
        path: String,
    },
    /// A standalone witness service address.
    Service {
        /// `host:port` of the witness service.
        address: String,
    },
}

/// Witness configuration for one LW pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessConfig {
    /// How to reach the witness.
    pub endpoint: WitnessEndpoint,
    /// Election timeout, in milliseconds on the wire.
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,
    /// Remote file poll timeout for shared-folder witnesses, in
    /// milliseconds on the wire.
    #[serde(default = "default_remote_file_timeout_ms")]
    pub remote_file_timeout_ms: u64,
}

fn default_election_timeout_ms() -> u64 {
    DEFAULT_ELECTION_TIMEOUT.as_millis() as u64
}

fn default_remote_file_timeout_ms() -> u64 {
    DEFAULT_REMOTE_FILE_TIMEOUT.as_millis() as u64
}

impl WitnessConfig {
    /// The configured election timeout as a [`Duration`].
    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }
}

/// A leaf role available at the bottom of a topology tree (§4.10: "Leaves
/// can be read-only replicas (Local-Read, Global-Read)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    /// Accepts both reads and writes, pending alignment.
    ReadWrite,
    /// Accepts reads only, never promoted by the local elector.
    ReadOnly,
}

/// The replication shape of one database, as described by the cluster
/// configuration document (§4.10, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Topology {
    /// No replication: a single node owns the database outright.
    Standalone {
        /// The sole node.
        node: NodeEndpoints,
    },
    /// A two-node HA pair within one region, arbitrated by a witness.
    LocalWrite {
        /// The current primary candidate (authoritative writer until a
        /// failover promotes the standby).
        primary: NodeEndpoints,
        /// The standby peer.
        standby: NodeEndpoints,
        /// Shared witness used to arbitrate leadership.
        witness: WitnessConfig,
        /// Additional read-only leaves attached to this pair.
        #[serde(default)]
        read_replicas: Vec<NodeEndpoints>,
    },
    /// A cross-region pair; each `side` may itself be a full LW topology.
    GlobalWrite {
        /// The topology on each side of the cross-region link.
        sides: Vec<Topology>,
    },
}

impl Topology {
    /// Every node endpoint reachable from this topology, used to validate
    /// name uniqueness across the whole document (§6).
    pub fn all_nodes(&self) -> Vec<&NodeEndpoints> {
        match self {
            Topology::Standalone { node } => vec![node],
            Topology::LocalWrite { primary, standby, read_replicas, .. } => {
                let mut v = vec![primary, standby];
                v.extend(read_replicas.iter());
                v
            }
            Topology::GlobalWrite { sides } => sides.iter().flat_map(Topology::all_nodes).collect(),
        }
    }

    /// Validate that every node name is well-formed and unique within this
    /// document (§6).
    pub fn validate_node_names(&self) -> Result<(), String> {
        let nodes = self.all_nodes();
        for n in &nodes {
            if !n.has_valid_name() {
                return Err(format!("invalid node name: {:?}", n.name));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for n in &nodes {
            if !seen.insert(&n.name) {
                return Err(format!("duplicate node name: {:?}", n.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeEndpoints {
        NodeEndpoints {
            name: name.into(),
            host: "127.0.0.1".into(),
            replication_port: default_ports::REPLICATION,
            elector_port: default_ports::ELECTOR,
            administration_port: default_ports::ADMINISTRATION,
            execution_port: default_ports::EXECUTION,
        }
    }

    #[test]
    fn standalone_has_one_node() {
        let t = Topology::Standalone { node: node("alpha") };
        assert_eq!(t.all_nodes().len(), 1);
    }

    #[test]
    fn lw_pair_exposes_primary_and_standby() {
        let t = Topology::LocalWrite {
            primary: node("a"),
            standby: node("b"),
            witness: WitnessConfig {
                endpoint: WitnessEndpoint::SharedFolder { path: "/witness".into() },
                election_timeout_ms: 2000,
                remote_file_timeout_ms: 2000,
            },
            read_replicas: vec![],
        };
        assert_eq!(t.all_nodes().len(), 2);
    }

    #[test]
    fn duplicate_names_fail_validation() {
        let t = Topology::GlobalWrite {
            sides: vec![
                Topology::Standalone { node: node("a") },
                Topology::Standalone { node: node("a") },
            ],
        };
        assert!(t.validate_node_names().is_err());
    }

    #[test]
    fn invalid_characters_fail_validation() {
        let t = Topology::Standalone { node: node("bad/name") };
        assert!(t.validate_node_names().is_err());
    }

    #[test]
    fn witness_election_timeout_defaults_to_two_seconds() {
        let w = WitnessConfig {
            endpoint: WitnessEndpoint::Service { address: "witness:9999".into() },
            election_timeout_ms: default_election_timeout_ms(),
            remote_file_timeout_ms: default_remote_file_timeout_ms(),
        };
        assert_eq!(w.election_timeout(), Duration::from_secs(2));
    }
}
