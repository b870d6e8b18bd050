//! Cluster configuration document parsing (§6: "a JSON document describing
//! a single root replication element").

use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use velox_core::error::{VeloxError, VeloxResult};

/// The root of a cluster configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// The single root replication element (Standalone, LW, or GW).
    pub topology: Topology,
}

impl ClusterConfig {
    /// Parse and validate a cluster configuration document.
    pub fn from_json(text: &str) -> VeloxResult<Self> {
        let config: ClusterConfig = serde_json::from_str(text)?;
        config.topology.validate_node_names().map_err(VeloxError::schema_incompatible)?;
        Ok(config)
    }

    /// Serialize back to the JSON wire form.
    pub fn to_json(&self) -> VeloxResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{NodeEndpoints, WitnessConfig, WitnessEndpoint};

    fn node(name: &str) -> NodeEndpoints {
        NodeEndpoints {
            name: name.into(),
            host: "127.0.0.1".into(),
            replication_port: 7570,
            elector_port: 7571,
            administration_port: 7569,
            execution_port: 7568,
        }
    }

    #[test]
    fn roundtrips_a_standalone_topology_through_json() {
        let config = ClusterConfig { topology: Topology::Standalone { node: node("alpha") } };
        let json = config.to_json().unwrap();
        let restored = ClusterConfig::from_json(&json).unwrap();
        assert_eq!(restored.topology, config.topology);
    }

    #[test]
    fn rejects_duplicate_node_names_on_load() {
        let config = ClusterConfig {
            topology: Topology::LocalWrite {
                primary: node("same"),
                standby: node("same"),
                witness: WitnessConfig {
                    endpoint: WitnessEndpoint::SharedFolder { path: "/w".into() },
                    election_timeout_ms: 2000,
                    remote_file_timeout_ms: 2000,
                },
                read_replicas: vec![],
            },
        };
        let json = config.to_json().unwrap();
        assert!(ClusterConfig::from_json(&json).is_err());
    }
}
