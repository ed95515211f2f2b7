//! Node configuration validation

use std::collections::HashMap;

use crate::types::NodeConfig;

/// Validation error for a node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeConfigError {
    /// Port 0 cannot be served
    InvalidPort { name: String },
    /// Name is empty or whitespace
    EmptyName { port: u16 },
    /// Address is empty or whitespace
    EmptyAddress { name: String },
    /// Target directory is empty or whitespace
    EmptyTargetDirectory { name: String },
    /// Two enabled configurations share a port
    DuplicatePort { port: u16, first: String, second: String },
}

impl std::fmt::Display for NodeConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPort { name } => write!(f, "node '{name}' has an invalid port"),
            Self::EmptyName { port } => write!(f, "node on port {port} has no name"),
            Self::EmptyAddress { name } => write!(f, "node '{name}' has no address"),
            Self::EmptyTargetDirectory { name } => {
                write!(f, "node '{name}' has no target directory")
            }
            Self::DuplicatePort {
                port,
                first,
                second,
            } => write!(f, "nodes '{first}' and '{second}' both use port {port}"),
        }
    }
}

impl std::error::Error for NodeConfigError {}

/// Validate the fields of one configuration
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_node_config(config: &NodeConfig) -> Result<(), NodeConfigError> {
    if config.name.trim().is_empty() {
        return Err(NodeConfigError::EmptyName { port: config.port });
    }
    if config.port == 0 {
        return Err(NodeConfigError::InvalidPort {
            name: config.name.clone(),
        });
    }
    if config.address.trim().is_empty() {
        return Err(NodeConfigError::EmptyAddress {
            name: config.name.clone(),
        });
    }
    if config.target_directory.trim().is_empty() {
        return Err(NodeConfigError::EmptyTargetDirectory {
            name: config.name.clone(),
        });
    }
    Ok(())
}

/// Validate a full configuration list
///
/// Disabled entries are checked field by field but may share a port with an
/// enabled one, since they never bind.
#[must_use]
pub fn validate_node_configs(configs: &[NodeConfig]) -> Vec<NodeConfigError> {
    let mut errors = Vec::new();
    let mut ports: HashMap<u16, &str> = HashMap::new();

    for config in configs {
        if let Err(e) = validate_node_config(config) {
            errors.push(e);
            continue;
        }
        if !config.enabled {
            continue;
        }
        if let Some(first) = ports.get(&config.port) {
            errors.push(NodeConfigError::DuplicatePort {
                port: config.port,
                first: (*first).to_string(),
                second: config.name.clone(),
            });
        } else {
            ports.insert(config.port, &config.name);
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, port: u16) -> NodeConfig {
        NodeConfig::new(name, "127.0.0.1", port, "/tmp/inbox")
    }

    #[test]
    fn test_valid_list() {
        let configs = vec![config("a", 9000), config("b", 9001)];
        assert!(validate_node_configs(&configs).is_empty());
    }

    #[test]
    fn test_field_errors() {
        assert_eq!(
            validate_node_config(&config("a", 0)),
            Err(NodeConfigError::InvalidPort {
                name: "a".to_string()
            })
        );
        assert_eq!(
            validate_node_config(&config("  ", 9000)),
            Err(NodeConfigError::EmptyName { port: 9000 })
        );

        let mut no_dir = config("a", 9000);
        no_dir.target_directory = String::new();
        assert!(matches!(
            validate_node_config(&no_dir),
            Err(NodeConfigError::EmptyTargetDirectory { .. })
        ));

        let mut no_address = config("a", 9000);
        no_address.address = " ".to_string();
        assert!(matches!(
            validate_node_config(&no_address),
            Err(NodeConfigError::EmptyAddress { .. })
        ));
    }

    #[test]
    fn test_duplicate_ports() {
        let configs = vec![config("a", 9000), config("b", 9000)];
        let errors = validate_node_configs(&configs);
        assert_eq!(
            errors,
            vec![NodeConfigError::DuplicatePort {
                port: 9000,
                first: "a".to_string(),
                second: "b".to_string(),
            }]
        );
    }

    #[test]
    fn test_disabled_duplicate_is_allowed() {
        let mut disabled = config("b", 9000);
        disabled.enabled = false;
        let configs = vec![config("a", 9000), disabled];
        assert!(validate_node_configs(&configs).is_empty());
    }
}
