//! Input validation functions
//!
//! Validators for names announced by peers and for node configurations
//! before their listeners are started.

mod file_name;
mod node_config;

pub use file_name::{FileNameError, MAX_FILE_NAME_LENGTH, validate_file_name};
pub use node_config::{NodeConfigError, validate_node_config, validate_node_configs};
