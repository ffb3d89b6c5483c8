//! Error types for the flow engine

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while wiring or executing a flow
#[derive(Debug, Error)]
pub enum FlowError {
    /// A node id could not be resolved from the repository
    #[error("Node '{0}' not found in repository")]
    NodeNotFound(String),

    /// A connection refers to an instance that does not exist
    #[error("Instance '{ins_id}' not found in composite '{node_id}'")]
    InstanceNotFound { node_id: String, ins_id: String },

    /// A connection refers to a pin that the resolved node does not declare
    #[error("Pin '{pin_id}' not found on instance '{ins_id}' (node '{node_id}')")]
    PinNotFound {
        ins_id: String,
        node_id: String,
        pin_id: String,
    },

    /// The synthetic trigger pin was given a static configuration
    #[error("Trigger input of instance '{0}' cannot be configured as static")]
    StaticTrigger(String),

    /// A composite contains itself, directly or through other composites
    #[error("Composite '{0}' contains itself")]
    RecursiveComposite(String),

    /// A connection path string could not be parsed
    #[error("Malformed connection '{0}': expected 'insId.pinId -> insId.pinId'")]
    MalformedConnection(String),

    /// An `$ENV.` reference did not resolve in the environment map
    #[error("Missing environment value for '{0}'")]
    MissingEnvValue(String),

    /// A node reported a failure while running
    #[error("Node execution failed: {0}")]
    NodeFailed(String),

    /// A node's run function panicked
    #[error("Node panicked: {0}")]
    Panicked(String),

    /// An error tagged with the hierarchical path of the instance that raised it
    #[error("Error in instance '{path}' (node '{node_id}'): {source}")]
    Instance {
        path: String,
        node_id: String,
        #[source]
        source: Box<FlowError>,
    },

    /// Composite failed construction-time validation
    #[error("Invalid composite: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a node failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::NodeFailed(msg.into())
    }

    /// Tag this error with the instance path it surfaced from.
    ///
    /// Errors that already carry a path keep it, so the innermost instance
    /// stays visible after bubbling through several composites.
    pub fn in_instance(self, path: &str, node_id: &str) -> Self {
        match self {
            tagged @ Self::Instance { .. } => tagged,
            other => Self::Instance {
                path: path.to_string(),
                node_id: node_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The hierarchical instance path this error is tagged with, if any
    pub fn instance_path(&self) -> Option<&str> {
        match self {
            Self::Instance { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The untagged error underneath any instance tagging
    pub fn root_cause(&self) -> &FlowError {
        match self {
            Self::Instance { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Convert a panic payload into an error
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }
}
