use gatehouse_rpc::RpcError;
use gatehouse_types::CollaboratorError;
use gatehouse_utils::LoggingError;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    /// A start-up step failed; everything started before it was torn down.
    #[error("start-up failed at {step}: {source}")]
    Startup {
        step: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("RPC server error: {0}")]
    Rpc(#[from] RpcError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub(crate) fn startup(
        step: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        NodeError::Startup {
            step,
            source: source.into(),
        }
    }

    /// The start-up step that failed, if this is a start-up failure.
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            NodeError::Startup { step, .. } => Some(step),
            _ => None,
        }
    }
}
