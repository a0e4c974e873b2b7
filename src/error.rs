use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no ledger provider attached")]
    NotConnected,

    #[error("contract {0} has not been loaded")]
    ContractNotLoaded(String),

    #[error("contract {name} is not deployed on network {network}")]
    NotDeployed { name: String, network: String },

    #[error("contract {contract} has no method {method}")]
    UnknownMethod { contract: String, method: String },

    #[error("{contract}.{method} returned an unexpected value")]
    UnexpectedReturn { contract: String, method: String },

    #[error("failed to read artifact {path}: {message}")]
    ArtifactRead { path: String, message: String },

    #[error("failed to parse artifact {path}: {source}")]
    ArtifactParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
