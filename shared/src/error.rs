use thiserror::Error;

/// Errors raised by provisioning helpers before or instead of an AWS call.
///
/// SDK and process failures are passed through boxed as `lambda_runtime::Error`;
/// this type covers the validation and protocol failures we produce ourselves.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0} must be specified")]
    MissingProperty(&'static str),

    #[error("the username {0:?} has prohibited characters")]
    InvalidUsername(String),

    #[error("the secret {0} is empty")]
    EmptySecret(String),

    #[error("the secret {0} is invalid JSON: {1}")]
    MalformedSecret(String, serde_json::Error),

    #[error("{0} not found in the package zip")]
    ManifestMissing(String),

    #[error("the S3 object s3://{bucket}/{key} must not be empty")]
    EmptyPackage { bucket: String, key: String },

    #[error("{command} exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("the greedy path {0} can not be used in an S3 integration")]
    GreedyPath(String),

    #[error("the path parameter {param:?} does not exist in the path {path:?}")]
    UnknownPathParameter { param: String, path: String },

    #[error("a credentials role is required for S3 integrations")]
    MissingRole,
}
