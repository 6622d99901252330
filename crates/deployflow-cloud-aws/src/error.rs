//! AWS CLI wrapper errors

use deployflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("aws CLI not found in PATH")]
    AwsCliNotFound,

    #[error("aws command failed: {0}")]
    CommandFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Controllers classify platform error messages out of `CloudError::Api`, so
/// the stderr text must survive the conversion verbatim.
impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::CommandFailed(stderr) => CloudError::Api(stderr),
            AwsError::AwsCliNotFound => CloudError::Api("aws CLI not found in PATH".to_string()),
            AwsError::Json(err) => CloudError::Json(err),
            AwsError::Io(err) => CloudError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
