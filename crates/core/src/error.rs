use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("provider {provider} returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {provider}: {details}")]
    MalformedResponse { provider: String, details: String },

    #[error("provider call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("api key not configured for {0}")]
    MissingApiKey(String),

    #[error("embedding batch {batch_index} failed: {source}")]
    Batch {
        batch_index: usize,
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn malformed(provider: impl Into<String>, details: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.into(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding generation failed for {document_id}: {source}")]
    Embedding {
        document_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("invalid vector: {0}")]
    InvalidVector(String),
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid bundle record {document_id}: {details}")]
    InvalidRecord {
        document_id: String,
        details: String,
    },

    #[error("embedding generation failed while building bundle: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
