//! Error types for the TenantEnvironment controller

use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix where they wrap another
/// error type (e.g., `KubeError`, `StoreError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The template authority answered but reported itself unhealthy
    #[error("the host cluster is not ready")]
    NotReady,

    /// The template authority could not be contacted at all
    #[error("unable to connect to the host cluster: {0}")]
    Unreachable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("unable to render template '{template}': {reason}")]
    RenderError { template: String, reason: String },

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("deletion has not completed in over {}", humanize(.0))]
    DeletionStalled(Duration),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with a description of the operation that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check whether this error (or the error it wraps) means "object does not exist"
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 404,
            Error::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check whether this error is a create conflict on an existing object
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => {
                api_err.code == 409 && api_err.reason == "AlreadyExists"
            }
            Error::Context { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 404 || code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            // The authority or store may recover, and a template may be published later
            Error::NotReady | Error::Unreachable(_) | Error::NotFound(_) => true,
            Error::StoreError(_) | Error::AlreadyExists(_) | Error::DeletionStalled(_) => true,
            // A broken template body or object stays broken until someone edits it
            Error::RenderError { .. } => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
            Error::Context { source, .. } => source.is_retryable(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach operation context to the error of a `Result`
pub trait ResultExt<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

fn humanize(duration: &Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}
