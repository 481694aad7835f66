/// Contains the error type returned by harness operations.
use std::time::Duration;

/// The error type for configuring, starting and querying a harness.
///
/// Validation and misuse errors (`InvalidSpec`, `AlreadyStarted`,
/// `NotReady`, `UnknownPort`) are detected locally and never involve the
/// container runtime. `Runtime` preserves the underlying cause reported by
/// the runtime API. `StartupTimeout` is only returned after the partially
/// started container has been torn down.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The [ServiceSpec][crate::ServiceSpec] failed validation.
    #[error("invalid service spec: {0}")]
    InvalidSpec(String),

    /// The harness already owns a running instance.
    #[error("harness already owns a running instance; stop it before starting again")]
    AlreadyStarted,

    /// The readiness probe did not succeed within the configured deadline.
    #[error("service did not become ready within {timeout:?}")]
    StartupTimeout {
        /// The configured startup deadline that elapsed.
        timeout: Duration,
    },

    /// The container runtime rejected a request.
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// The runtime reported no published host port for a declared container
    /// port.
    #[error("no host port was published for container port {0}")]
    NotPublished(u16),

    /// An endpoint was queried before the instance reached `Ready` or after
    /// it was stopped.
    #[error("instance is not ready")]
    NotReady,

    /// An endpoint was queried for a container port the spec never declared.
    #[error("port {0} was not declared in the service spec")]
    UnknownPort(u16),
}
