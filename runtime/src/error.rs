use snafu::Snafu;
use std::path::PathBuf;

/// Failures reported by a [`crate::HostBridge`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HostError {
    #[snafu(display("Failed to spawn hosting process `{command}`"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to capture hosting process stdio"))]
    Stdio,

    #[snafu(display("Failed to write to hosting process"))]
    Write { source: std::io::Error },

    #[snafu(display("Failed to encode request `{method}`"))]
    Encode {
        method: String,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to decode reply to `{method}`"))]
    Decode {
        method: String,
        source: serde_json::Error,
    },

    #[snafu(display("Hosting process went away during `{method}`"))]
    Disconnected { method: String },

    #[snafu(display("`{method}` did not answer within {timeout_ms}ms"))]
    Timeout { method: String, timeout_ms: u128 },

    #[snafu(display("`{method}` failed in the hosting process: {message}"))]
    Remote { method: String, message: String },

    #[snafu(display("Expected {expected} from `{call}`"))]
    UnexpectedValue { expected: &'static str, call: String },

    #[snafu(display("Live instance has been disposed"))]
    HostDisposed,
}

/// Environment failures surfaced to the caller of a session.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("No module descriptor was given"))]
    NoModule,

    #[snafu(display("No hosting runtime is installed"))]
    NoRuntimeSupport,

    #[snafu(display("Runtime version {version} is not supported by any installed host"))]
    UnsupportedRuntime { version: String },

    #[snafu(display("Live instance did not start within {timeout_secs}s"))]
    StartupTimeout {
        timeout_secs: u64,
        source: HostError,
    },

    #[snafu(display("Hosting process failed"))]
    Host { source: HostError },

    #[snafu(display("Session {index} is already initialized"))]
    AlreadyInitialized { index: usize },

    #[snafu(display("Session {index} has not been initialized"))]
    NotInitialized { index: usize },

    #[snafu(display("Session {index} has been disposed"))]
    Disposed { index: usize },

    #[snafu(display("Failed to bind resource server on {addr}: {message}"))]
    ServerBind { addr: String, message: String },

    #[snafu(display("Failed to read {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse module manifest {}", path.display()))]
    Manifest {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<HostError> for Error {
    fn from(source: HostError) -> Self {
        Error::Host { source }
    }
}
