//! Error types for the mirror, its transports and the rule file

use crate::types::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Faults reported by a remote transport
///
/// Any of these is fatal to the current session: the mirror tears the
/// session down and reopens it instead of retrying partially.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Remote service could not be reached
    #[error("Remote service unreachable: {0}")]
    Unreachable(String),

    /// Operation attempted without an open session
    #[error("Not connected to the remote service")]
    NotConnected,

    /// Established connection was lost or rejected
    #[error("Remote connection lost: {0}")]
    ConnectionLost(String),

    /// Remote refused a command
    #[error("Remote rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    /// Binding a proxy to a remote object failed
    #[error("Failed to bind remote object {id}: {reason}")]
    BindFailed { id: ObjectId, reason: String },
}

impl TransportError {
    /// Whether the session is unusable after this error
    ///
    /// A refused command or a bind racing a removal leaves the session intact.
    pub fn is_session_fault(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::BindFailed { .. })
    }
}

/// Errors surfaced by `GraphMirror` operations
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The worker thread could not be spawned
    #[error("Failed to spawn mirror worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The mirror has no running worker
    #[error("Graph mirror is not open")]
    NotOpen,

    /// A blocking call was made from the worker's own thread
    #[error("connect() must not be called from the mirror worker thread")]
    WorkerThread,

    /// Port key does not resolve to a live port
    #[error("Unknown port {0}")]
    UnknownPort(ObjectId),

    /// Both ports point the same way
    #[error("Ports {output} and {input} cannot be linked (need one output and one input)")]
    IncompatiblePorts { output: ObjectId, input: ObjectId },

    /// The worker did not acknowledge in time
    #[error("Timed out waiting for the remote service")]
    Timeout,

    /// The worker went away while a command was in flight
    #[error("Mirror worker disconnected")]
    WorkerGone,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for mirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors loading or saving a patchbay rule file
#[derive(Error, Debug)]
pub enum PatchbayFileError {
    #[error("Failed to read rule file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write rule file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Rule file is not a valid document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Rule file has no format version")]
    MissingVersion,

    #[error("Rule file 'rules' entry is not a list")]
    RulesNotSequence,

    #[error("Rule file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}
