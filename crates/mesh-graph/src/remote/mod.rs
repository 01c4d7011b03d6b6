//! Remote routing service seam
//!
//! The mirror worker talks to the live routing service only through
//! [`RemoteService`]. Two transports exist:
//!
//! - [`SimulatedService`]: an in-process remote graph driven by a
//!   [`SimulatedRemote`] controller (tests, `--simulate` in the daemon)
//! - `JackService` (feature `jack-backend`, Linux): a JACK server, or
//!   PipeWire's JACK compatibility layer
//!
//! Notifications are ordered per object but not across objects: a port can
//! be announced before its node, a link before its ports.

mod binding;
mod props;
mod simulated;

#[cfg(all(feature = "jack-backend", target_os = "linux"))]
mod jack_backend;

pub use binding::{BoundResource, ObjectBinding};
pub use props::{keys, Properties};
pub use simulated::{SimulatedRemote, SimulatedService};

#[cfg(all(feature = "jack-backend", target_os = "linux"))]
pub use jack_backend::JackService;

use crate::error::TransportError;
use crate::types::{ObjectId, ObjectKind};
use std::time::Duration;

/// One notification from the remote event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// An object was created (or re-announced after a reconnect)
    Appeared {
        id: ObjectId,
        kind: ObjectKind,
        props: Properties,
    },
    /// Some properties of an existing object changed
    Changed { id: ObjectId, props: Properties },
    /// The object is gone; its id may be recycled
    Removed { id: ObjectId },
}

impl RemoteEvent {
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Appeared { id, .. } | Self::Changed { id, .. } | Self::Removed { id } => *id,
        }
    }
}

/// Connection to the remote routing service
///
/// Owned by the mirror worker thread. Any `Err` is treated as fatal to the
/// session: the worker releases everything it bound and reopens later.
pub trait RemoteService: Send {
    /// Establish the session and announce every existing object as `Appeared`
    fn open(&mut self) -> Result<(), TransportError>;

    /// Close the session; bindings must already be released
    fn close(&mut self);

    /// Wait up to `timeout` for notifications
    fn poll(&mut self, timeout: Duration) -> Result<Vec<RemoteEvent>, TransportError>;

    /// Bind the resources needed to follow one object
    fn bind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<ObjectBinding, TransportError>;

    /// Ask the remote to link two ports
    fn create_link(&mut self, output: ObjectId, input: ObjectId) -> Result<(), TransportError>;

    /// Ask the remote to remove a link
    fn destroy_link(&mut self, link: ObjectId) -> Result<(), TransportError>;

    /// Wait until the remote has processed every previous request
    ///
    /// Returns the sequence number of the completed round-trip. Notifications
    /// caused by earlier requests are available to `poll` afterwards.
    fn roundtrip(&mut self) -> Result<u64, TransportError>;
}

impl<T: RemoteService + ?Sized> RemoteService for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<RemoteEvent>, TransportError> {
        (**self).poll(timeout)
    }

    fn bind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<ObjectBinding, TransportError> {
        (**self).bind(id, kind)
    }

    fn create_link(&mut self, output: ObjectId, input: ObjectId) -> Result<(), TransportError> {
        (**self).create_link(output, input)
    }

    fn destroy_link(&mut self, link: ObjectId) -> Result<(), TransportError> {
        (**self).destroy_link(link)
    }

    fn roundtrip(&mut self) -> Result<u64, TransportError> {
        (**self).roundtrip()
    }
}
