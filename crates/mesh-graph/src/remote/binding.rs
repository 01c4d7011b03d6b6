//! Resources bound to a remote object
//!
//! A bound object holds up to three resources: its handle (proxy), the
//! metadata subscription on it, and the event listener. They must go away
//! listener first, then metadata, then the handle, exactly once, whichever
//! way the binding is dropped.

use crate::types::{ObjectId, ObjectKind};

/// A resource that must be released against the remote
pub trait BoundResource: Send {
    fn release(self: Box<Self>);
}

impl<F> BoundResource for F
where
    F: FnOnce() + Send,
{
    fn release(self: Box<Self>) {
        (*self)()
    }
}

/// Owned bundle of the resources bound to one remote object
pub struct ObjectBinding {
    id: ObjectId,
    kind: ObjectKind,
    listener: Option<Box<dyn BoundResource>>,
    metadata: Option<Box<dyn BoundResource>>,
    handle: Option<Box<dyn BoundResource>>,
}

impl ObjectBinding {
    /// Empty binding (objects the transport does not need proxies for)
    pub fn new(id: ObjectId, kind: ObjectKind) -> Self {
        Self {
            id,
            kind,
            listener: None,
            metadata: None,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl BoundResource + 'static) -> Self {
        self.handle = Some(Box::new(handle));
        self
    }

    pub fn with_metadata(mut self, metadata: impl BoundResource + 'static) -> Self {
        self.metadata = Some(Box::new(metadata));
        self
    }

    pub fn with_listener(mut self, listener: impl BoundResource + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Whether every resource has been released
    pub fn is_released(&self) -> bool {
        self.listener.is_none() && self.metadata.is_none() && self.handle.is_none()
    }

    /// Release listener, metadata and handle, in that order
    ///
    /// Calling this again (or dropping afterwards) is a no-op.
    pub fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.release();
        }
        if let Some(metadata) = self.metadata.take() {
            metadata.release();
        }
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }
}

impl Drop for ObjectBinding {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ObjectBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBinding")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, entry: &'static str) -> impl FnOnce() + Send {
        let log = Arc::clone(log);
        move || log.lock().unwrap().push(entry)
    }

    #[test]
    fn test_release_order_on_drop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            // Attach in creation order: handle, metadata, listener
            let _binding = ObjectBinding::new(7, ObjectKind::Node)
                .with_handle(recorder(&log, "handle"))
                .with_metadata(recorder(&log, "metadata"))
                .with_listener(recorder(&log, "listener"));
        }
        assert_eq!(*log.lock().unwrap(), vec!["listener", "metadata", "handle"]);
    }

    #[test]
    fn test_release_happens_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut binding = ObjectBinding::new(7, ObjectKind::Port)
            .with_handle(recorder(&log, "handle"))
            .with_listener(recorder(&log, "listener"));

        binding.release();
        assert!(binding.is_released());
        binding.release();
        drop(binding);

        assert_eq!(*log.lock().unwrap(), vec!["listener", "handle"]);
    }
}
