//! In-process simulated remote
//!
//! [`SimulatedService`] is handed to the mirror like any other transport;
//! the paired [`SimulatedRemote`] controller edits the remote graph from the
//! outside (another client patching, a device being unplugged, the server
//! going away) and inspects what the mirror did to it.

use super::{keys, ObjectBinding, Properties, RemoteEvent, RemoteService};
use crate::error::TransportError;
use crate::types::{Directionality, ObjectId, ObjectKind};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// First id handed out (low ids are reserved by real servers)
const FIRST_OBJECT_ID: ObjectId = 32;

#[derive(Debug, Clone)]
struct SimObject {
    kind: ObjectKind,
    props: Properties,
}

struct SimState {
    reachable: bool,
    connected: bool,
    /// Failure injected by the controller, reported by the next poll
    failure: Option<String>,
    next_id: ObjectId,
    objects: BTreeMap<ObjectId, SimObject>,
    roundtrips: u64,
    live_bindings: usize,
    release_log: Vec<String>,
}

struct Shared {
    state: Mutex<SimState>,
    events_tx: Sender<RemoteEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an event for the session, if one is open
    fn emit(&self, state: &SimState, event: RemoteEvent) {
        if state.connected {
            let _ = self.events_tx.send(event);
        }
    }

    fn insert(&self, kind: ObjectKind, props: Properties) -> ObjectId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.objects.insert(
            id,
            SimObject {
                kind,
                props: props.clone(),
            },
        );
        self.emit(&state, RemoteEvent::Appeared { id, kind, props });
        id
    }

    /// Remove an object and everything hanging off it
    fn remove(&self, id: ObjectId) -> bool {
        let mut state = self.lock();
        let Some(kind) = state.objects.get(&id).map(|obj| obj.kind) else {
            return false;
        };

        let mut ports = Vec::new();
        match kind {
            ObjectKind::Node => {
                ports.extend(state.objects.iter().filter_map(|(port_id, obj)| {
                    (obj.kind == ObjectKind::Port && obj.props.get_id(keys::NODE_ID) == Some(id))
                        .then_some(*port_id)
                }));
            }
            ObjectKind::Port => ports.push(id),
            ObjectKind::Link => {}
        }

        let links: Vec<ObjectId> = state
            .objects
            .iter()
            .filter(|(_, obj)| obj.kind == ObjectKind::Link)
            .filter(|(_, obj)| {
                let out = obj.props.get_id(keys::LINK_OUTPUT_PORT);
                let inp = obj.props.get_id(keys::LINK_INPUT_PORT);
                ports.iter().any(|p| Some(*p) == out || Some(*p) == inp)
            })
            .map(|(link_id, _)| *link_id)
            .collect();

        let mut doomed = links;
        doomed.extend(ports.iter().copied().filter(|p| *p != id));
        doomed.push(id);
        for gone in doomed {
            state.objects.remove(&gone);
            self.emit(&state, RemoteEvent::Removed { id: gone });
        }
        true
    }

    fn link_between(state: &SimState, output: ObjectId, input: ObjectId) -> Option<ObjectId> {
        state.objects.iter().find_map(|(id, obj)| {
            (obj.kind == ObjectKind::Link
                && obj.props.get_id(keys::LINK_OUTPUT_PORT) == Some(output)
                && obj.props.get_id(keys::LINK_INPUT_PORT) == Some(input))
            .then_some(*id)
        })
    }
}

/// Transport half, owned by the mirror worker
pub struct SimulatedService {
    shared: Arc<Shared>,
    events_rx: Receiver<RemoteEvent>,
}

/// Controller half, kept by the test or the daemon
#[derive(Clone)]
pub struct SimulatedRemote {
    shared: Arc<Shared>,
}

impl SimulatedService {
    /// Create a reachable, empty remote graph
    pub fn new() -> (SimulatedService, SimulatedRemote) {
        let (events_tx, events_rx) = crossbeam::channel::unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(SimState {
                reachable: true,
                connected: false,
                failure: None,
                next_id: FIRST_OBJECT_ID,
                objects: BTreeMap::new(),
                roundtrips: 0,
                live_bindings: 0,
                release_log: Vec::new(),
            }),
            events_tx,
        });
        (
            SimulatedService {
                shared: Arc::clone(&shared),
                events_rx,
            },
            SimulatedRemote { shared },
        )
    }

    /// Fail if the session is closed or a failure was injected
    fn check_session(&self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if let Some(reason) = state.failure.take() {
            state.connected = false;
            return Err(TransportError::ConnectionLost(reason));
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    fn port_direction(state: &SimState, id: ObjectId) -> Option<Directionality> {
        state
            .objects
            .get(&id)
            .filter(|obj| obj.kind == ObjectKind::Port)
            .map(|obj| {
                Directionality::from_port_direction(obj.props.get(keys::PORT_DIRECTION).unwrap_or(""))
            })
    }
}

impl RemoteService for SimulatedService {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if !state.reachable {
            return Err(TransportError::Unreachable("simulated remote is offline".into()));
        }
        // Anything queued for an earlier session is stale
        while self.events_rx.try_recv().is_ok() {}
        state.failure = None;
        state.connected = true;
        for (id, obj) in &state.objects {
            let _ = self.shared.events_tx.send(RemoteEvent::Appeared {
                id: *id,
                kind: obj.kind,
                props: obj.props.clone(),
            });
        }
        log::debug!("[SIM] Session opened with {} objects", state.objects.len());
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.shared.lock();
        state.connected = false;
        while self.events_rx.try_recv().is_ok() {}
        log::debug!("[SIM] Session closed ({} bindings still live)", state.live_bindings);
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<RemoteEvent>, TransportError> {
        self.check_session()?;
        let mut events = Vec::new();
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => events.push(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TransportError::ConnectionLost("simulated remote dropped".into()));
            }
        }
        events.extend(self.events_rx.try_iter());
        self.check_session()?;
        Ok(events)
    }

    fn bind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<ObjectBinding, TransportError> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state.objects.contains_key(&id) {
            return Err(TransportError::BindFailed {
                id,
                reason: "no such object".into(),
            });
        }
        state.live_bindings += 1;
        drop(state);

        let recorder = |shared: &Arc<Shared>, entry: String, last: bool| {
            let shared = Arc::clone(shared);
            move || {
                let mut state = shared.lock();
                state.release_log.push(entry);
                if last {
                    state.live_bindings = state.live_bindings.saturating_sub(1);
                }
            }
        };

        let mut binding = ObjectBinding::new(id, kind)
            .with_handle(recorder(&self.shared, format!("handle:{}", id), true))
            .with_listener(recorder(&self.shared, format!("listener:{}", id), false));
        if kind == ObjectKind::Node {
            binding = binding.with_metadata(recorder(&self.shared, format!("metadata:{}", id), false));
        }
        Ok(binding)
    }

    fn create_link(&mut self, output: ObjectId, input: ObjectId) -> Result<(), TransportError> {
        self.check_session()?;
        {
            let state = self.shared.lock();
            let out_dir = Self::port_direction(&state, output);
            let in_dir = Self::port_direction(&state, input);
            if out_dir != Some(Directionality::Output) || in_dir != Some(Directionality::Input) {
                return Err(TransportError::Rejected {
                    operation: "create_link".into(),
                    reason: format!("{} -> {} is not an output/input port pair", output, input),
                });
            }
            if Shared::link_between(&state, output, input).is_some() {
                return Ok(());
            }
        }
        let props = Properties::new()
            .with(keys::LINK_OUTPUT_PORT, output.to_string())
            .with(keys::LINK_INPUT_PORT, input.to_string());
        self.shared.insert(ObjectKind::Link, props);
        Ok(())
    }

    fn destroy_link(&mut self, link: ObjectId) -> Result<(), TransportError> {
        self.check_session()?;
        let is_link = self
            .shared
            .lock()
            .objects
            .get(&link)
            .is_some_and(|obj| obj.kind == ObjectKind::Link);
        if !is_link {
            return Err(TransportError::Rejected {
                operation: "destroy_link".into(),
                reason: format!("{} is not a link", link),
            });
        }
        self.shared.remove(link);
        Ok(())
    }

    fn roundtrip(&mut self) -> Result<u64, TransportError> {
        self.check_session()?;
        let mut state = self.shared.lock();
        state.roundtrips += 1;
        Ok(state.roundtrips)
    }
}

impl SimulatedRemote {
    /// Add a node with a name and media class (e.g. "Audio/Sink")
    pub fn add_node(&self, name: &str, media_class: &str) -> ObjectId {
        self.add_node_with(
            Properties::new()
                .with(keys::NODE_NAME, name)
                .with(keys::MEDIA_CLASS, media_class),
        )
    }

    /// Add a node with an arbitrary property bag
    pub fn add_node_with(&self, props: Properties) -> ObjectId {
        self.shared.insert(ObjectKind::Node, props)
    }

    /// Add a port on `node`
    pub fn add_port(
        &self,
        node: ObjectId,
        name: &str,
        direction: Directionality,
        type_tag: &str,
    ) -> ObjectId {
        let direction = match direction {
            Directionality::Input => "in",
            Directionality::Output => "out",
            _ => "",
        };
        self.shared.insert(
            ObjectKind::Port,
            Properties::new()
                .with(keys::NODE_ID, node.to_string())
                .with(keys::PORT_NAME, name)
                .with(keys::PORT_DIRECTION, direction)
                .with(keys::FORMAT_DSP, type_tag),
        )
    }

    /// Link two ports as another client would (no validation)
    pub fn add_link(&self, output: ObjectId, input: ObjectId) -> ObjectId {
        self.shared.insert(
            ObjectKind::Link,
            Properties::new()
                .with(keys::LINK_OUTPUT_PORT, output.to_string())
                .with(keys::LINK_INPUT_PORT, input.to_string()),
        )
    }

    /// Merge properties into an object and announce the change
    pub fn update(&self, id: ObjectId, props: Properties) -> bool {
        let mut state = self.shared.lock();
        let Some(obj) = state.objects.get_mut(&id) else {
            return false;
        };
        obj.props.merge(&props);
        self.shared.emit(&state, RemoteEvent::Changed { id, props });
        true
    }

    /// Remove an object; nodes take their ports and links with them
    pub fn remove(&self, id: ObjectId) -> bool {
        self.shared.remove(id)
    }

    /// Make the next poll of the open session fail
    pub fn fail_transport(&self, reason: &str) {
        self.shared.lock().failure = Some(reason.to_string());
    }

    /// Toggle whether `open()` succeeds
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.lock().reachable = reachable;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Current links as (output port, input port), sorted
    pub fn links(&self) -> Vec<(ObjectId, ObjectId)> {
        let state = self.shared.lock();
        let mut links: Vec<_> = state
            .objects
            .values()
            .filter(|obj| obj.kind == ObjectKind::Link)
            .filter_map(|obj| {
                Some((
                    obj.props.get_id(keys::LINK_OUTPUT_PORT)?,
                    obj.props.get_id(keys::LINK_INPUT_PORT)?,
                ))
            })
            .collect();
        links.sort_unstable();
        links
    }

    pub fn link_between(&self, output: ObjectId, input: ObjectId) -> Option<ObjectId> {
        Shared::link_between(&self.shared.lock(), output, input)
    }

    pub fn object_count(&self) -> usize {
        self.shared.lock().objects.len()
    }

    /// Bindings bound and not yet released
    pub fn live_bindings(&self) -> usize {
        self.shared.lock().live_bindings
    }

    /// Every binding release so far, as "listener:<id>", "metadata:<id>", "handle:<id>"
    pub fn release_log(&self) -> Vec<String> {
        self.shared.lock().release_log.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIO: &str = "32 bit float mono audio";

    fn drain(service: &mut SimulatedService) -> Vec<RemoteEvent> {
        service.poll(Duration::from_millis(10)).unwrap()
    }

    #[test]
    fn test_open_announces_existing_objects() {
        let (mut service, remote) = SimulatedService::new();
        let node = remote.add_node("synth", "Audio/Source");
        remote.add_port(node, "out", Directionality::Output, AUDIO);

        assert_eq!(service.poll(Duration::ZERO), Err(TransportError::NotConnected));
        service.open().unwrap();

        let events = drain(&mut service);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RemoteEvent::Appeared { kind: ObjectKind::Node, .. }));
        assert!(matches!(events[1], RemoteEvent::Appeared { kind: ObjectKind::Port, .. }));
    }

    #[test]
    fn test_node_removal_cascades_links_ports_node() {
        let (mut service, remote) = SimulatedService::new();
        let a = remote.add_node("a", "Audio/Source");
        let a_out = remote.add_port(a, "out", Directionality::Output, AUDIO);
        let b = remote.add_node("b", "Audio/Sink");
        let b_in = remote.add_port(b, "in", Directionality::Input, AUDIO);
        let link = remote.add_link(a_out, b_in);
        service.open().unwrap();
        drain(&mut service);

        assert!(remote.remove(a));
        let removed: Vec<ObjectId> = drain(&mut service).iter().map(RemoteEvent::id).collect();
        assert_eq!(removed, vec![link, a_out, a]);
        assert!(remote.links().is_empty());
    }

    #[test]
    fn test_create_link_validates_directions() {
        let (mut service, remote) = SimulatedService::new();
        let a = remote.add_node("a", "Audio/Source");
        let a_out = remote.add_port(a, "out", Directionality::Output, AUDIO);
        let b = remote.add_node("b", "Audio/Sink");
        let b_in = remote.add_port(b, "in", Directionality::Input, AUDIO);
        service.open().unwrap();

        assert!(matches!(
            service.create_link(b_in, a_out),
            Err(TransportError::Rejected { .. })
        ));
        service.create_link(a_out, b_in).unwrap();
        assert_eq!(remote.links(), vec![(a_out, b_in)]);

        let link = remote.link_between(a_out, b_in).unwrap();
        service.destroy_link(link).unwrap();
        assert!(remote.links().is_empty());
    }

    #[test]
    fn test_injected_failure_and_unreachable() {
        let (mut service, remote) = SimulatedService::new();
        remote.set_reachable(false);
        assert!(matches!(service.open(), Err(TransportError::Unreachable(_))));

        remote.set_reachable(true);
        service.open().unwrap();
        remote.fail_transport("server restarted");
        assert_eq!(
            service.poll(Duration::ZERO),
            Err(TransportError::ConnectionLost("server restarted".into()))
        );
        assert!(!remote.is_connected());
    }

    #[test]
    fn test_binding_release_is_recorded() {
        let (mut service, remote) = SimulatedService::new();
        let node = remote.add_node("a", "Audio/Source");
        service.open().unwrap();

        let binding = service.bind(node, ObjectKind::Node).unwrap();
        assert_eq!(remote.live_bindings(), 1);
        drop(binding);

        assert_eq!(remote.live_bindings(), 0);
        assert_eq!(
            remote.release_log(),
            vec![
                format!("listener:{}", node),
                format!("metadata:{}", node),
                format!("handle:{}", node),
            ]
        );
    }
}
