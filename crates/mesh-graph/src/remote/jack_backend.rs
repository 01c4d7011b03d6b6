//! JACK transport for Linux
//!
//! JACK has no object registry, so the transport keeps a snapshot of the
//! server's ports and diffs it whenever the server reports a graph change.
//! Clients become nodes, ports become ports and connections become links.
//! Ids are allocated here and never reused within one session.
//!
//! Works against a native JACK server or PipeWire's JACK compatibility layer.

use super::{keys, ObjectBinding, Properties, RemoteEvent, RemoteService};
use crate::error::TransportError;
use crate::types::{ObjectId, ObjectKind};
use crossbeam::channel::{Receiver, Sender};
use jack::{Client, ClientOptions, Control, PortId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Flags shared with the JACK notification thread
struct JackFlags {
    dirty: AtomicBool,
    lost: AtomicBool,
}

/// JACK notification handler
///
/// Runs on JACK's notification thread; only raises flags and wakes `poll`.
struct JackWatcher {
    flags: Arc<JackFlags>,
    wake_tx: Sender<()>,
}

impl JackWatcher {
    fn touch(&self) {
        self.flags.dirty.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }
}

impl jack::NotificationHandler for JackWatcher {
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        log::warn!("[JACK] Server shut down: {}", reason);
        self.flags.lost.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }

    fn client_registration(&mut self, _: &Client, _name: &str, _is_registered: bool) {
        self.touch();
    }

    fn port_registration(&mut self, _: &Client, _port_id: PortId, _is_registered: bool) {
        self.touch();
    }

    fn port_rename(&mut self, _: &Client, _port_id: PortId, _old: &str, _new: &str) -> Control {
        self.touch();
        Control::Continue
    }

    fn ports_connected(&mut self, _: &Client, _a: PortId, _b: PortId, _are_connected: bool) {
        self.touch();
    }

    fn graph_reorder(&mut self, _: &Client) -> Control {
        self.touch();
        Control::Continue
    }
}

/// One scan of the server's ports, keyed by JACK names
#[derive(Default)]
struct Snapshot {
    /// client name -> media class
    nodes: BTreeMap<String, String>,
    /// full port name -> (client name, port props)
    ports: BTreeMap<String, (String, Properties)>,
    /// (output port, input port)
    links: Vec<(String, String)>,
}

/// Id allocation for the names seen during one session
#[derive(Default)]
struct IdMap {
    next: ObjectId,
    nodes: BTreeMap<String, ObjectId>,
    ports: BTreeMap<String, ObjectId>,
    links: BTreeMap<(String, String), ObjectId>,
}

impl IdMap {
    fn allocate(&mut self) -> ObjectId {
        self.next += 1;
        self.next
    }
}

/// Remote service backed by a JACK server
pub struct JackService {
    client_name: String,
    client: Option<jack::AsyncClient<JackWatcher, ()>>,
    flags: Arc<JackFlags>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    snapshot: Snapshot,
    ids: IdMap,
    roundtrips: u64,
}

impl JackService {
    pub fn new(client_name: &str) -> Self {
        let (wake_tx, wake_rx) = crossbeam::channel::bounded(1);
        Self {
            client_name: client_name.to_string(),
            client: None,
            flags: Arc::new(JackFlags {
                dirty: AtomicBool::new(false),
                lost: AtomicBool::new(false),
            }),
            wake_tx,
            wake_rx,
            snapshot: Snapshot::default(),
            ids: IdMap::default(),
            roundtrips: 0,
        }
    }

    fn client(&self) -> Result<&Client, TransportError> {
        if self.flags.lost.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionLost("JACK server shut down".into()));
        }
        self.client
            .as_ref()
            .map(|c| c.as_client())
            .ok_or(TransportError::NotConnected)
    }

    fn scan(client: &Client) -> Snapshot {
        let mut snapshot = Snapshot::default();
        // client -> (has inputs, has outputs, has audio, has midi)
        let mut roles: BTreeMap<String, (bool, bool, bool, bool)> = BTreeMap::new();

        for name in client.ports(None, None, jack::PortFlags::empty()) {
            let Some(port) = client.port_by_name(&name) else {
                continue;
            };
            let Some((owner, short)) = name.split_once(':') else {
                continue;
            };
            let flags = port.flags();
            let type_tag = port.port_type().unwrap_or_default();
            let is_output = flags.contains(jack::PortFlags::IS_OUTPUT);

            let mut props = Properties::new()
                .with(keys::PORT_NAME, short)
                .with(keys::PORT_DIRECTION, if is_output { "out" } else { "in" })
                .with(keys::FORMAT_DSP, type_tag.as_str())
                .with(keys::PORT_PHYSICAL, flags.contains(jack::PortFlags::IS_PHYSICAL).to_string())
                .with(keys::PORT_TERMINAL, flags.contains(jack::PortFlags::IS_TERMINAL).to_string())
                .with(keys::PORT_MONITOR, flags.contains(jack::PortFlags::CAN_MONITOR).to_string());
            if let Some(alias) = port.aliases().ok().and_then(|a| a.into_iter().next()) {
                props.insert(keys::PORT_ALIAS, alias);
            }

            let role = roles.entry(owner.to_string()).or_default();
            if is_output {
                role.1 = true;
                for peer in port.get_connections() {
                    snapshot.links.push((name.clone(), peer));
                }
            } else {
                role.0 = true;
            }
            let lowered = type_tag.to_ascii_lowercase();
            role.2 |= lowered.contains("audio");
            role.3 |= lowered.contains("midi");

            snapshot.ports.insert(name.clone(), (owner.to_string(), props));
        }

        for (owner, (inputs, outputs, audio, midi)) in roles {
            let media = match (audio, midi) {
                (true, true) => "Audio/Midi",
                (false, true) => "Midi",
                _ => "Audio",
            };
            let role = match (inputs, outputs) {
                (true, true) => "Duplex",
                (false, true) => "Source",
                _ => "Sink",
            };
            snapshot.nodes.insert(owner, format!("{}/{}", media, role));
        }
        snapshot.links.sort();
        snapshot.links.dedup();
        snapshot
    }

    /// Diff a fresh scan against the previous one
    fn diff(&mut self, next: Snapshot) -> Vec<RemoteEvent> {
        let mut events = Vec::new();

        // Removals first: links, ports, nodes
        for link in &self.snapshot.links {
            if !next.links.contains(link) {
                if let Some(id) = self.ids.links.remove(link) {
                    events.push(RemoteEvent::Removed { id });
                }
            }
        }
        for name in self.snapshot.ports.keys() {
            if !next.ports.contains_key(name) {
                if let Some(id) = self.ids.ports.remove(name) {
                    events.push(RemoteEvent::Removed { id });
                }
            }
        }
        for name in self.snapshot.nodes.keys() {
            if !next.nodes.contains_key(name) {
                if let Some(id) = self.ids.nodes.remove(name) {
                    events.push(RemoteEvent::Removed { id });
                }
            }
        }

        for (name, class) in &next.nodes {
            match self.ids.nodes.get(name) {
                Some(id) => {
                    if self.snapshot.nodes.get(name) != Some(class) {
                        events.push(RemoteEvent::Changed {
                            id: *id,
                            props: Properties::new().with(keys::MEDIA_CLASS, class.as_str()),
                        });
                    }
                }
                None => {
                    let id = self.ids.allocate();
                    self.ids.nodes.insert(name.clone(), id);
                    events.push(RemoteEvent::Appeared {
                        id,
                        kind: ObjectKind::Node,
                        props: Properties::new()
                            .with(keys::NODE_NAME, name.as_str())
                            .with(keys::MEDIA_CLASS, class.as_str()),
                    });
                }
            }
        }

        for (name, (owner, props)) in &next.ports {
            if self.ids.ports.contains_key(name) {
                continue;
            }
            let Some(node_id) = self.ids.nodes.get(owner).copied() else {
                continue;
            };
            let id = self.ids.allocate();
            self.ids.ports.insert(name.clone(), id);
            events.push(RemoteEvent::Appeared {
                id,
                kind: ObjectKind::Port,
                props: props.clone().with(keys::NODE_ID, node_id.to_string()),
            });
        }

        for link in &next.links {
            if self.ids.links.contains_key(link) {
                continue;
            }
            let (Some(out), Some(inp)) = (self.ids.ports.get(&link.0), self.ids.ports.get(&link.1))
            else {
                continue;
            };
            let props = Properties::new()
                .with(keys::LINK_OUTPUT_PORT, out.to_string())
                .with(keys::LINK_INPUT_PORT, inp.to_string());
            let id = self.ids.allocate();
            self.ids.links.insert(link.clone(), id);
            events.push(RemoteEvent::Appeared {
                id,
                kind: ObjectKind::Link,
                props,
            });
        }

        self.snapshot = next;
        events
    }

    fn port_name(&self, id: ObjectId) -> Option<String> {
        self.ids
            .ports
            .iter()
            .find(|(_, port_id)| **port_id == id)
            .map(|(name, _)| name.clone())
    }
}

impl RemoteService for JackService {
    fn open(&mut self) -> Result<(), TransportError> {
        let (client, _status) = Client::new(&self.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        log::info!("[JACK] Client '{}' connected", client.name());

        self.flags = Arc::new(JackFlags {
            dirty: AtomicBool::new(true),
            lost: AtomicBool::new(false),
        });
        let watcher = JackWatcher {
            flags: Arc::clone(&self.flags),
            wake_tx: self.wake_tx.clone(),
        };
        let client = client
            .activate_async(watcher, ())
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        self.client = Some(client);
        self.snapshot = Snapshot::default();
        self.ids = IdMap::default();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.deactivate() {
                log::warn!("[JACK] Failed to deactivate client: {}", e);
            }
        }
        self.snapshot = Snapshot::default();
        self.ids = IdMap::default();
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<RemoteEvent>, TransportError> {
        self.client()?;
        if !self.flags.dirty.load(Ordering::Acquire) {
            let _ = self.wake_rx.recv_timeout(timeout);
        }
        if !self.flags.dirty.swap(false, Ordering::AcqRel) {
            self.client()?;
            return Ok(Vec::new());
        }
        let next = Self::scan(self.client()?);
        Ok(self.diff(next))
    }

    fn bind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<ObjectBinding, TransportError> {
        self.client()?;
        // JACK objects need no per-object proxy
        Ok(ObjectBinding::new(id, kind))
    }

    fn create_link(&mut self, output: ObjectId, input: ObjectId) -> Result<(), TransportError> {
        let rejected = |reason: String| TransportError::Rejected {
            operation: "create_link".into(),
            reason,
        };
        let out = self.port_name(output).ok_or_else(|| rejected(format!("unknown port {}", output)))?;
        let inp = self.port_name(input).ok_or_else(|| rejected(format!("unknown port {}", input)))?;
        self.client()?
            .connect_ports_by_name(&out, &inp)
            .map_err(|e| rejected(e.to_string()))
    }

    fn destroy_link(&mut self, link: ObjectId) -> Result<(), TransportError> {
        let rejected = |reason: String| TransportError::Rejected {
            operation: "destroy_link".into(),
            reason,
        };
        let (out, inp) = self
            .ids
            .links
            .iter()
            .find(|(_, id)| **id == link)
            .map(|(pair, _)| pair.clone())
            .ok_or_else(|| rejected(format!("unknown link {}", link)))?;
        self.client()?
            .disconnect_ports_by_name(&out, &inp)
            .map_err(|e| rejected(e.to_string()))
    }

    fn roundtrip(&mut self) -> Result<u64, TransportError> {
        self.client()?;
        // Connection changes are synchronous in JACK; rescan so the next
        // poll reports them even if the notification has not arrived yet
        self.flags.dirty.store(true, Ordering::Release);
        self.roundtrips += 1;
        Ok(self.roundtrips)
    }
}
