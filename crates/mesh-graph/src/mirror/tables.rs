//! Mirror tables: typed records for every remote object
//!
//! Owned by the interactive context. Notifications are applied in the order
//! the worker forwarded them; ports may arrive before their node and links
//! before their ports, so attachment happens from both sides.

use super::naming::NameIndexTable;
use super::objects::{LinkRecord, NodeRecord, PortRecord, RemoteObject};
use crate::remote::{Properties, RemoteEvent};
use crate::types::{ObjectId, ObjectKind, Serial, TypeRegistry};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MirrorTables {
    objects: BTreeMap<ObjectId, RemoteObject>,
    names: NameIndexTable,
    types: TypeRegistry,
    next_serial: Serial,
}

impl MirrorTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one remote notification
    pub fn apply(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Appeared { id, kind, props } => self.appeared(id, kind, props),
            RemoteEvent::Changed { id, props } => self.changed(id, &props),
            RemoteEvent::Removed { id } => {
                self.remove(id);
            }
        }
    }

    /// Confirm every pending record (a round-trip completed)
    pub fn mark_synced(&mut self) {
        for object in self.objects.values_mut() {
            object.set_pending_sync(false);
        }
    }

    /// Drop every record; the type registry survives
    pub fn clear(&mut self) {
        self.objects.clear();
        self.names.clear();
    }

    fn next_serial(&mut self) -> Serial {
        self.next_serial += 1;
        self.next_serial
    }

    fn appeared(&mut self, id: ObjectId, kind: ObjectKind, props: Properties) {
        // A recycled id starts over: nothing of the old object carries across
        if self.objects.contains_key(&id) {
            log::debug!("[MIRROR] {} {} re-announced, replacing record", kind, id);
            self.remove(id);
        }
        let serial = self.next_serial();
        match kind {
            ObjectKind::Node => self.insert_node(NodeRecord::new(id, serial, props)),
            ObjectKind::Port => match PortRecord::from_props(id, serial, props, &mut self.types) {
                Some(port) => self.insert_port(port),
                None => log::debug!("[MIRROR] Ignoring port {} without owning node", id),
            },
            ObjectKind::Link => match LinkRecord::from_props(id, serial, &props) {
                Some(link) => self.insert_link(link),
                None => log::debug!("[MIRROR] Ignoring link {} without endpoints", id),
            },
        }
    }

    fn insert_node(&mut self, mut node: NodeRecord) {
        node.ports = self
            .ports()
            .filter(|port| port.node == node.id)
            .map(|port| port.id)
            .collect();
        if node.ready {
            node.dedupe_index = Some(self.names.acquire(&node.name_key()));
        }
        log::debug!("[MIRROR] Node {} appeared ({:?})", node.id, node.name);
        self.objects.insert(node.id, RemoteObject::Node(node));
    }

    fn insert_port(&mut self, mut port: PortRecord) {
        port.links = self
            .links()
            .filter(|link| link.output == port.id || link.input == port.id)
            .map(|link| link.id)
            .collect();
        if let Some(RemoteObject::Node(node)) = self.objects.get_mut(&port.node) {
            node.ports.insert(port.id);
        }
        let id = port.id;
        let links: Vec<ObjectId> = port.links.iter().copied().collect();
        self.objects.insert(id, RemoteObject::Port(port));

        // Links that were waiting for this port can be checked now
        for link in links {
            if !self.link_is_valid(link) {
                log::debug!("[MIRROR] Rejecting link {}: port directions do not match", link);
                self.remove(link);
            }
        }
    }

    fn insert_link(&mut self, link: LinkRecord) {
        let (id, output, input) = (link.id, link.output, link.input);
        if !self.directions_allow(output, input) {
            log::debug!(
                "[MIRROR] Rejecting link {}: {} -> {} is not output -> input",
                id,
                output,
                input
            );
            return;
        }
        for port in [output, input] {
            if let Some(RemoteObject::Port(port)) = self.objects.get_mut(&port) {
                port.links.insert(id);
            }
        }
        self.objects.insert(id, RemoteObject::Link(link));
    }

    /// Directions only veto a link once both ports are known
    fn directions_allow(&self, output: ObjectId, input: ObjectId) -> bool {
        match (self.port(output), self.port(input)) {
            (Some(out), Some(inp)) => {
                out.directionality.includes_output() && inp.directionality.includes_input()
            }
            _ => true,
        }
    }

    fn link_is_valid(&self, id: ObjectId) -> bool {
        self.link(id)
            .map_or(true, |link| self.directions_allow(link.output, link.input))
    }

    fn changed(&mut self, id: ObjectId, props: &Properties) {
        let Some(object) = self.objects.get_mut(&id) else {
            log::debug!("[MIRROR] Change for unknown object {}", id);
            return;
        };
        match object {
            RemoteObject::Node(node) => {
                let old_key = node.name_key();
                let old_index = node.dedupe_index.take();
                let was_ready = node.ready;
                node.props.merge(props);
                node.derive();
                node.pending_sync = true;

                // Re-identification: the index follows the identity key
                let new_key = node.name_key();
                match old_index {
                    Some(index) if node.ready && old_key == new_key => {
                        node.dedupe_index = Some(index);
                    }
                    _ => {
                        if let Some(index) = old_index {
                            self.names.release(&old_key, index);
                        }
                        if node.ready {
                            node.dedupe_index = Some(self.names.acquire(&new_key));
                        }
                        if was_ready {
                            log::debug!("[MIRROR] Node {} re-identified as {:?}", id, node.name);
                        }
                    }
                }
            }
            RemoteObject::Port(port) => {
                port.props.merge(props);
                port.derive(&mut self.types);
                port.pending_sync = true;
                let links: Vec<ObjectId> = port.links.iter().copied().collect();
                for link in links {
                    if !self.link_is_valid(link) {
                        self.remove(link);
                    }
                }
            }
            RemoteObject::Link(link) => {
                link.pending_sync = true;
            }
        }
    }

    /// Remove an object and everything that depends on it
    ///
    /// Node -> its ports -> their links. Returns false for unknown ids.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let Some(object) = self.objects.remove(&id) else {
            return false;
        };
        log::trace!("[MIRROR] Removing {} {}", object.kind(), id);
        match object {
            RemoteObject::Node(node) => {
                if let Some(index) = node.dedupe_index {
                    self.names.release(&node.name_key(), index);
                }
                for port in node.ports {
                    self.remove(port);
                }
                log::debug!("[MIRROR] Node {} removed", id);
            }
            RemoteObject::Port(port) => {
                for link in port.links {
                    self.remove(link);
                }
                if let Some(RemoteObject::Node(node)) = self.objects.get_mut(&port.node) {
                    node.ports.remove(&id);
                }
            }
            RemoteObject::Link(link) => {
                for port in [link.output, link.input] {
                    if let Some(RemoteObject::Port(port)) = self.objects.get_mut(&port) {
                        port.links.remove(&id);
                    }
                }
            }
        }
        true
    }

    pub fn object(&self, id: ObjectId) -> Option<&RemoteObject> {
        self.objects.get(&id)
    }

    pub fn node(&self, id: ObjectId) -> Option<&NodeRecord> {
        match self.objects.get(&id)? {
            RemoteObject::Node(node) => Some(node),
            _ => None,
        }
    }

    pub(crate) fn node_mut(&mut self, id: ObjectId) -> Option<&mut NodeRecord> {
        match self.objects.get_mut(&id)? {
            RemoteObject::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn port(&self, id: ObjectId) -> Option<&PortRecord> {
        match self.objects.get(&id)? {
            RemoteObject::Port(port) => Some(port),
            _ => None,
        }
    }

    pub fn link(&self, id: ObjectId) -> Option<&LinkRecord> {
        match self.objects.get(&id)? {
            RemoteObject::Link(link) => Some(link),
            _ => None,
        }
    }

    /// Nodes in remote id order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.objects.values().filter_map(|object| match object {
            RemoteObject::Node(node) => Some(node),
            _ => None,
        })
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortRecord> {
        self.objects.values().filter_map(|object| match object {
            RemoteObject::Port(port) => Some(port),
            _ => None,
        })
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.objects.values().filter_map(|object| match object {
            RemoteObject::Link(link) => Some(link),
            _ => None,
        })
    }

    /// Existing link from `output` to `input`
    pub fn link_between(&self, output: ObjectId, input: ObjectId) -> Option<ObjectId> {
        let port = self.port(output)?;
        port.links
            .iter()
            .copied()
            .find(|link| self.link(*link).is_some_and(|l| l.input == input))
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
