//! User-visible graph items
//!
//! Items are keyed by `(remote id, side, type)` rather than by remote id
//! alone: a duplex remote node is shown as an input node and an output
//! node. Only the mirror's reconciliation pass creates, updates or retires
//! items; everything else reads.

use crate::types::{
    Directionality, MediaCategory, NodeCategory, NodeMode, ObjectId, PortFlags, PortKind,
    PortTypeId, Serial,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub id: ObjectId,
    pub mode: NodeMode,
    pub category: NodeCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub id: ObjectId,
    pub mode: Directionality,
    pub type_id: PortTypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: PortKey,
    pub dest: PortKey,
}

/// Key of any presentation item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    Node(NodeKey),
    Port(PortKey),
    Edge(EdgeKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationNode {
    pub key: NodeKey,
    /// Identity name, as used by patchbay rules
    pub name: String,
    pub nickname: String,
    /// Name shown to the operator (dedupe suffix, nickname preference)
    pub label: String,
    pub dedupe_index: Option<u32>,
    pub media: MediaCategory,
    pub ports: BTreeSet<PortKey>,
    /// Serial of the mirror record this item was built from
    pub generation: Serial,
    pub draw_order: u64,
    pub marked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationPort {
    pub key: PortKey,
    pub node: NodeKey,
    pub name: String,
    pub kind: PortKind,
    pub flags: PortFlags,
    pub generation: Serial,
    pub draw_order: u64,
    pub marked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationEdge {
    pub key: EdgeKey,
    /// Remote link id
    pub link: ObjectId,
    pub generation: Serial,
    pub draw_order: u64,
    pub marked: bool,
}

/// Callbacks invoked while a reconciliation pass mutates the graph
pub trait GraphObserver {
    fn item_added(&mut self, _key: &ItemKey) {}
    fn item_updated(&mut self, _key: &ItemKey) {}
    fn item_removed(&mut self, _key: &ItemKey) {}
}

impl GraphObserver for () {}

/// Mutation counts of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }

    pub(crate) fn added(&mut self, observer: &mut dyn GraphObserver, key: ItemKey) {
        log::trace!("[SYNC] + {:?}", key);
        self.added += 1;
        observer.item_added(&key);
    }

    pub(crate) fn updated(&mut self, observer: &mut dyn GraphObserver, key: ItemKey) {
        log::trace!("[SYNC] ~ {:?}", key);
        self.updated += 1;
        observer.item_updated(&key);
    }

    pub(crate) fn removed(&mut self, observer: &mut dyn GraphObserver, key: ItemKey) {
        log::trace!("[SYNC] - {:?}", key);
        self.removed += 1;
        observer.item_removed(&key);
    }
}

/// The user-visible graph
#[derive(Debug, Default)]
pub struct PresentationGraph {
    nodes: BTreeMap<NodeKey, PresentationNode>,
    ports: BTreeMap<PortKey, PresentationPort>,
    edges: BTreeMap<EdgeKey, PresentationEdge>,
    next_draw_order: u64,
}

impl PresentationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, key: &NodeKey) -> Option<&PresentationNode> {
        self.nodes.get(key)
    }

    pub fn port(&self, key: &PortKey) -> Option<&PresentationPort> {
        self.ports.get(key)
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&PresentationEdge> {
        self.edges.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PresentationNode> {
        self.nodes.values()
    }

    pub fn ports(&self) -> impl Iterator<Item = &PresentationPort> {
        self.ports.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &PresentationEdge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ports.is_empty() && self.edges.is_empty()
    }

    pub fn find_node(
        &self,
        id: ObjectId,
        mode: NodeMode,
        category: NodeCategory,
    ) -> Option<&PresentationNode> {
        self.nodes.get(&NodeKey { id, mode, category })
    }

    /// Nodes with the given identity name, ordered by remote id
    pub fn find_nodes_by_name(
        &self,
        name: &str,
        mode: NodeMode,
        category: NodeCategory,
    ) -> Vec<&PresentationNode> {
        self.nodes
            .values()
            .filter(|node| node.key.mode == mode && node.key.category == category)
            .filter(|node| node.name == name)
            .collect()
    }

    /// Port on `node` with the given name and kind
    pub fn find_port(&self, node: &NodeKey, name: &str, kind: PortKind) -> Option<&PresentationPort> {
        self.ports_of(node)
            .find(|port| port.name == name && port.kind == kind)
    }

    pub fn ports_of<'a>(&'a self, node: &NodeKey) -> impl Iterator<Item = &'a PresentationPort> + 'a {
        self.nodes
            .get(node)
            .into_iter()
            .flat_map(|node| node.ports.iter())
            .filter_map(|key| self.ports.get(key))
    }

    /// Owning node of a port
    pub fn port_node(&self, port: &PortKey) -> Option<&PresentationNode> {
        self.ports.get(port).and_then(|port| self.nodes.get(&port.node))
    }

    /// Edges touching `port` on either end
    pub fn edges_at<'a>(&'a self, port: &'a PortKey) -> impl Iterator<Item = &'a PresentationEdge> + 'a {
        self.edges
            .values()
            .filter(move |edge| edge.key.source == *port || edge.key.dest == *port)
    }

    pub(crate) fn next_draw_order(&mut self) -> u64 {
        self.next_draw_order += 1;
        self.next_draw_order
    }

    pub(crate) fn clear_marks(&mut self) {
        self.nodes.values_mut().for_each(|node| node.marked = false);
        self.ports.values_mut().for_each(|port| port.marked = false);
        self.edges.values_mut().for_each(|edge| edge.marked = false);
    }

    pub(crate) fn node_mut(&mut self, key: &NodeKey) -> Option<&mut PresentationNode> {
        self.nodes.get_mut(key)
    }

    pub(crate) fn port_mut(&mut self, key: &PortKey) -> Option<&mut PresentationPort> {
        self.ports.get_mut(key)
    }

    pub(crate) fn edge_mut(&mut self, key: &EdgeKey) -> Option<&mut PresentationEdge> {
        self.edges.get_mut(key)
    }

    pub(crate) fn insert_node(&mut self, node: PresentationNode) {
        self.nodes.insert(node.key, node);
    }

    pub(crate) fn insert_port(&mut self, port: PresentationPort) {
        if let Some(node) = self.nodes.get_mut(&port.node) {
            node.ports.insert(port.key);
        }
        self.ports.insert(port.key, port);
    }

    pub(crate) fn insert_edge(&mut self, edge: PresentationEdge) {
        self.edges.insert(edge.key, edge);
    }

    pub(crate) fn remove_edge(&mut self, key: &EdgeKey, observer: &mut dyn GraphObserver, report: &mut SyncReport) {
        if self.edges.remove(key).is_some() {
            report.removed(observer, ItemKey::Edge(*key));
        }
    }

    /// Retire a port and the edges touching it
    pub(crate) fn remove_port(&mut self, key: &PortKey, observer: &mut dyn GraphObserver, report: &mut SyncReport) {
        let touching: Vec<EdgeKey> = self.edges_at(key).map(|edge| edge.key).collect();
        for edge in touching {
            self.remove_edge(&edge, observer, report);
        }
        if let Some(port) = self.ports.remove(key) {
            if let Some(node) = self.nodes.get_mut(&port.node) {
                node.ports.remove(key);
            }
            report.removed(observer, ItemKey::Port(*key));
        }
    }

    /// Retire a node with its ports and their edges
    pub(crate) fn remove_node(&mut self, key: &NodeKey, observer: &mut dyn GraphObserver, report: &mut SyncReport) {
        let ports: Vec<PortKey> = self
            .nodes
            .get(key)
            .map(|node| node.ports.iter().copied().collect())
            .unwrap_or_default();
        for port in ports {
            self.remove_port(&port, observer, report);
        }
        if self.nodes.remove(key).is_some() {
            report.removed(observer, ItemKey::Node(*key));
        }
    }

    /// Retire every unmarked item: edges, then ports, then nodes
    pub(crate) fn sweep(&mut self, observer: &mut dyn GraphObserver, report: &mut SyncReport) {
        let edges: Vec<EdgeKey> = self.edges.values().filter(|e| !e.marked).map(|e| e.key).collect();
        for key in edges {
            self.remove_edge(&key, observer, report);
        }
        let ports: Vec<PortKey> = self.ports.values().filter(|p| !p.marked).map(|p| p.key).collect();
        for key in ports {
            self.remove_port(&key, observer, report);
        }
        let nodes: Vec<NodeKey> = self.nodes.values().filter(|n| !n.marked).map(|n| n.key).collect();
        for key in nodes {
            self.remove_node(&key, observer, report);
        }
    }

    /// Retire everything
    pub(crate) fn retire_all(&mut self, observer: &mut dyn GraphObserver, report: &mut SyncReport) {
        self.clear_marks();
        self.sweep(observer, report);
    }
}
