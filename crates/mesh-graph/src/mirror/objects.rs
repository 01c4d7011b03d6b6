//! Typed mirror records, one per remote object

use super::naming::{NameKey, NodeNames};
use crate::remote::{keys, Properties};
use crate::types::{
    Directionality, MediaCategory, ObjectId, ObjectKind, PortFlags, PortTypeId, Serial, TypeRegistry,
};
use std::collections::BTreeSet;

/// A mirrored remote node
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: ObjectId,
    pub serial: Serial,
    /// Identity name (empty until ready)
    pub name: String,
    pub nickname: String,
    pub directionality: Directionality,
    pub category: MediaCategory,
    pub ports: BTreeSet<ObjectId>,
    /// Descriptive metadata has arrived
    pub ready: bool,
    /// Index among live nodes sharing `name_key()`, once ready
    pub dedupe_index: Option<u32>,
    /// Changed since the last completed round-trip
    pub pending_sync: bool,
    /// Has been shown by a reconciliation pass
    pub exposed: bool,
    pub props: Properties,
}

impl NodeRecord {
    pub(crate) fn new(id: ObjectId, serial: Serial, props: Properties) -> Self {
        let mut node = Self {
            id,
            serial,
            name: String::new(),
            nickname: String::new(),
            directionality: Directionality::Unset,
            category: MediaCategory::empty(),
            ports: BTreeSet::new(),
            ready: false,
            dedupe_index: None,
            pending_sync: true,
            exposed: false,
            props,
        };
        node.derive();
        node
    }

    /// Recompute typed fields from the property bag
    pub(crate) fn derive(&mut self) {
        let class = self.props.get(keys::MEDIA_CLASS).unwrap_or("");
        self.directionality = Directionality::from_media_class(class);
        self.category = MediaCategory::from_media_class(class);
        match NodeNames::from_props(&self.props) {
            Some(names) => {
                self.name = names.name;
                self.nickname = names.nickname;
                self.ready = true;
            }
            None => {
                self.name.clear();
                self.nickname.clear();
                self.ready = false;
            }
        }
    }

    pub fn name_key(&self) -> NameKey {
        (self.name.clone(), self.directionality, self.category)
    }

    /// Whether a reconciliation pass may show this node
    ///
    /// A node never shown before is held back until its pending metadata
    /// has been confirmed by a round-trip.
    pub fn presentable(&self) -> bool {
        self.ready && (self.exposed || !self.pending_sync)
    }
}

/// A mirrored remote port
#[derive(Debug, Clone)]
pub struct PortRecord {
    pub id: ObjectId,
    pub serial: Serial,
    pub node: ObjectId,
    pub name: String,
    pub alias: Option<String>,
    pub directionality: Directionality,
    pub type_tag: String,
    pub type_id: PortTypeId,
    pub flags: PortFlags,
    pub links: BTreeSet<ObjectId>,
    pub pending_sync: bool,
    pub props: Properties,
}

impl PortRecord {
    /// Build from a property bag; ports without an owner are unusable
    pub(crate) fn from_props(
        id: ObjectId,
        serial: Serial,
        props: Properties,
        types: &mut TypeRegistry,
    ) -> Option<Self> {
        let node = props.get_id(keys::NODE_ID)?;
        let mut port = Self {
            id,
            serial,
            node,
            name: String::new(),
            alias: None,
            directionality: Directionality::Unset,
            type_tag: String::new(),
            type_id: PortTypeId(0),
            flags: PortFlags::empty(),
            links: BTreeSet::new(),
            pending_sync: true,
            props,
        };
        port.derive(types);
        Some(port)
    }

    pub(crate) fn derive(&mut self, types: &mut TypeRegistry) {
        let props = &self.props;
        self.alias = props.get_text(keys::PORT_ALIAS).map(str::to_string);
        self.name = props
            .get_text(keys::PORT_NAME)
            .map(str::to_string)
            .or_else(|| self.alias.clone())
            .unwrap_or_else(|| format!("port-{}", self.id));
        self.directionality =
            Directionality::from_port_direction(props.get(keys::PORT_DIRECTION).unwrap_or(""));
        self.type_tag = props.get(keys::FORMAT_DSP).unwrap_or("").to_string();
        self.type_id = types.intern(&self.type_tag);

        let mut flags = PortFlags::empty();
        flags.set(PortFlags::PHYSICAL, props.get_bool(keys::PORT_PHYSICAL));
        flags.set(PortFlags::TERMINAL, props.get_bool(keys::PORT_TERMINAL));
        flags.set(PortFlags::MONITOR, props.get_bool(keys::PORT_MONITOR));
        flags.set(PortFlags::CONTROL, props.get_bool(keys::PORT_CONTROL));
        self.flags = flags;
    }
}

/// A mirrored remote link
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub id: ObjectId,
    pub serial: Serial,
    pub output: ObjectId,
    pub input: ObjectId,
    pub pending_sync: bool,
}

impl LinkRecord {
    pub(crate) fn from_props(id: ObjectId, serial: Serial, props: &Properties) -> Option<Self> {
        Some(Self {
            id,
            serial,
            output: props.get_id(keys::LINK_OUTPUT_PORT)?,
            input: props.get_id(keys::LINK_INPUT_PORT)?,
            pending_sync: true,
        })
    }
}

/// Any mirrored object
#[derive(Debug, Clone)]
pub enum RemoteObject {
    Node(NodeRecord),
    Port(PortRecord),
    Link(LinkRecord),
}

impl RemoteObject {
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Node(node) => node.id,
            Self::Port(port) => port.id,
            Self::Link(link) => link.id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Node(_) => ObjectKind::Node,
            Self::Port(_) => ObjectKind::Port,
            Self::Link(_) => ObjectKind::Link,
        }
    }

    pub fn serial(&self) -> Serial {
        match self {
            Self::Node(node) => node.serial,
            Self::Port(port) => port.serial,
            Self::Link(link) => link.serial,
        }
    }

    pub(crate) fn set_pending_sync(&mut self, pending: bool) {
        match self {
            Self::Node(node) => node.pending_sync = pending,
            Self::Port(port) => port.pending_sync = pending,
            Self::Link(link) => link.pending_sync = pending,
        }
    }
}
