//! Core graph types shared by the mirror, the patchbay and the ranker
//!
//! Everything here is plain data: ids, direction/category enums, flag sets,
//! and the port type-tag registry owned by the mirror.

use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Remote object id as assigned by the routing service
///
/// Ids may be recycled upstream once an object is gone, so they are never
/// used alone to decide identity across passes (see `Serial`).
pub type ObjectId = u32;

/// Monotonic creation serial assigned by the mirror to each appeared record
pub type Serial = u64;

/// The closed set of remote object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Node,
    Port,
    Link,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Port => write!(f, "port"),
            Self::Link => write!(f, "link"),
        }
    }
}

/// Signal direction of a node or port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Directionality {
    /// Not known yet (or the remote never says)
    #[default]
    Unset,
    /// Consumes signal (sink, playback, capture-stream input)
    Input,
    /// Produces signal (source, capture, playback-stream output)
    Output,
    /// Both sides on the same object
    Duplex,
}

impl Directionality {
    /// Parse a port direction value ("in"/"out", case-insensitive)
    pub fn from_port_direction(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "in" | "input" => Self::Input,
            "out" | "output" => Self::Output,
            _ => Self::Unset,
        }
    }

    /// Derive a node direction from a media class such as "Audio/Sink",
    /// "Stream/Output/Audio" or "Audio/Duplex"
    pub fn from_media_class(class: &str) -> Self {
        let class = class.to_ascii_lowercase();
        if class.contains("duplex") || class.contains("bridge") {
            Self::Duplex
        } else if class.contains("sink") || class.contains("input") {
            Self::Input
        } else if class.contains("source") || class.contains("output") {
            Self::Output
        } else {
            Self::Unset
        }
    }

    pub fn includes_input(&self) -> bool {
        matches!(self, Self::Input | Self::Duplex)
    }

    pub fn includes_output(&self) -> bool {
        matches!(self, Self::Output | Self::Duplex)
    }
}

impl fmt::Display for Directionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Duplex => write!(f, "duplex"),
        }
    }
}

bitflags! {
    /// Media carried by a node, as announced by its media class
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct MediaCategory: u8 {
        const AUDIO = 0b001;
        const VIDEO = 0b010;
        const MIDI  = 0b100;
    }
}

impl MediaCategory {
    /// Derive the category set from a media class string
    pub fn from_media_class(class: &str) -> Self {
        let class = class.to_ascii_lowercase();
        let mut category = Self::empty();
        if class.contains("audio") {
            category |= Self::AUDIO;
        }
        if class.contains("video") {
            category |= Self::VIDEO;
        }
        if class.contains("midi") {
            category |= Self::MIDI;
        }
        category
    }
}

bitflags! {
    /// Port property flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PortFlags: u8 {
        const PHYSICAL = 0b0001;
        const TERMINAL = 0b0010;
        const MONITOR  = 0b0100;
        const CONTROL  = 0b1000;
    }
}

/// Coarse port media kind, used by patchbay rules and layout ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortKind {
    Audio,
    Midi,
    Video,
    Other,
}

impl PortKind {
    /// Symbolic tag used in the rule file
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Midi => "midi",
            Self::Video => "video",
            Self::Other => "other",
        }
    }

    /// Classify a remote type tag (e.g. "32 bit float mono audio", "8 bit raw midi")
    pub fn classify(type_tag: &str) -> Self {
        let tag = type_tag.to_ascii_lowercase();
        if tag.contains("audio") {
            Self::Audio
        } else if tag.contains("midi") || tag.contains("ump") {
            Self::Midi
        } else if tag.contains("video") {
            Self::Video
        } else {
            Self::Other
        }
    }
}

impl FromStr for PortKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "midi" => Ok(Self::Midi),
            "video" => Ok(Self::Video),
            "other" => Ok(Self::Other),
            _ => Err(format!("unknown port type tag: {}", s)),
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which subsystem a node belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeCategory {
    /// Objects mirrored from the remote routing service
    #[default]
    RemoteService,
    /// Objects of the legacy local MIDI subsystem (driven elsewhere)
    LegacyMidiService,
}

impl NodeCategory {
    /// Symbolic tag used in the rule file
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RemoteService => "remote-service",
            Self::LegacyMidiService => "legacy-midi-service",
        }
    }
}

impl FromStr for NodeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote-service" => Ok(Self::RemoteService),
            "legacy-midi-service" => Ok(Self::LegacyMidiService),
            _ => Err(format!("unknown node category tag: {}", s)),
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Side of a presentation node
///
/// A Duplex remote node is shown as one Input and one Output node; a node
/// whose direction is unknown is shown once with both port sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeMode {
    Input,
    Output,
    Both,
}

impl NodeMode {
    /// Presentation side for a port of the given direction on a node
    pub fn for_port(node: Directionality, port: Directionality) -> Option<Self> {
        let side = match port {
            Directionality::Input => Self::Input,
            Directionality::Output => Self::Output,
            _ => return None,
        };
        Some(match node {
            Directionality::Unset => Self::Both,
            _ => side,
        })
    }
}

/// Interned port type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortTypeId(pub u16);

impl PortTypeId {
    /// Shared by every tag past the registry's capacity; always `PortKind::Other`
    pub const OVERFLOW: Self = Self(u16::MAX);
}

/// Registry of port type tags
///
/// Constructed once per mirror and owned by it; interning is stable for the
/// registry's lifetime so type ids can be used as presentation keys.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_tag: HashMap<String, PortTypeId>,
    entries: Vec<(String, PortKind)>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a type tag, returning its stable id
    pub fn intern(&mut self, tag: &str) -> PortTypeId {
        if let Some(id) = self.by_tag.get(tag) {
            return *id;
        }
        let Some(id) = u16::try_from(self.entries.len())
            .ok()
            .filter(|index| *index != PortTypeId::OVERFLOW.0)
            .map(PortTypeId)
        else {
            log::warn!("[MIRROR] Port type registry full, treating '{}' as other", tag);
            return PortTypeId::OVERFLOW;
        };
        self.entries.push((tag.to_string(), PortKind::classify(tag)));
        self.by_tag.insert(tag.to_string(), id);
        id
    }

    /// Look up an already interned tag
    pub fn get(&self, tag: &str) -> Option<PortTypeId> {
        self.by_tag.get(tag).copied()
    }

    pub fn kind(&self, id: PortTypeId) -> PortKind {
        self.entries
            .get(id.0 as usize)
            .map(|(_, kind)| *kind)
            .unwrap_or(PortKind::Other)
    }

    pub fn tag(&self, id: PortTypeId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|(tag, _)| tag.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directionality_from_media_class() {
        assert_eq!(Directionality::from_media_class("Audio/Sink"), Directionality::Input);
        assert_eq!(Directionality::from_media_class("Audio/Source"), Directionality::Output);
        assert_eq!(
            Directionality::from_media_class("Stream/Output/Audio"),
            Directionality::Output
        );
        assert_eq!(Directionality::from_media_class("Audio/Duplex"), Directionality::Duplex);
        assert_eq!(Directionality::from_media_class("Midi/Bridge"), Directionality::Duplex);
        assert_eq!(Directionality::from_media_class("Audio/Filter"), Directionality::Unset);
    }

    #[test]
    fn test_media_category_bits() {
        let category = MediaCategory::from_media_class("Midi/Bridge");
        assert_eq!(category, MediaCategory::MIDI);

        let category = MediaCategory::from_media_class("Audio/Video/Source");
        assert!(category.contains(MediaCategory::AUDIO | MediaCategory::VIDEO));
        assert!(!category.contains(MediaCategory::MIDI));
    }

    #[test]
    fn test_port_kind_tags() {
        assert_eq!(PortKind::classify("32 bit float mono audio"), PortKind::Audio);
        assert_eq!(PortKind::classify("8 bit raw midi"), PortKind::Midi);
        assert_eq!(PortKind::classify("32 bit raw UMP"), PortKind::Midi);
        assert_eq!(PortKind::classify("something else"), PortKind::Other);

        for kind in [PortKind::Audio, PortKind::Midi, PortKind::Video, PortKind::Other] {
            assert_eq!(kind.tag().parse::<PortKind>().unwrap(), kind);
        }
        assert!("surround".parse::<PortKind>().is_err());
    }

    #[test]
    fn test_node_mode_for_port() {
        let duplex = Directionality::Duplex;
        assert_eq!(NodeMode::for_port(duplex, Directionality::Input), Some(NodeMode::Input));
        assert_eq!(NodeMode::for_port(duplex, Directionality::Output), Some(NodeMode::Output));
        assert_eq!(
            NodeMode::for_port(Directionality::Unset, Directionality::Output),
            Some(NodeMode::Both)
        );
        assert_eq!(NodeMode::for_port(duplex, Directionality::Unset), None);
    }

    #[test]
    fn test_type_registry_interning_is_stable() {
        let mut registry = TypeRegistry::new();
        let audio = registry.intern("32 bit float mono audio");
        let midi = registry.intern("8 bit raw midi");

        assert_ne!(audio, midi);
        assert_eq!(registry.intern("32 bit float mono audio"), audio);
        assert_eq!(registry.kind(audio), PortKind::Audio);
        assert_eq!(registry.kind(midi), PortKind::Midi);
        assert_eq!(registry.tag(midi), Some("8 bit raw midi"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_type_registry_overflow_maps_to_other() {
        let mut registry = TypeRegistry::new();
        let midi = registry.intern("8 bit raw midi");
        for n in 1..u16::MAX {
            registry.intern(&format!("custom audio {}", n));
        }
        assert_eq!(registry.len(), usize::from(u16::MAX));

        let late = registry.intern("late midi");
        assert_eq!(late, PortTypeId::OVERFLOW);
        assert_eq!(registry.kind(late), PortKind::Other);
        assert_eq!(registry.tag(late), None);
        assert_eq!(registry.intern("another late audio"), PortTypeId::OVERFLOW);

        // Earlier tags keep their own ids and kinds
        assert_eq!(registry.intern("8 bit raw midi"), midi);
        assert_eq!(registry.kind(midi), PortKind::Midi);
    }
}
