//! Patchbay rules

use crate::presentation::{EdgeKey, PortKey, PresentationGraph};
use crate::types::{NodeCategory, PortKind};
use std::fmt;

/// "Always connect this named output port to that named input port"
///
/// Names are node identity names (not display labels), so a rule applies to
/// every live node carrying that name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchbayRule {
    pub node_category: NodeCategory,
    pub port_kind: PortKind,
    pub output_node: String,
    pub output_port: String,
    pub input_node: String,
    pub input_port: String,
}

impl PatchbayRule {
    pub fn new(
        node_category: NodeCategory,
        port_kind: PortKind,
        output: (&str, &str),
        input: (&str, &str),
    ) -> Self {
        Self {
            node_category,
            port_kind,
            output_node: output.0.to_string(),
            output_port: output.1.to_string(),
            input_node: input.0.to_string(),
            input_port: input.1.to_string(),
        }
    }

    /// Rule describing a connection between two presentation ports
    pub fn for_ports(graph: &PresentationGraph, source: &PortKey, dest: &PortKey) -> Option<Self> {
        let out_port = graph.port(source)?;
        let in_port = graph.port(dest)?;
        let out_node = graph.node(&out_port.node)?;
        let in_node = graph.node(&in_port.node)?;
        Some(Self {
            node_category: out_node.key.category,
            port_kind: out_port.kind,
            output_node: out_node.name.clone(),
            output_port: out_port.name.clone(),
            input_node: in_node.name.clone(),
            input_port: in_port.name.clone(),
        })
    }

    /// Rule describing an existing edge
    pub fn for_edge(graph: &PresentationGraph, edge: &EdgeKey) -> Option<Self> {
        Self::for_ports(graph, &edge.source, &edge.dest)
    }
}

impl fmt::Display for PatchbayRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}:{} -> {}:{}",
            self.node_category,
            self.port_kind,
            self.output_node,
            self.output_port,
            self.input_node,
            self.input_port
        )
    }
}
