//! Mark-and-sweep from mirror tables to the presentation graph

use super::naming::display_label;
use super::objects::{NodeRecord, PortRecord};
use super::tables::MirrorTables;
use crate::presentation::{
    EdgeKey, GraphObserver, ItemKey, NodeKey, PortKey, PresentationEdge, PresentationGraph,
    PresentationNode, PresentationPort, SyncReport,
};
use crate::types::{NodeCategory, NodeMode, ObjectId, PortKind};
use regex::Regex;

/// Options applied by every pass
pub(crate) struct SyncOptions<'a> {
    pub filters: &'a [Regex],
    pub prefer_nicknames: bool,
}

/// One reconciliation pass
///
/// Marks every item that still has a presentable counterpart in `tables`
/// (creating or refreshing it as needed) and retires the rest. Items whose
/// generation no longer matches the record's serial are rebuilt, never
/// reused.
pub(crate) fn reconcile(
    tables: &mut MirrorTables,
    graph: &mut PresentationGraph,
    options: &SyncOptions<'_>,
    observer: &mut dyn GraphObserver,
) -> SyncReport {
    let mut report = SyncReport::default();
    graph.clear_marks();

    let mut shown: Vec<ObjectId> = Vec::new();
    for node in tables.nodes() {
        if !node.presentable() || is_filtered(&node.name, options.filters) {
            continue;
        }
        for port_id in &node.ports {
            let Some(port) = tables.port(*port_id) else {
                continue;
            };
            let Some(mode) = NodeMode::for_port(node.directionality, port.directionality) else {
                continue;
            };
            let node_key = NodeKey {
                id: node.id,
                mode,
                category: NodeCategory::RemoteService,
            };
            let kind = tables.types().kind(port.type_id);
            mark_node(graph, node_key, node, options, observer, &mut report);
            mark_port(graph, node_key, port, kind, observer, &mut report);
            shown.push(node.id);
        }
    }

    for link in tables.links() {
        let (Some(output), Some(input)) = (tables.port(link.output), tables.port(link.input)) else {
            continue;
        };
        let key = EdgeKey {
            source: port_key(output),
            dest: port_key(input),
        };
        let endpoints_marked = [key.source, key.dest]
            .iter()
            .all(|port| graph.port(port).is_some_and(|p| p.marked));
        if !endpoints_marked {
            continue;
        }
        match graph.edge_mut(&key) {
            Some(edge) if edge.generation == link.serial => {
                edge.marked = true;
                continue;
            }
            // Two remote links between the same ports: the first one wins
            Some(edge) if edge.marked => continue,
            Some(_) => graph.remove_edge(&key, observer, &mut report),
            None => {}
        }
        let draw_order = graph.next_draw_order();
        graph.insert_edge(PresentationEdge {
            key,
            link: link.id,
            generation: link.serial,
            draw_order,
            marked: true,
        });
        report.added(observer, ItemKey::Edge(key));
    }

    graph.sweep(observer, &mut report);

    for id in shown {
        if let Some(node) = tables.node_mut(id) {
            node.exposed = true;
        }
    }

    if !report.is_empty() {
        log::debug!(
            "[SYNC] Pass done: +{} ~{} -{}",
            report.added,
            report.updated,
            report.removed
        );
    }
    report
}

fn is_filtered(name: &str, filters: &[Regex]) -> bool {
    filters.iter().any(|re| re.is_match(name))
}

fn port_key(port: &PortRecord) -> PortKey {
    PortKey {
        id: port.id,
        mode: port.directionality,
        type_id: port.type_id,
    }
}

fn mark_node(
    graph: &mut PresentationGraph,
    key: NodeKey,
    node: &NodeRecord,
    options: &SyncOptions<'_>,
    observer: &mut dyn GraphObserver,
    report: &mut SyncReport,
) {
    let base = if options.prefer_nicknames && !node.nickname.is_empty() {
        &node.nickname
    } else {
        &node.name
    };
    let label = display_label(base, node.dedupe_index);

    match graph.node_mut(&key) {
        Some(item) if item.generation == node.serial => {
            if !item.marked {
                item.marked = true;
                let stale = item.name != node.name
                    || item.nickname != node.nickname
                    || item.label != label
                    || item.dedupe_index != node.dedupe_index
                    || item.media != node.category;
                if stale {
                    item.name = node.name.clone();
                    item.nickname = node.nickname.clone();
                    item.label = label;
                    item.dedupe_index = node.dedupe_index;
                    item.media = node.category;
                    report.updated(observer, ItemKey::Node(key));
                }
            }
            return;
        }
        // Recycled id: retire the old item and everything on it
        Some(_) => graph.remove_node(&key, observer, report),
        None => {}
    }

    let draw_order = graph.next_draw_order();
    graph.insert_node(PresentationNode {
        key,
        name: node.name.clone(),
        nickname: node.nickname.clone(),
        label,
        dedupe_index: node.dedupe_index,
        media: node.category,
        ports: Default::default(),
        generation: node.serial,
        draw_order,
        marked: true,
    });
    report.added(observer, ItemKey::Node(key));
}

fn mark_port(
    graph: &mut PresentationGraph,
    node_key: NodeKey,
    port: &PortRecord,
    kind: PortKind,
    observer: &mut dyn GraphObserver,
    report: &mut SyncReport,
) {
    let key = port_key(port);
    match graph.port_mut(&key) {
        Some(item) if item.generation == port.serial && item.node == node_key => {
            item.marked = true;
            if item.name != port.name || item.flags != port.flags || item.kind != kind {
                item.name = port.name.clone();
                item.flags = port.flags;
                item.kind = kind;
                report.updated(observer, ItemKey::Port(key));
            }
            return;
        }
        Some(_) => graph.remove_port(&key, observer, report),
        None => {}
    }

    let draw_order = graph.next_draw_order();
    graph.insert_port(PresentationPort {
        key,
        node: node_key,
        name: port.name.clone(),
        kind,
        flags: port.flags,
        generation: port.serial,
        draw_order,
        marked: true,
    });
    report.added(observer, ItemKey::Port(key));
}
