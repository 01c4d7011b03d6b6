//! Patchbay Reconciler
//!
//! Keeps a set of connection rules and, on each scan, works out which
//! connections to create or tear down so the presentation graph matches
//! them. A scan only plans; the driving loop issues the plan through the
//! mirror and the next scan sees the result.
//!
//! Modes:
//! - inactive: rules are dormant (unless `auto_disconnect` is set, in which
//!   case ruled connections are removed)
//! - active: missing ruled connections are created
//! - active + exclusive: connections competing for a ruled endpoint are
//!   also removed; a per-rule override can switch exclusivity either way

mod file;
mod rule;

pub use file::{load_rules, parse_rules, render_rules, save_rules, RuleSet, RULE_FILE_VERSION};
pub use rule::PatchbayRule;

use crate::config::PatchbaySettings;
use crate::error::PatchbayFileError;
use crate::presentation::{EdgeKey, PortKey, PresentationGraph, PresentationNode};
use crate::types::{Directionality, NodeMode};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Connections a scan wants changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPlan {
    pub connect: Vec<EdgeKey>,
    pub disconnect: Vec<EdgeKey>,
}

impl ScanPlan {
    pub fn is_empty(&self) -> bool {
        self.connect.is_empty() && self.disconnect.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Patchbay {
    rules: BTreeSet<PatchbayRule>,
    exclusive_overrides: BTreeMap<PatchbayRule, bool>,
    active: bool,
    exclusive: bool,
    auto_disconnect: bool,
}

impl Patchbay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &PatchbaySettings) -> Self {
        Self {
            active: settings.active,
            exclusive: settings.exclusive,
            auto_disconnect: settings.auto_disconnect,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn set_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    pub fn auto_disconnect(&self) -> bool {
        self.auto_disconnect
    }

    pub fn set_auto_disconnect(&mut self, auto_disconnect: bool) {
        self.auto_disconnect = auto_disconnect;
    }

    /// Whether scans can produce anything at all
    pub fn is_armed(&self) -> bool {
        !self.rules.is_empty() && (self.active || self.auto_disconnect)
    }

    pub fn rules(&self) -> impl Iterator<Item = &PatchbayRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, rule: &PatchbayRule) -> bool {
        self.rules.contains(rule)
    }

    /// Add a rule; false if it was already present
    pub fn add_rule(&mut self, rule: PatchbayRule) -> bool {
        self.rules.insert(rule)
    }

    /// Remove a rule (and its override); false if it was absent
    pub fn remove_rule(&mut self, rule: &PatchbayRule) -> bool {
        self.exclusive_overrides.remove(rule);
        self.rules.remove(rule)
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.exclusive_overrides.clear();
    }

    /// Per-rule exclusivity; `None` follows the global mode
    pub fn set_exclusive_override(&mut self, rule: &PatchbayRule, exclusive: Option<bool>) {
        match exclusive {
            Some(value) if self.rules.contains(rule) => {
                self.exclusive_overrides.insert(rule.clone(), value);
            }
            _ => {
                self.exclusive_overrides.remove(rule);
            }
        }
    }

    pub fn exclusive_override(&self, rule: &PatchbayRule) -> Option<bool> {
        self.exclusive_overrides.get(rule).copied()
    }

    fn rule_is_exclusive(&self, rule: &PatchbayRule) -> bool {
        self.exclusive_override(rule).unwrap_or(self.exclusive)
    }

    /// Operator connected two ports: remember it as a rule
    pub fn connect_ports(&mut self, graph: &PresentationGraph, source: &PortKey, dest: &PortKey) -> bool {
        match PatchbayRule::for_ports(graph, source, dest) {
            Some(rule) => self.add_rule(rule),
            None => false,
        }
    }

    /// Operator disconnected two ports: forget the matching rule
    pub fn disconnect_ports(&mut self, graph: &PresentationGraph, source: &PortKey, dest: &PortKey) -> bool {
        match PatchbayRule::for_ports(graph, source, dest) {
            Some(rule) => self.remove_rule(&rule),
            None => false,
        }
    }

    /// Replace the rule set with the graph's current connections
    ///
    /// Overrides survive for rules that are still present.
    pub fn snapshot(&mut self, graph: &PresentationGraph) -> usize {
        self.rules = graph
            .edges()
            .filter_map(|edge| PatchbayRule::for_edge(graph, &edge.key))
            .collect();
        let rules = &self.rules;
        self.exclusive_overrides.retain(|rule, _| rules.contains(rule));
        log::info!("[PATCHBAY] Snapshot captured {} rules", self.rules.len());
        self.rules.len()
    }

    /// Whether some rule describes this edge
    pub fn is_ruled(&self, graph: &PresentationGraph, edge: &EdgeKey) -> bool {
        PatchbayRule::for_edge(graph, edge).is_some_and(|rule| self.rules.contains(&rule))
    }

    /// Plan the connections needed to satisfy the rules
    ///
    /// Rules whose endpoints are absent are skipped without comment; they
    /// apply again once the endpoints show up. A connection kept by any rule
    /// is never also scheduled for removal.
    pub fn scan(&self, graph: &PresentationGraph) -> ScanPlan {
        if !self.active && !self.auto_disconnect {
            return ScanPlan::default();
        }

        let mut connect = BTreeSet::new();
        let mut disconnect = BTreeSet::new();
        let mut keep = BTreeSet::new();

        for rule in &self.rules {
            let outputs = resolve_ports(graph, rule, Directionality::Output);
            let inputs = resolve_ports(graph, rule, Directionality::Input);
            let exclusive = self.active && self.rule_is_exclusive(rule);

            for output in &outputs {
                for input in &inputs {
                    let pair = EdgeKey {
                        source: *output,
                        dest: *input,
                    };
                    let exists = graph.edge(&pair).is_some();
                    if self.active {
                        keep.insert(pair);
                        if !exists {
                            connect.insert(pair);
                        }
                    } else if exists {
                        disconnect.insert(pair);
                    }
                }
            }

            if exclusive && !outputs.is_empty() && !inputs.is_empty() {
                for port in outputs.iter().chain(inputs.iter()) {
                    disconnect.extend(graph.edges_at(port).map(|edge| edge.key));
                }
            }
        }

        disconnect.retain(|edge| !keep.contains(edge));
        let plan = ScanPlan {
            connect: connect.into_iter().collect(),
            disconnect: disconnect.into_iter().collect(),
        };
        if !plan.is_empty() {
            log::debug!(
                "[PATCHBAY] Scan: {} to connect, {} to disconnect",
                plan.connect.len(),
                plan.disconnect.len()
            );
        }
        plan
    }

    /// Load rules (and overrides) from a rule file, replacing the current set
    pub fn load(&mut self, path: &Path) -> Result<usize, PatchbayFileError> {
        let loaded = load_rules(path)?;
        self.rules = loaded.rules;
        self.exclusive_overrides = loaded.exclusive_overrides;
        log::info!("[PATCHBAY] Loaded {} rules from {:?}", self.rules.len(), path);
        Ok(self.rules.len())
    }

    pub fn save(&self, path: &Path) -> Result<(), PatchbayFileError> {
        save_rules(
            path,
            &RuleSet {
                rules: self.rules.clone(),
                exclusive_overrides: self.exclusive_overrides.clone(),
            },
        )?;
        log::info!("[PATCHBAY] Saved {} rules to {:?}", self.rules.len(), path);
        Ok(())
    }
}

/// Nodes named by one side of a rule, strict side first, then "both" nodes
fn resolve_nodes<'a>(
    graph: &'a PresentationGraph,
    rule: &PatchbayRule,
    side: Directionality,
) -> Vec<&'a PresentationNode> {
    let (name, strict) = match side {
        Directionality::Output => (&rule.output_node, NodeMode::Output),
        _ => (&rule.input_node, NodeMode::Input),
    };
    [strict, NodeMode::Both]
        .into_iter()
        .map(|mode| graph.find_nodes_by_name(name, mode, rule.node_category))
        .find(|nodes| !nodes.is_empty())
        .unwrap_or_default()
}

fn resolve_ports(graph: &PresentationGraph, rule: &PatchbayRule, side: Directionality) -> Vec<PortKey> {
    let port_name = match side {
        Directionality::Output => &rule.output_port,
        _ => &rule.input_port,
    };
    resolve_nodes(graph, rule, side)
        .into_iter()
        .flat_map(|node| graph.ports_of(&node.key))
        .filter(|port| port.key.mode == side && port.kind == rule.port_kind && port.name == *port_name)
        .map(|port| port.key)
        .collect()
}
