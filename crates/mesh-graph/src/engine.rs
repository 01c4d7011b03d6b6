//! Driving loop glue
//!
//! [`PatchbayEngine`] owns the mirror and the patchbay and runs one
//! drain → reconcile → scan → apply cycle per [`PatchbayEngine::tick`].
//! The remote's answer to applied intents comes back through the mirror;
//! the follow-up scan that confirms convergence runs on the next tick.

use crate::config::EngineConfig;
use crate::error::{MirrorResult, PatchbayFileError};
use crate::mirror::{ChangeListener, GraphMirror};
use crate::patchbay::{Patchbay, ScanPlan};
use crate::presentation::{GraphObserver, NodeKey, PortKey, PresentationGraph, SyncReport};
use crate::ranker::{rank_presentation, Ranked};
use crate::remote::RemoteService;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sync: SyncReport,
    /// Intents the remote acknowledged
    pub connected: usize,
    pub disconnected: usize,
    /// Intents that failed (logged)
    pub failed: usize,
    /// Intents were applied; the confirming scan runs next tick
    pub deferred: bool,
}

impl TickReport {
    /// Whether the tick changed anything
    pub fn is_idle(&self) -> bool {
        self.sync.is_empty() && self.connected == 0 && self.disconnected == 0
    }
}

/// Requests a patchbay scan from any thread
///
/// A request made while the engine is applying intents never interrupts
/// them; it is picked up by the next tick.
#[derive(Debug, Clone, Default)]
pub struct ScanTrigger {
    pending: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
}

impl ScanTrigger {
    /// Ask for a scan; returns true if it was deferred behind a busy tick
    pub fn request(&self) -> bool {
        self.pending.store(true, Ordering::Release);
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }
}

pub struct PatchbayEngine {
    mirror: GraphMirror,
    patchbay: Patchbay,
    rules_path: PathBuf,
    /// Scan on the next tick even if the pass changed nothing
    scans: ScanTrigger,
}

impl PatchbayEngine {
    /// Open a mirror on `service` and wrap it
    pub fn open<S: RemoteService + 'static>(service: S, config: &EngineConfig) -> MirrorResult<Self> {
        let mirror = GraphMirror::open(service, config)?;
        Ok(Self::new(mirror, config))
    }

    pub fn new(mirror: GraphMirror, config: &EngineConfig) -> Self {
        let engine = Self {
            mirror,
            patchbay: Patchbay::from_settings(&config.patchbay),
            rules_path: config.patchbay.rules_path(),
            scans: ScanTrigger::default(),
        };
        engine.scans.request();
        engine
    }

    pub fn mirror(&self) -> &GraphMirror {
        &self.mirror
    }

    pub fn presentation(&self) -> &PresentationGraph {
        self.mirror.presentation()
    }

    pub fn patchbay(&self) -> &Patchbay {
        &self.patchbay
    }

    /// Mutable patchbay access; the next tick rescans
    pub fn patchbay_mut(&mut self) -> &mut Patchbay {
        self.scans.request();
        &mut self.patchbay
    }

    pub fn changed(&self) -> ChangeListener {
        self.mirror.changed()
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    pub fn set_rules_path(&mut self, path: PathBuf) {
        self.rules_path = path;
    }

    /// Ask for a scan on the next tick
    pub fn request_scan(&self) {
        self.scans.request();
    }

    /// Handle for requesting scans from elsewhere (UI, signal handlers)
    pub fn scan_trigger(&self) -> ScanTrigger {
        self.scans.clone()
    }

    /// One reconciliation pass, then one scan if rules are armed
    pub fn tick(&mut self, observer: &mut dyn GraphObserver) -> TickReport {
        let mut report = TickReport {
            sync: self.mirror.sync_to_presentation(observer),
            ..TickReport::default()
        };

        let rescan = self.scans.take();
        if !self.patchbay.is_armed() || (report.sync.is_empty() && !rescan) {
            return report;
        }

        let plan = self.patchbay.scan(self.mirror.presentation());
        if plan.is_empty() {
            return report;
        }

        self.scans.set_busy(true);
        self.apply(&plan, &mut report);
        self.scans.set_busy(false);

        // Changes caused by the plan are not rescanned in this tick; the
        // next one confirms them once they are reconciled
        self.scans.request();
        report.deferred = true;
        report
    }

    fn apply(&mut self, plan: &ScanPlan, report: &mut TickReport) {
        for edge in &plan.disconnect {
            match self.mirror.connect(edge.source.id, edge.dest.id, false) {
                Ok(()) => report.disconnected += 1,
                Err(e) => {
                    log::warn!(
                        "[PATCHBAY] Could not disconnect {} -> {}: {}",
                        edge.source.id,
                        edge.dest.id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        for edge in &plan.connect {
            match self.mirror.connect(edge.source.id, edge.dest.id, true) {
                Ok(()) => report.connected += 1,
                Err(e) => {
                    log::warn!(
                        "[PATCHBAY] Could not connect {} -> {}: {}",
                        edge.source.id,
                        edge.dest.id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        log::debug!(
            "[PATCHBAY] Applied plan: +{} -{} ({} failed)",
            report.connected,
            report.disconnected,
            report.failed
        );
    }

    /// Operator edit: link or unlink two presented ports
    ///
    /// In active mode the matching rule is recorded (or forgotten) so the
    /// patchbay does not undo the edit.
    pub fn connect_ports(&mut self, source: &PortKey, dest: &PortKey, connect: bool) -> MirrorResult<()> {
        self.mirror.connect(source.id, dest.id, connect)?;
        if self.patchbay.is_active() {
            let graph = self.mirror.presentation();
            let changed = if connect {
                self.patchbay.connect_ports(graph, source, dest)
            } else {
                self.patchbay.disconnect_ports(graph, source, dest)
            };
            if changed {
                log::debug!(
                    "[PATCHBAY] Rule {} for {} -> {}",
                    if connect { "added" } else { "removed" },
                    source.id,
                    dest.id
                );
            }
        }
        self.scans.request();
        Ok(())
    }

    /// Replace the rules with the current connections
    pub fn snapshot(&mut self) -> usize {
        self.scans.request();
        self.patchbay.snapshot(self.mirror.presentation())
    }

    /// Load rules from the configured rule file
    pub fn load_rules(&mut self) -> Result<usize, PatchbayFileError> {
        let count = self.patchbay.load(&self.rules_path)?;
        self.scans.request();
        Ok(count)
    }

    /// Save rules to the configured rule file
    pub fn save_rules(&self) -> Result<(), PatchbayFileError> {
        self.patchbay.save(&self.rules_path)
    }

    /// Layout order of the presented nodes
    pub fn rank(&self) -> Vec<Ranked<NodeKey>> {
        rank_presentation(self.mirror.presentation())
    }

    pub fn close(&mut self) {
        self.mirror.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatchbaySettings;
    use crate::error::MirrorError;
    use crate::mirror::Notification;
    use crate::patchbay::PatchbayRule;
    use crate::error::TransportError;
    use crate::remote::{
        keys, ObjectBinding, Properties, RemoteEvent, SimulatedRemote, SimulatedService,
    };
    use crate::types::{Directionality, NodeCategory, ObjectId, ObjectKind, PortKind};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const AUDIO: &str = "32 bit float mono audio";

    fn config(active: bool, exclusive: bool, rules_path: Option<PathBuf>) -> EngineConfig {
        EngineConfig {
            reconnect_backoff_ms: 20,
            poll_interval_ms: 5,
            connect_timeout_ms: 2000,
            patchbay: PatchbaySettings {
                rules_path,
                active,
                exclusive,
                auto_disconnect: false,
            },
            ..EngineConfig::default()
        }
    }

    fn a_to_b() -> PatchbayRule {
        PatchbayRule::new(
            NodeCategory::RemoteService,
            PortKind::Audio,
            ("A", "out"),
            ("B", "in"),
        )
    }

    /// A:out, B:in, C:in
    fn sample_remote(remote: &SimulatedRemote) -> (ObjectId, ObjectId, ObjectId) {
        let a = remote.add_node("A", "Audio/Source");
        let a_out = remote.add_port(a, "out", Directionality::Output, AUDIO);
        let b = remote.add_node("B", "Audio/Sink");
        let b_in = remote.add_port(b, "in", Directionality::Input, AUDIO);
        let c = remote.add_node("C", "Audio/Sink");
        let c_in = remote.add_port(c, "in", Directionality::Input, AUDIO);
        (a_out, b_in, c_in)
    }

    /// Tick until `done` holds or two seconds pass
    fn run_until(engine: &mut PatchbayEngine, done: impl Fn(&PatchbayEngine) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            engine.changed().wait(Duration::from_millis(20));
            engine.tick(&mut ());
            if done(engine) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_exclusive_rule_converges_on_remote() {
        let (service, remote) = SimulatedService::new();
        let (a_out, b_in, c_in) = sample_remote(&remote);
        remote.add_link(a_out, c_in);

        let mut engine = PatchbayEngine::open(service, &config(true, true, None)).unwrap();
        engine.patchbay_mut().add_rule(a_to_b());

        assert!(run_until(&mut engine, |_| remote.links() == vec![(a_out, b_in)]));
        assert!(run_until(&mut engine, |e| e.presentation().edge_count() == 1));

        // Converged: further ticks leave the remote alone
        for _ in 0..3 {
            let report = engine.tick(&mut ());
            assert_eq!(report.connected + report.disconnected, 0);
        }
        assert_eq!(remote.links(), vec![(a_out, b_in)]);
    }

    #[test]
    fn test_inactive_rules_leave_remote_alone() {
        let (service, remote) = SimulatedService::new();
        let (a_out, _, c_in) = sample_remote(&remote);
        remote.add_link(a_out, c_in);

        let mut engine = PatchbayEngine::open(service, &config(false, true, None)).unwrap();
        engine.patchbay_mut().add_rule(a_to_b());

        assert!(run_until(&mut engine, |e| e.presentation().edge_count() == 1));
        let report = engine.tick(&mut ());
        assert_eq!(report.connected + report.disconnected + report.failed, 0);
        assert_eq!(remote.links(), vec![(a_out, c_in)]);
    }

    #[test]
    fn test_operator_edits_become_rules() {
        let (service, remote) = SimulatedService::new();
        let (a_out, _, c_in) = sample_remote(&remote);
        let mut engine = PatchbayEngine::open(service, &config(true, false, None)).unwrap();
        assert!(run_until(&mut engine, |e| e.presentation().port_count() == 3));

        let port = |engine: &PatchbayEngine, id: ObjectId| {
            engine
                .presentation()
                .ports()
                .find(|p| p.key.id == id)
                .map(|p| p.key)
                .unwrap()
        };
        let (src, dst) = (port(&engine, a_out), port(&engine, c_in));

        engine.connect_ports(&src, &dst, true).unwrap();
        assert_eq!(remote.links(), vec![(a_out, c_in)]);
        let expected = PatchbayRule::new(
            NodeCategory::RemoteService,
            PortKind::Audio,
            ("A", "out"),
            ("C", "in"),
        );
        assert!(engine.patchbay().contains(&expected));

        engine.connect_ports(&src, &dst, false).unwrap();
        assert!(remote.links().is_empty());
        assert!(engine.patchbay().is_empty());
    }

    #[test]
    fn test_failed_intents_are_counted_not_raised() {
        // Detached mirror: every intent fails with NotOpen
        let config = config(true, false, None);
        let mut engine = PatchbayEngine::new(GraphMirror::detached(&config), &config);
        engine.patchbay_mut().add_rule(a_to_b());

        let event = |id, kind, props| Notification::Event(RemoteEvent::Appeared { id, kind, props });
        let node = |name: &str, class: &str| {
            Properties::new()
                .with(keys::NODE_NAME, name)
                .with(keys::MEDIA_CLASS, class)
        };
        let port = |node: ObjectId, name: &str, dir: &str| {
            Properties::new()
                .with(keys::NODE_ID, node.to_string())
                .with(keys::PORT_NAME, name)
                .with(keys::PORT_DIRECTION, dir)
                .with(keys::FORMAT_DSP, AUDIO)
        };
        let mirror = &mut engine.mirror;
        mirror.apply(event(10, ObjectKind::Node, node("A", "Audio/Source")));
        mirror.apply(event(11, ObjectKind::Port, port(10, "out", "out")));
        mirror.apply(event(20, ObjectKind::Node, node("B", "Audio/Sink")));
        mirror.apply(event(21, ObjectKind::Port, port(20, "in", "in")));
        mirror.apply(Notification::Synced { seq: 1 });

        let report = engine.tick(&mut ());
        assert_eq!(report.sync.added, 4);
        assert_eq!(report.failed, 1);
        assert!(report.deferred);

        let ports: Vec<PortKey> = engine.presentation().ports().map(|p| p.key).collect();
        let result = engine.connect_ports(&ports[0], &ports[1], true);
        assert!(matches!(result, Err(MirrorError::NotOpen)));
    }

    #[test]
    fn test_rules_round_trip_through_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules").join("patchbay-rules.yaml");
        let config = config(true, true, Some(path.clone()));

        let mut engine = PatchbayEngine::new(GraphMirror::detached(&config), &config);
        assert_eq!(engine.rules_path(), path.as_path());
        engine.patchbay_mut().add_rule(a_to_b());
        engine.patchbay_mut().set_exclusive_override(&a_to_b(), Some(false));
        engine.save_rules().unwrap();

        let mut restored = PatchbayEngine::new(GraphMirror::detached(&config), &config);
        assert_eq!(restored.load_rules().unwrap(), 1);
        assert!(restored.patchbay().contains(&a_to_b()));
        assert_eq!(restored.patchbay().exclusive_override(&a_to_b()), Some(false));
    }

    #[test]
    fn test_rank_orders_sources_first() {
        let (service, remote) = SimulatedService::new();
        let (a_out, b_in, _) = sample_remote(&remote);
        remote.add_link(a_out, b_in);
        let mut engine = PatchbayEngine::open(service, &config(false, false, None)).unwrap();
        assert!(run_until(&mut engine, |e| e.presentation().edge_count() == 1));

        let ranked = engine.rank();
        assert_eq!(ranked.len(), 3);
        let names: Vec<&str> = ranked
            .iter()
            .filter_map(|r| engine.presentation().node(&r.key))
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(ranked[0].rank, 0);
        assert_eq!(ranked[1].rank, ranked[2].rank);
    }

    #[test]
    fn test_scan_trigger_defers_while_busy() {
        let trigger = ScanTrigger::default();
        assert!(!trigger.request());
        assert!(trigger.take());
        assert!(!trigger.take());

        trigger.set_busy(true);
        let handle = trigger.clone();
        assert!(handle.is_busy());
        assert!(handle.request());
        trigger.set_busy(false);

        // The deferred request survives the busy window
        assert!(trigger.take());
    }

    /// Simulated transport that asks for a scan while a link is being created,
    /// as a UI thread would in the middle of a tick
    struct ScanOnLinkService {
        inner: SimulatedService,
        trigger: Arc<Mutex<Option<ScanTrigger>>>,
        deferred: Arc<AtomicBool>,
    }

    impl RemoteService for ScanOnLinkService {
        fn open(&mut self) -> Result<(), TransportError> {
            self.inner.open()
        }
        fn close(&mut self) {
            self.inner.close()
        }
        fn poll(&mut self, timeout: Duration) -> Result<Vec<RemoteEvent>, TransportError> {
            self.inner.poll(timeout)
        }
        fn bind(&mut self, id: ObjectId, kind: ObjectKind) -> Result<ObjectBinding, TransportError> {
            self.inner.bind(id, kind)
        }
        fn create_link(&mut self, output: ObjectId, input: ObjectId) -> Result<(), TransportError> {
            if let Some(trigger) = self.trigger.lock().unwrap().as_ref() {
                self.deferred.store(trigger.request(), Ordering::SeqCst);
            }
            self.inner.create_link(output, input)
        }
        fn destroy_link(&mut self, link: ObjectId) -> Result<(), TransportError> {
            self.inner.destroy_link(link)
        }
        fn roundtrip(&mut self) -> Result<u64, TransportError> {
            self.inner.roundtrip()
        }
    }

    #[test]
    fn test_scan_requested_mid_tick_runs_next_tick() {
        let (inner, remote) = SimulatedService::new();
        let (a_out, b_in, _) = sample_remote(&remote);
        let trigger = Arc::new(Mutex::new(None));
        let deferred = Arc::new(AtomicBool::new(false));
        let service = ScanOnLinkService {
            inner,
            trigger: Arc::clone(&trigger),
            deferred: Arc::clone(&deferred),
        };

        let mut engine = PatchbayEngine::open(service, &config(true, false, None)).unwrap();
        *trigger.lock().unwrap() = Some(engine.scan_trigger());
        engine.patchbay_mut().add_rule(a_to_b());

        // Tick until the rule is applied
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut applied = None;
        while Instant::now() < deadline {
            engine.changed().wait(Duration::from_millis(20));
            let report = engine.tick(&mut ());
            if report.connected > 0 {
                applied = Some(report);
                break;
            }
        }
        let report = applied.expect("rule was never applied");
        assert_eq!(report.connected, 1);
        assert!(report.deferred);
        assert!(deferred.load(Ordering::SeqCst), "request during apply should be deferred");
        assert!(!engine.scan_trigger().is_busy());
        assert_eq!(remote.links(), vec![(a_out, b_in)]);

        // The held request is served by the next tick, which finds nothing to do
        let report = engine.tick(&mut ());
        assert_eq!(report.connected + report.disconnected + report.failed, 0);
        assert!(!report.deferred);
        assert!(!engine.scans.take());
        assert_eq!(remote.links(), vec![(a_out, b_in)]);
    }

    #[test]
    fn test_auto_disconnect_removes_ruled_link_only() {
        let (service, remote) = SimulatedService::new();
        let (a_out, b_in, c_in) = sample_remote(&remote);
        remote.add_link(a_out, b_in);
        remote.add_link(a_out, c_in);

        let mut config = config(false, false, None);
        config.patchbay.auto_disconnect = true;
        let mut engine = PatchbayEngine::open(service, &config).unwrap();
        engine.patchbay_mut().add_rule(a_to_b());

        assert!(run_until(&mut engine, |_| remote.links() == vec![(a_out, c_in)]));
        assert!(run_until(&mut engine, |e| e.presentation().edge_count() == 1));

        // Nothing is recreated and the unruled link stays
        for _ in 0..3 {
            let report = engine.tick(&mut ());
            assert_eq!(report.connected + report.disconnected, 0);
        }
        assert_eq!(remote.links(), vec![(a_out, c_in)]);
    }
}
