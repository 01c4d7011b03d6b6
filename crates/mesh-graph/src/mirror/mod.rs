//! Graph Mirror
//!
//! A local, eventually-consistent copy of the remote routing graph and its
//! translation into presentation items.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  Notification (bounded)  ┌──────────────────────┐
//! │  graph-mirror thread │─────────────────────────►│  interactive context │
//! │  RemoteService       │                          │  MirrorTables        │
//! │  ObjectBindings      │◄─────────────────────────│  PresentationGraph   │
//! │  reconnect state     │  WorkerCommand           │                      │
//! └──────────┬───────────┘                          └──────────▲───────────┘
//!            │ ChangeSignal (coalesced)                        │
//!            └─────────────────────────────────────────────────┘
//! ```
//!
//! Only the interactive context mutates the tables and the presentation
//! graph, so a reconciliation pass never sees a half-applied notification.

mod naming;
mod objects;
mod signal;
mod sync;
mod tables;
mod worker;

pub use naming::{display_label, NameIndexTable, NameKey, NodeNames};
pub use objects::{LinkRecord, NodeRecord, PortRecord, RemoteObject};
pub use signal::ChangeListener;
pub use tables::MirrorTables;
pub use worker::Notification;

use crate::config::EngineConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::presentation::{GraphObserver, PresentationGraph, PresentationNode, SyncReport};
use crate::remote::RemoteService;
use crate::types::{Directionality, NodeCategory, NodeMode, ObjectId};
use crossbeam::channel::Receiver;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use worker::{WorkerCommand, WorkerHandle, WorkerSettings};

pub struct GraphMirror {
    tables: MirrorTables,
    graph: PresentationGraph,
    notify_rx: Receiver<Notification>,
    worker: Option<WorkerHandle>,
    listener: ChangeListener,
    /// Published by the worker while a session is open
    session_up: Arc<AtomicBool>,
    /// A transport fault was applied; the next pass rebuilds
    errored: bool,
    filters: Vec<Regex>,
    prefer_nicknames: bool,
    connect_timeout: Duration,
    last_sync: u64,
}

impl GraphMirror {
    /// Start mirroring `service` on a dedicated worker thread
    ///
    /// Returns immediately. If the remote is unreachable the worker keeps
    /// retrying in the background; the graph simply stays empty meanwhile.
    pub fn open<S: RemoteService + 'static>(service: S, config: &EngineConfig) -> MirrorResult<Self> {
        let (notify_tx, notify_rx) =
            crossbeam::channel::bounded(config.notification_capacity.max(1));
        let (signal, listener) = signal::change_signal();
        let session_up = Arc::new(AtomicBool::new(false));

        let worker = worker::spawn(
            service,
            WorkerSettings {
                backoff: config.reconnect_backoff(),
                poll_interval: config.poll_interval(),
            },
            notify_tx,
            Arc::clone(&session_up),
            signal,
        )?;
        log::info!("[MIRROR] Opened (client '{}')", config.client_name);

        let mut mirror = Self::with_channel(notify_rx, listener, session_up, config);
        mirror.worker = Some(worker);
        Ok(mirror)
    }

    /// A mirror without a worker, fed through [`GraphMirror::apply`]
    pub fn detached(config: &EngineConfig) -> Self {
        let (_, notify_rx) = crossbeam::channel::bounded(1);
        let (_, listener) = signal::change_signal();
        Self::with_channel(notify_rx, listener, Arc::new(AtomicBool::new(false)), config)
    }

    fn with_channel(
        notify_rx: Receiver<Notification>,
        listener: ChangeListener,
        session_up: Arc<AtomicBool>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            tables: MirrorTables::new(),
            graph: PresentationGraph::new(),
            notify_rx,
            worker: None,
            listener,
            session_up,
            errored: false,
            filters: config.compiled_filters(),
            prefer_nicknames: config.prefer_nicknames,
            connect_timeout: config.connect_timeout(),
            last_sync: 0,
        }
    }

    /// Apply one worker notification to the tables
    pub fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::Connected => {
                log::debug!("[MIRROR] Session established");
            }
            Notification::Event(event) => self.tables.apply(event),
            Notification::Synced { seq } => {
                self.tables.mark_synced();
                self.last_sync = seq;
            }
            Notification::TransportLost { reason } => {
                log::debug!("[MIRROR] Session lost: {}", reason);
                self.errored = true;
            }
        }
    }

    /// Apply everything the worker has queued; returns how many were applied
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(notification) = self.notify_rx.try_recv() {
            self.apply(notification);
            applied += 1;
        }
        applied
    }

    /// Reconciliation pass: bring the presentation graph up to date
    ///
    /// After a transport fault the pass instead clears the mirror, retires
    /// every item and asks the worker to reopen the session.
    pub fn sync_to_presentation(&mut self, observer: &mut dyn GraphObserver) -> SyncReport {
        self.drain();

        if self.errored {
            self.errored = false;
            let mut report = SyncReport::default();
            self.tables.clear();
            self.graph.retire_all(observer, &mut report);
            log::info!(
                "[MIRROR] Transport failed, retired {} items; reopening",
                report.removed
            );
            if let Some(worker) = &self.worker {
                worker.send(WorkerCommand::Reopen);
            }
            return report;
        }

        let options = sync::SyncOptions {
            filters: &self.filters,
            prefer_nicknames: self.prefer_nicknames,
        };
        sync::reconcile(&mut self.tables, &mut self.graph, &options, observer)
    }

    /// Link (`is_connect`) or unlink two ports, waiting for the remote
    ///
    /// The ports may be given in either order. Linking an already linked
    /// pair, or unlinking an unlinked one, succeeds without a remote call.
    /// Notifications keep being applied while waiting; the reply arrives
    /// after the notifications the command caused.
    ///
    /// Must not be called on the worker thread.
    pub fn connect(&mut self, port1: ObjectId, port2: ObjectId, is_connect: bool) -> MirrorResult<()> {
        match &self.worker {
            None => return Err(MirrorError::NotOpen),
            Some(worker) if worker.is_current_thread() => return Err(MirrorError::WorkerThread),
            Some(_) => {}
        }
        self.drain();

        let dir1 = self.port_direction(port1)?;
        let dir2 = self.port_direction(port2)?;
        let (output, input) = match (dir1, dir2) {
            (Directionality::Output, Directionality::Input) => (port1, port2),
            (Directionality::Input, Directionality::Output) => (port2, port1),
            _ => {
                return Err(MirrorError::IncompatiblePorts {
                    output: port1,
                    input: port2,
                })
            }
        };

        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        let existing = self.tables.link_between(output, input);
        let command = match (is_connect, existing) {
            (true, Some(_)) | (false, None) => return Ok(()),
            (true, None) => WorkerCommand::CreateLink {
                output,
                input,
                reply: reply_tx,
            },
            (false, Some(link)) => WorkerCommand::DestroyLink {
                link,
                reply: reply_tx,
            },
        };
        let sent = self.worker.as_ref().is_some_and(|worker| worker.send(command));
        if !sent {
            return Err(MirrorError::WorkerGone);
        }

        let notify_rx = self.notify_rx.clone();
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            crossbeam::select! {
                recv(reply_rx) -> reply => {
                    let result = reply.map_err(|_| MirrorError::WorkerGone)?;
                    self.drain();
                    return result.map(|_| ()).map_err(MirrorError::from);
                }
                recv(notify_rx) -> notification => match notification {
                    Ok(notification) => self.apply(notification),
                    Err(_) => return Err(MirrorError::WorkerGone),
                },
                default(remaining) => {
                    log::warn!("[MIRROR] No acknowledgement for {} -> {}", output, input);
                    return Err(MirrorError::Timeout);
                }
            }
        }
    }

    fn port_direction(&self, id: ObjectId) -> MirrorResult<Directionality> {
        self.tables
            .port(id)
            .map(|port| port.directionality)
            .ok_or(MirrorError::UnknownPort(id))
    }

    pub fn find_node(
        &self,
        id: ObjectId,
        mode: NodeMode,
        category: NodeCategory,
    ) -> Option<&PresentationNode> {
        self.graph.find_node(id, mode, category)
    }

    /// Presentation nodes with this identity name, ordered by remote id
    pub fn find_nodes_by_name(
        &self,
        name: &str,
        mode: NodeMode,
        category: NodeCategory,
    ) -> Vec<&PresentationNode> {
        self.graph.find_nodes_by_name(name, mode, category)
    }

    pub fn presentation(&self) -> &PresentationGraph {
        &self.graph
    }

    pub fn tables(&self) -> &MirrorTables {
        &self.tables
    }

    /// Coalesced signal raised after each burst of remote changes
    pub fn changed(&self) -> ChangeListener {
        self.listener.clone()
    }

    /// Whether the worker currently holds an open session
    pub fn is_connected(&self) -> bool {
        self.session_up.load(Ordering::Acquire)
    }

    /// Sequence number of the last confirmed round-trip
    pub fn last_sync(&self) -> u64 {
        self.last_sync
    }

    /// Stop the worker, releasing every binding before the transport
    ///
    /// Tables and presentation stay as they were. Called by `Drop`.
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Unblock a worker waiting on a full notification channel
        self.notify_rx = crossbeam::channel::never();
        worker.join();
        log::info!("[MIRROR] Closed");
    }
}

impl Drop for GraphMirror {
    fn drop(&mut self) {
        self.close();
    }
}
