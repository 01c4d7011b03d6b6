//! Mirror worker thread
//!
//! Owns the remote transport, every object binding and the reconnect state
//! machine. Notifications are forwarded whole to the interactive context;
//! the worker never touches the mirror tables.
//!
//! ```text
//!   Disconnected --open ok--> Connected --transport fault--> Errored
//!        ^  |                                                   |
//!        |  +--open failed: wait back-off                       |
//!        +-------------------- Reopen (next pass) --------------+
//! ```

use super::signal::ChangeSignal;
use crate::error::TransportError;
use crate::remote::{keys, ObjectBinding, RemoteEvent, RemoteService};
use crate::types::{ObjectId, ObjectKind};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Worker -> mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A session was opened; `Appeared` events for existing objects follow
    Connected,
    Event(RemoteEvent),
    /// A round-trip completed; everything before it is confirmed
    Synced { seq: u64 },
    /// The session failed and was torn down; waiting for `Reopen`
    TransportLost { reason: String },
}

/// Mirror -> worker
pub(crate) enum WorkerCommand {
    CreateLink {
        output: ObjectId,
        input: ObjectId,
        reply: Sender<Result<u64, TransportError>>,
    },
    DestroyLink {
        link: ObjectId,
        reply: Sender<Result<u64, TransportError>>,
    },
    /// Start a fresh session after a transport fault
    Reopen,
    Shutdown,
}

pub(crate) struct WorkerSettings {
    pub backoff: Duration,
    pub poll_interval: Duration,
}

/// Interactive-side handle to the worker thread
pub(crate) struct WorkerHandle {
    command_tx: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.command_tx.send(command).is_ok()
    }

    /// Whether the caller is running on the worker thread
    pub fn is_current_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    /// Ask the worker to stop and wait for it
    pub fn join(mut self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[MIRROR] Worker thread panicked");
            }
        }
    }
}

/// Spawn the worker thread
pub(crate) fn spawn<S: RemoteService + 'static>(
    service: S,
    settings: WorkerSettings,
    notify_tx: Sender<Notification>,
    session_up: Arc<AtomicBool>,
    signal: ChangeSignal,
) -> std::io::Result<WorkerHandle> {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let worker = MirrorWorker {
        service,
        command_rx,
        notify_tx,
        session_up,
        signal,
        settings,
        bindings: BindingSet::default(),
        state: SessionState::Disconnected {
            retry_at: Instant::now(),
        },
        failed_attempts: 0,
        stopping: false,
    };
    let thread = thread::Builder::new()
        .name("graph-mirror".into())
        .spawn(move || worker.run())?;
    Ok(WorkerHandle {
        command_tx,
        thread: Some(thread),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected { retry_at: Instant },
    Connected,
    Errored,
}

struct MirrorWorker<S: RemoteService> {
    service: S,
    command_rx: Receiver<WorkerCommand>,
    notify_tx: Sender<Notification>,
    session_up: Arc<AtomicBool>,
    signal: ChangeSignal,
    settings: WorkerSettings,
    bindings: BindingSet,
    state: SessionState,
    failed_attempts: u32,
    stopping: bool,
}

impl<S: RemoteService> MirrorWorker<S> {
    fn run(mut self) {
        log::info!("[MIRROR] Worker started");
        while !self.stopping {
            match self.state {
                SessionState::Disconnected { retry_at } => {
                    let wait = retry_at.saturating_duration_since(Instant::now());
                    match self.command_rx.recv_timeout(wait) {
                        Ok(command) => self.handle_offline(command),
                        Err(RecvTimeoutError::Timeout) => self.try_open(),
                        Err(RecvTimeoutError::Disconnected) => self.stopping = true,
                    }
                }
                SessionState::Connected => {
                    loop {
                        match self.command_rx.try_recv() {
                            Ok(command) => self.handle_online(command),
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => {
                                self.stopping = true;
                                break;
                            }
                        }
                        if self.stopping || self.state != SessionState::Connected {
                            break;
                        }
                    }
                    if self.stopping || self.state != SessionState::Connected {
                        continue;
                    }
                    match self.service.poll(self.settings.poll_interval) {
                        Ok(events) => {
                            if let Err(e) = self.forward(events) {
                                self.fail(e);
                            }
                        }
                        Err(e) => self.fail(e),
                    }
                }
                SessionState::Errored => match self.command_rx.recv() {
                    Ok(command) => self.handle_offline(command),
                    Err(_) => self.stopping = true,
                },
            }
        }
        self.teardown();
        log::info!("[MIRROR] Worker stopped");
    }

    fn try_open(&mut self) {
        match self.service.open() {
            Ok(()) => {
                log::info!("[MIRROR] Connected to remote service");
                self.failed_attempts = 0;
                self.state = SessionState::Connected;
                self.session_up.store(true, Ordering::Release);
                self.notify(Notification::Connected);
            }
            Err(e) => {
                // Absence of objects is the only visible symptom
                self.failed_attempts += 1;
                log::debug!(
                    "[MIRROR] Remote unavailable (attempt {}): {}; retrying in {:?}",
                    self.failed_attempts,
                    e,
                    self.settings.backoff
                );
                self.state = SessionState::Disconnected {
                    retry_at: Instant::now() + self.settings.backoff,
                };
            }
        }
    }

    /// Commands while no session is open
    fn handle_offline(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::CreateLink { reply, .. } | WorkerCommand::DestroyLink { reply, .. } => {
                let _ = reply.send(Err(TransportError::NotConnected));
            }
            WorkerCommand::Reopen => {
                if self.state == SessionState::Errored {
                    log::info!("[MIRROR] Reopening remote session");
                    self.state = SessionState::Disconnected {
                        retry_at: Instant::now(),
                    };
                }
            }
            WorkerCommand::Shutdown => self.stopping = true,
        }
    }

    fn handle_online(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::CreateLink {
                output,
                input,
                reply,
            } => {
                log::debug!("[MIRROR] Linking {} -> {}", output, input);
                let result = self
                    .service
                    .create_link(output, input)
                    .and_then(|_| self.acknowledge());
                self.finish_command(result, reply);
            }
            WorkerCommand::DestroyLink { link, reply } => {
                log::debug!("[MIRROR] Unlinking {}", link);
                let result = self
                    .service
                    .destroy_link(link)
                    .and_then(|_| self.acknowledge());
                self.finish_command(result, reply);
            }
            // Already connected
            WorkerCommand::Reopen => {}
            WorkerCommand::Shutdown => self.stopping = true,
        }
    }

    fn finish_command(
        &mut self,
        result: Result<u64, TransportError>,
        reply: Sender<Result<u64, TransportError>>,
    ) {
        let fault = result.as_ref().err().filter(|e| e.is_session_fault()).cloned();
        let _ = reply.send(result);
        if let Some(e) = fault {
            self.fail(e);
        }
    }

    /// Round-trip after a command and forward what it caused
    ///
    /// Runs before the command's reply is sent, so the caller finds the
    /// resulting notifications queued ahead of the reply.
    fn acknowledge(&mut self) -> Result<u64, TransportError> {
        let seq = self.service.roundtrip()?;
        let events = self.service.poll(Duration::ZERO)?;
        self.forward(events)?;
        Ok(seq)
    }

    /// Bind/release, forward a burst, then confirm it with a round-trip
    fn forward(&mut self, events: Vec<RemoteEvent>) -> Result<(), TransportError> {
        if events.is_empty() {
            return Ok(());
        }
        for event in events {
            match &event {
                RemoteEvent::Appeared { id, kind, props } => {
                    self.bindings.release(*id);
                    match self.service.bind(*id, *kind) {
                        Ok(binding) => {
                            let parents = match kind {
                                ObjectKind::Node => Vec::new(),
                                ObjectKind::Port => props.get_id(keys::NODE_ID).into_iter().collect(),
                                ObjectKind::Link => [keys::LINK_OUTPUT_PORT, keys::LINK_INPUT_PORT]
                                    .iter()
                                    .filter_map(|key| props.get_id(key))
                                    .collect(),
                            };
                            self.bindings.insert(binding, parents);
                        }
                        // Gone again before we got to it; its removal follows
                        Err(e @ TransportError::BindFailed { .. }) => {
                            log::debug!("[MIRROR] {}", e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                RemoteEvent::Removed { id } => self.bindings.release(*id),
                RemoteEvent::Changed { .. } => {}
            }
            if !self.notify(Notification::Event(event)) {
                return Ok(());
            }
        }
        let seq = self.service.roundtrip()?;
        self.notify(Notification::Synced { seq });
        self.signal.raise();
        Ok(())
    }

    /// Send to the mirror; false once the mirror is gone
    fn notify(&mut self, notification: Notification) -> bool {
        if self.notify_tx.send(notification).is_err() {
            self.stopping = true;
            return false;
        }
        true
    }

    fn fail(&mut self, error: TransportError) {
        log::warn!("[MIRROR] Transport fault, tearing down session: {}", error);
        self.close_session();
        self.state = SessionState::Errored;
        self.notify(Notification::TransportLost {
            reason: error.to_string(),
        });
        self.signal.raise();
    }

    /// Release every binding, newest first, then close the transport
    fn close_session(&mut self) {
        self.session_up.store(false, Ordering::Release);
        let released = self.bindings.release_all();
        self.service.close();
        log::debug!("[MIRROR] Session closed ({} bindings released)", released);
    }

    fn teardown(&mut self) {
        if self.state == SessionState::Connected {
            self.close_session();
        }
        self.state = SessionState::Disconnected {
            retry_at: Instant::now(),
        };
    }
}

/// Live bindings in creation order, with ownership edges for cascades
#[derive(Default)]
struct BindingSet {
    next_seq: u64,
    bindings: BTreeMap<u64, ObjectBinding>,
    by_id: HashMap<ObjectId, u64>,
    /// child -> owners (port -> node, link -> its ports)
    parents: HashMap<ObjectId, Vec<ObjectId>>,
}

impl BindingSet {
    fn insert(&mut self, binding: ObjectBinding, parents: Vec<ObjectId>) {
        let id = binding.id();
        self.next_seq += 1;
        self.bindings.insert(self.next_seq, binding);
        self.by_id.insert(id, self.next_seq);
        if !parents.is_empty() {
            self.parents.insert(id, parents);
        }
    }

    /// Release `id` and every binding owned by it, newest first
    fn release(&mut self, id: ObjectId) {
        let mut doomed = vec![id];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let owner = doomed[cursor];
            for (child, owners) in &self.parents {
                if owners.contains(&owner) && !doomed.contains(child) {
                    doomed.push(*child);
                }
            }
            cursor += 1;
        }

        let mut seqs: Vec<u64> = doomed
            .iter()
            .filter_map(|id| self.by_id.remove(id))
            .collect();
        for id in &doomed {
            self.parents.remove(id);
        }
        seqs.sort_unstable_by(|a, b| b.cmp(a));
        for seq in seqs {
            if let Some(mut binding) = self.bindings.remove(&seq) {
                binding.release();
            }
        }
    }

    /// Release everything in reverse creation order
    fn release_all(&mut self) -> usize {
        let count = self.bindings.len();
        while let Some((_, mut binding)) = self.bindings.pop_last() {
            binding.release();
        }
        self.by_id.clear();
        self.parents.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn tracked(id: ObjectId, kind: ObjectKind, log: &Arc<Mutex<Vec<ObjectId>>>) -> ObjectBinding {
        let log = Arc::clone(log);
        ObjectBinding::new(id, kind).with_handle(move || log.lock().unwrap().push(id))
    }

    #[test]
    fn test_release_cascades_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = BindingSet::default();
        set.insert(tracked(10, ObjectKind::Node, &log), vec![]);
        set.insert(tracked(11, ObjectKind::Port, &log), vec![10]);
        set.insert(tracked(20, ObjectKind::Node, &log), vec![]);
        set.insert(tracked(21, ObjectKind::Port, &log), vec![20]);
        set.insert(tracked(30, ObjectKind::Link, &log), vec![11, 21]);

        set.release(10);
        assert_eq!(*log.lock().unwrap(), vec![30, 11, 10]);

        assert_eq!(set.release_all(), 2);
        assert_eq!(*log.lock().unwrap(), vec![30, 11, 10, 21, 20]);
    }
}
