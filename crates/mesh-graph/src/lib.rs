//! Mesh Graph - routing graph mirror, patchbay and layout ranking
//!
//! This crate provides:
//! - A live mirror of a remote audio/MIDI routing graph, kept on a worker
//!   thread and translated into presentation items by explicit passes
//! - A rule-based patchbay that plans connections to create or remove
//! - A cycle-tolerant topological ranker for left-to-right layout
//!
//! # Architecture
//!
//! ```text
//! RemoteService → worker thread → Notification channel → GraphMirror
//!                                                           │ sync_to_presentation()
//!                                                           ▼
//!                     Patchbay::scan() ◄──────────── PresentationGraph ────► rank_presentation()
//!                           │
//!                           └── ScanPlan → GraphMirror::connect()
//! ```
//!
//! [`engine::PatchbayEngine`] wires the pieces into one tick.

pub mod config;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod patchbay;
pub mod presentation;
pub mod ranker;
pub mod remote;
pub mod types;

pub use engine::{PatchbayEngine, ScanTrigger, TickReport};
pub use error::{MirrorError, MirrorResult, PatchbayFileError, TransportError};
pub use mirror::GraphMirror;
pub use patchbay::{Patchbay, PatchbayRule, ScanPlan};
pub use presentation::{GraphObserver, PresentationGraph, SyncReport};
pub use ranker::{rank_presentation, RankNode, Ranked, TopologicalRanker};
pub use types::*;
