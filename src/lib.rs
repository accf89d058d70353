//! On-call coverage engine: grace-aware schedule storage, versioned
//! escalation policies, and service-to-responder chain resolution, backed
//! by an in-memory store with write-ahead durability.

pub mod directory;
pub mod engine;
pub mod janitor;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
mod wal;

pub use directory::{Contact, Directory, StaticDirectory};
pub use engine::{
    grace_overlaps, overlap_ms, ConflictMode, Engine, EngineError, ErrorKind, PolicyUpdate,
};
pub use model::{
    ChainLink, ChainTarget, EscalationKind, EscalationPolicy, EscalationStep, Event, Ms,
    OnCallSchedule, ResponsibilityChain, ServiceRecord, Span,
};
pub use notify::NotifyHub;
