use ulid::Ulid;

use crate::model::Ms;

/// Coarse classification callers can map to a transport status without
/// matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    ServiceNotFound(String),
    VersionNotFound { team_id: Ulid, version: u32 },
    AlreadyExists(Ulid),
    Conflict(Ulid),
    NotLatest { team_id: Ulid, version: u32 },
    InvalidSpan(&'static str),
    InvalidPriority(u8),
    InvalidGrace(Ms),
    InvalidName(&'static str),
    DuplicateStepOrder(u32),
    MissingPolicyName,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_)
            | EngineError::ServiceNotFound(_)
            | EngineError::VersionNotFound { .. } => ErrorKind::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::Conflict(_)
            | EngineError::NotLatest { .. } => ErrorKind::Conflict,
            EngineError::InvalidSpan(_)
            | EngineError::InvalidPriority(_)
            | EngineError::InvalidGrace(_)
            | EngineError::InvalidName(_)
            | EngineError::DuplicateStepOrder(_)
            | EngineError::MissingPolicyName
            | EngineError::LimitExceeded(_) => ErrorKind::InvalidArgument,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::ServiceNotFound(name) => write!(f, "service not found: {name}"),
            EngineError::VersionNotFound { team_id, version } => {
                write!(f, "policy version {version} not found for team {team_id}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with schedule: {id}"),
            EngineError::NotLatest { team_id, version } => {
                write!(f, "policy version {version} is not the latest for team {team_id}")
            }
            EngineError::InvalidSpan(msg) => write!(f, "invalid span: {msg}"),
            EngineError::InvalidPriority(p) => write!(f, "invalid priority: {p}"),
            EngineError::InvalidGrace(g) => write!(f, "invalid grace: {g} ms"),
            EngineError::InvalidName(msg) => write!(f, "invalid name: {msg}"),
            EngineError::DuplicateStepOrder(order) => {
                write!(f, "duplicate step order: {order}")
            }
            EngineError::MissingPolicyName => {
                write!(f, "policy name required: no previous version to inherit from")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
