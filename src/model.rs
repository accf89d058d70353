use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Normalize a service name for lookup: trimmed, ASCII-lowercased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// One coverage interval for a team: this user holds the pager at this
/// priority for this span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnCallSchedule {
    pub id: Ulid,
    pub team_id: Ulid,
    pub user_id: Ulid,
    /// 1–10, lower value pages first.
    pub priority: u8,
    pub span: Span,
    /// Tombstone timestamp; `None` while the record is live.
    pub deleted_at: Option<Ms>,
}

impl OnCallSchedule {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Who an escalation step pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationKind {
    User,
    Team,
}

/// One rung of an escalation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Unique within one policy version.
    pub order: u32,
    pub timeout_minutes: u32,
    pub kind: EscalationKind,
    pub target_id: Ulid,
}

/// One immutable version in a team's escalation history. Every change is a
/// new version; at most one non-deleted record per team carries `is_latest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: Ulid,
    pub team_id: Ulid,
    pub name: String,
    /// Sorted by `order` ascending.
    pub steps: Vec<EscalationStep>,
    pub version: u32,
    pub is_latest: bool,
    pub deleted_at: Option<Ms>,
}

impl EscalationPolicy {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A registered service; resolution starts from its normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Ulid,
    pub name: String,
    pub team_id: Ulid,
}

#[derive(Debug, Clone)]
pub struct TeamState {
    pub id: Ulid,
    /// Live and tombstoned coverage, sorted by (priority, span.start, id).
    pub schedules: Vec<OnCallSchedule>,
    /// Full version history, sorted by version ascending.
    pub policies: Vec<EscalationPolicy>,
    /// Next policy version to assign; raised on every insert, never lowered.
    pub next_version: u32,
}

impl TeamState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            schedules: Vec::new(),
            policies: Vec::new(),
            next_version: 1,
        }
    }

    /// Insert a schedule maintaining (priority, span.start, id) order.
    pub fn insert_schedule(&mut self, schedule: OnCallSchedule) {
        let key = (schedule.priority, schedule.span.start, schedule.id);
        let pos = self
            .schedules
            .partition_point(|s| (s.priority, s.span.start, s.id) < key);
        self.schedules.insert(pos, schedule);
    }

    pub fn remove_schedule(&mut self, id: Ulid) -> Option<OnCallSchedule> {
        if let Some(pos) = self.schedules.iter().position(|s| s.id == id) {
            Some(self.schedules.remove(pos))
        } else {
            None
        }
    }

    pub fn schedule(&self, id: &Ulid) -> Option<&OnCallSchedule> {
        self.schedules.iter().find(|s| s.id == *id)
    }

    pub fn schedule_mut(&mut self, id: &Ulid) -> Option<&mut OnCallSchedule> {
        self.schedules.iter_mut().find(|s| s.id == *id)
    }

    /// Schedules in one priority band whose span overlaps the query window,
    /// ascending by (start, id). Tombstones are included; callers filter.
    /// Uses binary search to skip bands and spans starting at or after
    /// `query.end`.
    pub fn overlapping(&self, priority: u8, query: &Span) -> impl Iterator<Item = &OnCallSchedule> {
        let lo = self.schedules.partition_point(|s| s.priority < priority);
        let hi = lo
            + self.schedules[lo..]
                .partition_point(|s| s.priority == priority && s.span.start < query.end);
        self.schedules[lo..hi]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// Insert a policy maintaining version order.
    pub fn insert_policy(&mut self, policy: EscalationPolicy) {
        let pos = self.policies.partition_point(|p| p.version < policy.version);
        self.policies.insert(pos, policy);
    }

    pub fn remove_policy(&mut self, id: Ulid) -> Option<EscalationPolicy> {
        if let Some(pos) = self.policies.iter().position(|p| p.id == id) {
            Some(self.policies.remove(pos))
        } else {
            None
        }
    }

    pub fn policy(&self, id: &Ulid) -> Option<&EscalationPolicy> {
        self.policies.iter().find(|p| p.id == *id)
    }

    pub fn policy_mut(&mut self, id: &Ulid) -> Option<&mut EscalationPolicy> {
        self.policies.iter_mut().find(|p| p.id == *id)
    }

    pub fn policy_by_version(&self, version: u32) -> Option<&EscalationPolicy> {
        self.policies
            .binary_search_by_key(&version, |p| p.version)
            .ok()
            .map(|pos| &self.policies[pos])
    }

    /// The authoritative policy: non-deleted and flagged latest.
    pub fn latest_policy(&self) -> Option<&EscalationPolicy> {
        self.policies
            .iter()
            .rev()
            .find(|p| p.is_latest && !p.is_deleted())
    }
}

/// The event types — flat, no nesting. This is the WAL record vocabulary;
/// one logical write persists as one batch of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceRegistered {
        id: Ulid,
        name: String,
        team_id: Ulid,
    },
    ServiceRemoved {
        id: Ulid,
    },
    ScheduleCreated {
        id: Ulid,
        team_id: Ulid,
        user_id: Ulid,
        priority: u8,
        span: Span,
    },
    ScheduleUpdated {
        id: Ulid,
        team_id: Ulid,
        user_id: Ulid,
        priority: u8,
        span: Span,
    },
    /// Conflict resolution cut an existing schedule's end back.
    ScheduleTruncated {
        id: Ulid,
        team_id: Ulid,
        end: Ms,
    },
    ScheduleTombstoned {
        id: Ulid,
        team_id: Ulid,
        at: Ms,
    },
    ScheduleRestored {
        id: Ulid,
        team_id: Ulid,
    },
    SchedulePurged {
        id: Ulid,
        team_id: Ulid,
    },
    PolicyVersionCreated {
        id: Ulid,
        team_id: Ulid,
        name: String,
        steps: Vec<EscalationStep>,
        version: u32,
        is_latest: bool,
    },
    PolicyTombstoned {
        id: Ulid,
        team_id: Ulid,
        at: Ms,
    },
    PolicyRestored {
        id: Ulid,
        team_id: Ulid,
    },
    PolicyPurged {
        id: Ulid,
        team_id: Ulid,
    },
}

// ── Resolver result types ────────────────────────────────────────

/// A resolved escalation target; `missing` is set when the directory no
/// longer knows the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainTarget {
    pub id: Ulid,
    pub name: Option<String>,
    pub missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLink {
    pub order: u32,
    #[serde(rename = "type")]
    pub kind: EscalationKind,
    pub timeout_minutes: u32,
    pub target: ChainTarget,
}

/// Ordered notification plan for a service. Computed per query, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponsibilityChain {
    pub service: String,
    pub team_id: Ulid,
    pub team_name: String,
    pub links: Vec<ChainLink>,
}
