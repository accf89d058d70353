use ulid::Ulid;

use crate::model::*;

use super::overlap::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// Live schedules for a team that have not fully elapsed yet (end >= now),
    /// ascending by priority then start — the stored order is the contract.
    pub async fn find_active_by_team(&self, team_id: Ulid) -> Vec<OnCallSchedule> {
        let ts = match self.get_team(&team_id) {
            Some(ts) => ts,
            None => return Vec::new(),
        };
        let guard = ts.read().await;
        let now = now_ms();
        guard
            .schedules
            .iter()
            .filter(|s| !s.is_deleted() && s.span.end >= now)
            .cloned()
            .collect()
    }

    /// Who holds the pager at instant `at`. With overlapping coverage the
    /// lowest priority wins; within a priority, the earliest start.
    pub async fn find_current(&self, team_id: Ulid, at: Ms) -> Option<OnCallSchedule> {
        let ts = self.get_team(&team_id)?;
        let guard = ts.read().await;
        guard
            .schedules
            .iter()
            .find(|s| !s.is_deleted() && s.span.contains_instant(at))
            .cloned()
    }

    /// A single schedule by id. Tombstoned records read as absent.
    pub async fn get_schedule(&self, id: Ulid) -> Option<OnCallSchedule> {
        let team_id = self.owner_team(&id)?;
        let ts = self.get_team(&team_id)?;
        let guard = ts.read().await;
        guard.schedule(&id).filter(|s| !s.is_deleted()).cloned()
    }

    pub async fn list_schedules(&self, team_id: Ulid, include_deleted: bool) -> Vec<OnCallSchedule> {
        let ts = match self.get_team(&team_id) {
            Some(ts) => ts,
            None => return Vec::new(),
        };
        let guard = ts.read().await;
        guard
            .schedules
            .iter()
            .filter(|s| include_deleted || !s.is_deleted())
            .cloned()
            .collect()
    }

    /// The team's authoritative policy, if any.
    pub async fn find_latest_policy(&self, team_id: Ulid) -> Option<EscalationPolicy> {
        let ts = self.get_team(&team_id)?;
        let guard = ts.read().await;
        guard.latest_policy().cloned()
    }

    pub async fn find_policy_version(
        &self,
        team_id: Ulid,
        version: u32,
        include_deleted: bool,
    ) -> Result<EscalationPolicy, EngineError> {
        let ts = self
            .get_team(&team_id)
            .ok_or(EngineError::VersionNotFound { team_id, version })?;
        let guard = ts.read().await;
        match guard.policy_by_version(version) {
            Some(p) if include_deleted || !p.is_deleted() => Ok(p.clone()),
            _ => Err(EngineError::VersionNotFound { team_id, version }),
        }
    }

    /// Full version history, ascending by version.
    pub async fn list_policy_versions(
        &self,
        team_id: Ulid,
        include_deleted: bool,
    ) -> Vec<EscalationPolicy> {
        let ts = match self.get_team(&team_id) {
            Some(ts) => ts,
            None => return Vec::new(),
        };
        let guard = ts.read().await;
        guard
            .policies
            .iter()
            .filter(|p| include_deleted || !p.is_deleted())
            .cloned()
            .collect()
    }

    /// A single policy version by id. Tombstoned records read as absent.
    pub async fn get_policy(&self, id: Ulid) -> Option<EscalationPolicy> {
        let team_id = self.owner_team(&id)?;
        let ts = self.get_team(&team_id)?;
        let guard = ts.read().await;
        guard.policy(&id).filter(|p| !p.is_deleted()).cloned()
    }

    /// Service lookup by (raw) name; normalization is applied here.
    pub fn get_service(&self, name: &str) -> Option<ServiceRecord> {
        self.services
            .get(&normalize_name(name))
            .map(|e| e.value().clone())
    }

    pub fn list_services(&self) -> Vec<ServiceRecord> {
        let mut services: Vec<ServiceRecord> =
            self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }
}
