use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::overlap::{
    first_conflict, now_ms, plan_resolution, validate_grace, validate_priority, validate_span,
};
use super::{ConflictMode, Engine, EngineError, WalCommand};

/// Partial policy content for a new version. `None` fields inherit from the
/// team's current latest version.
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub name: Option<String>,
    pub steps: Option<Vec<EscalationStep>>,
}

impl Engine {
    /// Create an on-call schedule. `mode` decides what happens when the span
    /// overlaps live coverage in the same priority band by more than
    /// `grace_ms`: reject, repair the existing coverage, or skip the check.
    /// Under `Resolve` the span that lands may start later than submitted.
    pub async fn create_schedule(
        &self,
        id: Ulid,
        team_id: Ulid,
        user_id: Ulid,
        priority: u8,
        span: Span,
        grace_ms: Ms,
        mode: ConflictMode,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        validate_priority(priority)?;
        validate_grace(grace_ms)?;
        if self.owner_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.directory.team(team_id).await.is_none() {
            return Err(EngineError::NotFound(team_id));
        }

        let _gate = self.compact_gate.read().await;
        let ts = self.team_entry(team_id);
        let mut guard = ts.write().await;
        if guard.schedules.len() >= MAX_SCHEDULES_PER_TEAM {
            return Err(EngineError::LimitExceeded("too many schedules on team"));
        }

        let record = OnCallSchedule {
            id,
            team_id,
            user_id,
            priority,
            span,
            deleted_at: None,
        };
        let mut batch = Vec::new();
        let landed = match mode {
            ConflictMode::Bypass => span,
            ConflictMode::Reject => {
                if let Some(other) = first_conflict(&guard, &record, grace_ms) {
                    return Err(EngineError::Conflict(other));
                }
                span
            }
            ConflictMode::Resolve => {
                let (repairs, landed) = plan_resolution(&guard, &record, grace_ms, now_ms())?;
                batch = repairs;
                landed
            }
        };
        batch.push(Event::ScheduleCreated {
            id,
            team_id,
            user_id,
            priority,
            span: landed,
        });
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        record_repairs(&batch);
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "create_schedule")
            .increment(1);
        Ok(())
    }

    /// Replace a live schedule's user, priority and span. Overlaps at the new
    /// position are always auto-resolved.
    pub async fn update_schedule(
        &self,
        id: Ulid,
        user_id: Ulid,
        priority: u8,
        span: Span,
        grace_ms: Ms,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        validate_priority(priority)?;
        validate_grace(grace_ms)?;
        let _gate = self.compact_gate.read().await;
        let (team_id, mut guard) = self.resolve_owner_write(&id).await?;
        match guard.schedule(&id) {
            Some(s) if !s.is_deleted() => {}
            _ => return Err(EngineError::NotFound(id)),
        }

        let record = OnCallSchedule {
            id,
            team_id,
            user_id,
            priority,
            span,
            deleted_at: None,
        };
        let (mut batch, landed) = plan_resolution(&guard, &record, grace_ms, now_ms())?;
        batch.push(Event::ScheduleUpdated {
            id,
            team_id,
            user_id,
            priority,
            span: landed,
        });
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        record_repairs(&batch);
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "update_schedule")
            .increment(1);
        Ok(())
    }

    pub async fn soft_delete_schedule(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let (team_id, mut guard) = self.resolve_owner_write(&id).await?;
        match guard.schedule(&id) {
            Some(s) if !s.is_deleted() => {}
            _ => return Err(EngineError::NotFound(id)),
        }
        let batch = [Event::ScheduleTombstoned {
            id,
            team_id,
            at: now_ms(),
        }];
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "delete_schedule")
            .increment(1);
        Ok(())
    }

    /// Bring a tombstoned schedule back. Fails with `Conflict` if the live
    /// set has since claimed its span beyond the grace allowance.
    pub async fn restore_schedule(&self, id: Ulid, grace_ms: Ms) -> Result<(), EngineError> {
        validate_grace(grace_ms)?;
        let _gate = self.compact_gate.read().await;
        let (team_id, mut guard) = self.resolve_owner_write(&id).await?;
        let record = match guard.schedule(&id) {
            Some(s) if s.is_deleted() => s.clone(),
            _ => return Err(EngineError::NotFound(id)),
        };
        if let Some(other) = first_conflict(&guard, &record, grace_ms) {
            return Err(EngineError::Conflict(other));
        }
        let batch = [Event::ScheduleRestored { id, team_id }];
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "restore_schedule")
            .increment(1);
        Ok(())
    }

    /// Permanently remove schedules tombstoned at least `retention_days` ago.
    /// Returns how many were purged. Idempotent: a second pass finds nothing.
    pub async fn purge_expired_schedules(&self, retention_days: i64) -> Result<usize, EngineError> {
        let cutoff = retention_cutoff(retention_days)?;
        let _gate = self.compact_gate.read().await;
        let team_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut purged = 0usize;
        for team_id in team_ids {
            let Some(ts) = self.get_team(&team_id) else {
                continue;
            };
            let mut guard = ts.write().await;
            let batch: Vec<Event> = guard
                .schedules
                .iter()
                .filter(|s| matches!(s.deleted_at, Some(at) if at <= cutoff))
                .map(|s| Event::SchedulePurged { id: s.id, team_id })
                .collect();
            if batch.is_empty() {
                continue;
            }
            self.persist_and_apply(team_id, &mut guard, &batch).await?;
            purged += batch.len();
        }
        if purged > 0 {
            metrics::counter!(crate::observability::PURGED_TOTAL, "entity" => "schedule")
                .increment(purged as u64);
        }
        Ok(purged)
    }

    /// Append a new policy version and make it the team's latest. Fields left
    /// `None` in `update` are inherited from the previous latest; the first
    /// version must carry a name. Returns the assigned version number.
    pub async fn create_policy_version(
        &self,
        id: Ulid,
        team_id: Ulid,
        update: PolicyUpdate,
    ) -> Result<u32, EngineError> {
        if self.owner_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.directory.team(team_id).await.is_none() {
            return Err(EngineError::NotFound(team_id));
        }
        let _gate = self.compact_gate.read().await;
        let ts = self.team_entry(team_id);
        let mut guard = ts.write().await;
        if guard.policies.len() >= MAX_POLICY_VERSIONS_PER_TEAM {
            return Err(EngineError::LimitExceeded("too many policy versions on team"));
        }

        let (name, steps) = {
            let seed = guard.latest_policy();
            let name = match (&update.name, seed) {
                (Some(n), _) => n.clone(),
                (None, Some(prev)) => prev.name.clone(),
                (None, None) => return Err(EngineError::MissingPolicyName),
            };
            let steps = match (&update.steps, seed) {
                (Some(s), _) => s.clone(),
                (None, Some(prev)) => prev.steps.clone(),
                (None, None) => Vec::new(),
            };
            (name, steps)
        };
        if name.trim().is_empty() {
            return Err(EngineError::InvalidName("policy name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("policy name too long"));
        }
        let steps = validate_steps(steps)?;

        let version = guard.next_version;
        let batch = [Event::PolicyVersionCreated {
            id,
            team_id,
            name,
            steps,
            version,
            is_latest: true,
        }];
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "create_policy_version")
            .increment(1);
        Ok(version)
    }

    /// Roll back to an older version's content by appending it as a NEW
    /// latest version under `new_id`. History is never rewritten.
    pub async fn rollback_policy(
        &self,
        new_id: Ulid,
        team_id: Ulid,
        version: u32,
    ) -> Result<u32, EngineError> {
        if self.owner_index.contains_key(&new_id) {
            return Err(EngineError::AlreadyExists(new_id));
        }
        let _gate = self.compact_gate.read().await;
        let ts = self
            .get_team(&team_id)
            .ok_or(EngineError::NotFound(team_id))?;
        let mut guard = ts.write().await;
        if guard.policies.len() >= MAX_POLICY_VERSIONS_PER_TEAM {
            return Err(EngineError::LimitExceeded("too many policy versions on team"));
        }
        let (name, steps) = match guard.policy_by_version(version) {
            Some(p) if !p.is_deleted() => (p.name.clone(), p.steps.clone()),
            _ => return Err(EngineError::VersionNotFound { team_id, version }),
        };

        let new_version = guard.next_version;
        let batch = [Event::PolicyVersionCreated {
            id: new_id,
            team_id,
            name,
            steps,
            version: new_version,
            is_latest: true,
        }];
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "rollback_policy")
            .increment(1);
        Ok(new_version)
    }

    /// Tombstone the latest policy version. Older versions are immutable
    /// history and cannot be deleted individually.
    pub async fn soft_delete_policy(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let (team_id, mut guard) = self.resolve_owner_write(&id).await?;
        let p = match guard.policy(&id) {
            Some(p) if !p.is_deleted() => p,
            _ => return Err(EngineError::NotFound(id)),
        };
        if !p.is_latest {
            return Err(EngineError::NotLatest {
                team_id,
                version: p.version,
            });
        }
        let batch = [Event::PolicyTombstoned {
            id,
            team_id,
            at: now_ms(),
        }];
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "delete_policy")
            .increment(1);
        Ok(())
    }

    pub async fn restore_policy(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let (team_id, mut guard) = self.resolve_owner_write(&id).await?;
        let p = match guard.policy(&id) {
            Some(p) if p.is_deleted() => p,
            _ => return Err(EngineError::NotFound(id)),
        };
        if !p.is_latest {
            return Err(EngineError::NotLatest {
                team_id,
                version: p.version,
            });
        }
        let batch = [Event::PolicyRestored { id, team_id }];
        self.persist_and_apply(team_id, &mut guard, &batch).await?;
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "restore_policy")
            .increment(1);
        Ok(())
    }

    /// Permanently remove policy versions tombstoned at least
    /// `retention_days` ago. Version numbers of purged records stay taken
    /// while the engine runs.
    pub async fn purge_old_policies(&self, retention_days: i64) -> Result<usize, EngineError> {
        let cutoff = retention_cutoff(retention_days)?;
        let _gate = self.compact_gate.read().await;
        let team_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut purged = 0usize;
        for team_id in team_ids {
            let Some(ts) = self.get_team(&team_id) else {
                continue;
            };
            let mut guard = ts.write().await;
            let batch: Vec<Event> = guard
                .policies
                .iter()
                .filter(|p| matches!(p.deleted_at, Some(at) if at <= cutoff))
                .map(|p| Event::PolicyPurged { id: p.id, team_id })
                .collect();
            if batch.is_empty() {
                continue;
            }
            self.persist_and_apply(team_id, &mut guard, &batch).await?;
            purged += batch.len();
        }
        if purged > 0 {
            metrics::counter!(crate::observability::PURGED_TOTAL, "entity" => "policy")
                .increment(purged as u64);
        }
        Ok(purged)
    }

    /// Register a service under its normalized name and bind it to a team.
    pub async fn register_service(
        &self,
        id: Ulid,
        name: &str,
        team_id: Ulid,
    ) -> Result<(), EngineError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(EngineError::InvalidName("service name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if self.directory.team(team_id).await.is_none() {
            return Err(EngineError::NotFound(team_id));
        }

        let _gate = self.compact_gate.read().await;
        let _reg = self.service_lock.lock().await;
        if self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if let Some(existing) = self.services.get(&name) {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        if self.service_ids.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceRegistered {
            id,
            name: name.clone(),
            team_id,
        };
        self.wal_append(vec![event.clone()]).await?;
        self.services.insert(
            name.clone(),
            ServiceRecord {
                id,
                name: name.clone(),
                team_id,
            },
        );
        self.service_ids.insert(id, name);
        self.notify.send(team_id, &event);
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "register_service")
            .increment(1);
        Ok(())
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let _reg = self.service_lock.lock().await;
        let name = self
            .service_ids
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let team_id = self
            .services
            .get(&name)
            .map(|e| e.team_id)
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::ServiceRemoved { id };
        self.wal_append(vec![event.clone()]).await?;
        self.service_ids.remove(&id);
        self.services.remove(&name);
        self.notify.send(team_id, &event);
        metrics::counter!(crate::observability::WRITES_TOTAL, "op" => "remove_service")
            .increment(1);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: the service registry, then every team's
    /// schedules and policy history with their tombstones. Writers are held
    /// off until the rewritten file is swapped in; an append acked before
    /// the gate is in the snapshot, one acked after lands in the new file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compact_gate.write().await;
        let mut events = Vec::new();

        for entry in self.services.iter() {
            let s = entry.value();
            events.push(Event::ServiceRegistered {
                id: s.id,
                name: s.name.clone(),
                team_id: s.team_id,
            });
        }

        let team_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for team_id in team_ids {
            let Some(ts) = self.get_team(&team_id) else {
                continue;
            };
            let guard = ts.read().await;
            for s in &guard.schedules {
                events.push(Event::ScheduleCreated {
                    id: s.id,
                    team_id,
                    user_id: s.user_id,
                    priority: s.priority,
                    span: s.span,
                });
                if let Some(at) = s.deleted_at {
                    events.push(Event::ScheduleTombstoned { id: s.id, team_id, at });
                }
            }
            for p in &guard.policies {
                events.push(Event::PolicyVersionCreated {
                    id: p.id,
                    team_id,
                    name: p.name.clone(),
                    steps: p.steps.clone(),
                    version: p.version,
                    is_latest: p.is_latest,
                });
                if let Some(at) = p.deleted_at {
                    events.push(Event::PolicyTombstoned { id: p.id, team_id, at });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Tombstones at or before the returned instant are old enough to purge.
fn retention_cutoff(retention_days: i64) -> Result<Ms, EngineError> {
    if retention_days < 0 {
        return Err(EngineError::LimitExceeded("retention must be non-negative"));
    }
    let window = retention_days
        .checked_mul(DAY_MS)
        .ok_or(EngineError::LimitExceeded("retention window too large"))?;
    Ok(now_ms() - window)
}

fn validate_steps(mut steps: Vec<EscalationStep>) -> Result<Vec<EscalationStep>, EngineError> {
    if steps.len() > MAX_STEPS_PER_POLICY {
        return Err(EngineError::LimitExceeded("too many escalation steps"));
    }
    steps.sort_by_key(|s| s.order);
    if let Some(w) = steps.windows(2).find(|w| w[0].order == w[1].order) {
        return Err(EngineError::DuplicateStepOrder(w[0].order));
    }
    Ok(steps)
}

fn record_repairs(batch: &[Event]) {
    for event in batch {
        match event {
            Event::ScheduleTruncated { .. } => {
                metrics::counter!(crate::observability::CONFLICT_REPAIRS_TOTAL, "action" => "truncate")
                    .increment(1);
            }
            Event::ScheduleTombstoned { .. } => {
                metrics::counter!(crate::observability::CONFLICT_REPAIRS_TOTAL, "action" => "tombstone")
                    .increment(1);
            }
            _ => {}
        }
    }
}
