mod error;
mod mutations;
mod overlap;
mod queries;
mod resolver;

pub use error::{EngineError, ErrorKind};
pub use mutations::PolicyUpdate;
pub use overlap::{grace_overlaps, overlap_ms};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::directory::Directory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedTeamState = Arc<RwLock<TeamState>>;

/// How a schedule write treats overlapping coverage in its priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictMode {
    /// Fail with `Conflict` on the first overlap beyond the grace allowance.
    Reject,
    /// Repair existing coverage so the new schedule lands (truncate, push,
    /// or tombstone per the resolution rules).
    Resolve,
    /// Skip the overlap check entirely. For migrations and tests.
    Bypass,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        batch: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole group.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { batch, response } => {
                let mut pending = vec![(batch, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { batch, response }) => {
                            pending.push((batch, response));
                        }
                        Ok(other) => {
                            // Flush current group first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(pending.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_pending(&mut wal, &mut pending);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_pending(&mut pending, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush group
                    }
                }

                if !pending.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(pending.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_pending(&mut wal, &mut pending);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_pending(&mut pending, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_pending(
    wal: &mut Wal,
    pending: &mut [(Vec<Event>, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (batch, _) in pending.iter() {
        if let Err(e) = wal.append_buffered(batch) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next group (callers were told this group failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_pending(
    pending: &mut Vec<(Vec<Event>, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in pending.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// On-call coverage and escalation store: per-team state guarded by a
/// `RwLock`, durably logged to a single WAL, rebuilt from it on startup.
pub struct Engine {
    pub state: DashMap<Ulid, SharedTeamState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub directory: Arc<dyn Directory>,
    /// Reverse lookup: schedule/policy id → owning team id
    pub(super) owner_index: DashMap<Ulid, Ulid>,
    /// Service registry, keyed by normalized name.
    pub(super) services: DashMap<String, ServiceRecord>,
    /// Reverse lookup: service id → normalized name
    pub(super) service_ids: DashMap<Ulid, String>,
    /// Every write holds this shared across its WAL append and memory
    /// apply; `compact_wal` holds it exclusive across snapshot and file
    /// swap, so an acked append is never left only in the discarded file.
    pub(super) compact_gate: RwLock<()>,
    /// Serializes service registrations/removals: name and id uniqueness
    /// is check-then-append.
    pub(super) service_lock: Mutex<()>,
}

/// Apply an event directly to a TeamState (no locking — caller holds the lock).
fn apply_to_team(ts: &mut TeamState, event: &Event, owner_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ScheduleCreated {
            id,
            team_id,
            user_id,
            priority,
            span,
        } => {
            ts.insert_schedule(OnCallSchedule {
                id: *id,
                team_id: *team_id,
                user_id: *user_id,
                priority: *priority,
                span: *span,
                deleted_at: None,
            });
            owner_index.insert(*id, *team_id);
        }
        Event::ScheduleUpdated {
            id,
            team_id,
            user_id,
            priority,
            span,
        } => {
            ts.remove_schedule(*id);
            ts.insert_schedule(OnCallSchedule {
                id: *id,
                team_id: *team_id,
                user_id: *user_id,
                priority: *priority,
                span: *span,
                deleted_at: None,
            });
            owner_index.insert(*id, *team_id);
        }
        Event::ScheduleTruncated { id, end, .. } => {
            // end is not part of the sort key, safe to mutate in place.
            if let Some(s) = ts.schedule_mut(id) {
                s.span.end = *end;
            }
        }
        Event::ScheduleTombstoned { id, at, .. } => {
            if let Some(s) = ts.schedule_mut(id) {
                s.deleted_at = Some(*at);
            }
        }
        Event::ScheduleRestored { id, .. } => {
            if let Some(s) = ts.schedule_mut(id) {
                s.deleted_at = None;
            }
        }
        Event::SchedulePurged { id, .. } => {
            ts.remove_schedule(*id);
            owner_index.remove(id);
        }
        Event::PolicyVersionCreated {
            id,
            team_id,
            name,
            steps,
            version,
            is_latest,
        } => {
            if *is_latest {
                for p in ts.policies.iter_mut() {
                    p.is_latest = false;
                }
            }
            ts.insert_policy(EscalationPolicy {
                id: *id,
                team_id: *team_id,
                name: name.clone(),
                steps: steps.clone(),
                version: *version,
                is_latest: *is_latest,
                deleted_at: None,
            });
            ts.next_version = ts.next_version.max(version + 1);
            owner_index.insert(*id, *team_id);
        }
        Event::PolicyTombstoned { id, at, .. } => {
            if let Some(p) = ts.policy_mut(id) {
                p.deleted_at = Some(*at);
            }
        }
        Event::PolicyRestored { id, .. } => {
            if let Some(p) = ts.policy_mut(id) {
                p.deleted_at = None;
            }
        }
        Event::PolicyPurged { id, .. } => {
            ts.remove_policy(*id);
            owner_index.remove(id);
        }
        // Service events are handled at the Engine level, not here
        Event::ServiceRegistered { .. } | Event::ServiceRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn Directory>,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            directory,
            owner_index: DashMap::new(),
            services: DashMap::new(),
            service_ids: DashMap::new(),
            compact_gate: RwLock::new(()),
            service_lock: Mutex::new(()),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::ServiceRegistered { id, name, team_id } => {
                    engine.services.insert(
                        name.clone(),
                        ServiceRecord {
                            id: *id,
                            name: name.clone(),
                            team_id: *team_id,
                        },
                    );
                    engine.service_ids.insert(*id, name.clone());
                }
                Event::ServiceRemoved { id } => {
                    if let Some((_, name)) = engine.service_ids.remove(id) {
                        engine.services.remove(&name);
                    }
                }
                other => {
                    if let Some(team_id) = event_team_id(other) {
                        let ts_arc = engine.team_entry(team_id);
                        let mut guard = ts_arc.try_write().expect("replay: uncontended write");
                        apply_to_team(&mut guard, other, &engine.owner_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write one logical write's event batch to the WAL via the background
    /// group-commit writer. The whole batch lands in one record.
    async fn wal_append(&self, batch: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                batch,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_team(&self, id: &Ulid) -> Option<SharedTeamState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Which team owns a schedule or policy id.
    pub fn owner_team(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.owner_index.get(entity_id).map(|e| *e.value())
    }

    /// Team states materialize lazily: the first write for a team creates one.
    pub(super) fn team_entry(&self, team_id: Ulid) -> SharedTeamState {
        self.state
            .entry(team_id)
            .or_insert_with(|| Arc::new(RwLock::new(TeamState::new(team_id))))
            .clone()
    }

    /// WAL-append + apply + notify in one call. The batch is durable before
    /// any of it becomes visible; a WAL failure leaves state untouched.
    pub(super) async fn persist_and_apply(
        &self,
        team_id: Ulid,
        ts: &mut TeamState,
        batch: &[Event],
    ) -> Result<(), EngineError> {
        self.wal_append(batch.to_vec()).await?;
        for event in batch {
            apply_to_team(ts, event, &self.owner_index);
            self.notify.send(team_id, event);
        }
        Ok(())
    }

    /// Lookup entity → team, get team, acquire write lock.
    pub(super) async fn resolve_owner_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TeamState>), EngineError> {
        let team_id = self
            .owner_team(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ts = self
            .get_team(&team_id)
            .ok_or(EngineError::NotFound(team_id))?;
        let guard = ts.write_owned().await;
        Ok((team_id, guard))
    }
}

/// Extract the owning team id from an event (None for service events).
fn event_team_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ScheduleCreated { team_id, .. }
        | Event::ScheduleUpdated { team_id, .. }
        | Event::ScheduleTruncated { team_id, .. }
        | Event::ScheduleTombstoned { team_id, .. }
        | Event::ScheduleRestored { team_id, .. }
        | Event::SchedulePurged { team_id, .. }
        | Event::PolicyVersionCreated { team_id, .. }
        | Event::PolicyTombstoned { team_id, .. }
        | Event::PolicyRestored { team_id, .. }
        | Event::PolicyPurged { team_id, .. } => Some(*team_id),
        Event::ServiceRegistered { .. } | Event::ServiceRemoved { .. } => None,
    }
}
