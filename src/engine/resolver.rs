use ulid::Ulid;

use crate::limits::DEFAULT_CHAIN_TIMEOUT_MIN;
use crate::model::*;

use super::overlap::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// Materialize the ordered notification chain for a service: the current
    /// on-call first (order 0), then the latest policy's steps with their own
    /// order values. Degrades instead of failing — a team with no coverage or
    /// no policy yields a shorter chain, and targets the directory no longer
    /// knows are marked `missing` rather than dropped.
    pub async fn resolve_responsibility(
        &self,
        service_name: &str,
    ) -> Result<ResponsibilityChain, EngineError> {
        let start = std::time::Instant::now();
        let service = self
            .get_service(service_name)
            .ok_or_else(|| EngineError::ServiceNotFound(normalize_name(service_name)))?;
        let team = self
            .directory
            .team(service.team_id)
            .await
            .ok_or(EngineError::NotFound(service.team_id))?;

        // Snapshot under the team read lock, resolve targets after dropping it.
        let (on_call, policy) = match self.get_team(&service.team_id) {
            Some(ts) => {
                let guard = ts.read().await;
                let now = now_ms();
                let on_call = guard
                    .schedules
                    .iter()
                    .find(|s| !s.is_deleted() && s.span.contains_instant(now))
                    .cloned();
                (on_call, guard.latest_policy().cloned())
            }
            None => (None, None),
        };

        let mut links = Vec::new();
        if let Some(s) = &on_call {
            // The on-call link borrows its timeout from the first policy step.
            let timeout = policy
                .as_ref()
                .and_then(|p| p.steps.first())
                .map(|step| step.timeout_minutes)
                .unwrap_or(DEFAULT_CHAIN_TIMEOUT_MIN);
            links.push(ChainLink {
                order: 0,
                kind: EscalationKind::User,
                timeout_minutes: timeout,
                target: self.lookup_target(EscalationKind::User, s.user_id).await,
            });
        }
        if let Some(p) = &policy {
            for step in &p.steps {
                links.push(ChainLink {
                    order: step.order,
                    kind: step.kind,
                    timeout_minutes: step.timeout_minutes,
                    target: self.lookup_target(step.kind, step.target_id).await,
                });
            }
        }

        metrics::counter!(crate::observability::RESOLUTIONS_TOTAL).increment(1);
        metrics::histogram!(crate::observability::RESOLUTION_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());

        Ok(ResponsibilityChain {
            service: service.name,
            team_id: service.team_id,
            team_name: team.name,
            links,
        })
    }

    async fn lookup_target(&self, kind: EscalationKind, id: Ulid) -> ChainTarget {
        let contact = match kind {
            EscalationKind::User => self.directory.user(id).await,
            EscalationKind::Team => self.directory.team(id).await,
        };
        match contact {
            Some(c) => ChainTarget {
                id,
                name: Some(c.name),
                missing: false,
            },
            None => ChainTarget {
                id,
                name: None,
                missing: true,
            },
        }
    }
}
