// Rotation State Machine
//
// Member:  positionless -> positioned(1..N)
// Circle:  uninitialized -> initialized -> cycling
//
// All mutations for one circle run under its keyed lock and hold the circle lease,
// so admin actions on one instance and the payout scanner on another never
// interleave. The scanner claims the lease and takes the lock itself, then calls
// `advance_locked`. Every rotation write is conditional on the cycle it read.

pub mod locks;
pub mod plan;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{Circle, CircleMember, CircleStatus};
use crate::ledger::store::{CircleStore, MemberDirectory};
use crate::schedule::ScheduleCalculator;

pub use locks::KeyedLocks;

#[derive(Debug, Clone, Serialize)]
pub struct NextPayee {
    pub member_id: Uuid,
    pub user_id: Uuid,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionEntry {
    pub member_id: Uuid,
    pub user_id: Uuid,
    pub payout_position: Option<i32>,
    pub next_payout_date: Option<DateTime<Utc>>,
}

/// Read model returned by every rotation action
#[derive(Debug, Clone, Serialize)]
pub struct RotationStatus {
    pub circle_id: Uuid,
    pub circle_status: CircleStatus,
    pub initialized: bool,
    pub member_count: usize,
    pub current_position: Option<i32>,
    pub current_cycle: i32,
    pub next_payee: Option<NextPayee>,
    pub next_payout_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<PositionEntry>,
    pub positions: Vec<PositionEntry>,
}

#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub previous_head: Uuid,
    pub new_head: Uuid,
    pub new_head_user: Uuid,
    pub current_cycle: i32,
    /// Every positioned member has now been paid once more
    pub lap_completed: bool,
}

pub struct RotationEngine {
    store: Arc<dyn CircleStore>,
    directory: Arc<dyn MemberDirectory>,
    calculator: ScheduleCalculator,
    locks: Arc<KeyedLocks>,
    lease_ttl: Duration,
}

impl RotationEngine {
    pub fn new(
        store: Arc<dyn CircleStore>,
        directory: Arc<dyn MemberDirectory>,
        calculator: ScheduleCalculator,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            directory,
            calculator,
            locks,
            lease_ttl: Duration::minutes(5),
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Exclusive access to one circle for the duration of the guard
    pub async fn lock_circle(&self, circle_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(circle_id).await
    }

    fn head_date(&self, circle: &Circle, now: DateTime<Utc>) -> DateTime<Utc> {
        self.calculator
            .next_occurrence(circle.frequency, None, None, now)
    }

    /// Claim the circle lease for one admin action, run it, then release
    async fn with_lease<T, F, Fut>(&self, circle_id: Uuid, now: DateTime<Utc>, action: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let owner = Uuid::new_v4();
        if !self
            .store
            .try_claim_circle(circle_id, owner, now, self.lease_ttl)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "circle {} is being processed by another operation",
                circle_id
            )));
        }

        let result = action().await;

        if let Err(e) = self.store.release_circle(circle_id, owner).await {
            warn!("Failed to release lease on circle {}: {}", circle_id, e);
        }
        result
    }

    async fn load_circle(&self, circle_id: Uuid) -> AppResult<Circle> {
        self.store
            .get_circle(circle_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Circle {} not found", circle_id)))
    }

    fn ensure_admin(members: &[CircleMember], user_id: Uuid) -> AppResult<()> {
        let is_admin = members
            .iter()
            .any(|m| m.user_id == user_id && m.is_admin);
        if !is_admin {
            return Err(AppError::Permission(format!(
                "user {} is not an admin of this circle",
                user_id
            )));
        }
        Ok(())
    }

    /// Assign payout positions and activate the circle
    #[instrument(skip(self))]
    pub async fn initialize(
        &self,
        circle_id: Uuid,
        admin_user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<RotationStatus> {
        let _guard = self.lock_circle(circle_id).await;

        let circle = self.load_circle(circle_id).await?;
        let members = self.store.list_members(circle_id).await?;

        if members.is_empty() {
            return Err(AppError::EmptyCircle(circle_id));
        }
        Self::ensure_admin(&members, admin_user_id)?;

        if matches!(circle.status, CircleStatus::Completed | CircleStatus::Cancelled) {
            return Err(AppError::Conflict(format!(
                "circle {} is {:?}",
                circle_id, circle.status
            )));
        }
        if members.iter().any(|m| m.payout_position.is_some()) {
            return Err(AppError::Conflict(format!(
                "rotation for circle {} is already initialized",
                circle_id
            )));
        }

        let head_date = self.head_date(&circle, now);
        let assignments = plan::plan_initialize(&members, head_date);

        let (store, assignments_ref, circle_ref) = (&self.store, &assignments, &circle);
        self.with_lease(circle_id, now, move || async move {
            store
                .apply_rotation(circle_id, assignments_ref, circle_ref.current_cycle, 0)
                .await?;

            if circle_ref.status == CircleStatus::Pending {
                store
                    .update_circle_status(circle_id, CircleStatus::Active)
                    .await?;
            }
            Ok(())
        })
        .await?;

        info!(
            "🔄 Rotation initialized for circle {} with {} members, first payout {}",
            circle_id,
            assignments.len(),
            head_date
        );

        self.status(circle_id, None).await
    }

    /// Admin-triggered advance
    #[instrument(skip(self))]
    pub async fn advance(
        &self,
        circle_id: Uuid,
        admin_user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<RotationStatus> {
        let _guard = self.lock_circle(circle_id).await;

        let members = self.store.list_members(circle_id).await?;
        Self::ensure_admin(&members, admin_user_id)?;

        let circle = self.load_circle(circle_id).await?;
        let circle = &circle;
        self.with_lease(circle_id, now, move || self.advance_locked(circle, now))
            .await?;
        self.status(circle_id, None).await
    }

    /// Rotate one step. The caller must hold the circle lock and lease.
    ///
    /// `circle` is the snapshot the caller acted on; if its cycle is stale the
    /// write fails with `Conflict` and nothing moves.
    /// Never changes `circle.status`; callers decide what a completed lap means.
    pub async fn advance_locked(&self, circle: &Circle, now: DateTime<Utc>) -> AppResult<AdvanceOutcome> {
        let members = self.store.list_members(circle.id).await?;
        let head_date = self.head_date(circle, now);

        let plan = plan::plan_advance(&members, head_date).ok_or_else(|| {
            AppError::Conflict(format!("rotation for circle {} is not initialized", circle.id))
        })?;

        let current_cycle = circle.current_cycle + 1;
        self.store
            .apply_rotation(circle.id, &plan.assignments, circle.current_cycle, current_cycle)
            .await?;

        let lap_completed = current_cycle % plan.member_count as i32 == 0;
        let new_head_user = members
            .iter()
            .find(|m| m.id == plan.new_head)
            .map(|m| m.user_id)
            .unwrap_or_default();

        if lap_completed {
            info!("🏁 Circle {} completed a rotation lap at cycle {}", circle.id, current_cycle);
        } else {
            info!(
                "➡️ Circle {} advanced to cycle {}, next payee member {}",
                circle.id, current_cycle, plan.new_head
            );
        }

        Ok(AdvanceOutcome {
            previous_head: plan.previous_head,
            new_head: plan.new_head,
            new_head_user,
            current_cycle,
            lap_completed,
        })
    }

    /// Pure read of the current rotation; `member_id` additionally selects one member's entry
    pub async fn status(&self, circle_id: Uuid, member_id: Option<Uuid>) -> AppResult<RotationStatus> {
        let circle = self.load_circle(circle_id).await?;
        let members = self.store.list_members(circle_id).await?;

        let queue = plan::positioned(&members);
        let head = queue.first().copied();

        let display_name = match head {
            Some(h) => match self.directory.display_names(&[h.user_id]).await {
                Ok(mut names) => names.remove(&h.user_id),
                Err(e) => {
                    // Profiles are decorative; never fail the status read on them
                    warn!("Profile lookup failed for circle {}: {}", circle_id, e);
                    None
                }
            },
            None => None,
        };

        let mut positions: Vec<PositionEntry> = members
            .iter()
            .map(|m| PositionEntry {
                member_id: m.id,
                user_id: m.user_id,
                payout_position: m.payout_position,
                next_payout_date: m.next_payout_date,
            })
            .collect();
        positions.sort_by_key(|p| (p.payout_position.is_none(), p.payout_position));

        let member = match member_id {
            Some(id) => Some(
                positions
                    .iter()
                    .find(|p| p.member_id == id || p.user_id == id)
                    .cloned()
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Member {} not found in circle {}", id, circle_id))
                    })?,
            ),
            None => None,
        };

        Ok(RotationStatus {
            circle_id,
            circle_status: circle.status,
            initialized: head.is_some(),
            member_count: members.len(),
            current_position: head.and_then(|h| h.payout_position),
            current_cycle: circle.current_cycle,
            next_payee: head.map(|h| NextPayee {
                member_id: h.id,
                user_id: h.user_id,
                display_name,
            }),
            next_payout_date: head.and_then(|h| h.next_payout_date),
            member,
            positions,
        })
    }
}
