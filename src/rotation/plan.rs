// Pure rotation planning: no I/O, no clock.
//
// Positions are always re-emitted as 1..N in rotation order, so a plan applied
// to the store restores the contiguous-permutation invariant even when the stored
// positions had a gap.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ledger::models::{CircleMember, PositionAssignment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancePlan {
    pub assignments: Vec<PositionAssignment>,
    pub previous_head: Uuid,
    pub new_head: Uuid,
    /// Positioned members taking part in the rotation
    pub member_count: usize,
}

/// Deterministic rotation order for a fresh circle: join time, then member id
pub fn rotation_order(members: &[CircleMember]) -> Vec<&CircleMember> {
    let mut ordered: Vec<&CircleMember> = members.iter().collect();
    ordered.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
    ordered
}

/// Positions 1..N in rotation order; only the head gets a payout date
pub fn plan_initialize(members: &[CircleMember], head_date: DateTime<Utc>) -> Vec<PositionAssignment> {
    rotation_order(members)
        .into_iter()
        .enumerate()
        .map(|(index, member)| PositionAssignment {
            member_id: member.id,
            payout_position: Some(index as i32 + 1),
            next_payout_date: (index == 0).then_some(head_date),
        })
        .collect()
}

/// Positioned members sorted by current position
pub fn positioned(members: &[CircleMember]) -> Vec<&CircleMember> {
    let mut ordered: Vec<&CircleMember> = members
        .iter()
        .filter(|m| m.payout_position.is_some())
        .collect();
    ordered.sort_by_key(|m| (m.payout_position, m.joined_at));
    ordered
}

/// Rotate the queue by one: the head goes to the tail, everyone else moves up.
///
/// Returns `None` when no member holds a position.
pub fn plan_advance(members: &[CircleMember], head_date: DateTime<Utc>) -> Option<AdvancePlan> {
    let mut queue = positioned(members);
    if queue.is_empty() {
        return None;
    }

    let previous_head = queue.remove(0);
    queue.push(previous_head);
    let new_head = queue[0];
    let member_count = queue.len();

    let assignments = queue
        .iter()
        .enumerate()
        .map(|(index, member)| PositionAssignment {
            member_id: member.id,
            payout_position: Some(index as i32 + 1),
            next_payout_date: (index == 0).then_some(head_date),
        })
        .collect();

    Some(AdvancePlan {
        assignments,
        previous_head: previous_head.id,
        new_head: new_head.id,
        member_count,
    })
}

/// Apply assignments to an in-memory member list
pub fn apply(members: &mut [CircleMember], assignments: &[PositionAssignment]) {
    for assignment in assignments {
        if let Some(member) = members.iter_mut().find(|m| m.id == assignment.member_id) {
            member.payout_position = assignment.payout_position;
            member.next_payout_date = assignment.next_payout_date;
        }
    }
}

/// True when positions form exactly {1..N} with a single dated head
pub fn is_contiguous(members: &[CircleMember]) -> bool {
    let mut positions: Vec<i32> = members.iter().filter_map(|m| m.payout_position).collect();
    positions.sort_unstable();
    positions.iter().enumerate().all(|(i, p)| *p == i as i32 + 1)
}
