//! [`TransitionTable`] – which locomotion states are directly reachable from
//! which.
//!
//! The table is built once and never mutated afterwards. The escape hatches
//! ([`ESCAPE_HATCHES`]) and the current state itself are reachable from
//! everywhere regardless of the table contents; [`TransitionTable::allows`]
//! applies that rule so callers never have to.

use std::collections::{BTreeMap, BTreeSet};

use strider_types::FsmState;

/// States that are always reachable: both remove torque or balance control
/// and are the way out of any posture.
pub const ESCAPE_HATCHES: [FsmState; 2] = [FsmState::Damp, FsmState::ZeroTorque];

/// Immutable mapping from a state to the states directly reachable from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTable {
    edges: BTreeMap<FsmState, BTreeSet<FsmState>>,
}

impl TransitionTable {
    /// Table with no edges. Only self-transitions and escape hatches are
    /// allowed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from `(from, [to, ...])` pairs. Repeated `from` entries
    /// are merged.
    pub fn from_edges<I, T>(edges: I) -> Self
    where
        I: IntoIterator<Item = (FsmState, T)>,
        T: IntoIterator<Item = FsmState>,
    {
        let mut map: BTreeMap<FsmState, BTreeSet<FsmState>> = BTreeMap::new();
        for (from, targets) in edges {
            map.entry(from).or_default().extend(targets);
        }
        Self { edges: map }
    }

    /// The table used by the operating controller.
    ///
    /// `LockStandAdvanced` has no entry: it is entered from the remote and
    /// left through the escape hatches.
    pub fn standard() -> Self {
        use FsmState::*;
        Self::from_edges([
            (ZeroTorque, vec![Damp]),
            (Damp, vec![ZeroTorque, Start, Sit, Squat, SquatToStand, StandUp]),
            (Squat, vec![Start, Damp, SquatToStand]),
            (Sit, vec![Start, Damp, LockStanding]),
            (LockStanding, vec![Start, Damp, LockStand]),
            (Start, vec![Damp, Sit, Squat, LockStand, Run]),
            (LockStand, vec![Damp, Run, Sit, SquatToStand]),
            (SquatToStand, vec![Damp, LockStand, Run]),
            (StandUp, vec![Damp, Start, LockStand, Run]),
            (Run, vec![Damp, LockStand, Sit, SquatToStand]),
        ])
    }

    /// Table entry for `from` only, without escape hatches or `from` itself.
    pub fn direct_targets(&self, from: FsmState) -> BTreeSet<FsmState> {
        self.edges.get(&from).cloned().unwrap_or_default()
    }

    /// `true` when `to` is `from`, an escape hatch, or listed for `from`.
    pub fn allows(&self, from: FsmState, to: FsmState) -> bool {
        to == from
            || ESCAPE_HATCHES.contains(&to)
            || self.edges.get(&from).is_some_and(|set| set.contains(&to))
    }

    /// Every state reachable from `from` in one step, including `from` and
    /// the escape hatches.
    pub fn reachable_from(&self, from: FsmState) -> BTreeSet<FsmState> {
        let mut set = self.direct_targets(from);
        set.extend(ESCAPE_HATCHES);
        set.insert(from);
        set
    }
}
