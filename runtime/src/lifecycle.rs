//! In-process bookkeeping shared by the active strategies.

use cdc_bootstrap_core::control::{ControlRow, ControlRowId};
use cdc_bootstrap_core::replication::Position;
use cdc_bootstrap_core::row::RowMap;
use std::collections::{HashSet, VecDeque};

/// How many terminal markers are remembered; older ids are forgotten first.
pub(crate) const FINISHED_CAPACITY: usize = 1024;

/// The bootstrap currently holding the single-flight slot.
#[derive(Debug, Clone)]
pub(crate) struct ActiveBootstrap {
    pub(crate) request: ControlRow,
    /// Replication position captured when the bootstrap began.
    pub(crate) position: Option<Position>,
}

/// Single-flight slot, FIFO of waiting requests and the most recent ids whose
/// terminal marker has already been pushed.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    active: Option<ActiveBootstrap>,
    queue: VecDeque<ControlRow>,
    finished: HashSet<ControlRowId>,
    finished_order: VecDeque<ControlRowId>,
}

impl Lifecycle {
    pub(crate) const fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Whether `id` is running or waiting in this process.
    pub(crate) fn is_known(&self, id: ControlRowId) -> bool {
        self.active.as_ref().is_some_and(|a| a.request.id == id)
            || self.queue.iter().any(|row| row.id == id)
    }

    /// Whether a live row belongs to the table being bootstrapped.
    pub(crate) fn targets(&self, row: &RowMap) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.request.targets(row.database(), row.table()))
    }

    /// Claim the slot for `request`, or queue it if the slot is taken.
    ///
    /// Returns `true` when the caller now owns the slot.
    pub(crate) fn claim(&mut self, request: &ControlRow, position: Option<Position>) -> bool {
        if self.active.is_some() {
            if !self.is_known(request.id) {
                self.queue.push_back(request.clone());
            }
            return false;
        }
        self.active = Some(ActiveBootstrap {
            request: request.clone(),
            position,
        });
        true
    }

    /// Free the slot if `id` holds it.
    pub(crate) fn release(&mut self, id: ControlRowId) -> Option<ActiveBootstrap> {
        if self.active.as_ref().is_some_and(|a| a.request.id == id) {
            self.active.take()
        } else {
            None
        }
    }

    /// Free the slot whoever holds it.
    pub(crate) const fn release_any(&mut self) -> Option<ActiveBootstrap> {
        self.active.take()
    }

    /// Position to stamp on `id`'s terminal marker, if it began here.
    pub(crate) fn position_of(&self, id: ControlRowId) -> Option<Option<Position>> {
        self.active
            .as_ref()
            .filter(|a| a.request.id == id)
            .map(|a| a.position.clone())
    }

    pub(crate) fn is_finished(&self, id: ControlRowId) -> bool {
        self.finished.contains(&id)
    }

    pub(crate) fn mark_finished(&mut self, id: ControlRowId) {
        if !self.finished.insert(id) {
            return;
        }
        self.finished_order.push_back(id);
        while self.finished_order.len() > FINISHED_CAPACITY {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }

    pub(crate) fn next_queued(&mut self) -> Option<ControlRow> {
        self.queue.pop_front()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cdc_bootstrap_testing::helpers::{live_row, pending_request};

    #[test]
    fn second_claim_is_queued_once() {
        let mut lifecycle = Lifecycle::default();
        let first = pending_request(1, "shop", "orders");
        let second = pending_request(2, "shop", "customers");

        assert!(lifecycle.claim(&first, None));
        assert!(!lifecycle.claim(&second, None));
        assert!(!lifecycle.claim(&second, None));
        assert_eq!(lifecycle.queued(), 1);
        assert!(lifecycle.is_known(second.id));
    }

    #[test]
    fn release_only_frees_the_matching_slot() {
        let mut lifecycle = Lifecycle::default();
        let first = pending_request(1, "shop", "orders");
        lifecycle.claim(&first, None);

        assert!(lifecycle.release(ControlRowId::new(2)).is_none());
        assert!(lifecycle.is_running());
        assert!(lifecycle.release(first.id).is_some());
        assert!(!lifecycle.is_running());
    }

    #[test]
    fn targets_matches_the_active_table_only() {
        let mut lifecycle = Lifecycle::default();
        assert!(!lifecycle.targets(&live_row("shop", "orders", 1)));

        lifecycle.claim(&pending_request(1, "shop", "orders"), None);
        assert!(lifecycle.targets(&live_row("shop", "orders", 1)));
        assert!(!lifecycle.targets(&live_row("shop", "customers", 1)));
    }

    #[test]
    fn finished_ids_are_bounded() {
        let mut lifecycle = Lifecycle::default();
        let last = i64::try_from(FINISHED_CAPACITY).unwrap() + 1;
        for id in 1..=last {
            lifecycle.mark_finished(ControlRowId::new(id));
        }
        lifecycle.mark_finished(ControlRowId::new(last));

        assert!(!lifecycle.is_finished(ControlRowId::new(1)));
        assert!(lifecycle.is_finished(ControlRowId::new(2)));
        assert!(lifecycle.is_finished(ControlRowId::new(last)));
        assert_eq!(lifecycle.finished.len(), FINISHED_CAPACITY);
        assert_eq!(lifecycle.finished_order.len(), FINISHED_CAPACITY);
    }

    proptest::proptest! {
        #[test]
        fn slot_and_queue_never_share_an_id(ops in proptest::collection::vec((1i64..6, proptest::bool::ANY), 0..40)) {
            let mut lifecycle = Lifecycle::default();
            for (id, claim) in ops {
                let request = pending_request(id, "shop", "orders");
                if claim {
                    lifecycle.claim(&request, None);
                } else if lifecycle.release(request.id).is_some() {
                    if let Some(next) = lifecycle.next_queued() {
                        lifecycle.claim(&next, None);
                    }
                }

                let active = lifecycle.active.as_ref().map(|a| a.request.id);
                proptest::prop_assert!(active.is_none_or(|id| !lifecycle.queue.iter().any(|r| r.id == id)));
                let mut ids: Vec<_> = lifecycle.queue.iter().map(|r| r.id.get()).collect();
                ids.sort_unstable();
                ids.dedup();
                proptest::prop_assert_eq!(ids.len(), lifecycle.queued());
            }
        }
    }
}
