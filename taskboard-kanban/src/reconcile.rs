//! Deciding what a server answer means for local state, and applying it.
//!
//! [`ReconciliationPolicy::decide`] is a pure function of the pending move,
//! the item's current local placement and the server's answer. Applying the
//! resulting [`Resolution`] is the only place besides the optimistic apply
//! that writes item placements.

use crate::allocator::PositionAllocator;
use crate::api::TaskRecord;
use crate::error::ApiError;
use crate::store::{BoardChange, BoardStore};
use crate::types::{
    ConflictNotice, IgnoreReason, IntentId, ItemId, MoveOutcome, PendingMove, Placement, Position,
};
use tracing::{debug, info, warn};

/// What to do with a server answer
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Server agrees with the local placement
    Confirm,
    /// Same list, different position; the server's value wins
    AcceptServer { position: Position },
    /// The item is somewhere the user did not put it
    SurfaceConflict {
        actual: Option<Placement>,
        message: String,
    },
    /// Undo the move
    RollBack { error: ApiError },
    /// Not the current move of this item
    Ignore(IgnoreReason),
}

/// Where the server holds an item, judging by a superseded move's answer
#[derive(Debug, Clone, PartialEq)]
pub enum ServerView {
    At(Placement),
    /// The server refused the move; the item is still where that move started
    Unchanged,
    /// The call may or may not have been applied
    Uncertain,
}

/// Policy mapping server answers to [`Resolution`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationPolicy;

impl ReconciliationPolicy {
    /// Decide how to treat the answer for `intent_id`.
    ///
    /// `pending` is the item's current pending move, if any; `local` its
    /// current placement; `retired` what is remembered about the intent if
    /// it is no longer current.
    pub fn decide(
        pending: Option<&PendingMove>,
        intent_id: IntentId,
        local: Option<&Placement>,
        answer: &Result<TaskRecord, ApiError>,
        retired: Option<IgnoreReason>,
    ) -> Resolution {
        let Some(pending) = pending.filter(|p| p.intent_id == intent_id) else {
            return Resolution::Ignore(retired.unwrap_or(IgnoreReason::Unknown));
        };
        let Some(local) = local else {
            return Resolution::Ignore(IgnoreReason::Cancelled);
        };

        match answer {
            Ok(record) => Self::on_response(pending, local, record),
            Err(error) => Self::on_failure(pending, error),
        }
    }

    /// The server accepted the move and reported where the item ended up
    pub fn on_response(
        pending: &PendingMove,
        local: &Placement,
        record: &TaskRecord,
    ) -> Resolution {
        if record.list_id != pending.optimistic_parent_id {
            return Resolution::SurfaceConflict {
                actual: Some(record.placement()),
                message: format!(
                    "task {} is in list {}, not {}",
                    record.id, record.list_id, pending.optimistic_parent_id
                ),
            };
        }
        if record.position == local.position {
            Resolution::Confirm
        } else {
            Resolution::AcceptServer {
                position: record.position,
            }
        }
    }

    /// What the answer of a superseded move reveals about the server's copy
    /// of the item
    pub fn on_superseded(answer: &Result<TaskRecord, ApiError>) -> ServerView {
        match answer {
            Ok(record) => ServerView::At(record.placement()),
            Err(ApiError::Conflict {
                current: Some(record),
                ..
            }) => ServerView::At(record.placement()),
            Err(
                ApiError::Unauthorized
                | ApiError::Forbidden
                | ApiError::NotFound { .. }
                | ApiError::Rejected { .. },
            ) => ServerView::Unchanged,
            Err(_) => ServerView::Uncertain,
        }
    }

    /// The move failed, after any automatic retry
    pub fn on_failure(pending: &PendingMove, error: &ApiError) -> Resolution {
        match error {
            ApiError::Conflict { message, current } => Resolution::SurfaceConflict {
                actual: current.as_ref().map(|record| record.placement()),
                message: if message.is_empty() {
                    format!("task {} was changed by someone else", pending.item_id)
                } else {
                    message.clone()
                },
            },
            other => Resolution::RollBack {
                error: other.clone(),
            },
        }
    }

    /// Apply a resolution for `pending` to the store and describe the result
    pub fn apply(
        store: &mut BoardStore,
        alloc: &PositionAllocator,
        pending: &PendingMove,
        resolution: Resolution,
    ) -> MoveOutcome {
        let intent_id = pending.intent_id;
        let item_id = pending.item_id.clone();

        match resolution {
            Resolution::Confirm => {
                debug!(item = %item_id, %intent_id, "move confirmed");
                MoveOutcome::Confirmed {
                    intent_id,
                    placement: store
                        .placement_of(&item_id)
                        .unwrap_or_else(|| pending.optimistic()),
                    item_id,
                }
            }
            Resolution::AcceptServer { position } => {
                let list_id = pending.optimistic_parent_id.clone();
                let index_of = |store: &BoardStore| {
                    store
                        .list(&list_id)
                        .and_then(|l| l.items.index_of(&item_id).ok())
                };
                let before = index_of(store);
                let placement = Placement::new(list_id.clone(), position);
                relocate_and_commit(store, alloc, &item_id, &placement);
                let after = index_of(store);
                debug!(
                    item = %item_id,
                    optimistic = %pending.optimistic_position,
                    server = %position,
                    "accepted server position"
                );
                MoveOutcome::Corrected {
                    intent_id,
                    item_id,
                    optimistic: pending.optimistic_position,
                    placement,
                    order_changed: before != after,
                }
            }
            Resolution::SurfaceConflict { actual, message } => {
                info!(item = %item_id, %intent_id, %message, "move conflicted with another actor");
                match &actual {
                    Some(placement) if store.has_list(&placement.list_id) => {
                        relocate_and_commit(store, alloc, &item_id, placement);
                    }
                    Some(placement) => {
                        // Server placed it in a list this board does not show
                        if let Ok(item) = store.detach(&item_id) {
                            store.commit(BoardChange::ItemRemoved {
                                item_id: item.id,
                                list_id: pending.optimistic_parent_id.clone(),
                            });
                        }
                        debug!(list = %placement.list_id, "conflict placement is off-board");
                    }
                    None => {
                        restore_prior(store, alloc, pending);
                    }
                }
                MoveOutcome::Conflict {
                    intent_id,
                    notice: ConflictNotice {
                        item_id,
                        attempted_list_id: pending.optimistic_parent_id.clone(),
                        actual,
                        message,
                    },
                }
            }
            Resolution::RollBack { error } => {
                info!(item = %item_id, %intent_id, %error, "rolling back move");
                let restored = restore_prior(store, alloc, pending);
                MoveOutcome::RolledBack {
                    intent_id,
                    item_id,
                    restored,
                    kind: error.kind(),
                    error,
                }
            }
            Resolution::Ignore(reason) => {
                debug!(item = %item_id, %intent_id, ?reason, "ignoring response");
                MoveOutcome::Ignored {
                    intent_id,
                    item_id,
                    reason,
                }
            }
        }
    }
}

fn relocate_and_commit(
    store: &mut BoardStore,
    alloc: &PositionAllocator,
    item_id: &ItemId,
    placement: &Placement,
) {
    match store.relocate(item_id, placement, alloc) {
        Ok(_) => {
            let placement = store
                .placement_of(item_id)
                .unwrap_or_else(|| placement.clone());
            store.commit(BoardChange::Reconciled {
                item_id: item_id.clone(),
                placement,
            });
        }
        Err(e) => warn!(item = %item_id, error = %e, "could not apply server placement"),
    }
}

/// Put the item back where it was before `pending` was applied. Returns the
/// restored placement, or `None` if the prior list is gone and the item was
/// dropped instead.
fn restore_prior(
    store: &mut BoardStore,
    alloc: &PositionAllocator,
    pending: &PendingMove,
) -> Option<Placement> {
    let item_id = &pending.item_id;
    let restored = if store.has_list(&pending.prior.list_id) {
        match store.relocate(item_id, &pending.prior, alloc) {
            Ok(_) => store.placement_of(item_id),
            Err(e) => {
                warn!(item = %item_id, error = %e, "could not restore prior placement");
                None
            }
        }
    } else {
        if let Err(e) = store.detach(item_id) {
            warn!(item = %item_id, error = %e, "could not drop item from removed list");
        }
        None
    };
    store.commit(BoardChange::RolledBack {
        item_id: item_id.clone(),
        to: restored.clone(),
    });
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Item, ListId, MoveState};
    use chrono::Utc;

    fn pos(v: f64) -> Position {
        Position::new(v).unwrap()
    }

    fn pending(intent_id: IntentId) -> PendingMove {
        PendingMove {
            intent_id,
            item_id: "T".into(),
            optimistic_parent_id: "L2".into(),
            optimistic_position: pos(4.0),
            prior: Placement::new("L1".into(), pos(2.0)),
            server_placement: Some(Placement::new("L1".into(), pos(2.0))),
            target_index: 3,
            issued_at: Utc::now(),
            state: MoveState::Confirming,
        }
    }

    fn record(list: &str, position: f64) -> TaskRecord {
        TaskRecord::from(&Item::new("T", list, pos(position)))
    }

    fn local() -> Placement {
        Placement::new("L2".into(), pos(4.0))
    }

    #[test]
    fn test_matching_answer_confirms() {
        let intent = IntentId::new();
        let resolution = ReconciliationPolicy::decide(
            Some(&pending(intent)),
            intent,
            Some(&local()),
            &Ok(record("L2", 4.0)),
            None,
        );
        assert_eq!(resolution, Resolution::Confirm);
    }

    #[test]
    fn test_same_list_other_position_accepts_server() {
        let intent = IntentId::new();
        let resolution = ReconciliationPolicy::decide(
            Some(&pending(intent)),
            intent,
            Some(&local()),
            &Ok(record("L2", 10.0)),
            None,
        );
        assert_eq!(
            resolution,
            Resolution::AcceptServer {
                position: pos(10.0)
            }
        );
    }

    #[test]
    fn test_other_list_surfaces_conflict() {
        let intent = IntentId::new();
        let resolution = ReconciliationPolicy::decide(
            Some(&pending(intent)),
            intent,
            Some(&local()),
            &Ok(record("L3", 1.0)),
            None,
        );
        assert!(matches!(
            resolution,
            Resolution::SurfaceConflict { actual: Some(ref p), .. } if p.list_id == ListId::from("L3")
        ));
    }

    #[test]
    fn test_conflict_error_surfaces_conflict() {
        let intent = IntentId::new();
        let resolution = ReconciliationPolicy::decide(
            Some(&pending(intent)),
            intent,
            Some(&local()),
            &Err(ApiError::conflict("", None)),
            None,
        );
        match resolution {
            Resolution::SurfaceConflict { actual, message } => {
                assert!(actual.is_none());
                assert!(message.contains("changed by someone else"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failures_roll_back() {
        let intent = IntentId::new();
        for error in [
            ApiError::network("reset"),
            ApiError::Timeout { elapsed_ms: 10 },
            ApiError::Forbidden,
            ApiError::not_found("list", "L2"),
        ] {
            let resolution = ReconciliationPolicy::decide(
                Some(&pending(intent)),
                intent,
                Some(&local()),
                &Err(error.clone()),
                None,
            );
            assert_eq!(resolution, Resolution::RollBack { error });
        }
    }

    #[test]
    fn test_stale_intent_is_ignored() {
        let current = IntentId::new();
        let stale = IntentId::new();
        let resolution = ReconciliationPolicy::decide(
            Some(&pending(current)),
            stale,
            Some(&local()),
            &Ok(record("L2", 4.0)),
            Some(IgnoreReason::Superseded),
        );
        assert_eq!(resolution, Resolution::Ignore(IgnoreReason::Superseded));

        let resolution =
            ReconciliationPolicy::decide(None, stale, None, &Ok(record("L2", 4.0)), None);
        assert_eq!(resolution, Resolution::Ignore(IgnoreReason::Unknown));
    }

    #[test]
    fn test_superseded_answer_reveals_server_placement() {
        assert_eq!(
            ReconciliationPolicy::on_superseded(&Ok(record("L2", 3.0))),
            ServerView::At(Placement::new("L2".into(), pos(3.0)))
        );
        let moved_elsewhere = ApiError::conflict("moved", Some(record("L9", 1.0)));
        assert_eq!(
            ReconciliationPolicy::on_superseded(&Err(moved_elsewhere)),
            ServerView::At(Placement::new("L9".into(), pos(1.0)))
        );
        for refused in [
            ApiError::Forbidden,
            ApiError::Rejected {
                status: 422,
                message: "bad index".into(),
            },
        ] {
            assert_eq!(
                ReconciliationPolicy::on_superseded(&Err(refused)),
                ServerView::Unchanged
            );
        }
        for unsure in [
            ApiError::network("reset"),
            ApiError::Timeout { elapsed_ms: 10 },
            ApiError::conflict("moved", None),
        ] {
            assert_eq!(
                ReconciliationPolicy::on_superseded(&Err(unsure)),
                ServerView::Uncertain
            );
        }
    }

    #[test_log::test]
    fn test_rollback_of_vanished_item_into_removed_list_drops_nothing() {
        // Neither the prior list nor the item is left on the board
        let mut store = BoardStore::new("board");
        store.ensure_list(&"L2".into());
        let outcome = ReconciliationPolicy::apply(
            &mut store,
            &PositionAllocator::default(),
            &pending(IntentId::new()),
            Resolution::RollBack {
                error: ApiError::Forbidden,
            },
        );
        assert!(matches!(
            outcome,
            MoveOutcome::RolledBack { restored: None, .. }
        ));
        assert!(store.item(&"T".into()).is_none());
        assert!(store.get_snapshot(&"L2".into()).unwrap().is_empty());
    }
}
