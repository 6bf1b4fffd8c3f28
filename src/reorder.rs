use crate::models::{Axis, ClosestEdge, InsertSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    NoOp,
    MoveTo(usize),
}

/// Final index of the dragged entity once it is removed from `source_index`
/// and reinserted next to the entity at `target_index`.
///
/// Anything that would not change the list resolves to `NoOp`: a missing
/// edge, an edge that does not belong to `axis`, dropping onto itself, or
/// landing back on the original slot.
pub fn compute_new_order(
    source_index: usize,
    target_index: usize,
    edge: Option<ClosestEdge>,
    axis: Axis,
) -> ReorderOutcome {
    if source_index == target_index {
        return ReorderOutcome::NoOp;
    }
    let Some(side) = edge.and_then(|edge| edge.side(axis)) else {
        return ReorderOutcome::NoOp;
    };

    let final_index = if source_index < target_index {
        match side {
            InsertSide::After => target_index,
            InsertSide::Before => target_index - 1,
        }
    } else {
        match side {
            InsertSide::After => target_index + 1,
            InsertSide::Before => target_index,
        }
    };

    if final_index == source_index {
        ReorderOutcome::NoOp
    } else {
        ReorderOutcome::MoveTo(final_index)
    }
}

/// Same as [`compute_new_order`] but also rejects indices outside a list of
/// `len` entries; single-entry lists always resolve to `NoOp`.
pub fn compute_bounded(
    len: usize,
    source_index: usize,
    target_index: usize,
    edge: Option<ClosestEdge>,
    axis: Axis,
) -> ReorderOutcome {
    if len < 2 || source_index >= len || target_index >= len {
        return ReorderOutcome::NoOp;
    }
    match compute_new_order(source_index, target_index, edge, axis) {
        ReorderOutcome::MoveTo(index) if index < len => ReorderOutcome::MoveTo(index),
        _ => ReorderOutcome::NoOp,
    }
}

/// Stable remove-then-insert. Out of range indices leave the list untouched.
pub fn reorder_ids<T: Clone>(list: &[T], from: usize, to: usize) -> Vec<T> {
    let mut next = list.to_vec();
    if from >= next.len() || to >= next.len() || from == to {
        return next;
    }
    let moved = next.remove(from);
    next.insert(to, moved);
    next
}

/// `(id, position)` pairs assigning a contiguous order to every entry.
pub fn assign_contiguous_orders(ids: &[String]) -> Vec<(String, u32)> {
    ids.iter()
        .enumerate()
        .map(|(position, id)| (id.clone(), position as u32))
        .collect()
}
