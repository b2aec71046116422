use crate::protocol::{InsertPosition, Memory, MoveDirection};

/// Sorts memories into display order: ascending sort key, then creation time.
/// The sort is stable, so rows with equal keys and timestamps keep their load order.
pub fn sort_for_display(memories: &mut [Memory]) {
    memories.sort_by(|left, right| {
        left.sort_order
            .cmp(&right.sort_order)
            .then_with(|| left.created_at.cmp(&right.created_at))
    });
}

/// Sort key for a new memory. Top goes below every key and never above -1,
/// bottom goes above every key and never below 1.
pub fn insertion_sort_order<I>(existing: I, position: InsertPosition) -> i64
where
    I: IntoIterator<Item = i64>,
{
    match position {
        InsertPosition::Top => existing.into_iter().fold(0, i64::min) - 1,
        InsertPosition::Bottom => existing.into_iter().fold(0, i64::max) + 1,
    }
}

/// Display index the memory at `index` would swap with, if there is one.
pub fn move_target(len: usize, index: usize, direction: MoveDirection) -> Option<usize> {
    if index >= len {
        return None;
    }
    match direction {
        MoveDirection::Up => index.checked_sub(1),
        MoveDirection::Down => {
            let target = index + 1;
            (target < len).then_some(target)
        }
    }
}

/// Reassigns dense keys 1..=N in the current slice order.
pub fn renumber(memories: &mut [Memory]) {
    for (position, memory) in memories.iter_mut().enumerate() {
        memory.sort_order = position as i64 + 1;
    }
}

/// Swaps the memory at `index` with its neighbour and renumbers the whole list.
/// Returns false and leaves the list untouched when there is no neighbour.
pub fn move_adjacent(memories: &mut [Memory], index: usize, direction: MoveDirection) -> bool {
    let Some(target) = move_target(memories.len(), index, direction) else {
        return false;
    };
    memories.swap(index, target);
    renumber(memories);
    true
}
