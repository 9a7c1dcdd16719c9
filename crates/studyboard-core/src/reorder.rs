//! Drag-and-drop ordering of sibling resources
//!
//! Order positions are dense: after any move every sibling's position is
//! its 1-based index. A move is an array move, so the items between the old
//! and new index all shift by one.

use studyboard_api::{OrderPosition, Ordered};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    #[error("No item with id {0} in this list")]
    UnknownItem(String),

    #[error("Item {0} is already being dragged")]
    AlreadyDragging(String),

    #[error("No item is being dragged")]
    NotDragging,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragState {
    Idle,
    Dragging {
        id: String,
        from: usize,
        over: usize,
    },
}

/// Moves the element at `from` to `to`, shifting everything in between
pub fn move_index<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from == to || from >= items.len() {
        return;
    }
    let to = to.min(items.len() - 1);
    let item = items.remove(from);
    items.insert(to, item);
}

/// Rewrites every position to its 1-based index and returns the batch.
/// Forward links are rebuilt too when the siblings carry them.
pub fn reindex<T: Ordered>(items: &mut [T]) -> Vec<OrderPosition> {
    relink(items);
    items
        .iter_mut()
        .enumerate()
        .map(|(index, item)| {
            let position = index as i64 + 1;
            item.set_order_position(position);
            OrderPosition::new(item.id(), position)
        })
        .collect()
}

/// Points each sibling's `next` at its successor in list order. Lists whose
/// server does not track links are left alone.
pub fn relink<T: Ordered>(items: &mut [T]) {
    if !items.iter().any(|item| item.ordering().next.is_some()) {
        return;
    }
    let successors: Vec<Option<String>> = items
        .iter()
        .skip(1)
        .map(|item| Some(item.id().to_string()))
        .chain(std::iter::once(None))
        .collect();
    for (item, next) in items.iter_mut().zip(successors) {
        item.ordering_mut().next = next;
    }
}

/// Dense positions for `items` in their current order, without mutating them
pub fn dense_positions<T: Ordered>(items: &[T]) -> Vec<OrderPosition> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| OrderPosition::new(item.id(), index as i64 + 1))
        .collect()
}

pub fn sort_by_position<T: Ordered>(items: &mut [T]) {
    items.sort_by_key(|item| item.order_position());
}

/// True when the positions are exactly `1..=len` in list order
pub fn is_dense<T: Ordered>(items: &[T]) -> bool {
    items
        .iter()
        .enumerate()
        .all(|(index, item)| item.order_position() == index as i64 + 1)
}

/// Position for a sibling appended to `items`
pub fn next_position<T: Ordered>(items: &[T]) -> i64 {
    items
        .iter()
        .map(|item| item.order_position())
        .max()
        .unwrap_or(0)
        + 1
}

/// Ordered sibling list with drag state
#[derive(Debug, Clone)]
pub struct ReorderList<T> {
    items: Vec<T>,
    state: DragState,
    before_drop: Option<Vec<T>>,
}

impl<T: Ordered> ReorderList<T> {
    pub fn new(mut items: Vec<T>) -> Self {
        sort_by_position(&mut items);
        Self {
            items,
            state: DragState::Idle,
            before_drop: None,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id()).collect()
    }

    fn index_of(&self, id: &str) -> Result<usize, ReorderError> {
        self.items
            .iter()
            .position(|item| item.id() == id)
            .ok_or_else(|| ReorderError::UnknownItem(id.to_string()))
    }

    pub fn pick_up(&mut self, id: &str) -> Result<(), ReorderError> {
        if let DragState::Dragging { id: current, .. } = &self.state {
            return Err(ReorderError::AlreadyDragging(current.clone()));
        }
        let from = self.index_of(id)?;
        self.state = DragState::Dragging {
            id: id.to_string(),
            from,
            over: from,
        };
        Ok(())
    }

    /// Moves the drop target; indexes past the end clamp to the last slot
    pub fn drag_over(&mut self, index: usize) -> Result<(), ReorderError> {
        let last = self.items.len().saturating_sub(1);
        match &mut self.state {
            DragState::Dragging { over, .. } => {
                *over = index.min(last);
                Ok(())
            }
            DragState::Idle => Err(ReorderError::NotDragging),
        }
    }

    /// Order the list would have if the item were dropped now
    pub fn preview(&self) -> Vec<&T> {
        let mut refs: Vec<&T> = self.items.iter().collect();
        if let DragState::Dragging { from, over, .. } = self.state {
            move_index(&mut refs, from, over);
        }
        refs
    }

    pub fn cancel_drag(&mut self) {
        self.state = DragState::Idle;
    }

    /// Drops the dragged item on the current target.
    ///
    /// Returns the new positions of every sibling, or `None` when the item
    /// lands on its own slot (nothing changes and nothing is sent).
    pub fn drop_item(&mut self) -> Result<Option<Vec<OrderPosition>>, ReorderError> {
        let (from, over) = match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging { from, over, .. } => (from, over),
            DragState::Idle => return Err(ReorderError::NotDragging),
        };
        if from == over {
            return Ok(None);
        }
        Ok(Some(self.apply_move(from, over)))
    }

    /// Keyboard / programmatic move of `id` to `to_index`
    pub fn move_item(
        &mut self,
        id: &str,
        to_index: usize,
    ) -> Result<Option<Vec<OrderPosition>>, ReorderError> {
        if self.is_dragging() {
            return Err(ReorderError::AlreadyDragging(id.to_string()));
        }
        let from = self.index_of(id)?;
        let to = to_index.min(self.items.len().saturating_sub(1));
        if from == to {
            return Ok(None);
        }
        Ok(Some(self.apply_move(from, to)))
    }

    fn apply_move(&mut self, from: usize, to: usize) -> Vec<OrderPosition> {
        self.before_drop = Some(self.items.clone());
        move_index(&mut self.items, from, to);
        reindex(&mut self.items)
    }

    /// Restores the order from before the last drop
    pub fn rollback(&mut self) -> bool {
        match self.before_drop.take() {
            Some(previous) => {
                self.items = previous;
                true
            }
            None => false,
        }
    }

    /// Forgets the pre-drop snapshot once the server accepted the order
    pub fn confirm(&mut self) {
        self.before_drop = None;
    }

    /// Adopts the server's order unless a drag is in progress
    pub fn sync_from_server(&mut self, mut items: Vec<T>) -> bool {
        if self.is_dragging() {
            return false;
        }
        sort_by_position(&mut items);
        self.items = items;
        self.before_drop = None;
        true
    }
}
