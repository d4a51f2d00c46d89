//! Up/down moves among siblings.
//!
//! Siblings are sorted by (order, id), the moved item is spliced into its new
//! slot, and the whole group is renumbered 0..n-1 before the changed orders are
//! sent as one batch.

use std::collections::BTreeMap;

use tracing::{debug, error};

use curriculum_core::*;
use curriculum_storage::{RemoteRow, columns};

use crate::error::EngineError;
use crate::store::{CurriculumStore, Tracked};
use crate::Curriculum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Moved { from: usize, to: usize },
    /// Already first (or last) in its group.
    Unchanged,
}

/// A record that sits in an ordered sibling group.
pub trait Ordered: Tracked {
    type Scope: PartialEq + Send;

    fn scope(&self) -> Self::Scope;
    fn order(&self) -> i64;
    fn set_order(&mut self, order: i64);
}

impl Ordered for Folder {
    type Scope = ();

    fn scope(&self) {}

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

impl Ordered for Course {
    type Scope = Option<FolderId>;

    fn scope(&self) -> Option<FolderId> {
        self.folder_id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

impl Ordered for Stage {
    type Scope = CourseId;

    fn scope(&self) -> CourseId {
        self.course_id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

impl Ordered for Module {
    type Scope = StageId;

    fn scope(&self) -> StageId {
        self.stage_id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

/// Leaves reorder within their own content type only.
impl Ordered for LeafContent {
    type Scope = (LeafParent, ContentType);

    fn scope(&self) -> Self::Scope {
        (self.parent(), self.content_type())
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

/// Siblings of `entity`, including itself, sorted by (order, id).
pub fn siblings<E: Ordered>(store: &CurriculumStore, entity: &E) -> Vec<E> {
    let scope = entity.scope();
    let mut group: Vec<E> = E::collection(store)
        .values()
        .filter(|e| e.scope() == scope)
        .cloned()
        .collect();
    group.sort_by_key(|e| (e.order(), e.id()));
    group
}

/// Order a new member of `entity`'s group should take: one past the end.
pub fn next_order<E: Ordered>(store: &CurriculumStore, entity: &E) -> i64 {
    let scope = entity.scope();
    E::collection(store)
        .values()
        .filter(|e| e.id() != entity.id() && e.scope() == scope)
        .count() as i64
}

/// Move one step and renumber densely. `None` when the move is a no-op.
fn plan_move<E: Ordered>(group: &[E], id: E::Id, direction: Direction) -> Option<(usize, usize, Vec<E>)> {
    let from = group.iter().position(|e| e.id() == id)?;
    let to = match direction {
        Direction::Up => from.checked_sub(1)?,
        Direction::Down => Some(from + 1).filter(|to| *to < group.len())?,
    };
    let mut moved = group.to_vec();
    let item = moved.remove(from);
    moved.insert(to, item);
    for (index, entity) in moved.iter_mut().enumerate() {
        entity.set_order(index as i64);
    }
    Some((from, to, moved))
}

fn order_row<E: Ordered>(entity: &E) -> RemoteRow {
    let payload = entity.to_remote();
    [columns::ID, columns::ORDER]
        .into_iter()
        .filter_map(|column| payload.get(column).map(|v| (column.to_string(), v.clone())))
        .collect()
}

impl Curriculum {
    pub(crate) async fn reorder<E: Ordered>(&self, id: E::Id, direction: Direction) -> Result<ReorderOutcome, EngineError> {
        let planned = self.write(|store| {
            let target = store
                .get::<E>(id)
                .ok_or_else(|| EngineError::EntityNotFound(format!("{id:?}")))?;
            let group = siblings(store, target);
            let Some((from, to, moved)) = plan_move(&group, id, direction) else {
                return Ok(None);
            };
            for entity in &moved {
                store.insert(entity.clone());
            }
            Ok::<_, EngineError>(Some((from, to, group, moved, store.generation())))
        })?;

        let Some((from, to, snapshot, moved, generation)) = planned else {
            debug!(?id, ?direction, "already at the boundary");
            return Ok(ReorderOutcome::Unchanged);
        };

        let before: BTreeMap<E::Id, i64> = snapshot.iter().map(|e| (e.id(), e.order())).collect();
        let rows: Vec<RemoteRow> = moved
            .iter()
            .filter(|e| before.get(&e.id()) != Some(&e.order()))
            .map(order_row)
            .collect();
        let Some(table) = moved.first().map(|e| e.table()) else {
            return Ok(ReorderOutcome::Unchanged);
        };

        match self.remote.upsert(table, &rows).await {
            Ok(()) => {
                debug!(%table, ?id, from, to, changed = rows.len(), "reordered");
                Ok(ReorderOutcome::Moved { from, to })
            }
            Err(e) => {
                error!(%table, ?id, error = %e, "reorder failed, restoring sibling orders");
                self.rollback(generation, |store| {
                    for entity in snapshot {
                        store.insert(entity);
                    }
                });
                Err(e.into())
            }
        }
    }

    pub async fn reorder_folder(&self, id: FolderId, direction: Direction) -> Result<ReorderOutcome, EngineError> {
        self.reorder::<Folder>(id, direction).await
    }

    pub async fn reorder_course(&self, id: CourseId, direction: Direction) -> Result<ReorderOutcome, EngineError> {
        self.reorder::<Course>(id, direction).await
    }

    pub async fn reorder_stage(&self, id: StageId, direction: Direction) -> Result<ReorderOutcome, EngineError> {
        self.reorder::<Stage>(id, direction).await
    }

    pub async fn reorder_module(&self, id: ModuleId, direction: Direction) -> Result<ReorderOutcome, EngineError> {
        self.reorder::<Module>(id, direction).await
    }

    pub async fn reorder_leaf(&self, id: ContentId, direction: Direction) -> Result<ReorderOutcome, EngineError> {
        self.reorder::<LeafContent>(id, direction).await
    }
}
