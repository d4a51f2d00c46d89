//! Subtree deletes.
//!
//! The remote never cascades on its own, so children go first: leaves grouped
//! by their content table, then modules, then stages, then the container. The
//! whole subtree disappears from the store up front and comes back in one
//! piece if any of those deletes fails. Completion records and calendar
//! entries that point at the removed leaves are cleaned up on a best-effort
//! basis.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use curriculum_core::*;
use curriculum_storage::{Filter, RemoteEntity, RemoteRow, Table, columns};

use crate::error::EngineError;
use crate::store::CurriculumStore;
use crate::Curriculum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Course(CourseId),
    Stage(StageId),
    Module(ModuleId),
}

/// Snapshot of everything a container delete removes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadePlan {
    pub course: Option<Course>,
    pub stages: Vec<Stage>,
    pub modules: Vec<Module>,
    pub leaves: Vec<LeafContent>,
    /// Completion-set entries dropped along with the leaves.
    pub completions: Vec<(UserId, ContentType, ContentId)>,
}

impl CascadePlan {
    /// Collect the subtree under `container`.
    pub fn collect(store: &CurriculumStore, container: Container) -> Result<Self, EngineError> {
        let mut plan = Self::default();
        match container {
            Container::Course(id) => {
                let course = store
                    .course(id)
                    .ok_or_else(|| EngineError::EntityNotFound(format!("course {id}")))?;
                plan.course = Some(course.clone());
                plan.stages = store.stages_of(id).into_iter().cloned().collect();
                // Course-direct leaves included.
                plan.leaves = store.leaves_of_course(id).into_iter().cloned().collect();
            }
            Container::Stage(id) => {
                let stage = store
                    .stage(id)
                    .ok_or_else(|| EngineError::EntityNotFound(format!("stage {id}")))?;
                plan.stages = vec![stage.clone()];
            }
            Container::Module(id) => {
                let module = store
                    .module(id)
                    .ok_or_else(|| EngineError::EntityNotFound(format!("module {id}")))?;
                plan.modules = vec![module.clone()];
            }
        }

        if !matches!(container, Container::Module(_)) {
            plan.modules = plan
                .stages
                .iter()
                .flat_map(|s| store.modules_of(s.id))
                .cloned()
                .collect();
        }
        if !matches!(container, Container::Course(_)) {
            plan.leaves = plan
                .modules
                .iter()
                .flat_map(|m| store.leaves_of_module(m.id))
                .cloned()
                .collect();
        }
        Ok(plan)
    }

    pub fn leaf_ids(&self) -> Vec<ContentId> {
        self.leaves.iter().map(|l| l.id).collect()
    }

    /// Leaf ids grouped by the table they live in.
    pub fn leaves_by_table(&self) -> BTreeMap<Table, Vec<ContentId>> {
        let mut grouped: BTreeMap<Table, Vec<ContentId>> = BTreeMap::new();
        for leaf in &self.leaves {
            grouped.entry(leaf.table()).or_default().push(leaf.id);
        }
        grouped
    }

    /// Remove the subtree from the store, remembering completion entries.
    fn remove_from(&mut self, store: &mut CurriculumStore) {
        for leaf in &self.leaves {
            store.remove::<LeafContent>(leaf.id);
            for user in store.forget_completions(leaf.content_type(), leaf.id) {
                self.completions.push((user, leaf.content_type(), leaf.id));
            }
        }
        for module in &self.modules {
            store.remove::<Module>(module.id);
        }
        for stage in &self.stages {
            store.remove::<Stage>(stage.id);
        }
        if let Some(course) = &self.course {
            store.remove::<Course>(course.id);
        }
    }

    /// Put back everything [`CascadePlan::remove_from`] took out.
    fn restore_into(self, store: &mut CurriculumStore) {
        if let Some(course) = self.course {
            store.insert(course);
        }
        for stage in self.stages {
            store.insert(stage);
        }
        for module in self.modules {
            store.insert(module);
        }
        for leaf in self.leaves {
            store.insert(leaf);
        }
        for (user, content_type, id) in self.completions {
            store.mark_completed(user, content_type, id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.course.is_none() && self.stages.is_empty() && self.modules.is_empty() && self.leaves.is_empty()
    }
}

impl Curriculum {
    pub async fn delete_course(&self, id: CourseId) -> Result<(), EngineError> {
        self.delete_container(Container::Course(id)).await
    }

    pub async fn delete_stage(&self, id: StageId) -> Result<(), EngineError> {
        self.delete_container(Container::Stage(id)).await
    }

    pub async fn delete_module(&self, id: ModuleId) -> Result<(), EngineError> {
        self.delete_container(Container::Module(id)).await
    }

    pub(crate) async fn delete_container(&self, container: Container) -> Result<(), EngineError> {
        let (plan, generation) = self.write(|store| {
            let mut plan = CascadePlan::collect(store, container)?;
            plan.remove_from(store);
            Ok::<_, EngineError>((plan, store.generation()))
        })?;
        info!(
            ?container,
            stages = plan.stages.len(),
            modules = plan.modules.len(),
            leaves = plan.leaves.len(),
            "deleting subtree"
        );

        self.purge_leaf_references(&plan.leaf_ids()).await;

        if let Err(e) = self.delete_subtree_rows(&plan, container).await {
            error!(?container, error = %e, "cascade delete failed, restoring subtree");
            self.rollback(generation, |store| plan.restore_into(store));
            return Err(e);
        }
        Ok(())
    }

    /// Fatal deletes, children first.
    async fn delete_subtree_rows(&self, plan: &CascadePlan, container: Container) -> Result<(), EngineError> {
        for (table, ids) in plan.leaves_by_table() {
            self.delete_rows(table, Filter::any_of(columns::ID, ids)).await?;
        }
        if !plan.modules.is_empty() {
            self.delete_rows(Table::Modules, Filter::any_of(columns::ID, plan.modules.iter().map(|m| m.id)))
                .await?;
        }
        if !plan.stages.is_empty() {
            self.delete_rows(Table::Stages, Filter::any_of(columns::ID, plan.stages.iter().map(|s| s.id)))
                .await?;
        }
        if let Container::Course(id) = container {
            self.delete_rows(Table::Courses, Filter::id(id)).await?;
        }
        Ok(())
    }

    async fn delete_rows(&self, table: Table, filter: Filter) -> Result<u64, EngineError> {
        let deleted = self
            .remote
            .delete(table, &filter)
            .await
            .map_err(|source| EngineError::CascadeFailed { step: table, source })?;
        debug!(%table, deleted, "deleted rows");
        Ok(deleted)
    }

    /// Drop completion records and calendar entries for removed leaves.
    /// Failures are logged and otherwise ignored.
    async fn purge_leaf_references(&self, ids: &[ContentId]) {
        if ids.is_empty() {
            return;
        }
        for table in [Table::Completions, Table::CalendarEvents] {
            let filter = Filter::any_of(columns::CONTENT_ID, ids.iter().copied());
            if let Err(e) = self.remote.delete(table, &filter).await {
                warn!(%table, error = %e, "could not clean up references to deleted content");
            }
        }
    }

    /// Delete a single leaf, along with its completions and calendar entries.
    pub async fn delete_leaf(&self, id: ContentId) -> Result<(), EngineError> {
        let (leaf, completed_by, generation) = self.write(|store| {
            let leaf = store
                .remove::<LeafContent>(id)
                .ok_or_else(|| EngineError::EntityNotFound(format!("content {id}")))?;
            let completed_by = store.forget_completions(leaf.content_type(), id);
            Ok::<_, EngineError>((leaf, completed_by, store.generation()))
        })?;

        self.purge_leaf_references(&[id]).await;

        let table = leaf.table();
        if let Err(e) = self.remote.delete(table, &Filter::id(id)).await {
            error!(%table, %id, error = %e, "delete failed, rolling back");
            self.rollback(generation, |store| {
                let content_type = leaf.content_type();
                store.insert(leaf);
                for user in completed_by {
                    store.mark_completed(user, content_type, id);
                }
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete a folder. Member courses survive with their folder cleared.
    pub async fn delete_folder(&self, id: FolderId) -> Result<(), EngineError> {
        let (folder, members, generation) = self.write(|store| {
            let folder = store
                .remove::<Folder>(id)
                .ok_or_else(|| EngineError::EntityNotFound(format!("folder {id}")))?;
            let mut members = Vec::new();
            for course in store.courses_mut().values_mut() {
                if course.folder_id == Some(id) {
                    course.folder_id = None;
                    members.push(course.id);
                }
            }
            Ok::<_, EngineError>((folder, members, store.generation()))
        })?;

        let result = self.detach_and_delete_folder(id).await;
        if let Err(e) = result {
            error!(%id, error = %e, "folder delete failed, rolling back");
            self.rollback(generation, |store| {
                store.insert(folder);
                let courses = store.courses_mut();
                for course_id in members {
                    if let Some(course) = courses.get_mut(&course_id) {
                        course.folder_id = Some(id);
                    }
                }
            });
            return Err(e);
        }
        Ok(())
    }

    async fn detach_and_delete_folder(&self, id: FolderId) -> Result<(), EngineError> {
        let patch: RemoteRow = [(columns::FOLDER_ID.to_string(), FieldValue::Null)].into_iter().collect();
        self.remote
            .update(Table::Courses, &patch, &Filter::by(columns::FOLDER_ID, id))
            .await?;
        self.remote.delete(Table::Folders, &Filter::id(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tree {
        store: CurriculumStore,
        course: CourseId,
        stage: StageId,
        module: ModuleId,
        user: UserId,
    }

    fn tree() -> Tree {
        let user = UserId::new();
        let mut store = CurriculumStore::new(user);
        let course = Course::new("c");
        let stage = Stage::new(course.id, "s");
        let module = Module::new(stage.id, "m");
        let quiz = LeafContent::quiz(course.id, Some(module.id), "q", Vec::new());
        let lesson = LeafContent::lesson(course.id, Some(module.id), "l");
        let direct = LeafContent::lesson(course.id, None, "d");
        store.mark_completed(user, ContentType::Quiz, quiz.id);
        let ids = (course.id, stage.id, module.id);
        store.insert(course);
        store.insert(stage);
        store.insert(module);
        store.insert(quiz);
        store.insert(lesson);
        store.insert(direct);
        Tree {
            store,
            course: ids.0,
            stage: ids.1,
            module: ids.2,
            user,
        }
    }

    #[test]
    fn course_plan_covers_direct_leaves() {
        let t = tree();
        let plan = CascadePlan::collect(&t.store, Container::Course(t.course)).unwrap();
        assert!(plan.course.is_some());
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.modules.len(), 1);
        assert_eq!(plan.leaves.len(), 3);
        let grouped = plan.leaves_by_table();
        assert_eq!(grouped[&Table::Lessons].len(), 2);
        assert_eq!(grouped[&Table::Quizzes].len(), 1);
    }

    #[test]
    fn stage_plan_skips_direct_leaves() {
        let t = tree();
        let plan = CascadePlan::collect(&t.store, Container::Stage(t.stage)).unwrap();
        assert!(plan.course.is_none());
        assert_eq!(plan.leaves.len(), 2);
        let module_plan = CascadePlan::collect(&t.store, Container::Module(t.module)).unwrap();
        assert!(module_plan.stages.is_empty());
        assert_eq!(module_plan.leaves.len(), 2);
    }

    #[test]
    fn remove_then_restore_is_lossless() {
        let t = tree();
        let mut store = t.store.clone();
        let mut plan = CascadePlan::collect(&store, Container::Course(t.course)).unwrap();
        plan.remove_from(&mut store);
        assert!(store.is_empty());
        assert_eq!(store.completions(t.user).map(|s| s.len()), Some(0));
        assert_eq!(plan.completions.len(), 1);

        plan.restore_into(&mut store);
        assert_eq!(store, t.store);
    }

    #[test]
    fn missing_container_is_not_found() {
        let t = tree();
        let err = CascadePlan::collect(&t.store, Container::Module(ModuleId::new())).unwrap_err();
        assert!(matches!(err, EngineError::EntityNotFound(_)));
    }
}
