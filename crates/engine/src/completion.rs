//! Leaf completion and its roll-up to modules, stages and courses.
//!
//! A container is complete when it has at least one child and every child is
//! complete. Course-direct leaves never count toward course completion.

use tracing::{debug, info, warn};

use curriculum_core::*;
use curriculum_storage::{Filter, RemoteEntity, RemoteError, RemotePayload, Table, columns};

use crate::collaborators::CurriculumEvent;
use crate::error::EngineError;
use crate::store::CurriculumStore;
use crate::Curriculum;

pub fn module_complete(store: &CurriculumStore, user_id: UserId, module_id: ModuleId) -> bool {
    let leaves = store.leaves_of_module(module_id);
    !leaves.is_empty()
        && leaves
            .iter()
            .all(|leaf| store.is_completed(user_id, leaf.content_type(), leaf.id))
}

pub fn stage_complete(store: &CurriculumStore, user_id: UserId, stage_id: StageId) -> bool {
    let modules = store.modules_of(stage_id);
    !modules.is_empty() && modules.iter().all(|m| module_complete(store, user_id, m.id))
}

pub fn course_complete(store: &CurriculumStore, user_id: UserId, course_id: CourseId) -> bool {
    let stages = store.stages_of(course_id);
    !stages.is_empty() && stages.iter().all(|s| stage_complete(store, user_id, s.id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Levels {
    module: bool,
    stage: bool,
    course: bool,
}

impl Levels {
    fn of(store: &CurriculumStore, user_id: UserId, leaf: &LeafContent) -> Self {
        let module = leaf.module_id.and_then(|id| store.module(id));
        Self {
            module: module.is_some_and(|m| module_complete(store, user_id, m.id)),
            stage: module.is_some_and(|m| stage_complete(store, user_id, m.stage_id)),
            course: course_complete(store, user_id, leaf.course_id),
        }
    }
}

/// What a successful `complete_leaf` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub module: Option<ModuleId>,
    pub stage: Option<StageId>,
    pub course: Option<CourseId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The leaf was already recorded; nothing was written or emitted.
    AlreadyCompleted,
    Completed(CompletionReport),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourseProgress {
    pub completed_leaves: usize,
    pub total_leaves: usize,
    pub completed_modules: usize,
    pub total_modules: usize,
    pub complete: bool,
}

impl CourseProgress {
    /// Fraction of moduled leaves finished, in 0.0..=1.0.
    pub fn ratio(&self) -> f64 {
        if self.total_leaves == 0 {
            0.0
        } else {
            self.completed_leaves as f64 / self.total_leaves as f64
        }
    }
}

impl Curriculum {
    /// Record that `user_id` finished a leaf and propagate upward.
    pub async fn complete_leaf(
        &self,
        leaf_id: ContentId,
        leaf_type: ContentType,
        user_id: UserId,
    ) -> Result<CompletionOutcome, EngineError> {
        let leaf = self.read(|store| {
            let leaf = store
                .leaf(leaf_id)
                .ok_or_else(|| EngineError::EntityNotFound(format!("content {leaf_id}")))?;
            if leaf.content_type() != leaf_type {
                return Err(EngineError::ContentTypeMismatch {
                    content_id: leaf_id.to_string(),
                    expected: leaf_type.as_str(),
                    found: leaf.content_type().as_str(),
                });
            }
            if store.is_completed(user_id, leaf_type, leaf_id) {
                return Ok(None);
            }
            Ok(Some(leaf.clone()))
        })?;
        let Some(leaf) = leaf else {
            debug!(%leaf_id, %user_id, "already completed");
            return Ok(CompletionOutcome::AlreadyCompleted);
        };

        let record = CompletionRecord {
            user_id,
            content_id: leaf_id,
            content_type: leaf_type,
            completed_at: now(),
        };
        if !self.persist_completion(&record).await? {
            self.write(|store| store.mark_completed(user_id, leaf_type, leaf_id));
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        // Only a call that actually inserted the record goes on to propagate.
        let (before, after, inserted) = self.write(|store| {
            let before = Levels::of(store, user_id, &leaf);
            let inserted = store.mark_completed(user_id, leaf_type, leaf_id);
            (before, Levels::of(store, user_id, &leaf), inserted)
        });
        if !inserted {
            return Ok(CompletionOutcome::AlreadyCompleted);
        }
        info!(%leaf_id, %user_id, content_type = leaf_type.as_str(), "leaf completed");

        self.award(user_id, leaf.reward).await;
        self.notifier.emit(&CurriculumEvent::LeafCompleted {
            user_id,
            content_id: leaf_id,
            content_type: leaf_type,
            title: leaf.title.clone(),
            reward: leaf.reward,
        });

        let mut report = CompletionReport::default();
        if let Some(module) = leaf.module_id.and_then(|id| self.read(|s| s.module(id).cloned())) {
            if after.module && !before.module {
                self.award(user_id, module.reward).await;
                self.notifier.emit(&CurriculumEvent::ModuleCompleted {
                    user_id,
                    module_id: module.id,
                    title: module.title.clone(),
                    reward: module.reward,
                });
                report.module = Some(module.id);
            }
            if after.stage && !before.stage {
                if let Some(stage) = self.read(|s| s.stage(module.stage_id).cloned()) {
                    self.award(user_id, stage.reward).await;
                    let event = CurriculumEvent::StageCompleted {
                        user_id,
                        stage_id: stage.id,
                        title: stage.title.clone(),
                        reward: stage.reward,
                    };
                    self.notifier.emit(&event);
                    self.persist_notification(user_id, &event).await;
                    report.stage = Some(stage.id);
                }
            }
        }

        if after.course && !before.course {
            if let Some(course) = self.read(|s| s.course(leaf.course_id).cloned()) {
                let event = CurriculumEvent::CourseCompleted {
                    user_id,
                    course_id: course.id,
                    title: course.title.clone(),
                };
                self.notifier.emit(&event);
                self.persist_notification(user_id, &event).await;
                report.course = Some(course.id);
            }
        }

        Ok(CompletionOutcome::Completed(report))
    }

    /// Write the completion row. `Ok(false)` means the remote already had it.
    async fn persist_completion(&self, record: &CompletionRecord) -> Result<bool, EngineError> {
        let row = record.to_remote().to_row();
        match self.remote.insert(Table::Completions, &[row]).await {
            Ok(()) => Ok(true),
            Err(RemoteError::ConstraintViolation(reason)) => {
                let filter = Filter::by(columns::USER_ID, record.user_id)
                    .and(Filter::by(columns::CONTENT_ID, record.content_id))
                    .and(Filter::by(columns::CONTENT_TYPE, record.content_type.as_str()));
                let existing = self.remote.select(Table::Completions, &filter).await?;
                if existing.is_empty() {
                    return Err(RemoteError::ConstraintViolation(reason).into());
                }
                debug!(content_id = %record.content_id, "completion already recorded remotely");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn award(&self, user_id: UserId, reward: Reward) {
        if reward.is_zero() {
            return;
        }
        if let Err(e) = self.accounts.award_points(user_id, reward).await {
            warn!(%user_id, xp = reward.xp, dowd_bucks = reward.dowd_bucks, error = %e, "could not award points");
        }
    }

    async fn persist_notification(&self, user_id: UserId, event: &CurriculumEvent) {
        if !self.config.persist_notifications {
            return;
        }
        let row = RemotePayload::new(Table::Notifications)
            .required(columns::ID, FieldValue::text(uuid::Uuid::now_v7().to_string()))
            .required(columns::USER_ID, FieldValue::text(user_id.to_string()))
            .required(columns::KIND, FieldValue::text(event.kind()))
            .optional(columns::TITLE, FieldValue::text(event.title()))
            .optional(columns::CREATED_AT, FieldValue::Timestamp(now().timestamp_millis()))
            .to_row();
        if let Err(e) = self.remote.insert(Table::Notifications, &[row]).await {
            warn!(%user_id, kind = event.kind(), error = %e, "could not store notification");
        }
    }

    /// Forget every completion `user_id` has under a course.
    pub async fn reset_course_progress(&self, user_id: UserId, course_id: CourseId) -> Result<usize, EngineError> {
        let (removed, generation) = self.write(|store| {
            if store.course(course_id).is_none() {
                return Err(EngineError::EntityNotFound(format!("course {course_id}")));
            }
            let leaves: Vec<(ContentType, ContentId)> = store
                .leaves_of_course(course_id)
                .iter()
                .map(|l| (l.content_type(), l.id))
                .collect();
            let removed: Vec<(ContentType, ContentId)> = leaves
                .into_iter()
                .filter(|(ty, id)| store.unmark_completed(user_id, *ty, *id))
                .collect();
            Ok((removed, store.generation()))
        })?;
        if removed.is_empty() {
            return Ok(0);
        }

        let filter = Filter::by(columns::USER_ID, user_id)
            .and(Filter::any_of(columns::CONTENT_ID, removed.iter().map(|(_, id)| *id)));
        if let Err(e) = self.remote.delete(Table::Completions, &filter).await {
            warn!(%course_id, %user_id, error = %e, "progress reset failed, restoring completions");
            self.rollback(generation, |store| {
                for (ty, id) in removed {
                    store.mark_completed(user_id, ty, id);
                }
            });
            return Err(e.into());
        }
        info!(%course_id, %user_id, cleared = removed.len(), "course progress reset");
        Ok(removed.len())
    }

    /// Completion figures for one course, from the local store.
    pub fn course_progress(&self, user_id: UserId, course_id: CourseId) -> CourseProgress {
        self.read(|store| {
            let mut progress = CourseProgress::default();
            for stage in store.stages_of(course_id) {
                for module in store.modules_of(stage.id) {
                    let leaves = store.leaves_of_module(module.id);
                    progress.total_modules += 1;
                    progress.total_leaves += leaves.len();
                    progress.completed_leaves += leaves
                        .iter()
                        .filter(|l| store.is_completed(user_id, l.content_type(), l.id))
                        .count();
                    if module_complete(store, user_id, module.id) {
                        progress.completed_modules += 1;
                    }
                }
            }
            progress.complete = course_complete(store, user_id, course_id);
            progress
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course_with(modules: &[usize]) -> (CurriculumStore, CourseId, Vec<ModuleId>, Vec<LeafContent>) {
        let mut store = CurriculumStore::new(UserId::new());
        let course = Course::new("c");
        let stage = Stage::new(course.id, "s");
        let mut module_ids = Vec::new();
        let mut leaves = Vec::new();
        for count in modules {
            let module = Module::new(stage.id, "m");
            for _ in 0..*count {
                let leaf = LeafContent::lesson(course.id, Some(module.id), "l");
                leaves.push(leaf.clone());
                store.insert(leaf);
            }
            module_ids.push(module.id);
            store.insert(module);
        }
        let course_id = course.id;
        store.insert(course);
        store.insert(stage);
        (store, course_id, module_ids, leaves)
    }

    #[test]
    fn empty_module_is_never_complete() {
        let (store, course_id, modules, _) = course_with(&[0]);
        let user = UserId::new();
        assert!(!module_complete(&store, user, modules[0]));
        assert!(!course_complete(&store, user, course_id));
    }

    #[test]
    fn empty_module_blocks_its_stage() {
        let (mut store, course_id, modules, leaves) = course_with(&[1, 0]);
        let user = UserId::new();
        store.mark_completed(user, ContentType::Lesson, leaves[0].id);
        assert!(module_complete(&store, user, modules[0]));
        assert!(!course_complete(&store, user, course_id));
    }

    #[test]
    fn course_direct_leaves_do_not_count() {
        let (mut store, course_id, _, leaves) = course_with(&[1]);
        let user = UserId::new();
        store.insert(LeafContent::lesson(course_id, None, "extra"));
        store.mark_completed(user, ContentType::Lesson, leaves[0].id);
        assert!(course_complete(&store, user, course_id));
    }

    #[test]
    fn course_without_stages_is_incomplete() {
        let mut store = CurriculumStore::default();
        let course = Course::new("bare");
        let id = course.id;
        store.insert(course);
        assert!(!course_complete(&store, UserId::new(), id));
    }

    #[test]
    fn progress_ratio_handles_empty_course() {
        assert_eq!(CourseProgress::default().ratio(), 0.0);
        let half = CourseProgress {
            completed_leaves: 1,
            total_leaves: 2,
            ..CourseProgress::default()
        };
        assert_eq!(half.ratio(), 0.5);
    }
}
