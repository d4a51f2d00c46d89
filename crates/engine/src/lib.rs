pub mod cascade;
pub mod collaborators;
pub mod completion;
pub mod config;
pub mod error;
pub mod mutation;
pub mod ordering;
pub mod projects;
pub mod store;
pub mod sync;

pub use cascade::{CascadePlan, Container};
pub use collaborators::{AccountError, AccountService, CurriculumEvent, NotificationSink, TracingSink};
pub use completion::{CompletionOutcome, CompletionReport, CourseProgress};
pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use ordering::{Direction, ReorderOutcome};
pub use store::{CompletionSet, CurriculumStore};

use std::sync::{Arc, PoisonError, RwLock};

use curriculum_core::*;
use curriculum_storage::{AggregateStore, RemoteStore};

use crate::mutation::WriteMode;
use crate::ordering::{Ordered, next_order};

/// Local mirror of a remote curriculum, kept in step through optimistic writes.
///
/// Every read is served from memory. Mutators update memory first, then the
/// remote, and undo the local change if the remote refuses it.
pub struct Curriculum {
    store: RwLock<CurriculumStore>,
    remote: Arc<dyn RemoteStore>,
    aggregates: Arc<dyn AggregateStore>,
    accounts: Arc<dyn AccountService>,
    notifier: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl Curriculum {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        aggregates: Arc<dyn AggregateStore>,
        accounts: Arc<dyn AccountService>,
    ) -> Self {
        Self {
            store: RwLock::new(CurriculumStore::default()),
            remote,
            aggregates,
            accounts,
            notifier: Arc::new(TracingSink),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `f` against the current store. The lock is held only for the call.
    pub fn read<R>(&self, f: impl FnOnce(&CurriculumStore) -> R) -> R {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut CurriculumStore) -> R) -> R {
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// A detached copy of the whole store.
    pub fn snapshot(&self) -> CurriculumStore {
        self.read(CurriculumStore::clone)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.read(CurriculumStore::user_id)
    }

    // ========================================================================
    // Parent checks
    // ========================================================================

    fn require_folder(&self, folder_id: Option<FolderId>) -> Result<(), EngineError> {
        match folder_id {
            Some(id) if self.read(|s| s.folder(id).is_none()) => {
                Err(EngineError::InvalidParent(format!("folder {id} does not exist")))
            }
            _ => Ok(()),
        }
    }

    fn require_course(&self, course_id: CourseId) -> Result<(), EngineError> {
        if self.read(|s| s.course(course_id).is_none()) {
            return Err(EngineError::InvalidParent(format!("course {course_id} does not exist")));
        }
        Ok(())
    }

    fn require_stage(&self, stage_id: StageId) -> Result<(), EngineError> {
        if self.read(|s| s.stage(stage_id).is_none()) {
            return Err(EngineError::InvalidParent(format!("stage {stage_id} does not exist")));
        }
        Ok(())
    }

    /// A moduled leaf must point at a module of its own course.
    fn require_leaf_parent(&self, leaf: &LeafContent) -> Result<(), EngineError> {
        self.require_course(leaf.course_id)?;
        let Some(module_id) = leaf.module_id else {
            return Ok(());
        };
        match self.read(|s| s.course_of_module(module_id)) {
            Some(course_id) if course_id == leaf.course_id => Ok(()),
            Some(course_id) => Err(EngineError::InvalidParent(format!(
                "module {module_id} belongs to course {course_id}, not {}",
                leaf.course_id
            ))),
            None => Err(EngineError::InvalidParent(format!("module {module_id} does not exist"))),
        }
    }

    fn require_existing<E: store::Tracked>(&self, entity: &E) -> Result<(), EngineError> {
        let id = entity.id();
        if self.read(|s| s.get::<E>(id).is_none()) {
            return Err(EngineError::EntityNotFound(format!("{id:?}")));
        }
        Ok(())
    }

    /// An entity that changes sibling group goes to the end of the new one.
    fn place<E: Ordered>(&self, entity: &mut E) {
        let target: &E = entity;
        let order = self.read(|s| {
            s.get::<E>(target.id())
                .filter(|current| current.scope() != target.scope())
                .map(|_| next_order(s, target))
        });
        if let Some(order) = order {
            entity.set_order(order);
        }
    }

    /// Stages and modules never leave their course.
    fn require_same_course(&self, from: Option<CourseId>, to: CourseId, what: &str) -> Result<(), EngineError> {
        match from {
            Some(from) if from != to => Err(EngineError::InvalidParent(format!(
                "{what} cannot move from course {from} to course {to}"
            ))),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Create / update
    // ========================================================================

    /// Create a folder at the end of the folder list.
    pub async fn create_folder(&self, mut folder: Folder) -> Result<FolderId, EngineError> {
        folder.order = self.read(|s| next_order(s, &folder));
        let id = folder.id;
        self.apply(folder, WriteMode::Insert).await?;
        Ok(id)
    }

    pub async fn update_folder(&self, folder: Folder) -> Result<(), EngineError> {
        self.require_existing(&folder)?;
        self.apply(folder, WriteMode::Update).await
    }

    /// Create a course at the end of its folder (or of the unfiled courses).
    pub async fn create_course(&self, mut course: Course) -> Result<CourseId, EngineError> {
        self.require_folder(course.folder_id)?;
        course.order = self.read(|s| next_order(s, &course));
        let id = course.id;
        self.apply(course, WriteMode::Insert).await?;
        Ok(id)
    }

    pub async fn update_course(&self, mut course: Course) -> Result<(), EngineError> {
        self.require_existing(&course)?;
        self.require_folder(course.folder_id)?;
        self.place(&mut course);
        self.apply(course, WriteMode::Update).await
    }

    pub async fn create_stage(&self, mut stage: Stage) -> Result<StageId, EngineError> {
        self.require_course(stage.course_id)?;
        stage.order = self.read(|s| next_order(s, &stage));
        let id = stage.id;
        self.apply(stage, WriteMode::Insert).await?;
        Ok(id)
    }

    pub async fn update_stage(&self, mut stage: Stage) -> Result<(), EngineError> {
        self.require_existing(&stage)?;
        self.require_course(stage.course_id)?;
        let current = self.read(|s| s.stage(stage.id).map(|st| st.course_id));
        self.require_same_course(current, stage.course_id, "stage")?;
        self.place(&mut stage);
        self.apply(stage, WriteMode::Update).await
    }

    pub async fn create_module(&self, mut module: Module) -> Result<ModuleId, EngineError> {
        self.require_stage(module.stage_id)?;
        module.order = self.read(|s| next_order(s, &module));
        let id = module.id;
        self.apply(module, WriteMode::Insert).await?;
        Ok(id)
    }

    /// Update a module. It may change stage, but only within its course.
    pub async fn update_module(&self, mut module: Module) -> Result<(), EngineError> {
        self.require_existing(&module)?;
        self.require_stage(module.stage_id)?;
        let (current, target) = self.read(|s| {
            (
                s.course_of_module(module.id),
                s.stage(module.stage_id).map(|st| st.course_id),
            )
        });
        if let Some(target) = target {
            self.require_same_course(current, target, "module")?;
        }
        self.place(&mut module);
        self.apply(module, WriteMode::Update).await
    }

    /// Create a quiz, lesson or walkthrough after the last sibling of its type.
    pub async fn create_leaf(&self, mut leaf: LeafContent) -> Result<ContentId, EngineError> {
        self.require_leaf_parent(&leaf)?;
        leaf.order = self.read(|s| next_order(s, &leaf));
        let id = leaf.id;
        self.apply(leaf, WriteMode::Insert).await?;
        Ok(id)
    }

    /// Update a leaf in place. Its content type cannot change.
    pub async fn update_leaf(&self, mut leaf: LeafContent) -> Result<(), EngineError> {
        let existing = self
            .read(|s| s.leaf(leaf.id).map(LeafContent::content_type))
            .ok_or_else(|| EngineError::EntityNotFound(format!("content {}", leaf.id)))?;
        if existing != leaf.content_type() {
            return Err(EngineError::ContentTypeMismatch {
                content_id: leaf.id.to_string(),
                expected: existing.as_str(),
                found: leaf.content_type().as_str(),
            });
        }
        self.require_leaf_parent(&leaf)?;
        self.place(&mut leaf);
        self.apply(leaf, WriteMode::Update).await
    }
}
