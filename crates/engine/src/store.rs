//! In-memory mirror of the remote curriculum.
//!
//! Every mutation lands here first. The `generation` counter moves whenever the
//! whole mirror is replaced, so a rollback computed against an older
//! generation can tell that a reload has already superseded it.

use std::collections::{BTreeMap, BTreeSet};

use curriculum_core::*;
use curriculum_storage::RemoteEntity;

/// The set of leaf ids one user has finished, keyed by content type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSet {
    by_type: BTreeMap<ContentType, BTreeSet<ContentId>>,
}

impl CompletionSet {
    pub fn contains(&self, content_type: ContentType, id: ContentId) -> bool {
        self.by_type.get(&content_type).is_some_and(|ids| ids.contains(&id))
    }

    /// Returns true when the id was not already present.
    pub fn insert(&mut self, content_type: ContentType, id: ContentId) -> bool {
        self.by_type.entry(content_type).or_default().insert(id)
    }

    pub fn remove(&mut self, content_type: ContentType, id: ContentId) -> bool {
        self.by_type.get_mut(&content_type).is_some_and(|ids| ids.remove(&id))
    }

    pub fn of_type(&self, content_type: ContentType) -> impl Iterator<Item = ContentId> + '_ {
        self.by_type.get(&content_type).into_iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurriculumStore {
    user_id: Option<UserId>,
    generation: u64,
    folders: BTreeMap<FolderId, Folder>,
    courses: BTreeMap<CourseId, Course>,
    stages: BTreeMap<StageId, Stage>,
    modules: BTreeMap<ModuleId, Module>,
    leaves: BTreeMap<ContentId, LeafContent>,
    completions: BTreeMap<UserId, CompletionSet>,
    projects: BTreeMap<ProjectId, ProjectBrief>,
}

/// Display order for leaves sharing a parent: order, then type, then id.
pub fn display_order(a: &LeafContent, b: &LeafContent) -> std::cmp::Ordering {
    (a.order, a.content_type(), a.id).cmp(&(b.order, b.content_type(), b.id))
}

impl CurriculumStore {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    // ========================================================================
    // Session and generation
    // ========================================================================

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop everything and bind to a new user.
    pub fn begin(&mut self, user_id: UserId) {
        self.clear();
        self.user_id = Some(user_id);
    }

    /// Drop everything, including the session user.
    pub fn clear(&mut self) {
        let generation = self.generation + 1;
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    /// Take the contents of a freshly loaded store, keeping the session user.
    pub fn replace_with(&mut self, fresh: CurriculumStore) {
        let generation = self.generation + 1;
        let user_id = self.user_id;
        *self = Self {
            user_id,
            generation,
            ..fresh
        };
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
            && self.courses.is_empty()
            && self.stages.is_empty()
            && self.modules.is_empty()
            && self.leaves.is_empty()
            && self.projects.is_empty()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        self.folders.get(&id)
    }

    pub fn course(&self, id: CourseId) -> Option<&Course> {
        self.courses.get(&id)
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(&id)
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn leaf(&self, id: ContentId) -> Option<&LeafContent> {
        self.leaves.get(&id)
    }

    pub fn project(&self, id: ProjectId) -> Option<&ProjectBrief> {
        self.projects.get(&id)
    }

    pub fn folders(&self) -> Vec<&Folder> {
        let mut folders: Vec<_> = self.folders.values().collect();
        folders.sort_by_key(|f| (f.order, f.id));
        folders
    }

    /// All courses, across folders, in (order, id) order.
    pub fn courses(&self) -> Vec<&Course> {
        let mut courses: Vec<_> = self.courses.values().collect();
        courses.sort_by_key(|c| (c.order, c.id));
        courses
    }

    pub fn courses_in(&self, folder_id: Option<FolderId>) -> Vec<&Course> {
        let mut courses: Vec<_> = self.courses.values().filter(|c| c.folder_id == folder_id).collect();
        courses.sort_by_key(|c| (c.order, c.id));
        courses
    }

    pub fn stages_of(&self, course_id: CourseId) -> Vec<&Stage> {
        let mut stages: Vec<_> = self.stages.values().filter(|s| s.course_id == course_id).collect();
        stages.sort_by_key(|s| (s.order, s.id));
        stages
    }

    pub fn modules_of(&self, stage_id: StageId) -> Vec<&Module> {
        let mut modules: Vec<_> = self.modules.values().filter(|m| m.stage_id == stage_id).collect();
        modules.sort_by_key(|m| (m.order, m.id));
        modules
    }

    /// Leaves under one parent, every type interleaved in display order.
    pub fn leaves_of(&self, parent: LeafParent) -> Vec<&LeafContent> {
        let mut leaves: Vec<_> = self.leaves.values().filter(|l| l.parent() == parent).collect();
        leaves.sort_by(|a, b| display_order(a, b));
        leaves
    }

    pub fn leaves_of_module(&self, module_id: ModuleId) -> Vec<&LeafContent> {
        self.leaves_of(LeafParent::Module(module_id))
    }

    /// Every leaf belonging to a course, moduled or not.
    pub fn leaves_of_course(&self, course_id: CourseId) -> Vec<&LeafContent> {
        self.leaves.values().filter(|l| l.course_id == course_id).collect()
    }

    pub fn projects(&self) -> Vec<&ProjectBrief> {
        let mut projects: Vec<_> = self.projects.values().collect();
        projects.sort_by_key(|p| (p.order, p.id));
        projects
    }

    /// The course a module ultimately belongs to.
    pub fn course_of_module(&self, module_id: ModuleId) -> Option<CourseId> {
        let module = self.modules.get(&module_id)?;
        self.stages.get(&module.stage_id).map(|s| s.course_id)
    }

    // ========================================================================
    // Completions
    // ========================================================================

    pub fn completions(&self, user_id: UserId) -> Option<&CompletionSet> {
        self.completions.get(&user_id)
    }

    pub fn is_completed(&self, user_id: UserId, content_type: ContentType, id: ContentId) -> bool {
        self.completions
            .get(&user_id)
            .is_some_and(|set| set.contains(content_type, id))
    }

    pub fn mark_completed(&mut self, user_id: UserId, content_type: ContentType, id: ContentId) -> bool {
        self.completions.entry(user_id).or_default().insert(content_type, id)
    }

    pub fn unmark_completed(&mut self, user_id: UserId, content_type: ContentType, id: ContentId) -> bool {
        self.completions
            .get_mut(&user_id)
            .is_some_and(|set| set.remove(content_type, id))
    }

    /// Remove a leaf from every user's completion set, returning who had it.
    pub(crate) fn forget_completions(&mut self, content_type: ContentType, id: ContentId) -> Vec<UserId> {
        self.completions
            .iter_mut()
            .filter_map(|(user, set)| set.remove(content_type, id).then_some(*user))
            .collect()
    }

    // ========================================================================
    // Raw collection access
    // ========================================================================

    pub(crate) fn projects_mut(&mut self) -> &mut BTreeMap<ProjectId, ProjectBrief> {
        &mut self.projects
    }

    pub(crate) fn courses_mut(&mut self) -> &mut BTreeMap<CourseId, Course> {
        &mut self.courses
    }
}

/// A record type with its own keyed collection in [`CurriculumStore`].
pub trait Tracked: RemoteEntity<Id: Send + Sync> + Clone + Send + Sync + 'static {
    fn collection(store: &CurriculumStore) -> &BTreeMap<Self::Id, Self>;
    fn collection_mut(store: &mut CurriculumStore) -> &mut BTreeMap<Self::Id, Self>;
}

macro_rules! tracked {
    ($ty:ty, $field:ident) => {
        impl Tracked for $ty {
            fn collection(store: &CurriculumStore) -> &BTreeMap<Self::Id, Self> {
                &store.$field
            }

            fn collection_mut(store: &mut CurriculumStore) -> &mut BTreeMap<Self::Id, Self> {
                &mut store.$field
            }
        }
    };
}

tracked!(Folder, folders);
tracked!(Course, courses);
tracked!(Stage, stages);
tracked!(Module, modules);
tracked!(LeafContent, leaves);

impl CurriculumStore {
    pub fn insert<E: Tracked>(&mut self, entity: E) -> Option<E> {
        E::collection_mut(self).insert(entity.id(), entity)
    }

    pub fn remove<E: Tracked>(&mut self, id: E::Id) -> Option<E> {
        E::collection_mut(self).remove(&id)
    }

    pub fn get<E: Tracked>(&self, id: E::Id) -> Option<&E> {
        E::collection(self).get(&id)
    }

    pub(crate) fn insert_project(&mut self, project: ProjectBrief) -> Option<ProjectBrief> {
        self.projects.insert(project.id, project)
    }
}
