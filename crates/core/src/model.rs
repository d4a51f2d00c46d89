//! Domain records for the curriculum hierarchy.
//!
//! Course → Stage → Module → leaf content, plus the completion facts and the
//! project briefs that share the same synchronization pattern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

/// Current time truncated to the millisecond precision remote rows keep.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Points granted when something is completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub xp: i64,
    pub dowd_bucks: i64,
}

impl Reward {
    pub fn new(xp: i64, dowd_bucks: i64) -> Self {
        Self { xp, dowd_bucks }
    }

    pub fn is_zero(&self) -> bool {
        self.xp == 0 && self.dowd_bucks == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub title: String,
    pub description: String,
    pub color: String,
    pub order: i64,
}

impl Folder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: FolderId::new(),
            title: title.into(),
            description: String::new(),
            color: String::new(),
            order: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub description: String,
    pub color: String,
    pub order: i64,
    /// Weak reference: lookup only, cleared when the folder goes away.
    pub folder_id: Option<FolderId>,
    pub created_at: DateTime<Utc>,
}

impl Course {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: CourseId::new(),
            title: title.into(),
            description: String::new(),
            color: String::new(),
            order: 0,
            folder_id: None,
            created_at: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub course_id: CourseId,
    pub title: String,
    pub order: i64,
    pub reward: Reward,
    pub created_at: DateTime<Utc>,
}

impl Stage {
    pub fn new(course_id: CourseId, title: impl Into<String>) -> Self {
        Self {
            id: StageId::new(),
            course_id,
            title: title.into(),
            order: 0,
            reward: Reward::default(),
            created_at: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub stage_id: StageId,
    pub title: String,
    pub order: i64,
    pub reward: Reward,
    pub created_at: DateTime<Utc>,
}

impl Module {
    pub fn new(stage_id: StageId, title: impl Into<String>) -> Self {
        Self {
            id: ModuleId::new(),
            stage_id,
            title: title.into(),
            order: 0,
            reward: Reward::default(),
            created_at: now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Quiz,
    Lesson,
    Walkthrough,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [Self::Quiz, Self::Lesson, Self::Walkthrough];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Lesson => "lesson",
            Self::Walkthrough => "walkthrough",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "quiz" => Ok(Self::Quiz),
            "lesson" => Ok(Self::Lesson),
            "walkthrough" => Ok(Self::Walkthrough),
            _ => Err(CoreError::InvalidData(format!("unknown content type: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkthroughStep {
    pub title: String,
    pub body: String,
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafBody {
    Quiz { questions: Vec<Question> },
    Lesson { content: String },
    Walkthrough { steps: Vec<WalkthroughStep> },
}

impl LeafBody {
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Quiz { .. } => ContentType::Quiz,
            Self::Lesson { .. } => ContentType::Lesson,
            Self::Walkthrough { .. } => ContentType::Walkthrough,
        }
    }
}

/// Where a leaf item hangs in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LeafParent {
    Module(ModuleId),
    /// Un-moduled content attached directly to its course.
    Course(CourseId),
}

/// A quiz, lesson or walkthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafContent {
    pub id: ContentId,
    pub course_id: CourseId,
    pub module_id: Option<ModuleId>,
    pub order: i64,
    pub reward: Reward,
    pub title: String,
    pub description: String,
    pub body: LeafBody,
}

impl LeafContent {
    pub fn new(course_id: CourseId, module_id: Option<ModuleId>, title: impl Into<String>, body: LeafBody) -> Self {
        Self {
            id: ContentId::new(),
            course_id,
            module_id,
            order: 0,
            reward: Reward::default(),
            title: title.into(),
            description: String::new(),
            body,
        }
    }

    pub fn lesson(course_id: CourseId, module_id: Option<ModuleId>, title: impl Into<String>) -> Self {
        Self::new(course_id, module_id, title, LeafBody::Lesson { content: String::new() })
    }

    pub fn quiz(
        course_id: CourseId,
        module_id: Option<ModuleId>,
        title: impl Into<String>,
        questions: Vec<Question>,
    ) -> Self {
        Self::new(course_id, module_id, title, LeafBody::Quiz { questions })
    }

    pub fn walkthrough(
        course_id: CourseId,
        module_id: Option<ModuleId>,
        title: impl Into<String>,
        steps: Vec<WalkthroughStep>,
    ) -> Self {
        Self::new(course_id, module_id, title, LeafBody::Walkthrough { steps })
    }

    pub fn content_type(&self) -> ContentType {
        self.body.content_type()
    }

    pub fn parent(&self) -> LeafParent {
        match self.module_id {
            Some(module_id) => LeafParent::Module(module_id),
            None => LeafParent::Course(self.course_id),
        }
    }
}

/// Existence means the user has finished the leaf item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub user_id: UserId,
    pub content_id: ContentId,
    pub content_type: ContentType,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub order: i64,
    pub done: bool,
}

/// A course-like container whose task list is always saved whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBrief {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

impl ProjectBrief {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            title: title.into(),
            description: String::new(),
            order: 0,
            created_at: now(),
            tasks: Vec::new(),
        }
    }

    /// Append a task at the end of the list.
    pub fn push_task(&mut self, title: impl Into<String>) -> TaskId {
        let task = Task {
            id: TaskId::new(),
            project_id: self.id,
            title: title.into(),
            order: self.tasks.len() as i64,
            done: false,
        };
        let id = task.id;
        self.tasks.push(task);
        id
    }
}
