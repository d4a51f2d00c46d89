//! Contracts for the services the engine calls out to.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use curriculum_core::{ContentId, ContentType, CourseId, ModuleId, Reward, StageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurriculumEvent {
    LeafCompleted {
        user_id: UserId,
        content_id: ContentId,
        content_type: ContentType,
        title: String,
        reward: Reward,
    },
    ModuleCompleted {
        user_id: UserId,
        module_id: ModuleId,
        title: String,
        reward: Reward,
    },
    StageCompleted {
        user_id: UserId,
        stage_id: StageId,
        title: String,
        reward: Reward,
    },
    CourseCompleted {
        user_id: UserId,
        course_id: CourseId,
        title: String,
    },
}

impl CurriculumEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LeafCompleted { .. } => "leaf_completed",
            Self::ModuleCompleted { .. } => "module_completed",
            Self::StageCompleted { .. } => "stage_completed",
            Self::CourseCompleted { .. } => "course_completed",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::LeafCompleted { title, .. }
            | Self::ModuleCompleted { title, .. }
            | Self::StageCompleted { title, .. }
            | Self::CourseCompleted { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("account service error: {0}")]
pub struct AccountError(pub String);

/// Credits a user with reward points.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn award_points(&self, user_id: UserId, reward: Reward) -> Result<(), AccountError>;
}

/// Fire-and-forget sink for completion events.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &CurriculumEvent);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, event: &CurriculumEvent) {
        info!(kind = event.kind(), title = event.title(), "curriculum event");
    }
}
