//! Translation between domain records and remote rows.
//!
//! `to_remote` produces a [`RemotePayload`] whose columns are tagged as
//! required or optional. Only optional columns may be stripped when the
//! remote reports that it does not know them.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use curriculum_core::{
    CompletionRecord, ContentId, ContentType, Course, CourseId, FieldValue, Folder, FolderId,
    LeafBody, LeafContent, Module, ModuleId, ProjectBrief, ProjectId, Reward, Stage, StageId, Task,
    TaskId, UserId,
};

use crate::traits::{RemoteRow, Table};

pub mod columns {
    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const COLOR: &str = "color";
    pub const ORDER: &str = "order_index";
    pub const FOLDER_ID: &str = "folder_id";
    pub const COURSE_ID: &str = "course_id";
    pub const STAGE_ID: &str = "stage_id";
    pub const MODULE_ID: &str = "module_id";
    pub const PROJECT_ID: &str = "project_id";
    pub const USER_ID: &str = "user_id";
    pub const CONTENT_ID: &str = "content_id";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const XP_REWARD: &str = "xp_reward";
    pub const DOWD_BUCKS_REWARD: &str = "dowd_bucks_reward";
    pub const CREATED_AT: &str = "created_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const QUESTIONS: &str = "questions";
    pub const CONTENT: &str = "content";
    pub const STEPS: &str = "steps";
    pub const DONE: &str = "done";
    pub const KIND: &str = "kind";
}

use columns::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Identity, parent references and ordering. Never stripped.
    Required,
    /// Descriptive fields the remote may not have yet.
    Optional,
}

/// A typed write payload for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePayload {
    table: Table,
    columns: BTreeMap<&'static str, (ColumnKind, FieldValue)>,
    stripped: Vec<String>,
}

impl RemotePayload {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: BTreeMap::new(),
            stripped: Vec::new(),
        }
    }

    pub fn required(mut self, column: &'static str, value: FieldValue) -> Self {
        self.columns.insert(column, (ColumnKind::Required, value));
        self
    }

    pub fn optional(mut self, column: &'static str, value: FieldValue) -> Self {
        self.columns.insert(column, (ColumnKind::Optional, value));
        self
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns.get(column).map(|(_, v)| v)
    }

    pub fn kind(&self, column: &str) -> Option<ColumnKind> {
        self.columns.get(column).map(|(k, _)| *k)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Remove an optional column. Returns false when the column is required
    /// or absent, in which case the payload is left as it was.
    pub fn strip(&mut self, column: &str) -> bool {
        match self.columns.get(column) {
            Some((ColumnKind::Optional, _)) => {
                self.columns.remove(column);
                self.stripped.push(column.to_string());
                true
            }
            _ => false,
        }
    }

    /// Columns removed so far by [`RemotePayload::strip`].
    pub fn stripped(&self) -> &[String] {
        &self.stripped
    }

    pub fn to_row(&self) -> RemoteRow {
        self.columns
            .iter()
            .map(|(name, (_, value))| (name.to_string(), value.clone()))
            .collect()
    }

    /// Row minus its `id` column, for update patches.
    pub fn to_patch(&self) -> RemoteRow {
        let mut row = self.to_row();
        row.remove(ID);
        row
    }
}

/// Bidirectional mapping between a domain record and its remote row.
pub trait RemoteEntity: Sized {
    type Id: Copy + Ord + std::fmt::Debug;

    fn id(&self) -> Self::Id;

    fn table(&self) -> Table;

    fn to_remote(&self) -> RemotePayload;

    /// `None` only when the row lacks a usable identity or mandatory parent.
    fn from_remote(table: Table, row: &RemoteRow) -> Option<Self>;
}

fn text(row: &RemoteRow, column: &str) -> String {
    row.get(column)
        .and_then(FieldValue::as_text)
        .map(str::to_string)
        .unwrap_or_default()
}

fn integer(row: &RemoteRow, column: &str) -> i64 {
    row.get(column).and_then(FieldValue::as_integer).unwrap_or_default()
}

fn boolean(row: &RemoteRow, column: &str) -> bool {
    row.get(column).and_then(FieldValue::as_boolean).unwrap_or_default()
}

fn id<T: FromStr>(row: &RemoteRow, column: &str) -> Option<T> {
    row.get(column).and_then(FieldValue::as_text).and_then(|s| s.parse().ok())
}

fn timestamp(row: &RemoteRow, column: &str) -> DateTime<Utc> {
    row.get(column)
        .and_then(FieldValue::as_integer)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

fn ts(value: &DateTime<Utc>) -> FieldValue {
    FieldValue::Timestamp(value.timestamp_millis())
}

fn reward(row: &RemoteRow) -> Reward {
    Reward::new(integer(row, XP_REWARD), integer(row, DOWD_BUCKS_REWARD))
}

fn encoded<T: Serialize>(value: &T) -> FieldValue {
    match rmp_serde::to_vec(value) {
        Ok(bytes) => FieldValue::Bytes(bytes),
        Err(e) => {
            warn!(error = %e, "failed to encode structured column");
            FieldValue::Null
        }
    }
}

fn decoded<T: DeserializeOwned + Default>(row: &RemoteRow, column: &str) -> T {
    let Some(bytes) = row.get(column).and_then(FieldValue::as_bytes) else {
        return T::default();
    };
    rmp_serde::from_slice(bytes).unwrap_or_else(|e| {
        warn!(column, error = %e, "undecodable structured column, using empty value");
        T::default()
    })
}

impl RemoteEntity for Folder {
    type Id = FolderId;

    fn id(&self) -> FolderId {
        self.id
    }

    fn table(&self) -> Table {
        Table::Folders
    }

    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::Folders)
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(DESCRIPTION, FieldValue::text(&self.description))
            .optional(COLOR, FieldValue::text(&self.color))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        Some(Self {
            id: id(row, ID)?,
            title: text(row, TITLE),
            description: text(row, DESCRIPTION),
            color: text(row, COLOR),
            order: integer(row, ORDER),
        })
    }
}

impl RemoteEntity for Course {
    type Id = CourseId;

    fn id(&self) -> CourseId {
        self.id
    }

    fn table(&self) -> Table {
        Table::Courses
    }

    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::Courses)
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(DESCRIPTION, FieldValue::text(&self.description))
            .optional(COLOR, FieldValue::text(&self.color))
            .optional(FOLDER_ID, FieldValue::optional_text(self.folder_id))
            .optional(CREATED_AT, ts(&self.created_at))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        Some(Self {
            id: id(row, ID)?,
            title: text(row, TITLE),
            description: text(row, DESCRIPTION),
            color: text(row, COLOR),
            order: integer(row, ORDER),
            folder_id: id(row, FOLDER_ID),
            created_at: timestamp(row, CREATED_AT),
        })
    }
}

impl RemoteEntity for Stage {
    type Id = StageId;

    fn id(&self) -> StageId {
        self.id
    }

    fn table(&self) -> Table {
        Table::Stages
    }

    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::Stages)
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(COURSE_ID, FieldValue::text(self.course_id.to_string()))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(XP_REWARD, FieldValue::Integer(self.reward.xp))
            .optional(DOWD_BUCKS_REWARD, FieldValue::Integer(self.reward.dowd_bucks))
            .optional(CREATED_AT, ts(&self.created_at))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        Some(Self {
            id: id(row, ID)?,
            course_id: id(row, COURSE_ID)?,
            title: text(row, TITLE),
            order: integer(row, ORDER),
            reward: reward(row),
            created_at: timestamp(row, CREATED_AT),
        })
    }
}

impl RemoteEntity for Module {
    type Id = ModuleId;

    fn id(&self) -> ModuleId {
        self.id
    }

    fn table(&self) -> Table {
        Table::Modules
    }

    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::Modules)
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(STAGE_ID, FieldValue::text(self.stage_id.to_string()))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(XP_REWARD, FieldValue::Integer(self.reward.xp))
            .optional(DOWD_BUCKS_REWARD, FieldValue::Integer(self.reward.dowd_bucks))
            .optional(CREATED_AT, ts(&self.created_at))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        Some(Self {
            id: id(row, ID)?,
            stage_id: id(row, STAGE_ID)?,
            title: text(row, TITLE),
            order: integer(row, ORDER),
            reward: reward(row),
            created_at: timestamp(row, CREATED_AT),
        })
    }
}

impl RemoteEntity for LeafContent {
    type Id = ContentId;

    fn id(&self) -> ContentId {
        self.id
    }

    fn table(&self) -> Table {
        Table::for_content(self.content_type())
    }

    fn to_remote(&self) -> RemotePayload {
        let payload = RemotePayload::new(self.table())
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(COURSE_ID, FieldValue::text(self.course_id.to_string()))
            .required(MODULE_ID, FieldValue::optional_text(self.module_id))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(DESCRIPTION, FieldValue::text(&self.description))
            .optional(XP_REWARD, FieldValue::Integer(self.reward.xp))
            .optional(DOWD_BUCKS_REWARD, FieldValue::Integer(self.reward.dowd_bucks));
        match &self.body {
            LeafBody::Quiz { questions } => payload.optional(QUESTIONS, encoded(questions)),
            LeafBody::Lesson { content } => payload.optional(CONTENT, FieldValue::text(content)),
            LeafBody::Walkthrough { steps } => payload.optional(STEPS, encoded(steps)),
        }
    }

    fn from_remote(table: Table, row: &RemoteRow) -> Option<Self> {
        let body = match table.content_type()? {
            ContentType::Quiz => LeafBody::Quiz {
                questions: decoded(row, QUESTIONS),
            },
            ContentType::Lesson => LeafBody::Lesson {
                content: text(row, CONTENT),
            },
            ContentType::Walkthrough => LeafBody::Walkthrough {
                steps: decoded(row, STEPS),
            },
        };
        Some(Self {
            id: id(row, ID)?,
            course_id: id(row, COURSE_ID)?,
            module_id: id(row, MODULE_ID),
            order: integer(row, ORDER),
            reward: reward(row),
            title: text(row, TITLE),
            description: text(row, DESCRIPTION),
            body,
        })
    }
}

impl RemoteEntity for CompletionRecord {
    type Id = (UserId, ContentId, ContentType);

    fn id(&self) -> Self::Id {
        (self.user_id, self.content_id, self.content_type)
    }

    fn table(&self) -> Table {
        Table::Completions
    }

    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::Completions)
            .required(USER_ID, FieldValue::text(self.user_id.to_string()))
            .required(CONTENT_ID, FieldValue::text(self.content_id.to_string()))
            .required(CONTENT_TYPE, FieldValue::text(self.content_type.as_str()))
            .optional(COMPLETED_AT, ts(&self.completed_at))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        let content_type = row
            .get(CONTENT_TYPE)
            .and_then(FieldValue::as_text)
            .and_then(|s| ContentType::parse(s).ok())?;
        Some(Self {
            user_id: id(row, USER_ID)?,
            content_id: id(row, CONTENT_ID)?,
            content_type,
            completed_at: timestamp(row, COMPLETED_AT),
        })
    }
}

impl RemoteEntity for ProjectBrief {
    type Id = ProjectId;

    fn id(&self) -> ProjectId {
        self.id
    }

    fn table(&self) -> Table {
        Table::Projects
    }

    /// Header row only; tasks travel as their own rows.
    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::Projects)
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(DESCRIPTION, FieldValue::text(&self.description))
            .optional(CREATED_AT, ts(&self.created_at))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        Some(Self {
            id: id(row, ID)?,
            title: text(row, TITLE),
            description: text(row, DESCRIPTION),
            order: integer(row, ORDER),
            created_at: timestamp(row, CREATED_AT),
            tasks: Vec::new(),
        })
    }
}

impl RemoteEntity for Task {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.id
    }

    fn table(&self) -> Table {
        Table::ProjectTasks
    }

    fn to_remote(&self) -> RemotePayload {
        RemotePayload::new(Table::ProjectTasks)
            .required(ID, FieldValue::text(self.id.to_string()))
            .required(PROJECT_ID, FieldValue::text(self.project_id.to_string()))
            .required(ORDER, FieldValue::Integer(self.order))
            .optional(TITLE, FieldValue::text(&self.title))
            .optional(DONE, FieldValue::Boolean(self.done))
    }

    fn from_remote(_table: Table, row: &RemoteRow) -> Option<Self> {
        Some(Self {
            id: id(row, ID)?,
            project_id: id(row, PROJECT_ID)?,
            title: text(row, TITLE),
            order: integer(row, ORDER),
            done: boolean(row, DONE),
        })
    }
}
