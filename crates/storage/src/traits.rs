use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use curriculum_core::{ContentType, FieldValue};

use crate::error::RemoteError;

/// A row as the remote store sees it: column name to value.
pub type RemoteRow = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Folders,
    Courses,
    Stages,
    Modules,
    Quizzes,
    Lessons,
    Walkthroughs,
    Completions,
    CalendarEvents,
    Notifications,
    Projects,
    ProjectTasks,
}

impl Table {
    /// Every table that makes up the curriculum tree and its completion facts.
    pub const CURRICULUM: [Table; 10] = [
        Self::Folders,
        Self::Courses,
        Self::Stages,
        Self::Modules,
        Self::Quizzes,
        Self::Lessons,
        Self::Walkthroughs,
        Self::Completions,
        Self::Projects,
        Self::ProjectTasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folders => "folders",
            Self::Courses => "courses",
            Self::Stages => "stages",
            Self::Modules => "modules",
            Self::Quizzes => "quizzes",
            Self::Lessons => "lessons",
            Self::Walkthroughs => "walkthroughs",
            Self::Completions => "content_completions",
            Self::CalendarEvents => "calendar_events",
            Self::Notifications => "notifications",
            Self::Projects => "projects",
            Self::ProjectTasks => "project_tasks",
        }
    }

    pub fn for_content(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Quiz => Self::Quizzes,
            ContentType::Lesson => Self::Lessons,
            ContentType::Walkthrough => Self::Walkthroughs,
        }
    }

    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Self::Quizzes => Some(ContentType::Quiz),
            Self::Lessons => Some(ContentType::Lesson),
            Self::Walkthroughs => Some(ContentType::Walkthrough),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row selection for reads, updates and deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Eq(&'static str, FieldValue),
    In(&'static str, Vec<FieldValue>),
    IsNull(&'static str),
    And(Vec<Filter>),
}

impl Filter {
    pub fn by(column: &'static str, value: impl fmt::Display) -> Self {
        Self::Eq(column, FieldValue::Text(value.to_string()))
    }

    pub fn id(value: impl fmt::Display) -> Self {
        Self::by(crate::mapper::columns::ID, value)
    }

    pub fn any_of<T: fmt::Display>(column: &'static str, values: impl IntoIterator<Item = T>) -> Self {
        Self::In(
            column,
            values.into_iter().map(|v| FieldValue::Text(v.to_string())).collect(),
        )
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Column names referenced anywhere in this filter.
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Self::All => Vec::new(),
            Self::Eq(c, _) | Self::In(c, _) | Self::IsNull(c) => vec![*c],
            Self::And(filters) => filters.iter().flat_map(Filter::columns).collect(),
        }
    }

    /// True when the filter can never match anything.
    pub fn is_empty_set(&self) -> bool {
        match self {
            Self::In(_, values) => values.is_empty(),
            Self::And(filters) => filters.iter().any(Filter::is_empty_set),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The subscriber fell behind and an unknown number of changes were missed.
    Lagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Handle returned by [`RemoteStore::subscribe`], filtered to a set of tables.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    tables: Vec<Table>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<ChangeEvent>, tables: &[Table]) -> Self {
        Self {
            rx,
            tables: tables.to_vec(),
        }
    }

    fn wants(&self, table: Table) -> bool {
        self.tables.contains(&table)
    }

    fn lagged(&self, missed: u64) -> ChangeEvent {
        warn!(missed, "change subscription lagged");
        ChangeEvent {
            table: self.tables.first().copied().unwrap_or(Table::Courses),
            kind: ChangeKind::Lagged,
        }
    }

    /// Wait for the next change on a watched table. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(event.table) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => return Some(self.lagged(missed)),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used to coalesce a burst of notifications.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(event.table) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => return Some(self.lagged(missed)),
                Err(_) => return None,
            }
        }
    }
}

/// Table-oriented remote persistence that the engine mirrors locally.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<RemoteRow>, RemoteError>;

    async fn insert(&self, table: Table, rows: &[RemoteRow]) -> Result<(), RemoteError>;

    /// Insert-or-update keyed by the `id` column, applied as one batch.
    async fn upsert(&self, table: Table, rows: &[RemoteRow]) -> Result<(), RemoteError>;

    async fn update(&self, table: Table, patch: &RemoteRow, filter: &Filter) -> Result<u64, RemoteError>;

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, RemoteError>;

    fn subscribe(&self, tables: &[Table]) -> Subscription;
}

/// A header row plus the complete list of its child rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub table: Table,
    pub header: RemoteRow,
    pub child_table: Table,
    pub parent_column: &'static str,
    pub children: Vec<RemoteRow>,
}

/// Saves a container and its full child list as one unit.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Replace the header and every child row in one transaction, returning the header id.
    async fn save_aggregate_atomically(&self, aggregate: &Aggregate) -> Result<String, RemoteError>;

    async fn delete_aggregate(
        &self,
        table: Table,
        child_table: Table,
        parent_column: &'static str,
        id: &str,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_and_collects_columns() {
        let filter = Filter::by("course_id", "c").and(Filter::IsNull("module_id")).and(Filter::All);
        assert_eq!(filter.columns(), vec!["course_id", "module_id"]);
        match filter {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn empty_in_never_matches() {
        assert!(Filter::any_of::<String>("id", Vec::new()).is_empty_set());
        assert!(!Filter::id("x").is_empty_set());
    }

    #[test]
    fn content_tables_map_back_to_types() {
        for ty in ContentType::ALL {
            assert_eq!(Table::for_content(ty).content_type(), Some(ty));
        }
        assert_eq!(Table::Stages.content_type(), None);
    }

    #[tokio::test]
    async fn subscription_skips_unwatched_tables() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::new(rx, &[Table::Stages]);
        tx.send(ChangeEvent { table: Table::Notifications, kind: ChangeKind::Insert }).unwrap();
        tx.send(ChangeEvent { table: Table::Stages, kind: ChangeKind::Delete }).unwrap();
        let event = sub.next().await.unwrap();
        assert_eq!(event.table, Table::Stages);
        assert!(sub.try_next().is_none());
    }
}
