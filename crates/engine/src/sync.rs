//! Full reloads and the remote change listener.
//!
//! A reload reads every curriculum table and swaps the result in wholesale.
//! Bursts of change notifications collapse into one reload.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use curriculum_core::*;
use curriculum_storage::{ChangeKind, Filter, RemoteEntity, Subscription, Table, columns};

use crate::error::EngineError;
use crate::store::CurriculumStore;
use crate::Curriculum;

impl Curriculum {
    /// Bind the engine to `user_id` and load everything.
    pub async fn start_session(&self, user_id: UserId) -> Result<(), EngineError> {
        self.write(|store| store.begin(user_id));
        info!(%user_id, "session started");
        self.reload().await
    }

    /// Forget the session user and every cached record.
    pub fn end_session(&self) {
        self.write(CurriculumStore::clear);
        info!("session ended");
    }

    /// Replace the store with a fresh copy of the remote.
    pub async fn reload(&self) -> Result<(), EngineError> {
        let user_id = self.read(CurriculumStore::user_id).ok_or(EngineError::NoSession)?;
        let fresh = self.load(user_id).await?;
        self.write(|store| {
            if store.user_id() != Some(user_id) {
                debug!(%user_id, "session changed during reload, discarding result");
                return;
            }
            store.replace_with(fresh);
            debug!(generation = store.generation(), "store reloaded");
        });
        Ok(())
    }

    async fn load(&self, user_id: UserId) -> Result<CurriculumStore, EngineError> {
        let mut fresh = CurriculumStore::new(user_id);

        for folder in self.fetch::<Folder>(Table::Folders, &Filter::All).await? {
            fresh.insert(folder);
        }
        for course in self.fetch::<Course>(Table::Courses, &Filter::All).await? {
            fresh.insert(course);
        }
        for stage in self.fetch::<Stage>(Table::Stages, &Filter::All).await? {
            fresh.insert(stage);
        }
        for module in self.fetch::<Module>(Table::Modules, &Filter::All).await? {
            fresh.insert(module);
        }
        for content_type in ContentType::ALL {
            let table = Table::for_content(content_type);
            for leaf in self.fetch::<LeafContent>(table, &Filter::All).await? {
                fresh.insert(leaf);
            }
        }

        let mine = Filter::by(columns::USER_ID, user_id);
        for record in self.fetch::<CompletionRecord>(Table::Completions, &mine).await? {
            fresh.mark_completed(record.user_id, record.content_type, record.content_id);
        }

        let mut tasks: BTreeMap<ProjectId, Vec<Task>> = BTreeMap::new();
        for task in self.fetch::<Task>(Table::ProjectTasks, &Filter::All).await? {
            tasks.entry(task.project_id).or_default().push(task);
        }
        for mut project in self.fetch::<ProjectBrief>(Table::Projects, &Filter::All).await? {
            let mut list = tasks.remove(&project.id).unwrap_or_default();
            list.sort_by_key(|t| (t.order, t.id));
            project.tasks = list;
            fresh.insert_project(project);
        }

        Ok(fresh)
    }

    /// Read and map every row of `table`, skipping rows that cannot be mapped.
    async fn fetch<E: RemoteEntity>(&self, table: Table, filter: &Filter) -> Result<Vec<E>, EngineError> {
        let rows = self.remote.select(table, filter).await?;
        let total = rows.len();
        let mapped: Vec<E> = rows.iter().filter_map(|row| E::from_remote(table, row)).collect();
        if mapped.len() < total {
            warn!(%table, skipped = total - mapped.len(), "skipped unmappable rows");
        }
        Ok(mapped)
    }

    /// Subscribe to changes on every table the store mirrors.
    pub fn subscribe_changes(&self) -> Subscription {
        self.remote.subscribe(&Table::CURRICULUM)
    }

    /// Reload whenever the remote reports a change, until the subscription ends.
    pub async fn run_change_listener(&self, mut subscription: Subscription) {
        while let Some(event) = subscription.next().await {
            let mut coalesced = 0usize;
            while subscription.try_next().is_some() {
                coalesced += 1;
            }
            if !self.config.reload_on_change {
                continue;
            }
            if self.read(CurriculumStore::user_id).is_none() {
                debug!("change received without a session, ignoring");
                continue;
            }
            if event.kind == ChangeKind::Lagged {
                warn!("change stream lagged, reloading");
            }
            debug!(table = %event.table, kind = ?event.kind, coalesced, "remote changed");
            if let Err(e) = self.reload().await {
                warn!(error = %e, "reload after remote change failed");
            }
        }
        debug!("change subscription closed");
    }
}
