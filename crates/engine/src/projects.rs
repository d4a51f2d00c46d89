//! Project briefs: header plus task list, always saved as one unit.

use tracing::{error, info};

use curriculum_core::*;
use curriculum_storage::{Aggregate, RemoteEntity, Table, columns};

use crate::error::EngineError;
use crate::Curriculum;

fn aggregate_of(brief: &ProjectBrief) -> Aggregate {
    Aggregate {
        table: Table::Projects,
        header: brief.to_remote().to_row(),
        child_table: Table::ProjectTasks,
        parent_column: columns::PROJECT_ID,
        children: brief.tasks.iter().map(|t| t.to_remote().to_row()).collect(),
    }
}

impl Curriculum {
    /// Create or replace a project and its full task list.
    pub async fn save_project(&self, mut brief: ProjectBrief) -> Result<ProjectId, EngineError> {
        let id = brief.id;
        for (index, task) in brief.tasks.iter_mut().enumerate() {
            task.project_id = id;
            task.order = index as i64;
        }

        let (previous, generation) = self.write(|store| {
            let previous = store.project(id).cloned();
            match &previous {
                Some(existing) => brief.order = existing.order,
                None => brief.order = store.projects().len() as i64,
            }
            store.insert_project(brief.clone());
            (previous, store.generation())
        });

        if let Err(e) = self.aggregates.save_aggregate_atomically(&aggregate_of(&brief)).await {
            error!(%id, error = %e, "project save failed, rolling back");
            self.rollback(generation, |store| match previous {
                Some(previous) => {
                    store.insert_project(previous);
                }
                None => {
                    store.projects_mut().remove(&id);
                }
            });
            return Err(e.into());
        }
        info!(%id, tasks = brief.tasks.len(), "project saved");
        Ok(id)
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<(), EngineError> {
        let (removed, generation) = self.write(|store| {
            let removed = store
                .projects_mut()
                .remove(&id)
                .ok_or_else(|| EngineError::EntityNotFound(format!("project {id}")))?;
            Ok::<_, EngineError>((removed, store.generation()))
        })?;

        let result = self
            .aggregates
            .delete_aggregate(Table::Projects, Table::ProjectTasks, columns::PROJECT_ID, &id.to_string())
            .await;
        if let Err(e) = result {
            error!(%id, error = %e, "project delete failed, rolling back");
            self.rollback(generation, |store| {
                store.insert_project(removed);
            });
            return Err(e.into());
        }
        Ok(())
    }
}
