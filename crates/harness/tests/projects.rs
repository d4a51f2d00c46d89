use curriculum_core::*;
use curriculum_engine::EngineError;
use curriculum_harness::{Op, TestResult, TestSession};
use curriculum_storage::{Filter, RemoteError, Table, columns};

async fn task_titles(session: &TestSession, id: ProjectId) -> TestResult<Vec<String>> {
    let rows = session
        .remote_rows(Table::ProjectTasks, &Filter::by(columns::PROJECT_ID, id))
        .await?;
    let mut tasks: Vec<(i64, String)> = rows
        .iter()
        .map(|r| {
            let order = r.get(columns::ORDER).and_then(FieldValue::as_integer).unwrap_or_default();
            let title = r.get(columns::TITLE).and_then(FieldValue::as_text).unwrap_or_default();
            (order, title.to_string())
        })
        .collect();
    tasks.sort();
    Ok(tasks.into_iter().map(|(_, t)| t).collect())
}

#[tokio::test]
async fn saving_replaces_the_whole_task_list() -> TestResult {
    let session = TestSession::start().await?;
    let mut brief = ProjectBrief::new("Garden");
    brief.push_task("dig");
    brief.push_task("plant");
    let id = session.engine.save_project(brief.clone()).await?;
    assert_eq!(task_titles(&session, id).await?, vec!["dig", "plant"]);

    brief.tasks.remove(0);
    brief.push_task("water");
    session.engine.save_project(brief).await?;
    assert_eq!(task_titles(&session, id).await?, vec!["plant", "water"]);

    let local: Vec<i64> = session
        .engine
        .read(|s| s.project(id).map(|p| p.tasks.iter().map(|t| t.order).collect()).unwrap_or_default());
    assert_eq!(local, vec![0, 1]);
    Ok(())
}

#[tokio::test]
async fn new_projects_go_last() -> TestResult {
    let session = TestSession::start().await?;
    let first = session.engine.save_project(ProjectBrief::new("a")).await?;
    let second = session.engine.save_project(ProjectBrief::new("b")).await?;
    let order: Vec<ProjectId> = session.engine.read(|s| s.projects().iter().map(|p| p.id).collect());
    assert_eq!(order, vec![first, second]);
    Ok(())
}

#[tokio::test]
async fn failed_save_restores_the_previous_brief() -> TestResult {
    let session = TestSession::start().await?;
    let mut brief = ProjectBrief::new("Garden");
    brief.push_task("dig");
    let id = session.engine.save_project(brief.clone()).await?;
    let before = session.engine.snapshot();

    brief.title = "Allotment".into();
    brief.push_task("fence");
    session
        .remote
        .fail(Op::SaveAggregate, Table::Projects, RemoteError::Transport("down".into()), 1);
    assert!(session.engine.save_project(brief).await.is_err());

    assert_eq!(session.engine.snapshot(), before);
    assert_eq!(task_titles(&session, id).await?, vec!["dig"]);
    Ok(())
}

#[tokio::test]
async fn failed_first_save_leaves_no_project() -> TestResult {
    let session = TestSession::start().await?;
    session
        .remote
        .fail(Op::SaveAggregate, Table::Projects, RemoteError::Transport("down".into()), 1);
    assert!(session.engine.save_project(ProjectBrief::new("x")).await.is_err());
    assert!(session.engine.read(|s| s.projects().is_empty()));
    Ok(())
}

#[tokio::test]
async fn delete_removes_header_and_tasks() -> TestResult {
    let session = TestSession::start().await?;
    let mut brief = ProjectBrief::new("Garden");
    brief.push_task("dig");
    let id = session.engine.save_project(brief).await?;

    session.engine.delete_project(id).await?;
    assert!(session.engine.read(|s| s.project(id).is_none()));
    assert_eq!(session.sqlite().row_count(Table::Projects)?, 0);
    assert_eq!(session.sqlite().row_count(Table::ProjectTasks)?, 0);

    let err = session.engine.delete_project(id).await.unwrap_err();
    assert!(matches!(err, EngineError::EntityNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn failed_delete_keeps_the_project() -> TestResult {
    let session = TestSession::start().await?;
    let id = session.engine.save_project(ProjectBrief::new("keep")).await?;
    session
        .remote
        .fail(Op::DeleteAggregate, Table::Projects, RemoteError::Transport("down".into()), 1);
    assert!(session.engine.delete_project(id).await.is_err());
    assert!(session.engine.read(|s| s.project(id).is_some()));
    Ok(())
}
