use curriculum_core::*;
use curriculum_engine::{CompletionOutcome, CompletionReport, CurriculumEvent, EngineConfig, EngineError};
use curriculum_harness::{Op, TestResult, TestSession};
use curriculum_storage::{Filter, RemoteEntity, RemoteError, RemoteStore, Table, columns};

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn completing_twice_records_once() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(2).await?;
    let leaf = tree.lessons[0];

    let first = session.engine.complete_leaf(leaf, ContentType::Lesson, session.user).await?;
    let second = session.engine.complete_leaf(leaf, ContentType::Lesson, session.user).await?;

    assert!(matches!(first, CompletionOutcome::Completed(_)));
    assert_eq!(second, CompletionOutcome::AlreadyCompleted);
    let rows = session
        .remote_rows(Table::Completions, &Filter::by(columns::CONTENT_ID, leaf))
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(session.sink.kinds(), vec!["leaf_completed"]);
    Ok(())
}

#[tokio::test]
async fn record_already_on_the_remote_counts_as_completed() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(2).await?;
    let leaf = tree.lessons[0];

    // Another device finished it; this client has not reloaded yet.
    let record = CompletionRecord {
        user_id: session.user,
        content_id: leaf,
        content_type: ContentType::Lesson,
        completed_at: now(),
    };
    session
        .sqlite()
        .insert(Table::Completions, &[record.to_remote().to_row()])
        .await?;

    let outcome = session.engine.complete_leaf(leaf, ContentType::Lesson, session.user).await?;
    assert_eq!(outcome, CompletionOutcome::AlreadyCompleted);
    assert!(session.sink.events().is_empty());
    assert!(session.accounts.awards().is_empty());
    assert!(session
        .engine
        .read(|s| s.is_completed(session.user, ContentType::Lesson, leaf)));
    Ok(())
}

#[tokio::test]
async fn failed_completion_write_changes_nothing() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;

    session
        .remote
        .fail(Op::Insert, Table::Completions, RemoteError::Transport("down".into()), 1);
    let err = session
        .engine
        .complete_leaf(tree.lessons[0], ContentType::Lesson, session.user)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Remote(_)));
    assert!(!session
        .engine
        .read(|s| s.is_completed(session.user, ContentType::Lesson, tree.lessons[0])));
    assert!(session.sink.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_content_type_is_rejected() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    let err = session
        .engine
        .complete_leaf(tree.lessons[0], ContentType::Quiz, session.user)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ContentTypeMismatch { .. }));
    Ok(())
}

// ============================================================================
// Propagation
// ============================================================================

#[tokio::test]
async fn module_completes_only_with_its_last_leaf() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(3).await?;

    for leaf in &tree.lessons[..2] {
        session.engine.complete_leaf(*leaf, ContentType::Lesson, session.user).await?;
    }
    assert_eq!(session.sink.kinds(), vec!["leaf_completed", "leaf_completed"]);
    session.sink.clear();

    let outcome = session
        .engine
        .complete_leaf(tree.lessons[2], ContentType::Lesson, session.user)
        .await?;
    assert_eq!(
        outcome,
        CompletionOutcome::Completed(CompletionReport {
            module: Some(tree.module),
            stage: Some(tree.stage),
            course: Some(tree.course),
        })
    );
    assert_eq!(
        session.sink.kinds(),
        vec!["leaf_completed", "module_completed", "stage_completed", "course_completed"]
    );
    Ok(())
}

#[tokio::test]
async fn stage_waits_for_its_last_module() -> TestResult {
    let session = TestSession::start().await?;
    let course = session.seed_course("c").await?;
    let stage = session.seed_stage(course, "s").await?;
    let m1 = session.seed_module(stage, "m1").await?;
    let m2 = session.seed_module(stage, "m2").await?;
    let a = session.seed_lesson(course, Some(m1), "a").await?;
    let b = session.seed_quiz(course, Some(m2), "b").await?;

    session.engine.complete_leaf(a, ContentType::Lesson, session.user).await?;
    assert_eq!(session.sink.kinds(), vec!["leaf_completed", "module_completed"]);
    session.sink.clear();

    session.engine.complete_leaf(b, ContentType::Quiz, session.user).await?;
    let kinds = session.sink.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == "module_completed").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "stage_completed").count(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_module_is_never_complete() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    session.seed_module(tree.stage, "empty").await?;

    let outcome = session
        .engine
        .complete_leaf(tree.lessons[0], ContentType::Lesson, session.user)
        .await?;
    assert_eq!(
        outcome,
        CompletionOutcome::Completed(CompletionReport {
            module: Some(tree.module),
            stage: None,
            course: None,
        })
    );
    let progress = session.engine.course_progress(session.user, tree.course);
    assert_eq!(progress.total_modules, 2);
    assert_eq!(progress.completed_modules, 1);
    assert!(!progress.complete);
    Ok(())
}

#[tokio::test]
async fn course_direct_content_does_not_complete_the_course() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    let appendix = session.seed_lesson(tree.course, None, "appendix").await?;

    session.engine.complete_leaf(tree.lessons[0], ContentType::Lesson, session.user).await?;
    assert!(session.engine.course_progress(session.user, tree.course).complete);
    session.sink.clear();

    // The course is already complete; finishing extra content changes nothing above the leaf.
    let outcome = session.engine.complete_leaf(appendix, ContentType::Lesson, session.user).await?;
    assert_eq!(outcome, CompletionOutcome::Completed(CompletionReport::default()));
    assert_eq!(session.sink.kinds(), vec!["leaf_completed"]);
    Ok(())
}

#[tokio::test]
async fn course_completion_is_announced_once() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    let extras = [
        session.seed_lesson(tree.course, None, "appendix").await?,
        session.seed_quiz(tree.course, None, "bonus").await?,
    ];

    session.engine.complete_leaf(tree.lessons[0], ContentType::Lesson, session.user).await?;
    session.engine.complete_leaf(extras[0], ContentType::Lesson, session.user).await?;
    session.engine.complete_leaf(extras[1], ContentType::Quiz, session.user).await?;

    let courses = session.sink.kinds().iter().filter(|k| **k == "course_completed").count();
    assert_eq!(courses, 1);
    Ok(())
}

#[tokio::test]
async fn completions_are_per_user() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    let someone_else = UserId::new();

    session
        .engine
        .complete_leaf(tree.lessons[0], ContentType::Lesson, someone_else)
        .await?;
    assert!(!session
        .engine
        .read(|s| s.is_completed(session.user, ContentType::Lesson, tree.lessons[0])));
    assert!(!session.engine.course_progress(session.user, tree.course).complete);
    assert!(session.engine.course_progress(someone_else, tree.course).complete);
    Ok(())
}

// ============================================================================
// Rewards and notifications
// ============================================================================

#[tokio::test]
async fn rewards_are_awarded_per_level() -> TestResult {
    let session = TestSession::start().await?;
    let course = session.seed_course("c").await?;
    let mut stage = Stage::new(course, "s");
    stage.reward = Reward::new(100, 10);
    let stage = session.engine.create_stage(stage).await?;
    let mut module = Module::new(stage, "m");
    module.reward = Reward::new(20, 2);
    let module = session.engine.create_module(module).await?;
    let mut lesson = LeafContent::lesson(course, Some(module), "l");
    lesson.reward = Reward::new(5, 0);
    let lesson = session.engine.create_leaf(lesson).await?;

    session.engine.complete_leaf(lesson, ContentType::Lesson, session.user).await?;

    let rewards: Vec<Reward> = session.accounts.awards().into_iter().map(|(_, r)| r).collect();
    assert_eq!(rewards, vec![Reward::new(5, 0), Reward::new(20, 2), Reward::new(100, 10)]);
    assert_eq!(session.accounts.total_xp(session.user), 125);
    Ok(())
}

#[tokio::test]
async fn award_failures_do_not_fail_completion() -> TestResult {
    let session = TestSession::start().await?;
    let course = session.seed_course("c").await?;
    let mut lesson = LeafContent::lesson(course, None, "l");
    lesson.reward = Reward::new(5, 0);
    let lesson = session.engine.create_leaf(lesson).await?;
    session.accounts.set_failing(true);

    let outcome = session.engine.complete_leaf(lesson, ContentType::Lesson, session.user).await?;
    assert!(matches!(outcome, CompletionOutcome::Completed(_)));
    assert!(session.accounts.awards().is_empty());
    assert_eq!(session.sink.kinds(), vec!["leaf_completed"]);
    Ok(())
}

#[tokio::test]
async fn stage_and_course_completion_leave_notifications() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    session.engine.complete_leaf(tree.lessons[0], ContentType::Lesson, session.user).await?;

    let rows = session
        .remote_rows(Table::Notifications, &Filter::by(columns::USER_ID, session.user))
        .await?;
    let mut kinds: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get(columns::KIND).and_then(FieldValue::as_text).map(str::to_string))
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["course_completed", "stage_completed"]);
    Ok(())
}

#[tokio::test]
async fn notification_rows_can_be_disabled() -> TestResult {
    let config = EngineConfig {
        persist_notifications: false,
        ..EngineConfig::default()
    };
    let session = TestSession::start_with(config).await?;
    let tree = session.seed_tree(1).await?;
    session.engine.complete_leaf(tree.lessons[0], ContentType::Lesson, session.user).await?;

    assert_eq!(session.sqlite().row_count(Table::Notifications)?, 0);
    assert!(session
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, CurriculumEvent::CourseCompleted { .. })));
    Ok(())
}

#[tokio::test]
async fn notification_write_failures_are_ignored() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(1).await?;
    session
        .remote
        .fail_always(Op::Insert, Table::Notifications, RemoteError::Transport("down".into()));

    let outcome = session
        .engine
        .complete_leaf(tree.lessons[0], ContentType::Lesson, session.user)
        .await?;
    assert!(matches!(outcome, CompletionOutcome::Completed(CompletionReport { course: Some(_), .. })));
    Ok(())
}

// ============================================================================
// Progress reset
// ============================================================================

#[tokio::test]
async fn reset_clears_course_completions() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(2).await?;
    let other = session.seed_tree(1).await?;
    for leaf in &tree.lessons {
        session.engine.complete_leaf(*leaf, ContentType::Lesson, session.user).await?;
    }
    session.engine.complete_leaf(other.lessons[0], ContentType::Lesson, session.user).await?;

    let cleared = session.engine.reset_course_progress(session.user, tree.course).await?;
    assert_eq!(cleared, 2);
    assert_eq!(session.engine.course_progress(session.user, tree.course).completed_leaves, 0);
    assert_eq!(session.sqlite().row_count(Table::Completions)?, 1);

    // Completing again starts the roll-up from scratch.
    session.sink.clear();
    for leaf in &tree.lessons {
        session.engine.complete_leaf(*leaf, ContentType::Lesson, session.user).await?;
    }
    assert!(session.sink.kinds().contains(&"course_completed"));
    Ok(())
}

#[tokio::test]
async fn failed_reset_restores_completions() -> TestResult {
    let session = TestSession::start().await?;
    let tree = session.seed_tree(2).await?;
    for leaf in &tree.lessons {
        session.engine.complete_leaf(*leaf, ContentType::Lesson, session.user).await?;
    }

    session
        .remote
        .fail(Op::Delete, Table::Completions, RemoteError::Transport("down".into()), 1);
    assert!(session.engine.reset_course_progress(session.user, tree.course).await.is_err());
    assert!(session.engine.course_progress(session.user, tree.course).complete);
    Ok(())
}
