use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use curriculum_core::*;
use curriculum_engine::{
    AccountError, AccountService, Curriculum, CurriculumEvent, EngineConfig, EngineError, NotificationSink,
};
use curriculum_storage::{Filter, RemoteRow, RemoteStore, SqliteRemote, Table};

use crate::remote::FaultyRemote;

pub type TestResult<T = ()> = Result<T, Box<dyn Error>>;

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}

/// Captures every event the engine emits.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CurriculumEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<CurriculumEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(CurriculumEvent::kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&self, event: &CurriculumEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
    }
}

/// Account service that records awards and can be told to fail.
#[derive(Default)]
pub struct RecordingAccounts {
    awards: Mutex<Vec<(UserId, Reward)>>,
    failing: AtomicBool,
}

impl RecordingAccounts {
    pub fn awards(&self) -> Vec<(UserId, Reward)> {
        self.awards.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_xp(&self, user_id: UserId) -> i64 {
        self.awards().iter().filter(|(u, _)| *u == user_id).map(|(_, r)| r.xp).sum()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountService for RecordingAccounts {
    async fn award_points(&self, user_id: UserId, reward: Reward) -> Result<(), AccountError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccountError("accounts offline".into()));
        }
        self.awards.lock().unwrap_or_else(|e| e.into_inner()).push((user_id, reward));
        Ok(())
    }
}

/// One signed-in client wired to a (shared) SQLite remote.
pub struct TestSession {
    pub engine: Arc<Curriculum>,
    pub remote: Arc<FaultyRemote>,
    pub sink: Arc<RecordingSink>,
    pub accounts: Arc<RecordingAccounts>,
    pub user: UserId,
}

impl TestSession {
    /// Fresh in-memory remote, default config, session started.
    pub async fn start() -> TestResult<Self> {
        Self::start_with(EngineConfig::default()).await
    }

    pub async fn start_with(config: EngineConfig) -> TestResult<Self> {
        let sqlite = Arc::new(SqliteRemote::open_in_memory()?);
        Self::connect(sqlite, config).await
    }

    /// Join an existing remote as a new user.
    pub async fn connect(sqlite: Arc<SqliteRemote>, config: EngineConfig) -> TestResult<Self> {
        init_tracing();
        let remote = Arc::new(FaultyRemote::new(sqlite));
        let sink = Arc::new(RecordingSink::default());
        let accounts = Arc::new(RecordingAccounts::default());
        let engine = Curriculum::new(remote.clone(), remote.clone(), accounts.clone())
            .with_config(config)
            .with_notifier(sink.clone());
        let user = UserId::new();
        engine.start_session(user).await?;
        Ok(Self {
            engine: Arc::new(engine),
            remote,
            sink,
            accounts,
            user,
        })
    }

    pub fn sqlite(&self) -> &Arc<SqliteRemote> {
        self.remote.inner()
    }

    /// Rows straight from the remote, bypassing fault injection.
    pub async fn remote_rows(&self, table: Table, filter: &Filter) -> TestResult<Vec<RemoteRow>> {
        Ok(self.sqlite().select(table, filter).await?)
    }

    pub async fn remote_row(&self, table: Table, id: impl std::fmt::Display) -> TestResult<Option<RemoteRow>> {
        Ok(self.remote_rows(table, &Filter::id(id)).await?.into_iter().next())
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub async fn seed_course(&self, title: &str) -> Result<CourseId, EngineError> {
        self.engine.create_course(Course::new(title)).await
    }

    pub async fn seed_stage(&self, course_id: CourseId, title: &str) -> Result<StageId, EngineError> {
        self.engine.create_stage(Stage::new(course_id, title)).await
    }

    pub async fn seed_module(&self, stage_id: StageId, title: &str) -> Result<ModuleId, EngineError> {
        self.engine.create_module(Module::new(stage_id, title)).await
    }

    pub async fn seed_lesson(
        &self,
        course_id: CourseId,
        module_id: Option<ModuleId>,
        title: &str,
    ) -> Result<ContentId, EngineError> {
        self.engine.create_leaf(LeafContent::lesson(course_id, module_id, title)).await
    }

    pub async fn seed_quiz(
        &self,
        course_id: CourseId,
        module_id: Option<ModuleId>,
        title: &str,
    ) -> Result<ContentId, EngineError> {
        let question = Question {
            id: "q1".into(),
            prompt: format!("{title}?"),
            options: vec![
                QuestionOption { id: "a".into(), text: "yes".into() },
                QuestionOption { id: "b".into(), text: "no".into() },
            ],
            correct_option_id: "a".into(),
        };
        self.engine
            .create_leaf(LeafContent::quiz(course_id, module_id, title, vec![question]))
            .await
    }

    /// Course → one stage → one module with `leaves` lessons.
    pub async fn seed_tree(&self, leaves: usize) -> Result<SeededTree, EngineError> {
        let course = self.seed_course("Course").await?;
        let stage = self.seed_stage(course, "Stage").await?;
        let module = self.seed_module(stage, "Module").await?;
        let mut lessons = Vec::with_capacity(leaves);
        for i in 0..leaves {
            lessons.push(self.seed_lesson(course, Some(module), &format!("Lesson {i}")).await?);
        }
        Ok(SeededTree {
            course,
            stage,
            module,
            lessons,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SeededTree {
    pub course: CourseId,
    pub stage: StageId,
    pub module: ModuleId,
    pub lessons: Vec<ContentId>,
}
