use std::sync::Arc;

use curriculum_engine::EngineConfig;
use curriculum_storage::SqliteRemote;

use crate::session::{TestResult, TestSession};

/// Several clients sharing one remote.
pub struct TestNetwork {
    remote: Arc<SqliteRemote>,
    sessions: Vec<TestSession>,
}

impl TestNetwork {
    pub fn new() -> TestResult<Self> {
        Ok(Self {
            remote: Arc::new(SqliteRemote::open_in_memory()?),
            sessions: Vec::new(),
        })
    }

    /// Share a remote that already exists, e.g. one backed by a file.
    pub fn on(remote: Arc<SqliteRemote>) -> Self {
        Self {
            remote,
            sessions: Vec::new(),
        }
    }

    pub async fn add_session(&mut self) -> TestResult<usize> {
        self.add_session_with(EngineConfig::default()).await
    }

    pub async fn add_session_with(&mut self, config: EngineConfig) -> TestResult<usize> {
        let session = TestSession::connect(self.remote.clone(), config).await?;
        let index = self.sessions.len();
        self.sessions.push(session);
        Ok(index)
    }

    pub fn session(&self, index: usize) -> &TestSession {
        &self.sessions[index]
    }

    pub fn remote(&self) -> &Arc<SqliteRemote> {
        &self.remote
    }
}
