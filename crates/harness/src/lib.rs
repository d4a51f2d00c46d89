pub mod network;
pub mod remote;
pub mod session;

pub use network::TestNetwork;
pub use remote::{FaultyRemote, Gate, Op};
pub use session::{RecordingAccounts, RecordingSink, SeededTree, TestResult, TestSession, init_tracing};
