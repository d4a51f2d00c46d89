pub mod error;
pub mod mapper;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::RemoteError;
pub use mapper::{ColumnKind, RemoteEntity, RemotePayload, columns};
pub use sqlite::SqliteRemote;
pub use traits::*;
