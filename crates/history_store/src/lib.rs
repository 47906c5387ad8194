mod error;
mod paths;
mod schema;
mod store;

pub use error::HistoryStoreError;
pub use paths::{default_history_path, history_root, HISTORY_FILE_NAME};
pub use schema::{now_millis, HistoryDocument, HistoryRecord};
pub use store::{HistoryStore, InMemoryHistoryStore, JsonFileHistoryStore};
