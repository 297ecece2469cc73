pub mod persist;
pub mod storage;
pub mod store;
pub mod types;

pub use persist::PersistConfig;
pub use storage::{DocumentStorage, JsonFileStorage, MemoryStorage, StoreError};
pub use store::SessionStore;
pub use types::{
    Message, MessageId, MessagePatch, PersistedDocument, Role, Session, SessionId, Timestamp,
    now_millis,
};
