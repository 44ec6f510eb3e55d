#![forbid(unsafe_code)]

pub mod identity;
pub mod local_cache;
pub mod repository;
pub mod sqlite;

pub use identity::{IdentityError, IdentityProvider, InMemoryIdentity, Profile};
pub use local_cache::{FileSlot, LocalCache, LocalCacheError, LocalSlot, MemorySlot};
pub use repository::{
    CatalogRows, CategoryRow, ChangeEvent, ChangeSubscription, InMemoryRemote, ProblemRow,
    RemoteError, RemoteStats, RemoteStore,
};
pub use sqlite::{SqliteInitError, SqliteRemote};
