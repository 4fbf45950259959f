pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::SoundMapping;
pub use self::stores::MappingStore;

pub mod error;
pub mod manager;
pub mod models;
pub mod stores;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
