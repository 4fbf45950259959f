use async_trait::async_trait;

use super::DatabaseError;
use super::models::SoundMapping;

/// Durable `(guild_id, trigger) -> clip` storage. Every mutation is written
/// through; nothing is cached.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Inserts the mapping or replaces the one with the same key.
    async fn upsert_mapping(&self, mapping: &SoundMapping) -> Result<(), DatabaseError>;
    async fn get_mapping(
        &self,
        guild_id: &str,
        trigger: &str,
    ) -> Result<Option<SoundMapping>, DatabaseError>;
    /// Removing a key that does not exist is not an error.
    async fn remove_mapping(&self, guild_id: &str, trigger: &str) -> Result<(), DatabaseError>;
    async fn list_mappings(&self, guild_id: &str) -> Result<Vec<SoundMapping>, DatabaseError>;
}
