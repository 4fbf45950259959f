use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use crate::db::manager::Pool;
use crate::db::schema::sound_mappings;

use super::{
    DatabaseError,
    models::{SoundMapping, mapping_key},
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sound_mappings)]
struct DbSoundMapping {
    #[allow(dead_code)]
    mapping_key: String,
    guild_id: String,
    trigger_token: String,
    source_url: String,
    clip_duration_seconds: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbSoundMapping> for SoundMapping {
    fn from(value: DbSoundMapping) -> Self {
        Self {
            guild_id: value.guild_id,
            trigger: value.trigger_token,
            source_url: value.source_url,
            clip_duration_seconds: value.clip_duration_seconds,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = sound_mappings)]
struct NewSoundMapping<'a> {
    mapping_key: String,
    guild_id: &'a str,
    trigger_token: &'a str,
    source_url: &'a str,
    clip_duration_seconds: Option<f64>,
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresMappingStore {
    pool: Pool,
}

impl PostgresMappingStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MappingStore for PostgresMappingStore {
    async fn upsert_mapping(&self, mapping: &SoundMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sound_mappings::dsl;

            let new_mapping = NewSoundMapping {
                mapping_key: mapping.key(),
                guild_id: &mapping.guild_id,
                trigger_token: &mapping.trigger,
                source_url: &mapping.source_url,
                clip_duration_seconds: mapping.clip_duration_seconds,
                created_at: &mapping.created_at,
                updated_at: &mapping.updated_at,
            };

            diesel::insert_into(dsl::sound_mappings)
                .values(&new_mapping)
                .on_conflict(dsl::mapping_key)
                .do_update()
                .set((
                    dsl::source_url.eq(excluded(dsl::source_url)),
                    dsl::clip_duration_seconds.eq(excluded(dsl::clip_duration_seconds)),
                    dsl::updated_at.eq(excluded(dsl::updated_at)),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn get_mapping(
        &self,
        guild_id: &str,
        trigger: &str,
    ) -> Result<Option<SoundMapping>, DatabaseError> {
        let key = mapping_key(guild_id, trigger);
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sound_mappings::dsl;
            dsl::sound_mappings
                .filter(dsl::mapping_key.eq(key))
                .select(DbSoundMapping::as_select())
                .first::<DbSoundMapping>(conn)
                .optional()
                .map(|row| row.map(SoundMapping::from))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn remove_mapping(&self, guild_id: &str, trigger: &str) -> Result<(), DatabaseError> {
        let key = mapping_key(guild_id, trigger);
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sound_mappings::dsl;
            diesel::delete(dsl::sound_mappings.filter(dsl::mapping_key.eq(key)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn list_mappings(&self, guild_id: &str) -> Result<Vec<SoundMapping>, DatabaseError> {
        let guild_id = guild_id.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sound_mappings::dsl;
            dsl::sound_mappings
                .filter(dsl::guild_id.eq(guild_id))
                .order(dsl::trigger_token.asc())
                .select(DbSoundMapping::as_select())
                .load::<DbSoundMapping>(conn)
                .map(|rows| rows.into_iter().map(SoundMapping::from).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}
