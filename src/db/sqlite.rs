use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use parking_lot::Mutex;

use crate::db::schema_sqlite::sound_mappings;

use super::{
    DatabaseError,
    models::{SoundMapping, mapping_key},
};

const BUSY_TIMEOUT_MS: u32 = 5000;

// Helper function to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Helper function to parse ISO string to DateTime
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sound_mappings)]
struct DbSoundMapping {
    #[allow(dead_code)]
    mapping_key: String,
    guild_id: String,
    trigger_token: String,
    source_url: String,
    clip_duration_seconds: Option<f64>,
    created_at: String,
    updated_at: String,
}

impl DbSoundMapping {
    fn to_sound_mapping(&self) -> Result<SoundMapping, DatabaseError> {
        Ok(SoundMapping {
            guild_id: self.guild_id.clone(),
            trigger: self.trigger_token.clone(),
            source_url: self.source_url.clone(),
            clip_duration_seconds: self.clip_duration_seconds,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

pub(crate) fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    conn.batch_execute(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

pub struct SqliteMappingStore {
    db_path: Arc<String>,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteMappingStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self {
            db_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl super::MappingStore for SqliteMappingStore {
    async fn upsert_mapping(&self, mapping: &SoundMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        let db_path = self.db_path.clone();
        let write_lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = write_lock.lock();
            let mut conn = establish_connection(&db_path)?;
            diesel::sql_query(
                "INSERT INTO sound_mappings (mapping_key, guild_id, trigger_token, source_url, clip_duration_seconds, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(mapping_key) DO UPDATE SET \
                 source_url = excluded.source_url, \
                 clip_duration_seconds = excluded.clip_duration_seconds, \
                 updated_at = excluded.updated_at",
            )
            .bind::<diesel::sql_types::Text, _>(mapping.key())
            .bind::<diesel::sql_types::Text, _>(&mapping.guild_id)
            .bind::<diesel::sql_types::Text, _>(&mapping.trigger)
            .bind::<diesel::sql_types::Text, _>(&mapping.source_url)
            .bind::<diesel::sql_types::Nullable<diesel::sql_types::Double>, _>(
                mapping.clip_duration_seconds,
            )
            .bind::<diesel::sql_types::Text, _>(datetime_to_string(&mapping.created_at))
            .bind::<diesel::sql_types::Text, _>(datetime_to_string(&mapping.updated_at))
            .execute(&mut conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_mapping(
        &self,
        guild_id_param: &str,
        trigger_param: &str,
    ) -> Result<Option<SoundMapping>, DatabaseError> {
        let key = mapping_key(guild_id_param, trigger_param);
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::sound_mappings::dsl;
            dsl::sound_mappings
                .filter(dsl::mapping_key.eq(key))
                .select(DbSoundMapping::as_select())
                .first::<DbSoundMapping>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_sound_mapping())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn remove_mapping(
        &self,
        guild_id_param: &str,
        trigger_param: &str,
    ) -> Result<(), DatabaseError> {
        let key = mapping_key(guild_id_param, trigger_param);
        let db_path = self.db_path.clone();
        let write_lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = write_lock.lock();
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::sound_mappings::dsl;
            diesel::delete(dsl::sound_mappings.filter(dsl::mapping_key.eq(key)))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_mappings(&self, guild_id_param: &str) -> Result<Vec<SoundMapping>, DatabaseError> {
        let guild_id_param = guild_id_param.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::sound_mappings::dsl;
            let results = dsl::sound_mappings
                .filter(dsl::guild_id.eq(guild_id_param))
                .order(dsl::trigger_token.asc())
                .select(DbSoundMapping::as_select())
                .load::<DbSoundMapping>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            results.iter().map(|m| m.to_sound_mapping()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
