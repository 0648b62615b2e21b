pub mod memory;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbConn, DbErr, EntityTrait, QueryFilter,
    SqlErr,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::{config::db_conn_capsule, orm::short_url, short_code::ShortCode};

pub use memory::InMemoryUrlStore;

/// A persisted short code and the URL it resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRecord {
    pub id: String,
    pub short_code: ShortCode,
    pub original_url: Url,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl UrlRecord {
    /// Whether the record can no longer be resolved at `now`; expiry is not inclusive of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// The fields the caller chooses; `id` and `created_at` are assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUrlRecord {
    pub short_code: ShortCode,
    pub original_url: Url,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum SaveUrlError {
    #[error("short code {0} is already taken")]
    CodeTaken(ShortCode),
    #[error("internal/database error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub fn url_store_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlStore> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(SeaOrmUrlStore::new(db))
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Whether any record, expired or not, currently holds `code`.
    async fn exists_by_code(&self, code: &ShortCode) -> anyhow::Result<bool>;

    /// Inserts `record` unless its short code is already held by another record.
    async fn save(&self, record: NewUrlRecord) -> Result<UrlRecord, SaveUrlError>;

    /// Returns the record for `code` without regard to its expiration.
    async fn find_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlRecord>>;

    /// Physically removes every record expired at `now`, returning how many were removed.
    async fn delete_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

pub struct SeaOrmUrlStore {
    db: DbConn,
}

impl SeaOrmUrlStore {
    #[must_use]
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    async fn find_model(&self, code: &ShortCode) -> Result<Option<short_url::Model>, DbErr> {
        short_url::Entity::find()
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .one(&self.db)
            .await
    }
}

#[async_trait]
impl UrlStore for SeaOrmUrlStore {
    #[instrument(skip(self))]
    async fn exists_by_code(&self, code: &ShortCode) -> anyhow::Result<bool> {
        Ok(self.find_model(code).await?.is_some())
    }

    #[instrument(skip(self))]
    async fn save(&self, record: NewUrlRecord) -> Result<UrlRecord, SaveUrlError> {
        let to_insert = short_url::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            short_code: Set(record.short_code.as_str().to_owned()),
            original_url: Set(record.original_url.into()),
            expires_at: Set(record.expires_at),
            created_at: Set(OffsetDateTime::now_utc()),
        };

        match to_insert.insert(&self.db).await {
            Ok(model) => Ok(UrlRecord::try_from(model)
                .context("Failed to convert inserted row into UrlRecord")?),
            Err(err) => Err(save_error(err.sql_err(), err, record.short_code)),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlRecord>> {
        self.find_model(code)
            .await?
            .map(UrlRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn delete_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let result = short_url::Entity::delete_many()
            .filter(short_url::Column::ExpiresAt.lte(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

/// Maps a failed insert onto [`SaveUrlError`], given the backend's classification of `err`.
fn save_error(sql_err: Option<SqlErr>, err: DbErr, short_code: ShortCode) -> SaveUrlError {
    match sql_err {
        Some(SqlErr::UniqueConstraintViolation(_)) => SaveUrlError::CodeTaken(short_code),
        _ => SaveUrlError::Internal(err.into()),
    }
}

impl TryFrom<short_url::Model> for UrlRecord {
    type Error = anyhow::Error;

    fn try_from(
        short_url::Model {
            id,
            short_code,
            original_url,
            expires_at,
            created_at,
        }: short_url::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            id,
            short_code: ShortCode::new(short_code).context("Stored short code is malformed")?,
            original_url: Url::parse(&original_url).context("Stored URL is malformed")?,
            expires_at,
            created_at,
        })
    }
}
