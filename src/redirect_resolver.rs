use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    short_code::ShortCode,
    url_store::{UrlStore, url_store_capsule},
};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The code was never issued or has expired; callers cannot tell which.
    #[error("short code {0} does not exist or has expired")]
    NotFound(String),
    #[error("internal/database error: {0}")]
    Persistence(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

pub fn redirect_resolver_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn RedirectResolver> {
    let url_store = Arc::clone(get.as_ref(url_store_capsule));
    Arc::new(Resolver::new(url_store))
}

#[async_trait]
pub trait RedirectResolver: Send + Sync {
    /// Returns the URL behind `short_code` if it exists and has not expired.
    async fn resolve(&self, short_code: &str) -> Result<Url, ResolveError>;
}

pub struct Resolver {
    url_store: Arc<dyn UrlStore>,
}

impl Resolver {
    #[must_use]
    pub fn new(url_store: Arc<dyn UrlStore>) -> Self {
        Self { url_store }
    }

    /// Resolves `short_code` as of `now`.
    ///
    /// # Errors
    /// Will return [`ResolveError::NotFound`] when `short_code` is malformed, unknown, or
    /// expired at `now`, and [`ResolveError::Persistence`] when the store lookup fails.
    pub async fn resolve_at(
        &self,
        short_code: &str,
        now: OffsetDateTime,
    ) -> Result<Url, ResolveError> {
        let not_found = || ResolveError::NotFound(short_code.to_owned());

        let Ok(code) = ShortCode::new(short_code.to_owned()) else {
            debug!(short_code, "Requested short code is malformed");
            return Err(not_found());
        };

        match self.url_store.find_by_code(&code).await {
            Ok(Some(record)) if record.is_expired_at(now) => {
                debug!(%code, expires_at = %record.expires_at, "Requested short code has expired");
                Err(not_found())
            }
            Ok(Some(record)) => Ok(record.original_url),
            Ok(None) => Err(not_found()),
            Err(err) => Err(ResolveError::Persistence(err)),
        }
    }
}

#[async_trait]
impl RedirectResolver for Resolver {
    #[instrument(skip(self))]
    async fn resolve(&self, short_code: &str) -> Result<Url, ResolveError> {
        self.resolve_at(short_code, OffsetDateTime::now_utc()).await
    }
}
