use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::{
    expiration::compute_expires_at,
    short_code::{CodeGenerator, ShortCode, code_generator_capsule},
    url_store::{NewUrlRecord, SaveUrlError, UrlStore, url_store_capsule},
};

/// Upper bound on candidate codes tried per request, counting both existence-check
/// collisions and codes lost to a concurrent save.
pub const MAX_GENERATION_ATTEMPTS: usize = 10;

/// The result of a successful shorten: the issued code and when it stops resolving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortenedUrl {
    pub short_code: ShortCode,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("no unused short code found after {attempts} attempts")]
    GenerationExhausted { attempts: usize },
    #[error("internal/database error: {0}")]
    Persistence(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

pub fn shortening_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn ShorteningService> {
    let url_store = Arc::clone(get.as_ref(url_store_capsule));
    let code_generator = Arc::clone(get.as_ref(code_generator_capsule));
    Arc::new(Shortener::new(url_store, code_generator))
}

#[async_trait]
pub trait ShorteningService: Send + Sync {
    /// Issues a fresh short code for `original_url`.
    ///
    /// `requested_expiration` must already be validated as a date after today.
    async fn shorten(
        &self,
        original_url: &Url,
        requested_expiration: Option<Date>,
    ) -> Result<ShortenedUrl, ShortenError>;
}

pub struct Shortener {
    url_store: Arc<dyn UrlStore>,
    code_generator: Arc<dyn CodeGenerator>,
}

impl Shortener {
    #[must_use]
    pub fn new(url_store: Arc<dyn UrlStore>, code_generator: Arc<dyn CodeGenerator>) -> Self {
        Self {
            url_store,
            code_generator,
        }
    }
}

#[async_trait]
impl ShorteningService for Shortener {
    #[instrument(skip(self))]
    async fn shorten(
        &self,
        original_url: &Url,
        requested_expiration: Option<Date>,
    ) -> Result<ShortenedUrl, ShortenError> {
        let expires_at = compute_expires_at(requested_expiration, OffsetDateTime::now_utc());

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let candidate = self.code_generator.generate();

            if self
                .url_store
                .exists_by_code(&candidate)
                .await
                .map_err(ShortenError::Persistence)?
            {
                warn!(%candidate, attempt, "Generated short code that was already taken");
                continue;
            }

            let to_save = NewUrlRecord {
                short_code: candidate,
                original_url: original_url.clone(),
                expires_at,
            };

            match self.url_store.save(to_save).await {
                Ok(saved) => {
                    info!(
                        id = %saved.id,
                        short_code = %saved.short_code,
                        expires_at = %saved.expires_at,
                        "Saved URL"
                    );
                    return Ok(ShortenedUrl {
                        short_code: saved.short_code,
                        expires_at: saved.expires_at,
                    });
                }
                // NOTE: another request saved the same code after our existence check
                Err(SaveUrlError::CodeTaken(code)) => {
                    warn!(%code, attempt, "Short code was taken before it could be saved");
                }
                Err(SaveUrlError::Internal(err)) => {
                    error!(?err, "Failed to save URL");
                    return Err(ShortenError::Persistence(err));
                }
            }
        }

        error!(
            attempts = MAX_GENERATION_ATTEMPTS,
            "Exhausted short code generation attempts"
        );
        Err(ShortenError::GenerationExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockall::Sequence;
    use time::{Duration, macros::time};

    use super::*;
    use crate::{
        short_code::{MockCodeGenerator, RandomCodeGenerator, SHORT_CODE_LEN},
        url_store::{MockUrlStore, UrlRecord},
    };

    fn code(s: &str) -> ShortCode {
        ShortCode::new(s.to_owned()).unwrap()
    }

    fn saved(record: NewUrlRecord) -> UrlRecord {
        UrlRecord {
            id: "69026cdf278513d576c67059".to_owned(),
            short_code: record.short_code,
            original_url: record.original_url,
            expires_at: record.expires_at,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn generator_yielding(codes: &[&str]) -> MockCodeGenerator {
        let mut generator = MockCodeGenerator::new();
        let mut seq = Sequence::new();
        for c in codes {
            let c = code(c);
            generator
                .expect_generate()
                .once()
                .in_sequence(&mut seq)
                .return_once(move || c);
        }
        generator
    }

    fn example_url() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_shorten_without_expiration_defaults_to_one_day() {
        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .once()
            .returning(|_| Ok(false));
        mock_store
            .expect_save()
            .withf(|record| record.original_url.as_str() == "https://example.com/")
            .once()
            .returning(|record| Ok(saved(record)));

        let service = Shortener::new(Arc::new(mock_store), Arc::new(RandomCodeGenerator));
        let before = OffsetDateTime::now_utc();
        let result = service.shorten(&example_url(), None).await.unwrap();
        let after = OffsetDateTime::now_utc();

        assert_eq!(result.short_code.as_str().len(), SHORT_CODE_LEN);
        // NOTE: slight tolerance is allowed in case of slow tests
        assert!(result.expires_at >= before + Duration::hours(24) - Duration::seconds(1));
        assert!(result.expires_at <= after + Duration::hours(24) + Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_shorten_with_requested_date_expires_at_fixed_hour() {
        let requested = OffsetDateTime::now_utc().date() + Duration::days(5);

        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .once()
            .returning(|_| Ok(false));
        mock_store
            .expect_save()
            .once()
            .returning(|record| Ok(saved(record)));

        let service = Shortener::new(Arc::new(mock_store), Arc::new(RandomCodeGenerator));
        let result = service
            .shorten(&example_url(), Some(requested))
            .await
            .unwrap();

        assert_eq!(result.expires_at.date(), requested);
        assert_eq!(result.expires_at.time(), time!(23:00));
        assert!(result.expires_at.offset().is_utc());
    }

    #[tokio::test]
    async fn test_shorten_retries_after_collision() {
        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .withf(|c| c.as_str() == "aaaaaaa")
            .once()
            .returning(|_| Ok(true));
        mock_store
            .expect_exists_by_code()
            .withf(|c| c.as_str() == "bbbbbbb")
            .once()
            .returning(|_| Ok(false));
        mock_store
            .expect_save()
            .withf(|record| record.short_code.as_str() == "bbbbbbb")
            .once()
            .returning(|record| Ok(saved(record)));

        let service = Shortener::new(
            Arc::new(mock_store),
            Arc::new(generator_yielding(&["aaaaaaa", "bbbbbbb"])),
        );
        let result = service.shorten(&example_url(), None).await.unwrap();
        assert_eq!(result.short_code, code("bbbbbbb"));
    }

    #[tokio::test]
    async fn test_shorten_retries_when_save_hits_duplicate_code() {
        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .times(2)
            .returning(|_| Ok(false));
        mock_store
            .expect_save()
            .withf(|record| record.short_code.as_str() == "racedup")
            .once()
            .returning(|record| Err(SaveUrlError::CodeTaken(record.short_code)));
        mock_store
            .expect_save()
            .withf(|record| record.short_code.as_str() == "fresh12")
            .once()
            .returning(|record| Ok(saved(record)));

        let service = Shortener::new(
            Arc::new(mock_store),
            Arc::new(generator_yielding(&["racedup", "fresh12"])),
        );
        let result = service.shorten(&example_url(), None).await.unwrap();
        assert_eq!(result.short_code, code("fresh12"));
    }

    #[tokio::test]
    async fn test_shorten_gives_up_after_max_attempts() {
        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .times(MAX_GENERATION_ATTEMPTS)
            .returning(|_| Ok(true));
        mock_store.expect_save().never();

        let mut generator = MockCodeGenerator::new();
        generator
            .expect_generate()
            .times(MAX_GENERATION_ATTEMPTS)
            .returning(|| code("taken12"));

        let service = Shortener::new(Arc::new(mock_store), Arc::new(generator));
        let err = service.shorten(&example_url(), None).await.unwrap_err();
        assert!(matches!(
            err,
            ShortenError::GenerationExhausted { attempts } if attempts == MAX_GENERATION_ATTEMPTS
        ));
    }

    #[tokio::test]
    async fn test_shorten_existence_check_error_propagates() {
        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .once()
            .returning(|_| Err(anyhow::anyhow!("test error")));
        mock_store.expect_save().never();

        let service = Shortener::new(Arc::new(mock_store), Arc::new(RandomCodeGenerator));
        let err = service.shorten(&example_url(), None).await.unwrap_err();
        assert!(matches!(err, ShortenError::Persistence(err) if err.to_string() == "test error"));
    }

    #[tokio::test]
    async fn test_shorten_save_error_is_not_retried() {
        let mut mock_store = MockUrlStore::new();
        mock_store
            .expect_exists_by_code()
            .once()
            .returning(|_| Ok(false));
        mock_store
            .expect_save()
            .once()
            .returning(|_| Err(SaveUrlError::Internal(anyhow::anyhow!("test failure"))));

        let service = Shortener::new(Arc::new(mock_store), Arc::new(RandomCodeGenerator));
        let err = service.shorten(&example_url(), None).await.unwrap_err();
        assert!(matches!(err, ShortenError::Persistence(err) if err.to_string() == "test failure"));
    }
}
