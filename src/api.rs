use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing,
};
use rearch::Container;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{
    Date, OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description,
};
use tracing::{error, info, instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    config::base_url_capsule,
    redirect_resolver::{RedirectResolver, ResolveError, redirect_resolver_capsule},
    short_code::ShortCode,
    shortening_service::{ShortenedUrl, ShorteningService, shortening_service_capsule},
};

#[derive(Debug, Deserialize)]
pub struct ShortenUrlPayload {
    pub original_url: String,
    /// Calendar date in `YYYY-MM-DD` format
    #[serde(default)]
    pub expiration_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShortenUrlResponse {
    pub short_code: String,
    pub short_url: String,
    /// Timestamp in RFC 3339 format
    pub expires_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("URL scheme must be http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("URL must have a host")]
    MissingHost,
    #[error("invalid expiration date (expected YYYY-MM-DD): {0}")]
    DateParse(#[from] time::error::Parse),
    #[error("expiration date {0} must be a future date")]
    DateNotInFuture(Date),
}

/// # Errors
/// Will return [`Err`] unless `raw` is an absolute `http`/`https` URL with a host.
pub fn validate_original_url(raw: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingHost);
    }
    Ok(url)
}

/// # Errors
/// Will return [`Err`] if `raw` is present but not a `YYYY-MM-DD` date strictly after `today`.
pub fn validate_expiration_date(
    raw: Option<&str>,
    today: Date,
) -> Result<Option<Date>, ValidationError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let date = Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))?;
    if date <= today {
        return Err(ValidationError::DateNotInFuture(date));
    }
    Ok(Some(date))
}

/// First entry of a possibly comma-separated forwarding header.
fn first_header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Builds the public URL for `short_code`, preferring the configured `base_url`.
///
/// Without one, the origin comes from `X-Forwarded-Proto`/`X-Forwarded-Host` as set by a
/// reverse proxy, falling back to `http` and the `Host` header.
#[must_use]
pub fn build_short_url(
    base_url: Option<&Url>,
    headers: &HeaderMap,
    short_code: &ShortCode,
) -> String {
    if let Some(base_url) = base_url {
        return format!("{}/{short_code}", base_url.as_str().trim_end_matches('/'));
    }

    let scheme = first_header_value(headers, "x-forwarded-proto").unwrap_or("http");
    let host = first_header_value(headers, "x-forwarded-host")
        .or_else(|| first_header_value(headers, header::HOST.as_str()));
    match host {
        Some(host) => format!("{scheme}://{host}/{short_code}"),
        None => format!("/{short_code}"),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMetadata {
    pub name: String,
    pub version: String,
    pub status: String,
    /// Timestamp in RFC 3339 format
    pub timestamp: String,
    pub endpoints: BTreeMap<String, String>,
    pub documentation: String,
}

impl ApiMetadata {
    /// # Errors
    /// Will return [`Err`] if `now` cannot be rendered as RFC 3339.
    pub fn at(now: OffsetDateTime) -> Result<Self, time::error::Format> {
        let endpoints = [
            ("health", "GET /health"),
            ("shorten_url", "POST /shorten-url"),
            ("redirect", "GET /{short_code}"),
        ]
        .into_iter()
        .map(|(name, route)| (name.to_owned(), route.to_owned()))
        .collect();
        Ok(Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            status: "UP".to_owned(),
            timestamp: now.format(&Rfc3339)?,
            endpoints,
            documentation: "README.md".to_owned(),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub shortening_service: Arc<dyn ShorteningService>,
    pub redirect_resolver: Arc<dyn RedirectResolver>,
    pub base_url: Option<Url>,
}

impl AppState {
    #[must_use]
    pub fn from_container(container: &Container) -> Self {
        let (shortening_service, redirect_resolver, base_url) = container.read((
            shortening_service_capsule,
            redirect_resolver_capsule,
            base_url_capsule,
        ));
        Self {
            shortening_service,
            redirect_resolver,
            base_url,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", routing::get(metadata))
        .route("/health", routing::get(health))
        .route("/shorten-url", routing::post(shorten_url))
        .route("/{short_code}", routing::get(redirect))
        .with_state(state)
}

fn error_response(status: StatusCode, error: String, err_uuid: Uuid) -> Response {
    (
        status,
        Json(Error {
            error,
            error_id: err_uuid.to_string(),
        }),
    )
        .into_response()
}

async fn metadata() -> Response {
    match ApiMetadata::at(OffsetDateTime::now_utc()) {
        Ok(metadata) => Json(metadata).into_response(),
        Err(format_error) => {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?format_error, "Failed to format metadata timestamp");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
                err_uuid,
            )
        }
    }
}

async fn health() -> &'static str {
    info!("Health check accessed");
    "OK"
}

#[instrument(skip(state, headers))]
async fn shorten_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(ShortenUrlPayload {
        original_url,
        expiration_date,
    }): Json<ShortenUrlPayload>,
) -> Response {
    let today = OffsetDateTime::now_utc().date();
    let validated = validate_original_url(&original_url).and_then(|url| {
        validate_expiration_date(expiration_date.as_deref(), today).map(|date| (url, date))
    });
    let (original_url, expiration_date) = match validated {
        Ok(validated) => validated,
        Err(error) => {
            let err_uuid = Uuid::new_v4();
            info!(?err_uuid, ?error, "User submitted a bad request");
            return error_response(StatusCode::BAD_REQUEST, error.to_string(), err_uuid);
        }
    };

    let ShortenedUrl {
        short_code,
        expires_at,
    } = match state
        .shortening_service
        .shorten(&original_url, expiration_date)
        .await
    {
        Ok(shortened) => shortened,
        Err(error) => {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?error, "Encountered an error during a request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
                err_uuid,
            );
        }
    };

    let expires_at = match expires_at.format(&Rfc3339) {
        Ok(expires_at) => expires_at,
        Err(format_error) => {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?format_error, "Failed to format expiration timestamp");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
                err_uuid,
            );
        }
    };

    let response = ShortenUrlResponse {
        short_url: build_short_url(state.base_url.as_ref(), &headers, &short_code),
        short_code: short_code.into_inner(),
        expires_at,
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

#[instrument(skip(state))]
async fn redirect(State(state): State<AppState>, Path(short_code): Path<String>) -> Response {
    match state.redirect_resolver.resolve(&short_code).await {
        Ok(url) => {
            info!(%url, "Redirecting");
            (
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, url.to_string())],
            )
                .into_response()
        }
        Err(error @ ResolveError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, error.to_string(), Uuid::new_v4())
        }
        Err(error @ ResolveError::Persistence(_)) => {
            let err_uuid = Uuid::new_v4();
            error!(?err_uuid, ?error, "Encountered an error during a request");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_owned(),
                err_uuid,
            )
        }
    }
}
