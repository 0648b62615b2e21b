//! Expiration policy for newly issued short codes.
//!
//! A requested calendar date expires at [`EXPIRATION_TIME_OF_DAY`] UTC on that date.
//! Without a requested date the code lives for [`DEFAULT_LIFETIME`].

use time::{Date, Duration, OffsetDateTime, Time, macros::time};

pub const DEFAULT_LIFETIME: Duration = Duration::hours(24);

pub const EXPIRATION_TIME_OF_DAY: Time = time!(23:00);

/// Computes the absolute expiration timestamp for a code created at `now`.
///
/// `requested_date` is expected to be strictly after today; it is not re-validated here.
#[must_use]
pub fn compute_expires_at(requested_date: Option<Date>, now: OffsetDateTime) -> OffsetDateTime {
    requested_date.map_or_else(
        || now + DEFAULT_LIFETIME,
        |date| date.with_time(EXPIRATION_TIME_OF_DAY).assume_utc(),
    )
}
