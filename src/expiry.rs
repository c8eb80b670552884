//! Secret expiry policy
//!
//! Tenant secrets are rotated when they end within [`TENANT_SECRET_ROTATION_WINDOW`];
//! the engine's own service credentials use the wider
//! [`SERVICE_CREDENTIAL_RENEWAL_WINDOW`] so they are renewed well before
//! the gateway could lose access.

use chrono::{DateTime, Duration, Months, Utc};

/// Look-ahead window for tenant application secrets
pub const TENANT_SECRET_ROTATION_WINDOW: Duration = Duration::days(7);

/// Look-ahead window for the engine's own service credentials
pub const SERVICE_CREDENTIAL_RENEWAL_WINDOW: Duration = Duration::days(30);

/// Nominal lifetime reported for connectors whose secret never expires
pub const NOMINAL_STATIC_VALIDITY_YEARS: u32 = 10;

/// True when a secret ending at `end` must be rotated at `now`.
///
/// The window boundary is inclusive.
pub fn needs_rotation(end: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    end <= now + window
}

/// End date of a secret issued at `now` for `months` calendar months.
pub fn secret_end_date(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// True when a secret issued for `months` calendar months ends outside
/// `window`, counting every month as the shortest one.
pub fn validity_outlives(months: u32, window: Duration) -> bool {
    Duration::days(28 * i64::from(months)) > window
}

/// Expiry reported by providers without a rotating secret.
pub fn nominal_static_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    secret_end_date(now, NOMINAL_STATIC_VALIDITY_YEARS * 12)
}
