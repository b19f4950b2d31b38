//! Credential data types shared by the cache and the issuers.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};

/// Default buffer subtracted from a credential's expiry before it is reused.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(30);

// =============================================================================
// Error Types
// =============================================================================

/// Why a credential could not be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceFailureReason {
    /// Connection, DNS, TLS or timeout failure before a response arrived
    Transport,
    /// The issuer answered with a non-200 status
    Status(u16),
    /// 200 response without the expected identifier field
    Malformed,
    /// The issuer could not be constructed from the supplied settings
    Configuration,
}

impl fmt::Display for IssuanceFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuanceFailureReason::Transport => write!(f, "transport failure"),
            IssuanceFailureReason::Status(code) => write!(f, "issuer returned HTTP {code}"),
            IssuanceFailureReason::Malformed => write!(f, "malformed issuer response"),
            IssuanceFailureReason::Configuration => write!(f, "invalid issuer configuration"),
        }
    }
}

/// Uniform failure returned by every [`TokenIssuer`](super::TokenIssuer).
///
/// Callers decide on retries; the reason is kept for diagnostics only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: {detail}")]
pub struct IssuanceError {
    pub reason: IssuanceFailureReason,
    pub detail: String,
}

impl IssuanceError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            reason: IssuanceFailureReason::Transport,
            detail: detail.into(),
        }
    }

    pub fn status(code: u16, body: impl Into<String>) -> Self {
        Self {
            reason: IssuanceFailureReason::Status(code),
            detail: body.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            reason: IssuanceFailureReason::Malformed,
            detail: detail.into(),
        }
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self {
            reason: IssuanceFailureReason::Configuration,
            detail: detail.into(),
        }
    }

    /// HTTP status reported by the issuer, if the failure carried one.
    pub fn http_status(&self) -> Option<u16> {
        match self.reason {
            IssuanceFailureReason::Status(code) => Some(code),
            _ => None,
        }
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Short-lived access credential for one realtime session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque token, e.g. `auth_tokens/abc123`
    pub token: String,
    /// Absolute expiry of the token
    pub expires_at: OffsetDateTime,
    /// Deadline for starting a new session with this token
    pub new_session_expires_at: Option<OffsetDateTime>,
    /// Use budget requested at issuance (0 = unlimited)
    pub uses: u32,
}

impl Credential {
    /// True iff `now < expires_at - safety_margin`.
    pub fn is_valid_at(&self, now: OffsetDateTime, safety_margin: Duration) -> bool {
        now < self.expires_at - safety_margin
    }

    /// Whole seconds left before the token itself expires.
    pub fn seconds_remaining(&self, now: OffsetDateTime) -> i64 {
        (self.expires_at - now).whole_seconds()
    }

    /// Token prefix safe to put in log lines.
    pub fn redacted(&self) -> String {
        let prefix: String = self.token.chars().take(16).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.redacted())
            .field("expires_at", &self.expires_at)
            .field("new_session_expires_at", &self.new_session_expires_at)
            .field("uses", &self.uses)
            .finish()
    }
}

/// Parameters of one issuance call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRequest {
    /// Lifetime of the token from the moment of issuance
    pub lifetime: Duration,
    /// Window within which a new session may still be started
    pub new_session_grace: Duration,
    /// Use budget (0 = unlimited)
    pub uses: u32,
}

impl TokenRequest {
    pub fn from_minutes(lifetime_minutes: u32, new_session_minutes: u32, uses: u32) -> Self {
        Self {
            lifetime: Duration::minutes(i64::from(lifetime_minutes)),
            new_session_grace: Duration::minutes(i64::from(new_session_minutes)),
            uses,
        }
    }
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self::from_minutes(5, 1, 1)
    }
}

/// Wire format of issuer timestamps: UTC, second precision, literal `Z`.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Format a timestamp as UTC with second precision and a literal `Z`.
pub fn format_timestamp(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(UtcOffset::UTC).format(TIMESTAMP_FORMAT)
}

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}
