//! Error types for the commerce domain.

use std::collections::HashMap;
use std::fmt;

/// Machine-readable error codes, organized by category.
///
/// Every rejection path writes one of these onto the payment event row
/// so that replays are auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation errors (no mutation, 4xx)
    PayloadInvalid,
    ProviderNotSupported,
    ProviderDisabled,
    ProviderMismatch,
    InvalidSignature,
    EventTypeNotAllowed,
    AmountMismatch,
    CurrencyMismatch,
    SkuRequired,
    SkuNotFound,
    SkuKindInvalid,
    BenefitCodeNotFound,
    BenefitRequired,
    AttemptRequired,
    OrderRequired,
    QuantityInvalid,
    PriceInvalid,
    AmountTooLarge,
    DeltaInvalid,
    TopupDeltaInvalid,
    IdempotencyRequired,

    // State-conflict errors (transaction rolled back, retryable after re-read)
    OrderStatusInvalid,
    OrderStatusChanged,

    // Resource errors
    OrderNotFound,
    GrantNotFound,

    // Balance errors
    InsufficientCredits,

    // Concurrency errors (transient, retry with backoff)
    WebhookBusy,
    WalletLockFailed,

    // Post-commit errors (financial effect already committed)
    PostCommitFailed,
    SeedSnapshotFailed,
    WalletTopupFailed,
    TopupContextInvalid,
    PostCommitKindInvalid,

    // Infrastructure errors
    EventInitFailed,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// The HTTP-ish status this code surfaces as on the webhook result.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::PayloadInvalid
            | ErrorCode::ProviderNotSupported
            | ErrorCode::ProviderMismatch
            | ErrorCode::InvalidSignature
            | ErrorCode::EventTypeNotAllowed
            | ErrorCode::AmountMismatch
            | ErrorCode::CurrencyMismatch
            | ErrorCode::SkuRequired
            | ErrorCode::SkuKindInvalid
            | ErrorCode::BenefitCodeNotFound
            | ErrorCode::BenefitRequired
            | ErrorCode::AttemptRequired
            | ErrorCode::OrderRequired
            | ErrorCode::QuantityInvalid
            | ErrorCode::PriceInvalid
            | ErrorCode::AmountTooLarge
            | ErrorCode::DeltaInvalid
            | ErrorCode::TopupDeltaInvalid
            | ErrorCode::IdempotencyRequired => 400,

            ErrorCode::InsufficientCredits => 402,

            ErrorCode::ProviderDisabled
            | ErrorCode::SkuNotFound
            | ErrorCode::OrderNotFound
            | ErrorCode::GrantNotFound => 404,

            ErrorCode::OrderStatusInvalid | ErrorCode::OrderStatusChanged => 409,

            ErrorCode::WebhookBusy
            | ErrorCode::WalletLockFailed
            | ErrorCode::PostCommitFailed
            | ErrorCode::SeedSnapshotFailed
            | ErrorCode::WalletTopupFailed
            | ErrorCode::TopupContextInvalid
            | ErrorCode::PostCommitKindInvalid
            | ErrorCode::EventInitFailed
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => 500,
        }
    }

    /// The wire name of this code, as persisted on the event row.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PayloadInvalid => "PAYLOAD_INVALID",
            ErrorCode::ProviderNotSupported => "PROVIDER_NOT_SUPPORTED",
            ErrorCode::ProviderDisabled => "PROVIDER_DISABLED",
            ErrorCode::ProviderMismatch => "PROVIDER_MISMATCH",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::EventTypeNotAllowed => "EVENT_TYPE_NOT_ALLOWED",
            ErrorCode::AmountMismatch => "AMOUNT_MISMATCH",
            ErrorCode::CurrencyMismatch => "CURRENCY_MISMATCH",
            ErrorCode::SkuRequired => "SKU_REQUIRED",
            ErrorCode::SkuNotFound => "SKU_NOT_FOUND",
            ErrorCode::SkuKindInvalid => "SKU_KIND_INVALID",
            ErrorCode::BenefitCodeNotFound => "BENEFIT_CODE_NOT_FOUND",
            ErrorCode::BenefitRequired => "BENEFIT_REQUIRED",
            ErrorCode::AttemptRequired => "ATTEMPT_REQUIRED",
            ErrorCode::OrderRequired => "ORDER_REQUIRED",
            ErrorCode::QuantityInvalid => "QUANTITY_INVALID",
            ErrorCode::PriceInvalid => "PRICE_INVALID",
            ErrorCode::AmountTooLarge => "AMOUNT_TOO_LARGE",
            ErrorCode::DeltaInvalid => "DELTA_INVALID",
            ErrorCode::TopupDeltaInvalid => "TOPUP_DELTA_INVALID",
            ErrorCode::IdempotencyRequired => "IDEMPOTENCY_REQUIRED",
            ErrorCode::OrderStatusInvalid => "ORDER_STATUS_INVALID",
            ErrorCode::OrderStatusChanged => "ORDER_STATUS_CHANGED",
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::GrantNotFound => "GRANT_NOT_FOUND",
            ErrorCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorCode::WebhookBusy => "WEBHOOK_BUSY",
            ErrorCode::WalletLockFailed => "WALLET_LOCK_FAILED",
            ErrorCode::PostCommitFailed => "POST_COMMIT_FAILED",
            ErrorCode::SeedSnapshotFailed => "SEED_SNAPSHOT_FAILED",
            ErrorCode::WalletTopupFailed => "WALLET_TOPUP_FAILED",
            ErrorCode::TopupContextInvalid => "TOPUP_CONTEXT_INVALID",
            ErrorCode::PostCommitKindInvalid => "POST_COMMIT_KIND_INVALID",
            ErrorCode::EventInitFailed => "EVENT_INIT_FAILED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Standard commerce error with code, message, and optional details.
#[derive(Debug, Clone)]
pub struct CommerceError {
    pub code: ErrorCode,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl CommerceError {
    /// Creates a new commerce error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Adds a detail to the error.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Creates a database error preserving the underlying message.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// The HTTP-ish status this error surfaces as.
    pub fn status(&self) -> u16 {
        self.code.status()
    }
}

impl fmt::Display for CommerceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommerceError {}

impl From<sqlx::Error> for CommerceError {
    fn from(err: sqlx::Error) -> Self {
        CommerceError::database(err.to_string())
    }
}
