//! Domain types for event registration payments.
//!
//! Identifiers, money, the status enums shared with the database and the
//! provider, and the two entities this service reads and writes:
//! [`Registration`] (owned by the registration subsystem, only its payment
//! status is written here) and [`PaymentRecord`].

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Creates a new random `RegistrationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RegistrationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a payment record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random `PaymentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PaymentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public ticket identifier printed on tickets, e.g. `RWB-7KQ2M9XD`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketCode(String);

impl TicketCode {
    /// Prefix shared by every generated code.
    pub const PREFIX: &'static str = "RWB-";

    /// Characters used after the prefix. No `O`, `0`, `I` or `1`.
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    /// Number of random characters after the prefix.
    pub const RANDOM_LEN: usize = 8;

    /// Generate a fresh code.
    ///
    /// Uniqueness is enforced by the `registrations.ticket_code` constraint;
    /// creators retry on conflict.
    #[must_use]
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: String = (0..Self::RANDOM_LEN)
            .map(|_| char::from(Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())]))
            .collect();
        Self(format!("{}{suffix}", Self::PREFIX))
    }

    /// Wrap an existing code (loaded from storage).
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrow the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Merchant reference sent to the provider and echoed back in callbacks.
///
/// Always non-empty, ASCII alphanumeric and at most [`Reference::MAX_LEN`]
/// characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

impl Reference {
    /// Longest reference the provider accepts.
    pub const MAX_LEN: usize = 32;

    /// Derive the reference for a registration from its ticket code.
    ///
    /// Separators and any other non-alphanumeric characters are dropped, so
    /// `RWB-7KQ2M9XD` becomes `RWB7KQ2M9XD`. The result is stable across
    /// retries of the same registration.
    #[must_use]
    pub fn from_ticket_code(code: &TicketCode) -> Self {
        let reference: String = code
            .as_str()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(Self::MAX_LEN)
            .collect();
        Self(reference)
    }

    /// Parse an externally supplied reference.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidReference`] if the value is empty, too long, or
    /// contains anything but ASCII letters and digits.
    pub fn parse(value: &str) -> Result<Self, InvalidReference> {
        let valid = !value.is_empty()
            && value.len() <= Self::MAX_LEN
            && value.chars().all(|c| c.is_ascii_alphanumeric());
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidReference(value.to_string()))
        }
    }

    /// Borrow the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Reference {
    type Error = InvalidReference;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference that is not 1 to 32 ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid payment reference: {0:?}")]
pub struct InvalidReference(pub String);

// ============================================================================
// Money
// ============================================================================

/// Amount in minor units (centavos for MZN).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates `Money` from minor units.
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates `Money` from whole major units.
    #[must_use]
    pub const fn from_major(major: u64) -> Self {
        Self(major * 100)
    }

    /// Amount in minor units.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Whether nothing is owed.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Decimal string with two places, the format the provider expects.
    ///
    /// ```
    /// use ticketing::types::Money;
    ///
    /// assert_eq!(Money::from_minor(50_000).to_decimal_string(), "500.00");
    /// assert_eq!(Money::from_minor(1_005).to_decimal_string(), "10.05");
    /// ```
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// A stored enum value that did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The rejected value
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Status of a payment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Waiting for the provider to report an outcome
    Pending,
    /// Settled. Terminal: never regresses.
    Paid,
    /// Provider reported failure or cancellation
    Failed,
    /// Reserved for refund workflows; never set by reconciliation
    Refunded,
}

impl PaymentStatus {
    /// Database and API representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Whether the payment has settled.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }

    /// Whether a new checkout may be attached: only open or failed attempts
    /// can be paid again.
    #[must_use]
    pub const fn accepts_checkout(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// Payment status as seen on the registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationPaymentStatus {
    /// No payment attempt yet
    Unpaid,
    /// Checkout created, waiting for the payer
    Pending,
    /// Paid (or free)
    Paid,
    /// Last attempt failed
    Failed,
    /// Refunded by an operator
    Refunded,
}

impl RegistrationPaymentStatus {
    /// Database and API representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Whether the registration is paid.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl fmt::Display for RegistrationPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationPaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(Self::Unpaid),
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("registration payment status", other)),
        }
    }
}

/// Lifecycle status of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Holds a place at the event
    Active,
    /// Cancelled; nothing is owed
    Cancelled,
}

impl RegistrationStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant::new("registration status", other)),
        }
    }
}

/// Payment channel offered at checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// M-Pesa mobile money
    Mpesa,
    /// e-Mola mobile money
    Emola,
    /// Card
    Card,
}

impl PaymentMethod {
    /// Provider and database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mpesa => "mpesa",
            Self::Emola => "emola",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mpesa" => Ok(Self::Mpesa),
            "emola" => Ok(Self::Emola),
            "card" => Ok(Self::Card),
            _ => Err(UnknownVariant::new("payment method", s)),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A registration for an event, as far as payments are concerned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Registration {
    /// Registration ID
    pub id: RegistrationId,
    /// Public ticket identifier
    pub ticket_code: TicketCode,
    /// Attendee name
    pub full_name: String,
    /// Attendee email
    pub email: String,
    /// Title of the event (used in the payment description)
    pub event_title: String,
    /// Ticket price; `None` for free events
    pub event_price: Option<Money>,
    /// Active or cancelled
    pub status: RegistrationStatus,
    /// Payment status, written by reconciliation
    pub payment_status: RegistrationPaymentStatus,
}

impl Registration {
    /// What the attendee owes: the event price while active, nothing once
    /// cancelled or for free events.
    #[must_use]
    pub fn amount_due(&self) -> Money {
        match self.status {
            RegistrationStatus::Active => self.event_price.unwrap_or(Money::ZERO),
            RegistrationStatus::Cancelled => Money::ZERO,
        }
    }
}

/// One attempt to collect payment for a registration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PaymentRecord {
    /// Payment ID
    pub id: PaymentId,
    /// Owning registration (unique)
    pub registration_id: RegistrationId,
    /// Merchant reference (unique)
    pub reference: Reference,
    /// Provider-assigned payment ID, set once the checkout exists
    pub provider_id: Option<String>,
    /// Where the payer completes the payment
    pub checkout_url: Option<String>,
    /// Canonical payment status
    pub status: PaymentStatus,
    /// Selected or provider-reported channel
    pub method: Option<PaymentMethod>,
    /// Provider settlement ID, set when paid
    pub transaction_id: Option<String>,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Amount, fixed at creation
    pub amount: Money,
    /// ISO currency code, fixed at creation
    pub currency: String,
    /// Last payload observed from the provider
    pub raw_provider_payload: Option<serde_json::Value>,
    /// Delivery ID of the last processed webhook
    pub last_webhook_request_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Build the initial `PENDING` record for a registration.
    #[must_use]
    pub fn pending(new: NewPayment, now: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::new(),
            registration_id: new.registration_id,
            reference: new.reference,
            provider_id: None,
            checkout_url: None,
            status: PaymentStatus::Pending,
            method: new.method,
            transaction_id: None,
            paid_at: None,
            amount: new.amount,
            currency: new.currency,
            raw_provider_payload: None,
            last_webhook_request_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Values needed to create a payment record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPayment {
    /// Owning registration
    pub registration_id: RegistrationId,
    /// Merchant reference
    pub reference: Reference,
    /// Amount due at creation
    pub amount: Money,
    /// Currency code
    pub currency: String,
    /// Channel chosen by the payer, if any
    pub method: Option<PaymentMethod>,
}
