//! bmb-otp
//!
//! Issues and validates short-lived one-time codes bound to an order and a
//! purpose. At most one active code exists per `(order_id, purpose)` key:
//! re-issuing replaces (and thereby invalidates) any prior record.
//!
//! # Contract
//!
//! - Codes are fixed-width 6-digit numerics from a CSPRNG-backed source.
//! - A code is single-use: the first successful validation consumes it.
//! - Expiry is a pure function of the stored issue time and the current
//!   time; no background sweeper is needed for correctness.
//! - After [`OtpConfig::max_failed_attempts`] wrong submissions the record
//!   is permanently locked and even the correct code is refused, bounding
//!   brute-force guessing of the 6-digit space.
//!
//! Public `issue`/`validate` stamp `Utc::now()`; the `_at` variants take an
//! explicit clock so time-dependent behaviour is testable without sleeping.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of generated codes, in decimal digits.
pub const CODE_DIGITS: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

// ---------------------------------------------------------------------------
// Purpose
// ---------------------------------------------------------------------------

/// What a code proves. Part of the record key, so the same order can carry
/// independent codes for independent purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    /// Proof of physical hand-over at the delivery address.
    DeliveryConfirmation,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::DeliveryConfirmation => "DELIVERY_CONFIRMATION",
        }
    }
}

impl std::fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Validation failures. Surfaced to the caller for user-facing messaging;
/// never silently retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpError {
    /// No code was ever issued for this `(order, purpose)` key.
    NotIssued,
    /// The code's time-to-live has elapsed.
    Expired,
    /// The code was already used once; single-use is absolute.
    AlreadyConsumed,
    /// Submitted code does not match. `attempts_left` counts down to the
    /// lockout.
    InvalidCode { attempts_left: u32 },
    /// Too many wrong submissions; the record is permanently invalid and
    /// delivery confirmation must be re-initiated out-of-band.
    LockedOut,
}

impl std::fmt::Display for OtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OtpError::NotIssued => write!(f, "no code has been issued"),
            OtpError::Expired => write!(f, "code has expired"),
            OtpError::AlreadyConsumed => write!(f, "code was already used"),
            OtpError::InvalidCode { attempts_left } => {
                write!(f, "incorrect code ({attempts_left} attempts left)")
            }
            OtpError::LockedOut => write!(f, "too many incorrect attempts; code locked"),
        }
    }
}

impl std::error::Error for OtpError {}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunable parameters. Defaults match the production values.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// Time-to-live of an issued code.
    pub ttl: Duration,
    /// Wrong submissions tolerated before the record locks.
    pub max_failed_attempts: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            max_failed_attempts: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct OtpRecord {
    code: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    consumed: bool,
    failed_attempts: u32,
}

// ---------------------------------------------------------------------------
// Code source
// ---------------------------------------------------------------------------

/// Where codes come from. `Random` draws from the thread RNG (ChaCha-based,
/// cryptographically secure). `Scripted` replays a fixed sequence for
/// deterministic tests.
#[derive(Debug)]
enum CodeSource {
    Random,
    Scripted(Mutex<VecDeque<u32>>),
}

impl CodeSource {
    fn next(&self) -> u32 {
        match self {
            CodeSource::Random => rand::rng().random_range(0..CODE_SPACE),
            CodeSource::Scripted(queue) => queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The OTP engine. Cheap to share behind an `Arc`; all interior state is
/// mutex-guarded and no lock is held across any external call.
#[derive(Debug)]
pub struct OtpEngine {
    config: OtpConfig,
    source: CodeSource,
    records: Mutex<BTreeMap<(Uuid, OtpPurpose), OtpRecord>>,
}

impl OtpEngine {
    pub fn new(config: OtpConfig) -> Self {
        Self {
            config,
            source: CodeSource::Random,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Engine that emits `codes` in order instead of random values.
    /// Once the script runs out it emits `000000`. Test wiring only.
    pub fn with_scripted_codes(config: OtpConfig, codes: Vec<u32>) -> Self {
        debug_assert!(codes.iter().all(|c| *c < CODE_SPACE));
        Self {
            config,
            source: CodeSource::Scripted(Mutex::new(codes.into())),
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(Uuid, OtpPurpose), OtpRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue a fresh code for the key, replacing any prior record.
    ///
    /// Returns the code for out-of-band delivery; the caller owns
    /// transmission (SMS in production).
    pub fn issue(&self, order_id: Uuid, purpose: OtpPurpose) -> String {
        self.issue_at(order_id, purpose, Utc::now())
    }

    pub fn issue_at(&self, order_id: Uuid, purpose: OtpPurpose, now: DateTime<Utc>) -> String {
        let code = format!("{:0width$}", self.source.next(), width = CODE_DIGITS);
        let record = OtpRecord {
            code: code.clone(),
            issued_at: now,
            expires_at: now + self.config.ttl,
            consumed: false,
            failed_attempts: 0,
        };
        self.lock().insert((order_id, purpose), record);
        code
    }

    /// Validate a submitted code. Success consumes the record.
    pub fn validate(
        &self,
        order_id: Uuid,
        purpose: OtpPurpose,
        submitted: &str,
    ) -> Result<(), OtpError> {
        self.validate_at(order_id, purpose, submitted, Utc::now())
    }

    /// Check order: existence, expiry, consumption, lockout, then the code
    /// itself. Lockout is checked *before* comparison so a correct code
    /// after the limit still fails.
    pub fn validate_at(
        &self,
        order_id: Uuid,
        purpose: OtpPurpose,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OtpError> {
        let mut records = self.lock();
        let record = records
            .get_mut(&(order_id, purpose))
            .ok_or(OtpError::NotIssued)?;

        if now > record.expires_at {
            return Err(OtpError::Expired);
        }
        if record.consumed {
            return Err(OtpError::AlreadyConsumed);
        }
        if record.failed_attempts >= self.config.max_failed_attempts {
            return Err(OtpError::LockedOut);
        }
        if record.code != submitted {
            record.failed_attempts += 1;
            return Err(OtpError::InvalidCode {
                attempts_left: self.config.max_failed_attempts - record.failed_attempts,
            });
        }

        record.consumed = true;
        Ok(())
    }

    /// Drop expired and consumed records. Storage hygiene only — expiry is
    /// already enforced at validation time.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| !r.consumed && now <= r.expires_at);
        before - records.len()
    }

    /// Issue timestamp of the active record for a key, if any. Useful for
    /// resend throttling in the API layer.
    pub fn issued_at(&self, order_id: Uuid, purpose: OtpPurpose) -> Option<DateTime<Utc>> {
        self.lock().get(&(order_id, purpose)).map(|r| r.issued_at)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
