//! Order lifecycle states and the transition-legality table.
//!
//! # State diagram
//!
//! ```text
//!              claim            accept           start_delivery      confirm_delivery
//!   Created ─────────► Assigned ──────► Accepted ──────────► InProgress ──────────► Delivered (term.)
//!      ▲                  │
//!      └──── reject ──────┘
//!
//!   Created | Assigned ──── cancel ────► Cancelled (term.)
//! ```
//!
//! Cancellation is deliberately unreachable from `Accepted` and `InProgress`:
//! once a team member has committed to the delivery, disputes go through an
//! out-of-band refund process, not this state machine.

use serde::{Deserialize, Serialize};

/// All states an order can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Placed by a customer; in the claim pool, no team member attached.
    Created,
    /// Claimed by a team member; awaiting their accept/reject decision.
    Assigned,
    /// Team member committed to the delivery.
    Accepted,
    /// Delivery underway; a delivery-confirmation OTP is outstanding.
    InProgress,
    /// Delivery confirmed via OTP. **Terminal.**
    Delivered,
    /// Cancelled before any team member committed. **Terminal.**
    Cancelled,
}

impl OrderState {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Assigned => "ASSIGNED",
            Self::Accepted => "ACCEPTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseStateError> {
        match s {
            "CREATED" => Ok(Self::Created),
            "ASSIGNED" => Ok(Self::Assigned),
            "ACCEPTED" => Ok(Self::Accepted),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognised state string (e.g. a row written by a newer schema).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError(pub String);

impl std::fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown order state '{}'", self.0)
    }
}

impl std::error::Error for ParseStateError {}

/// The legality table for lifecycle transitions.
///
/// Stores `debug_assert!` against this before applying a compare-and-set;
/// the controller only ever requests pairs from this table, so a violation
/// indicates a programming error, not a runtime race.
pub fn legal_transition(from: OrderState, to: OrderState) -> bool {
    use OrderState::*;
    matches!(
        (from, to),
        (Created, Assigned)        // claim
            | (Assigned, Accepted)     // accept
            | (Assigned, Created)      // reject (re-queued)
            | (Accepted, InProgress)   // start_delivery
            | (InProgress, Delivered)  // confirm_delivery
            | (Created, Cancelled)     // cancel
            | (Assigned, Cancelled)    // cancel
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
