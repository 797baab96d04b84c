//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  On an invoice:                                                         │
//! │    2.5 ml × 12.30/ml must be exactly 30.75, every time                 │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents + Decimal Quantities                       │
//! │    unit price  = 1230 cents (i64)                                       │
//! │    quantity    = 2.5        (rust_decimal, exact)                       │
//! │    line total  = 3075 cents (rounded once, to the cent)                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vetbill_core::money::Money;
//!
//! // Create from cents (preferred)
//! let price = Money::from_cents(1099); // 10.99
//!
//! // Arithmetic operations
//! let doubled = price * 2;                     // 21.98
//! let total = price + Money::from_cents(500);  // 15.99
//! assert_eq!(total.to_string(), "15.99");
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::Quantity;

/// Number of fractional digits carried by every amount.
pub const CURRENCY_DECIMALS: u32 = 2;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: differences (balance due, overpayment) can go negative
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **No currency tag**: invoices are single-currency; only price rules
///   carry a currency code
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                                                                         │
/// │  PriceRule.amount ──► quote ──► caller picks unit price                 │
/// │                                                                         │
/// │  InvoiceLine.unit_price × quantity ──► InvoiceLine.line_total           │
/// │                                                                         │
/// │  Σ line_total ──► Invoice.total_amount ◄── compared ── Σ Payment.amount │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use vetbill_core::money::Money;
    ///
    /// let price = Money::from_cents(4500); // 45.00
    /// assert_eq!(price.cents(), 4500);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ## Example
    /// ```rust
    /// use vetbill_core::money::Money;
    ///
    /// let price = Money::from_major_minor(240, 0);
    /// assert_eq!(price.cents(), 24000);
    ///
    /// let negative = Money::from_major_minor(-5, 50);
    /// assert_eq!(negative.cents(), -550);
    /// ```
    ///
    /// ## Note
    /// For negative amounts, only the major unit should be negative.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Converts an exact decimal amount (e.g. `45.5`) into Money.
    ///
    /// Rejects amounts with more than two fractional digits instead of
    /// silently rounding them: a caller sending `10.005` has a bug.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use vetbill_core::money::Money;
    ///
    /// let amount = Money::from_decimal(Decimal::new(2405, 1), "amount").unwrap(); // 240.5
    /// assert_eq!(amount.cents(), 24050);
    ///
    /// assert!(Money::from_decimal(Decimal::new(10005, 3), "amount").is_err());
    /// ```
    pub fn from_decimal(value: Decimal, field: &str) -> Result<Self, ValidationError> {
        let normalized = value.normalize();
        if normalized.scale() > CURRENCY_DECIMALS {
            return Err(ValidationError::TooManyDecimals {
                field: field.to_string(),
                max: CURRENCY_DECIMALS,
            });
        }

        normalized
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.to_i64())
            .map(Money)
            .ok_or_else(|| ValidationError::OutOfRange {
                field: field.to_string(),
                min: i64::MIN,
                max: i64::MAX,
            })
    }

    /// Returns the exact decimal representation (`4500` cents → `45.00`).
    #[inline]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, CURRENCY_DECIMALS)
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns `self - other`, or zero if that would be negative.
    ///
    /// ## Example
    /// ```rust
    /// use vetbill_core::money::Money;
    ///
    /// let total = Money::from_cents(4500);
    /// assert_eq!(total.saturating_sub(Money::from_cents(5000)), Money::zero());
    /// assert_eq!(total.saturating_sub(Money::from_cents(1000)).cents(), 3500);
    /// ```
    #[inline]
    pub fn saturating_sub(&self, other: Money) -> Money {
        Money((self.0 - other.0).max(0))
    }

    /// Multiplies a unit price by a decimal quantity.
    ///
    /// The product is computed exactly in decimal and rounded once to the
    /// cent using Bankers Rounding (round half to even), so `0.5 × 0.05`
    /// gives `0.02`, and `1.5 × 0.05` gives `0.08`.
    ///
    /// ## Returns
    /// `None` if the result does not fit in an `i64` cent count.
    ///
    /// ## User Workflow
    /// ```text
    /// Product: Meloxicam 1.5 mg/ml, 12.30 per ml
    /// Quantity: 2.5
    ///      │
    ///      ▼
    /// checked_multiply_quantity(2.5) ← THIS FUNCTION
    ///      │
    ///      ▼
    /// Line Total: 30.75
    /// ```
    pub fn checked_multiply_quantity(&self, qty: Quantity) -> Option<Money> {
        let cents = Decimal::from(self.0).checked_mul(qty.value())?;
        cents
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            .to_i64()
            .map(Money)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Shows money with two decimals and no currency symbol (`45.00`, `-5.50`).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

/// Parses decimal text such as `"45"`, `"45.5"` or `"45.50"`.
impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: e.to_string(),
        })?;
        Money::from_decimal(value, "amount")
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by whole-unit quantities.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
