//! # Price Rule Catalog
//!
//! Picks the single applicable price for a service given an optional
//! (species, weight) context.
//!
//! ## Resolution Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  resolve_price(rules, "svc-dental", Some("dog"), Some(15 kg))          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. Keep active rules of this service                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. Keep rules whose scope matches                                      │
//! │       species: rule.species is None OR == "dog"                         │
//! │       weight:  rule.min is None OR 15 ≥ min                             │
//! │                rule.max is None OR 15 ≤ max                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. Most specific wins                                                  │
//! │       species-specific  >  universal                                    │
//! │       both bounds  >  one bound  >  unbounded                           │
//! │       narrower range  (two-bounded rules only)                          │
//! │       lowest rule id  (lexicographic)                                   │
//! │       │                                                                 │
//! │       ├── none matched → CoreError::NoMatchingPriceRule                 │
//! │       └── PriceQuote { rule_id, amount, currency }                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing context value never matches a scoped rule: no species given means
//! species-scoped rules are skipped, no weight given means every rule with a
//! weight bound is skipped. There is no zero-price fallback.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{CurrencyCode, PriceRule, WeightKg};

// =============================================================================
// Output Types
// =============================================================================

/// The price chosen for a service, with the rule it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceQuote {
    pub rule_id: String,
    pub amount: Money,
    pub currency: CurrencyCode,
}

/// A quote enriched with the service name, for the quoting screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServiceQuote {
    pub service_id: String,
    pub service_name: String,
    pub rule_id: String,
    pub amount: Money,
    pub currency: CurrencyCode,
}

impl ServiceQuote {
    pub fn new(service_id: &str, service_name: &str, quote: PriceQuote) -> Self {
        ServiceQuote {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            rule_id: quote.rule_id,
            amount: quote.amount,
            currency: quote.currency,
        }
    }
}

// =============================================================================
// Matching
// =============================================================================

/// Returns true if `rule` applies to the given service and context.
pub fn rule_matches(
    rule: &PriceRule,
    service_id: &str,
    species_id: Option<&str>,
    weight: Option<WeightKg>,
) -> bool {
    if !rule.is_active || rule.service_id != service_id {
        return false;
    }

    let species_ok = match (&rule.species_id, species_id) {
        (None, _) => true,
        (Some(required), Some(given)) => required == given,
        (Some(_), None) => false,
    };
    if !species_ok {
        return false;
    }

    let min_ok = match (rule.weight_min_kg, weight) {
        (None, _) => true,
        (Some(min), Some(w)) => w >= min,
        (Some(_), None) => false,
    };
    let max_ok = match (rule.weight_max_kg, weight) {
        (None, _) => true,
        (Some(max), Some(w)) => w <= max,
        (Some(_), None) => false,
    };

    min_ok && max_ok
}

/// Number of weight bounds a rule carries (0, 1 or 2).
fn bound_count(rule: &PriceRule) -> u8 {
    u8::from(rule.weight_min_kg.is_some()) + u8::from(rule.weight_max_kg.is_some())
}

/// Width of a two-bounded range; `None` for open ranges.
fn range_width(rule: &PriceRule) -> Option<Decimal> {
    match (rule.weight_min_kg, rule.weight_max_kg) {
        (Some(min), Some(max)) => Some(max.value() - min.value()),
        _ => None,
    }
}

/// Orders two matching rules so that the preferred one compares `Less`.
///
/// Total order over distinct rule ids, so the result never depends on the
/// order rules were loaded in.
pub fn compare_specificity(a: &PriceRule, b: &PriceRule) -> Ordering {
    b.species_id
        .is_some()
        .cmp(&a.species_id.is_some())
        .then_with(|| bound_count(b).cmp(&bound_count(a)))
        .then_with(|| match (range_width(a), range_width(b)) {
            (Some(wa), Some(wb)) => wa.cmp(&wb),
            _ => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Resolves the applicable price for a service.
///
/// ## Arguments
/// * `rules` - Candidate rules (may contain other services and inactive rules)
/// * `service_id` - The service being priced
/// * `species_id` - Patient species, if known
/// * `weight` - Patient weight, if known
///
/// ## Example
/// ```rust
/// use vetbill_core::pricing::resolve_price;
///
/// let err = resolve_price(&[], "svc-1", None, None).unwrap_err();
/// assert!(err.to_string().contains("svc-1"));
/// ```
pub fn resolve_price(
    rules: &[PriceRule],
    service_id: &str,
    species_id: Option<&str>,
    weight: Option<WeightKg>,
) -> CoreResult<PriceQuote> {
    rules
        .iter()
        .filter(|rule| rule_matches(rule, service_id, species_id, weight))
        .min_by(|a, b| compare_specificity(a, b))
        .map(|rule| PriceQuote {
            rule_id: rule.id.clone(),
            amount: rule.amount,
            currency: rule.currency.clone(),
        })
        .ok_or_else(|| CoreError::NoMatchingPriceRule {
            service_id: service_id.to_string(),
        })
}

// =============================================================================
// Unit Tests
// =============================================================================
