//! # Invoice Line Synchronizer
//!
//! Reconciles a complete, caller-submitted replacement set of lines against
//! the lines currently persisted for an invoice.
//!
//! ## Example
//! ```text
//! existing:  A(2 × 10.00)   B(1 × 25.00)   C(1 × 5.00)
//! submitted: A'(3 × 10.00, id = A)          D(new, 1 × 8.00)
//!
//!            ┌──────────────┬─────────────────────────────┐
//!            │ to_update    │ A → 3 × 10.00 = 30.00       │
//!            │ to_delete    │ B, C                        │
//!            │ to_insert    │ D → 8.00                    │
//!            │ new_total    │ 38.00                       │
//!            └──────────────┴─────────────────────────────┘
//! ```
//!
//! ## Rules
//! 1. An empty submission is rejected (an invoice always has lines)
//! 2. Existing lines whose id is not submitted are deleted
//! 3. Submitted lines with an id update that line in place
//! 4. Submitted lines without an id are inserted
//! 5. `new_total` is the sum over the post-synchronization line set
//!
//! Every line is resolved before anything is returned, so a single bad line
//! fails the whole plan and the store never sees a partial write.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::resolver::{resolve_line, resolve_line_update, ItemCatalog, ResolvedLine};
use crate::types::{InvoiceLine, SubmittedLine};
use crate::validation::validate_line_count;

// =============================================================================
// Plan
// =============================================================================

/// In-place update of one existing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineUpdate {
    pub line_id: String,
    pub resolved: ResolvedLine,
    /// False when the resolved values equal what is already stored.
    pub changed: bool,
}

/// The writes needed to bring an invoice's lines to the submitted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSyncPlan {
    pub invoice_id: String,
    pub to_insert: Vec<ResolvedLine>,
    pub to_update: Vec<LineUpdate>,
    /// Ids of existing lines to remove.
    pub to_delete: Vec<String>,
    /// How many entries of `to_update` change nothing.
    pub unchanged: usize,
    pub new_total: Money,
}

impl LineSyncPlan {
    /// Updates that actually modify a stored line.
    pub fn changed_updates(&self) -> impl Iterator<Item = &LineUpdate> {
        self.to_update.iter().filter(|u| u.changed)
    }

    /// True when applying the plan would leave every line as it is.
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty()
            && self.to_delete.is_empty()
            && self.unchanged == self.to_update.len()
    }
}

// =============================================================================
// Synchronization
// =============================================================================

/// Computes the synchronization plan for one invoice.
///
/// ## Arguments
/// * `invoice_id` - The invoice being edited
/// * `existing` - Lines currently persisted for that invoice
/// * `submitted` - The full replacement set from the caller
/// * `catalog` - Catalog records referenced by `submitted`
///
/// ## Errors
/// - `EmptyLineSet` if `submitted` is empty
/// - `DuplicateLine` if an id is submitted twice
/// - `UnknownLine` if a submitted id is not a line of this invoice
/// - any resolution error from [`crate::resolver`]
pub fn synchronize<C: ItemCatalog + ?Sized>(
    invoice_id: &str,
    existing: &[InvoiceLine],
    submitted: &[SubmittedLine],
    catalog: &C,
) -> CoreResult<LineSyncPlan> {
    if submitted.is_empty() {
        return Err(CoreError::EmptyLineSet);
    }
    validate_line_count(submitted.len())?;

    let by_id: HashMap<&str, &InvoiceLine> = existing
        .iter()
        .filter(|line| line.invoice_id == invoice_id)
        .map(|line| (line.id.as_str(), line))
        .collect();

    let mut kept: HashSet<&str> = HashSet::with_capacity(submitted.len());
    let mut to_insert = Vec::new();
    let mut to_update = Vec::new();
    let mut unchanged = 0usize;
    let mut new_total = Money::zero();

    for line in submitted {
        match line.id.as_deref() {
            Some(id) => {
                if !kept.insert(id) {
                    return Err(CoreError::DuplicateLine(id.to_string()));
                }
                let current = by_id.get(id).ok_or_else(|| CoreError::UnknownLine {
                    invoice_id: invoice_id.to_string(),
                    line_id: id.to_string(),
                })?;

                let resolved = resolve_line_update(
                    catalog,
                    current,
                    &line.item,
                    line.quantity,
                    line.unit_price,
                )?;
                let changed = !same_values(current, &resolved);
                if !changed {
                    unchanged += 1;
                }
                new_total += resolved.line_total;
                to_update.push(LineUpdate {
                    line_id: id.to_string(),
                    resolved,
                    changed,
                });
            }
            None => {
                let resolved = resolve_line(catalog, &line.item, line.quantity, line.unit_price)?;
                new_total += resolved.line_total;
                to_insert.push(resolved);
            }
        }
    }

    let to_delete = existing
        .iter()
        .filter(|line| line.invoice_id == invoice_id && !kept.contains(line.id.as_str()))
        .map(|line| line.id.clone())
        .collect();

    Ok(LineSyncPlan {
        invoice_id: invoice_id.to_string(),
        to_insert,
        to_update,
        to_delete,
        unchanged,
        new_total,
    })
}

fn same_values(current: &InvoiceLine, resolved: &ResolvedLine) -> bool {
    current.item == resolved.item
        && current.description == resolved.description
        && current.quantity == resolved.quantity
        && current.unit_price == resolved.unit_price
        && current.line_total == resolved.line_total
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use crate::error::ErrorKind;
    use crate::resolver::CatalogSnapshot;
    use crate::types::{CatalogProduct, CatalogService, LineItemRef, Quantity};

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new()
            .with_service(CatalogService {
                id: "svc-vacc".into(),
                name: "Vaccination".into(),
                is_active: true,
            })
            .with_service(CatalogService {
                id: "svc-consult".into(),
                name: "Consultation".into(),
                is_active: true,
            })
            .with_product(CatalogProduct {
                id: "prod-food".into(),
                name: "Renal diet 2kg".into(),
                unit_price: Money::from_cents(3190),
                is_active: true,
            })
    }

    fn stored(id: &str, item: LineItemRef, description: &str, qty: i64, cents: i64) -> InvoiceLine {
        let now = Utc::now();
        InvoiceLine {
            id: id.to_string(),
            invoice_id: "inv-1".to_string(),
            item,
            description: description.to_string(),
            quantity: Quantity::whole(qty).unwrap(),
            unit_price: Money::from_cents(cents),
            line_total: Money::from_cents(cents * qty),
            created_at: now,
            updated_at: now,
        }
    }

    fn svc(id: &str) -> LineItemRef {
        LineItemRef::Service(id.to_string())
    }

    fn priced(item: LineItemRef, qty: i64, cents: i64) -> SubmittedLine {
        SubmittedLine::new(item, Quantity::whole(qty).unwrap(), Some(Money::from_cents(cents)))
    }

    fn kept(id: &str, item: LineItemRef, qty: i64, cents: i64) -> SubmittedLine {
        let quantity = Quantity::whole(qty).unwrap();
        SubmittedLine::existing(id, item, quantity, Some(Money::from_cents(cents)))
    }

    fn resubmit(line: &InvoiceLine) -> SubmittedLine {
        let price = Some(line.unit_price);
        SubmittedLine::existing(line.id.clone(), line.item.clone(), line.quantity, price)
    }

    fn existing_abc() -> Vec<InvoiceLine> {
        vec![
            stored("A", svc("svc-vacc"), "Vaccination", 2, 1000),
            stored("B", svc("svc-consult"), "Consultation", 1, 2500),
            stored("C", LineItemRef::Product("prod-food".into()), "Renal diet 2kg", 1, 3190),
        ]
    }

    #[test]
    fn test_totals_two_lines() {
        let submitted = vec![
            priced(svc("svc-vacc"), 2, 1000),
            priced(svc("svc-consult"), 1, 2500),
        ];
        let plan = synchronize("inv-1", &[], &submitted, &catalog()).unwrap();

        assert_eq!(plan.to_insert.len(), 2);
        assert_eq!(plan.new_total, Money::from_cents(4500));
        assert_eq!(plan.new_total.to_string(), "45.00");
    }

    #[test]
    fn test_synchronization_completeness() {
        let submitted = vec![
            kept("A", svc("svc-vacc"), 3, 1000),
            SubmittedLine::new(
                LineItemRef::Product("prod-food".into()),
                Quantity::whole(1).unwrap(),
                None,
            ),
        ];
        let plan = synchronize("inv-1", &existing_abc(), &submitted, &catalog()).unwrap();

        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].line_id, "A");
        assert!(plan.to_update[0].changed);
        assert_eq!(plan.to_delete, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].description, "Renal diet 2kg");
        assert_eq!(plan.new_total, Money::from_cents(3000 + 3190));
    }

    #[test]
    fn test_resubmitting_persisted_set_is_noop() {
        let existing = existing_abc();
        let submitted: Vec<SubmittedLine> = existing.iter().map(resubmit).collect();

        let plan = synchronize("inv-1", &existing, &submitted, &catalog()).unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 3);
        assert_eq!(plan.changed_updates().count(), 0);
        assert_eq!(plan.new_total, Money::from_cents(2000 + 2500 + 3190));
    }

    #[test]
    fn test_empty_submission_rejected() {
        let err = synchronize("inv-1", &existing_abc(), &[], &catalog()).unwrap_err();
        assert!(matches!(err, CoreError::EmptyLineSet));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_unknown_and_duplicate_line_ids() {
        let foreign = vec![SubmittedLine::existing(
            "Z",
            svc("svc-vacc"),
            Quantity::whole(1).unwrap(),
            Some(Money::from_cents(1000)),
        )];
        let err = synchronize("inv-1", &existing_abc(), &foreign, &catalog()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownLine { .. }));

        let twice = vec![
            kept("A", svc("svc-vacc"), 1, 1000),
            kept("A", svc("svc-vacc"), 2, 1000),
        ];
        let err = synchronize("inv-1", &existing_abc(), &twice, &catalog()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateLine(ref id) if id == "A"));
    }

    #[test]
    fn test_one_bad_line_fails_whole_plan() {
        let submitted = vec![
            priced(svc("svc-vacc"), 1, 1000),
            priced(svc("svc-missing"), 1, 1000),
        ];
        let err = synchronize("inv-1", &existing_abc(), &submitted, &catalog()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_changing_item_refreshes_description() {
        let submitted = vec![SubmittedLine::existing(
            "B",
            svc("svc-vacc"),
            Quantity::whole(1).unwrap(),
            Some(Money::from_cents(2500)),
        )];
        let plan = synchronize("inv-1", &existing_abc(), &submitted, &catalog()).unwrap();
        assert_eq!(plan.to_update[0].resolved.description, "Vaccination");
        assert!(plan.to_update[0].changed);
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    fn arb_submitted() -> impl Strategy<Value = SubmittedLine> {
        let item = prop_oneof![Just("svc-vacc"), Just("svc-consult"), Just("prod-food")];
        (item, 1i64..20, 0i64..100_000).prop_map(|(item, qty, cents)| {
            let item = if item.starts_with("prod") {
                LineItemRef::Product(item.to_string())
            } else {
                LineItemRef::Service(item.to_string())
            };
            priced(item, qty, cents)
        })
    }

    /// Applies a plan the way the store does, assigning sequential ids.
    fn apply(plan: &LineSyncPlan, existing: &[InvoiceLine]) -> Vec<InvoiceLine> {
        let now = Utc::now();
        let mut lines: Vec<InvoiceLine> = existing
            .iter()
            .filter(|l| !plan.to_delete.contains(&l.id))
            .cloned()
            .collect();
        for update in &plan.to_update {
            if let Some(line) = lines.iter_mut().find(|l| l.id == update.line_id) {
                line.item = update.resolved.item.clone();
                line.description = update.resolved.description.clone();
                line.quantity = update.resolved.quantity;
                line.unit_price = update.resolved.unit_price;
                line.line_total = update.resolved.line_total;
            }
        }
        for (i, r) in plan.to_insert.iter().enumerate() {
            lines.push(InvoiceLine {
                id: format!("new-{}-{i}", existing.len()),
                invoice_id: plan.invoice_id.clone(),
                item: r.item.clone(),
                description: r.description.clone(),
                quantity: r.quantity,
                unit_price: r.unit_price,
                line_total: r.line_total,
                created_at: now,
                updated_at: now,
            });
        }
        lines
    }

    proptest! {
        #[test]
        fn prop_total_equals_sum_of_final_lines(
            first in proptest::collection::vec(arb_submitted(), 1..8),
            second in proptest::collection::vec(arb_submitted(), 1..8),
            keep in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let catalog = catalog();
            let plan = synchronize("inv-1", &[], &first, &catalog).unwrap();
            let lines = apply(&plan, &[]);
            prop_assert_eq!(plan.new_total, lines.iter().map(|l| l.line_total).sum::<Money>());

            // Second edit: keep a subset of existing lines (re-priced), add new ones.
            let mut edited: Vec<SubmittedLine> = lines
                .iter()
                .zip(keep.iter())
                .filter(|(_, keep)| **keep)
                .map(|(l, _)| {
                    let repriced = Some(l.unit_price + Money::from_cents(1));
                    SubmittedLine::existing(l.id.clone(), l.item.clone(), l.quantity, repriced)
                })
                .collect();
            edited.extend(second);

            let plan2 = synchronize("inv-1", &lines, &edited, &catalog).unwrap();
            let lines2 = apply(&plan2, &lines);
            prop_assert_eq!(plan2.new_total, lines2.iter().map(|l| l.line_total).sum::<Money>());
            prop_assert_eq!(lines2.len(), edited.len());
        }

        #[test]
        fn prop_resubmission_is_idempotent(
            first in proptest::collection::vec(arb_submitted(), 1..8),
        ) {
            let catalog = catalog();
            let plan = synchronize("inv-1", &[], &first, &catalog).unwrap();
            let lines = apply(&plan, &[]);

            let same: Vec<SubmittedLine> = lines.iter().map(resubmit).collect();
            let again = synchronize("inv-1", &lines, &same, &catalog).unwrap();

            prop_assert!(again.to_insert.is_empty());
            prop_assert!(again.to_delete.is_empty());
            prop_assert!(again.is_noop());
            prop_assert_eq!(again.new_total, plan.new_total);
        }
    }
}
