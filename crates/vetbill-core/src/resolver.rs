//! # Item Resolver
//!
//! Turns an item reference + quantity (+ optional caller price) into a fully
//! priced line: description snapshot, unit price and line total.
//!
//! ## Price Source per Item Type
//! ```text
//! ┌─────────────┬──────────────────────────────┬──────────────────────────┐
//! │ Item        │ unit_price                   │ description              │
//! ├─────────────┼──────────────────────────────┼──────────────────────────┤
//! │ Service     │ caller-supplied (required)   │ service name             │
//! │ Product     │ caller-supplied, else list   │ product name             │
//! └─────────────┴──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Price rules are advisory at invoice time: the front desk quotes with
//! [`crate::pricing`], then the agreed price is submitted with the line.
//!
//! Catalog access goes through [`ItemCatalog`] so resolution stays pure. The
//! store prefetches every referenced record into a [`CatalogSnapshot`] inside
//! the same transaction that writes the lines.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{
    CatalogProduct, CatalogService, InvoiceLine, ItemType, LineItemRef, Quantity,
};
use crate::validation::validate_unit_price;

// =============================================================================
// Catalog Access
// =============================================================================

/// Read-only lookup of billable items by id.
///
/// Returning `None` means "does not exist". Transient store failures never
/// surface here; they are raised while the snapshot is loaded.
pub trait ItemCatalog {
    fn service(&self, id: &str) -> Option<&CatalogService>;
    fn product(&self, id: &str) -> Option<&CatalogProduct>;
}

/// In-memory catalog holding just the records one operation needs.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    services: HashMap<String, CatalogService>,
    products: HashMap<String, CatalogProduct>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_service(&mut self, service: CatalogService) {
        self.services.insert(service.id.clone(), service);
    }

    pub fn insert_product(&mut self, product: CatalogProduct) {
        self.products.insert(product.id.clone(), product);
    }

    /// Builder-style variant of [`insert_service`](Self::insert_service).
    pub fn with_service(mut self, service: CatalogService) -> Self {
        self.insert_service(service);
        self
    }

    /// Builder-style variant of [`insert_product`](Self::insert_product).
    pub fn with_product(mut self, product: CatalogProduct) -> Self {
        self.insert_product(product);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len() + self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemCatalog for CatalogSnapshot {
    fn service(&self, id: &str) -> Option<&CatalogService> {
        self.services.get(id)
    }

    fn product(&self, id: &str) -> Option<&CatalogProduct> {
        self.products.get(id)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// A line after resolution, ready to be inserted or applied to an existing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub item: LineItemRef,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Computes `quantity × unit_price`, rounded half-to-even to the cent.
pub fn compute_line_total(quantity: Quantity, unit_price: Money) -> CoreResult<Money> {
    unit_price
        .checked_multiply_quantity(quantity)
        .ok_or_else(|| {
            CoreError::from(ValidationError::OutOfRange {
                field: "line_total".to_string(),
                min: 0,
                max: i64::MAX,
            })
        })
}

/// Resolves one line against the catalog.
///
/// ## Errors
/// - `ItemNotFound` if the item does not exist or is inactive
/// - `Validation` if a service line has no price, or the price is out of range
///
/// ## Example
/// ```rust
/// use vetbill_core::resolver::{resolve_line, CatalogSnapshot};
/// use vetbill_core::{CatalogProduct, LineItemRef, Money, Quantity};
///
/// let catalog = CatalogSnapshot::new().with_product(CatalogProduct {
///     id: "p-1".into(),
///     name: "Deworming tablet".into(),
///     unit_price: Money::from_cents(350),
///     is_active: true,
/// });
///
/// let line = resolve_line(
///     &catalog,
///     &LineItemRef::Product("p-1".into()),
///     Quantity::whole(4).unwrap(),
///     None,
/// )
/// .unwrap();
/// assert_eq!(line.line_total, Money::from_cents(1400));
/// ```
pub fn resolve_line<C: ItemCatalog + ?Sized>(
    catalog: &C,
    item: &LineItemRef,
    quantity: Quantity,
    supplied_price: Option<Money>,
) -> CoreResult<ResolvedLine> {
    resolve_with(catalog, item, quantity, supplied_price, false)
}

/// Resolves a submitted line that replaces `existing` in place.
///
/// When the item reference is unchanged the line keeps its description
/// snapshot, and an item deactivated since the line was created is still
/// accepted. A changed item reference resolves like a new line.
pub fn resolve_line_update<C: ItemCatalog + ?Sized>(
    catalog: &C,
    existing: &InvoiceLine,
    item: &LineItemRef,
    quantity: Quantity,
    supplied_price: Option<Money>,
) -> CoreResult<ResolvedLine> {
    if existing.item != *item {
        return resolve_line(catalog, item, quantity, supplied_price);
    }

    let mut resolved = resolve_with(catalog, item, quantity, supplied_price, true)?;
    resolved.description = existing.description.clone();
    Ok(resolved)
}

fn resolve_with<C: ItemCatalog + ?Sized>(
    catalog: &C,
    item: &LineItemRef,
    quantity: Quantity,
    supplied_price: Option<Money>,
    allow_inactive: bool,
) -> CoreResult<ResolvedLine> {
    let (description, unit_price) = match item {
        LineItemRef::Service(id) => {
            let service = catalog
                .service(id)
                .filter(|s| s.is_active || allow_inactive)
                .ok_or_else(|| CoreError::ItemNotFound {
                    item_type: ItemType::Service,
                    id: id.clone(),
                })?;
            let price = supplied_price.ok_or_else(|| ValidationError::Required {
                field: "unit_price".to_string(),
            })?;
            (service.name.clone(), price)
        }
        LineItemRef::Product(id) => {
            let product = catalog
                .product(id)
                .filter(|p| p.is_active || allow_inactive)
                .ok_or_else(|| CoreError::ItemNotFound {
                    item_type: ItemType::Product,
                    id: id.clone(),
                })?;
            (
                product.name.clone(),
                supplied_price.unwrap_or(product.unit_price),
            )
        }
    };

    validate_unit_price(unit_price)?;
    let line_total = compute_line_total(quantity, unit_price)?;

    Ok(ResolvedLine {
        item: item.clone(),
        description,
        quantity,
        unit_price,
        line_total,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
