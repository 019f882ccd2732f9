// 🧾 Receipt workflows - issue, scan, upload, void
//
// Every workflow runs the same pipeline:
//   payload → IngestPipeline → ReconciliationEngine → Receipt → SQLite
// and differs only in who the receipt belongs to and whether stock moves.
// Stock only moves for merchant-issued receipts.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::accounts::{get_user, require_customer, require_merchant};
use crate::config::IngestSettings;
use crate::db::{self, DateRange, Event, StockChange};
use crate::entities::{generate_receipt_number, Item, Receipt, ReceiptSource, ReceiptStatus, User};
use crate::error::{AppError, AppResult};
use crate::ingest::{IngestPipeline, Ingested};
use crate::matching::slugify;
use crate::reconciliation::{Reconciled, ReconciliationEngine};
use crate::schema::{SchemaValidator, ValidationError};

/// Prefix for merchants known only by the name printed on an uploaded receipt
pub const UNREGISTERED_PREFIX: &str = "unregistered:";

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptOutcome {
    pub receipt: Receipt,
    pub warnings: Vec<String>,
    pub qr_payload: String,
    /// True when a scan claimed a receipt the merchant had already issued
    pub claimed_existing: bool,
}

impl ReceiptOutcome {
    fn new(receipt: Receipt, warnings: Vec<String>, claimed_existing: bool) -> Self {
        let qr_payload = receipt.qr_payload();
        ReceiptOutcome {
            receipt,
            warnings,
            qr_payload,
            claimed_existing,
        }
    }
}

/// Receipt plus its QR payload, as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptView {
    #[serde(flatten)]
    pub receipt: Receipt,
    pub qr_payload: String,
}

// ============================================================================
// ASSEMBLY
// ============================================================================

struct Owner {
    merchant_id: String,
    merchant_name: Option<String>,
    customer_id: Option<String>,
    status: ReceiptStatus,
}

fn assemble(ingested: &Ingested, reconciled: Reconciled, owner: Owner, now: DateTime<Utc>) -> Receipt {
    let normalized = &ingested.receipt;
    let receipt_number = normalized
        .receipt_number
        .clone()
        .unwrap_or_else(|| generate_receipt_number(normalized.transaction_date));

    let mut receipt = Receipt {
        id: uuid::Uuid::new_v4().to_string(),
        receipt_number,
        merchant_id: owner.merchant_id,
        merchant_name: owner.merchant_name.or_else(|| normalized.merchant_name.clone()),
        customer_id: owner.customer_id,
        source: normalized.source,
        lines: reconciled.lines,
        subtotal: reconciled.totals.subtotal,
        discount: reconciled.totals.discount,
        tax: reconciled.totals.tax,
        total: reconciled.totals.total,
        currency: normalized.currency.clone(),
        payment_method: normalized.payment_method,
        transaction_date: normalized.transaction_date,
        status: owner.status,
        notes: normalized.notes.clone(),
        fingerprint: String::new(),
        reconciliation: reconciled.summary,
        created_at: now,
        updated_at: now,
    };
    receipt.fingerprint = receipt.compute_fingerprint();
    receipt
}

/// Whole units taken from stock for a quantity (0.5 kg still uses one unit)
fn stock_units(quantity: f64) -> i64 {
    quantity.ceil().max(0.0) as i64
}

/// Stock decrements for matched lines, refused up front when stock is short
fn plan_stock(lines: &Reconciled, catalog: &[Item]) -> AppResult<Vec<StockChange>> {
    let by_id: HashMap<&str, &Item> = catalog.iter().map(|item| (item.id.as_str(), item)).collect();
    let mut demand: Vec<(String, Option<String>, i64)> = Vec::new();
    let mut errors = Vec::new();

    for (index, (line, found)) in lines.lines.iter().zip(&lines.matches).enumerate() {
        let Some(found) = found else { continue };
        let Some(item) = by_id.get(found.item_id.as_str()) else { continue };

        if found.variant.is_none() && !item.variants.is_empty() {
            errors.push(ValidationError::new(
                &format!("items[{index}].variant"),
                format!("'{}' is sold in variants; choose one", item.name),
                "Line",
            ));
            continue;
        }

        let units = stock_units(line.quantity);
        match demand
            .iter_mut()
            .find(|(id, variant, _)| *id == found.item_id && *variant == found.variant)
        {
            Some(entry) => entry.2 = entry.2.saturating_add(units),
            None => demand.push((found.item_id.clone(), found.variant.clone(), units)),
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let mut changes = Vec::with_capacity(demand.len());
    for (item_id, variant, units) in demand {
        let Some(item) = by_id.get(item_id.as_str()) else { continue };
        let available = i64::from(item.available_stock(variant.as_deref()));
        if units > available {
            let label = match &variant {
                Some(v) => format!("{} ({v})", item.name),
                None => item.name.clone(),
            };
            return Err(AppError::Conflict(format!(
                "Not enough stock for '{label}': {available} available, {units} requested"
            )));
        }
        changes.push(StockChange {
            item_id,
            variant,
            delta: -units,
        });
    }
    Ok(changes)
}

fn validate_and_insert(conn: &Connection, receipt: &Receipt, stock: &[StockChange], now: DateTime<Utc>) -> AppResult<()> {
    SchemaValidator::new().validate_receipt(receipt, now)?;

    if db::find_receipt_by_fingerprint(conn, &receipt.fingerprint)?.is_some() {
        return Err(AppError::Conflict(format!(
            "Receipt {} has already been recorded",
            receipt.receipt_number
        )));
    }

    db::insert_receipt(conn, receipt, stock).map_err(|e| {
        AppError::conflict_on_unique(e, format!("Receipt {} has already been recorded", receipt.receipt_number))
    })
}

fn record(conn: &Connection, event_type: &str, receipt: &Receipt, data: Value, actor: &str) -> AppResult<()> {
    db::insert_event(conn, &Event::new(event_type, "receipt", &receipt.id, data, actor))?;
    Ok(())
}

fn registered_merchant(conn: &Connection, merchant_id: &str) -> AppResult<User> {
    match db::get_user(conn, merchant_id)? {
        Some(user) if user.is_merchant() => Ok(user),
        _ => Err(AppError::invalid(
            "merchant_id",
            format!("Unknown merchant {merchant_id}"),
            "Receipt",
        )),
    }
}

// ============================================================================
// WORKFLOWS
// ============================================================================

/// Merchant issues a receipt at the point of sale; sold stock is decremented
pub fn issue_receipt(
    conn: &Connection,
    settings: &IngestSettings,
    merchant_id: &str,
    payload: &Value,
) -> AppResult<ReceiptOutcome> {
    let merchant = require_merchant(conn, merchant_id)?;
    let now = Utc::now();

    let ingested = IngestPipeline::new(settings.clone()).ingest_manual(merchant_id, payload, now)?;
    let catalog = db::get_merchant_items(conn, merchant_id)?;
    let reconciled = ReconciliationEngine::from_settings(settings).reconcile(&ingested.receipt, Some(&catalog), now)?;
    let stock = plan_stock(&reconciled, &catalog)?;

    let owner = Owner {
        merchant_id: merchant.id.clone(),
        merchant_name: Some(merchant.display_name().to_string()),
        customer_id: None,
        status: ReceiptStatus::Issued,
    };
    let receipt = assemble(&ingested, reconciled, owner, now);
    validate_and_insert(conn, &receipt, &stock, now)?;

    record(
        conn,
        "receipt_issued",
        &receipt,
        serde_json::json!({
            "receipt_number": receipt.receipt_number,
            "total": receipt.total,
            "stock_changes": stock,
        }),
        &format!("merchant:{merchant_id}"),
    )?;

    info!(
        merchant_id,
        receipt_id = %receipt.id,
        total = receipt.total,
        lines = receipt.lines.len(),
        "receipt issued"
    );
    Ok(ReceiptOutcome::new(receipt, ingested.warnings, false))
}

/// Customer scans a QR code: claims the issued receipt, or records a new one
pub fn scan_receipt(
    conn: &Connection,
    settings: &IngestSettings,
    customer_id: &str,
    qr: &str,
) -> AppResult<ReceiptOutcome> {
    require_customer(conn, customer_id)?;
    let now = Utc::now();

    let ingested = IngestPipeline::new(settings.clone()).ingest_qr(qr, now)?;
    let merchant_id = ingested.receipt.merchant_id.clone().unwrap_or_default();
    let merchant = registered_merchant(conn, &merchant_id)?;

    if let Some(number) = &ingested.receipt.receipt_number {
        if let Some(existing) = db::find_receipt_by_number(conn, &merchant.id, number)? {
            return claim(conn, existing, customer_id, ingested.warnings);
        }
    }

    let catalog = db::get_merchant_items(conn, &merchant.id)?;
    let reconciled = ReconciliationEngine::from_settings(settings).reconcile(&ingested.receipt, Some(&catalog), now)?;

    let owner = Owner {
        merchant_id: merchant.id.clone(),
        merchant_name: Some(merchant.display_name().to_string()),
        customer_id: Some(customer_id.to_string()),
        status: ReceiptStatus::Claimed,
    };
    let receipt = assemble(&ingested, reconciled, owner, now);
    validate_and_insert(conn, &receipt, &[], now)?;

    record(
        conn,
        "receipt_scanned",
        &receipt,
        serde_json::json!({
            "receipt_number": receipt.receipt_number,
            "status": receipt.reconciliation.status.as_str(),
        }),
        &format!("customer:{customer_id}"),
    )?;

    info!(customer_id, receipt_id = %receipt.id, "receipt recorded from QR");
    Ok(ReceiptOutcome::new(receipt, ingested.warnings, false))
}

fn claim(conn: &Connection, mut receipt: Receipt, customer_id: &str, warnings: Vec<String>) -> AppResult<ReceiptOutcome> {
    if receipt.is_void() {
        return Err(AppError::Conflict(format!("Receipt {} has been voided", receipt.receipt_number)));
    }

    match receipt.customer_id.as_deref() {
        Some(owner) if owner == customer_id => {
            return Ok(ReceiptOutcome::new(receipt, warnings, true));
        }
        Some(_) => {
            warn!(receipt_id = %receipt.id, customer_id, "claim refused: already claimed");
            return Err(AppError::Conflict(format!(
                "Receipt {} was already claimed by another customer",
                receipt.receipt_number
            )));
        }
        None => {}
    }

    receipt.customer_id = Some(customer_id.to_string());
    receipt.status = ReceiptStatus::Claimed;
    receipt.updated_at = Utc::now();
    db::update_receipt(conn, &receipt, &[])?;

    record(
        conn,
        "receipt_claimed",
        &receipt,
        serde_json::json!({ "customer_id": customer_id }),
        &format!("customer:{customer_id}"),
    )?;

    info!(customer_id, receipt_id = %receipt.id, "receipt claimed");
    Ok(ReceiptOutcome::new(receipt, warnings, true))
}

/// Customer enters a receipt by hand (or from OCR)
pub fn upload_receipt(
    conn: &Connection,
    settings: &IngestSettings,
    customer_id: &str,
    payload: &Value,
) -> AppResult<ReceiptOutcome> {
    require_customer(conn, customer_id)?;
    let now = Utc::now();

    let mut ingested = IngestPipeline::new(settings.clone()).ingest_upload(payload, now)?;
    let normalized = &ingested.receipt;

    let merchant = match (&normalized.merchant_id, &normalized.merchant_name) {
        (Some(id), _) => Some(registered_merchant(conn, id)?),
        (None, Some(name)) => db::find_merchant_by_shop_name(conn, name)?,
        (None, None) => None,
    };

    let engine = ReconciliationEngine::from_settings(settings);
    let (owner, reconciled) = match merchant {
        Some(merchant) => {
            let catalog = db::get_merchant_items(conn, &merchant.id)?;
            let reconciled = engine.reconcile(normalized, Some(&catalog), now)?;
            let owner = Owner {
                merchant_id: merchant.id.clone(),
                merchant_name: Some(merchant.display_name().to_string()),
                customer_id: Some(customer_id.to_string()),
                status: ReceiptStatus::Claimed,
            };
            (owner, reconciled)
        }
        None => {
            let name = normalized.merchant_name.clone().unwrap_or_default();
            let reconciled = engine.reconcile(normalized, None, now)?;
            let owner = Owner {
                merchant_id: format!("{UNREGISTERED_PREFIX}{}", slugify(&name)),
                merchant_name: Some(name.clone()),
                customer_id: Some(customer_id.to_string()),
                status: ReceiptStatus::Claimed,
            };
            ingested.warnings.push(format!("Merchant '{name}' is not registered; lines were not matched"));
            (owner, reconciled)
        }
    };

    let receipt = assemble(&ingested, reconciled, owner, now);
    validate_and_insert(conn, &receipt, &[], now)?;

    record(
        conn,
        "receipt_uploaded",
        &receipt,
        serde_json::json!({
            "merchant_id": receipt.merchant_id,
            "total": receipt.total,
            "status": receipt.reconciliation.status.as_str(),
        }),
        &format!("customer:{customer_id}"),
    )?;

    info!(customer_id, receipt_id = %receipt.id, merchant_id = %receipt.merchant_id, "receipt uploaded");
    Ok(ReceiptOutcome::new(receipt, ingested.warnings, false))
}

/// Void an issued receipt; manual receipts give their stock back
pub fn void_receipt(
    conn: &Connection,
    merchant_id: &str,
    receipt_id: &str,
    reason: Option<&str>,
) -> AppResult<Receipt> {
    require_merchant(conn, merchant_id)?;
    let mut receipt = db::get_receipt(conn, receipt_id)?.ok_or_else(|| AppError::not_found("Receipt", receipt_id))?;

    if receipt.merchant_id != merchant_id {
        return Err(AppError::Forbidden("Receipt was issued by another merchant".into()));
    }
    if receipt.is_void() {
        return Err(AppError::Conflict(format!("Receipt {} is already void", receipt.receipt_number)));
    }

    let mut restock: Vec<StockChange> = Vec::new();
    if receipt.source == ReceiptSource::Manual {
        for line in &receipt.lines {
            let Some(item_id) = &line.item_id else { continue };
            // Items deleted since the sale have nothing to restore
            let Some(item) = db::get_item(conn, merchant_id, item_id)? else { continue };
            match &line.variant {
                Some(name) if item.find_variant(name).is_none() => continue,
                None if !item.variants.is_empty() => continue,
                _ => {}
            }
            restock.push(StockChange {
                item_id: item_id.clone(),
                variant: line.variant.clone(),
                delta: stock_units(line.quantity),
            });
        }
    }

    receipt.status = ReceiptStatus::Void;
    receipt.updated_at = Utc::now();
    db::update_receipt(conn, &receipt, &restock)?;

    record(
        conn,
        "receipt_voided",
        &receipt,
        serde_json::json!({ "reason": reason, "restocked": restock }),
        &format!("merchant:{merchant_id}"),
    )?;

    info!(merchant_id, receipt_id, restocked = restock.len(), "receipt voided");
    Ok(receipt)
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn get_receipt(conn: &Connection, receipt_id: &str) -> AppResult<ReceiptView> {
    let receipt = db::get_receipt(conn, receipt_id)?.ok_or_else(|| AppError::not_found("Receipt", receipt_id))?;
    let qr_payload = receipt.qr_payload();
    Ok(ReceiptView { receipt, qr_payload })
}

pub fn list_customer_receipts(conn: &Connection, customer_id: &str, range: DateRange) -> AppResult<Vec<Receipt>> {
    get_user(conn, customer_id)?;
    Ok(db::list_customer_receipts(conn, customer_id, range)?)
}

pub fn list_merchant_receipts(conn: &Connection, merchant_id: &str, range: DateRange) -> AppResult<Vec<Receipt>> {
    require_merchant(conn, merchant_id)?;
    Ok(db::list_merchant_receipts(conn, merchant_id, range)?)
}

/// Audit trail, oldest first
pub fn receipt_events(conn: &Connection, receipt_id: &str) -> AppResult<Vec<Event>> {
    if db::get_receipt(conn, receipt_id)?.is_none() {
        return Err(AppError::not_found("Receipt", receipt_id));
    }
    Ok(db::get_events_for_entity(conn, "receipt", receipt_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ItemVariant, ShopProfile};
    use crate::reconciliation::ReconciliationStatus;
    use crate::schema::MAX_LINE_QUANTITY;
    use serde_json::json;

    struct Fixture {
        conn: Connection,
        settings: IngestSettings,
        merchant: User,
        customer: User,
        rice: Item,
        shirt: Item,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();

        let merchant = User::merchant("Ravi", "ravi@shop.in", ShopProfile::new("Ravi Stores"));
        let customer = User::customer("Asha", "asha@example.com");
        db::insert_user(&conn, &merchant).unwrap();
        db::insert_user(&conn, &customer).unwrap();

        let rice = Item::new(&merchant.id, "Basmati Rice", 120.0, 10).with_category("Groceries");
        let mut shirt = Item::new(&merchant.id, "Cotton Shirt", 500.0, 0).with_category("Clothing");
        shirt.variants = vec![
            ItemVariant { name: "M".into(), price: None, stock: 2, sku: None },
            ItemVariant { name: "L".into(), price: Some(550.0), stock: 1, sku: None },
        ];
        db::insert_item(&conn, &rice).unwrap();
        db::insert_item(&conn, &shirt).unwrap();

        Fixture {
            conn,
            settings: IngestSettings::default(),
            merchant,
            customer,
            rice,
            shirt,
        }
    }

    fn stock_of(f: &Fixture, item: &Item, variant: Option<&str>) -> u32 {
        db::get_item(&f.conn, &f.merchant.id, &item.id)
            .unwrap()
            .unwrap()
            .available_stock(variant)
    }

    #[test]
    fn test_issue_receipt_decrements_stock() {
        let f = fixture();
        let payload = json!({
            "items": [
                { "name": "basmati rice", "qty": 2 },
                { "name": "Cotton Shirt", "variant": "L", "qty": 1 }
            ],
            "tax": 10.0
        });

        let outcome = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap();
        let receipt = &outcome.receipt;

        assert_eq!(receipt.status, ReceiptStatus::Issued);
        assert!(receipt.receipt_number.starts_with("GR-"));
        assert_eq!(receipt.subtotal, 790.0);
        assert_eq!(receipt.total, 800.0);
        assert_eq!(receipt.reconciliation.status, ReconciliationStatus::Balanced);
        assert_eq!(receipt.lines[0].category.as_deref(), Some("Groceries"));
        assert_eq!(receipt.merchant_name.as_deref(), Some("Ravi Stores"));

        assert_eq!(stock_of(&f, &f.rice, None), 8);
        assert_eq!(stock_of(&f, &f.shirt, Some("L")), 0);
        assert_eq!(receipt_events(&f.conn, &receipt.id).unwrap()[0].event_type, "receipt_issued");
    }

    #[test]
    fn test_issue_receipt_refuses_overselling() {
        let f = fixture();
        let payload = json!({ "items": [
            { "name": "Cotton Shirt", "variant": "M", "qty": 2 },
            { "name": "Cotton Shirt", "variant": "M", "qty": 1 }
        ]});

        let err = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(stock_of(&f, &f.shirt, Some("M")), 2);
        assert!(db::list_merchant_receipts(&f.conn, &f.merchant.id, DateRange::default()).unwrap().is_empty());
    }

    #[test]
    fn test_issue_receipt_huge_quantities() {
        let f = fixture();

        let oversized = json!({ "items": [
            { "item_id": f.rice.id, "qty": 1e19 },
            { "item_id": f.rice.id, "qty": 1e19 }
        ]});
        let err = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &oversized).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e[0].field == "items[0].quantity"));

        let repeated = json!({ "items": [
            { "item_id": f.rice.id, "qty": MAX_LINE_QUANTITY },
            { "item_id": f.rice.id, "qty": MAX_LINE_QUANTITY },
            { "name": "Basmati Rice", "qty": MAX_LINE_QUANTITY }
        ]});
        let err = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &repeated).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(stock_of(&f, &f.rice, None), 10);
    }

    #[test]
    fn test_issue_receipt_requires_variant() {
        let f = fixture();
        let payload = json!({ "items": [{ "name": "Cotton Shirt", "qty": 1 }] });
        let err = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e[0].field == "items[0].variant"));
    }

    #[test]
    fn test_issue_receipt_major_discrepancy_rejected() {
        let f = fixture();
        let payload = json!({ "items": [{ "name": "Basmati Rice", "qty": 1 }], "total": 500 });
        let err = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e[0].field == "total"));
    }

    #[test]
    fn test_customers_cannot_issue() {
        let f = fixture();
        let payload = json!({ "items": [{ "name": "Basmati Rice", "qty": 1 }] });
        let err = issue_receipt(&f.conn, &f.settings, &f.customer.id, &payload).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_scan_claims_issued_receipt() {
        let f = fixture();
        let payload = json!({ "items": [{ "name": "Basmati Rice", "qty": 1 }] });
        let issued = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap();

        let first = scan_receipt(&f.conn, &f.settings, &f.customer.id, &issued.qr_payload).unwrap();
        assert!(first.claimed_existing);
        assert_eq!(first.receipt.id, issued.receipt.id);
        assert_eq!(first.receipt.status, ReceiptStatus::Claimed);

        // Same customer again is a no-op
        let again = scan_receipt(&f.conn, &f.settings, &f.customer.id, &issued.qr_payload).unwrap();
        assert_eq!(again.receipt.customer_id.as_deref(), Some(f.customer.id.as_str()));

        let other = User::customer("Kiran", "kiran@example.com");
        db::insert_user(&f.conn, &other).unwrap();
        let err = scan_receipt(&f.conn, &f.settings, &other.id, &issued.qr_payload).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Stock moved once, at issue time
        assert_eq!(stock_of(&f, &f.rice, None), 9);
        let events = receipt_events(&f.conn, &issued.receipt.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "receipt_claimed");
    }

    #[test]
    fn test_scan_new_receipt_from_compact_qr() {
        let f = fixture();
        let qr = format!(
            "GR1|{}|POS-77|2026-03-14|240.00|{}",
            f.merchant.id,
            json!([{ "n": "Basmati Rice", "q": 2 }])
        );

        let outcome = scan_receipt(&f.conn, &f.settings, &f.customer.id, &qr).unwrap();
        assert!(!outcome.claimed_existing);
        assert_eq!(outcome.receipt.receipt_number, "POS-77");
        assert_eq!(outcome.receipt.source, ReceiptSource::Qr);
        assert_eq!(outcome.receipt.customer_id.as_deref(), Some(f.customer.id.as_str()));
        assert_eq!(outcome.receipt.total, 240.0);

        // Scanned receipts never touch stock
        assert_eq!(stock_of(&f, &f.rice, None), 10);
    }

    #[test]
    fn test_scan_unknown_merchant() {
        let f = fixture();
        let qr = json!({ "m": "nope", "r": "1", "t": 10 }).to_string();
        let err = scan_receipt(&f.conn, &f.settings, &f.customer.id, &qr).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e[0].field == "merchant_id"));
    }

    #[test]
    fn test_upload_unregistered_merchant_and_duplicates() {
        let f = fixture();
        let payload = json!({
            "merchant_name": "Corner Bakery",
            "receipt_number": "B-1",
            "date": "2026-03-01",
            "items": [{ "name": "Croissant", "qty": 2, "price": 45.0 }],
            "total": 90.0
        });

        let outcome = upload_receipt(&f.conn, &f.settings, &f.customer.id, &payload).unwrap();
        assert_eq!(outcome.receipt.merchant_id, "unregistered:corner-bakery");
        assert_eq!(outcome.receipt.status, ReceiptStatus::Claimed);
        assert!(!outcome.receipt.lines[0].matched);
        assert!(outcome.warnings.iter().any(|w| w.contains("not registered")));

        let err = upload_receipt(&f.conn, &f.settings, &f.customer.id, &payload).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_upload_resolves_merchant_by_shop_name() {
        let f = fixture();
        let payload = json!({
            "shop": "ravi stores",
            "items": [{ "name": "Basmati Rice", "qty": 1 }],
        });

        let outcome = upload_receipt(&f.conn, &f.settings, &f.customer.id, &payload).unwrap();
        assert_eq!(outcome.receipt.merchant_id, f.merchant.id);
        assert!(outcome.receipt.lines[0].matched);
        assert_eq!(outcome.receipt.lines[0].unit_price, 120.0);
    }

    #[test]
    fn test_upload_minor_discrepancy_is_kept() {
        let f = fixture();
        let payload = json!({
            "merchant_id": f.merchant.id,
            "items": [{ "name": "Basmati Rice", "qty": 1 }],
            "total": 125.0
        });

        let outcome = upload_receipt(&f.conn, &f.settings, &f.customer.id, &payload).unwrap();
        assert_eq!(outcome.receipt.reconciliation.status, ReconciliationStatus::MinorDiscrepancy);
        assert_eq!(outcome.receipt.total, 125.0);
    }

    #[test]
    fn test_void_restores_stock() {
        let f = fixture();
        let payload = json!({ "items": [
            { "name": "Basmati Rice", "qty": 1.5 },
            { "name": "Cotton Shirt", "variant": "M", "qty": 1 }
        ]});
        let issued = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap();
        assert_eq!(stock_of(&f, &f.rice, None), 8);

        let voided = void_receipt(&f.conn, &f.merchant.id, &issued.receipt.id, Some("customer returned")).unwrap();
        assert!(voided.is_void());
        assert_eq!(stock_of(&f, &f.rice, None), 10);
        assert_eq!(stock_of(&f, &f.shirt, Some("M")), 2);

        let again = void_receipt(&f.conn, &f.merchant.id, &issued.receipt.id, None).unwrap_err();
        assert!(matches!(again, AppError::Conflict(_)));

        // Voided receipts can't be claimed
        let err = scan_receipt(&f.conn, &f.settings, &f.customer.id, &issued.qr_payload).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_void_skips_deleted_items() {
        let f = fixture();
        let payload = json!({ "items": [{ "name": "Basmati Rice", "qty": 1 }] });
        let issued = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap();
        db::delete_item(&f.conn, &f.merchant.id, &f.rice.id).unwrap();

        assert!(void_receipt(&f.conn, &f.merchant.id, &issued.receipt.id, None).is_ok());
    }

    #[test]
    fn test_get_receipt_includes_qr() {
        let f = fixture();
        let payload = json!({ "items": [{ "name": "Basmati Rice", "qty": 1 }] });
        let issued = issue_receipt(&f.conn, &f.settings, &f.merchant.id, &payload).unwrap();

        let view = get_receipt(&f.conn, &issued.receipt.id).unwrap();
        assert_eq!(view.qr_payload, issued.qr_payload);
        assert!(matches!(get_receipt(&f.conn, "missing"), Err(AppError::NotFound { .. })));
    }
}
