// 🗄️ Document Store - SQLite tables holding JSON documents
//
// Each entity table has:
// - an id primary key
// - a few indexed lookup columns (unique indexes enforce the invariants)
// - a `doc` column with the full serde_json document
//
// Every write that matters goes into the events table (audit trail).

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::entities::{
    default_categories, Category, Item, ItemFilter, Receipt, Unit, User, UserRole, MAX_STOCK,
};
use crate::money::parse_amount;
use crate::schema::SchemaValidator;

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// A sale or adjustment would take stock below zero
#[derive(Debug, thiserror::Error)]
#[error("Insufficient stock for '{item}': {available} available, {requested} requested")]
pub struct InsufficientStock {
    pub item_id: String,
    pub item: String,
    pub available: u32,
    pub requested: u32,
}

/// An adjustment would push stock past MAX_STOCK (or overflow)
#[derive(Debug, thiserror::Error)]
#[error("Stock for '{item}' would exceed {max} units")]
pub struct StockLimitExceeded {
    pub item_id: String,
    pub item: String,
    pub max: u32,
}

/// True when the error chain holds a UNIQUE/constraint violation
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// SETUP
// ============================================================================

pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            shop_name_lower TEXT,
            doc TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            merchant_id TEXT,
            slug TEXT NOT NULL,
            parent_id TEXT,
            doc TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            merchant_id TEXT NOT NULL,
            name_lower TEXT NOT NULL,
            sku TEXT,
            doc TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY,
            merchant_id TEXT NOT NULL,
            receipt_key TEXT NOT NULL,
            customer_id TEXT,
            status TEXT NOT NULL,
            fingerprint TEXT NOT NULL UNIQUE,
            transaction_date TEXT NOT NULL,
            doc TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_users_shop ON users(shop_name_lower);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_owner_slug
            ON categories(COALESCE(merchant_id, ''), slug);
        CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_items_merchant_name ON items(merchant_id, name_lower);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_items_merchant_sku
            ON items(merchant_id, sku) WHERE sku IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_receipts_merchant_number
            ON receipts(merchant_id, receipt_key);
        CREATE INDEX IF NOT EXISTS idx_receipts_customer ON receipts(customer_id, transaction_date);
        CREATE INDEX IF NOT EXISTS idx_receipts_merchant_date ON receipts(merchant_id, transaction_date);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )?;

    seed_default_categories(conn)?;

    Ok(())
}

/// Insert the global root categories once
fn seed_default_categories(conn: &Connection) -> Result<usize> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE merchant_id IS NULL",
        [],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Ok(0);
    }

    let defaults = default_categories();
    for category in &defaults {
        insert_category(conn, category)?;
    }
    info!(count = defaults.len(), "seeded default categories");
    Ok(defaults.len())
}

// ============================================================================
// DOCUMENT HELPERS
// ============================================================================

/// Fixed-width UTC timestamps so TEXT comparison orders correctly
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_doc<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize document")
}

fn from_doc<T: DeserializeOwned>(doc: &str) -> Result<T> {
    serde_json::from_str(doc).context("Failed to deserialize document")
}

fn query_docs<T: DeserializeOwned, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let docs = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    docs.iter().map(|doc| from_doc(doc)).collect()
}

fn query_doc<T: DeserializeOwned, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<T>> {
    let doc: Option<String> = conn
        .query_row(sql, params, |row| row.get(0))
        .optional()?;

    doc.map(|d| from_doc(&d)).transpose()
}

// ============================================================================
// USERS
// ============================================================================

fn shop_key(user: &User) -> Option<String> {
    user.shop.as_ref().map(|s| s.shop_name.trim().to_lowercase())
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, role, shop_name_lower, doc, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.email,
            user.role.as_str(),
            shop_key(user),
            to_doc(user)?,
            timestamp(user.created_at),
        ],
    )?;
    Ok(())
}

pub fn update_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "UPDATE users SET email = ?2, role = ?3, shop_name_lower = ?4, doc = ?5 WHERE id = ?1",
        params![user.id, user.email, user.role.as_str(), shop_key(user), to_doc(user)?],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_doc(conn, "SELECT doc FROM users WHERE id = ?1", params![id])
}

pub fn list_merchants(conn: &Connection) -> Result<Vec<User>> {
    query_docs(
        conn,
        "SELECT doc FROM users WHERE role = ?1 ORDER BY shop_name_lower",
        params![UserRole::Merchant.as_str()],
    )
}

/// Case-insensitive exact match on the shop name
pub fn find_merchant_by_shop_name(conn: &Connection, shop_name: &str) -> Result<Option<User>> {
    query_doc(
        conn,
        "SELECT doc FROM users WHERE role = ?1 AND shop_name_lower = ?2 LIMIT 1",
        params![UserRole::Merchant.as_str(), shop_name.trim().to_lowercase()],
    )
}

// ============================================================================
// CATEGORIES
// ============================================================================

pub fn insert_category(conn: &Connection, category: &Category) -> Result<()> {
    conn.execute(
        "INSERT INTO categories (id, merchant_id, slug, parent_id, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            category.id,
            category.merchant_id,
            category.slug,
            category.parent_id,
            to_doc(category)?,
        ],
    )?;
    Ok(())
}

pub fn update_category(conn: &Connection, category: &Category) -> Result<()> {
    conn.execute(
        "UPDATE categories SET slug = ?2, parent_id = ?3, doc = ?4 WHERE id = ?1",
        params![category.id, category.slug, category.parent_id, to_doc(category)?],
    )?;
    Ok(())
}

pub fn get_category(conn: &Connection, id: &str) -> Result<Option<Category>> {
    query_doc(conn, "SELECT doc FROM categories WHERE id = ?1", params![id])
}

/// Global categories plus the merchant's own (globals only when None)
pub fn list_categories(conn: &Connection, merchant_id: Option<&str>) -> Result<Vec<Category>> {
    let mut categories: Vec<Category> = query_docs(
        conn,
        "SELECT doc FROM categories WHERE merchant_id IS NULL OR merchant_id = ?1",
        params![merchant_id],
    )?;
    categories.sort_by(|a, b| {
        (a.merchant_id.is_some(), a.name.to_lowercase()).cmp(&(b.merchant_id.is_some(), b.name.to_lowercase()))
    });
    Ok(categories)
}

pub fn count_child_categories(conn: &Connection, id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE parent_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn delete_category(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ============================================================================
// ITEMS
// ============================================================================

fn item_sku_key(item: &Item) -> Option<String> {
    item.sku.as_ref().map(|s| s.trim().to_uppercase())
}

pub fn insert_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "INSERT INTO items (id, merchant_id, name_lower, sku, doc, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.id,
            item.merchant_id,
            item.name.trim().to_lowercase(),
            item_sku_key(item),
            to_doc(item)?,
            timestamp(item.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "UPDATE items SET name_lower = ?2, sku = ?3, doc = ?4, updated_at = ?5 WHERE id = ?1",
        params![
            item.id,
            item.name.trim().to_lowercase(),
            item_sku_key(item),
            to_doc(item)?,
            timestamp(item.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_item(conn: &Connection, merchant_id: &str, id: &str) -> Result<Option<Item>> {
    query_doc(
        conn,
        "SELECT doc FROM items WHERE merchant_id = ?1 AND id = ?2",
        params![merchant_id, id],
    )
}

/// Every item of a merchant, active or not, ordered by name
pub fn get_merchant_items(conn: &Connection, merchant_id: &str) -> Result<Vec<Item>> {
    query_docs(
        conn,
        "SELECT doc FROM items WHERE merchant_id = ?1 ORDER BY name_lower",
        params![merchant_id],
    )
}

pub fn list_items(conn: &Connection, merchant_id: &str, filter: &ItemFilter) -> Result<Vec<Item>> {
    let items = get_merchant_items(conn, merchant_id)?;
    Ok(items.into_iter().filter(|item| filter.matches(item)).collect())
}

pub fn delete_item(conn: &Connection, merchant_id: &str, id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM items WHERE merchant_id = ?1 AND id = ?2",
        params![merchant_id, id],
    )?;
    Ok(deleted > 0)
}

/// Signed stock change for an item or one of its variants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockChange {
    pub item_id: String,
    pub variant: Option<String>,
    pub delta: i64,
}

/// Apply one stock change; fails with InsufficientStock below zero
fn apply_stock_change(conn: &Connection, change: &StockChange) -> Result<Item> {
    let mut item: Item = query_doc(conn, "SELECT doc FROM items WHERE id = ?1", params![change.item_id])?
        .with_context(|| format!("Item not found: {}", change.item_id))?;

    let label = item.name.clone();
    let has_variants = !item.variants.is_empty();
    let slot = match change.variant.as_deref() {
        Some(name) => match item.find_variant_mut(name) {
            Some(variant) => &mut variant.stock,
            None => anyhow::bail!("'{}' has no variant '{}'", label, name),
        },
        // Variant stock is authoritative when variants exist
        None if has_variants => anyhow::bail!("'{}' has variants; choose one to adjust", label),
        None => &mut item.stock,
    };

    let over_limit = || StockLimitExceeded {
        item_id: change.item_id.clone(),
        item: label.clone(),
        max: MAX_STOCK,
    };
    let next = i64::from(*slot).checked_add(change.delta).ok_or_else(over_limit)?;
    if next < 0 {
        return Err(InsufficientStock {
            item_id: change.item_id.clone(),
            item: label.clone(),
            available: *slot,
            requested: u32::try_from(change.delta.unsigned_abs()).unwrap_or(u32::MAX),
        }
        .into());
    }
    *slot = u32::try_from(next)
        .ok()
        .filter(|stock| *stock <= MAX_STOCK)
        .ok_or_else(over_limit)?;

    let total: u64 = item.variants.iter().map(|v| u64::from(v.stock)).sum();
    if total > u64::from(MAX_STOCK) {
        return Err(over_limit().into());
    }

    item.updated_at = Utc::now();
    update_item(conn, &item)?;
    debug!(item_id = %item.id, delta = change.delta, "stock adjusted");
    Ok(item)
}

/// Adjust stock atomically, returning the updated item
pub fn adjust_stock(conn: &Connection, change: &StockChange, actor: &str) -> Result<Item> {
    let tx = conn.unchecked_transaction()?;
    let item = apply_stock_change(&tx, change)?;
    insert_event(
        &tx,
        &Event::new(
            "stock_adjusted",
            "item",
            &item.id,
            serde_json::json!({ "variant": change.variant, "delta": change.delta, "total_stock": item.total_stock() }),
            actor,
        ),
    )?;
    tx.commit()?;
    Ok(item)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// name,price,stock,unit,category,sku,description
#[derive(Debug, Deserialize)]
struct ItemRow {
    name: String,
    price: String,
    #[serde(default)]
    stock: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub duplicates: usize,
    /// (CSV line number, reason)
    pub rejected: Vec<(usize, String)>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn row_to_item(merchant_id: &str, row: ItemRow) -> std::result::Result<Item, String> {
    let price = parse_amount(&row.price)?;
    let stock = match non_empty(row.stock) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| format!("Stock must be a whole number >= 0, got {raw:?}"))?,
        None => 0,
    };

    let mut item = Item::new(merchant_id, row.name, price, stock);
    if let Some(raw) = non_empty(row.unit) {
        item.unit = Unit::parse(&raw).ok_or_else(|| format!("Unknown unit {raw:?}"))?;
    }
    item.category = non_empty(row.category);
    item.sku = non_empty(row.sku);
    item.description = non_empty(row.description);
    Ok(item)
}

/// Bulk-load catalog items; invalid rows are reported and skipped,
/// duplicates (name or sku) are counted and skipped
pub fn import_items_csv(conn: &Connection, merchant_id: &str, csv_path: &Path) -> Result<ImportReport> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {}", csv_path.display()))?;

    let validator = SchemaValidator::new();
    let mut report = ImportReport::default();

    for (index, result) in rdr.deserialize::<ItemRow>().enumerate() {
        // +2: 1-indexed plus the header row
        let line = index + 2;

        let item = match result.map_err(|e| e.to_string()).and_then(|row| row_to_item(merchant_id, row)) {
            Ok(item) => item,
            Err(reason) => {
                warn!(line, %reason, "skipping CSV row");
                report.rejected.push((line, reason));
                continue;
            }
        };

        if let Err(errors) = validator.validate_item(&item) {
            let reason = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            warn!(line, %reason, "skipping invalid item");
            report.rejected.push((line, reason));
            continue;
        }

        match insert_item(conn, &item) {
            Ok(()) => {
                report.inserted += 1;
                let event = Event::new(
                    "item_imported",
                    "item",
                    &item.id,
                    serde_json::json!({ "name": item.name, "price": item.price, "source_file": csv_path.display().to_string() }),
                    "csv_importer",
                );
                if let Err(e) = insert_event(conn, &event) {
                    warn!(line, item_id = %item.id, error = %e, "failed to record import event");
                }
            }
            Err(e) if is_unique_violation(&e) => report.duplicates += 1,
            Err(e) => return Err(e),
        }
    }

    info!(
        merchant_id,
        inserted = report.inserted,
        duplicates = report.duplicates,
        rejected = report.rejected.len(),
        "CSV import finished"
    );
    Ok(report)
}

// ============================================================================
// RECEIPTS
// ============================================================================

/// Optional inclusive date window on transaction_date
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }

    fn bounds(&self) -> (String, String) {
        (
            self.from.map(timestamp).unwrap_or_default(),
            self.to.map(timestamp).unwrap_or_else(|| "9999".to_string()),
        )
    }
}

fn receipt_key(receipt_number: &str) -> String {
    receipt_number.trim().to_uppercase()
}

/// Insert a receipt and apply stock changes in one transaction
pub fn insert_receipt(conn: &Connection, receipt: &Receipt, stock: &[StockChange]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO receipts (id, merchant_id, receipt_key, customer_id, status, fingerprint, transaction_date, doc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            receipt.id,
            receipt.merchant_id,
            receipt_key(&receipt.receipt_number),
            receipt.customer_id,
            receipt.status.as_str(),
            receipt.fingerprint,
            timestamp(receipt.transaction_date),
            to_doc(receipt)?,
        ],
    )?;

    for change in stock {
        apply_stock_change(&tx, change)?;
    }

    tx.commit()?;
    Ok(())
}

/// Rewrite a receipt (claim, void) and apply stock changes in one transaction
pub fn update_receipt(conn: &Connection, receipt: &Receipt, stock: &[StockChange]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    let updated = tx.execute(
        "UPDATE receipts SET customer_id = ?2, status = ?3, doc = ?4 WHERE id = ?1",
        params![receipt.id, receipt.customer_id, receipt.status.as_str(), to_doc(receipt)?],
    )?;
    if updated == 0 {
        anyhow::bail!("Receipt not found: {}", receipt.id);
    }

    for change in stock {
        apply_stock_change(&tx, change)?;
    }

    tx.commit()?;
    Ok(())
}

pub fn get_receipt(conn: &Connection, id: &str) -> Result<Option<Receipt>> {
    query_doc(conn, "SELECT doc FROM receipts WHERE id = ?1", params![id])
}

pub fn find_receipt_by_number(conn: &Connection, merchant_id: &str, receipt_number: &str) -> Result<Option<Receipt>> {
    query_doc(
        conn,
        "SELECT doc FROM receipts WHERE merchant_id = ?1 AND receipt_key = ?2",
        params![merchant_id, receipt_key(receipt_number)],
    )
}

pub fn find_receipt_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<Receipt>> {
    query_doc(conn, "SELECT doc FROM receipts WHERE fingerprint = ?1", params![fingerprint])
}

/// Newest first
pub fn list_customer_receipts(conn: &Connection, customer_id: &str, range: DateRange) -> Result<Vec<Receipt>> {
    let (from, to) = range.bounds();
    query_docs(
        conn,
        "SELECT doc FROM receipts
         WHERE customer_id = ?1 AND transaction_date >= ?2 AND transaction_date <= ?3
         ORDER BY transaction_date DESC",
        params![customer_id, from, to],
    )
}

/// Newest first
pub fn list_merchant_receipts(conn: &Connection, merchant_id: &str, range: DateRange) -> Result<Vec<Receipt>> {
    let (from, to) = range.bounds();
    query_docs(
        conn,
        "SELECT doc FROM receipts
         WHERE merchant_id = ?1 AND transaction_date >= ?2 AND transaction_date <= ?3
         ORDER BY transaction_date DESC",
        params![merchant_id, from, to],
    )
}

// ============================================================================
// EVENT STORE
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            timestamp(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ItemVariant, PaymentMethod, ReceiptSource, ReceiptStatus, ShopProfile};
    use crate::reconciliation::ReconciliationSummary;
    use chrono::TimeZone;
    use std::io::Write;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn receipt(merchant_id: &str, number: &str, total: f64) -> Receipt {
        let date = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        let now = Utc::now();
        let mut r = Receipt {
            id: uuid::Uuid::new_v4().to_string(),
            receipt_number: number.to_string(),
            merchant_id: merchant_id.to_string(),
            merchant_name: None,
            customer_id: None,
            source: ReceiptSource::Manual,
            lines: Vec::new(),
            subtotal: total,
            discount: 0.0,
            tax: 0.0,
            total,
            currency: "INR".to_string(),
            payment_method: PaymentMethod::Cash,
            transaction_date: date,
            status: ReceiptStatus::Issued,
            notes: None,
            fingerprint: String::new(),
            reconciliation: ReconciliationSummary::default(),
            created_at: now,
            updated_at: now,
        };
        r.fingerprint = r.compute_fingerprint();
        r
    }

    #[test]
    fn test_setup_is_idempotent_and_seeds_once() {
        let conn = test_db();
        setup_database(&conn).unwrap();

        let globals = list_categories(&conn, None).unwrap();
        assert_eq!(globals.len(), 8);
    }

    #[test]
    fn test_user_email_unique() {
        let conn = test_db();
        let a = User::customer("Asha", "asha@example.com");
        let b = User::customer("Other Asha", "ASHA@example.com");

        insert_user(&conn, &a).unwrap();
        let err = insert_user(&conn, &b).unwrap_err();
        assert!(is_unique_violation(&err));

        assert_eq!(get_user(&conn, &a.id).unwrap().unwrap().name, "Asha");
        assert!(get_user(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_find_merchant_by_shop_name() {
        let conn = test_db();
        let merchant = User::merchant("Ravi", "ravi@shop.in", ShopProfile::new("Ravi Stores"));
        insert_user(&conn, &merchant).unwrap();
        insert_user(&conn, &User::customer("Asha", "asha@example.com")).unwrap();

        let found = find_merchant_by_shop_name(&conn, "  ravi STORES ").unwrap().unwrap();
        assert_eq!(found.id, merchant.id);
        assert_eq!(list_merchants(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_category_slug_unique_per_owner() {
        let conn = test_db();

        let own = Category::new("Dairy", Some("m1".into()), None);
        insert_category(&conn, &own).unwrap();

        let other_owner = Category::new("Dairy", Some("m2".into()), None);
        insert_category(&conn, &other_owner).unwrap();

        let dup = Category::new("dairy", Some("m1".into()), None);
        assert!(is_unique_violation(&insert_category(&conn, &dup).unwrap_err()));

        let global_dup = Category::new("Groceries", None, None);
        assert!(is_unique_violation(&insert_category(&conn, &global_dup).unwrap_err()));

        let visible = list_categories(&conn, Some("m1")).unwrap();
        assert_eq!(visible.len(), 9);
        assert_eq!(visible.last().unwrap().name, "Dairy");
    }

    #[test]
    fn test_item_name_and_sku_unique_per_merchant() {
        let conn = test_db();
        insert_item(&conn, &Item::new("m1", "Tea", 10.0, 1).with_sku("T-1")).unwrap();

        let same_name = Item::new("m1", "TEA", 12.0, 1);
        assert!(is_unique_violation(&insert_item(&conn, &same_name).unwrap_err()));

        let same_sku = Item::new("m1", "Green Tea", 12.0, 1).with_sku("t-1");
        assert!(is_unique_violation(&insert_item(&conn, &same_sku).unwrap_err()));

        // Other merchants and sku-less items are fine
        insert_item(&conn, &Item::new("m2", "Tea", 10.0, 1).with_sku("T-1")).unwrap();
        insert_item(&conn, &Item::new("m1", "Coffee", 10.0, 1)).unwrap();
        insert_item(&conn, &Item::new("m1", "Cocoa", 10.0, 1)).unwrap();

        let names: Vec<String> = get_merchant_items(&conn, "m1").unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Cocoa", "Coffee", "Tea"]);
    }

    #[test]
    fn test_adjust_stock_refuses_negative() {
        let conn = test_db();
        let item = Item::new("m1", "Milk", 30.0, 2);
        insert_item(&conn, &item).unwrap();

        let change = StockChange { item_id: item.id.clone(), variant: None, delta: 5 };
        assert_eq!(adjust_stock(&conn, &change, "test").unwrap().stock, 7);

        let too_many = StockChange { item_id: item.id.clone(), variant: None, delta: -8 };
        let err = adjust_stock(&conn, &too_many, "test").unwrap_err();
        let shortfall = err.downcast_ref::<InsufficientStock>().unwrap();
        assert_eq!((shortfall.available, shortfall.requested), (7, 8));

        assert_eq!(get_item(&conn, "m1", &item.id).unwrap().unwrap().stock, 7);
        assert_eq!(get_events_for_entity(&conn, "item", &item.id).unwrap().len(), 1);
    }

    #[test]
    fn test_adjust_stock_limits() {
        let conn = test_db();
        let item = Item::new("m1", "Rice", 60.0, 1);
        insert_item(&conn, &item).unwrap();

        for delta in [i64::MAX, i64::from(MAX_STOCK)] {
            let change = StockChange { item_id: item.id.clone(), variant: None, delta };
            let err = adjust_stock(&conn, &change, "test").unwrap_err();
            assert!(err.downcast_ref::<StockLimitExceeded>().is_some(), "delta {delta}");
        }

        let drain = StockChange { item_id: item.id.clone(), variant: None, delta: i64::MIN };
        let err = adjust_stock(&conn, &drain, "test").unwrap_err();
        let shortfall = err.downcast_ref::<InsufficientStock>().unwrap();
        assert_eq!(shortfall.requested, u32::MAX);

        assert_eq!(get_item(&conn, "m1", &item.id).unwrap().unwrap().stock, 1);
    }

    #[test]
    fn test_variant_stock_total_limit() {
        let conn = test_db();
        let item = Item::new("m1", "Kurta", 499.0, 0)
            .with_variant(ItemVariant { name: "S".into(), price: None, stock: MAX_STOCK - 10, sku: None })
            .with_variant(ItemVariant { name: "M".into(), price: None, stock: 5, sku: None });
        insert_item(&conn, &item).unwrap();

        let change = StockChange { item_id: item.id.clone(), variant: Some("M".into()), delta: 10 };
        let err = adjust_stock(&conn, &change, "test").unwrap_err();
        assert!(err.downcast_ref::<StockLimitExceeded>().is_some());

        let fits = StockChange { item_id: item.id.clone(), variant: Some("M".into()), delta: 5 };
        assert_eq!(adjust_stock(&conn, &fits, "test").unwrap().total_stock(), MAX_STOCK);
    }

    #[test]
    fn test_variant_stock() {
        let conn = test_db();
        let item = Item::new("m1", "Shirt", 300.0, 0).with_variant(ItemVariant {
            name: "M".into(),
            price: None,
            stock: 3,
            sku: None,
        });
        insert_item(&conn, &item).unwrap();

        let change = StockChange { item_id: item.id.clone(), variant: Some("m".into()), delta: -2 };
        let updated = adjust_stock(&conn, &change, "test").unwrap();
        assert_eq!(updated.variants[0].stock, 1);

        let no_variant = StockChange { item_id: item.id.clone(), variant: None, delta: 1 };
        assert!(adjust_stock(&conn, &no_variant, "test").is_err());
    }

    #[test]
    fn test_receipt_insert_rolls_back_on_stock_failure() {
        let conn = test_db();
        let item = Item::new("m1", "Milk", 30.0, 1);
        insert_item(&conn, &item).unwrap();

        let r = receipt("m1", "GR-1", 60.0);
        let sale = [StockChange { item_id: item.id.clone(), variant: None, delta: -2 }];
        let err = insert_receipt(&conn, &r, &sale).unwrap_err();
        assert!(err.downcast_ref::<InsufficientStock>().is_some());

        assert!(get_receipt(&conn, &r.id).unwrap().is_none(), "receipt rolled back");
        assert_eq!(get_item(&conn, "m1", &item.id).unwrap().unwrap().stock, 1);

        let sale = [StockChange { item_id: item.id.clone(), variant: None, delta: -1 }];
        insert_receipt(&conn, &r, &sale).unwrap();
        assert_eq!(get_item(&conn, "m1", &item.id).unwrap().unwrap().stock, 0);
    }

    #[test]
    fn test_receipt_number_and_fingerprint_unique() {
        let conn = test_db();
        insert_receipt(&conn, &receipt("m1", "gr-1", 10.0), &[]).unwrap();

        let same_number = receipt("m1", "GR-1", 20.0);
        assert!(is_unique_violation(&insert_receipt(&conn, &same_number, &[]).unwrap_err()));

        insert_receipt(&conn, &receipt("m2", "GR-1", 10.0), &[]).unwrap();

        let found = find_receipt_by_number(&conn, "m1", "Gr-1").unwrap().unwrap();
        assert_eq!(found.total, 10.0);
        assert!(find_receipt_by_fingerprint(&conn, &found.fingerprint).unwrap().is_some());
    }

    #[test]
    fn test_receipt_lists_by_range() {
        let conn = test_db();
        let mut early = receipt("m1", "A", 10.0);
        early.customer_id = Some("c1".into());
        early.transaction_date = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        early.fingerprint = early.compute_fingerprint();

        let mut late = receipt("m1", "B", 20.0);
        late.customer_id = Some("c1".into());
        late.transaction_date = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        late.fingerprint = late.compute_fingerprint();

        insert_receipt(&conn, &early, &[]).unwrap();
        insert_receipt(&conn, &late, &[]).unwrap();

        let all = list_customer_receipts(&conn, "c1", DateRange::default()).unwrap();
        assert_eq!(all.iter().map(|r| r.receipt_number.as_str()).collect::<Vec<_>>(), vec!["B", "A"]);

        let range = DateRange {
            from: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            to: None,
        };
        assert_eq!(list_merchant_receipts(&conn, "m1", range).unwrap().len(), 1);
        assert!(range.contains(late.transaction_date));
        assert!(!range.contains(early.transaction_date));
    }

    #[test]
    fn test_import_items_csv() {
        let conn = test_db();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,price,stock,unit,category,sku,description").unwrap();
        writeln!(file, "Basmati Rice,\"₹1,200.00\",10,kg,Groceries,RICE-5,5kg bag").unwrap();
        writeln!(file, "Green Tea,90,4,,,,").unwrap();
        writeln!(file, "green tea,95,1,,,,").unwrap();
        writeln!(file, "Broken,abc,1,,,,").unwrap();
        writeln!(file, "Odd Unit,5,1,bushel,,,").unwrap();
        writeln!(file, "Free Sample,-1,1,,,,").unwrap();
        file.flush().unwrap();

        let report = import_items_csv(&conn, "m1", file.path()).unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 1);
        let lines: Vec<usize> = report.rejected.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![5, 6, 7]);

        let items = get_merchant_items(&conn, "m1").unwrap();
        let rice = items.iter().find(|i| i.name == "Basmati Rice").unwrap();
        assert_eq!(rice.price, 1200.0);
        assert_eq!(rice.unit, Unit::Kg);
        assert_eq!(rice.sku.as_deref(), Some("RICE-5"));
        assert_eq!(rice.description.as_deref(), Some("5kg bag"));
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "receipt_issued",
            "receipt",
            "r-123",
            serde_json::json!({"total": 10.0}),
            "merchant:m1",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "receipt", "r-123").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "receipt_issued");
        assert_eq!(events[0].actor, "merchant:m1");
    }
}
