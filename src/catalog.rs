// 🛍️ Catalog - merchant categories and items
//
// Categories form a tree per merchant, rooted in the global defaults.
// Items reference categories by name and carry their own stock.

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::info;

use crate::accounts::require_merchant;
use crate::config::IngestSettings;
use crate::db::{self, Event, ImportReport, StockChange};
use crate::entities::{
    category_path, would_create_cycle, Category, Discount, Item, ItemFilter, ItemVariant, Unit, MAX_STOCK,
};
use crate::error::{AppError, AppResult};
use crate::schema::SchemaValidator;

/// Distinguish "absent" (None) from "explicitly null" (Some(None)) in patches
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// CATEGORIES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NewCategory {
    pub merchant_id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryPatch {
    /// Acting merchant; must own the category
    pub merchant_id: String,
    pub name: Option<String>,
    /// null moves the category to the root
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub icon: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub color: Option<Option<String>>,
}

/// Category with its names from the root, e.g. ["Groceries", "Dairy"]
#[derive(Debug, Clone, Serialize)]
pub struct CategoryView {
    #[serde(flatten)]
    pub category: Category,
    pub path: Vec<String>,
}

pub fn list_categories(conn: &Connection, merchant_id: Option<&str>) -> AppResult<Vec<Category>> {
    Ok(db::list_categories(conn, merchant_id)?)
}

pub fn get_category(conn: &Connection, id: &str) -> AppResult<CategoryView> {
    let category = db::get_category(conn, id)?.ok_or_else(|| AppError::not_found("Category", id))?;
    let visible = db::list_categories(conn, category.merchant_id.as_deref())?;
    let path = category_path(&visible, &category.id);
    Ok(CategoryView { category, path })
}

fn check_parent(conn: &Connection, merchant_id: &str, parent_id: &str) -> AppResult<()> {
    match db::get_category(conn, parent_id)? {
        Some(parent) if parent.visible_to(Some(merchant_id)) => Ok(()),
        _ => Err(AppError::invalid(
            "parent_id",
            format!("Unknown category {parent_id}"),
            "Category",
        )),
    }
}

fn owned_category(conn: &Connection, merchant_id: &str, id: &str) -> AppResult<Category> {
    let category = db::get_category(conn, id)?.ok_or_else(|| AppError::not_found("Category", id))?;
    match category.merchant_id.as_deref() {
        Some(owner) if owner == merchant_id => Ok(category),
        Some(_) => Err(AppError::Forbidden("Category belongs to another merchant".into())),
        None => Err(AppError::Forbidden("Global categories are read-only".into())),
    }
}

pub fn create_category(conn: &Connection, input: NewCategory) -> AppResult<Category> {
    require_merchant(conn, &input.merchant_id)?;
    if let Some(parent_id) = &input.parent_id {
        check_parent(conn, &input.merchant_id, parent_id)?;
    }

    let mut category = Category::new(input.name, Some(input.merchant_id.clone()), input.parent_id);
    category.icon = input.icon;
    category.color = input.color;
    SchemaValidator::new().validate_category(&category)?;

    db::insert_category(conn, &category).map_err(|e| {
        AppError::conflict_on_unique(e, format!("Category '{}' already exists", category.name))
    })?;

    let event = Event::new(
        "category_created",
        "category",
        &category.id,
        serde_json::json!({ "name": category.name, "parent_id": category.parent_id }),
        &format!("merchant:{}", input.merchant_id),
    );
    db::insert_event(conn, &event)?;

    Ok(category)
}

pub fn update_category(conn: &Connection, id: &str, patch: CategoryPatch) -> AppResult<Category> {
    let mut category = owned_category(conn, &patch.merchant_id, id)?;

    if let Some(name) = &patch.name {
        category.rename(name);
    }
    if let Some(icon) = patch.icon {
        category.icon = icon;
    }
    if let Some(color) = patch.color {
        category.color = color;
    }
    if let Some(parent_id) = patch.parent_id {
        if let Some(parent) = &parent_id {
            check_parent(conn, &patch.merchant_id, parent)?;
            let visible = db::list_categories(conn, Some(&patch.merchant_id))?;
            if would_create_cycle(&visible, &category.id, parent) {
                return Err(AppError::invalid(
                    "parent_id",
                    "Category cannot be nested under itself or a descendant",
                    "Category",
                ));
            }
        }
        category.parent_id = parent_id;
    }

    SchemaValidator::new().validate_category(&category)?;

    db::update_category(conn, &category).map_err(|e| {
        AppError::conflict_on_unique(e, format!("Category '{}' already exists", category.name))
    })?;
    Ok(category)
}

pub fn delete_category(conn: &Connection, merchant_id: &str, id: &str) -> AppResult<()> {
    let category = owned_category(conn, merchant_id, id)?;

    let children = db::count_child_categories(conn, id)?;
    if children > 0 {
        return Err(AppError::Conflict(format!(
            "Category '{}' has {} subcategories",
            category.name, children
        )));
    }

    db::delete_category(conn, id)?;
    let event = Event::new(
        "category_deleted",
        "category",
        id,
        serde_json::json!({ "name": category.name }),
        &format!("merchant:{merchant_id}"),
    );
    db::insert_event(conn, &event)?;
    Ok(())
}

// ============================================================================
// ITEMS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub low_stock_threshold: Option<u32>,
    #[serde(default)]
    pub variants: Vec<ItemVariant>,
    #[serde(default)]
    pub discount: Option<Discount>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Partial item update; stock changes go through adjust_stock
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sku: Option<Option<String>>,
    pub unit: Option<Unit>,
    pub low_stock_threshold: Option<u32>,
    pub variants: Option<Vec<ItemVariant>>,
    #[serde(default, deserialize_with = "double_option")]
    pub discount: Option<Option<Discount>>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustment {
    pub delta: i64,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Resolve a category name to the canonical name of a visible category
fn resolve_category(conn: &Connection, merchant_id: &str, name: Option<String>) -> AppResult<Option<String>> {
    let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    let wanted = name.to_lowercase();
    db::list_categories(conn, Some(merchant_id))?
        .into_iter()
        .find(|c| c.name.to_lowercase() == wanted)
        .map(|c| Some(c.name))
        .ok_or_else(|| AppError::invalid("category", format!("Unknown category '{name}'"), "Item"))
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn item_conflict(item: &Item) -> String {
    match &item.sku {
        Some(sku) => format!("An item named '{}' or with sku '{}' already exists", item.name, sku),
        None => format!("An item named '{}' already exists", item.name),
    }
}

pub fn create_item(
    conn: &Connection,
    settings: &IngestSettings,
    merchant_id: &str,
    input: NewItem,
) -> AppResult<Item> {
    require_merchant(conn, merchant_id)?;

    let mut item = Item::new(merchant_id, input.name, input.price, input.stock);
    item.description = trimmed(input.description);
    item.category = resolve_category(conn, merchant_id, input.category)?;
    item.sku = trimmed(input.sku);
    item.unit = input.unit;
    item.low_stock_threshold = input.low_stock_threshold.unwrap_or(settings.low_stock_threshold);
    item.variants = input.variants;
    item.discount = input.discount;
    item.tags = input.tags;
    item.is_active = input.is_active.unwrap_or(true);

    SchemaValidator::new().validate_item(&item)?;

    db::insert_item(conn, &item).map_err(|e| AppError::conflict_on_unique(e, item_conflict(&item)))?;

    let event = Event::new(
        "item_created",
        "item",
        &item.id,
        serde_json::json!({ "name": item.name, "price": item.price, "stock": item.total_stock() }),
        &format!("merchant:{merchant_id}"),
    );
    db::insert_event(conn, &event)?;

    info!(merchant_id, item_id = %item.id, "item created");
    Ok(item)
}

pub fn get_item(conn: &Connection, merchant_id: &str, item_id: &str) -> AppResult<Item> {
    db::get_item(conn, merchant_id, item_id)?.ok_or_else(|| AppError::not_found("Item", item_id))
}

pub fn list_items(conn: &Connection, merchant_id: &str, filter: &ItemFilter) -> AppResult<Vec<Item>> {
    require_merchant(conn, merchant_id)?;
    Ok(db::list_items(conn, merchant_id, filter)?)
}

pub fn update_item(conn: &Connection, merchant_id: &str, item_id: &str, patch: ItemPatch) -> AppResult<Item> {
    let mut item = get_item(conn, merchant_id, item_id)?;

    if let Some(name) = patch.name {
        item.name = name.trim().to_string();
    }
    if let Some(price) = patch.price {
        item.price = crate::money::round2(price);
    }
    if let Some(description) = patch.description {
        item.description = trimmed(description);
    }
    if let Some(category) = patch.category {
        item.category = resolve_category(conn, merchant_id, category)?;
    }
    if let Some(sku) = patch.sku {
        item.sku = trimmed(sku);
    }
    if let Some(unit) = patch.unit {
        item.unit = unit;
    }
    if let Some(threshold) = patch.low_stock_threshold {
        item.low_stock_threshold = threshold;
    }
    if let Some(variants) = patch.variants {
        item.variants = variants;
    }
    if let Some(discount) = patch.discount {
        item.discount = discount;
    }
    if let Some(tags) = patch.tags {
        item.tags = tags;
    }
    if let Some(active) = patch.is_active {
        item.is_active = active;
    }

    SchemaValidator::new().validate_item(&item)?;
    item.updated_at = Utc::now();

    db::update_item(conn, &item).map_err(|e| AppError::conflict_on_unique(e, item_conflict(&item)))?;

    let event = Event::new(
        "item_updated",
        "item",
        &item.id,
        serde_json::json!({ "name": item.name, "price": item.price, "stock": item.total_stock() }),
        &format!("merchant:{merchant_id}"),
    );
    db::insert_event(conn, &event)?;
    Ok(item)
}

pub fn delete_item(conn: &Connection, merchant_id: &str, item_id: &str) -> AppResult<()> {
    let item = get_item(conn, merchant_id, item_id)?;
    db::delete_item(conn, merchant_id, item_id)?;

    let event = Event::new(
        "item_deleted",
        "item",
        item_id,
        serde_json::json!({ "name": item.name }),
        &format!("merchant:{merchant_id}"),
    );
    db::insert_event(conn, &event)?;
    Ok(())
}

/// Signed stock adjustment; refuses to go below zero
pub fn adjust_stock(
    conn: &Connection,
    merchant_id: &str,
    item_id: &str,
    adjustment: StockAdjustment,
) -> AppResult<Item> {
    let item = get_item(conn, merchant_id, item_id)?;

    let variant = match adjustment.variant.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(name) => Some(
            item.find_variant(name)
                .map(|v| v.name.clone())
                .ok_or_else(|| AppError::invalid("variant", format!("'{}' has no variant '{name}'", item.name), "Item"))?,
        ),
        None if !item.variants.is_empty() => {
            return Err(AppError::invalid("variant", format!("'{}' has variants; choose one", item.name), "Item"));
        }
        None => None,
    };

    if adjustment.delta == 0 {
        return Ok(item);
    }
    if adjustment.delta.unsigned_abs() > u64::from(MAX_STOCK) {
        return Err(AppError::invalid(
            "delta",
            format!("Must be between -{MAX_STOCK} and {MAX_STOCK}, got {}", adjustment.delta),
            "Item",
        ));
    }

    let change = StockChange {
        item_id: item.id.clone(),
        variant,
        delta: adjustment.delta,
    };
    let actor = match &adjustment.reason {
        Some(reason) => format!("merchant:{merchant_id} ({reason})"),
        None => format!("merchant:{merchant_id}"),
    };

    Ok(db::adjust_stock(conn, &change, &actor)?)
}

/// Bulk-load items for a merchant from CSV
pub fn import_items(conn: &Connection, merchant_id: &str, csv_path: &Path) -> AppResult<ImportReport> {
    require_merchant(conn, merchant_id)?;
    Ok(db::import_items_csv(conn, merchant_id, csv_path)?)
}
