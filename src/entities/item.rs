// 🛍️ Item Entity - merchant catalog entries
//
// Stored fields describe the item as the merchant entered it. Virtual fields
// (effective price, total stock, stock status) are derived at read time and
// never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::round2;

// ============================================================================
// UNIT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[default]
    Piece,
    Kg,
    G,
    L,
    Ml,
    Pack,
    Dozen,
    Box,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Piece => "piece",
            Unit::Kg => "kg",
            Unit::G => "g",
            Unit::L => "l",
            Unit::Ml => "ml",
            Unit::Pack => "pack",
            Unit::Dozen => "dozen",
            Unit::Box => "box",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "piece" | "pc" | "pcs" | "unit" => Some(Unit::Piece),
            "kg" | "kilogram" => Some(Unit::Kg),
            "g" | "gm" | "gram" => Some(Unit::G),
            "l" | "ltr" | "litre" | "liter" => Some(Unit::L),
            "ml" => Some(Unit::Ml),
            "pack" | "pkt" => Some(Unit::Pack),
            "dozen" | "dz" => Some(Unit::Dozen),
            "box" => Some(Unit::Box),
            _ => None,
        }
    }
}

// ============================================================================
// VARIANTS & DISCOUNTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemVariant {
    pub name: String,

    /// None = inherits the item's price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default)]
    pub stock: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub kind: DiscountKind,
    pub value: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl Discount {
    pub fn percentage(value: f64) -> Self {
        Discount {
            kind: DiscountKind::Percentage,
            value,
            starts_at: None,
            ends_at: None,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Discount {
            kind: DiscountKind::Fixed,
            value,
            starts_at: None,
            ends_at: None,
        }
    }

    /// Window is [starts_at, ends_at)
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.starts_at {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.ends_at {
            if now >= end {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, price: f64) -> f64 {
        let discounted = match self.kind {
            DiscountKind::Percentage => price * (1.0 - self.value / 100.0),
            DiscountKind::Fixed => price - self.value,
        };
        round2(discounted.max(0.0))
    }
}

// ============================================================================
// STOCK STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::OutOfStock => "out_of_stock",
        }
    }
}

// ============================================================================
// ITEM
// ============================================================================

pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 5;

/// Upper bound for one stock slot and for an item's total stock
pub const MAX_STOCK: u32 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub merchant_id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Category name (matches a Category visible to the merchant)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    pub price: f64,

    #[serde(default)]
    pub unit: Unit,

    #[serde(default)]
    pub stock: u32,

    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<ItemVariant>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<Discount>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_low_stock_threshold() -> u32 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

fn default_true() -> bool {
    true
}

impl Item {
    pub fn new(merchant_id: impl Into<String>, name: impl Into<String>, price: f64, stock: u32) -> Self {
        let now = Utc::now();
        Item {
            id: uuid::Uuid::new_v4().to_string(),
            merchant_id: merchant_id.into(),
            name: name.into().trim().to_string(),
            description: None,
            category: None,
            sku: None,
            price: round2(price),
            unit: Unit::Piece,
            stock,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            variants: Vec::new(),
            discount: None,
            tags: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn with_variant(mut self, variant: ItemVariant) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn with_discount(mut self, discount: Discount) -> Self {
        self.discount = Some(discount);
        self
    }

    // ========================================================================
    // VIRTUAL FIELDS
    // ========================================================================

    pub fn has_active_discount(&self, now: DateTime<Utc>) -> bool {
        self.discount.as_ref().is_some_and(|d| d.is_active_at(now))
    }

    /// Price after the discount active at `now`
    pub fn effective_price(&self, now: DateTime<Utc>) -> f64 {
        self.discounted(self.price, now)
    }

    /// Price of a variant after discount; unknown variant → item price
    pub fn effective_variant_price(&self, variant_name: &str, now: DateTime<Utc>) -> f64 {
        let base = self
            .find_variant(variant_name)
            .and_then(|v| v.price)
            .unwrap_or(self.price);
        self.discounted(base, now)
    }

    fn discounted(&self, price: f64, now: DateTime<Utc>) -> f64 {
        match &self.discount {
            Some(discount) if discount.is_active_at(now) => discount.apply(price),
            _ => round2(price),
        }
    }

    /// Sum of variant stock when variants exist, otherwise the item stock
    pub fn total_stock(&self) -> u32 {
        if self.variants.is_empty() {
            self.stock
        } else {
            self.variants.iter().fold(0u32, |sum, v| sum.saturating_add(v.stock))
        }
    }

    pub fn stock_status(&self) -> StockStatus {
        let total = self.total_stock();
        if total == 0 {
            StockStatus::OutOfStock
        } else if total <= self.low_stock_threshold {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    pub fn find_variant(&self, name: &str) -> Option<&ItemVariant> {
        let wanted = name.trim().to_lowercase();
        self.variants
            .iter()
            .find(|v| v.name.trim().to_lowercase() == wanted)
    }

    pub fn find_variant_mut(&mut self, name: &str) -> Option<&mut ItemVariant> {
        let wanted = name.trim().to_lowercase();
        self.variants
            .iter_mut()
            .find(|v| v.name.trim().to_lowercase() == wanted)
    }

    /// Stock available for a sale of this item (optionally a variant)
    pub fn available_stock(&self, variant: Option<&str>) -> u32 {
        match variant.and_then(|v| self.find_variant(v)) {
            Some(v) => v.stock,
            None => self.total_stock(),
        }
    }

    /// Response view with virtual fields evaluated at `now`
    pub fn view(&self, now: DateTime<Utc>) -> ItemView {
        ItemView {
            effective_price: self.effective_price(now),
            total_stock: self.total_stock(),
            stock_status: self.stock_status(),
            has_active_discount: self.has_active_discount(now),
            item: self.clone(),
        }
    }
}

/// Item plus derived fields, as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: Item,
    pub effective_price: f64,
    pub total_stock: u32,
    pub stock_status: StockStatus,
    pub has_active_discount: bool,
}

/// Catalog listing filters (query string of the items route)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    /// Category name, case-insensitive
    pub category: Option<String>,
    /// Substring of name, sku or tags
    pub search: Option<String>,
    #[serde(default)]
    pub in_stock_only: bool,
    #[serde(default)]
    pub include_inactive: bool,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        if !self.include_inactive && !item.is_active {
            return false;
        }
        if self.in_stock_only && item.total_stock() == 0 {
            return false;
        }
        if let Some(category) = self.category.as_deref().filter(|c| !c.trim().is_empty()) {
            let wanted = category.trim().to_lowercase();
            if item.category.as_deref().map(str::to_lowercase).as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let needle = search.trim().to_lowercase();
            let hit = item.name.to_lowercase().contains(&needle)
                || item.sku.as_deref().is_some_and(|s| s.to_lowercase().contains(&needle))
                || item.tags.iter().any(|t| t.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn variant(name: &str, price: Option<f64>, stock: u32) -> ItemVariant {
        ItemVariant {
            name: name.to_string(),
            price,
            stock,
            sku: None,
        }
    }

    #[test]
    fn test_item_creation_defaults() {
        let item = Item::new("m1", " Basmati Rice ", 120.456, 40);

        assert_eq!(item.name, "Basmati Rice");
        assert_eq!(item.price, 120.46);
        assert_eq!(item.unit, Unit::Piece);
        assert_eq!(item.low_stock_threshold, DEFAULT_LOW_STOCK_THRESHOLD);
        assert!(item.is_active);
    }

    #[test]
    fn test_effective_price_percentage_and_fixed() {
        let now = Utc::now();

        let pct = Item::new("m1", "Soap", 40.0, 10).with_discount(Discount::percentage(25.0));
        assert_eq!(pct.effective_price(now), 30.0);

        let fixed = Item::new("m1", "Soap", 40.0, 10).with_discount(Discount::fixed(55.0));
        assert_eq!(fixed.effective_price(now), 0.0, "clamped at zero");

        let none = Item::new("m1", "Soap", 40.0, 10);
        assert_eq!(none.effective_price(now), 40.0);
    }

    #[test]
    fn test_discount_window() {
        let now = Utc::now();
        let mut discount = Discount::percentage(10.0);
        discount.starts_at = Some(now + Duration::days(1));

        let item = Item::new("m1", "Tea", 100.0, 10).with_discount(discount.clone());
        assert!(!item.has_active_discount(now));
        assert_eq!(item.effective_price(now), 100.0);
        assert_eq!(item.effective_price(now + Duration::days(2)), 90.0);

        discount.starts_at = None;
        discount.ends_at = Some(now);
        assert!(!discount.is_active_at(now), "end is exclusive");
        assert!(discount.is_active_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_stock_status() {
        let mut item = Item::new("m1", "Milk", 30.0, 0);
        assert_eq!(item.stock_status(), StockStatus::OutOfStock);

        item.stock = 5;
        assert_eq!(item.stock_status(), StockStatus::LowStock);

        item.stock = 6;
        assert_eq!(item.stock_status(), StockStatus::InStock);
    }

    #[test]
    fn test_variants_drive_total_stock_and_price() {
        let now = Utc::now();
        let item = Item::new("m1", "T-Shirt", 300.0, 999)
            .with_variant(variant("S", None, 2))
            .with_variant(variant("XL", Some(350.0), 1))
            .with_discount(Discount::percentage(10.0));

        assert_eq!(item.total_stock(), 3, "item stock ignored when variants exist");
        assert_eq!(item.stock_status(), StockStatus::LowStock);
        assert_eq!(item.effective_variant_price("xl", now), 315.0);
        assert_eq!(item.effective_variant_price("S", now), 270.0);
        assert_eq!(item.effective_variant_price("missing", now), 270.0);
        assert_eq!(item.available_stock(Some("XL")), 1);
        assert_eq!(item.available_stock(None), 3);
    }

    #[test]
    fn test_total_stock_saturates() {
        let item = Item::new("m1", "Kurta", 499.0, 0)
            .with_variant(variant("S", None, 3_000_000_000))
            .with_variant(variant("M", None, 3_000_000_000));

        assert_eq!(item.total_stock(), u32::MAX);
        assert_eq!(item.stock_status(), StockStatus::InStock);
    }

    #[test]
    fn test_view_serializes_virtual_fields() {
        let item = Item::new("m1", "Bread", 45.0, 2);
        let json = serde_json::to_value(item.view(Utc::now())).unwrap();

        assert_eq!(json["name"], "Bread");
        assert_eq!(json["effective_price"], 45.0);
        assert_eq!(json["total_stock"], 2);
        assert_eq!(json["stock_status"], "low_stock");
        assert_eq!(json["has_active_discount"], false);
    }

    #[test]
    fn test_item_filter() {
        let mut tea = Item::new("m1", "Green Tea", 90.0, 0).with_category("Groceries");
        tea.tags = vec!["organic".to_string()];
        let mut hidden = Item::new("m1", "Old Tea", 50.0, 4);
        hidden.is_active = false;

        let all = ItemFilter::default();
        assert!(all.matches(&tea));
        assert!(!all.matches(&hidden));

        let stocked = ItemFilter { in_stock_only: true, ..Default::default() };
        assert!(!stocked.matches(&tea));

        let by_tag = ItemFilter { search: Some("ORGANIC".into()), ..Default::default() };
        assert!(by_tag.matches(&tea));

        let by_category = ItemFilter { category: Some("groceries".into()), ..Default::default() };
        assert!(by_category.matches(&tea));

        let inactive = ItemFilter { include_inactive: true, search: Some("old".into()), ..Default::default() };
        assert!(inactive.matches(&hidden));
    }

    #[test]
    fn test_unit_parse() {
        assert_eq!(Unit::parse("KG"), Some(Unit::Kg));
        assert_eq!(Unit::parse(""), Some(Unit::Piece));
        assert_eq!(Unit::parse("litre"), Some(Unit::L));
        assert_eq!(Unit::parse("bushel"), None);
    }
}
