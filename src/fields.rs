// 🏛️ Field Registry - canonical receipt fields and their aliases
//
// QR codes, OCR uploads and POS exports all describe the same receipt with
// different key names ("t", "total", "grandTotal", ...). Each canonical field
// is declared once with its aliases; payloads are resolved against it before
// any coercion happens.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// FIELD TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Decimal,
    Date,
    List,
}

/// Which object the field lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldScope {
    Receipt,
    Line,
}

// ============================================================================
// FIELD DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Canonical key (e.g., "total")
    pub name: String,
    pub scope: FieldScope,
    pub type_: FieldType,
    pub description: String,
    /// Alternative keys, in precedence order
    pub aliases: Vec<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, scope: FieldScope, type_: FieldType) -> Self {
        FieldDefinition {
            name: name.into(),
            scope,
            type_,
            description: String::new(),
            aliases: Vec::new(),
        }
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: add aliases (appended in order)
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases.extend(aliases.iter().map(|a| a.to_string()));
        self
    }

    fn knows_key(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        self.name.to_lowercase() == lower || self.aliases.iter().any(|a| a.to_lowercase() == lower)
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Payload keys mapped onto canonical names
#[derive(Debug, Clone, Default)]
pub struct ResolvedFields {
    pub values: HashMap<String, Value>,
    /// Keys the registry doesn't know (reported as warnings)
    pub unknown: Vec<String>,
    /// canonical → the key it was read from, when that key was an alias
    pub aliased: HashMap<String, String>,
}

impl ResolvedFields {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

// ============================================================================
// FIELD REGISTRY
// ============================================================================

pub struct FieldRegistry {
    fields: Vec<FieldDefinition>,
}

impl FieldRegistry {
    /// Registry with every receipt and line field pre-registered
    pub fn new() -> Self {
        let mut registry = FieldRegistry { fields: Vec::new() };
        registry.register_receipt_fields();
        registry.register_line_fields();
        registry
    }

    fn register_receipt_fields(&mut self) {
        use FieldScope::Receipt;

        self.register(
            FieldDefinition::new("merchant_id", Receipt, FieldType::Text)
                .with_description("Issuing merchant's user id")
                .with_aliases(&["m", "mid", "merchant", "merchantId", "shop_id", "shopId", "store_id"]),
        );
        self.register(
            FieldDefinition::new("merchant_name", Receipt, FieldType::Text)
                .with_description("Shop name as printed on the receipt")
                .with_aliases(&["mn", "merchantName", "shop", "shop_name", "shopName", "store", "store_name"]),
        );
        self.register(
            FieldDefinition::new("receipt_number", Receipt, FieldType::Text)
                .with_description("Merchant's receipt/invoice number")
                .with_aliases(&[
                    "r", "rn", "receiptNumber", "receipt_no", "receiptNo", "invoice",
                    "invoice_number", "invoiceNo", "bill_no",
                ]),
        );
        self.register(
            FieldDefinition::new("transaction_date", Receipt, FieldType::Date)
                .with_description("When the purchase happened")
                .with_aliases(&["d", "dt", "date", "transactionDate", "purchased_at", "purchasedAt", "timestamp", "ts"]),
        );
        self.register(
            FieldDefinition::new("subtotal", Receipt, FieldType::Decimal)
                .with_description("Sum of line totals before discount and tax")
                .with_aliases(&["st", "sub", "sub_total"]),
        );
        self.register(
            FieldDefinition::new("discount", Receipt, FieldType::Decimal)
                .with_description("Receipt-level discount amount")
                .with_aliases(&["dc", "disc", "discountAmount", "discount_amount"]),
        );
        self.register(
            FieldDefinition::new("tax", Receipt, FieldType::Decimal)
                .with_description("Total tax (GST/VAT)")
                .with_aliases(&["tx", "taxAmount", "tax_amount", "gst", "vat"]),
        );
        self.register(
            FieldDefinition::new("total", Receipt, FieldType::Decimal)
                .with_description("Amount paid")
                .with_aliases(&["t", "tot", "totalAmount", "total_amount", "amount", "grand_total", "grandTotal"]),
        );
        self.register(
            FieldDefinition::new("currency", Receipt, FieldType::Text)
                .with_description("ISO 4217 currency code")
                .with_aliases(&["c", "cur", "ccy"]),
        );
        self.register(
            FieldDefinition::new("payment_method", Receipt, FieldType::Text)
                .with_description("cash, card, upi, wallet, bank_transfer, other")
                .with_aliases(&["pm", "pay", "payment", "paymentMethod"]),
        );
        self.register(
            FieldDefinition::new("items", Receipt, FieldType::List)
                .with_description("Line items")
                .with_aliases(&["i", "it", "lineItems", "line_items", "products", "entries"]),
        );
        self.register(
            FieldDefinition::new("notes", Receipt, FieldType::Text)
                .with_description("Free-form note")
                .with_aliases(&["nt", "note", "memo", "remarks"]),
        );
    }

    fn register_line_fields(&mut self) {
        use FieldScope::Line;

        self.register(
            FieldDefinition::new("item_id", Line, FieldType::Text)
                .with_description("Catalog item id")
                .with_aliases(&["id", "iid", "itemId", "product_id", "productId"]),
        );
        self.register(
            FieldDefinition::new("name", Line, FieldType::Text)
                .with_description("Item name as printed")
                .with_aliases(&["n", "nm", "itemName", "item_name", "title", "description", "product"]),
        );
        self.register(
            FieldDefinition::new("variant", Line, FieldType::Text)
                .with_description("Variant name (size, flavour)")
                .with_aliases(&["v", "var", "variantName", "variant_name", "size"]),
        );
        self.register(
            FieldDefinition::new("sku", Line, FieldType::Text)
                .with_description("SKU or barcode")
                .with_aliases(&["s", "code", "barcode"]),
        );
        self.register(
            FieldDefinition::new("quantity", Line, FieldType::Decimal)
                .with_description("Units or weight sold")
                .with_aliases(&["q", "qty", "count", "units"]),
        );
        self.register(
            FieldDefinition::new("unit_price", Line, FieldType::Decimal)
                .with_description("Price per unit")
                .with_aliases(&["p", "pr", "price", "unitPrice", "rate", "mrp"]),
        );
        self.register(
            FieldDefinition::new("line_total", Line, FieldType::Decimal)
                .with_description("quantity × unit price")
                .with_aliases(&["lt", "total", "lineTotal", "amount", "subtotal"]),
        );
    }

    /// Register a field definition
    pub fn register(&mut self, field: FieldDefinition) {
        self.fields.retain(|f| !(f.name == field.name && f.scope == field.scope));
        self.fields.push(field);
    }

    /// Get a definition by canonical name
    pub fn get(&self, scope: FieldScope, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.scope == scope && f.name == name)
    }

    /// Find the definition a payload key refers to (canonical or alias)
    pub fn lookup(&self, scope: FieldScope, key: &str) -> Option<&FieldDefinition> {
        self.in_scope(scope)
            .find(|f| f.name == key || f.aliases.iter().any(|a| a == key))
            .or_else(|| self.in_scope(scope).find(|f| f.knows_key(key)))
    }

    pub fn in_scope(&self, scope: FieldScope) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(move |f| f.scope == scope)
    }

    /// Map a JSON object's keys onto canonical names
    ///
    /// Precedence per field: exact canonical key, then aliases in declared
    /// order, then any case-insensitive match.
    pub fn resolve(&self, scope: FieldScope, object: &Map<String, Value>) -> ResolvedFields {
        let mut resolved = ResolvedFields::default();

        for field in self.in_scope(scope) {
            let exact = std::iter::once(&field.name)
                .chain(field.aliases.iter())
                .find(|key| object.contains_key(key.as_str()));

            let key = match exact {
                Some(key) => Some(key.clone()),
                None => object.keys().find(|k| field.knows_key(k)).cloned(),
            };

            if let Some(key) = key {
                if let Some(value) = object.get(&key) {
                    if key != field.name {
                        resolved.aliased.insert(field.name.clone(), key.clone());
                    }
                    resolved.values.insert(field.name.clone(), value.clone());
                }
            }
        }

        let mut unknown: Vec<String> = object
            .keys()
            .filter(|k| self.lookup(scope, k).is_none())
            .cloned()
            .collect();
        unknown.sort();
        resolved.unknown = unknown;

        resolved
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_has_all_fields() {
        let registry = FieldRegistry::new();
        assert_eq!(registry.in_scope(FieldScope::Receipt).count() + registry.in_scope(FieldScope::Line).count(), 19);
        assert!(registry.get(FieldScope::Receipt, "total").is_some());
        assert!(registry.get(FieldScope::Line, "unit_price").is_some());
        assert!(registry.get(FieldScope::Line, "merchant_id").is_none());
    }

    #[test]
    fn test_aliases_unique_within_scope() {
        let registry = FieldRegistry::new();
        for scope in [FieldScope::Receipt, FieldScope::Line] {
            let mut seen = HashSet::new();
            for field in registry.in_scope(scope) {
                for key in std::iter::once(&field.name).chain(field.aliases.iter()) {
                    assert!(
                        seen.insert(key.to_lowercase()),
                        "{key} declared twice in {scope:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_resolve_qr_abbreviations() {
        let registry = FieldRegistry::new();
        let payload = object(json!({"m": "m-1", "t": "99.50", "d": "2024-01-15", "i": []}));

        let resolved = registry.resolve(FieldScope::Receipt, &payload);

        assert_eq!(resolved.get("merchant_id"), Some(&json!("m-1")));
        assert_eq!(resolved.get("total"), Some(&json!("99.50")));
        assert_eq!(resolved.get("transaction_date"), Some(&json!("2024-01-15")));
        assert_eq!(resolved.aliased.get("total").map(String::as_str), Some("t"));
        assert!(resolved.unknown.is_empty());
    }

    #[test]
    fn test_canonical_wins_over_alias() {
        let registry = FieldRegistry::new();
        let payload = object(json!({"t": 1, "total": 2, "amount": 3}));

        let resolved = registry.resolve(FieldScope::Receipt, &payload);
        assert_eq!(resolved.get("total"), Some(&json!(2)));
        assert!(!resolved.aliased.contains_key("total"));

        let payload = object(json!({"amount": 3, "t": 1}));
        let resolved = registry.resolve(FieldScope::Receipt, &payload);
        assert_eq!(resolved.get("total"), Some(&json!(1)), "first declared alias wins");
    }

    #[test]
    fn test_case_insensitive_fallback_and_unknown_keys() {
        let registry = FieldRegistry::new();
        let payload = object(json!({"TOTAL": 5, "GrandTotal": 6, "loyalty_points": 40}));

        let resolved = registry.resolve(FieldScope::Receipt, &payload);
        assert!(resolved.get("total").is_some());
        assert_eq!(resolved.unknown, vec!["loyalty_points".to_string()]);
    }

    #[test]
    fn test_line_scope_is_separate() {
        let registry = FieldRegistry::new();
        let line = object(json!({"n": "Milk", "q": 2, "p": 30, "total": 60}));

        let resolved = registry.resolve(FieldScope::Line, &line);
        assert_eq!(resolved.get("name"), Some(&json!("Milk")));
        assert_eq!(resolved.get("line_total"), Some(&json!(60)));
        assert!(resolved.get("total").is_none());
    }
}
