// 📐 Shape Layer - Schema Validation
// Declarative field constraints for users, categories, items and receipts.
// Every check runs; callers get the full list of violations, not the first.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entities::{Category, DiscountKind, Item, Receipt, ReceiptStatus, User, UserRole, MAX_STOCK};

/// Largest quantity accepted on a single receipt line
pub const MAX_LINE_QUANTITY: f64 = 1_000_000.0;

// ============================================================================
// VALIDATION ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>, context: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Accumulates violations for one validation context
#[derive(Debug)]
pub struct Violations {
    context: String,
    errors: Vec<ValidationError>,
}

impl Violations {
    pub fn new(context: impl Into<String>) -> Self {
        Violations {
            context: context.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .push(ValidationError::new(field, message, &self.context));
    }

    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.push(field, message);
        }
    }

    pub fn extend(&mut self, errors: Vec<ValidationError>) {
        self.errors.extend(errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    pub fn finish(self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

// ============================================================================
// FIELD RULES
// ============================================================================

fn char_len(s: &str) -> usize {
    s.trim().chars().count()
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

/// "#RRGGBB"
pub fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Three uppercase ASCII letters
pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

// ============================================================================
// SCHEMA VALIDATOR
// ============================================================================

pub struct SchemaValidator {
    /// How far in the future a receipt date may lie (clock skew)
    pub max_future_skew: Duration,
}

impl SchemaValidator {
    pub fn new() -> Self {
        SchemaValidator {
            max_future_skew: Duration::hours(24),
        }
    }

    /// Validate a user document
    pub fn validate_user(&self, user: &User) -> ValidationResult {
        let mut v = Violations::new("User");

        let name_len = char_len(&user.name);
        v.check(
            (2..=80).contains(&name_len),
            "name",
            format!("Must be 2-80 characters, got {name_len}"),
        );
        v.check(is_valid_email(&user.email), "email", "Invalid email address");

        if let Some(phone) = &user.phone {
            let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
            v.check(
                (7..=15).contains(&digits),
                "phone",
                "Must contain 7-15 digits",
            );
        }

        match (user.role, &user.shop) {
            (UserRole::Merchant, None) => v.push("shop", "Required for merchants"),
            (UserRole::Merchant, Some(shop)) => {
                let len = char_len(&shop.shop_name);
                v.check(
                    (2..=120).contains(&len),
                    "shop.shop_name",
                    format!("Must be 2-120 characters, got {len}"),
                );
            }
            (UserRole::Customer, Some(_)) => v.push("shop", "Customers cannot have a shop profile"),
            (UserRole::Customer, None) => {}
        }

        v.finish()
    }

    /// Validate a category document
    pub fn validate_category(&self, category: &Category) -> ValidationResult {
        let mut v = Violations::new("Category");

        let len = char_len(&category.name);
        v.check(
            (1..=60).contains(&len),
            "name",
            format!("Must be 1-60 characters, got {len}"),
        );
        v.check(
            !category.slug.is_empty() || len == 0,
            "name",
            "Must contain at least one letter or digit",
        );

        if let Some(color) = &category.color {
            v.check(is_hex_color(color), "color", "Must be #RRGGBB");
        }
        if category.parent_id.as_deref() == Some(category.id.as_str()) {
            v.push("parent_id", "Category cannot be its own parent");
        }

        v.finish()
    }

    /// Validate a catalog item document
    pub fn validate_item(&self, item: &Item) -> ValidationResult {
        let mut v = Violations::new("Item");

        let len = char_len(&item.name);
        v.check(
            (1..=120).contains(&len),
            "name",
            format!("Must be 1-120 characters, got {len}"),
        );
        v.check(
            is_non_negative(item.price),
            "price",
            format!("Must be a number >= 0, got {}", item.price),
        );

        if let Some(sku) = &item.sku {
            v.check(
                !sku.trim().is_empty() && char_len(sku) <= 64,
                "sku",
                "Must be 1-64 characters",
            );
        }
        if let Some(description) = &item.description {
            v.check(char_len(description) <= 1000, "description", "At most 1000 characters");
        }

        let mut variant_names = HashSet::new();
        for (i, variant) in item.variants.iter().enumerate() {
            let field = format!("variants[{i}]");
            let name = variant.name.trim().to_lowercase();
            if name.is_empty() {
                v.push(&format!("{field}.name"), "Required field is empty");
            } else if !variant_names.insert(name) {
                v.push(&format!("{field}.name"), format!("Duplicate variant '{}'", variant.name));
            }
            if let Some(price) = variant.price {
                v.check(
                    is_non_negative(price),
                    &format!("{field}.price"),
                    format!("Must be a number >= 0, got {price}"),
                );
            }
            v.check(
                variant.stock <= MAX_STOCK,
                &format!("{field}.stock"),
                format!("At most {MAX_STOCK}, got {}", variant.stock),
            );
        }

        let total: u64 = if item.variants.is_empty() {
            u64::from(item.stock)
        } else {
            item.variants.iter().map(|v| u64::from(v.stock)).sum()
        };
        v.check(
            total <= u64::from(MAX_STOCK),
            "stock",
            format!("Total stock must be at most {MAX_STOCK}, got {total}"),
        );

        if let Some(discount) = &item.discount {
            match discount.kind {
                DiscountKind::Percentage => v.check(
                    discount.value > 0.0 && discount.value <= 100.0,
                    "discount.value",
                    format!("Percentage must be in (0, 100], got {}", discount.value),
                ),
                DiscountKind::Fixed => v.check(
                    discount.value.is_finite() && discount.value > 0.0,
                    "discount.value",
                    format!("Fixed discount must be > 0, got {}", discount.value),
                ),
            }
            if let (Some(start), Some(end)) = (discount.starts_at, discount.ends_at) {
                v.check(start < end, "discount.ends_at", "Must be after starts_at");
            }
        }

        v.check(item.tags.len() <= 20, "tags", "At most 20 tags");

        v.finish()
    }

    /// Final gate before a receipt is persisted
    pub fn validate_receipt(&self, receipt: &Receipt, now: DateTime<Utc>) -> ValidationResult {
        let mut v = Violations::new("Receipt");

        v.check(!receipt.merchant_id.trim().is_empty(), "merchant_id", "Required field is empty");
        v.check(
            !receipt.receipt_number.trim().is_empty() && char_len(&receipt.receipt_number) <= 64,
            "receipt_number",
            "Must be 1-64 characters",
        );
        v.check(
            is_currency_code(&receipt.currency),
            "currency",
            format!("Must be a 3-letter code, got '{}'", receipt.currency),
        );

        for (field, value) in [
            ("subtotal", receipt.subtotal),
            ("discount", receipt.discount),
            ("tax", receipt.tax),
            ("total", receipt.total),
        ] {
            v.check(is_non_negative(value), field, format!("Must be a number >= 0, got {value}"));
        }

        v.check(
            receipt.transaction_date <= now + self.max_future_skew,
            "transaction_date",
            "Cannot be in the future",
        );
        v.check(
            receipt.status != ReceiptStatus::Claimed || receipt.customer_id.is_some(),
            "customer_id",
            "Claimed receipts need a customer",
        );

        for (i, line) in receipt.lines.iter().enumerate() {
            let field = format!("lines[{i}]");
            v.check(!line.name.trim().is_empty(), &format!("{field}.name"), "Required field is empty");
            v.check(
                line.quantity.is_finite() && line.quantity > 0.0 && line.quantity <= MAX_LINE_QUANTITY,
                &format!("{field}.quantity"),
                format!("Must be in (0, {MAX_LINE_QUANTITY}], got {}", line.quantity),
            );
            v.check(
                is_non_negative(line.unit_price),
                &format!("{field}.unit_price"),
                format!("Must be a number >= 0, got {}", line.unit_price),
            );
            v.check(
                is_non_negative(line.line_total),
                &format!("{field}.line_total"),
                format!("Must be a number >= 0, got {}", line.line_total),
            );
        }

        v.finish()
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Discount, ItemVariant, ShopProfile};

    fn fields(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_email_rules() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@shop.example.in"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@.co"));
    }

    #[test]
    fn test_valid_customer_and_merchant() {
        let validator = SchemaValidator::new();

        let customer = User::customer("Asha Rao", "asha@example.com");
        assert!(validator.validate_user(&customer).is_ok());

        let merchant = User::merchant("Ravi", "ravi@shop.in", ShopProfile::new("Ravi Stores"));
        assert!(validator.validate_user(&merchant).is_ok());
    }

    #[test]
    fn test_merchant_requires_shop_and_customer_forbids_it() {
        let validator = SchemaValidator::new();

        let mut merchant = User::merchant("Ravi", "ravi@shop.in", ShopProfile::new("R"));
        let errors = validator.validate_user(&merchant).unwrap_err();
        assert_eq!(fields(&errors), vec!["shop.shop_name"]);

        merchant.shop = None;
        let errors = validator.validate_user(&merchant).unwrap_err();
        assert_eq!(fields(&errors), vec!["shop"]);

        let mut customer = User::customer("Asha", "asha@example.com");
        customer.shop = Some(ShopProfile::new("Sneaky Shop"));
        assert!(validator.validate_user(&customer).is_err());
    }

    #[test]
    fn test_user_collects_all_errors() {
        let validator = SchemaValidator::new();
        let mut user = User::customer("A", "not-an-email");
        user.phone = Some("12".to_string());

        let errors = validator.validate_user(&user).unwrap_err();
        assert_eq!(fields(&errors), vec!["name", "email", "phone"]);
        assert!(errors.iter().all(|e| e.context == "User"));
    }

    #[test]
    fn test_category_rules() {
        let validator = SchemaValidator::new();

        let mut category = Category::new("Dairy", Some("m1".into()), None);
        assert!(validator.validate_category(&category).is_ok());

        category.color = Some("green".to_string());
        category.parent_id = Some(category.id.clone());
        let errors = validator.validate_category(&category).unwrap_err();
        assert_eq!(fields(&errors), vec!["color", "parent_id"]);

        let symbols = Category::new("&&&", None, None);
        assert!(validator.validate_category(&symbols).is_err());
    }

    #[test]
    fn test_item_price_and_variants() {
        let validator = SchemaValidator::new();

        let mut item = Item::new("m1", "Kurta", 499.0, 10);
        item.variants = vec![
            ItemVariant { name: "M".into(), price: None, stock: 2, sku: None },
            ItemVariant { name: "m".into(), price: Some(-1.0), stock: 1, sku: None },
        ];
        item.price = f64::NAN;

        let errors = validator.validate_item(&item).unwrap_err();
        assert_eq!(
            fields(&errors),
            vec!["price", "variants[1].name", "variants[1].price"]
        );
    }

    #[test]
    fn test_item_discount_rules() {
        let validator = SchemaValidator::new();

        let over = Item::new("m1", "Tea", 100.0, 1).with_discount(Discount::percentage(120.0));
        assert!(validator.validate_item(&over).is_err());

        let zero_fixed = Item::new("m1", "Tea", 100.0, 1).with_discount(Discount::fixed(0.0));
        assert!(validator.validate_item(&zero_fixed).is_err());

        let now = Utc::now();
        let mut window = Discount::percentage(10.0);
        window.starts_at = Some(now);
        window.ends_at = Some(now - Duration::hours(1));
        let backwards = Item::new("m1", "Tea", 100.0, 1).with_discount(window);
        let errors = validator.validate_item(&backwards).unwrap_err();
        assert_eq!(fields(&errors), vec!["discount.ends_at"]);

        let ok = Item::new("m1", "Tea", 100.0, 1).with_discount(Discount::percentage(100.0));
        assert!(validator.validate_item(&ok).is_ok());
    }

    #[test]
    fn test_item_stock_limits() {
        let validator = SchemaValidator::new();

        let mut item = Item::new("m1", "Kurta", 499.0, 0);
        item.variants = vec![
            ItemVariant { name: "S".into(), price: None, stock: 3_000_000_000, sku: None },
            ItemVariant { name: "M".into(), price: None, stock: 3_000_000_000, sku: None },
        ];
        let errors = validator.validate_item(&item).unwrap_err();
        assert_eq!(fields(&errors), vec!["variants[0].stock", "variants[1].stock", "stock"]);

        item.variants = vec![
            ItemVariant { name: "S".into(), price: None, stock: MAX_STOCK, sku: None },
            ItemVariant { name: "M".into(), price: None, stock: 1, sku: None },
        ];
        let errors = validator.validate_item(&item).unwrap_err();
        assert_eq!(fields(&errors), vec!["stock"]);

        let at_limit = Item::new("m1", "Rice", 60.0, MAX_STOCK);
        assert!(validator.validate_item(&at_limit).is_ok());
    }

    #[test]
    fn test_sku_length_counts_characters() {
        let validator = SchemaValidator::new();

        let unicode = Item::new("m1", "Chai", 20.0, 1).with_sku("चाय".repeat(20));
        assert!(validator.validate_item(&unicode).is_ok());

        let long = Item::new("m1", "Chai", 20.0, 1).with_sku("x".repeat(65));
        let errors = validator.validate_item(&long).unwrap_err();
        assert_eq!(fields(&errors), vec!["sku"]);
    }

    #[test]
    fn test_helpers() {
        assert!(is_hex_color("#A1b2C3"));
        assert!(!is_hex_color("#A1b2C"));
        assert!(!is_hex_color("A1b2C3F"));
        assert!(is_currency_code("INR"));
        assert!(!is_currency_code("inr"));
        assert!(!is_currency_code("RUPEE"));
    }
}
