// 👤 User Entity - customers and merchants share one document shape
//
// A merchant is a user whose role is Merchant and who carries a ShopProfile.
// Catalog items, categories and issued receipts are scoped to the merchant's id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    Merchant,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Merchant => "merchant",
        }
    }
}

// ============================================================================
// SHOP PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopProfile {
    pub shop_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// GSTIN / VAT number printed on receipts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,

    /// Name of the shop's primary category (e.g. "Groceries")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ShopProfile {
    pub fn new(shop_name: impl Into<String>) -> Self {
        ShopProfile {
            shop_name: shop_name.into(),
            address: None,
            phone: None,
            tax_id: None,
            category: None,
        }
    }
}

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Stored lowercase; unique across users
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    pub role: UserRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop: Option<ShopProfile>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn customer(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::build(name.into(), email.into(), UserRole::Customer, None)
    }

    pub fn merchant(name: impl Into<String>, email: impl Into<String>, shop: ShopProfile) -> Self {
        Self::build(name.into(), email.into(), UserRole::Merchant, Some(shop))
    }

    fn build(name: String, email: String, role: UserRole, shop: Option<ShopProfile>) -> Self {
        let now = Utc::now();
        User {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            email: email.trim().to_lowercase(),
            phone: None,
            role,
            shop,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_merchant(&self) -> bool {
        self.role == UserRole::Merchant
    }

    /// Display name for receipts: shop name for merchants, user name otherwise
    pub fn display_name(&self) -> &str {
        self.shop
            .as_ref()
            .map(|s| s.shop_name.as_str())
            .unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_creation_normalizes_email() {
        let user = User::customer("  Asha  ", "Asha@Example.COM ");

        assert!(!user.id.is_empty());
        assert_eq!(user.name, "Asha");
        assert_eq!(user.email, "asha@example.com");
        assert_eq!(user.role, UserRole::Customer);
        assert!(user.shop.is_none());
        assert!(!user.is_merchant());
    }

    #[test]
    fn test_merchant_display_name() {
        let merchant = User::merchant(
            "Ravi",
            "ravi@shop.in",
            ShopProfile {
                category: Some("Groceries".into()),
                ..ShopProfile::new("Ravi General Store")
            },
        );

        assert!(merchant.is_merchant());
        assert_eq!(merchant.display_name(), "Ravi General Store");
        assert_eq!(
            merchant.shop.as_ref().and_then(|s| s.category.as_deref()),
            Some("Groceries")
        );
    }

    #[test]
    fn test_role_names_match_serde() {
        assert_eq!(serde_json::to_value(UserRole::Merchant).unwrap(), UserRole::Merchant.as_str());
        assert_eq!(serde_json::to_value(UserRole::Customer).unwrap(), UserRole::Customer.as_str());
    }
}
