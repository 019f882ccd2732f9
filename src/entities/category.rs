// 🏷️ Category Entity - hierarchical catalog categories
//
// Global categories (merchant_id = None) are seeded once and visible to every
// merchant. Merchants can add their own categories, optionally nested under a
// global or own parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::matching::slugify;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,

    /// Owner; None for global categories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,

    pub name: String,

    /// Derived from name, unique per owner
    pub slug: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Optional icon for UI (e.g., "🛒")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Optional color for UI (e.g., "#4CAF50")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>, merchant_id: Option<String>, parent_id: Option<String>) -> Self {
        let name = name.into().trim().to_string();
        Category {
            id: uuid::Uuid::new_v4().to_string(),
            merchant_id,
            slug: slugify(&name),
            name,
            parent_id,
            icon: None,
            color: None,
            created_at: Utc::now(),
        }
    }

    /// Global category with icon and color
    pub fn global(name: &str, icon: &str, color: &str) -> Self {
        let mut category = Self::new(name, None, None);
        category.icon = Some(icon.to_string());
        category.color = Some(color.to_string());
        category
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_global(&self) -> bool {
        self.merchant_id.is_none()
    }

    /// Whether a merchant may see (and attach children to) this category
    pub fn visible_to(&self, merchant_id: Option<&str>) -> bool {
        match (&self.merchant_id, merchant_id) {
            (None, _) => true,
            (Some(owner), Some(m)) => owner == m,
            (Some(_), None) => false,
        }
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.trim().to_string();
        self.slug = slugify(&self.name);
    }
}

/// Root categories created on first database setup
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::global("Groceries", "🛒", "#4CAF50"),
        Category::global("Dining", "🍽️", "#FF5733"),
        Category::global("Electronics", "🔌", "#3F51B5"),
        Category::global("Clothing", "👕", "#E91E63"),
        Category::global("Health", "💊", "#009688"),
        Category::global("Household", "🏠", "#795548"),
        Category::global("Services", "🧾", "#607D8B"),
        Category::global("Other", "📦", "#9E9E9E"),
    ]
}

/// Names from root to `id` (e.g. ["Groceries", "Dairy"])
///
/// Stops on unknown parents and on cycles rather than looping.
pub fn category_path(categories: &[Category], id: &str) -> Vec<String> {
    let by_id: HashMap<&str, &Category> = categories.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut current = by_id.get(id).copied();

    while let Some(category) = current {
        if !seen.insert(category.id.as_str()) {
            break;
        }
        path.push(category.name.clone());
        current = category
            .parent_id
            .as_deref()
            .and_then(|parent| by_id.get(parent).copied());
    }

    path.reverse();
    path
}

/// True if making `new_parent` the parent of `id` would create a cycle
pub fn would_create_cycle(categories: &[Category], id: &str, new_parent: &str) -> bool {
    if id == new_parent {
        return true;
    }

    let by_id: HashMap<&str, &Category> = categories.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut seen = HashSet::new();
    let mut current = Some(new_parent);

    while let Some(cursor) = current {
        if cursor == id {
            return true;
        }
        if !seen.insert(cursor) {
            // pre-existing cycle above the new parent; refuse
            return true;
        }
        current = by_id.get(cursor).and_then(|c| c.parent_id.as_deref());
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_creation() {
        let category = Category::new("  Dairy & Eggs ", Some("m1".to_string()), None);

        assert!(!category.id.is_empty());
        assert_eq!(category.name, "Dairy & Eggs");
        assert_eq!(category.slug, "dairy-eggs");
        assert!(category.is_root());
        assert!(!category.is_global());
    }

    #[test]
    fn test_visibility() {
        let global = Category::global("Groceries", "🛒", "#4CAF50");
        let own = Category::new("Dairy", Some("m1".to_string()), None);

        assert!(global.visible_to(Some("m1")));
        assert!(global.visible_to(None));
        assert!(own.visible_to(Some("m1")));
        assert!(!own.visible_to(Some("m2")));
        assert!(!own.visible_to(None));
    }

    #[test]
    fn test_default_categories_are_global_roots() {
        let defaults = default_categories();
        assert_eq!(defaults.len(), 8);
        assert!(defaults.iter().all(|c| c.is_global() && c.is_root()));
        assert!(defaults.iter().any(|c| c.slug == "groceries"));
    }

    #[test]
    fn test_category_path_and_cycles() {
        let groceries = Category::global("Groceries", "🛒", "#4CAF50");
        let dairy = Category::new("Dairy", Some("m1".into()), Some(groceries.id.clone()));
        let cheese = Category::new("Cheese", Some("m1".into()), Some(dairy.id.clone()));
        let all = vec![groceries.clone(), dairy.clone(), cheese.clone()];

        assert_eq!(
            category_path(&all, &cheese.id),
            vec!["Groceries", "Dairy", "Cheese"]
        );
        assert!(category_path(&all, "missing").is_empty());

        // Groceries under Cheese would loop
        assert!(would_create_cycle(&all, &groceries.id, &cheese.id));
        assert!(would_create_cycle(&all, &dairy.id, &dairy.id));
        assert!(!would_create_cycle(&all, &cheese.id, &groceries.id));
    }
}
