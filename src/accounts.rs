// 👤 Accounts - customer and merchant profiles
//
// Identity comes from the route (no sessions here); the role guards below
// are what keeps customers out of merchant operations and vice versa.

use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::db::{self, Event};
use crate::entities::{ShopProfile, User, UserRole};
use crate::error::{AppError, AppResult};
use crate::schema::SchemaValidator;

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub shop: Option<ShopProfile>,
}

/// Partial profile update; the role can't change
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    /// Empty string clears the phone
    pub phone: Option<String>,
    pub shop: Option<ShopProfile>,
}

fn clean_phone(phone: Option<String>) -> Option<String> {
    phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty())
}

pub fn create_user(conn: &Connection, input: NewUser) -> AppResult<User> {
    let mut user = User::customer(input.name, input.email);
    user.role = input.role;
    user.shop = input.shop;
    user.phone = clean_phone(input.phone);

    // Role/shop consistency is checked here too
    SchemaValidator::new().validate_user(&user)?;

    db::insert_user(conn, &user)
        .map_err(|e| AppError::conflict_on_unique(e, format!("Email {} is already registered", user.email)))?;

    let event = Event::new(
        "user_created",
        "user",
        &user.id,
        serde_json::json!({ "role": user.role.as_str(), "email": user.email }),
        "api",
    );
    db::insert_event(conn, &event)?;

    info!(user_id = %user.id, role = user.role.as_str(), "user created");
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> AppResult<User> {
    db::get_user(conn, id)?.ok_or_else(|| AppError::not_found("User", id))
}

pub fn update_user(conn: &Connection, id: &str, patch: UserPatch) -> AppResult<User> {
    let mut user = get_user(conn, id)?;
    let mut changed = Vec::new();

    if let Some(name) = patch.name {
        user.name = name.trim().to_string();
        changed.push("name");
    }
    if let Some(email) = patch.email {
        user.email = email.trim().to_lowercase();
        changed.push("email");
    }
    if patch.phone.is_some() {
        user.phone = clean_phone(patch.phone);
        changed.push("phone");
    }
    if let Some(shop) = patch.shop {
        user.shop = Some(shop);
        changed.push("shop");
    }

    if changed.is_empty() {
        return Ok(user);
    }

    SchemaValidator::new().validate_user(&user)?;
    user.updated_at = Utc::now();

    db::update_user(conn, &user)
        .map_err(|e| AppError::conflict_on_unique(e, format!("Email {} is already registered", user.email)))?;

    let event = Event::new(
        "user_updated",
        "user",
        &user.id,
        serde_json::json!({ "fields": changed }),
        &format!("user:{}", user.id),
    );
    db::insert_event(conn, &event)?;

    Ok(user)
}

pub fn list_merchants(conn: &Connection) -> AppResult<Vec<User>> {
    Ok(db::list_merchants(conn)?)
}

/// The user must exist and be a merchant
pub fn require_merchant(conn: &Connection, id: &str) -> AppResult<User> {
    let user = db::get_user(conn, id)?.ok_or_else(|| AppError::not_found("Merchant", id))?;
    if !user.is_merchant() {
        return Err(AppError::Forbidden(format!("User {id} is not a merchant")));
    }
    Ok(user)
}

/// The user must exist and be a customer
pub fn require_customer(conn: &Connection, id: &str) -> AppResult<User> {
    let user = get_user(conn, id)?;
    if user.is_merchant() {
        return Err(AppError::Forbidden(format!("User {id} is not a customer")));
    }
    Ok(user)
}
