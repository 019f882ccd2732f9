// 📊 Spending - customer and merchant summaries over stored receipts
//
// Void receipts never count. Amounts are summed across currencies; the
// summary lists which currencies were seen.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::accounts::{get_user, require_merchant};
use crate::db::{self, DateRange};
use crate::entities::{Item, ItemView, Receipt, ReceiptStatus, StockStatus};
use crate::error::AppResult;
use crate::money::round2;

pub const UNCATEGORIZED: &str = "Uncategorized";
const TOP_ITEMS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantSpend {
    pub merchant_id: String,
    pub merchant_name: Option<String>,
    pub total: f64,
    pub receipts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySpend {
    pub category: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSpend {
    /// YYYY-MM
    pub month: String,
    pub total: f64,
    pub receipts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSummary {
    pub customer_id: String,
    pub receipt_count: usize,
    pub total_spent: f64,
    pub average_receipt: f64,
    pub by_merchant: Vec<MerchantSpend>,
    pub by_category: Vec<CategorySpend>,
    pub by_month: Vec<MonthSpend>,
    pub currencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSales {
    pub item_id: Option<String>,
    pub name: String,
    pub quantity: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MerchantSummary {
    pub merchant_id: String,
    pub receipt_count: usize,
    pub void_count: usize,
    pub revenue: f64,
    /// claimed / non-void receipts
    pub claimed_ratio: f64,
    pub top_items_by_quantity: Vec<ItemSales>,
    pub top_items_by_revenue: Vec<ItemSales>,
    pub low_stock: Vec<ItemView>,
}

// ============================================================================
// CUSTOMER
// ============================================================================

pub fn summarize_customer(customer_id: &str, receipts: &[Receipt]) -> CustomerSummary {
    let mut merchants: HashMap<&str, MerchantSpend> = HashMap::new();
    let mut categories: HashMap<String, f64> = HashMap::new();
    let mut months: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    let mut currencies = BTreeSet::new();
    let mut total_spent = 0.0;
    let mut count = 0;

    for receipt in receipts.iter().filter(|r| !r.is_void()) {
        count += 1;
        total_spent += receipt.total;
        currencies.insert(receipt.currency.clone());

        let merchant = merchants
            .entry(receipt.merchant_id.as_str())
            .or_insert_with(|| MerchantSpend {
                merchant_id: receipt.merchant_id.clone(),
                merchant_name: receipt.merchant_name.clone(),
                total: 0.0,
                receipts: 0,
            });
        merchant.total += receipt.total;
        merchant.receipts += 1;

        if receipt.lines.is_empty() {
            *categories.entry(UNCATEGORIZED.to_string()).or_default() += receipt.total;
        }
        for line in &receipt.lines {
            let category = line.category.clone().unwrap_or_else(|| UNCATEGORIZED.to_string());
            *categories.entry(category).or_default() += line.line_total;
        }

        let month = months
            .entry(receipt.transaction_date.format("%Y-%m").to_string())
            .or_default();
        month.0 += receipt.total;
        month.1 += 1;
    }

    let mut by_merchant: Vec<MerchantSpend> = merchants
        .into_values()
        .map(|mut m| {
            m.total = round2(m.total);
            m
        })
        .collect();
    by_merchant.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.merchant_id.cmp(&b.merchant_id)));

    let mut by_category: Vec<CategorySpend> = categories
        .into_iter()
        .map(|(category, total)| CategorySpend { category, total: round2(total) })
        .collect();
    by_category.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.category.cmp(&b.category)));

    let by_month = months
        .into_iter()
        .map(|(month, (total, receipts))| MonthSpend { month, total: round2(total), receipts })
        .collect();

    let total_spent = round2(total_spent);
    CustomerSummary {
        customer_id: customer_id.to_string(),
        receipt_count: count,
        total_spent,
        average_receipt: if count == 0 { 0.0 } else { round2(total_spent / count as f64) },
        by_merchant,
        by_category,
        by_month,
        currencies: currencies.into_iter().collect(),
    }
}

pub fn customer_summary(conn: &Connection, customer_id: &str, range: DateRange) -> AppResult<CustomerSummary> {
    get_user(conn, customer_id)?;
    let receipts = db::list_customer_receipts(conn, customer_id, range)?;
    Ok(summarize_customer(customer_id, &receipts))
}

// ============================================================================
// MERCHANT
// ============================================================================

fn top_items(mut sales: Vec<ItemSales>, key: impl Fn(&ItemSales) -> f64) -> Vec<ItemSales> {
    sales.sort_by(|a, b| key(b).total_cmp(&key(a)).then_with(|| a.name.cmp(&b.name)));
    sales.truncate(TOP_ITEMS);
    sales
}

pub fn summarize_merchant(merchant_id: &str, receipts: &[Receipt], catalog: &[Item]) -> MerchantSummary {
    let mut sales: HashMap<String, ItemSales> = HashMap::new();
    let mut revenue = 0.0;
    let mut count = 0;
    let mut claimed = 0;
    let mut void_count = 0;

    for receipt in receipts {
        if receipt.is_void() {
            void_count += 1;
            continue;
        }
        count += 1;
        revenue += receipt.total;
        if receipt.status == ReceiptStatus::Claimed {
            claimed += 1;
        }

        for line in &receipt.lines {
            // Unmatched lines group by name
            let key = line.item_id.clone().unwrap_or_else(|| line.name.to_lowercase());
            let entry = sales.entry(key).or_insert_with(|| ItemSales {
                item_id: line.item_id.clone(),
                name: line.name.clone(),
                quantity: 0.0,
                revenue: 0.0,
            });
            entry.quantity += line.quantity;
            entry.revenue += line.line_total;
        }
    }

    let sales: Vec<ItemSales> = sales
        .into_values()
        .map(|mut s| {
            s.revenue = round2(s.revenue);
            s
        })
        .collect();

    let now = Utc::now();
    let low_stock = catalog
        .iter()
        .filter(|item| item.is_active && item.stock_status() != StockStatus::InStock)
        .map(|item| item.view(now))
        .collect();

    MerchantSummary {
        merchant_id: merchant_id.to_string(),
        receipt_count: count,
        void_count,
        revenue: round2(revenue),
        claimed_ratio: if count == 0 { 0.0 } else { round2(claimed as f64 / count as f64) },
        top_items_by_quantity: top_items(sales.clone(), |s| s.quantity),
        top_items_by_revenue: top_items(sales, |s| s.revenue),
        low_stock,
    }
}

pub fn merchant_summary(conn: &Connection, merchant_id: &str, range: DateRange) -> AppResult<MerchantSummary> {
    require_merchant(conn, merchant_id)?;
    let receipts = db::list_merchant_receipts(conn, merchant_id, range)?;
    let catalog = db::get_merchant_items(conn, merchant_id)?;
    Ok(summarize_merchant(merchant_id, &receipts, &catalog))
}
