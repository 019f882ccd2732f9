// 🧾 Receipt Entity - issued by merchants, claimed or uploaded by customers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::reconciliation::ReconciliationSummary;

// ============================================================================
// ENUMS
// ============================================================================

/// Where the receipt payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptSource {
    /// Scanned QR code with abbreviated field names
    Qr,
    /// Customer-uploaded receipt (OCR or hand-entered)
    Upload,
    /// Issued by the merchant at the point of sale
    Manual,
}

impl ReceiptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptSource::Qr => "qr",
            ReceiptSource::Upload => "upload",
            ReceiptSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    Wallet,
    BankTransfer,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Other => "other",
        }
    }

    /// Case-insensitive, with common brand/rail aliases
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();

        match key.as_str() {
            "cash" | "cod" => Some(PaymentMethod::Cash),
            "card" | "credit" | "debit" | "creditcard" | "debitcard" | "visa" | "mastercard"
            | "amex" | "rupay" => Some(PaymentMethod::Card),
            "upi" | "gpay" | "googlepay" | "phonepe" | "paytm" | "bhim" => Some(PaymentMethod::Upi),
            "wallet" | "applepay" | "amazonpay" => Some(PaymentMethod::Wallet),
            "banktransfer" | "bank" | "neft" | "imps" | "rtgs" | "transfer" => {
                Some(PaymentMethod::BankTransfer)
            }
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Issued by a merchant, not yet attached to a customer
    Issued,
    /// Attached to a customer
    Claimed,
    Void,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Issued => "issued",
            ReceiptStatus::Claimed => "claimed",
            ReceiptStatus::Void => "void",
        }
    }
}

// ============================================================================
// RECEIPT LINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    /// Catalog item id when the line was matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    pub quantity: f64,
    pub unit_price: f64,
    pub line_total: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default)]
    pub matched: bool,
}

// ============================================================================
// RECEIPT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub receipt_number: String,
    pub merchant_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    pub source: ReceiptSource,
    pub lines: Vec<ReceiptLine>,

    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub transaction_date: DateTime<Utc>,
    pub status: ReceiptStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// SHA-256 over merchant, number, date and total - detects re-ingestion
    pub fingerprint: String,

    pub reconciliation: ReconciliationSummary,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Receipt {
    /// Compute the duplicate-detection fingerprint
    pub fn compute_fingerprint(&self) -> String {
        fingerprint(
            &self.merchant_id,
            &self.receipt_number,
            self.transaction_date,
            self.total,
        )
    }

    pub fn is_void(&self) -> bool {
        self.status == ReceiptStatus::Void
    }

    pub fn item_count(&self) -> f64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Compact QR payload for this receipt (abbreviated keys)
    ///
    /// Scanning it back through the ingestion pipeline claims this receipt.
    pub fn qr_payload(&self) -> String {
        let items: Vec<serde_json::Value> = self
            .lines
            .iter()
            .map(|line| {
                let mut entry = serde_json::json!({
                    "n": line.name,
                    "q": line.quantity,
                    "p": line.unit_price,
                });
                if let Some(variant) = &line.variant {
                    entry["v"] = serde_json::json!(variant);
                }
                entry
            })
            .collect();

        serde_json::json!({
            "m": self.merchant_id,
            "r": self.receipt_number,
            "d": self.transaction_date.to_rfc3339(),
            "t": self.total,
            "c": self.currency,
            "i": items,
        })
        .to_string()
    }
}

pub fn fingerprint(
    merchant_id: &str,
    receipt_number: &str,
    transaction_date: DateTime<Utc>,
    total: f64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{:.2}",
        merchant_id,
        receipt_number.to_uppercase(),
        transaction_date.format("%Y-%m-%d"),
        total
    ));
    format!("{:x}", hasher.finalize())
}

/// "GR-YYYYMMDD-XXXXXXXX"
pub fn generate_receipt_number(date: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("GR-{}-{}", date.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_payment_method_aliases() {
        assert_eq!(PaymentMethod::parse("GPay"), Some(PaymentMethod::Upi));
        assert_eq!(PaymentMethod::parse("Credit Card"), Some(PaymentMethod::Card));
        assert_eq!(PaymentMethod::parse("bank_transfer"), Some(PaymentMethod::BankTransfer));
        assert_eq!(PaymentMethod::parse("NEFT"), Some(PaymentMethod::BankTransfer));
        assert_eq!(PaymentMethod::parse("cash"), Some(PaymentMethod::Cash));
        assert_eq!(PaymentMethod::parse("barter"), None);
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap();
        let later_same_day = Utc.with_ymd_and_hms(2024, 3, 5, 18, 0, 0).unwrap();

        let a = fingerprint("m1", "gr-1", date, 120.5);
        let b = fingerprint("m1", "GR-1", later_same_day, 120.50);
        let c = fingerprint("m1", "GR-1", date, 120.51);

        assert_eq!(a, b, "number case and time of day don't matter");
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_generate_receipt_number_shape() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap();
        let number = generate_receipt_number(date);

        assert!(number.starts_with("GR-20240305-"));
        assert_eq!(number.len(), "GR-20240305-".len() + 8);
        assert!(number[12..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_status_names_match_serde() {
        for status in [ReceiptStatus::Issued, ReceiptStatus::Claimed, ReceiptStatus::Void] {
            assert_eq!(serde_json::to_value(status).unwrap(), status.as_str());
        }
    }
}
