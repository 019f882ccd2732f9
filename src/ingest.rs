// 📥 Ingestion Pipeline - raw payload → NormalizedReceipt
//
// Receipts arrive three ways:
// - Manual: JSON from the merchant's point of sale
// - Upload: JSON typed in (or OCR'd) by a customer
// - Qr:     a scanned string, decoded by one of the QrDecoder implementations
//
// Every stage collects ValidationErrors instead of stopping at the first one.
// Soft problems (defaults applied, unknown keys, inconsistent line math) become
// warnings that travel with the receipt.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::IngestSettings;
use crate::entities::{PaymentMethod, ReceiptSource};
use crate::fields::{FieldRegistry, FieldScope, ResolvedFields};
use crate::money::{parse_amount, round2};
use crate::schema::{is_currency_code, ValidationError, Violations, MAX_LINE_QUANTITY};

// ============================================================================
// QR FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrFormat {
    /// `{"m":"..","r":"..","t":120.5,"i":[..]}`
    Json,
    /// `greenreceipt://r?m=..&t=..&i=[..]` or bare `m=..&t=..`
    Query,
    /// `GR1|merchant|number|date|total|items-json`
    Compact,
}

impl QrFormat {
    pub fn name(&self) -> &str {
        match self {
            QrFormat::Json => "JSON",
            QrFormat::Query => "Query string",
            QrFormat::Compact => "GR1 compact",
        }
    }
}

/// Turns one QR text format into a JSON object with (possibly abbreviated) keys
pub trait QrDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> Result<Map<String, Value>, String>;

    fn format(&self) -> QrFormat;
}

pub struct JsonQrDecoder;

impl QrDecoder for JsonQrDecoder {
    fn decode(&self, raw: &str) -> Result<Map<String, Value>, String> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err("QR JSON must be an object".to_string()),
            Err(e) => Err(format!("Malformed QR JSON: {e}")),
        }
    }

    fn format(&self) -> QrFormat {
        QrFormat::Json
    }
}

pub struct QueryQrDecoder;

impl QueryQrDecoder {
    fn percent_decode(s: &str) -> Result<String, String> {
        let spaced = s.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|cow| cow.into_owned())
            .map_err(|e| format!("Bad percent-encoding in '{s}': {e}"))
    }
}

impl QrDecoder for QueryQrDecoder {
    fn decode(&self, raw: &str) -> Result<Map<String, Value>, String> {
        let query = match raw.split_once('?') {
            Some((_, query)) => query,
            None => raw,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut map = Map::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = Self::percent_decode(key)?;
            let value = Self::percent_decode(value)?;

            let trimmed = value.trim_start();
            let parsed = if trimmed.starts_with('[') || trimmed.starts_with('{') {
                serde_json::from_str(trimmed)
                    .map_err(|e| format!("Parameter '{key}' is not valid JSON: {e}"))?
            } else {
                Value::String(value)
            };
            map.insert(key, parsed);
        }

        if map.is_empty() {
            return Err("QR query string has no parameters".to_string());
        }
        Ok(map)
    }

    fn format(&self) -> QrFormat {
        QrFormat::Query
    }
}

pub struct CompactQrDecoder;

pub const COMPACT_PREFIX: &str = "GR1|";

impl QrDecoder for CompactQrDecoder {
    fn decode(&self, raw: &str) -> Result<Map<String, Value>, String> {
        // Items JSON may itself contain '|', so split at most 6 ways
        let parts: Vec<&str> = raw.splitn(6, '|').collect();
        if parts.len() != 6 || parts[0] != "GR1" {
            return Err(format!(
                "Compact QR needs 6 '|'-separated parts, got {}",
                parts.len()
            ));
        }

        let mut map = Map::new();
        for (key, value) in [("m", parts[1]), ("r", parts[2]), ("d", parts[3]), ("t", parts[4])] {
            if !value.trim().is_empty() {
                map.insert(key.to_string(), Value::String(value.trim().to_string()));
            }
        }

        let items = parts[5].trim();
        if !items.is_empty() {
            let parsed: Value = serde_json::from_str(items)
                .map_err(|e| format!("Compact QR items are not valid JSON: {e}"))?;
            map.insert("i".to_string(), parsed);
        }

        Ok(map)
    }

    fn format(&self) -> QrFormat {
        QrFormat::Compact
    }
}

/// Guess the QR format from its first characters
pub fn detect_qr_format(raw: &str) -> Option<QrFormat> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        Some(QrFormat::Json)
    } else if raw.starts_with(COMPACT_PREFIX) {
        Some(QrFormat::Compact)
    } else if raw.contains('=') {
        Some(QrFormat::Query)
    } else {
        None
    }
}

pub fn get_decoder(format: QrFormat) -> Box<dyn QrDecoder> {
    match format {
        QrFormat::Json => Box::new(JsonQrDecoder),
        QrFormat::Query => Box::new(QueryQrDecoder),
        QrFormat::Compact => Box::new(CompactQrDecoder),
    }
}

/// Decode any supported QR text into a JSON object
pub fn decode_qr(raw: &str) -> Result<Map<String, Value>, ValidationError> {
    let raw = raw.trim();
    let format = detect_qr_format(raw).ok_or_else(|| {
        ValidationError::new("qr", "Unrecognized QR format", "QR")
    })?;

    get_decoder(format)
        .decode(raw)
        .map_err(|message| ValidationError::new("qr", message, format.name()))
}

// ============================================================================
// COERCION
// ============================================================================

/// Trimmed text; empty strings and null are absent, numbers are stringified
pub fn coerce_text(value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(format!("Expected text, got {}", type_name(other))),
    }
}

/// JSON numbers or human-written amounts ("₹1,299.00", "Rs. 45", "12-")
pub fn coerce_decimal(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| format!("Not a finite number: {n}")),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_amount(s).map(Some),
        other => Err(format!("Expected a number, got {}", type_name(other))),
    }
}

/// Unix timestamps above this are milliseconds
const MILLIS_CUTOFF: f64 = 1e11;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// RFC 3339, common date/datetime layouts, or Unix seconds/milliseconds
pub fn coerce_date(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("Not a timestamp: {n}"))
            .and_then(from_epoch)
            .map(Some),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            parse_date_str(s).map(Some)
        }
        other => Err(format!("Expected a date, got {}", type_name(other))),
    }
}

fn parse_date_str(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        if let Ok(epoch) = s.parse::<f64>() {
            return from_epoch(epoch);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
    }

    Err(format!("Unrecognized date: {s:?}"))
}

fn from_epoch(value: f64) -> Result<DateTime<Utc>, String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Not a valid timestamp: {value}"));
    }

    let parsed = if value > MILLIS_CUTOFF {
        Utc.timestamp_millis_opt(value as i64).single()
    } else {
        Utc.timestamp_opt(value as i64, 0).single()
    };
    parsed.ok_or_else(|| format!("Timestamp out of range: {value}"))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// NORMALIZED OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedLine {
    pub item_id: Option<String>,
    pub name: Option<String>,
    pub variant: Option<String>,
    pub sku: Option<String>,
    pub quantity: f64,
    /// None until the catalog supplies a price
    pub unit_price: Option<f64>,
    /// Set whenever unit_price is
    pub line_total: Option<f64>,
}

impl NormalizedLine {
    /// Best label for messages and unmatched lines
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.sku.clone())
            .or_else(|| self.item_id.clone())
            .unwrap_or_default()
    }

    pub fn is_priced(&self) -> bool {
        self.unit_price.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedReceipt {
    pub source: ReceiptSource,
    pub merchant_id: Option<String>,
    pub merchant_name: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_date: DateTime<Utc>,
    /// Declared values; defaults are applied by the totals reconciler
    pub subtotal: Option<f64>,
    pub discount: f64,
    pub tax: f64,
    pub total: Option<f64>,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub lines: Vec<NormalizedLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    pub receipt: NormalizedReceipt,
    pub warnings: Vec<String>,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct IngestPipeline {
    registry: FieldRegistry,
    settings: IngestSettings,
    max_future_skew: Duration,
}

impl IngestPipeline {
    pub fn new(settings: IngestSettings) -> Self {
        IngestPipeline {
            registry: FieldRegistry::new(),
            settings,
            max_future_skew: Duration::hours(24),
        }
    }

    /// Merchant point-of-sale payload; the merchant comes from the route
    pub fn ingest_manual(
        &self,
        merchant_id: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<Ingested, Vec<ValidationError>> {
        let object = as_object(payload)?;
        self.normalize(ReceiptSource::Manual, object, Some(merchant_id), now)
    }

    /// Scanned QR text in any supported format
    pub fn ingest_qr(&self, raw: &str, now: DateTime<Utc>) -> Result<Ingested, Vec<ValidationError>> {
        let object = decode_qr(raw).map_err(|e| vec![e])?;
        self.normalize(ReceiptSource::Qr, &object, None, now)
    }

    /// Customer-entered receipt
    pub fn ingest_upload(&self, payload: &Value, now: DateTime<Utc>) -> Result<Ingested, Vec<ValidationError>> {
        let object = as_object(payload)?;
        self.normalize(ReceiptSource::Upload, object, None, now)
    }

    fn normalize(
        &self,
        source: ReceiptSource,
        object: &Map<String, Value>,
        merchant_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Ingested, Vec<ValidationError>> {
        let mut v = Violations::new("Receipt");
        let mut warnings = Vec::new();

        let header = self.registry.resolve(FieldScope::Receipt, object);
        for key in &header.unknown {
            warnings.push(format!("Ignored unknown field '{key}'"));
        }

        let text = |v: &mut Violations, field: &str| read(v, &header, field, coerce_text);
        let decimal = |v: &mut Violations, field: &str| {
            read(v, &header, field, coerce_decimal).map(round2)
        };

        let merchant_id = match merchant_override {
            Some(id) => Some(id.to_string()),
            None => text(&mut v, "merchant_id"),
        };
        let merchant_name = text(&mut v, "merchant_name");
        let receipt_number = text(&mut v, "receipt_number");
        let notes = text(&mut v, "notes");

        let subtotal = decimal(&mut v, "subtotal");
        let discount = decimal(&mut v, "discount");
        let tax = decimal(&mut v, "tax");
        let total = decimal(&mut v, "total");
        for (field, value) in [("subtotal", subtotal), ("discount", discount), ("tax", tax), ("total", total)] {
            if let Some(amount) = value {
                v.check(amount >= 0.0, field, format!("Must be >= 0, got {amount}"));
            }
        }

        let transaction_date = match read(&mut v, &header, "transaction_date", coerce_date) {
            Some(date) => {
                v.check(
                    date <= now + self.max_future_skew,
                    "transaction_date",
                    format!("{} is in the future", date.to_rfc3339()),
                );
                date
            }
            None => {
                warnings.push("No transaction date; using ingestion time".to_string());
                now
            }
        };

        let currency = match text(&mut v, "currency") {
            Some(code) => {
                let code = code.to_uppercase();
                v.check(
                    is_currency_code(&code),
                    "currency",
                    format!("Must be a 3-letter code, got '{code}'"),
                );
                code
            }
            None => self.settings.default_currency.clone(),
        };

        let payment_method = match text(&mut v, "payment_method") {
            Some(raw) => PaymentMethod::parse(&raw).unwrap_or_else(|| {
                warnings.push(format!("Unknown payment method '{raw}'; recorded as other"));
                PaymentMethod::Other
            }),
            None if source == ReceiptSource::Manual => PaymentMethod::Cash,
            None => PaymentMethod::Other,
        };

        let lines = match header.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => self.normalize_lines(entries, &mut v, &mut warnings),
            Some(other) => {
                v.push("items", format!("Must be a list, got {}", type_name(other)));
                Vec::new()
            }
        };

        // Source-specific requirements
        if merchant_id.is_none() {
            match source {
                ReceiptSource::Upload if merchant_name.is_some() => {}
                ReceiptSource::Upload => {
                    v.push("merchant_id", "Either merchant_id or merchant_name is required")
                }
                _ => v.push("merchant_id", "Required field is missing"),
            }
        }
        match source {
            ReceiptSource::Manual if lines.is_empty() => {
                v.push("items", "At least one line item is required")
            }
            ReceiptSource::Qr | ReceiptSource::Upload if lines.is_empty() && total.is_none() => {
                v.push("items", "Provide line items or a total")
            }
            _ => {}
        }
        if source == ReceiptSource::Qr && receipt_number.is_none() {
            warnings.push("QR has no receipt number; one will be generated".to_string());
        }

        v.finish()?;

        Ok(Ingested {
            receipt: NormalizedReceipt {
                source,
                merchant_id,
                merchant_name,
                receipt_number,
                transaction_date,
                subtotal,
                discount: discount.unwrap_or(0.0),
                tax: tax.unwrap_or(0.0),
                total,
                currency,
                payment_method,
                notes,
                lines,
            },
            warnings,
        })
    }

    fn normalize_lines(
        &self,
        entries: &[Value],
        receipt_errors: &mut Violations,
        warnings: &mut Vec<String>,
    ) -> Vec<NormalizedLine> {
        let mut lines = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let prefix = format!("items[{index}]");
            let Some(object) = entry.as_object() else {
                receipt_errors.push(&prefix, format!("Must be an object, got {}", type_name(entry)));
                continue;
            };

            let mut v = Violations::new("Line");
            if let Some(line) = self.normalize_line(&prefix, object, &mut v, warnings) {
                lines.push(line);
            }
            receipt_errors.extend(v.into_errors());
        }

        lines
    }

    fn normalize_line(
        &self,
        prefix: &str,
        object: &Map<String, Value>,
        v: &mut Violations,
        warnings: &mut Vec<String>,
    ) -> Option<NormalizedLine> {
        let fields = self.registry.resolve(FieldScope::Line, object);
        for key in &fields.unknown {
            warnings.push(format!("{prefix}: ignored unknown field '{key}'"));
        }

        let mut scoped = Violations::new("Line");
        let item_id = read(&mut scoped, &fields, "item_id", coerce_text);
        let name = read(&mut scoped, &fields, "name", coerce_text);
        let variant = read(&mut scoped, &fields, "variant", coerce_text);
        let sku = read(&mut scoped, &fields, "sku", coerce_text);
        let quantity = read(&mut scoped, &fields, "quantity", coerce_decimal);
        let unit_price = read(&mut scoped, &fields, "unit_price", coerce_decimal).map(round2);
        let line_total = read(&mut scoped, &fields, "line_total", coerce_decimal).map(round2);

        // Re-key field errors under the line prefix
        for error in scoped.into_errors() {
            v.push(&format!("{prefix}.{}", error.field), error.message);
        }

        if item_id.is_none() && name.is_none() && sku.is_none() {
            v.push(&format!("{prefix}.name"), "Line needs a name, item_id or sku");
        }

        let quantity = match quantity {
            Some(q) if q > 0.0 && q <= MAX_LINE_QUANTITY => q,
            Some(q) => {
                v.push(
                    &format!("{prefix}.quantity"),
                    format!("Must be in (0, {MAX_LINE_QUANTITY}], got {q}"),
                );
                return None;
            }
            None => {
                warnings.push(format!("{prefix}: no quantity; assuming 1"));
                1.0
            }
        };

        for (field, value) in [("unit_price", unit_price), ("line_total", line_total)] {
            if let Some(amount) = value {
                v.check(amount >= 0.0, &format!("{prefix}.{field}"), format!("Must be >= 0, got {amount}"));
            }
        }
        if !v.is_empty() {
            return None;
        }

        let tolerance = self.settings.price_tolerance;
        let (unit_price, line_total) = match (unit_price, line_total) {
            (Some(price), Some(total)) => {
                let computed = round2(price * quantity);
                if (computed - total).abs() > tolerance {
                    warnings.push(format!(
                        "{prefix}: {quantity} × {price:.2} = {computed:.2} but line total says {total:.2}; keeping {total:.2}"
                    ));
                }
                (Some(price), Some(total))
            }
            (Some(price), None) => (Some(price), Some(round2(price * quantity))),
            (None, Some(total)) => (Some(round2(total / quantity)), Some(total)),
            (None, None) => (None, None),
        };

        Some(NormalizedLine {
            item_id,
            name,
            variant,
            sku,
            quantity,
            unit_price,
            line_total,
        })
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, Vec<ValidationError>> {
    payload.as_object().ok_or_else(|| {
        vec![ValidationError::new(
            "payload",
            format!("Must be a JSON object, got {}", type_name(payload)),
            "Receipt",
        )]
    })
}

/// Coerce one resolved field, recording a violation when it doesn't fit
fn read<T>(
    v: &mut Violations,
    fields: &ResolvedFields,
    name: &str,
    coerce: impl Fn(&Value) -> Result<Option<T>, String>,
) -> Option<T> {
    let value = fields.get(name)?;
    match coerce(value) {
        Ok(result) => result,
        Err(message) => {
            v.push(name, message);
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
