// ⚖️ Reconciliation Engine - lines against the catalog, totals against lines
//
// Two passes:
//   1. CatalogReconciler: match each line to a catalog item, fill missing
//      prices, flag price drift
//   2. TotalsReconciler: declared total vs subtotal - discount + tax
//
// A receipt that doesn't balance is still a receipt. Only merchant-issued
// receipts with a major discrepancy are rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::IngestSettings;
use crate::entities::{Item, ReceiptLine, ReceiptSource};
use crate::ingest::{NormalizedLine, NormalizedReceipt};
use crate::matching::{levenshtein_distance, normalize_name};
use crate::money::round2;
use crate::schema::{ValidationError, Violations};

/// Names shorter than this never fuzzy-match
pub const FUZZY_MIN_LEN: usize = 5;
pub const FUZZY_MAX_DISTANCE: usize = 2;

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Declared total matches the lines within tolerance
    #[default]
    Balanced,
    /// Off by less than the major threshold
    MinorDiscrepancy,
    MajorDiscrepancy,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Balanced => "balanced",
            ReconciliationStatus::MinorDiscrepancy => "minor_discrepancy",
            ReconciliationStatus::MajorDiscrepancy => "major_discrepancy",
        }
    }

    pub fn is_balanced(&self) -> bool {
        *self == ReconciliationStatus::Balanced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    PriceMismatch,
    UnknownItem,
    UnknownVariant,
    SubtotalMismatch,
    TotalMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,

    /// Index of the receipt line, for line-level findings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
}

impl Finding {
    fn line(kind: FindingKind, index: usize, message: String) -> Self {
        Finding {
            kind,
            line: Some(index),
            message,
            expected: None,
            actual: None,
        }
    }

    fn amounts(mut self, expected: f64, actual: f64) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }
}

/// Stored on every receipt
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub status: ReconciliationStatus,
    pub matched_lines: usize,
    pub unmatched_lines: usize,
    /// |declared total - expected total|
    pub difference: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl ReconciliationSummary {
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} matched, {} unmatched, difference {:.2}, {} findings",
            self.status.as_str(),
            self.matched_lines,
            self.unmatched_lines,
            self.difference,
            self.findings.len()
        )
    }
}

// ============================================================================
// CATALOG RECONCILER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ItemId,
    Sku,
    Name,
    Fuzzy,
}

/// Which catalog entry a line was matched to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineMatch {
    pub item_id: String,
    pub variant: Option<String>,
    pub method: MatchMethod,
}

#[derive(Debug, Clone)]
pub struct CatalogOutcome {
    pub lines: Vec<ReceiptLine>,
    /// Parallel to `lines`
    pub matches: Vec<Option<LineMatch>>,
    pub findings: Vec<Finding>,
}

impl CatalogOutcome {
    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }

    pub fn unmatched_count(&self) -> usize {
        self.matches.len() - self.matched_count()
    }
}

pub struct CatalogReconciler {
    /// Allowed |declared - catalog| unit price difference
    pub tolerance: f64,
}

impl CatalogReconciler {
    pub fn new() -> Self {
        CatalogReconciler { tolerance: 0.01 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        CatalogReconciler { tolerance }
    }

    /// Match lines against a merchant's catalog
    ///
    /// Lines that are still unpriced afterwards are validation errors.
    pub fn reconcile(
        &self,
        lines: &[NormalizedLine],
        catalog: &[Item],
        now: DateTime<Utc>,
    ) -> Result<CatalogOutcome, Vec<ValidationError>> {
        self.run(lines, Some(catalog), now)
    }

    /// Accept lines as declared (merchant unknown, nothing to match against)
    pub fn passthrough(&self, lines: &[NormalizedLine]) -> Result<CatalogOutcome, Vec<ValidationError>> {
        self.run(lines, None, Utc::now())
    }

    fn run(
        &self,
        lines: &[NormalizedLine],
        catalog: Option<&[Item]>,
        now: DateTime<Utc>,
    ) -> Result<CatalogOutcome, Vec<ValidationError>> {
        let mut v = Violations::new("Line");
        let mut outcome = CatalogOutcome {
            lines: Vec::with_capacity(lines.len()),
            matches: Vec::with_capacity(lines.len()),
            findings: Vec::new(),
        };

        for (index, line) in lines.iter().enumerate() {
            let found = catalog.and_then(|items| find_match(line, items));

            let mut receipt_line = ReceiptLine {
                item_id: line.item_id.clone(),
                name: line.label(),
                variant: line.variant.clone(),
                sku: line.sku.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price.unwrap_or_default(),
                line_total: line.line_total.unwrap_or_default(),
                category: None,
                matched: false,
            };

            match found {
                Some((item, method)) => {
                    let line_match = self.apply_match(index, line, item, method, now, &mut receipt_line, &mut outcome.findings);
                    outcome.matches.push(Some(line_match));
                }
                None => {
                    if catalog.is_some() {
                        outcome.findings.push(Finding::line(
                            FindingKind::UnknownItem,
                            index,
                            format!("'{}' is not in the merchant's catalog", receipt_line.name),
                        ));
                    }
                    if !line.is_priced() {
                        v.push(
                            &format!("items[{index}].unit_price"),
                            format!("No price for '{}' and no catalog match to take it from", receipt_line.name),
                        );
                    }
                    outcome.matches.push(None);
                }
            }

            outcome.lines.push(receipt_line);
        }

        v.finish()?;
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_match(
        &self,
        index: usize,
        line: &NormalizedLine,
        item: &Item,
        method: MatchMethod,
        now: DateTime<Utc>,
        receipt_line: &mut ReceiptLine,
        findings: &mut Vec<Finding>,
    ) -> LineMatch {
        // A sku match may have pinned the variant
        let variant = match method {
            MatchMethod::Sku => sku_variant(item, line.sku.as_deref()).or_else(|| line.variant.clone()),
            _ => line.variant.clone(),
        };

        let variant = match variant {
            Some(name) => match item.find_variant(&name) {
                Some(found) => Some(found.name.clone()),
                None => {
                    findings.push(Finding::line(
                        FindingKind::UnknownVariant,
                        index,
                        format!("'{}' has no variant '{}'", item.name, name),
                    ));
                    None
                }
            },
            None => None,
        };

        let catalog_price = match &variant {
            Some(name) => item.effective_variant_price(name, now),
            None => item.effective_price(now),
        };

        match line.unit_price {
            None => {
                receipt_line.unit_price = catalog_price;
                receipt_line.line_total = round2(catalog_price * line.quantity);
            }
            Some(declared) if (declared - catalog_price).abs() > self.tolerance => {
                findings.push(
                    Finding::line(
                        FindingKind::PriceMismatch,
                        index,
                        format!("'{}' charged {:.2}, catalog price is {:.2}", item.name, declared, catalog_price),
                    )
                    .amounts(catalog_price, declared),
                );
            }
            Some(_) => {}
        }

        receipt_line.item_id = Some(item.id.clone());
        receipt_line.name = item.name.clone();
        receipt_line.variant = variant.clone();
        receipt_line.category = item.category.clone();
        if receipt_line.sku.is_none() {
            receipt_line.sku = item.sku.clone();
        }
        receipt_line.matched = true;

        LineMatch {
            item_id: item.id.clone(),
            variant,
            method,
        }
    }
}

impl Default for CatalogReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the catalog item a line refers to
///
/// Order: item id, sku (item or variant), normalized name, fuzzy name.
/// Id matches may hit inactive items; the others only see active ones.
pub fn find_match<'a>(line: &NormalizedLine, catalog: &'a [Item]) -> Option<(&'a Item, MatchMethod)> {
    if let Some(id) = &line.item_id {
        if let Some(item) = catalog.iter().find(|i| &i.id == id) {
            return Some((item, MatchMethod::ItemId));
        }
    }

    let active = || catalog.iter().filter(|i| i.is_active);

    if let Some(sku) = &line.sku {
        let hit = active().find(|item| {
            item.sku.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(sku))
                || sku_variant(item, Some(sku)).is_some()
        });
        if let Some(item) = hit {
            return Some((item, MatchMethod::Sku));
        }
    }

    let name = normalize_name(line.name.as_deref()?);
    if name.is_empty() {
        return None;
    }

    if let Some(item) = active().find(|item| normalize_name(&item.name) == name) {
        return Some((item, MatchMethod::Name));
    }

    if name.chars().count() < FUZZY_MIN_LEN {
        return None;
    }

    active()
        .map(|item| (item, levenshtein_distance(&name, &normalize_name(&item.name))))
        .filter(|(_, distance)| *distance <= FUZZY_MAX_DISTANCE)
        .min_by_key(|(_, distance)| *distance)
        .map(|(item, _)| (item, MatchMethod::Fuzzy))
}

fn sku_variant(item: &Item, sku: Option<&str>) -> Option<String> {
    let sku = sku?;
    item.variants
        .iter()
        .find(|v| v.sku.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(sku)))
        .map(|v| v.name.clone())
}

// ============================================================================
// TOTALS RECONCILER
// ============================================================================

/// Final header amounts after defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct TotalsCheck {
    pub totals: Totals,
    pub status: ReconciliationStatus,
    pub difference: f64,
    pub findings: Vec<Finding>,
}

pub struct TotalsReconciler {
    /// Differences below this are balanced (default: 0.01)
    pub tolerance: f64,

    /// Differences at or above this are major (default: 10.00)
    pub major_discrepancy_threshold: f64,
}

impl TotalsReconciler {
    pub fn new() -> Self {
        TotalsReconciler {
            tolerance: 0.01,
            major_discrepancy_threshold: 10.0,
        }
    }

    pub fn with_thresholds(tolerance: f64, major_threshold: f64) -> Self {
        TotalsReconciler {
            tolerance,
            major_discrepancy_threshold: major_threshold,
        }
    }

    /// Formula: subtotal - discount + tax = total
    ///
    /// With lines, the subtotal is their sum. Without lines the declared
    /// subtotal (or the total itself) is all there is to go on.
    pub fn check(
        &self,
        lines: &[ReceiptLine],
        declared_subtotal: Option<f64>,
        discount: f64,
        tax: f64,
        declared_total: Option<f64>,
    ) -> TotalsCheck {
        let mut findings = Vec::new();
        let line_sum = round2(lines.iter().map(|l| l.line_total).sum());

        let subtotal = match (lines.is_empty(), declared_subtotal, declared_total) {
            (false, Some(declared), _) => {
                if (declared - line_sum).abs() >= self.tolerance {
                    findings.push(
                        Finding {
                            kind: FindingKind::SubtotalMismatch,
                            line: None,
                            message: format!("Declared subtotal {declared:.2} but lines add up to {line_sum:.2}"),
                            expected: None,
                            actual: None,
                        }
                        .amounts(line_sum, declared),
                    );
                }
                declared
            }
            (false, None, _) => line_sum,
            (true, Some(declared), _) => declared,
            (true, None, Some(total)) => round2((total + discount - tax).max(0.0)),
            (true, None, None) => 0.0,
        };

        let basis = if lines.is_empty() { subtotal } else { line_sum };
        let expected = round2((basis - discount + tax).max(0.0));
        let total = declared_total.unwrap_or(expected);
        let difference = round2((total - expected).abs());

        let status = if difference < self.tolerance {
            ReconciliationStatus::Balanced
        } else if difference < self.major_discrepancy_threshold {
            ReconciliationStatus::MinorDiscrepancy
        } else {
            ReconciliationStatus::MajorDiscrepancy
        };

        if !status.is_balanced() {
            findings.push(
                Finding {
                    kind: FindingKind::TotalMismatch,
                    line: None,
                    message: format!("Total {total:.2} but lines imply {expected:.2} (off by {difference:.2})"),
                    expected: None,
                    actual: None,
                }
                .amounts(expected, total),
            );
        }

        TotalsCheck {
            totals: Totals {
                subtotal,
                discount,
                tax,
                total,
            },
            status,
            difference,
            findings,
        }
    }
}

impl Default for TotalsReconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub lines: Vec<ReceiptLine>,
    pub matches: Vec<Option<LineMatch>>,
    pub totals: Totals,
    pub summary: ReconciliationSummary,
}

pub struct ReconciliationEngine {
    pub catalog: CatalogReconciler,
    pub totals: TotalsReconciler,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            catalog: CatalogReconciler::new(),
            totals: TotalsReconciler::new(),
        }
    }

    pub fn from_settings(settings: &IngestSettings) -> Self {
        ReconciliationEngine {
            catalog: CatalogReconciler::with_tolerance(settings.price_tolerance),
            totals: TotalsReconciler::with_thresholds(settings.price_tolerance, settings.major_discrepancy),
        }
    }

    /// Run both passes; `catalog` is None when the merchant isn't registered
    pub fn reconcile(
        &self,
        receipt: &NormalizedReceipt,
        catalog: Option<&[Item]>,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, Vec<ValidationError>> {
        let outcome = match catalog {
            Some(items) => self.catalog.reconcile(&receipt.lines, items, now)?,
            None => self.catalog.passthrough(&receipt.lines)?,
        };

        let check = self.totals.check(
            &outcome.lines,
            receipt.subtotal,
            receipt.discount,
            receipt.tax,
            receipt.total,
        );

        if receipt.source == ReceiptSource::Manual
            && check.status == ReconciliationStatus::MajorDiscrepancy
        {
            return Err(vec![ValidationError::new(
                "total",
                format!(
                    "Total {:.2} is off by {:.2} from the line items",
                    check.totals.total, check.difference
                ),
                "Receipt",
            )]);
        }

        let matched_lines = outcome.matched_count();
        let unmatched_lines = outcome.unmatched_count();
        let mut findings = outcome.findings;
        findings.extend(check.findings);

        Ok(Reconciled {
            lines: outcome.lines,
            matches: outcome.matches,
            totals: check.totals,
            summary: ReconciliationSummary {
                status: check.status,
                matched_lines,
                unmatched_lines,
                difference: check.difference,
                findings,
            },
        })
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
