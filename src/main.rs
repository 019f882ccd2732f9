use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use greenreceipt::{catalog, db, receipts, spending, Config, DateRange};

const USAGE: &str = "\
Usage:
  greenreceipt init
  greenreceipt import-items <merchant_id> <items.csv>
  greenreceipt ingest <customer_id> <payload.json|qr.txt>
  greenreceipt summary <customer_id>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("greenreceipt=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = Config::from_env()?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["init"] => run_init(&config),
        ["import-items", merchant_id, csv_path] => run_import(&config, merchant_id, Path::new(csv_path)),
        ["ingest", customer_id, input] => run_ingest(&config, customer_id, Path::new(input)),
        ["summary", customer_id] => run_summary(&config, customer_id),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn run_init(config: &Config) -> Result<()> {
    println!("🗄️  Initializing database at {:?}", config.db_path);
    db::open(&config.db_path)?;
    println!("✓ Schema ready (WAL mode, default categories seeded)");
    Ok(())
}

fn run_import(config: &Config, merchant_id: &str, csv_path: &Path) -> Result<()> {
    println!("📂 Importing items from {:?}", csv_path);
    let conn = db::open(&config.db_path)?;

    let report = catalog::import_items(&conn, merchant_id, csv_path)?;

    println!("✓ Inserted:   {}", report.inserted);
    println!("✓ Duplicates: {}", report.duplicates);
    if !report.rejected.is_empty() {
        println!("⚠️  Rejected:  {}", report.rejected.len());
        for (line, reason) in &report.rejected {
            println!("   line {line}: {reason}");
        }
    }
    Ok(())
}

fn run_ingest(config: &Config, customer_id: &str, input: &Path) -> Result<()> {
    let raw = fs::read_to_string(input).with_context(|| format!("Failed to read {:?}", input))?;
    let conn = db::open(&config.db_path)?;

    let is_json_file = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let outcome = if is_json_file {
        let payload: serde_json::Value =
            serde_json::from_str(&raw).with_context(|| format!("{:?} is not valid JSON", input))?;
        receipts::upload_receipt(&conn, &config.ingest, customer_id, &payload)?
    } else {
        receipts::scan_receipt(&conn, &config.ingest, customer_id, raw.trim())?
    };

    let receipt = &outcome.receipt;
    println!("🧾 Receipt {} ({})", receipt.receipt_number, receipt.id);
    println!("   Merchant: {}", receipt.merchant_name.as_deref().unwrap_or(&receipt.merchant_id));
    println!("   Source:   {}", receipt.source.as_str());
    println!("   Items:    {} ({} lines)", receipt.item_count(), receipt.lines.len());
    println!("   Total:    {:.2} {}", receipt.total, receipt.currency);
    println!("   Status:   {}", receipt.reconciliation.summary());
    if receipt.reconciliation.has_findings() {
        for finding in &receipt.reconciliation.findings {
            println!("   • {}", finding.message);
        }
    }
    if outcome.claimed_existing {
        println!("   Claimed an existing merchant receipt");
    }
    for warning in &outcome.warnings {
        println!("⚠️  {warning}");
    }
    Ok(())
}

fn run_summary(config: &Config, customer_id: &str) -> Result<()> {
    let conn = db::open(&config.db_path)?;
    let summary = spending::customer_summary(&conn, customer_id, DateRange::default())?;

    if summary.receipt_count == 0 {
        bail!("No receipts recorded for {customer_id}");
    }

    println!("📊 Spending for {customer_id}");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Receipts: {}", summary.receipt_count);
    println!("Total:    {:.2} ({})", summary.total_spent, summary.currencies.join(", "));
    println!("Average:  {:.2}", summary.average_receipt);

    println!("\nBy merchant:");
    for merchant in &summary.by_merchant {
        let name = merchant.merchant_name.as_deref().unwrap_or(&merchant.merchant_id);
        println!("  {:<30} {:>10.2}  ({} receipts)", name, merchant.total, merchant.receipts);
    }

    println!("\nBy category:");
    for category in &summary.by_category {
        println!("  {:<30} {:>10.2}", category.category, category.total);
    }

    println!("\nBy month:");
    for month in &summary.by_month {
        println!("  {}  {:>10.2}", month.month, month.total);
    }
    Ok(())
}
