use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use greenreceipt::{db, ShopProfile, User};

fn run(db_path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_greenreceipt"))
        .args(args)
        .env("GREENRECEIPT_DB_PATH", db_path)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn seed_users(db_path: &Path) -> (User, User) {
    let conn = db::open(db_path).unwrap();
    let merchant = User::merchant("Ravi", "ravi@shop.in", ShopProfile::new("Ravi Stores"));
    let customer = User::customer("Asha", "asha@example.com");
    db::insert_user(&conn, &merchant).unwrap();
    db::insert_user(&conn, &customer).unwrap();
    (merchant, customer)
}

#[test]
fn test_import_items_reports_rejects_and_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("greenreceipt.db");

    let init = run(&db_path, &["init"]);
    assert!(init.status.success());
    assert!(stdout(&init).contains("Schema ready"));

    let (merchant, _) = seed_users(&db_path);

    let csv_path = dir.path().join("items.csv");
    fs::write(
        &csv_path,
        "name,price,stock,unit,category,sku,description\n\
         Basmati Rice,₹120,10,kg,Groceries,RICE-1,Long grain\n\
         Toor Dal,95.50,4,,Groceries,,\n\
         Broken Row,abc,1,,,,\n\
         basmati rice,130,2,,,,\n\
         Green Tea,-5,1,,,,\n\
         Ghee,450,2,litre,,GHEE-1,\n",
    )
    .unwrap();

    let output = run(
        &db_path,
        &["import-items", &merchant.id, csv_path.to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let out = stdout(&output);
    assert!(out.contains("Inserted:   3"), "{out}");
    assert!(out.contains("Duplicates: 1"), "{out}");
    assert!(out.contains("Rejected:  2"), "{out}");
    assert!(out.contains("line 4:"), "{out}");
    assert!(out.contains("line 6:"), "{out}");
    assert!(!out.contains("line 5:"), "{out}");

    let conn = db::open(&db_path).unwrap();
    let names: Vec<String> = db::get_merchant_items(&conn, &merchant.id)
        .unwrap()
        .into_iter()
        .map(|item| item.name)
        .collect();
    assert_eq!(names, vec!["Basmati Rice", "Ghee", "Toor Dal"]);
}

#[test]
fn test_import_items_unknown_merchant_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("greenreceipt.db");
    let csv_path = dir.path().join("items.csv");
    fs::write(&csv_path, "name,price\nTea,10\n").unwrap();

    let output = run(&db_path, &["import-items", "nobody", csv_path.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_ingest_upload_then_summary() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("greenreceipt.db");
    let (_, customer) = seed_users(&db_path);

    let payload_path = dir.path().join("bakery.json");
    fs::write(
        &payload_path,
        r#"{
            "merchant_name": "Corner Bakery",
            "receipt_number": "B-1",
            "date": "2026-03-01",
            "items": [{ "name": "Croissant", "qty": 2, "price": 45.0 }],
            "total": 90.0
        }"#,
    )
    .unwrap();

    let ingest = run(&db_path, &["ingest", &customer.id, payload_path.to_str().unwrap()]);
    assert!(ingest.status.success(), "{}", String::from_utf8_lossy(&ingest.stderr));
    let out = stdout(&ingest);
    assert!(out.contains("Receipt B-1"), "{out}");
    assert!(out.contains("Source:   upload"), "{out}");
    assert!(out.contains("Items:    2 (1 lines)"), "{out}");

    let summary = run(&db_path, &["summary", &customer.id]);
    assert!(summary.status.success());
    let out = stdout(&summary);
    assert!(out.contains("Receipts: 1"), "{out}");
    assert!(out.contains("Total:    90.00"), "{out}");
    assert!(out.contains("Corner Bakery"), "{out}");
}

#[test]
fn test_usage_on_unknown_command() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("greenreceipt.db"), &["frobnicate"]);
    assert_eq!(output.status.code(), Some(2));
}
