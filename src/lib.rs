// GreenReceipt - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod money;
pub mod matching;
pub mod fields;         // Field registry - canonical names + aliases
pub mod schema;         // Shape validation for every entity
pub mod ingest;         // QR / manual / upload payloads → NormalizedReceipt
pub mod reconciliation; // Catalog + totals reconciliation
pub mod accounts;
pub mod catalog;
pub mod receipts;
pub mod spending;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{Config, IngestSettings};
pub use db::{
    DateRange, Event, ImportReport, InsufficientStock, StockChange,
    open, setup_database, insert_event, get_events_for_entity,
};
pub use entities::{
    Category, Discount, DiscountKind, Item, ItemFilter, ItemVariant, ItemView,
    PaymentMethod, Receipt, ReceiptLine, ReceiptSource, ReceiptStatus,
    ShopProfile, StockStatus, Unit, User, UserRole,
};
pub use error::{AppError, AppResult};
pub use fields::{FieldRegistry, FieldScope, FieldType};
pub use schema::{SchemaValidator, ValidationError, ValidationResult};
pub use ingest::{
    IngestPipeline, Ingested, NormalizedLine, NormalizedReceipt,
    QrDecoder, QrFormat, detect_qr_format, get_decoder,
};
pub use reconciliation::{
    ReconciliationEngine, ReconciliationStatus, ReconciliationSummary,
    Finding, FindingKind, MatchMethod,
};
pub use receipts::{ReceiptOutcome, ReceiptView};
pub use spending::{CustomerSummary, MerchantSummary};

#[cfg(feature = "server")]
pub use api::{build_router, AppState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
