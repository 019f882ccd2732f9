// Entity Models - documents persisted by the store
//
// Each entity has:
// - Stable identity (UUID)
// - Declarative field constraints (enforced in schema.rs)
// - Derived fields computed at read time, never stored

pub mod user;
pub mod category;
pub mod item;
pub mod receipt;

pub use user::{ShopProfile, User, UserRole};
pub use category::{category_path, default_categories, would_create_cycle, Category};
pub use item::{
    Discount, DiscountKind, Item, ItemFilter, ItemVariant, ItemView, StockStatus, Unit,
    DEFAULT_LOW_STOCK_THRESHOLD, MAX_STOCK,
};
pub use receipt::{
    fingerprint, generate_receipt_number, PaymentMethod, Receipt, ReceiptLine, ReceiptSource,
    ReceiptStatus,
};
