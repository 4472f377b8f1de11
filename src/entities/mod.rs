pub mod order;
pub mod order_item;

pub use order::{OrderStatus, PaymentStatus};
