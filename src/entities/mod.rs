pub mod lesson;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod user;

pub use order::OrderStatus;
pub use payment::PaymentStatus;
