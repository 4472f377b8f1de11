// Checkout flow
pub mod checkout;

// Building blocks used by checkout
pub mod gateway;
pub mod money;
pub mod signature;
