pub mod payments;

// Handler modules import AppState as crate::handlers::AppState
pub use crate::AppState;
