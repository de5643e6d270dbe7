//! Administrative HTTP surface.

pub mod routes;

pub use routes::{AppState, admin_routes};
