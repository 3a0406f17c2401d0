//! HTTP routes.

pub mod health;
pub mod session;
pub mod stats;

pub use health::{HealthResponse, health_routes};
pub use session::{
    SessionView, StatusResponse, StoreDataRequest, get_data_handler, login_handler,
    logout_handler, session_handler, session_routes, store_data_handler,
};
pub use stats::{stats_handler, stats_routes};
