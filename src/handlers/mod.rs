mod contact;
mod health;
mod metrics;

pub use contact::contact_route;
pub use health::health_handler;
pub use metrics::metrics_handler;

use crate::error::AppError;

// Unknown paths
pub async fn not_found() -> AppError {
    AppError::NotFound
}
