use std::sync::Arc;

use crate::notifier::Notifier;
use crate::rate_limit::RateLimiter;
use crate::routes::RouteTable;

// app's shared state
#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,          // shared by every route
    pub notifier: Arc<dyn Notifier>,
    pub routes: Arc<RouteTable>,       // read-only after startup
    pub trust_proxy: bool,             // honour forwarding headers
}
