use std::sync::Arc;

use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// Secret for verifying identity-provider webhook signatures; the
    /// webhook endpoint refuses to run without one.
    pub webhook_secret: Option<String>,
    /// Enables the legacy direct-key membership shim on send (see
    /// parley-db messages module).
    pub legacy_direct_keys: bool,
}
