pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod reactions;
pub mod state;
pub mod typing;
pub mod users;
pub mod webhook;

use error::ApiError;

/// Run blocking store work off the async runtime, mapping a panicked or
/// cancelled task to an internal error.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("blocking task failed: {}", e);
            Err(ApiError::Internal)
        }
    }
}
