//! Restart handler contract for replacing a failed subscription.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use super::Subscription;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Attempts to replace a subscription that stopped delivering messages
///
/// Returning the same subscription (or `None`) means nothing was recovered; a
/// different subscription replaces the old one; an error fails the restart.
#[async_trait]
pub trait SubscriptionRestarter: Send + Sync {
    async fn restart(
        &self,
        subscription: Arc<dyn Subscription>,
    ) -> Result<Option<Arc<dyn Subscription>>, BoxError>;
}

struct FnRestarter<F>(F);

#[async_trait]
impl<F, Fut> SubscriptionRestarter for FnRestarter<F>
where
    F: Fn(Arc<dyn Subscription>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Arc<dyn Subscription>>, BoxError>> + Send,
{
    async fn restart(
        &self,
        subscription: Arc<dyn Subscription>,
    ) -> Result<Option<Arc<dyn Subscription>>, BoxError> {
        (self.0)(subscription).await
    }
}

/// Wrap an async closure as a restart handler
///
/// ```rust
/// use health_checks::subscription::{restart_handler, BoxError, PubSubSubscription, Subscription};
/// use std::sync::Arc;
///
/// let handler = restart_handler(|old: Arc<dyn Subscription>| async move {
///     let fresh: Arc<dyn Subscription> =
///         Arc::new(PubSubSubscription::new(old.name(), "projects/demo"));
///     Ok::<_, BoxError>(Some(fresh))
/// });
/// # let _ = handler;
/// ```
pub fn restart_handler<F, Fut>(handler: F) -> Arc<dyn SubscriptionRestarter>
where
    F: Fn(Arc<dyn Subscription>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Arc<dyn Subscription>>, BoxError>> + Send + 'static,
{
    Arc::new(FnRestarter(handler))
}
