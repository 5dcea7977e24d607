#[cfg(test)] use mockall::automock;
use tracing::trace;
use crate::endpoint::Endpoint;

/// The registry of observe relationships (subscriptions) is maintained by the resource layer.
///  The transaction layer only needs to tell it when a peer stopped responding: a confirmable
///  notification that times out means the observer is gone.
#[cfg_attr(test, automock)]
pub trait ObserverRegistry: Send {
    fn remove_subscriptions_for(&mut self, endpoint: &Endpoint);
}

/// For nodes that do not support observing resources
pub struct NoObservers;

impl ObserverRegistry for NoObservers {
    fn remove_subscriptions_for(&mut self, endpoint: &Endpoint) {
        trace!("no observers to remove for {}", endpoint);
    }
}
