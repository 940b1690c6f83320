use crate::friend_store::FriendStore;
use crate::global_id::Locator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Access to friend records.
    pub friend_store: Arc<dyn FriendStore>,

    /// Resolves global ids found in queued arguments.
    pub locator: Arc<dyn Locator>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        friend_store: Arc<dyn FriendStore>,
        locator: Arc<dyn Locator>,
    ) -> Self {
        Self {
            cancellation_token,
            friend_store,
            locator,
        }
    }

    /// Same stores, cancelled together with this context but also on its own.
    pub fn child(&self) -> Self {
        Self {
            cancellation_token: self.cancellation_token.child_token(),
            friend_store: Arc::clone(&self.friend_store),
            locator: Arc::clone(&self.locator),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// App name used when turning records into global ids.
    pub fn app(&self) -> &str {
        self.locator.app()
    }
}
