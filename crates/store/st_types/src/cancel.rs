use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// A cloneable cancellation signal.
///
/// Engine operations check the token at every suspension point (KV commit,
/// prefix scan, chunk-store call). Work that already committed stays
/// committed; the caller just stops observing further progress and gets
/// [`crate::ErrorKind::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that never fires, for callers without a cancellation path.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Errors with `Cancelled` if the token has fired.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled("operation cancelled by caller"))
        } else {
            Ok(())
        }
    }
}
