//! Process-scope lifecycle: a lazily-initialised singleton with explicit init/shutdown,
//! refcounted so nested init/shutdown pairs compose. Operations are disallowed before the
//! first init and after the refcount drops to zero.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};

static REFCOUNT: AtomicUsize = AtomicUsize::new(0);
static ENGINE: OnceCell<()> = OnceCell::new();

/// RAII guard for one `Engine::init` call; dropping it decrements the refcount and tears
/// down process-scope state once it reaches zero.
#[derive(Debug)]
pub struct Engine {
    _private: (),
}

impl Engine {
    /// Initialise process-scope state (idempotent, reference-counted). Every successful call
    /// must be matched by dropping the returned guard.
    pub fn init() -> Self {
        ENGINE.get_or_init(|| {
            tracing::info!("pgm engine initialised");
        });
        REFCOUNT.fetch_add(1, Ordering::SeqCst);
        Self { _private: () }
    }

    /// True once at least one `Engine` guard is live.
    pub fn is_initialized() -> bool {
        REFCOUNT.load(Ordering::SeqCst) > 0
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if REFCOUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::info!("pgm engine shut down");
        }
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        REFCOUNT.fetch_add(1, Ordering::SeqCst);
        Self { _private: () }
    }
}
