//! Call-scoped context carrier.
//!
//! A [`Context`] is an immutable chain of key/value bindings plus an optional
//! cancellation signal. Deriving a child never mutates the parent, so a context
//! can be cloned freely and handed down a call graph; each layer only sees the
//! bindings made by its callers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! static REQUEST_ID: ContextKey = ContextKey::new("request-id");
//!
//! let ctx = Context::background().with_value(&REQUEST_ID, Arc::new(42_u64));
//! assert_eq!(ctx.value::<u64>(&REQUEST_ID).as_deref(), Some(&42));
//! ```

mod cancel;


use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub use cancel::CancelHandle;
use cancel::CancelNode;

use crate::error::{CoreError, CoreResult};

/// ## Summary
/// Identifies a slot in a [`Context`].
///
/// Keys are compared by address, not by name, so they must be declared as
/// `static` items. Two keys that share a name are still distinct keys.
pub struct ContextKey {
    name: &'static str,
}

impl ContextKey {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// ## Summary
    /// Human readable name, only used for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

struct ValueNode {
    key: &'static ContextKey,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

/// ## Summary
/// Immutable, chainable key/value carrier passed explicitly through a call graph.
#[derive(Clone, Default)]
pub struct Context {
    values: Option<Arc<ValueNode>>,
    cancel: Option<Arc<CancelNode>>,
}

impl Context {
    /// ## Summary
    /// Root context: no bindings and never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// ## Summary
    /// Derives a child context with `value` bound under `key`.
    ///
    /// A binding shadows any binding of the same key made further up the chain.
    #[must_use]
    pub fn with_value<T>(&self, key: &'static ContextKey, value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            values: Some(Arc::new(ValueNode {
                key,
                value,
                parent: self.values.clone(),
            })),
            cancel: self.cancel.clone(),
        }
    }

    /// ## Summary
    /// Looks up the nearest binding for `key`.
    ///
    /// Returns `None` when nothing is bound under `key`, or when the nearest
    /// binding holds a value that is not a `T`.
    #[must_use]
    pub fn value<T>(&self, key: &'static ContextKey) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            if std::ptr::eq(current.key, key) {
                return Arc::clone(&current.value).downcast::<T>().ok();
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// ## Summary
    /// Derives a cancellable child context.
    ///
    /// Cancelling the returned handle cancels the child and everything derived
    /// from it. The parent is unaffected, but cancelling the parent still
    /// cancels the child.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let node = Arc::new(CancelNode::new(self.cancel.clone()));
        let child = Self {
            values: self.values.clone(),
            cancel: Some(Arc::clone(&node)),
        };
        (child, CancelHandle::new(node))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|node| node.is_cancelled())
    }

    /// ## Summary
    /// Resolves once this context is cancelled. Never resolves for a context
    /// without a cancellable ancestor.
    pub async fn cancelled(&self) {
        match &self.cancel {
            Some(node) => node.cancelled().await,
            None => std::future::pending().await,
        }
    }

    /// ## Summary
    /// Fails fast when the context has been cancelled.
    ///
    /// ## Errors
    /// Returns [`CoreError::Cancelled`] if the context is cancelled.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = Vec::new();
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            keys.push(current.key.name());
            node = current.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("keys", &keys)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
