//! Serialized access to a token shared between threads

use core::ops::{Deref, DerefMut};
use core::time::Duration;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::CryptoToken;

/// A token shared between request threads
///
/// Each derivation sequence acquires the token for its whole duration; concurrent requests queue
/// on the lock rather than interleaving operations on one module session.
#[derive(Debug)]
pub struct SharedToken<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedToken<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CryptoToken> SharedToken<T> {
    /// Share `token`
    pub fn new(token: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(token)),
        }
    }

    /// Acquire exclusive use of the token, blocking until it is free
    pub fn acquire(&self) -> TokenSession<'_, T> {
        TokenSession {
            guard: self.inner.lock(),
        }
    }

    /// Acquire exclusive use of the token, giving up after `timeout`
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<TokenSession<'_, T>> {
        self.inner
            .try_lock_for(timeout)
            .map(|guard| TokenSession { guard })
    }
}

/// Exclusive use of a shared token, released on drop
#[derive(Debug)]
pub struct TokenSession<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for TokenSession<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TokenSession<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyAlgorithm, KeyUsages, SoftToken};

    #[test]
    fn test_session_is_exclusive() {
        let shared = SharedToken::new(SoftToken::new("internal"));
        let session = shared.acquire();
        assert!(shared.try_acquire_for(Duration::from_millis(10)).is_none());
        drop(session);
        assert!(shared.try_acquire_for(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn test_clones_share_the_token() {
        let shared = SharedToken::new(SoftToken::new("internal"));
        let other = shared.clone();
        {
            let mut session = shared.acquire();
            session
                .generate_key(KeyAlgorithm::Aes128, KeyUsages::ALL)
                .unwrap();
        }
        assert_eq!(other.acquire().key_count(), 1);
    }
}
