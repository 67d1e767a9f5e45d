//! Shared proxy rotation state
//!
//! One cursor over the configured proxy list, shared by every in-flight request. Reads and
//! advances are serialized by a single lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::models::ProxyEndpoint;

#[derive(Debug)]
struct Cursor {
    index: usize,
    current: Arc<ProxyEndpoint>,
}

/// Rotates through forward-proxies in configured order
#[derive(Debug)]
pub struct ProxyRotation {
    proxies: Vec<Arc<ProxyEndpoint>>,
    cursor: Mutex<Cursor>,
}

impl ProxyRotation {
    /// Fails when `proxies` is empty
    pub fn new(proxies: Vec<ProxyEndpoint>) -> Result<Self> {
        let proxies: Vec<Arc<ProxyEndpoint>> = proxies.into_iter().map(Arc::new).collect();
        let first = proxies
            .first()
            .cloned()
            .ok_or(RelayError::NoProxiesConfigured)?;

        Ok(Self {
            proxies,
            cursor: Mutex::new(Cursor {
                index: 0,
                current: first,
            }),
        })
    }

    /// Currently active proxy
    pub fn current(&self) -> Arc<ProxyEndpoint> {
        self.cursor.lock().current.clone()
    }

    /// Index of the currently active proxy
    pub fn index(&self) -> usize {
        self.cursor.lock().index
    }

    /// Move to the next proxy, wrapping around, and return it
    pub fn advance(&self) -> Arc<ProxyEndpoint> {
        self.advance_indexed().1
    }

    /// Like [`advance`](Self::advance), also returning the new index
    pub fn advance_indexed(&self) -> (usize, Arc<ProxyEndpoint>) {
        let mut cursor = self.cursor.lock();
        cursor.index = (cursor.index + 1) % self.proxies.len();
        cursor.current = self.proxies[cursor.index].clone();
        (cursor.index, cursor.current.clone())
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Always false; construction rejects an empty list
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
