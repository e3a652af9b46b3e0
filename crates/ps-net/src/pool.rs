//! Process-wide idle connection pool.

use crate::transport::BoxedIoStream;
use crate::url::Scheme;
use crate::url::TargetUrl;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// Logical key used for pooling reusable connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl ConnectionKey {
    pub fn from_url(url: &TargetUrl) -> Self {
        Self {
            scheme: url.scheme(),
            host: url.host().to_owned(),
            port: url.port(),
        }
    }
}

/// Pool telemetry contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub keys: usize,
    pub idle_connections: usize,
}

/// Connection pool shared by every navigation worker.
///
/// Implementations synchronise internally; the pool is the only mutable state
/// shared between tabs.
pub trait ConnectionPool: Send + Sync {
    fn checkout(&self, key: &ConnectionKey) -> Option<BoxedIoStream>;
    fn checkin(&self, key: ConnectionKey, stream: BoxedIoStream);
    fn clear(&self);
    fn stats(&self) -> PoolStats;
}

/// In-memory idle connection pool with per-origin cap.
pub struct InMemoryConnectionPool {
    max_idle_per_key: usize,
    idle: Mutex<HashMap<ConnectionKey, VecDeque<BoxedIoStream>>>,
}

impl InMemoryConnectionPool {
    pub fn new(max_idle_per_key: usize) -> Self {
        Self {
            max_idle_per_key,
            idle: Mutex::new(HashMap::new()),
        }
    }

    fn idle(&self) -> MutexGuard<'_, HashMap<ConnectionKey, VecDeque<BoxedIoStream>>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryConnectionPool {
    fn default() -> Self {
        Self::new(8)
    }
}

impl ConnectionPool for InMemoryConnectionPool {
    fn checkout(&self, key: &ConnectionKey) -> Option<BoxedIoStream> {
        let mut idle = self.idle();
        let queue = idle.get_mut(key)?;
        let stream = queue.pop_front();

        if queue.is_empty() {
            idle.remove(key);
        }

        stream
    }

    fn checkin(&self, key: ConnectionKey, stream: BoxedIoStream) {
        let mut idle = self.idle();
        let queue = idle.entry(key).or_default();
        if queue.len() >= self.max_idle_per_key {
            return;
        }

        queue.push_back(stream);
    }

    fn clear(&self) {
        self.idle().clear();
    }

    fn stats(&self) -> PoolStats {
        let idle = self.idle();
        PoolStats {
            keys: idle.len(),
            idle_connections: idle.values().map(VecDeque::len).sum(),
        }
    }
}
