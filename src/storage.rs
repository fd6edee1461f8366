//! Key-value persistence collaborator.
//!
//! The SDK keeps two durable strings: a minted device id and the
//! "already authenticated" marker that lets a repeat `identify` skip the
//! remote round trip. Hosts back this with whatever store they have
//! (browser localStorage via bindings, a file, a keychain); tests and
//! ephemeral hosts use [`MemoryStorage`].

use parking_lot::Mutex;
use std::collections::HashMap;

/// Storage key for the persisted device id.
pub const DEVICE_ID_KEY: &str = "bcn_device_id";

/// Storage key for the authenticated-user marker.
pub const AUTHENTICATED_ID_KEY: &str = "bcn_authenticated_id";

/// Host-provided key-value string storage.
pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory storage, the default when the host provides none.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}
