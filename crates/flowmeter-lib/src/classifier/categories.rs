//! Category cookies
//!
//! Every `(model, category)` pair gets a 64-bit cookie that tags the flow
//! rules installed for it. Cookies are derived from a hash so every worker
//! computes the same value without coordination; the registry only guards
//! against two pairs hashing to the same cookie.

use crate::error::{ConsoleError, ConsoleResult};
use crate::models::{Category, ModelConfiguration};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Cookie for a category: the first 8 bytes of
/// `SHA-256(model_name || 0x00 || name)` with the top bit cleared
pub fn category_cookie(model_name: &str, name: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) & (u64::MAX >> 1)
}

/// Registry of issued cookies
#[derive(Debug, Default)]
pub struct CategoryRegistry {
    by_cookie: DashMap<u64, (String, String)>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue (or re-issue) the cookie for a pair
    pub fn register(&self, model_name: &str, name: &str) -> ConsoleResult<Category> {
        let cookie = category_cookie(model_name, name);
        match self.by_cookie.entry(cookie) {
            Entry::Occupied(existing) => {
                let (model, category) = existing.get();
                if model != model_name || category != name {
                    return Err(ConsoleError::conflict(format!(
                        "cookie {:#x} of {}/{} collides with {}/{}",
                        cookie, model_name, name, model, category
                    )));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert((model_name.to_string(), name.to_string()));
            }
        }

        Ok(Category {
            name: name.to_string(),
            model_name: model_name.to_string(),
            cookie,
        })
    }

    /// Register every wire category of a model, in order
    pub fn register_model(&self, config: &ModelConfiguration) -> ConsoleResult<Vec<Category>> {
        config
            .wire_categories()
            .iter()
            .map(|name| self.register(&config.name, name))
            .collect()
    }

    /// Cookie of a registered pair
    pub fn cookie(&self, model_name: &str, name: &str) -> Option<u64> {
        let cookie = category_cookie(model_name, name);
        self.by_cookie
            .get(&cookie)
            .filter(|entry| entry.0 == model_name && entry.1 == name)
            .map(|_| cookie)
    }

    pub fn len(&self) -> usize {
        self.by_cookie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cookie.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, cookie: u64, model_name: &str, name: &str) {
        self.by_cookie
            .insert(cookie, (model_name.to_string(), name.to_string()));
    }
}
