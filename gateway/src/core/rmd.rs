use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use common::api_error::ApiError;

/// Rebalance metadata: a monotonic counter plus the targets that should
/// serve get-from-neighbor while data moves.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Rmd {
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ids: Option<Vec<String>>,
}

impl std::fmt::Display for Rmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RMD v{}", self.version)
    }
}

pub struct RmdOwner {
    inner: RwLock<Arc<Rmd>>,
}

impl RmdOwner {
    pub fn new(rmd: Rmd) -> Self {
        RmdOwner { inner: RwLock::new(Arc::new(rmd)) }
    }

    pub fn get(&self) -> Arc<Rmd> {
        self.inner.read().expect("rmd lock poisoned").clone()
    }

    pub fn modify(&self, pre: impl FnOnce(&mut Rmd)) -> Arc<Rmd> {
        let mut guard = self.inner.write().expect("rmd lock poisoned");
        let mut clone = (**guard).clone();
        pre(&mut clone);
        clone.version = guard.version + 1;
        let installed = Arc::new(clone);
        *guard = installed.clone();
        installed
    }

    /// Install only strictly newer; an older incoming version is an error.
    pub fn synchronize(&self, incoming: Rmd) -> Result<(), ApiError> {
        let mut guard = self.inner.write().expect("rmd lock poisoned");
        if incoming.version <= guard.version {
            if incoming.version < guard.version {
                return Err(ApiError::Conflict(format!(
                    "attempt to downgrade {} to {}",
                    guard, incoming
                )));
            }
            return Ok(());
        }
        *guard = Arc::new(incoming);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_increments() {
        let owner = RmdOwner::new(Rmd::default());
        owner.modify(|r| r.target_ids = Some(vec!["t1".to_string()]));
        owner.modify(|r| r.target_ids = None);
        assert_eq!(owner.get().version, 2);
    }

    #[test]
    fn synchronize_strictly_newer() {
        let owner = RmdOwner::new(Rmd { version: 4, target_ids: None });
        owner.synchronize(Rmd { version: 6, target_ids: None }).unwrap();
        assert_eq!(owner.get().version, 6);
        owner.synchronize(Rmd { version: 6, target_ids: None }).unwrap();
        assert!(owner.synchronize(Rmd { version: 5, target_ids: None }).is_err());
    }
}
