use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// Version-stamped revocation list; tokens only ever get added.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TokenList {
    pub version: i64,
    pub tokens: BTreeSet<String>,
}

pub struct TokenOwner {
    inner: RwLock<Arc<TokenList>>,
}

impl TokenOwner {
    pub fn new() -> Self {
        TokenOwner { inner: RwLock::new(Arc::new(TokenList::default())) }
    }

    pub fn get(&self) -> Arc<TokenList> {
        self.inner.read().expect("token lock poisoned").clone()
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.get().tokens.contains(token)
    }

    pub fn revoke(&self, token: &str) -> Arc<TokenList> {
        let mut guard = self.inner.write().expect("token lock poisoned");
        let mut clone = (**guard).clone();
        clone.tokens.insert(token.to_string());
        clone.version = guard.version + 1;
        let installed = Arc::new(clone);
        *guard = installed.clone();
        installed
    }

    /// Merge an incoming list; the union is installed under max(version)
    /// so replayed waves are idempotent.
    pub fn update_revoked(&self, incoming: &TokenList) {
        let mut guard = self.inner.write().expect("token lock poisoned");
        if incoming.version <= guard.version {
            return;
        }
        let mut clone = (**guard).clone();
        clone.tokens.extend(incoming.tokens.iter().cloned());
        clone.version = incoming.version;
        *guard = Arc::new(clone);
    }
}

impl Default for TokenOwner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revocation_is_append_only() {
        let owner = TokenOwner::new();
        owner.revoke("a");
        owner.revoke("b");
        assert!(owner.is_revoked("a"));
        assert_eq!(owner.get().version, 2);

        let stale = TokenList { version: 1, tokens: ["c".to_string()].into() };
        owner.update_revoked(&stale);
        assert!(!owner.is_revoked("c")); // stale version ignored

        let newer = TokenList { version: 9, tokens: ["c".to_string()].into() };
        owner.update_revoked(&newer);
        assert!(owner.is_revoked("a") && owner.is_revoked("c"));
        assert_eq!(owner.get().version, 9);
    }
}
