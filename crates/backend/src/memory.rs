//! In-process `TokenStore` + `KeyStore`
//!
//! Nothing survives a restart. Useful for tests and for hosts that manage
//! persistence themselves.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::file_store::StoredSession;
use crate::{KeyKind, KeyStore, TokenStore};

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<HashMap<String, StoredSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, name: &str, update: F)
    where
        F: FnOnce(&mut StoredSession),
    {
        let mut state = self.state.lock().await;
        let mut record = state.remove(name).unwrap_or_default();
        update(&mut record);
        if !record.is_empty() {
            state.insert(name.to_string(), record);
        }
    }
}

impl TokenStore for MemoryStore {
    fn get<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(name).and_then(|r| r.refresh_token.clone()))
        })
    }

    fn set<'a>(
        &'a self,
        name: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.update(name, |r| r.refresh_token = Some(refresh_token.to_string()))
                .await;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.update(name, |r| r.refresh_token = None).await;
            Ok(())
        })
    }
}

impl KeyStore for MemoryStore {
    fn get_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(name).and_then(|r| r.key_id(kind).cloned()))
        })
    }

    fn set_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
        key_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.update(name, |r| *r.key_id_mut(kind) = Some(key_id.to_string()))
                .await;
            Ok(())
        })
    }

    fn delete_key_id<'a>(
        &'a self,
        name: &'a str,
        kind: KeyKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.update(name, |r| *r.key_id_mut(kind) = None).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("default").await.unwrap().is_none());

        store.set("default", "rt_1").await.unwrap();
        store.set("default", "rt_2").await.unwrap();
        assert_eq!(store.get("default").await.unwrap().as_deref(), Some("rt_2"));

        store.delete("default").await.unwrap();
        assert!(store.get("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn key_kinds_do_not_collide() {
        let store = MemoryStore::new();
        store
            .set_key_id("default", KeyKind::Anonymous, "anon")
            .await
            .unwrap();
        assert!(
            store
                .get_key_id("default", KeyKind::Biometric)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            store
                .get_key_id("default", KeyKind::Anonymous)
                .await
                .unwrap()
                .as_deref(),
            Some("anon")
        );
    }
}
