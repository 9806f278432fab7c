//! Cache en proceso con expiración
//!
//! Guarda valores con su instante de expiración. El tiempo se pasa siempre
//! explícito (`now`) para que el barrido y los tests lo controlen.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Cache compartido clave → valor con TTL
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CachedEntry<V>>>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Guardar un valor; devuelve el anterior si seguía vigente
    pub async fn insert(&self, key: K, value: V, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<V> {
        let mut entries = self.entries.write().await;
        entries
            .insert(key, CachedEntry { value, expires_at })
            .filter(|previous| now < previous.expires_at)
            .map(|previous| previous.value)
    }

    /// Valor vigente; una entrada vencida se descarta al leerla
    pub async fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        debug!("⏰ Entrada expirada para {:?}", key);
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| now >= entry.expires_at) {
            entries.remove(key);
        }
        None
    }

    /// Quitar y devolver un valor, vigente o no
    pub async fn remove(&self, key: &K) -> Option<V> {
        self.entries.write().await.remove(key).map(|entry| entry.value)
    }

    /// Quitar un valor solo si `matches` lo acepta
    pub async fn remove_if(&self, key: &K, matches: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| matches(&entry.value)) {
            return entries.remove(key).map(|entry| entry.value);
        }
        None
    }

    /// Borrar todas las entradas vencidas; devuelve cuántas se borraron
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Valores vigentes
    pub async fn values(&self, now: DateTime<Utc>) -> Vec<V> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
            .collect()
    }
}
