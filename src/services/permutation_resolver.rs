//! Resolvedor de permutaciones
//!
//! Para cada entidad construye el grafo dirigido `old → new` de sus
//! movimientos y lo recorre desde su valor inicial. Los ciclos que vuelven
//! al valor inicial se anulan; lo que queda es el conjunto neto de cambios.
//! Función pura: el resultado no depende del orden de entrada.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Movimiento propuesto para una entidad
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Move<K, V> {
    pub entity: K,
    pub from: V,
    pub to: V,
}

impl<K, V> Move<K, V> {
    pub fn new(entity: K, from: V, to: V) -> Self {
        Self { entity, from, to }
    }
}

/// Errores de resolución
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError<K: std::fmt::Debug> {
    /// Dos destinos distintos desde el mismo origen
    #[error("conflicting moves for {0:?}")]
    Conflicting(K),

    /// Movimientos que no se encadenan desde el valor inicial
    #[error("moves for {0:?} do not start from its current value")]
    Stale(K),
}

/// Resolver los movimientos contra los valores iniciales.
///
/// Devuelve el valor final de cada entidad cuyo valor neto cambia.
pub fn resolve<K, V>(initial: &BTreeMap<K, V>, moves: &[Move<K, V>]) -> Result<BTreeMap<K, V>, ResolveError<K>>
where
    K: Ord + Clone + std::fmt::Debug,
    V: Ord + Clone,
{
    let mut edges: BTreeMap<K, BTreeMap<V, V>> = BTreeMap::new();
    let mut conflicts: BTreeSet<K> = BTreeSet::new();

    for mv in moves.iter().filter(|mv| mv.from != mv.to) {
        let graph = edges.entry(mv.entity.clone()).or_default();
        match graph.get(&mv.from) {
            Some(existing) if *existing != mv.to => {
                conflicts.insert(mv.entity.clone());
            }
            _ => {
                graph.insert(mv.from.clone(), mv.to.clone());
            }
        }
    }
    if let Some(entity) = conflicts.into_iter().next() {
        return Err(ResolveError::Conflicting(entity));
    }

    let mut resolved = BTreeMap::new();
    for (entity, mut graph) in edges {
        let start = initial
            .get(&entity)
            .ok_or_else(|| ResolveError::Stale(entity.clone()))?;

        let mut current = start.clone();
        while let Some(next) = graph.remove(&current) {
            current = next;
            if current == *start {
                break;
            }
        }

        // Quedan aristas que no se alcanzan desde el valor inicial
        if !graph.is_empty() {
            return Err(ResolveError::Stale(entity));
        }
        if current != *start {
            resolved.insert(entity, current);
        }
    }
    Ok(resolved)
}
