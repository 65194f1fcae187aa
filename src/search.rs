//! Recuperación sobre el grafo ya ingerido: búsqueda semántica sobre los
//! embeddings de los `:Chunk`, búsqueda full-text sobre `:Searchable(text)` y
//! navegación por las aristas del árbol (`SUMMARIZES`, `NEXT`, `PREVIOUS`).

use std::{fmt, sync::Arc};

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::{
    graph_store::{FoundNode, GraphStore, SearchHit},
    llm::Embedder,
    models::{EdgeType, NodeKey},
};

const PREVIEW_CHARS: usize = 160;

impl fmt::Display for SearchHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.node.text.chars().take(PREVIEW_CHARS).collect();
        write!(f, "[{:.4}] {}", self.score, self.node.key)?;
        if let Some(parent) = &self.parent {
            write!(f, " de {parent}")?;
        }
        write!(f, ": {}", preview.replace('\n', " "))
    }
}

pub struct Searcher {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
}

impl Searcher {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Vectoriza `query` con el mismo proveedor de la ingesta y devuelve los
    /// `k` chunks más parecidos, cada uno con el nodo al que pertenece.
    pub async fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .map(|embedded| embedded.vector)
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la consulta"))?;

        let hits = self.store.vector_search(&vector, k).await?;
        debug!("Búsqueda semántica '{query}': {} resultados", hits.len());
        Ok(hits)
    }

    pub async fn fulltext_search(&self, term: &str, k: usize) -> Result<Vec<SearchHit>> {
        if term.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let hits = self.store.fulltext_search(term, k).await?;
        debug!("Búsqueda full-text '{term}': {} resultados", hits.len());
        Ok(hits)
    }

    /// Un paso de navegación: hijos (`SUMMARIZES`), vecinos de capa
    /// (`NEXT`/`PREVIOUS`) o páginas de un documento (`CONTAINS`).
    pub async fn neighbours(&self, from: &NodeKey, edge: EdgeType) -> Result<Vec<FoundNode>> {
        self.store.neighbours(from, edge).await
    }
}
