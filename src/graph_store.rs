//! Contrato de persistencia del grafo.
//!
//! `Neo4jStore` (en `neo4j_client`) es la implementación real; los tests usan
//! un almacén en memoria. Ningún método reintenta: los errores suben tal cual.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkNode, DocumentNode, EdgeType, NodeKey, NodeRef};

/// Lo mínimo que se relee de un nodo ya persistido para reutilizarlo.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub id: String,
    pub text: String,
}

/// Nodo devuelto por las lecturas de navegación y búsqueda.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundNode {
    pub key: NodeKey,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub node: FoundNode,
    pub score: f64,
    /// Nodo al que pertenece el chunk (`PART_OF`); `None` si no es un chunk.
    pub parent: Option<NodeKey>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert por `(label, id)`: crea el nodo o sobrescribe todas sus propiedades.
    async fn save_node(&self, node: NodeRef<'_>) -> Result<String>;

    /// Upsert de una arista dirigida. Falla si falta cualquiera de los extremos.
    async fn create_edge(&self, from: &NodeKey, to: &NodeKey, edge: EdgeType) -> Result<()>;

    /// Sonda barata de existencia por dirección de árbol.
    async fn node_exists_at_address(
        &self,
        document_id: &str,
        height: i64,
        position: i64,
    ) -> Result<bool>;

    /// Relee id y texto del nodo en esa dirección, si existe.
    async fn load_at_address(
        &self,
        document_id: &str,
        height: i64,
        position: i64,
    ) -> Result<Option<StoredNode>>;

    /// Documento creado en una ejecución anterior para ese fichero.
    async fn find_document(&self, file_path: &str) -> Result<Option<DocumentNode>>;

    /// Índice full-text sobre `:Searchable(text)` e índice vectorial sobre
    /// `:Chunk(embedding)`. Idempotente.
    async fn create_indexes(&self) -> Result<()>;

    /// Chunks que cuelgan de `parent` por `PART_OF`.
    async fn chunk_count(&self, parent: &NodeKey) -> Result<usize>;

    /// Borra los chunks de `parent` con `sequence >= keep`. Devuelve cuántos.
    async fn prune_chunks(&self, parent: &NodeKey, keep: usize) -> Result<usize>;

    /// Los `k` chunks más cercanos (coseno) a `vector`, de mayor a menor score.
    async fn vector_search(&self, vector: &[f64], k: usize) -> Result<Vec<SearchHit>>;

    /// Consulta sobre el índice full-text de `:Searchable(text)`.
    async fn fulltext_search(&self, term: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Destinos de las aristas `edge` que salen de `from`, en orden de lectura.
    async fn neighbours(&self, from: &NodeKey, edge: EdgeType) -> Result<Vec<FoundNode>>;

    /// `prev -[:NEXT]-> next` y `next -[:PREVIOUS]-> prev`.
    async fn link(&self, prev: &NodeKey, next: &NodeKey) -> Result<()> {
        self.create_edge(prev, next, EdgeType::Next).await?;
        self.create_edge(next, prev, EdgeType::Previous).await
    }

    async fn save_chunk(&self, chunk: &ChunkNode, parent: &NodeKey) -> Result<()> {
        self.save_node(NodeRef::Chunk(chunk)).await?;
        self.create_edge(&NodeRef::Chunk(chunk).key(), parent, EdgeType::PartOf)
            .await
    }
}
