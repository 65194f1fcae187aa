//! Escrituras compuestas del árbol: nodo + chunks + aristas.
//!
//! Combina un `GraphStore` con el adaptador de troceado para que todo texto
//! libre quede también como `(:Chunk)-[:PART_OF]->(padre)` con embedding.

use std::sync::Arc;

use anyhow::Result;
use futures::{pin_mut, TryStreamExt};
use tracing::{debug, warn};

use crate::{
    chunking::ChunkEmbedder,
    graph_store::GraphStore,
    models::{DocumentNode, EdgeType, NodeKey, NodeRef, PageNode, SummaryNode},
};

#[derive(Clone)]
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    chunker: ChunkEmbedder,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>, chunker: ChunkEmbedder) -> Self {
        Self { store, chunker }
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    /// Guarda el nodo y cuelga de él un chunk por fragmento de su texto.
    /// Devuelve cuántos chunks se escribieron.
    pub async fn save_node_with_chunks(&self, node: NodeRef<'_>) -> Result<usize> {
        self.store.save_node(node).await?;
        self.write_chunks(&node.key(), node.text()).await
    }

    /// Para un nodo reutilizado: si sus chunks no cuadran con su texto (una
    /// ejecución anterior cayó entre el nodo y sus chunks) se reescriben.
    pub async fn repair_chunks(&self, parent: &NodeKey, text: &str) -> Result<usize> {
        let expected = self.chunker.fragment_count(text);
        let found = self.store.chunk_count(parent).await?;
        if found == expected {
            return Ok(0);
        }
        warn!("{parent}: {found} chunks de {expected} esperados. Regenerando.");
        self.write_chunks(parent, text).await
    }

    /// Chunks de `text` bajo `parent`, con ids `{parent}-chunk-{n}`. Los de
    /// una versión anterior más larga del texto se borran.
    async fn write_chunks(&self, parent: &NodeKey, text: &str) -> Result<usize> {
        let chunks = self.chunker.chunk_and_embed(text);
        pin_mut!(chunks);
        let mut written = 0;
        while let Some(chunk) = chunks.try_next().await? {
            let chunk = chunk.owned_by(&parent.id);
            self.store.save_chunk(&chunk, parent).await?;
            written += 1;
        }

        let stale = self.store.prune_chunks(parent, written).await?;
        if stale > 0 {
            debug!("{parent}: {stale} chunks obsoletos borrados");
        }
        debug!("{parent}: {written} chunks guardados");
        Ok(written)
    }

    /// Aristas de una página: `CONTAINS`/`PART_OF` con su documento y
    /// `NEXT`/`PREVIOUS` con la anterior.
    pub async fn link_page(&self, page: &NodeKey, doc: &NodeKey, prior_page: Option<&NodeKey>) -> Result<()> {
        self.store.create_edge(doc, page, EdgeType::Contains).await?;
        self.store.create_edge(page, doc, EdgeType::PartOf).await?;
        if let Some(prior) = prior_page {
            self.store.link(prior, page).await?;
        }
        Ok(())
    }

    pub async fn save_page(&self, page: &PageNode, doc: &DocumentNode, prior_page: Option<&NodeKey>) -> Result<()> {
        self.save_node_with_chunks(NodeRef::Page(page)).await?;
        self.link_page(
            &NodeRef::Page(page).key(),
            &NodeRef::Document(doc).key(),
            prior_page,
        )
        .await
    }

    /// Aristas de un resumen: `SUMMARIZES` a cada hijo y `NEXT`/`PREVIOUS`
    /// con el anterior de su capa.
    pub async fn link_summary(
        &self,
        summary: &NodeKey,
        prior_summary: Option<&NodeKey>,
        children: &[NodeKey],
    ) -> Result<()> {
        if let Some(prior) = prior_summary {
            self.store.link(prior, summary).await?;
        }
        for child in children {
            self.store
                .create_edge(summary, child, EdgeType::Summarizes)
                .await?;
        }
        Ok(())
    }

    pub async fn save_summary(
        &self,
        summary: &SummaryNode,
        prior_summary: Option<&NodeKey>,
        children: &[NodeKey],
    ) -> Result<()> {
        self.save_node_with_chunks(NodeRef::Summary(summary)).await?;
        self.link_summary(&NodeRef::Summary(summary).key(), prior_summary, children)
            .await
    }

    /// Guarda (o actualiza) el documento; `children` son los nodos que resume
    /// directamente cuando ya es la raíz del árbol.
    pub async fn save_document(&self, doc: &DocumentNode, children: &[NodeKey]) -> Result<()> {
        self.save_node_with_chunks(NodeRef::Document(doc)).await?;
        let doc_key = NodeRef::Document(doc).key();
        for child in children {
            self.store
                .create_edge(&doc_key, child, EdgeType::Summarizes)
                .await?;
        }
        Ok(())
    }

    pub async fn create_indexes(&self) -> Result<()> {
        self.store.create_indexes().await
    }
}
