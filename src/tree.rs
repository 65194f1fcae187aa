//! Construcción del árbol jerárquico de resúmenes.
//!
//! Se parte de la capa de resúmenes de página (altura 1) y se reduce capa a
//! capa con ventanas solapadas de 3 nodos que avanzan de 2 en 2: el último
//! nodo de un lote es el primero del siguiente. Cuando una capa tiene menos de
//! 4 nodos se condensa directamente en el `Document`, que pasa a ser la raíz.

use std::ops::Range;

use anyhow::Result;
use tracing::{debug, info};

use crate::{
    error::GraphError,
    graph_store::{GraphStore, StoredNode},
    graph_writer::GraphWriter,
    llm::Summarizer,
    models::{DocumentNode, NodeKey, NodeRef, SummaryNode, TreeAddress},
};

/// Capas más pequeñas que esto se condensan directamente en la raíz.
pub const BASE_CASE_LIMIT: usize = 4;
const WINDOW: usize = 3;
const STEP: usize = 2;

/// Cómo tratar lo que ya pueda haber en el grafo para el documento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Documento recién creado: nada que buscar, se escribe sin sondear.
    Fresh,
    /// Documento de una ejecución anterior: se reutiliza lo ya persistido.
    Resume,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeStats {
    pub layers: usize,
    pub summaries_created: usize,
    pub summaries_reused: usize,
    pub root_height: i64,
}

/// Ventanas de reducción para una capa de `n` nodos: inicio 0, paso 2,
/// anchura hasta 3. Se para cuando el único nodo restante ya cerró la
/// ventana anterior, así que salen `ceil((n-1)/2)` ventanas.
pub fn reduction_windows(n: usize) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut start = 0;
    while start + 1 < n {
        windows.push(start..(start + WINDOW).min(n));
        start += STEP;
    }
    windows
}

/// Sonda + relectura de un nodo ya persistido en esa dirección.
pub async fn find_existing(
    store: &dyn GraphStore,
    document_id: &str,
    height: i64,
    position: i64,
) -> Result<Option<StoredNode>> {
    if !store
        .node_exists_at_address(document_id, height, position)
        .await?
    {
        return Ok(None);
    }
    store.load_at_address(document_id, height, position).await
}

fn keys(nodes: &[SummaryNode]) -> Vec<NodeKey> {
    nodes.iter().map(|n| NodeRef::Summary(n).key()).collect()
}

pub struct TreeBuilder<'a> {
    writer: &'a GraphWriter,
    summarizer: &'a dyn Summarizer,
    mode: IngestMode,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(writer: &'a GraphWriter, summarizer: &'a dyn Summarizer, mode: IngestMode) -> Self {
        Self {
            writer,
            summarizer,
            mode,
        }
    }

    /// Reduce `leaves` (misma altura, en orden de lectura) hasta la raíz y
    /// deja en `doc` el resumen raíz y su altura. Si algo falla, `doc` no se
    /// toca y lo ya escrito queda para reanudar.
    pub async fn build(&self, doc: &mut DocumentNode, leaves: Vec<SummaryNode>) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut layer = leaves;

        loop {
            let Some(height) = layer.first().map(|s| s.address.height) else {
                return Err(GraphError::EmptyLayer {
                    document_id: doc.id.clone(),
                }
                .into());
            };

            if layer.len() < BASE_CASE_LIMIT {
                self.finish_root(doc, &layer).await?;
                stats.root_height = doc.address.height;
                info!(
                    "Documento '{}' resumido: raíz en la altura {}.",
                    doc.file_name, doc.address.height
                );
                return Ok(stats);
            }

            layer = self.reduce_layer(&layer, &mut stats).await?;
            stats.layers += 1;
            info!(
                "Capa {} del documento '{}' resumida ({} nodos).",
                height + 1,
                doc.file_name,
                layer.len()
            );
        }
    }

    async fn reduce_layer(&self, layer: &[SummaryNode], stats: &mut TreeStats) -> Result<Vec<SummaryNode>> {
        let mut next: Vec<SummaryNode> = Vec::with_capacity(layer.len() / STEP + 1);

        for window in reduction_windows(layer.len()) {
            let batch = &layer[window];
            let position = next.len() as i64;
            let children = keys(batch);
            let prior = next.last().map(|s| NodeRef::Summary(s).key());

            let summary = match self.reuse(batch, position).await? {
                Some(existing) => {
                    debug!("Reutilizando resumen {:?}", existing.address);
                    let key = NodeRef::Summary(&existing).key();
                    self.writer
                        .link_summary(&key, prior.as_ref(), &children)
                        .await?;
                    self.writer.repair_chunks(&key, &existing.text).await?;
                    stats.summaries_reused += 1;
                    existing
                }
                None => {
                    let summary = self.summarizer.summarize(batch, position).await?;
                    self.writer
                        .save_summary(&summary, prior.as_ref(), &children)
                        .await?;
                    stats.summaries_created += 1;
                    summary
                }
            };
            next.push(summary);
        }

        Ok(next)
    }

    /// En modo `Resume`, el resumen que ya ocupa la dirección del nuevo nodo.
    async fn reuse(&self, batch: &[SummaryNode], position: i64) -> Result<Option<SummaryNode>> {
        if self.mode == IngestMode::Fresh {
            return Ok(None);
        }
        let first = &batch[0];
        let address = TreeAddress {
            document_id: first.address.document_id.clone(),
            height: first.address.height + 1,
            position,
        };
        let existing = find_existing(
            self.writer.store(),
            &address.document_id,
            address.height,
            address.position,
        )
        .await?;

        Ok(existing.map(|stored| SummaryNode {
            id: stored.id,
            address,
            text: stored.text,
        }))
    }

    /// Caso base: condensa la capa en el documento. La altura se escribe la
    /// última, cuando chunks y aristas `SUMMARIZES` ya están en el grafo.
    async fn finish_root(&self, doc: &mut DocumentNode, layer: &[SummaryNode]) -> Result<()> {
        let root = self.summarizer.summarize(layer, 0).await?;

        let mut root_doc = doc.clone();
        root_doc.text = root.text;
        self.writer.save_document(&root_doc, &keys(layer)).await?;

        root_doc.address.height = root.address.height;
        self.writer
            .store()
            .save_node(NodeRef::Document(&root_doc))
            .await?;

        *doc = root_doc;
        Ok(())
    }
}
