//! `GraphStore` en memoria para los tests: misma semántica de upsert por id y
//! de aristas con `MERGE`, sin Neo4j.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    error::GraphError,
    graph_store::{FoundNode, GraphStore, SearchHit, StoredNode},
    models::{DocumentNode, EdgeType, NodeKey, NodeLabel, NodeRef, PropValue, TreeAddress},
};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub label: NodeLabel,
    pub searchable: bool,
    pub props: BTreeMap<&'static str, PropValue>,
}

impl StoredRecord {
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        match self.props.get(key) {
            Some(PropValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int_prop(&self, key: &str) -> Option<i64> {
        match self.props.get(key) {
            Some(PropValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    fn is_at(&self, document_id: &str, height: i64, position: i64) -> bool {
        self.str_prop("document_id") == Some(document_id)
            && self.int_prop("height") == Some(height)
            && self.int_prop("position") == Some(position)
    }
}

#[derive(Default)]
pub struct MemoryGraph {
    nodes: Mutex<HashMap<String, StoredRecord>>,
    edges: Mutex<BTreeSet<(String, String, EdgeType)>>,
    address_checks: AtomicUsize,
    node_writes: AtomicUsize,
    indexes: AtomicBool,
}

impl MemoryGraph {
    pub fn node(&self, id: &str) -> Option<StoredRecord> {
        self.nodes.lock().unwrap().get(id).cloned()
    }

    pub fn nodes_with_label(&self, label: NodeLabel) -> Vec<StoredRecord> {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.label == label)
            .cloned()
            .collect()
    }

    pub fn nodes_at(&self, document_id: &str, height: i64, position: i64) -> Vec<StoredRecord> {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.is_at(document_id, height, position))
            .cloned()
            .collect()
    }

    /// Nodos del documento a esa altura, ordenados por posición.
    pub fn layer(&self, document_id: &str, height: i64) -> Vec<StoredRecord> {
        let mut layer: Vec<StoredRecord> = self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| {
                n.str_prop("document_id") == Some(document_id) && n.int_prop("height") == Some(height)
            })
            .cloned()
            .collect();
        layer.sort_by_key(|n| n.int_prop("position"));
        layer
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn edges(&self, edge: EdgeType) -> Vec<(String, String)> {
        self.edges
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, e)| *e == edge)
            .map(|(from, to, _)| (from.clone(), to.clone()))
            .collect()
    }

    pub fn has_edge(&self, from: &str, to: &str, edge: EdgeType) -> bool {
        self.edges
            .lock()
            .unwrap()
            .contains(&(from.to_string(), to.to_string(), edge))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().unwrap().len()
    }

    pub fn address_checks(&self) -> usize {
        self.address_checks.load(Ordering::SeqCst)
    }

    pub fn node_writes(&self) -> usize {
        self.node_writes.load(Ordering::SeqCst)
    }

    pub fn indexes_created(&self) -> bool {
        self.indexes.load(Ordering::SeqCst)
    }

    /// Chunks que cuelgan de `parent` por `PART_OF`.
    pub fn chunks_of(&self, parent_id: &str) -> Vec<StoredRecord> {
        let ids: Vec<String> = self
            .edges(EdgeType::PartOf)
            .into_iter()
            .filter(|(_, to)| to == parent_id)
            .map(|(from, _)| from)
            .collect();
        let mut chunks: Vec<StoredRecord> = ids
            .iter()
            .filter_map(|id| self.node(id))
            .filter(|n| n.label == NodeLabel::Chunk)
            .collect();
        chunks.sort_by_key(|n| n.int_prop("sequence"));
        chunks
    }

    fn key_of(&self, id: &str) -> Option<NodeKey> {
        self.node(id).map(|n| NodeKey {
            label: n.label,
            id: id.to_string(),
        })
    }

    fn found(&self, id: &str) -> Option<FoundNode> {
        self.node(id).map(|n| FoundNode {
            key: NodeKey {
                label: n.label,
                id: id.to_string(),
            },
            text: n.str_prop("text").unwrap_or_default().to_string(),
        })
    }

    fn parent_of(&self, id: &str) -> Option<NodeKey> {
        self.edges(EdgeType::PartOf)
            .into_iter()
            .find(|(from, _)| from == id)
            .and_then(|(_, to)| self.key_of(&to))
    }

    /// Ordena por score descendente (empates por id) y corta en `k`.
    fn top_hits(&self, mut scored: Vec<(String, f64)>, k: usize) -> Vec<SearchHit> {
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .filter_map(|(id, score)| {
                Some(SearchHit {
                    node: self.found(&id)?,
                    score,
                    parent: self.parent_of(&id),
                })
            })
            .collect()
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .get(&key.id)
            .is_some_and(|n| n.label == key.label)
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn save_node(&self, node: NodeRef<'_>) -> Result<String> {
        let record = StoredRecord {
            label: node.label(),
            searchable: node.is_searchable(),
            props: node.properties().into_iter().collect(),
        };
        self.node_writes.fetch_add(1, Ordering::SeqCst);
        self.nodes
            .lock()
            .unwrap()
            .insert(node.id().to_string(), record);
        Ok(node.id().to_string())
    }

    async fn create_edge(&self, from: &NodeKey, to: &NodeKey, edge: EdgeType) -> Result<()> {
        for key in [from, to] {
            if !self.contains(key) {
                return Err(GraphError::MissingEndpoint {
                    edge,
                    missing: key.clone(),
                }
                .into());
            }
        }
        self.edges
            .lock()
            .unwrap()
            .insert((from.id.clone(), to.id.clone(), edge));
        Ok(())
    }

    async fn node_exists_at_address(
        &self,
        document_id: &str,
        height: i64,
        position: i64,
    ) -> Result<bool> {
        self.address_checks.fetch_add(1, Ordering::SeqCst);
        Ok(!self.nodes_at(document_id, height, position).is_empty())
    }

    async fn load_at_address(
        &self,
        document_id: &str,
        height: i64,
        position: i64,
    ) -> Result<Option<StoredNode>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .find(|(_, n)| n.is_at(document_id, height, position))
            .map(|(id, n)| StoredNode {
                id: id.clone(),
                text: n.str_prop("text").unwrap_or_default().to_string(),
            }))
    }

    async fn find_document(&self, file_path: &str) -> Result<Option<DocumentNode>> {
        Ok(self
            .nodes_with_label(NodeLabel::Document)
            .into_iter()
            .find(|n| n.str_prop("file_path") == Some(file_path))
            .map(|n| {
                let id = n.str_prop("id").unwrap_or_default().to_string();
                DocumentNode {
                    address: TreeAddress {
                        document_id: id.clone(),
                        height: n.int_prop("height").unwrap_or(-1),
                        position: 0,
                    },
                    id,
                    text: n.str_prop("text").unwrap_or_default().to_string(),
                    file_name: n.str_prop("file_name").unwrap_or_default().to_string(),
                    file_path: file_path.to_string(),
                    mime_type: n.str_prop("mime_type").unwrap_or_default().to_string(),
                    ingested_at: n.str_prop("ingested_at").unwrap_or_default().to_string(),
                }
            }))
    }

    async fn create_indexes(&self) -> Result<()> {
        self.indexes.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn chunk_count(&self, parent: &NodeKey) -> Result<usize> {
        Ok(self.chunks_of(&parent.id).len())
    }

    async fn prune_chunks(&self, parent: &NodeKey, keep: usize) -> Result<usize> {
        let stale: BTreeSet<String> = self
            .chunks_of(&parent.id)
            .into_iter()
            .filter(|c| c.int_prop("sequence").is_some_and(|seq| seq >= keep as i64))
            .filter_map(|c| c.str_prop("id").map(str::to_string))
            .collect();

        {
            let mut nodes = self.nodes.lock().unwrap();
            for id in &stale {
                nodes.remove(id);
            }
        }
        self.edges
            .lock()
            .unwrap()
            .retain(|(from, to, _)| !stale.contains(from) && !stale.contains(to));
        Ok(stale.len())
    }

    async fn vector_search(&self, vector: &[f64], k: usize) -> Result<Vec<SearchHit>> {
        let scored: Vec<(String, f64)> = self
            .nodes_with_label(NodeLabel::Chunk)
            .into_iter()
            .filter_map(|n| match n.props.get("embedding") {
                Some(PropValue::Floats(embedding)) => Some((
                    n.str_prop("id").unwrap_or_default().to_string(),
                    cosine(vector, embedding),
                )),
                _ => None,
            })
            .collect();
        Ok(self.top_hits(scored, k))
    }

    async fn fulltext_search(&self, term: &str, k: usize) -> Result<Vec<SearchHit>> {
        let term = term.to_lowercase();
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }
        let scored: Vec<(String, f64)> = self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n)| n.searchable)
            .filter_map(|(id, n)| {
                let hits = n.str_prop("text")?.to_lowercase().matches(&term).count();
                (hits > 0).then(|| (id.clone(), hits as f64))
            })
            .collect();
        Ok(self.top_hits(scored, k))
    }

    async fn neighbours(&self, from: &NodeKey, edge: EdgeType) -> Result<Vec<FoundNode>> {
        let mut targets: Vec<(i64, FoundNode)> = self
            .edges(edge)
            .into_iter()
            .filter(|(source, _)| *source == from.id)
            .filter_map(|(_, to)| {
                let record = self.node(&to)?;
                let order = record
                    .int_prop("position")
                    .or_else(|| record.int_prop("sequence"))
                    .unwrap_or(0);
                Some((order, self.found(&to)?))
            })
            .collect();
        targets.sort_by_key(|(order, _)| *order);
        Ok(targets.into_iter().map(|(_, node)| node).collect())
    }
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
