use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph, Query, Row};
use tracing::{debug, info};
use url::Url;

use crate::{
    config::AppConfig,
    error::GraphError,
    graph_store::{FoundNode, GraphStore, SearchHit, StoredNode},
    models::{DocumentNode, EdgeType, NodeKey, NodeLabel, NodeRef, PropValue, TreeAddress, SEARCHABLE_LABEL},
};

const FULLTEXT_INDEX: &str = "all_text_content";
const VECTOR_INDEX: &str = "chunk_embedding_vector";

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Almacén del árbol de resúmenes sobre Neo4j.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
    embedding_dimensions: i64,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>, embedding_dimensions: i64) -> Self {
        Self {
            graph,
            embedding_dimensions,
        }
    }

    /// Crea constraints de unicidad de `id` para :Document, :Page, :Summary y
    /// :Chunk, más el índice compuesto de dirección de árbol que hace barata
    /// la sonda de existencia.
    pub async fn ensure_schema(&self) -> Result<()> {
        for label in NodeLabel::ALL {
            let stmt = format!(
                "CREATE CONSTRAINT {name}_id IF NOT EXISTS
                 FOR (n:{label})
                 REQUIRE n.id IS UNIQUE",
                name = label.as_str().to_lowercase(),
            );
            self.graph.run(query(&stmt)).await?;
        }

        let address_index = format!(
            "CREATE INDEX tree_address IF NOT EXISTS
             FOR (n:{SEARCHABLE_LABEL})
             ON (n.document_id, n.height, n.position)"
        );
        self.graph.run(query(&address_index)).await?;

        info!("Esquema de Neo4j asegurado (constraints e índice de direcciones).");
        Ok(())
    }

    async fn node_exists(&self, key: &NodeKey) -> Result<bool> {
        let cypher = format!("MATCH (n:{} {{id: $id}}) RETURN n.id AS id LIMIT 1", key.label);
        let mut cursor = self
            .graph
            .execute(query(&cypher).param("id", key.id.clone()))
            .await?;
        Ok(cursor.next().await?.is_some())
    }
}

fn bind(q: Query, key: &str, value: PropValue) -> Query {
    match value {
        PropValue::Str(s) => q.param(key, s),
        PropValue::Int(i) => q.param(key, i),
        PropValue::Bool(b) => q.param(key, b),
        PropValue::Floats(v) => q.param(key, v),
    }
}

/// `MERGE` por id y `SET n = {...}` con la lista cerrada de propiedades.
fn save_node_cypher(node: &NodeRef<'_>, props: &[(&'static str, PropValue)]) -> String {
    let labels = if node.is_searchable() {
        format!("{}:{SEARCHABLE_LABEL}", node.label())
    } else {
        node.label().to_string()
    };
    let assignments = props
        .iter()
        .map(|(key, _)| format!("{key}: ${key}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("MERGE (n:{labels} {{id: $id}}) SET n = {{{assignments}}} RETURN n.id AS id")
}

/// Etiqueta principal de `var` (la que no es `Searchable`).
fn main_label(var: &str) -> String {
    format!("head([l IN labels({var}) WHERE l <> '{SEARCHABLE_LABEL}'])")
}

/// Columnas comunes de un resultado de búsqueda sobre `node`, con su padre
/// si es un chunk.
fn hit_columns() -> String {
    format!(
        "OPTIONAL MATCH (node)-[:{part_of}]->(parent)
         RETURN node.id AS id, {label} AS label, node.text AS text, score,
                parent.id AS parent_id, {parent_label} AS parent_label",
        part_of = EdgeType::PartOf,
        label = main_label("node"),
        parent_label = main_label("parent"),
    )
}

fn vector_search_cypher() -> String {
    format!(
        "CALL db.index.vector.queryNodes($index, $k, $embedding)
         YIELD node, score
         {columns}
         ORDER BY score DESC",
        columns = hit_columns()
    )
}

fn fulltext_search_cypher() -> String {
    format!(
        "CALL db.index.fulltext.queryNodes($index, $term)
         YIELD node, score
         {columns}
         ORDER BY score DESC
         LIMIT $k",
        columns = hit_columns()
    )
}

fn neighbours_cypher(from: &NodeKey, edge: EdgeType) -> String {
    format!(
        "MATCH (a:{label} {{id: $id}})-[:{edge}]->(n)
         RETURN n.id AS id, {target} AS label, n.text AS text
         ORDER BY coalesce(n.position, n.sequence, 0)",
        label = from.label,
        target = main_label("n"),
    )
}

fn read_found(row: &Row) -> Result<FoundNode> {
    let id: String = row
        .get("id")
        .ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))?;
    let label: String = row
        .get("label")
        .ok_or_else(|| anyhow!("Falta campo 'label' en resultado de Neo4j"))?;
    let label = NodeLabel::parse(&label).ok_or_else(|| anyhow!("Etiqueta desconocida en Neo4j: {label}"))?;
    Ok(FoundNode {
        key: NodeKey { label, id },
        text: row.get("text").unwrap_or_default(),
    })
}

fn read_hit(row: &Row) -> Result<SearchHit> {
    let parent = match (row.get::<String>("parent_id"), row.get::<String>("parent_label")) {
        (Some(id), Some(label)) => NodeLabel::parse(&label).map(|label| NodeKey { label, id }),
        _ => None,
    };
    Ok(SearchHit {
        node: read_found(row)?,
        score: row
            .get("score")
            .ok_or_else(|| anyhow!("Falta campo 'score' en resultado de Neo4j"))?,
        parent,
    })
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn save_node(&self, node: NodeRef<'_>) -> Result<String> {
        let props = node.properties();
        let cypher = save_node_cypher(&node, &props);

        let mut q = query(&cypher);
        for (key, value) in props {
            q = bind(q, key, value);
        }

        let mut cursor = self.graph.execute(q).await?;
        let row = cursor
            .next()
            .await?
            .ok_or_else(|| anyhow!("Neo4j no devolvió el nodo {} guardado", node.key()))?;
        row.get::<String>("id")
            .ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))
    }

    async fn create_edge(&self, from: &NodeKey, to: &NodeKey, edge: EdgeType) -> Result<()> {
        let cypher = format!(
            "MATCH (a:{from_label} {{id: $from_id}})
             MATCH (b:{to_label} {{id: $to_id}})
             MERGE (a)-[:{edge}]->(b)
             RETURN a.id AS id",
            from_label = from.label,
            to_label = to.label,
        );
        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("from_id", from.id.clone())
                    .param("to_id", to.id.clone()),
            )
            .await?;

        if cursor.next().await?.is_some() {
            debug!("Arista {from} -[:{edge}]-> {to}");
            return Ok(());
        }

        let missing = if self.node_exists(from).await? {
            to.clone()
        } else {
            from.clone()
        };
        Err(GraphError::MissingEndpoint { edge, missing }.into())
    }

    async fn node_exists_at_address(
        &self,
        document_id: &str,
        height: i64,
        position: i64,
    ) -> Result<bool> {
        let cypher = format!(
            "MATCH (n:{SEARCHABLE_LABEL} {{document_id: $document_id, height: $height, position: $position}})
             RETURN n.id AS id LIMIT 1"
        );
        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("document_id", document_id.to_string())
                    .param("height", height)
                    .param("position", position),
            )
            .await?;
        Ok(cursor.next().await?.is_some())
    }

    async fn load_at_address(
        &self,
        document_id: &str,
        height: i64,
        position: i64,
    ) -> Result<Option<StoredNode>> {
        let cypher = format!(
            "MATCH (n:{SEARCHABLE_LABEL} {{document_id: $document_id, height: $height, position: $position}})
             RETURN n.id AS id, n.text AS text LIMIT 1"
        );
        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("document_id", document_id.to_string())
                    .param("height", height)
                    .param("position", position),
            )
            .await?;

        match cursor.next().await? {
            Some(row) => {
                let id: String = row
                    .get("id")
                    .ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))?;
                let text: String = row.get("text").unwrap_or_default();
                Ok(Some(StoredNode { id, text }))
            }
            None => Ok(None),
        }
    }

    async fn find_document(&self, file_path: &str) -> Result<Option<DocumentNode>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (d:Document {file_path: $file_path})
                     RETURN d.id AS id, d.text AS text, d.height AS height,
                            d.file_name AS file_name, d.mime_type AS mime_type,
                            d.ingested_at AS ingested_at
                     ORDER BY d.ingested_at DESC
                     LIMIT 1",
                )
                .param("file_path", file_path.to_string()),
            )
            .await?;

        let Some(row) = cursor.next().await? else {
            return Ok(None);
        };
        let id: String = row
            .get("id")
            .ok_or_else(|| anyhow!("Falta campo 'id' en resultado de Neo4j"))?;
        let height: i64 = row.get("height").unwrap_or(-1);

        Ok(Some(DocumentNode {
            address: TreeAddress {
                document_id: id.clone(),
                height,
                position: 0,
            },
            id,
            text: row.get("text").unwrap_or_default(),
            file_name: row.get("file_name").unwrap_or_default(),
            file_path: file_path.to_string(),
            mime_type: row.get("mime_type").unwrap_or_default(),
            ingested_at: row.get("ingested_at").unwrap_or_default(),
        }))
    }

    async fn create_indexes(&self) -> Result<()> {
        info!("Creando índices...");
        let fulltext = format!(
            "CREATE FULLTEXT INDEX {FULLTEXT_INDEX} IF NOT EXISTS
             FOR (s:{SEARCHABLE_LABEL}) ON EACH [s.text]"
        );
        let vector = format!(
            "\
CREATE VECTOR INDEX {VECTOR_INDEX} IF NOT EXISTS
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}",
            dimensions = self.embedding_dimensions
        );

        for stmt in [fulltext, vector] {
            self.graph.run(query(&stmt)).await?;
        }
        info!("Índices '{FULLTEXT_INDEX}' y '{VECTOR_INDEX}' asegurados.");
        Ok(())
    }

    async fn chunk_count(&self, parent: &NodeKey) -> Result<usize> {
        let cypher = format!(
            "MATCH (c:{chunk})-[:{part_of}]->(:{label} {{id: $id}})
             RETURN count(c) AS total",
            chunk = NodeLabel::Chunk,
            part_of = EdgeType::PartOf,
            label = parent.label,
        );
        let mut cursor = self
            .graph
            .execute(query(&cypher).param("id", parent.id.clone()))
            .await?;
        let total: i64 = match cursor.next().await? {
            Some(row) => row.get("total").unwrap_or(0),
            None => 0,
        };
        Ok(total as usize)
    }

    async fn prune_chunks(&self, parent: &NodeKey, keep: usize) -> Result<usize> {
        let cypher = format!(
            "MATCH (c:{chunk})-[:{part_of}]->(:{label} {{id: $id}})
             WHERE c.sequence >= $keep
             DETACH DELETE c
             RETURN count(*) AS removed",
            chunk = NodeLabel::Chunk,
            part_of = EdgeType::PartOf,
            label = parent.label,
        );
        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("id", parent.id.clone())
                    .param("keep", keep as i64),
            )
            .await?;
        let removed: i64 = match cursor.next().await? {
            Some(row) => row.get("removed").unwrap_or(0),
            None => 0,
        };
        Ok(removed as usize)
    }

    async fn vector_search(&self, vector: &[f64], k: usize) -> Result<Vec<SearchHit>> {
        let cypher = vector_search_cypher();
        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("index", VECTOR_INDEX)
                    .param("k", k as i64)
                    .param("embedding", vector.to_vec()),
            )
            .await?;

        let mut hits = Vec::new();
        while let Some(row) = cursor.next().await? {
            hits.push(read_hit(&row)?);
        }
        Ok(hits)
    }

    async fn fulltext_search(&self, term: &str, k: usize) -> Result<Vec<SearchHit>> {
        let cypher = fulltext_search_cypher();
        let mut cursor = self
            .graph
            .execute(
                query(&cypher)
                    .param("index", FULLTEXT_INDEX)
                    .param("term", term.to_string())
                    .param("k", k as i64),
            )
            .await?;

        let mut hits = Vec::new();
        while let Some(row) = cursor.next().await? {
            hits.push(read_hit(&row)?);
        }
        Ok(hits)
    }

    async fn neighbours(&self, from: &NodeKey, edge: EdgeType) -> Result<Vec<FoundNode>> {
        let cypher = neighbours_cypher(from, edge);
        let mut cursor = self
            .graph
            .execute(query(&cypher).param("id", from.id.clone()))
            .await?;

        let mut nodes = Vec::new();
        while let Some(row) = cursor.next().await? {
            nodes.push(read_found(&row)?);
        }
        Ok(nodes)
    }
}
