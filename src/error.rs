//! Errores estructurales del grafo y del árbol de resúmenes.
//!
//! El resto de fallos (red, Neo4j, proveedor LLM) viajan como `anyhow::Error`.

use thiserror::Error;

use crate::models::{EdgeType, NodeKey};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no se puede crear la arista {edge}: falta el nodo {missing}")]
    MissingEndpoint { edge: EdgeType, missing: NodeKey },

    #[error("el documento {document_id} no tiene resúmenes que reducir")]
    EmptyLayer { document_id: String },

    #[error("configuración de troceado inválida: {0}")]
    InvalidChunking(String),
}
