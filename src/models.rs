//! Modelos de dominio: nodos del árbol de resúmenes y aristas del grafo Neo4j.
//!
//! Cada variante expone sus propiedades de forma explícita (`NodeRef::properties`)
//! para que las escrituras en el grafo sean totales y con tipos fijos.

use std::fmt;

use chrono::Utc;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Etiquetas de nodo usadas en Neo4j.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeLabel {
    Document,
    Page,
    Summary,
    Chunk,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 4] = [
        NodeLabel::Document,
        NodeLabel::Page,
        NodeLabel::Summary,
        NodeLabel::Chunk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Document => "Document",
            NodeLabel::Page => "Page",
            NodeLabel::Summary => "Summary",
            NodeLabel::Chunk => "Chunk",
        }
    }

    /// Etiqueta a partir de su nombre en el grafo.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_str() == name)
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Etiqueta secundaria de todo nodo con texto indexable.
pub const SEARCHABLE_LABEL: &str = "Searchable";

/// Tipos de arista dirigida del grafo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeType {
    Next,
    Previous,
    Contains,
    PartOf,
    Summarizes,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Next => "NEXT",
            EdgeType::Previous => "PREVIOUS",
            EdgeType::Contains => "CONTAINS",
            EdgeType::PartOf => "PART_OF",
            EdgeType::Summarizes => "SUMMARIZES",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifica un extremo de arista: etiqueta + id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub id: String,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(:{} {{id: {}}})", self.label, self.id)
    }
}

/// Dirección de un nodo dentro del árbol de su documento.
/// `(document_id, height, position)` es única entre los nodos persistidos.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeAddress {
    pub document_id: String,
    /// 0 = páginas; crece hacia la raíz. -1 = aún desconocida (sólo Document).
    pub height: i64,
    /// Índice 0-based dentro de su capa, en orden de lectura.
    pub position: i64,
}

/// Representa un nodo (:Document) en Neo4j: la raíz del árbol de un fichero.
#[derive(Debug, Clone)]
pub struct DocumentNode {
    pub id: String,
    pub address: TreeAddress,
    /// Resumen raíz; vacío hasta que termina la reducción.
    pub text: String,
    pub file_name: String,
    pub file_path: String,
    pub mime_type: String,
    pub ingested_at: String,
}

impl DocumentNode {
    pub fn new(file_name: String, file_path: String, mime_type: String) -> Self {
        let id = new_id();
        Self {
            address: TreeAddress {
                document_id: id.clone(),
                height: -1,
                position: 0,
            },
            id,
            text: String::new(),
            file_name,
            file_path,
            mime_type,
            ingested_at: Utc::now().to_rfc3339(),
        }
    }

    /// Un documento está completo cuando ya conoce la altura de su raíz.
    pub fn is_complete(&self) -> bool {
        self.address.height >= 0
    }
}

/// Representa un nodo (:Page) en Neo4j: hoja del árbol (altura 0).
#[derive(Debug, Clone)]
pub struct PageNode {
    pub id: String,
    pub address: TreeAddress,
    pub text: String,
    pub file_name: String,
    pub file_path: String,
    pub mime_type: String,
    pub has_graphics: bool,
    pub has_tabular_data: bool,
}

impl PageNode {
    pub fn new(
        document_id: &str,
        position: i64,
        file_name: String,
        file_path: String,
        mime_type: String,
    ) -> Self {
        Self {
            id: new_id(),
            address: TreeAddress {
                document_id: document_id.to_string(),
                height: 0,
                position,
            },
            text: String::new(),
            file_name,
            file_path,
            mime_type,
            has_graphics: false,
            has_tabular_data: false,
        }
    }
}

/// Representa un nodo (:Summary) en Neo4j (altura >= 1).
#[derive(Debug, Clone)]
pub struct SummaryNode {
    pub id: String,
    pub address: TreeAddress,
    pub text: String,
}

impl SummaryNode {
    pub fn new(document_id: &str, height: i64, position: i64, text: String) -> Self {
        Self {
            id: new_id(),
            address: TreeAddress {
                document_id: document_id.to_string(),
                height,
                position,
            },
            text,
        }
    }

    /// Resumen de la capa superior a `children`, en la posición dada.
    /// Devuelve `None` si no hay hijos.
    pub fn condensing(children: &[SummaryNode], position: i64, text: String) -> Option<Self> {
        let first = children.first()?;
        Some(Self::new(
            &first.address.document_id,
            first.address.height + 1,
            position,
            text,
        ))
    }
}

/// Representa un nodo (:Chunk) en Neo4j: trozo de texto con su embedding.
/// Siempre pertenece a un único padre vía `PART_OF`.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f64>,
    pub sequence: i64,
}

impl ChunkNode {
    pub fn new(text: String, embedding: Vec<f64>, sequence: i64) -> Self {
        Self {
            id: new_id(),
            text,
            embedding,
            sequence,
        }
    }

    /// Fija el id a partir del padre y la secuencia: volver a guardar los
    /// chunks de un mismo nodo sobrescribe los existentes.
    pub fn owned_by(mut self, parent_id: &str) -> Self {
        self.id = format!("{parent_id}-chunk-{}", self.sequence);
        self
    }
}

/// Valor de propiedad admitido en las escrituras.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Floats(Vec<f64>),
}

/// Vista prestada de cualquier variante de nodo.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Document(&'a DocumentNode),
    Page(&'a PageNode),
    Summary(&'a SummaryNode),
    Chunk(&'a ChunkNode),
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            NodeRef::Document(d) => &d.id,
            NodeRef::Page(p) => &p.id,
            NodeRef::Summary(s) => &s.id,
            NodeRef::Chunk(c) => &c.id,
        }
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            NodeRef::Document(_) => NodeLabel::Document,
            NodeRef::Page(_) => NodeLabel::Page,
            NodeRef::Summary(_) => NodeLabel::Summary,
            NodeRef::Chunk(_) => NodeLabel::Chunk,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            label: self.label(),
            id: self.id().to_string(),
        }
    }

    pub fn text(&self) -> &'a str {
        match self {
            NodeRef::Document(d) => &d.text,
            NodeRef::Page(p) => &p.text,
            NodeRef::Summary(s) => &s.text,
            NodeRef::Chunk(c) => &c.text,
        }
    }

    /// Todas las variantes llevan texto, así que todas entran en el índice full-text.
    pub fn is_searchable(&self) -> bool {
        true
    }

    pub fn address(&self) -> Option<&'a TreeAddress> {
        match self {
            NodeRef::Document(d) => Some(&d.address),
            NodeRef::Page(p) => Some(&p.address),
            NodeRef::Summary(s) => Some(&s.address),
            NodeRef::Chunk(_) => None,
        }
    }

    /// Propiedades que se escriben en el nodo, incluido `id`.
    pub fn properties(&self) -> Vec<(&'static str, PropValue)> {
        let mut props = vec![("id", PropValue::Str(self.id().to_string()))];
        if let Some(addr) = self.address() {
            props.push(("document_id", PropValue::Str(addr.document_id.clone())));
            props.push(("height", PropValue::Int(addr.height)));
            props.push(("position", PropValue::Int(addr.position)));
        }
        props.push(("text", PropValue::Str(self.text().to_string())));

        match self {
            NodeRef::Document(d) => {
                props.push(("file_name", PropValue::Str(d.file_name.clone())));
                props.push(("file_path", PropValue::Str(d.file_path.clone())));
                props.push(("mime_type", PropValue::Str(d.mime_type.clone())));
                props.push(("ingested_at", PropValue::Str(d.ingested_at.clone())));
            }
            NodeRef::Page(p) => {
                props.push(("file_name", PropValue::Str(p.file_name.clone())));
                props.push(("file_path", PropValue::Str(p.file_path.clone())));
                props.push(("mime_type", PropValue::Str(p.mime_type.clone())));
                props.push(("has_graphics", PropValue::Bool(p.has_graphics)));
                props.push(("has_tabular_data", PropValue::Bool(p.has_tabular_data)));
            }
            NodeRef::Summary(_) => {}
            NodeRef::Chunk(c) => {
                props.push(("embedding", PropValue::Floats(c.embedding.clone())));
                props.push(("sequence", PropValue::Int(c.sequence)));
            }
        }
        props
    }
}

impl<'a> From<&'a DocumentNode> for NodeRef<'a> {
    fn from(node: &'a DocumentNode) -> Self {
        NodeRef::Document(node)
    }
}

impl<'a> From<&'a PageNode> for NodeRef<'a> {
    fn from(node: &'a PageNode) -> Self {
        NodeRef::Page(node)
    }
}

impl<'a> From<&'a SummaryNode> for NodeRef<'a> {
    fn from(node: &'a SummaryNode) -> Self {
        NodeRef::Summary(node)
    }
}

impl<'a> From<&'a ChunkNode> for NodeRef<'a> {
    fn from(node: &'a ChunkNode) -> Self {
        NodeRef::Chunk(node)
    }
}
