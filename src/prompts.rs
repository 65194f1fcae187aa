//! Textos de prompt para la extracción de páginas y la reducción de resúmenes.

use crate::models::SummaryNode;

const USAGE_BLURB: &str = r#"
La información que generes se indexará para búsqueda por palabras clave y búsqueda semántica.
Se guardará en un grafo jerárquico de Neo4j que conserva la estructura del documento: cada documento
forma un árbol de resúmenes que agrega resúmenes detallados de página en las hojas hasta resúmenes
cada vez más generales, terminando en un nodo raíz que representa el documento completo.
Un agente de IA usará después estos índices para localizar resúmenes con el nivel de detalle adecuado
y podrá moverse vertical y lateralmente por el grafo para obtener más contexto.
"#;

const ADMONISHMENT_BLURB: &str = r#"
Limita tu respuesta a la información solicitada. No inventes nada y cíñete al material proporcionado.
No añadas narrativa sobre tu proceso ni cortesías: estas peticiones se procesan en bloque de forma automática.
Responde en el idioma del documento.
"#;

/// Preamble del agente de extracción de páginas. `schema` es el JSON Schema
/// que debe cumplir la respuesta.
pub fn extract_and_summarize_page_prompt(schema: &str) -> String {
    format!(
        r#"
Recibes el contenido de una única página de un documento (potencialmente extenso).
Tu tarea es responder con una salida estructurada con la información clave de la página.
El texto extraído y el resumen deben ser tan completos y precisos como sea posible.
Representa los datos tabulares en formato markdown.
{USAGE_BLURB}
{ADMONISHMENT_BLURB}
La salida DEBE ser un único objeto JSON válido que cumpla este JSON Schema. Sólo el JSON, sin explicaciones:
{schema}
"#
    )
}

/// Preamble del agente que condensa resúmenes consecutivos.
pub fn summarize_summaries_preamble() -> String {
    format!(
        r#"
Recibes varios resúmenes, cada uno de una parte consecutiva de un documento.
Tu tarea es condensarlos en un único resumen de nivel superior, sucinto pero completo, que recoja
los puntos clave de cada resumen de nivel inferior. Debe ser más corto que la suma de los resúmenes
recibidos, no más de unos pocos párrafos, y conservar los conceptos de alto nivel.
{USAGE_BLURB}
{ADMONISHMENT_BLURB}
"#
    )
}

/// Cuerpo del prompt: los resúmenes numerados en orden de lectura.
pub fn summarize_summaries_prompt(summaries: &[SummaryNode]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(idx, s)| format!("- Resumen #{}:\n\n{}\n\n", idx + 1, s.text))
        .collect()
}
