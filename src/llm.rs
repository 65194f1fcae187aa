//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! `Embedder` y `Summarizer` son los puntos de inyección: el árbol y la
//! persistencia sólo conocen estos traits.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::{
    config::{AppConfig, LlmProvider},
    models::{PageNode, SummaryNode},
    prompts,
    retry::RetryPolicy,
};

/// Resultado de un embedding de un fragmento de texto.
#[derive(Debug, Clone)]
pub struct EmbeddedText {
    pub text: String,
    pub vector: Vec<f64>,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Un vector por texto, en el mismo orden.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<EmbeddedText>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condensa `summaries` (misma capa) en un resumen de la capa siguiente.
    async fn summarize(&self, summaries: &[SummaryNode], position: i64) -> Result<SummaryNode>;

    /// Extrae el texto de la página y devuelve su resumen de altura 1.
    async fn extract_and_summarize(&self, page: PageNode) -> Result<(PageNode, SummaryNode)>;
}

/// Salida estructurada esperada al procesar una página.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PageExtraction {
    /// Texto completo de la página. Los datos tabulares en formato markdown.
    pub full_text: String,
    /// Resumen completo y minucioso del contenido de la página, describiendo
    /// gráficos y tablas con detalle.
    pub summary: String,
    /// Si la página contiene información en forma gráfica (diagramas, imágenes, dibujos...).
    pub has_graphics: bool,
    /// Si la página contiene datos tabulares.
    pub has_tabular_data: bool,
}

/// Limpia la respuesta del LLM (bloques ```json) y la parsea.
pub fn parse_page_extraction(response: &str) -> Result<PageExtraction> {
    let json_response = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str::<PageExtraction>(json_response)
        .with_context(|| format!("Respuesta de extracción no es JSON válido: '{response}'"))
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    retry: RetryPolicy,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            retry: RetryPolicy::new(
                cfg.llm_max_retries,
                Duration::from_millis(cfg.llm_retry_base_ms),
            ),
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: &[String]) -> Result<Vec<EmbeddedText>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();

        // Modelo de embeddings: config o default
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };

        let embedding_model = client.embedding_model(model_name);
        let embeddings = embedding_model.embed_texts(texts.to_vec()).await?;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de fragmentos ({})",
                embeddings.len(),
                texts.len()
            ));
        }

        Ok(texts
            .iter()
            .zip(embeddings)
            .map(|(text, emb)| EmbeddedText {
                text: text.clone(),
                vector: emb.vec,
            })
            .collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Una llamada al modelo de chat con un preamble fijo.
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(preamble, prompt).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }

    async fn complete_with_openai(&self, preamble: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(preamble).build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    /// Nota: sólo implementado para OpenAI. Para otros proveedores
    /// se podrían añadir ramas adicionales al `match`.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<EmbeddedText>> {
        match self.provider {
            LlmProvider::OpenAI => {
                let texts = &texts;
                self.retry
                    .run("embeddings", move || self.embed_with_openai(texts))
                    .await
            }
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }
}

#[async_trait]
impl Summarizer for LlmManager {
    async fn summarize(&self, summaries: &[SummaryNode], position: i64) -> Result<SummaryNode> {
        if summaries.is_empty() {
            return Err(anyhow!("No hay resúmenes que condensar en la posición {position}"));
        }
        let preamble = prompts::summarize_summaries_preamble();
        let prompt = prompts::summarize_summaries_prompt(summaries);
        let (preamble, prompt) = (&preamble, &prompt);

        let text = self
            .retry
            .run("resumen de resúmenes", move || self.complete(preamble, prompt))
            .await?;

        SummaryNode::condensing(summaries, position, text.trim().to_string())
            .ok_or_else(|| anyhow!("No hay resúmenes que condensar en la posición {position}"))
    }

    async fn extract_and_summarize(&self, mut page: PageNode) -> Result<(PageNode, SummaryNode)> {
        let content = tokio::fs::read_to_string(&page.file_path)
            .await
            .with_context(|| format!("No se pudo leer la página {}", page.file_path))?;

        let schema = serde_json::to_string_pretty(&schemars::schema_for!(PageExtraction))?;
        let preamble = prompts::extract_and_summarize_page_prompt(&schema);
        let (preamble, content) = (&preamble, &content);

        let extraction = self
            .retry
            .run("extracción de página", move || async move {
                let response = self.complete(preamble, content).await?;
                parse_page_extraction(&response)
            })
            .await?;

        debug!(
            "Página {} extraída ({} caracteres)",
            page.address.position,
            extraction.full_text.len()
        );

        page.text = extraction.full_text;
        page.has_graphics = extraction.has_graphics;
        page.has_tabular_data = extraction.has_tabular_data;
        let summary = SummaryNode::new(
            &page.address.document_id,
            page.address.height + 1,
            page.address.position,
            extraction.summary,
        );
        Ok((page, summary))
    }
}
