//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + ingesta).

use std::{env, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_max_retries: usize,
    pub llm_retry_base_ms: u64,

    /// Dimensión del índice vectorial sobre `:Chunk(embedding)`.
    pub embedding_dimensions: i64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    /// Páginas enviadas en paralelo al modelo en cada lote.
    pub leaf_batch_size: usize,

    pub documents_dir: PathBuf,
    pub documents_split_dir: PathBuf,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider: LlmProvider = llm_provider_str.parse()?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let documents_dir = env::var("DOCUMENTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("files/documents"));
        let documents_split_dir = env::var("DOCUMENTS_SPLIT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("files/documents_split"));

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_max_retries: env_number("LLM_MAX_RETRIES", 3)?,
            llm_retry_base_ms: env_number("LLM_RETRY_BASE_MS", 500)?,
            embedding_dimensions: env_number("EMBEDDING_DIMENSIONS", 1536)?,
            chunk_size: env_number("CHUNK_SIZE", 2000)?,
            chunk_overlap: env_number("CHUNK_OVERLAP", 200)?,
            embed_batch_size: env_number("EMBED_BATCH_SIZE", 20)?,
            leaf_batch_size: env_number("LEAF_BATCH_SIZE", 15)?,
            documents_dir,
            documents_split_dir,
        })
    }
}

/// Lee una variable numérica; si falta se usa `default`, si no parsea es un error.
fn env_number<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => parse_number(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow!("Valor inválido para {key}: '{raw}'"))
}
