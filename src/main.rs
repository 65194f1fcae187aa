// Módulos de la aplicación
mod chunking;
mod config;
mod error;
mod graph_store;
mod graph_writer;
mod ingest;
mod llm;
#[cfg(test)]
mod memory_store;
mod models;
mod neo4j_client;
mod prompts;
mod retry;
mod search;
mod split;
mod tree;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    chunking::ChunkEmbedder, graph_writer::GraphWriter, models::EdgeType, neo4j_client::Neo4jStore,
    search::Searcher,
};

const SEARCH_RESULTS: usize = 5;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar a Neo4j y asegurar esquemas
    let graph = neo4j_client::connect_from_config(&cfg)
        .await
        .expect("Error conectando a Neo4j");
    let store = Arc::new(Neo4jStore::new(Arc::new(graph), cfg.embedding_dimensions));
    store
        .ensure_schema()
        .await
        .expect("Error asegurando el esquema de Neo4j");

    // 4. Inicializar gestor de LLMs y troceado con embeddings
    let llm_manager = Arc::new(llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager"));
    let chunker = ChunkEmbedder::new(
        llm_manager.clone(),
        cfg.chunk_size,
        cfg.chunk_overlap,
        cfg.embed_batch_size,
    )
    .expect("Configuración de troceado inválida");

    // 5. Modo búsqueda: `buscar <consulta>` sobre lo ya ingerido
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("buscar") {
        let searcher = Searcher::new(store, llm_manager);
        if let Err(err) = run_search(&searcher, &args[1..].join(" ")).await {
            error!("La búsqueda terminó con error: {err:#}");
            std::process::exit(1);
        }
        return;
    }

    let writer = GraphWriter::new(store, chunker);

    // 6. Ingerir el directorio de documentos
    info!("🚀 Ingiriendo documentos de {}", cfg.documents_dir.display());
    match ingest::process_documents_folder(&cfg, &writer, llm_manager.as_ref()).await {
        Ok(summary) => info!("✅ {summary}"),
        Err(err) => {
            error!("La ingesta terminó con error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run_search(searcher: &Searcher, query: &str) -> anyhow::Result<()> {
    info!("🔎 Búsqueda semántica: {query}");
    let hits = searcher.semantic_search(query, SEARCH_RESULTS).await?;
    for hit in &hits {
        info!("{hit}");
    }
    // lo que resume el nodo del mejor resultado, un nivel más abajo
    if let Some(owner) = hits.first().and_then(|hit| hit.parent.as_ref()) {
        for child in searcher.neighbours(owner, EdgeType::Summarizes).await? {
            info!("  ↳ {}", child.key);
        }
    }
    info!("🔎 Búsqueda full-text: {query}");
    for hit in searcher.fulltext_search(query, SEARCH_RESULTS).await? {
        info!("{hit}");
    }
    Ok(())
}
