//! Ingesta de un directorio de PDFs en Neo4j: cada PDF se trocea en páginas,
//! cada página se extrae y resume con el LLM y los resúmenes se reducen hasta
//! el `Document` raíz.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{anyhow, Context, Result};
use futures::future::try_join_all;
use mime_guess::MimeGuess;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    config::AppConfig,
    graph_writer::GraphWriter,
    llm::Summarizer,
    models::{DocumentNode, NodeKey, NodeLabel, NodeRef, PageNode, SummaryNode, TreeAddress},
    split,
    tree::{self, IngestMode, TreeBuilder, TreeStats},
};

const PDF_MIME: &str = "application/pdf";

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    pub pages_processed: usize,
    pub summaries_created: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos, {} con error. {} páginas procesadas y {} resúmenes creados.",
            self.files_scanned,
            self.files_ingested,
            self.files_skipped,
            self.files_failed,
            self.pages_processed,
            self.summaries_created
        )
    }
}

/// Lo que deja en el grafo la ingesta de un PDF.
#[derive(Debug, Default)]
pub struct DocumentReport {
    pub pages_created: usize,
    pub pages_reused: usize,
    pub tree: TreeStats,
}

/// Capa de hojas: resúmenes de página (altura 1) en orden de lectura.
#[derive(Debug, Default)]
pub struct LeafLayer {
    pub summaries: Vec<SummaryNode>,
    pub pages_created: usize,
    pub pages_reused: usize,
}

/// Recorre `cfg.documents_dir` e ingiere cada PDF. Un fallo en un documento
/// se registra y la ingesta continúa con el siguiente.
pub async fn process_documents_folder(
    cfg: &AppConfig,
    writer: &GraphWriter,
    summarizer: &dyn Summarizer,
) -> Result<IngestionSummary> {
    let started = Instant::now();
    let root = &cfg.documents_dir;
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        info!("Creado el directorio de documentos vacío: {}", root.display());
    }
    if !root.is_dir() {
        return Err(anyhow!("La ruta no es un directorio: {}", root.display()));
    }

    let mut summary = IngestionSummary::default();
    let mut pdfs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            MimeGuess::from_path(path)
                .first()
                .is_some_and(|mime| mime.essence_str() == PDF_MIME)
        })
        .collect();
    pdfs.sort();

    let total = pdfs.len();
    for (index, path) in pdfs.iter().enumerate() {
        summary.files_scanned += 1;
        info!("[{}/{}] Procesando: {}", index + 1, total, path.display());

        match ingest_pdf(cfg, writer, summarizer, path).await {
            Ok(Some(report)) => {
                summary.files_ingested += 1;
                summary.pages_processed += report.pages_created + report.pages_reused;
                summary.summaries_created += report.tree.summaries_created;
            }
            Ok(None) => {
                summary.files_skipped += 1;
            }
            Err(err) => {
                summary.files_failed += 1;
                error!("Error ingiriendo {}: {err:#}", path.display());
            }
        }
    }

    writer.create_indexes().await?;
    info!(
        "Procesamiento terminado en {}ms",
        started.elapsed().as_millis()
    );
    Ok(summary)
}

/// Ingiere un PDF. `None` si no había nada que hacer (ya completo o en curso
/// en otra ejecución).
pub async fn ingest_pdf(
    cfg: &AppConfig,
    writer: &GraphWriter,
    summarizer: &dyn Summarizer,
    path: &Path,
) -> Result<Option<DocumentReport>> {
    let path_str = path.to_string_lossy().to_string();
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.clone());

    let existing = writer.store().find_document(&path_str).await?;
    if existing.as_ref().is_some_and(DocumentNode::is_complete) {
        info!("Documento '{file_name}' ya procesado. Omitido.");
        return Ok(None);
    }

    let output_dir = cfg
        .documents_split_dir
        .join(split::sanitize_folder_name(&file_name));
    let pdf = path.to_path_buf();
    let Some(page_files) =
        tokio::task::spawn_blocking(move || split::split_pdf_pages(&pdf, &output_dir)).await??
    else {
        return Ok(None);
    };
    if page_files.is_empty() {
        return Err(anyhow!("El PDF {} no tiene páginas", path.display()));
    }

    let (mut doc, mode) = match existing {
        Some(doc) => {
            info!("Reanudando el documento '{file_name}' ({})", doc.id);
            (doc, IngestMode::Resume)
        }
        None => {
            let doc = DocumentNode::new(file_name.clone(), path_str, PDF_MIME.to_string());
            writer.save_document(&doc, &[]).await?;
            (doc, IngestMode::Fresh)
        }
    };

    let leaves = build_leaf_layer(writer, summarizer, &doc, &page_files, mode, cfg.leaf_batch_size).await?;
    info!(
        "Documento '{file_name}': {} páginas. Comenzando a resumir las capas jerárquicas.",
        leaves.summaries.len()
    );

    let tree = TreeBuilder::new(writer, summarizer, mode)
        .build(&mut doc, leaves.summaries)
        .await?;

    info!(
        "Ingerido {} con raíz en la altura {} ({} capas, {} resúmenes nuevos, {} reutilizados).",
        path.display(),
        tree.root_height,
        tree.layers,
        tree.summaries_created,
        tree.summaries_reused
    );
    Ok(Some(DocumentReport {
        pages_created: leaves.pages_created,
        pages_reused: leaves.pages_reused,
        tree,
    }))
}

/// Extrae y resume en paralelo un lote de páginas. El resultado conserva el
/// orden de entrada.
pub async fn process_leaf_batch(
    summarizer: &dyn Summarizer,
    pages: Vec<PageNode>,
) -> Result<Vec<(PageNode, SummaryNode)>> {
    try_join_all(pages.into_iter().map(|page| summarizer.extract_and_summarize(page))).await
}

/// Páginas (altura 0) y sus resúmenes (altura 1). Cada lote se procesa en
/// paralelo y se escribe después en orden de página, encadenando
/// `NEXT`/`PREVIOUS` entre lotes.
pub async fn build_leaf_layer(
    writer: &GraphWriter,
    summarizer: &dyn Summarizer,
    doc: &DocumentNode,
    page_files: &[PathBuf],
    mode: IngestMode,
    batch_size: usize,
) -> Result<LeafLayer> {
    let pages: Vec<PageNode> = page_files
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            PageNode::new(
                &doc.id,
                idx as i64,
                path.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
                path.to_string_lossy().to_string(),
                MimeGuess::from_path(path).first_or_text_plain().to_string(),
            )
        })
        .collect();

    let doc_key = NodeRef::Document(doc).key();
    let batch_size = batch_size.max(1);
    let total_batches = pages.len().div_ceil(batch_size);
    let mut layer = LeafLayer::default();
    let mut prior_page: Option<NodeKey> = None;
    let mut prior_summary: Option<NodeKey> = None;

    for (batch_idx, batch) in pages.chunks(batch_size).enumerate() {
        info!(
            "Procesando lote {}/{} con {} páginas",
            batch_idx + 1,
            total_batches,
            batch.len()
        );

        let mut stored = Vec::with_capacity(batch.len());
        for page in batch {
            let position = page.address.position;
            stored.push(match mode {
                IngestMode::Fresh => (None, None),
                IngestMode::Resume => (
                    tree::find_existing(writer.store(), &doc.id, 0, position).await?,
                    tree::find_existing(writer.store(), &doc.id, 1, position).await?,
                ),
            });
        }

        let pending: Vec<PageNode> = batch
            .iter()
            .zip(&stored)
            .filter(|(_, (page, summary))| page.is_none() || summary.is_none())
            .map(|(page, _)| page.clone())
            .collect();
        let mut computed = process_leaf_batch(summarizer, pending).await?.into_iter();

        for (page, (stored_page, stored_summary)) in batch.iter().zip(stored) {
            let position = page.address.position;
            let fresh = if stored_page.is_none() || stored_summary.is_none() {
                computed.next()
            } else {
                None
            };

            let page_key = match stored_page {
                Some(existing) => {
                    let key = NodeKey {
                        label: NodeLabel::Page,
                        id: existing.id,
                    };
                    writer.link_page(&key, &doc_key, prior_page.as_ref()).await?;
                    writer.repair_chunks(&key, &existing.text).await?;
                    layer.pages_reused += 1;
                    key
                }
                None => {
                    let (page, _) = fresh
                        .as_ref()
                        .with_context(|| format!("Falta la extracción de la página {position}"))?;
                    writer.save_page(page, doc, prior_page.as_ref()).await?;
                    layer.pages_created += 1;
                    NodeRef::Page(page).key()
                }
            };

            let summary = match stored_summary {
                Some(existing) => {
                    let summary = SummaryNode {
                        id: existing.id,
                        address: TreeAddress {
                            document_id: doc.id.clone(),
                            height: 1,
                            position,
                        },
                        text: existing.text,
                    };
                    let key = NodeRef::Summary(&summary).key();
                    writer
                        .link_summary(&key, prior_summary.as_ref(), std::slice::from_ref(&page_key))
                        .await?;
                    writer.repair_chunks(&key, &summary.text).await?;
                    summary
                }
                None => {
                    let (_, summary) = fresh
                        .with_context(|| format!("Falta el resumen de la página {position}"))?;
                    writer
                        .save_summary(&summary, prior_summary.as_ref(), std::slice::from_ref(&page_key))
                        .await?;
                    summary
                }
            };

            prior_page = Some(page_key);
            prior_summary = Some(NodeRef::Summary(&summary).key());
            layer.summaries.push(summary);
        }
    }

    if layer.summaries.is_empty() {
        warn!("Documento '{}' sin páginas que resumir", doc.file_name);
    }
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        chunking::ChunkEmbedder,
        config::LlmProvider,
        graph_store::GraphStore,
        llm::fakes::{CountingEmbedder, EchoSummarizer},
        memory_store::MemoryGraph,
        models::EdgeType,
    };

    fn setup() -> (Arc<MemoryGraph>, GraphWriter, DocumentNode) {
        let store = Arc::new(MemoryGraph::default());
        let chunker = ChunkEmbedder::new(Arc::new(CountingEmbedder::default()), 2000, 200, 20).unwrap();
        let writer = GraphWriter::new(store.clone(), chunker);
        let doc = DocumentNode::new("manual.pdf".into(), "/docs/manual.pdf".into(), PDF_MIME.into());
        (store, writer, doc)
    }

    fn page_files(n: usize) -> Vec<PathBuf> {
        (1..=n)
            .map(|i| PathBuf::from(format!("/split/manual/pages/{i:05}.txt")))
            .collect()
    }

    fn test_config() -> AppConfig {
        AppConfig {
            neo4j_uri: "bolt://localhost:7687".into(),
            neo4j_user: "neo4j".into(),
            neo4j_password: "secreto".into(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".into(),
            llm_chat_model: "gpt-4o-mini".into(),
            llm_max_retries: 0,
            llm_retry_base_ms: 1,
            embedding_dimensions: 2,
            chunk_size: 2000,
            chunk_overlap: 200,
            embed_batch_size: 20,
            leaf_batch_size: 3,
            documents_dir: PathBuf::from("/no/existe"),
            documents_split_dir: PathBuf::from("/no/existe/split"),
        }
    }

    #[tokio::test]
    async fn fresh_leaf_layer_writes_pages_and_summaries_in_order() {
        let (store, writer, doc) = setup();
        writer.save_document(&doc, &[]).await.unwrap();
        let summarizer = EchoSummarizer::default();

        let layer = build_leaf_layer(&writer, &summarizer, &doc, &page_files(4), IngestMode::Fresh, 3)
            .await
            .unwrap();

        let positions: Vec<i64> = layer.summaries.iter().map(|s| s.address.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert!(layer.summaries.iter().all(|s| s.address.height == 1));
        assert_eq!(layer.pages_created, 4);
        assert_eq!(store.address_checks(), 0);

        let pages = store.layer(&doc.id, 0);
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[3].str_prop("file_name"), Some("00004"));
        assert_eq!(pages[3].str_prop("text"), Some("texto de la página 3"));
        for page in &pages {
            let id = page.str_prop("id").unwrap();
            assert!(store.has_edge(&doc.id, id, EdgeType::Contains));
            assert!(store.has_edge(id, &doc.id, EdgeType::PartOf));
        }
        // el encadenamiento cruza el límite entre lotes
        let (p2, p3) = (pages[2].str_prop("id").unwrap(), pages[3].str_prop("id").unwrap());
        assert!(store.has_edge(p2, p3, EdgeType::Next));
        assert!(store.has_edge(&layer.summaries[2].id, &layer.summaries[3].id, EdgeType::Next));
        assert!(store.has_edge(&layer.summaries[3].id, p3, EdgeType::Summarizes));
    }

    #[tokio::test]
    async fn resumed_leaf_layer_reuses_what_is_already_stored() {
        let (store, writer, doc) = setup();
        writer.save_document(&doc, &[]).await.unwrap();
        let first = build_leaf_layer(&writer, &EchoSummarizer::default(), &doc, &page_files(5), IngestMode::Fresh, 2)
            .await
            .unwrap();
        let (nodes, edges) = (store.node_count(), store.edge_count());
        let writes = store.node_writes();

        let summarizer = EchoSummarizer::default();
        let again = build_leaf_layer(&writer, &summarizer, &doc, &page_files(5), IngestMode::Resume, 2)
            .await
            .unwrap();

        assert_eq!(summarizer.pages.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(again.pages_reused, 5);
        assert_eq!(again.pages_created, 0);
        let ids = |l: &LeafLayer| l.summaries.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&again), ids(&first));
        assert_eq!(store.node_count(), nodes);
        assert_eq!(store.edge_count(), edges);
        assert_eq!(store.node_writes(), writes);

        // y el árbol se completa a partir de esas hojas
        let mut doc = doc;
        let stats = TreeBuilder::new(&writer, &summarizer, IngestMode::Resume)
            .build(&mut doc, again.summaries)
            .await
            .unwrap();
        assert!(doc.is_complete());
        assert_eq!(stats.root_height, 3);
    }

    #[tokio::test]
    async fn resumed_pages_recover_chunks_lost_in_a_failed_run() {
        let (store, writer, doc) = setup();
        writer.save_document(&doc, &[]).await.unwrap();
        let broken = ChunkEmbedder::new(Arc::new(CountingEmbedder::failing_on(1)), 2000, 200, 20).unwrap();
        let broken = GraphWriter::new(store.clone(), broken);

        let failed = build_leaf_layer(&broken, &EchoSummarizer::default(), &doc, &page_files(2), IngestMode::Fresh, 15).await;
        assert!(failed.is_err());
        let pages = store.layer(&doc.id, 0);
        assert_eq!(pages.len(), 1);
        let page_id = pages[0].str_prop("id").unwrap().to_string();
        assert!(store.chunks_of(&page_id).is_empty());

        let layer = build_leaf_layer(&writer, &EchoSummarizer::default(), &doc, &page_files(2), IngestMode::Resume, 15)
            .await
            .unwrap();

        assert_eq!(layer.pages_reused, 1);
        assert_eq!(store.nodes_at(&doc.id, 0, 0).len(), 1);
        let chunks = store.chunks_of(&page_id);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].str_prop("text"), Some("texto de la página 0"));
    }

    #[tokio::test]
    async fn page_without_summary_is_summarized_again_but_not_duplicated() {
        let (store, writer, doc) = setup();
        writer.save_document(&doc, &[]).await.unwrap();
        let orphan = PageNode::new(&doc.id, 0, "00001".into(), "/split/manual/pages/00001.txt".into(), "text/plain".into());
        writer.save_page(&orphan, &doc, None).await.unwrap();

        let summarizer = EchoSummarizer::default();
        let layer = build_leaf_layer(&writer, &summarizer, &doc, &page_files(2), IngestMode::Resume, 15)
            .await
            .unwrap();

        assert_eq!(summarizer.pages.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(layer.pages_reused, 1);
        assert_eq!(store.nodes_at(&doc.id, 0, 0).len(), 1);
        assert!(store.has_edge(&layer.summaries[0].id, &orphan.id, EdgeType::Summarizes));
        assert_eq!(store.nodes_with_label(NodeLabel::Page).len(), 2);
    }

    /// Responde antes cuanto más alta es la posición.
    struct SlowFirstSummarizer;

    #[async_trait]
    impl Summarizer for SlowFirstSummarizer {
        async fn summarize(&self, _: &[SummaryNode], _: i64) -> Result<SummaryNode> {
            Err(anyhow!("no se usa"))
        }

        async fn extract_and_summarize(&self, page: PageNode) -> Result<(PageNode, SummaryNode)> {
            let position = page.address.position;
            tokio::time::sleep(Duration::from_millis(5 * (4 - position as u64))).await;
            let summary = SummaryNode::new(&page.address.document_id, 1, position, format!("p{position}"));
            Ok((page, summary))
        }
    }

    #[tokio::test]
    async fn leaf_batches_keep_input_order() {
        let pages: Vec<PageNode> = (0..4)
            .map(|i| PageNode::new("d", i, format!("{i}"), format!("/p/{i}.txt"), "text/plain".into()))
            .collect();

        let out = process_leaf_batch(&SlowFirstSummarizer, pages).await.unwrap();

        let positions: Vec<i64> = out.iter().map(|(p, _)| p.address.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert!(out.iter().all(|(p, s)| p.address.position == s.address.position));
    }

    #[tokio::test]
    async fn complete_documents_are_skipped_without_touching_the_file() {
        let (store, writer, mut doc) = setup();
        doc.address.height = 2;
        doc.text = "raíz".into();
        store.save_node(NodeRef::from(&doc)).await.unwrap();
        let summarizer = EchoSummarizer::default();

        let report = ingest_pdf(&test_config(), &writer, &summarizer, Path::new("/docs/manual.pdf"))
            .await
            .unwrap();

        assert!(report.is_none());
        assert_eq!(summarizer.summarize_calls(), 0);
    }

    #[tokio::test]
    async fn empty_folder_still_creates_the_indexes() {
        let (store, writer, _) = setup();
        let mut cfg = test_config();
        cfg.documents_dir = std::env::temp_dir().join(format!("raptor-docs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&cfg.documents_dir).unwrap();
        std::fs::write(cfg.documents_dir.join("notas.txt"), "no es un pdf").unwrap();

        let summary = tokio_test::assert_ok!(
            process_documents_folder(&cfg, &writer, &EchoSummarizer::default()).await
        );

        assert_eq!(summary.files_scanned, 0);
        assert!(store.indexes_created());
        std::fs::remove_dir_all(&cfg.documents_dir).unwrap();
    }

    #[test]
    fn summary_display_lists_every_counter() {
        let summary = IngestionSummary {
            files_scanned: 3,
            files_ingested: 1,
            files_skipped: 1,
            files_failed: 1,
            pages_processed: 12,
            summaries_created: 7,
        };
        let text = summary.to_string();
        assert!(text.contains("3 ficheros escaneados"));
        assert!(text.contains("1 con error"));
        assert!(text.contains("12 páginas"));
    }
}
