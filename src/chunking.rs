//! Troceado recursivo de texto y cálculo de embeddings por lotes.
//!
//! El troceado busca primero fronteras de párrafo, luego de línea, luego de
//! palabra y, en último caso, corta por carácter. Los trozos miden como
//! máximo `chunk_size` caracteres y comparten `overlap` caracteres de
//! contexto con el anterior.

use std::{collections::VecDeque, sync::Arc};

use anyhow::Result;
use futures::{stream, Stream, StreamExt, TryStreamExt};

use crate::{error::GraphError, llm::Embedder, models::ChunkNode};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Divide `text` en fragmentos de a lo sumo `chunk_size` caracteres.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_recursive(text, &SEPARATORS, chunk_size, overlap)
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    // "" siempre está presente, así que siempre hay separador
    let idx = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len() - 1);
    let separator = separators[idx];
    let finer = &separators[idx + 1..];

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|p| !p.is_empty()).collect()
    };

    let mut output = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for piece in pieces {
        if char_len(piece) < chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            output.extend(merge_pieces(&fitting, separator, chunk_size, overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            output.push(piece.to_string());
        } else {
            output.extend(split_recursive(piece, finer, chunk_size, overlap));
        }
    }
    if !fitting.is_empty() {
        output.extend(merge_pieces(&fitting, separator, chunk_size, overlap));
    }
    output
}

/// Junta piezas pequeñas en trozos de hasta `chunk_size`, dejando en la
/// ventana las últimas piezas (hasta `overlap` caracteres) como contexto del
/// siguiente trozo.
fn merge_pieces(pieces: &[&str], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        let joined_len = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { sep_len };

        if total + len + joined_len(&window) > chunk_size && !window.is_empty() {
            if let Some(chunk) = join_window(&window, separator) {
                chunks.push(chunk);
            }
            while total > overlap || (total > 0 && total + len + joined_len(&window) > chunk_size) {
                let Some(first) = window.pop_front() else { break };
                total -= char_len(first) + if window.is_empty() { 0 } else { sep_len };
            }
        }

        total += len + joined_len(&window);
        window.push_back(piece);
    }

    if let Some(chunk) = join_window(&window, separator) {
        chunks.push(chunk);
    }
    chunks
}

fn join_window(window: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Adaptador trocear-y-vectorizar usado por toda escritura de texto libre.
#[derive(Clone)]
pub struct ChunkEmbedder {
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    overlap: usize,
    batch_size: usize,
}

impl ChunkEmbedder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        chunk_size: usize,
        overlap: usize,
        batch_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(GraphError::InvalidChunking(format!(
                "overlap ({overlap}) debe ser menor que chunk_size ({chunk_size})"
            ))
            .into());
        }
        if batch_size == 0 {
            return Err(GraphError::InvalidChunking("EMBED_BATCH_SIZE debe ser > 0".into()).into());
        }
        Ok(Self {
            embedder,
            chunk_size,
            overlap,
            batch_size,
        })
    }

    /// Cuántos chunks produce `text`, sin llamar al proveedor.
    pub fn fragment_count(&self, text: &str) -> usize {
        split_text(text, self.chunk_size, self.overlap).len()
    }

    /// Secuencia perezosa de chunks con embedding. Texto vacío = secuencia
    /// vacía, sin llamadas al proveedor. Los embeddings se piden en lotes de
    /// `batch_size` fragmentos.
    pub fn chunk_and_embed(&self, text: &str) -> impl Stream<Item = Result<ChunkNode>> + Send + '_ {
        let fragments = split_text(text, self.chunk_size, self.overlap);
        let batches: Vec<Vec<String>> = fragments
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        stream::iter(batches)
            .then(move |batch| async move { self.embedder.embed(batch).await })
            .map_ok(|embedded| stream::iter(embedded.into_iter().map(Ok::<_, anyhow::Error>)))
            .try_flatten()
            .enumerate()
            .map(|(sequence, item)| {
                item.map(|embedded| ChunkNode::new(embedded.text, embedded.vector, sequence as i64))
            })
    }
}
