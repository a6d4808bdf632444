pub mod chunk;
pub mod chunker;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};

use sha2::{Digest, Sha256};
use tracing::debug;

/// Generate a stable document ID from its source name
pub fn generate_doc_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Normalize whitespace while keeping paragraph breaks.
///
/// Runs of spaces and tabs become one space, lines are trimmed, and any run
/// of blank lines becomes a single empty line.
pub fn clean_text(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs.join("\n\n")
}

/// Clean and chunk a document held in memory.
pub fn ingest_text(text: &str, source: &str) -> Vec<Chunk> {
    ingest_text_with(&Chunker::default(), text, source)
}

pub fn ingest_text_with(chunker: &Chunker, text: &str, source: &str) -> Vec<Chunk> {
    let doc_id = generate_doc_id(source);
    let cleaned = clean_text(text);
    let chunks = chunker.chunk_text(&doc_id, &cleaned, source);

    debug!(source, doc_id = %doc_id, chunks = chunks.len(), "Chunked document");
    chunks
}
