use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    pub text: String,
    pub source: String,
}

impl Chunk {
    pub fn new(doc_id: String, chunk_index: usize, text: String, source: String) -> Self {
        let chunk_id = Self::generate_chunk_id(&doc_id, chunk_index, &text);

        Self {
            doc_id,
            chunk_id,
            chunk_index,
            text,
            source,
        }
    }

    fn generate_chunk_id(doc_id: &str, chunk_index: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(chunk_index.to_string().as_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_stable_and_positional() {
        let a = Chunk::new("doc".into(), 0, "same text".into(), "a.txt".into());
        let b = Chunk::new("doc".into(), 0, "same text".into(), "a.txt".into());
        let c = Chunk::new("doc".into(), 1, "same text".into(), "a.txt".into());

        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_eq!(a.chunk_id.len(), 32);
    }
}
