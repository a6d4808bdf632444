use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::Chunk;

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Upper bound on a chunk's length in characters.
    pub max_chars: usize,
    /// Trailing sentences of a full chunk repeated at the start of the next one.
    pub overlap_sentences: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_sentences: 0,
        }
    }
}

/// A unit of packing: a whole paragraph or a single sentence, plus the
/// separator placed before it when it is not first in a chunk.
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    sep: &'static str,
}

impl Piece {
    fn len(&self) -> usize {
        self.text.chars().count()
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn chunk_text(&self, doc_id: &str, text: &str, source: &str) -> Vec<Chunk> {
        let pieces = self.split_pieces(text);
        self.pack(pieces)
            .into_iter()
            .enumerate()
            .map(|(index, body)| Chunk::new(doc_id.to_string(), index, body, source.to_string()))
            .collect()
    }

    fn split_pieces(&self, text: &str) -> Vec<Piece> {
        let max = self.config.max_chars.max(1);
        let mut pieces = Vec::new();

        for paragraph in split_by_paragraphs(text) {
            if paragraph.chars().count() <= max {
                pieces.push(Piece { text: paragraph.to_string(), sep: PARAGRAPH_SEP });
                continue;
            }

            let mut first = true;
            for sentence in paragraph.unicode_sentences() {
                let sentence = sentence.trim();
                if sentence.is_empty() {
                    continue;
                }
                for part in split_chars(sentence, max) {
                    let sep = if first { PARAGRAPH_SEP } else { SENTENCE_SEP };
                    first = false;
                    pieces.push(Piece { text: part, sep });
                }
            }
        }

        pieces
    }

    fn pack(&self, pieces: Vec<Piece>) -> Vec<String> {
        let max = self.config.max_chars.max(1);
        let mut chunks = Vec::new();
        let mut buffer: Vec<Piece> = Vec::new();

        for piece in pieces {
            if !buffer.is_empty() && joined_len(&buffer) + piece.sep.len() + piece.len() > max {
                chunks.push(render(&buffer));
                buffer = self.overlap_tail(&buffer);
                if !buffer.is_empty() && joined_len(&buffer) + piece.sep.len() + piece.len() > max {
                    buffer.clear();
                }
            }
            buffer.push(piece);
        }

        if !buffer.is_empty() {
            chunks.push(render(&buffer));
        }

        chunks
    }

    fn overlap_tail(&self, buffer: &[Piece]) -> Vec<Piece> {
        let n = self.config.overlap_sentences;
        if n == 0 || buffer.len() <= 1 {
            return Vec::new();
        }
        buffer[buffer.len().saturating_sub(n).max(1)..].to_vec()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

fn split_by_paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// Cut `text` into pieces of at most `max` characters on char boundaries.
fn split_chars(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max)
        .map(|part| part.iter().collect::<String>().trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn joined_len(buffer: &[Piece]) -> usize {
    buffer
        .iter()
        .enumerate()
        .map(|(i, p)| if i == 0 { p.len() } else { p.sep.len() + p.len() })
        .sum()
}

fn render(buffer: &[Piece]) -> String {
    let mut out = String::new();
    for (i, piece) in buffer.iter().enumerate() {
        if i > 0 {
            out.push_str(piece.sep);
        }
        out.push_str(&piece.text);
    }
    out
}
