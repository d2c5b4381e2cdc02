//! Language analysis for the construction pipeline.
//!
//! # Components
//!
//! - **lang**: sentence language classification (ko / en / other)
//! - **segment**: sentence segmentation with heading and list heuristics
//! - **phrase**: per-language candidate phrase extraction
//! - **embeddings**: deterministic phrase embeddings + cosine helpers
//! - **topic**: seeded latent topic model and similarity matrices

pub mod embeddings;
pub mod lang;
pub mod phrase;
pub mod segment;
pub mod topic;

pub use embeddings::{cosine, cosine_f32, cosine_matrix, EmbeddingProvider, HashedNgramEmbedder};
pub use lang::{detect_lang, Lang};
pub use phrase::extract_phrases;
pub use segment::split_sentences;
pub use topic::{SimilarityMatrix, TopicFit};

use serde::{Deserialize, Serialize};

/// One segmented sentence with its language and candidate phrases.
///
/// Immutable once built; the `index` is the position in the document-wide
/// sentence sequence and is stable for the lifetime of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    /// Position in the document-wide ordered sequence.
    pub index: usize,
    /// Cleaned sentence text.
    pub text: String,
    /// Detected language.
    pub lang: Lang,
    /// Candidate phrases, deduplicated, insertion-ordered.
    pub tokens: Vec<String>,
}

impl Sentence {
    /// Segment raw text and analyze every sentence.
    #[must_use]
    pub fn analyze_document(text: &str, short_line_max_chars: usize) -> Vec<Self> {
        split_sentences(text, short_line_max_chars)
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                let lang = detect_lang(&text);
                let tokens = extract_phrases(&text, lang);
                Self {
                    index,
                    text,
                    lang,
                    tokens,
                }
            })
            .collect()
    }
}
