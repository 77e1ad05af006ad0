//! Retrieval Index
//!
//! [`RetrievalIndex`] is the seam the orchestrator queries once per feature.
//! [`LexicalIndex`] is the in-process implementation: TF-IDF cosine
//! similarity over identifier-aware tokens.
//!
//! # Determinism
//! Equal scores are ordered by [`DefinitionId`], so a given index and query
//! always yield the same ranking.

use crate::error::RetrievalError;
use async_trait::async_trait;
use locus_model::{CodeDefinition, DefinitionId};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Default number of snippet characters indexed per definition
pub const DEFAULT_MAX_SNIPPET_CHARS: usize = 2000;

/// Nearest-neighbour search over code definitions
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Upsert definitions keyed by identifier
    ///
    /// # Errors
    /// Returns [`RetrievalError`] if the backend rejects the batch.
    async fn index(&self, definitions: &[CodeDefinition]) -> Result<(), RetrievalError>;

    /// Top `k` definitions most similar to `query`, best first
    ///
    /// # Errors
    /// Returns [`RetrievalError`] if the backend cannot answer.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<CodeDefinition>, RetrievalError>;
}

#[derive(Debug)]
struct IndexedDoc {
    definition: CodeDefinition,
    term_freq: HashMap<String, f64>,
}

#[derive(Debug, Default)]
struct LexicalState {
    docs: BTreeMap<DefinitionId, IndexedDoc>,
    doc_freq: HashMap<String, usize>,
}

impl LexicalState {
    fn remove(&mut self, id: &DefinitionId) {
        if let Some(old) = self.docs.remove(id) {
            for term in old.term_freq.keys() {
                if let Some(count) = self.doc_freq.get_mut(term) {
                    *count -= 1;
                    if *count == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
        }
    }

    fn insert(&mut self, doc: IndexedDoc) {
        for term in doc.term_freq.keys() {
            *self.doc_freq.entry(term.clone()).or_default() += 1;
        }
        self.docs.insert(doc.definition.id, doc);
    }

    fn idf(&self, term: &str) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = self.docs.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }
}

/// In-memory TF-IDF index
#[derive(Debug)]
pub struct LexicalIndex {
    state: RwLock<LexicalState>,
    max_snippet_chars: usize,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalIndex {
    /// Create empty index
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LexicalState::default()),
            max_snippet_chars: DEFAULT_MAX_SNIPPET_CHARS,
        }
    }

    /// Limit the indexed prefix of each definition's text
    #[inline]
    #[must_use]
    pub fn with_max_snippet_chars(mut self, chars: usize) -> Self {
        self.max_snippet_chars = chars;
        self
    }

    /// Number of indexed definitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    /// Whether the index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Synchronous upsert
    pub fn upsert(&self, definitions: &[CodeDefinition]) {
        let docs: Vec<IndexedDoc> = definitions
            .iter()
            .map(|def| IndexedDoc {
                term_freq: term_frequencies(&document_text(def, self.max_snippet_chars)),
                definition: def.clone(),
            })
            .collect();

        let mut state = self.state.write();
        for doc in docs {
            state.remove(&doc.definition.id);
            state.insert(doc);
        }
    }

    /// Synchronous ranked search
    #[must_use]
    pub fn query(&self, query: &str, k: usize) -> Vec<CodeDefinition> {
        if k == 0 {
            return Vec::new();
        }
        let query_tf = term_frequencies(query);
        if query_tf.is_empty() {
            return Vec::new();
        }

        let state = self.state.read();
        let query_vec: HashMap<&str, f64> = query_tf
            .iter()
            .map(|(term, tf)| (term.as_str(), tf * state.idf(term)))
            .collect();
        let query_norm = norm(query_vec.values().copied());

        let mut scored: Vec<(f64, &IndexedDoc)> = state
            .docs
            .values()
            .filter_map(|doc| {
                let mut dot = 0.0;
                let mut weights = Vec::with_capacity(doc.term_freq.len());
                for (term, tf) in &doc.term_freq {
                    let weight = tf * state.idf(term);
                    weights.push(weight);
                    if let Some(q) = query_vec.get(term.as_str()) {
                        dot += q * weight;
                    }
                }
                if dot <= 0.0 {
                    return None;
                }
                Some((dot / (query_norm * norm(weights.into_iter())), doc))
            })
            .collect();

        scored.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| da.definition.id.cmp(&db.definition.id))
        });
        scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.definition.clone())
            .collect()
    }
}

#[async_trait]
impl RetrievalIndex for LexicalIndex {
    async fn index(&self, definitions: &[CodeDefinition]) -> Result<(), RetrievalError> {
        self.upsert(definitions);
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<CodeDefinition>, RetrievalError> {
        Ok(self.query(query, k))
    }
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt().max(f64::EPSILON)
}

fn document_text(def: &CodeDefinition, max_chars: usize) -> String {
    let snippet: String = def.text.chars().take(max_chars).collect();
    // name twice: identifiers are the strongest signal
    format!("{} {} {} {} {}", def.name, def.name, def.kind, def.file, snippet)
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "can", "should", "will", "into",
    "new", "return", "const", "let", "var", "def", "self", "function",
];

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf = HashMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

/// Split text into lowercase identifier-aware tokens
///
/// `sendMessage`, `send_message` and `SEND-MESSAGE` all yield
/// `["send", "message"]`.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        for part in split_camel(word) {
            let lower = part.to_lowercase();
            if lower.chars().count() >= 2 && !STOP_WORDS.contains(&lower.as_str()) {
                tokens.push(lower);
            }
        }
    }
    tokens
}

fn split_camel(word: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    for i in 1..chars.len() {
        let (idx, c) = chars[i];
        let prev = chars[i - 1].1;
        let next_lower = chars.get(i + 1).is_some_and(|(_, n)| n.is_lowercase());
        let boundary = (prev.is_lowercase() && c.is_uppercase())
            || (prev.is_uppercase() && c.is_uppercase() && next_lower)
            || (prev.is_alphabetic() && c.is_ascii_digit())
            || (prev.is_ascii_digit() && c.is_alphabetic());
        if boundary {
            parts.push(&word[start..idx]);
            start = idx;
        }
    }
    if start < word.len() {
        parts.push(&word[start..]);
    }
    parts
}
