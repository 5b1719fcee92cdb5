//! In-memory BM25 index over chunk texts.
//!
//! The index is a cache: the vector store holds the durable copy of every
//! chunk, and this structure can always be rebuilt from a full scroll.

use std::collections::{HashMap, HashSet};

use crate::store::ChunkPayload;

#[derive(Default)]
pub struct Bm25Index {
    term_postings: HashMap<String, HashMap<String, usize>>,
    doc_lengths: HashMap<String, usize>,
    doc_terms: HashMap<String, HashMap<String, usize>>,
    payloads: HashMap<String, ChunkPayload>,
    total_docs: usize,
    total_length: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.term_postings.clear();
        self.doc_lengths.clear();
        self.doc_terms.clear();
        self.payloads.clear();
        self.total_docs = 0;
        self.total_length = 0;
    }

    pub fn len(&self) -> usize {
        self.total_docs
    }

    pub fn is_empty(&self) -> bool {
        self.total_docs == 0
    }

    pub fn payload(&self, id: &str) -> Option<&ChunkPayload> {
        self.payloads.get(id)
    }

    /// Index a chunk, replacing any previous entry under the same id.
    /// Chunks whose text yields no tokens are skipped entirely; the vector
    /// branch still retrieves them.
    pub fn add_chunk(&mut self, id: &str, payload: ChunkPayload) {
        if self.doc_terms.contains_key(id) {
            self.remove_chunk(id);
        }

        let tokens = tokenize(&payload.text);
        if tokens.is_empty() {
            return;
        }

        let mut term_counts: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *term_counts.entry(token).or_insert(0) += 1;
        }

        let doc_length: usize = term_counts.values().sum();
        for (term, count) in &term_counts {
            self.term_postings
                .entry(term.clone())
                .or_default()
                .insert(id.to_string(), *count);
        }

        self.doc_lengths.insert(id.to_string(), doc_length);
        self.doc_terms.insert(id.to_string(), term_counts);
        self.payloads.insert(id.to_string(), payload);
        self.total_docs += 1;
        self.total_length += doc_length;
    }

    pub fn remove_chunk(&mut self, id: &str) {
        if let Some(term_counts) = self.doc_terms.remove(id) {
            for (term, _) in term_counts {
                if let Some(postings) = self.term_postings.get_mut(&term) {
                    postings.remove(id);
                    if postings.is_empty() {
                        self.term_postings.remove(&term);
                    }
                }
            }
            if let Some(length) = self.doc_lengths.remove(id) {
                if self.total_length >= length {
                    self.total_length -= length;
                } else {
                    self.total_length = 0;
                }
            }
            if self.total_docs > 0 {
                self.total_docs -= 1;
            }
        } else {
            self.doc_lengths.remove(id);
        }
        self.payloads.remove(id);

        if self.total_docs == 0 {
            self.total_length = 0;
        }
    }

    /// Drop every chunk belonging to a docset. Returns how many were removed.
    pub fn remove_docset(&mut self, docset: &str) -> usize {
        let ids: Vec<String> = self
            .payloads
            .iter()
            .filter(|(_, p)| p.docset == docset)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.remove_chunk(id);
        }
        ids.len()
    }

    /// Okapi BM25 over deduplicated query terms. Ties are broken by
    /// chunk_index then source so repeated queries return a stable order.
    pub fn score(&self, query: &str, limit: usize) -> Vec<(String, f32)> {
        if self.total_docs == 0 {
            return Vec::new();
        }

        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut unique_terms: HashSet<String> = HashSet::new();
        for token in tokens {
            unique_terms.insert(token);
        }

        let avg_doc_len = self.total_length as f32 / self.total_docs as f32;

        let k1 = 1.5_f32;
        let b = 0.75_f32;
        let mut scores: HashMap<String, f32> = HashMap::new();

        for term in unique_terms {
            if let Some(postings) = self.term_postings.get(&term) {
                let df = postings.len() as f32;
                let idf = ((self.total_docs as f32 - df + 0.5) / (df + 0.5))
                    .ln()
                    .max(0.0);

                for (doc_id, term_freq) in postings {
                    let doc_length = *self.doc_lengths.get(doc_id).unwrap_or(&0) as f32;
                    if doc_length == 0.0 {
                        continue;
                    }

                    let tf = *term_freq as f32;
                    let denom = tf + k1 * (1.0 - b + b * (doc_length / avg_doc_len));
                    if denom == 0.0 {
                        continue;
                    }

                    let score = idf * (tf * (k1 + 1.0)) / denom;
                    *scores.entry(doc_id.clone()).or_insert(0.0) += score;
                }
            }
        }

        let mut results: Vec<(String, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.tie_key(&a.0).cmp(&self.tie_key(&b.0)))
        });
        if limit > 0 && results.len() > limit {
            results.truncate(limit);
        }
        results
    }

    fn tie_key(&self, id: &str) -> (usize, &str) {
        match self.payloads.get(id) {
            Some(p) => (p.chunk_index, p.source.as_str()),
            None => (usize::MAX, ""),
        }
    }
}

/// Tokenizes text into lowercase terms. Tokens shorter than 3 characters
/// are dropped to keep stop words and stray numbers out of the postings.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 3)
        .map(|token| token.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(docset: &str, source: &str, chunk_index: usize, text: &str) -> ChunkPayload {
        ChunkPayload {
            text: text.to_string(),
            source: source.to_string(),
            docset: docset.to_string(),
            chunk_index,
            chunk_key: format!("ch_{}", chunk_index),
            heading_path: None,
        }
    }

    #[test]
    fn test_tokenize_lowercases_and_drops_short_tokens() {
        let tokens = tokenize("The QUICK fox, v2 of it!");
        assert_eq!(tokens, vec!["the", "quick", "fox"]);
    }

    #[test]
    fn test_score_ranks_matching_chunk_first() {
        let mut index = Bm25Index::new();
        index.add_chunk("a", payload("docs", "a.md", 0, "rust ownership and borrowing rules"));
        index.add_chunk("b", payload("docs", "b.md", 0, "python packaging tutorial"));

        let results = index.score("ownership borrowing", 10);
        assert_eq!(results[0].0, "a", "chunk about ownership should rank first");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn test_rare_terms_outweigh_common_ones() {
        let mut index = Bm25Index::new();
        index.add_chunk("a", payload("docs", "a.md", 0, "storage engine overview"));
        index.add_chunk("b", payload("docs", "b.md", 0, "storage engine compaction"));
        index.add_chunk("c", payload("docs", "c.md", 0, "storage engine quorum replication"));

        let results = index.score("storage quorum", 10);
        assert_eq!(
            results[0].0, "c",
            "chunk with the rare term should beat chunks with only the common one"
        );
    }

    #[test]
    fn test_add_chunk_replaces_existing_entry() {
        let mut index = Bm25Index::new();
        index.add_chunk("a", payload("docs", "a.md", 0, "original wording here"));
        index.add_chunk("a", payload("docs", "a.md", 0, "replacement text entirely"));

        assert_eq!(index.len(), 1);
        assert!(index.score("original wording", 10).is_empty());
        assert!(!index.score("replacement", 10).is_empty());
    }

    #[test]
    fn test_remove_docset_leaves_other_docsets_alone() {
        let mut index = Bm25Index::new();
        index.add_chunk("a", payload("docs", "a.md", 0, "search fundamentals"));
        index.add_chunk("b", payload("notes", "b.md", 0, "search reminders"));

        let removed = index.remove_docset("docs");
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 1);

        let results = index.score("search", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b");
        assert!(index.payload("a").is_none());
    }

    #[test]
    fn test_equal_scores_break_ties_by_chunk_index_then_source() {
        let mut index = Bm25Index::new();
        index.add_chunk("late", payload("docs", "z.md", 4, "pelican migration patterns"));
        index.add_chunk("early", payload("docs", "a.md", 1, "pelican migration patterns"));
        index.add_chunk("mid", payload("docs", "m.md", 1, "pelican migration patterns"));

        let results = index.score("pelican migration", 10);
        let order: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_token_free_chunk_is_not_indexed() {
        let mut index = Bm25Index::new();
        index.add_chunk("a", payload("docs", "a.md", 0, "a b c d"));

        assert!(index.is_empty());
        assert!(index.payload("a").is_none());
    }

    #[test]
    fn test_empty_index_returns_no_results() {
        let index = Bm25Index::new();
        assert!(index.score("anything", 10).is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut index = Bm25Index::new();
        index.add_chunk("a", payload("docs", "a.md", 0, "some indexed words"));
        index.clear();

        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert!(index.score("indexed", 10).is_empty());
    }

    #[test]
    fn test_limit_truncates_results() {
        let mut index = Bm25Index::new();
        for i in 0..5 {
            index.add_chunk(
                &format!("id{}", i),
                payload("docs", &format!("{}.md", i), i, "shared vocabulary chunk"),
            );
        }

        let results = index.score("vocabulary", 2);
        assert_eq!(results.len(), 2);
    }
}
