use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// In-memory BM25 index over chunk text. One instance per tenant; the
/// retrieval store keeps them isolated.
pub struct Bm25Index {
    doc_freq: HashMap<String, usize>,
    doc_count: usize,
    avg_doc_len: f32,
    doc_lengths: HashMap<Uuid, usize>,
    term_freqs: HashMap<Uuid, HashMap<String, usize>>,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            doc_freq: HashMap::new(),
            doc_count: 0,
            avg_doc_len: 0.0,
            doc_lengths: HashMap::new(),
            term_freqs: HashMap::new(),
            k1: 1.2,
            b: 0.75,
        }
    }

    pub fn add_document(&mut self, doc_id: Uuid, content: &str) {
        let terms = tokenize(content);
        let doc_len = terms.len();

        self.doc_lengths.insert(doc_id, doc_len);

        let mut term_freq: HashMap<String, usize> = HashMap::new();
        let mut seen_terms: HashSet<&str> = HashSet::new();

        for term in &terms {
            *term_freq.entry(term.clone()).or_insert(0) += 1;
            if seen_terms.insert(term) {
                *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        self.term_freqs.insert(doc_id, term_freq);
        self.doc_count += 1;

        let total_len: usize = self.doc_lengths.values().sum();
        self.avg_doc_len = total_len as f32 / self.doc_count as f32;
    }

    pub fn remove_document(&mut self, doc_id: &Uuid) {
        if let Some(term_freq) = self.term_freqs.remove(doc_id) {
            for term in term_freq.keys() {
                if let Some(freq) = self.doc_freq.get_mut(term) {
                    *freq = freq.saturating_sub(1);
                    if *freq == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
        }

        self.doc_lengths.remove(doc_id);
        self.doc_count = self.doc_count.saturating_sub(1);

        if self.doc_count > 0 {
            let total_len: usize = self.doc_lengths.values().sum();
            self.avg_doc_len = total_len as f32 / self.doc_count as f32;
        } else {
            self.avg_doc_len = 0.0;
        }
    }

    pub fn search(&self, query: &str, max_results: usize) -> Vec<(Uuid, f32)> {
        let query_terms = tokenize(query);
        let mut scores: HashMap<Uuid, f32> = HashMap::new();

        for term in &query_terms {
            let df = *self.doc_freq.get(term).unwrap_or(&0);
            if df == 0 {
                continue;
            }

            let idf = ((self.doc_count as f32 - df as f32 + 0.5) / (df as f32 + 0.5) + 1.0).ln();

            for (doc_id, term_freqs) in &self.term_freqs {
                if let Some(&tf) = term_freqs.get(term) {
                    let doc_len = *self.doc_lengths.get(doc_id).unwrap_or(&1) as f32;
                    let tf_normalized = (tf as f32 * (self.k1 + 1.0))
                        / (tf as f32
                            + self.k1 * (1.0 - self.b + self.b * (doc_len / self.avg_doc_len)));

                    *scores.entry(*doc_id).or_insert(0.0) += idf * tf_normalized;
                }
            }
        }

        let mut results: Vec<(Uuid, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(max_results);
        results
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(|s| s.to_string())
        .collect()
}
