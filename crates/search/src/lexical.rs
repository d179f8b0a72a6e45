use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

pub const BM25_K1: f32 = 1.2;
pub const BM25_B: f32 = 0.75;

/// Lowercased unicode words of `text`.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Distinct query terms, sorted.
#[must_use]
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms = tokenize(query);
    terms.sort();
    terms.dedup();
    terms
}

/// BM25 keyword scoring normalized into `[0, 1]`
///
/// Scores are divided by the query's upper bound, the sum of `idf * (k1 + 1)` over
/// terms that occur in the corpus, so a fixed `min_score` means the same thing for
/// every query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalScorer {
    pub k1: f32,
    pub b: f32,
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self {
            k1: BM25_K1,
            b: BM25_B,
        }
    }
}

impl LexicalScorer {
    /// Score `(id, text)` documents against `query`. Only matching documents are returned.
    #[allow(clippy::cast_precision_loss)]
    pub fn score<'a, I>(&self, query: &str, docs: I) -> HashMap<&'a str, f32>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let terms = query_terms(query);
        if terms.is_empty() {
            return HashMap::new();
        }

        let mut stats: Vec<(&'a str, usize, HashMap<usize, usize>)> = Vec::new();
        let mut doc_freq = vec![0usize; terms.len()];
        let mut total_len = 0usize;

        for (id, text) in docs {
            let tokens = tokenize(text);
            total_len += tokens.len();
            let mut freqs: HashMap<usize, usize> = HashMap::new();
            for token in &tokens {
                if let Ok(term) = terms.binary_search(token) {
                    *freqs.entry(term).or_insert(0) += 1;
                }
            }
            for term in freqs.keys() {
                doc_freq[*term] += 1;
            }
            stats.push((id, tokens.len(), freqs));
        }

        if stats.is_empty() {
            return HashMap::new();
        }
        let n = stats.len() as f32;
        let avg_len = (total_len as f32 / n).max(1.0);
        let idf: Vec<f32> = doc_freq
            .iter()
            .map(|&df| {
                let df = df as f32;
                (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
            })
            .collect();
        let upper: f32 = doc_freq
            .iter()
            .zip(&idf)
            .filter(|(df, _)| **df > 0)
            .map(|(_, idf)| idf * (self.k1 + 1.0))
            .sum();
        if upper <= f32::EPSILON {
            return HashMap::new();
        }

        let mut out = HashMap::new();
        for (id, len, freqs) in stats {
            if freqs.is_empty() {
                continue;
            }
            let norm = self.k1 * (1.0 - self.b + self.b * len as f32 / avg_len);
            let raw: f32 = freqs
                .iter()
                .map(|(&term, &tf)| {
                    let tf = tf as f32;
                    idf[term] * tf * (self.k1 + 1.0) / (tf + norm)
                })
                .sum();
            out.insert(id, (raw / upper).clamp(0.0, 1.0));
        }
        out
    }
}
