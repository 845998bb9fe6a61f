// SPDX-License-Identifier: MIT OR Apache-2.0
//! BM25 ranking over file contents and append previews.
//!
//! The index is built per query over the candidate scope (the scope size is
//! bounded upstream), so there is nothing to keep in sync with mutations.
//! Parameters: `k1 = 1.2` (term-frequency saturation), `b = 0.75` (length
//! normalisation), `idf = ln(1 + (N − df + 0.5)/(df + 0.5))`.

use mb_core::AppendType;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Term-frequency saturation parameter.
pub const BM25_K1: f64 = 1.2;

/// Document-length normalisation parameter.
pub const BM25_B: f64 = 0.75;

/// Where a searchable document came from.
#[derive(Debug, Clone, PartialEq)]
pub enum DocSource {
    /// The file's full content.
    FileContent,
    /// One append entry's content preview.
    Append {
        /// Public append id.
        public_id: String,
        /// Entry author.
        author: String,
        /// Entry type.
        kind: AppendType,
        /// Entry status tag.
        status: Option<String>,
    },
}

/// One searchable document.
#[derive(Debug, Clone)]
pub struct SearchDoc {
    /// Owning file.
    pub file_id: Uuid,
    /// File path (for scope display).
    pub path: String,
    /// Origin of the text.
    pub source: DocSource,
    /// The searchable text.
    pub text: String,
}

/// A ranked hit: index into the candidate slice plus its score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Index into the input `docs` slice.
    pub doc: usize,
    /// BM25 score, strictly positive.
    pub score: f64,
}

/// Lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn mean_doc_len(lengths: &[usize]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
}

/// Rank `docs` against `query`, returning at most `limit` hits ordered by
/// descending score.  Documents matching no query term are omitted.
pub fn rank_bm25(docs: &[SearchDoc], query: &str, limit: usize) -> Vec<SearchHit> {
    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    if query_terms.is_empty() || docs.is_empty() {
        return Vec::new();
    }

    let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(&d.text)).collect();
    let lengths: Vec<usize> = tokenized.iter().map(Vec::len).collect();
    let avgdl = mean_doc_len(&lengths);
    let n_docs = docs.len() as f64;

    // Document frequency per query term.
    let mut dfs: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in &query_terms {
            if unique.contains(term.as_str()) {
                *dfs.entry(term.as_str()).or_insert(0) += 1;
            }
        }
    }

    let idfs: HashMap<&str, f64> = query_terms
        .iter()
        .filter_map(|term| {
            let df = *dfs.get(term.as_str())? as f64;
            let idf = (1.0 + (n_docs - df + 0.5) / (df + 0.5)).ln();
            Some((term.as_str(), idf))
        })
        .collect();

    let mut hits: Vec<SearchHit> = Vec::new();
    for (doc_idx, tokens) in tokenized.iter().enumerate() {
        if avgdl == 0.0 {
            break;
        }
        let mut freqs: HashMap<&str, f64> = HashMap::new();
        for token in tokens {
            if query_terms.contains(token) {
                *freqs.entry(token.as_str()).or_insert(0.0) += 1.0;
            }
        }
        if freqs.is_empty() {
            continue;
        }
        let doc_len = tokens.len() as f64;
        let mut score = 0.0;
        for (term, freq) in freqs {
            let idf = *idfs.get(term).unwrap_or(&0.0);
            let tf_part = (freq * (BM25_K1 + 1.0))
                / (freq + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / avgdl)));
            score += idf * tf_part;
        }
        if score > 0.0 {
            hits.push(SearchHit {
                doc: doc_idx,
                score,
            });
        }
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, text: &str) -> SearchDoc {
        SearchDoc {
            file_id: Uuid::new_v4(),
            path: path.into(),
            source: DocSource::FileContent,
            text: text.into(),
        }
    }

    #[test]
    fn tokenizer_lowercases_and_splits() {
        assert_eq!(tokenize("Hello, World-42!"), vec!["hello", "world", "42"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn matching_doc_outranks_nonmatching() {
        let docs = vec![
            doc("/a.md", "rust is a systems language"),
            doc("/b.md", "cooking with garlic and onions"),
        ];
        let hits = rank_bm25(&docs, "rust systems", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc, 0);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn rarer_term_scores_higher() {
        let docs = vec![
            doc("/a.md", "alpha common common common"),
            doc("/b.md", "common words only here"),
            doc("/c.md", "more common words again"),
        ];
        let hits = rank_bm25(&docs, "alpha", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc, 0);
    }

    #[test]
    fn repeated_terms_saturate() {
        let docs = vec![
            doc("/a.md", "term term term term term term"),
            doc("/b.md", "term appears once in this slightly longer text"),
        ];
        let hits = rank_bm25(&docs, "term", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc, 0);
        // Saturation keeps the gap bounded.
        assert!(hits[0].score < hits[1].score * 4.0);
    }

    #[test]
    fn limit_truncates() {
        let docs: Vec<SearchDoc> = (0..20)
            .map(|i| doc(&format!("/f{i}.md"), "needle in text"))
            .collect();
        let hits = rank_bm25(&docs, "needle", 5);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn empty_query_and_docs() {
        assert!(rank_bm25(&[], "x", 10).is_empty());
        assert!(rank_bm25(&[doc("/a.md", "text")], "", 10).is_empty());
        assert!(rank_bm25(&[doc("/a.md", "text")], "!!!", 10).is_empty());
    }
}
