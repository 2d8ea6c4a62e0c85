use anyhow::{Result, bail};
use ndarray::{ArrayView1, Axis};
use serde::Serialize;

use crate::corpus::Corpus;
use crate::embedder::Embedder;

/// A verse paired with its cosine similarity against the query.
/// This is the whole surface the presentation layer consumes.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredVerse {
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
    pub score: f32,
}

/// Embeds `query` with the shared model handle and ranks the corpus
/// against it.
pub fn find_verses(
    embedder: &Embedder,
    corpus: &Corpus,
    query: &str,
    top_k: usize,
) -> Result<Vec<ScoredVerse>> {
    let query_vec = embedder.embed(query)?;
    if query_vec.dot(&query_vec) == 0.0 {
        bail!("query produced a degenerate (zero-norm) embedding; try rephrasing it");
    }
    Ok(rank(query_vec.view(), corpus, top_k))
}

/// Scores every corpus row against `query_vec` by cosine similarity and
/// returns the best `min(top_k, N)`, descending.
///
/// Ties keep corpus order (the sort is stable). A zero-norm row scores
/// `NEG_INFINITY` so it lands at the tail deterministically instead of
/// injecting NaN into the ordering.
pub fn rank(query_vec: ArrayView1<f32>, corpus: &Corpus, top_k: usize) -> Vec<ScoredVerse> {
    let vectors = corpus.vectors();
    let query_norm = query_vec.dot(&query_vec).sqrt();

    let dots = vectors.dot(&query_vec);
    let scores: Vec<f32> = vectors
        .axis_iter(Axis(0))
        .zip(dots.iter())
        .map(|(row, &dot)| {
            let norm = row.dot(&row).sqrt();
            if norm == 0.0 || query_norm == 0.0 {
                f32::NEG_INFINITY
            } else {
                dot / (norm * query_norm)
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(top_k.min(corpus.len()));

    order
        .into_iter()
        .map(|i| {
            let record = &corpus.records()[i];
            ScoredVerse {
                reference: record.reference.clone(),
                text: record.text.clone(),
                score: scores[i],
            }
        })
        .collect()
}
