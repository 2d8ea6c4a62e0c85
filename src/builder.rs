use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use ndarray::Array2;
use serde::Deserialize;

use crate::corpus::{self, Corpus, Record, TEXT_FILE};
use crate::embedder::Embedder;

const SOURCE_URL: &str =
    "https://raw.githubusercontent.com/thiagobodruk/bible/master/json/en_kjv.json";
const EMBED_BATCH: usize = 64;

#[derive(Deserialize)]
struct Book {
    name: String,
    chapters: Vec<Vec<String>>,
}

/// Builds both corpus artifacts under `data_dir`: acquires the source text
/// (reusing an existing text artifact), embeds every verse, and persists
/// the records alongside their vector matrix.
pub async fn build(data_dir: &Path, embedder: &Embedder) -> Result<()> {
    let text_path = data_dir.join(TEXT_FILE);
    let records: Vec<Record> = if text_path.exists() {
        tracing::info!("found existing text artifact, skipping download");
        serde_json::from_str(&fs::read_to_string(&text_path)?)?
    } else {
        tracing::info!("downloading source text from {SOURCE_URL}");
        let raw = reqwest::get(SOURCE_URL)
            .await
            .and_then(|r| r.error_for_status())
            .context("source text download failed")?
            .text()
            .await?;
        // some mirrors serve the file with a UTF-8 BOM
        let books: Vec<Book> = serde_json::from_str(raw.trim_start_matches('\u{feff}'))
            .context("failed to parse source text")?;
        let records = flatten(books);

        fs::create_dir_all(data_dir)?;
        fs::write(&text_path, serde_json::to_string(&records)?)?;
        tracing::info!(verses = records.len(), "saved text artifact");
        records
    };

    let vectors = embed_all(embedder, &records)?;
    let corpus = Corpus::new(records, vectors)?;
    corpus::save(data_dir, &corpus)?;
    tracing::info!(verses = corpus.len(), "corpus build complete");
    Ok(())
}

/// One record per verse, `"{book} {chapter}:{verse}"` refs, source order.
fn flatten(books: Vec<Book>) -> Vec<Record> {
    let mut records = Vec::new();
    for book in books {
        for (c, chapter) in book.chapters.into_iter().enumerate() {
            for (v, text) in chapter.into_iter().enumerate() {
                records.push(Record {
                    reference: format!("{} {}:{}", book.name, c + 1, v + 1),
                    text,
                });
            }
        }
    }
    records
}

fn embed_all(embedder: &Embedder, records: &[Record]) -> Result<Array2<f32>> {
    let mut flat = Vec::with_capacity(records.len() * embedder.dim());
    let mut done = 0;
    for batch in records.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
        for embedding in embedder.encode(&texts)? {
            flat.extend_from_slice(&embedding);
        }
        done += batch.len();
        tracing::info!(embedded = done, total = records.len(), "embedding corpus");
    }
    Ok(Array2::from_shape_vec((records.len(), embedder.dim()), flat)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_produces_ordered_chapter_verse_refs() {
        let books = vec![Book {
            name: "Genesis".into(),
            chapters: vec![
                vec![
                    "In the beginning God created the heaven and the earth.".into(),
                    "And the earth was without form, and void.".into(),
                ],
                vec!["Thus the heavens and the earth were finished.".into()],
            ],
        }];

        let records = flatten(books);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].reference, "Genesis 1:1");
        assert_eq!(records[1].reference, "Genesis 1:2");
        assert_eq!(records[2].reference, "Genesis 2:1");
        assert!(records[0].text.starts_with("In the beginning"));
    }

    #[test]
    fn flatten_keeps_book_order() {
        let books = vec![
            Book {
                name: "Genesis".into(),
                chapters: vec![vec!["first".into()]],
            },
            Book {
                name: "Exodus".into(),
                chapters: vec![vec!["second".into()]],
            },
        ];

        let records = flatten(books);
        assert_eq!(records[0].reference, "Genesis 1:1");
        assert_eq!(records[1].reference, "Exodus 1:1");
    }

    #[test]
    fn source_bom_is_tolerated() {
        let raw = "\u{feff}[{\"name\":\"Genesis\",\"chapters\":[[\"In the beginning\"]]}]";
        let books: Vec<Book> =
            serde_json::from_str(raw.trim_start_matches('\u{feff}')).unwrap();
        assert_eq!(flatten(books)[0].reference, "Genesis 1:1");
    }

    #[test]
    fn extra_source_fields_are_ignored() {
        let raw = r#"[{"abbrev":"gn","name":"Genesis","chapters":[["In the beginning"]]}]"#;
        let books: Vec<Book> = serde_json::from_str(raw).unwrap();
        assert_eq!(books[0].name, "Genesis");
    }
}
