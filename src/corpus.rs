use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const TEXT_FILE: &str = "verses.json";
pub const VECTOR_FILE: &str = "vectors.bin";

/// One retrievable unit of text: a verse reference and its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("corpus artifact missing at {} (run `genesis build` first)", .path.display())]
    Missing { path: PathBuf },
    #[error("corpus mismatch: {records} records but {rows} vector rows")]
    Mismatch { records: usize, rows: usize },
    #[error(
        "corpus vectors are {actual}-dimensional but the embedding model produces {expected}; rebuild with `genesis build`"
    )]
    Dim { expected: usize, actual: usize },
    #[error("corpus artifact I/O failed")]
    Io(#[from] std::io::Error),
    #[error("failed to parse text artifact")]
    Json(#[from] serde_json::Error),
    #[error("failed to decode vector artifact")]
    Codec(#[from] bincode::Error),
}

/// The verse records and their embedding matrix, index-aligned.
///
/// The two halves are never handed out separately; `new` is the single
/// construction path and rejects any length disagreement, so every live
/// `Corpus` satisfies `records.len() == vectors.nrows()`.
#[derive(Debug, Clone)]
pub struct Corpus {
    records: Vec<Record>,
    vectors: Array2<f32>,
}

impl Corpus {
    pub fn new(records: Vec<Record>, vectors: Array2<f32>) -> Result<Self, CorpusError> {
        if records.len() != vectors.nrows() {
            return Err(CorpusError::Mismatch {
                records: records.len(),
                rows: vectors.nrows(),
            });
        }
        Ok(Corpus { records, vectors })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn vectors(&self) -> &Array2<f32> {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The matrix must be exactly as wide as the embedding model's output.
    pub fn check_dim(&self, expected: usize) -> Result<(), CorpusError> {
        let actual = self.vectors.ncols();
        if actual != expected {
            return Err(CorpusError::Dim { expected, actual });
        }
        Ok(())
    }
}

/// Loads both corpus artifacts from `dir`. Either file being absent is a
/// `Missing` error, never an empty corpus.
pub fn load(dir: &Path) -> Result<Corpus, CorpusError> {
    let text_path = dir.join(TEXT_FILE);
    let vector_path = dir.join(VECTOR_FILE);
    for path in [&text_path, &vector_path] {
        if !path.exists() {
            return Err(CorpusError::Missing { path: path.clone() });
        }
    }

    tracing::info!("loading corpus from {}", dir.display());
    let records: Vec<Record> = serde_json::from_str(&fs::read_to_string(&text_path)?)?;
    let vectors: Array2<f32> = bincode::deserialize(&fs::read(&vector_path)?)?;
    let corpus = Corpus::new(records, vectors)?;
    tracing::info!(verses = corpus.len(), "corpus ready");
    Ok(corpus)
}

/// Writes both corpus artifacts to `dir`.
pub fn save(dir: &Path, corpus: &Corpus) -> Result<(), CorpusError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(TEXT_FILE), serde_json::to_string(&corpus.records)?)?;
    fs::write(dir.join(VECTOR_FILE), bincode::serialize(&corpus.vectors)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Corpus {
        let records = vec![
            Record {
                reference: "Genesis 1:1".into(),
                text: "In the beginning God created the heaven and the earth.".into(),
            },
            Record {
                reference: "John 11:35".into(),
                text: "Jesus wept.".into(),
            },
        ];
        let vectors =
            Array2::from_shape_vec((2, 3), vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        Corpus::new(records, vectors).unwrap()
    }

    #[test]
    fn round_trip_preserves_records_and_vectors() {
        let dir = tempdir().unwrap();
        let corpus = sample();
        save(dir.path(), &corpus).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.records(), corpus.records());
        assert_eq!(loaded.vectors(), corpus.vectors());
    }

    #[test]
    fn missing_text_artifact_is_an_error_not_an_empty_corpus() {
        let dir = tempdir().unwrap();
        save(dir.path(), &sample()).unwrap();
        fs::remove_file(dir.path().join(TEXT_FILE)).unwrap();
        assert!(matches!(load(dir.path()), Err(CorpusError::Missing { .. })));
    }

    #[test]
    fn missing_vector_artifact_is_an_error_not_an_empty_corpus() {
        let dir = tempdir().unwrap();
        save(dir.path(), &sample()).unwrap();
        fs::remove_file(dir.path().join(VECTOR_FILE)).unwrap();
        assert!(matches!(load(dir.path()), Err(CorpusError::Missing { .. })));
    }

    #[test]
    fn record_count_must_match_row_count() {
        let records = vec![Record {
            reference: "Genesis 1:1".into(),
            text: "In the beginning".into(),
        }];
        let vectors = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            Corpus::new(records, vectors),
            Err(CorpusError::Mismatch { records: 1, rows: 2 })
        ));
    }

    #[test]
    fn dimension_check_rejects_a_different_model_width() {
        let corpus = sample();
        assert!(corpus.check_dim(3).is_ok());
        assert!(matches!(
            corpus.check_dim(384),
            Err(CorpusError::Dim { expected: 384, actual: 3 })
        ));
    }

    #[test]
    fn records_serialize_with_ref_and_text_field_names() {
        let json = serde_json::to_string(&Record {
            reference: "John 3:16".into(),
            text: "For God so loved the world".into(),
        })
        .unwrap();
        assert!(json.contains("\"ref\":\"John 3:16\""));
        assert!(json.contains("\"text\":\"For God so loved the world\""));
    }
}
