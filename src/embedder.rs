use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ndarray::Array1;
use tokenizers::Tokenizer;
use tract_onnx::prelude::*;

const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Output dimension of the embedding model. The corpus matrix width is
/// validated against this at startup.
pub const EMBEDDING_DIM: usize = 384;
const MAX_LENGTH: usize = 512;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Local sentence-embedding model.
///
/// Constructed once per process (loading the weights is the expensive part)
/// and shared by reference afterwards; inference never mutates it. The same
/// handle embeds corpus passages at build time and queries at serve time, so
/// both sides of the similarity are guaranteed to come from one model.
pub struct Embedder {
    plan: Plan,
    tokenizer: Tokenizer,
}

struct Encoded {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
}

impl Embedder {
    /// Loads the model, downloading its files on first run.
    pub async fn load() -> Result<Self> {
        let (model_path, tokenizer_path) = fetch_model_files().await?;

        tracing::info!("loading embedding model {MODEL_ID}");
        let plan = tract_onnx::onnx()
            .model_for_path(&model_path)?
            .into_optimized()?
            .into_runnable()?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {e}"))?;

        Ok(Embedder { plan, tokenizer })
    }

    pub fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Embeds a batch of texts: one vector per input, same order.
    pub fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encoded = texts
            .iter()
            .map(|t| self.tokenize(t))
            .collect::<Result<Vec<_>>>()?;
        let (padded, seq_len) = pad_batch(encoded);

        let input_ids = input_tensor(&padded, seq_len, |e| e.input_ids.as_slice())?;
        let attention_mask = input_tensor(&padded, seq_len, |e| e.attention_mask.as_slice())?;
        let token_type_ids = input_tensor(&padded, seq_len, |e| e.token_type_ids.as_slice())?;

        let outputs = self.plan.run(tvec!(
            input_ids.into(),
            attention_mask.into(),
            token_type_ids.into()
        ))?;

        // (batch, seq, hidden) token embeddings, mean-pooled over the mask
        let hidden = outputs[0].to_array_view::<f32>()?;
        anyhow::ensure!(
            hidden.ndim() == 3 && hidden.shape()[2] == EMBEDDING_DIM,
            "unexpected model output shape {:?}",
            hidden.shape()
        );

        let mut embeddings = Vec::with_capacity(padded.len());
        for (i, enc) in padded.iter().enumerate() {
            let mut sum = vec![0.0f32; EMBEDDING_DIM];
            let mut count = 0.0f32;
            for (j, &mask) in enc.attention_mask.iter().enumerate() {
                if mask > 0 {
                    for (k, s) in sum.iter_mut().enumerate() {
                        *s += hidden[[i, j, k]];
                    }
                    count += 1.0;
                }
            }
            if count > 0.0 {
                for s in &mut sum {
                    *s /= count;
                }
            }
            embeddings.push(sum);
        }
        Ok(embeddings)
    }

    /// Embeds a single text (the query path).
    pub fn embed(&self, text: &str) -> Result<Array1<f32>> {
        let texts = [text.to_string()];
        let mut batch = self.encode(&texts)?;
        let embedding = batch
            .pop()
            .ok_or_else(|| anyhow!("embedding produced no output"))?;
        Ok(Array1::from_vec(embedding))
    }

    fn tokenize(&self, text: &str) -> Result<Encoded> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("failed to tokenize text: {e}"))?;

        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mut attention_mask: Vec<i64> =
            encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
        let mut token_type_ids: Vec<i64> =
            encoding.get_type_ids().iter().map(|&id| id as i64).collect();

        input_ids.truncate(MAX_LENGTH);
        attention_mask.truncate(MAX_LENGTH);
        token_type_ids.truncate(MAX_LENGTH);

        Ok(Encoded {
            input_ids,
            attention_mask,
            token_type_ids,
        })
    }
}

/// Pads every row of the batch to the longest sequence.
fn pad_batch(inputs: Vec<Encoded>) -> (Vec<Encoded>, usize) {
    let max_len = inputs.iter().map(|e| e.input_ids.len()).max().unwrap_or(0);
    let padded = inputs
        .into_iter()
        .map(|mut e| {
            e.input_ids.resize(max_len, 0);
            e.attention_mask.resize(max_len, 0);
            e.token_type_ids.resize(max_len, 0);
            e
        })
        .collect();
    (padded, max_len)
}

fn input_tensor<F>(inputs: &[Encoded], seq_len: usize, field: F) -> Result<Tensor>
where
    F: Fn(&Encoded) -> &[i64],
{
    let mut data = Vec::with_capacity(inputs.len() * seq_len);
    for e in inputs {
        data.extend_from_slice(field(e));
    }
    Ok(Tensor::from_shape(&[inputs.len(), seq_len], &data)?)
}

/// Model files live in the per-user cache and are downloaded on first run.
async fn fetch_model_files() -> Result<(PathBuf, PathBuf)> {
    let models_dir = dirs::cache_dir()
        .context("could not determine cache directory")?
        .join("genesis")
        .join("models");
    fs::create_dir_all(&models_dir)?;

    let model_path = models_dir.join("model.onnx");
    let tokenizer_path = models_dir.join("tokenizer.json");
    download_if_missing(MODEL_URL, &model_path).await?;
    download_if_missing(TOKENIZER_URL, &tokenizer_path).await?;
    Ok((model_path, tokenizer_path))
}

async fn download_if_missing(url: &str, path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    tracing::info!("downloading {url} to {}", path.display());
    let bytes = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .context("embedding model download failed")?
        .bytes()
        .await?;
    fs::write(path, &bytes)?;
    Ok(())
}
