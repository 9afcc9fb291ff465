//! # Sentence embeddings
//!
//! Turns captions and search queries into dense vectors. The production
//! implementation runs a BERT sentence encoder (all-MiniLM-L6-v2 by default)
//! with Candle, fetching the weights from the Hugging Face Hub on first use.
//!
//! Everything here is blocking and CPU bound. Async callers should go through
//! `tokio::task::spawn_blocking`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::{Tokenizer, TruncationParams};

use crate::error::{GatewayError, Result};

/// Anything that maps text into a fixed-size embedding space.
pub trait Embedder: Send + Sync {
    /// Length of every vector returned by [`Embedder::encode`].
    fn dimension(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

fn candle_err(e: candle_core::Error) -> GatewayError {
    GatewayError::Embedding(e.to_string())
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub
    pub fn load(model_id: &str, revision: &str) -> Result<Self> {
        let device = Device::Cpu;

        tracing::info!("Loading embedding model {model_id}@{revision}");

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new().map_err(|e| GatewayError::Embedding(e.to_string()))?;
        let api_repo = api.repo(repo);

        let fetch = |name: &str| {
            api_repo
                .get(name)
                .map_err(|e| GatewayError::Embedding(format!("failed to fetch {name}: {e}")))
        };
        let config_filename = fetch("config.json")?;
        let tokenizer_filename = fetch("tokenizer.json")?;
        let weights_filename = fetch("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)
            .map_err(|e| GatewayError::Embedding(format!("invalid model config: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| GatewayError::Embedding(format!("Failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: 512,
                ..Default::default()
            }))
            .map_err(|e| GatewayError::Embedding(format!("Failed to configure tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(candle_err)?
        };
        let model = BertModel::load(vb, &config).map_err(candle_err)?;

        tracing::info!("Embedding model loaded!");

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: config.hidden_size,
        })
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)
            .and_then(|m| m.to_dtype(DType::F32))
            .and_then(|m| m.unsqueeze(0))
            .and_then(|m| m.unsqueeze(2))
            .map_err(candle_err)?;

        let sum = embeddings
            .broadcast_mul(&mask)
            .and_then(|masked| masked.sum(1))
            .map_err(candle_err)?;
        let count = mask
            .sum(1)
            .and_then(|c| c.clamp(1f32, f32::INFINITY))
            .map_err(candle_err)?;

        sum.broadcast_div(&count)
            .and_then(|mean| mean.squeeze(0))
            .map_err(candle_err)
    }

    /// L2 normalize the embedding vector
    fn normalize(&self, tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor
            .sqr()
            .and_then(|t| t.sum_all())
            .and_then(|t| t.sqrt())
            .map_err(candle_err)?;
        tensor.broadcast_div(&norm).map_err(candle_err)
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| GatewayError::Embedding(format!("Tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_err)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(candle_err)?;

        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&embedding)?;

        embedding.to_vec1::<f32>().map_err(candle_err)
    }
}

/// Scale `v` to unit length. Zero vectors are returned unchanged.
pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}


#[cfg(test)]
mod tests {
    use super::testing::HashEmbedder;
    use super::*;

    #[test]
    fn normalized_vectors_have_unit_length() {
        let v = normalized(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalized(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn squared_l2_of_opposite_unit_vectors_is_four() {
        assert_eq!(squared_l2(&[1.0, 0.0], &[-1.0, 0.0]), 4.0);
        assert_eq!(squared_l2(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
    }

    #[test]
    fn hash_embedder_places_shared_words_closer() {
        let e = HashEmbedder::new(64);
        let cat = e.encode("a cat on a sofa").unwrap();
        let cat2 = e.encode("cat sleeping on sofa").unwrap();
        let car = e.encode("red sports car").unwrap();
        assert!(squared_l2(&cat, &cat2) < squared_l2(&cat, &car));
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2 from the Hugging Face Hub"]
    fn minilm_produces_normalized_384d_vectors() {
        let model =
            SentenceEmbeddingsModel::load("sentence-transformers/all-MiniLM-L6-v2", "main")
                .unwrap();
        let v = model.encode("Rust is cool.").unwrap();
        assert_eq!(v.len(), 384);
        assert_eq!(model.dimension(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
