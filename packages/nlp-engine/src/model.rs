/// Sentence-transformer encoder running locally through candle
///
/// Loads a BERT-family model (reference: all-MiniLM-L6-v2) from a local
/// directory containing `config.json`, `tokenizer.json` and `model.safetensors`,
/// and produces mean-pooled sentence vectors. CPU only, no network access.
use crate::encoder::{l2_normalize, validate_text, TextEncoder};
use crate::error::{EmbeddingError, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

struct ModelState {
    model: BertModel,
    tokenizer: Tokenizer,
}

/// Local transformer encoder
///
/// Inference is serialized through a Mutex; the embedding service caches
/// results so repeated content never reaches the model twice.
pub struct ModelEncoder {
    name: String,
    state: Mutex<ModelState>,
    device: Device,
    dimension: usize,
    max_sequence_length: usize,
}

impl ModelEncoder {
    /// Load model, tokenizer and weights from `model_dir`
    pub fn load(model_dir: &Path, name: &str, max_sequence_length: usize) -> Result<Self> {
        let weights = model_dir.join(WEIGHTS_FILE);
        if !weights.exists() {
            return Err(EmbeddingError::ModelNotFound(
                weights.display().to_string(),
            ));
        }

        let config_raw = std::fs::read_to_string(model_dir.join(CONFIG_FILE))?;
        let config: BertConfig = serde_json::from_str(&config_raw)
            .map_err(|e| EmbeddingError::ModelLoadError(format!("Invalid config.json: {}", e)))?;

        let tokenizer = Tokenizer::from_file(model_dir.join(TOKENIZER_FILE))
            .map_err(|e| EmbeddingError::ModelLoadError(format!("Tokenizer load failed: {}", e)))?;

        let device = Device::Cpu;
        // SAFETY: the safetensors file is memory-mapped read-only and is not
        // modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device) }
            .map_err(|e| EmbeddingError::ModelLoadError(format!("Weights load failed: {}", e)))?;
        let model = BertModel::load(vb, &config)
            .map_err(|e| EmbeddingError::ModelLoadError(format!("Model build failed: {}", e)))?;

        let mut encoder = Self {
            name: name.to_string(),
            state: Mutex::new(ModelState { model, tokenizer }),
            device,
            dimension: 0,
            max_sequence_length,
        };

        // The hidden size is whatever the model produces
        encoder.dimension = encoder.forward("dimension probe")?.len();
        tracing::info!(
            "Loaded sentence model '{}' (dimension {})",
            encoder.name,
            encoder.dimension
        );

        Ok(encoder)
    }

    fn forward(&self, text: &str) -> Result<Vec<f32>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let encoding = state
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::TokenizationError(e.to_string()))?;

        let limit = encoding.get_ids().len().min(self.max_sequence_length);
        let ids = &encoding.get_ids()[..limit];
        let mask = &encoding.get_attention_mask()[..limit];

        let infer = |e: candle_core::Error| EmbeddingError::InferenceError(e.to_string());

        let input_ids = Tensor::new(ids, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(infer)?;
        let token_type_ids = input_ids.zeros_like().map_err(infer)?;
        let attention_mask = Tensor::new(mask, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(infer)?;

        let hidden = state
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(infer)?;

        // Mean pooling over real (non-padding) tokens
        let mask_f = attention_mask
            .to_dtype(DType::F32)
            .and_then(|m| m.unsqueeze(2))
            .map_err(infer)?;
        let summed = hidden
            .broadcast_mul(&mask_f)
            .and_then(|t| t.sum(1))
            .map_err(infer)?;
        let counts = mask_f.sum(1).map_err(infer)?;
        let pooled = summed
            .broadcast_div(&counts)
            .and_then(|t| t.squeeze(0))
            .map_err(infer)?;

        let mut vector: Vec<f32> = pooled.to_vec1().map_err(infer)?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl TextEncoder for ModelEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        validate_text(text)?;
        self.forward(text)
    }
}
