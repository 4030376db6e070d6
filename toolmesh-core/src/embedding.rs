//! Embedding vector types and similarity math.

use crate::{VectorError, MeshResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A model-tagged vector for one content chunk of a context.
///
/// Logical key: `(context_id, content_index, model_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub context_id: String,
    /// Position of the embedded chunk within the context.
    pub content_index: i32,
    /// The embedded text.
    pub text: String,
    pub vector: Vec<f32>,
    /// Must equal `vector.len()` and the model's declared dimensionality.
    pub vector_dimensions: i32,
    pub model_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(
        context_id: impl Into<String>,
        content_index: i32,
        text: impl Into<String>,
        vector: Vec<f32>,
        model_id: impl Into<String>,
    ) -> Self {
        let vector_dimensions = vector.len() as i32;
        Self {
            context_id: context_id.into(),
            content_index,
            text: text.into(),
            vector,
            vector_dimensions,
            model_id: model_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Validate the internal dimension invariant.
    pub fn validate(&self) -> Result<(), VectorError> {
        if self.vector.len() as i32 != self.vector_dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.vector_dimensions,
                got: self.vector.len() as i32,
            });
        }
        Ok(())
    }
}

/// An embedding model known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub model_id: String,
    pub provider: String,
    pub dimensions: i32,
}

/// Models the server ships support for. A tenant's roster selects from these.
pub fn supported_models() -> Vec<EmbeddingModel> {
    vec![
        EmbeddingModel {
            model_id: "text-embedding-3-small".to_string(),
            provider: "openai".to_string(),
            dimensions: 1536,
        },
        EmbeddingModel {
            model_id: "text-embedding-3-large".to_string(),
            provider: "openai".to_string(),
            dimensions: 3072,
        },
        EmbeddingModel {
            model_id: "text-embedding-ada-002".to_string(),
            provider: "openai".to_string(),
            dimensions: 1536,
        },
        EmbeddingModel {
            model_id: "amazon.titan-embed-text-v2".to_string(),
            provider: "bedrock".to_string(),
            dimensions: 1024,
        },
        EmbeddingModel {
            model_id: "voyage-3".to_string(),
            provider: "voyage".to_string(),
            dimensions: 1024,
        },
    ]
}

/// Look up a supported model by id.
pub fn model_by_id(model_id: &str) -> Option<EmbeddingModel> {
    supported_models().into_iter().find(|m| m.model_id == model_id)
}

/// Cosine similarity of two vectors of equal dimensionality.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> MeshResult<f32> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len() as i32,
            got: b.len() as i32,
        }
        .into());
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a * norm_b))
}
