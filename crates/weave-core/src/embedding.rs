//! For each message, extract its text (skip tool messages and empty
//! text). If none of the messages have extractable text, there is nothing
//! to embed. Otherwise embed exactly the non-empty texts, scatter the
//! vectors back into a `null`-initialized array the same length as the
//! input so positional alignment with the message array is preserved,
//! and validate the returned dimension against a closed set of accepted
//! sizes.
//!
//! A failed provider call propagates rather than falling back to a zero
//! vector: embeddings are generated before persistence, and a message
//! that's supposed to be searchable should never be persisted without
//! its vector. See DESIGN.md.

use std::sync::Arc;

use crate::error::{Error, ProviderError, Result};
use crate::message::{extract_text, CoreMessage};
use crate::provider::EmbeddingModel;
use crate::storage::models::Embedding;

/// Dimensions this crate knows how to store and index. A provider
/// returning any other dimension is an `InvalidArgument`, not a silent
/// truncation.
pub const ACCEPTED_DIMENSIONS: &[usize] = &[256, 384, 512, 768, 1024, 1536, 3072];

/// Generate aligned embeddings for a batch of messages. Returns `None`
/// if no message has extractable text (e.g. an all-tool-message batch)
/// rather than embedding the empty string.
pub async fn generate_embeddings(
    messages: &[CoreMessage],
    model: Option<&Arc<dyn EmbeddingModel>>,
) -> Result<Option<Embedding>> {
    let Some(model) = model else {
        return Ok(None);
    };

    let extracted: Vec<(usize, String)> = messages
        .iter()
        .enumerate()
        .filter_map(|(i, m)| extract_text(m).filter(|t| !t.is_empty()).map(|t| (i, t)))
        .collect();

    if extracted.is_empty() {
        return Ok(None);
    }

    let texts: Vec<String> = extracted.iter().map(|(_, t)| t.clone()).collect();
    let vectors = model
        .embed_batch(&texts)
        .await
        .map_err(Error::Provider)?;

    if vectors.len() != texts.len() {
        return Err(Error::Provider(ProviderError::UnexpectedResponse(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        ))));
    }

    let dimension = vectors[0].len();
    if !ACCEPTED_DIMENSIONS.contains(&dimension) {
        return Err(Error::InvalidArgument(format!(
            "unknown vector dimension: {dimension}"
        )));
    }
    for v in &vectors {
        if v.len() != dimension {
            return Err(Error::Provider(ProviderError::UnexpectedResponse(
                "embedding dimensions are not uniform within a batch".into(),
            )));
        }
    }

    let mut out: Vec<Option<Vec<f32>>> = vec![None; messages.len()];
    for ((idx, _), vector) in extracted.into_iter().zip(vectors) {
        out[idx] = Some(vector);
    }

    Ok(Some(Embedding {
        vectors: out,
        dimension,
        model: model.model_id().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedDimModel {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingModel for FixedDimModel {
        fn model_id(&self) -> &str {
            "test-embed"
        }

        async fn embed_batch(
            &self,
            values: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(values.iter().map(|_| vec![0.1; self.dim]).collect())
        }
    }

    #[tokio::test]
    async fn alignment_skips_tool_and_empty_messages() {
        let model: Arc<dyn EmbeddingModel> = Arc::new(FixedDimModel { dim: 768 });
        let messages = vec![
            CoreMessage::user("hello"),
            CoreMessage::Tool {
                content: vec![crate::message::ToolResultPart {
                    tool_call_id: "c1".into(),
                    tool_name: "t".into(),
                    result: serde_json::Value::Null,
                }],
            },
            CoreMessage::assistant_text(""),
            CoreMessage::assistant_text("world"),
        ];

        let embedding = generate_embeddings(&messages, Some(&model))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(embedding.vectors.len(), messages.len());
        assert!(embedding.vectors[0].is_some());
        assert!(embedding.vectors[1].is_none());
        assert!(embedding.vectors[2].is_none());
        assert!(embedding.vectors[3].is_some());
        assert_eq!(embedding.dimension, 768);
    }

    #[tokio::test]
    async fn no_text_returns_none() {
        let model: Arc<dyn EmbeddingModel> = Arc::new(FixedDimModel { dim: 768 });
        let messages = vec![CoreMessage::Tool { content: vec![] }];
        let embedding = generate_embeddings(&messages, Some(&model)).await.unwrap();
        assert!(embedding.is_none());
    }

    #[tokio::test]
    async fn unknown_dimension_is_invalid_argument() {
        let model: Arc<dyn EmbeddingModel> = Arc::new(FixedDimModel { dim: 7 });
        let messages = vec![CoreMessage::user("hi")];
        let err = generate_embeddings(&messages, Some(&model)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn no_model_returns_none() {
        let messages = vec![CoreMessage::user("hi")];
        let embedding = generate_embeddings(&messages, None).await.unwrap();
        assert!(embedding.is_none());
    }
}
