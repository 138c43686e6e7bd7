//! Sentence encoder 서비스 임베딩
//!
//! 자체 호스팅 모델 서비스 계약:
//! `{crid, sentences}` -> `{crid, sentence_embeddings}`
//! 실패 시 `{crid, errors}` 를 반환합니다.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{post_json, EmbeddingFunction, LazyClient};
use crate::error::EmbeddingError;

/// API Gateway 키 헤더
const API_KEY_HEADER: &str = "x-api-key";

/// Sentence encoder 서비스 구현체
#[derive(Debug)]
pub struct SentenceEmbedding {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    client: LazyClient,
}

impl SentenceEmbedding {
    pub fn new(endpoint: String, api_key: Option<String>, model: String, dims: usize) -> Self {
        Self {
            endpoint,
            api_key,
            model,
            dims,
            client: LazyClient::default(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, EmbeddingError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(key).map_err(|e| EmbeddingError::Backend {
                status: None,
                message: format!("Invalid API key header: {}", e),
            })?;
            headers.insert(API_KEY_HEADER, value);
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    crid: String,
    sentences: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    #[serde(default)]
    crid: Option<serde_json::Value>,
    sentence_embeddings: Vec<Vec<f32>>,
}

fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let response: EncodeResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::response(format!("Failed to parse encoder response: {}", e)))?;

    if response.sentence_embeddings.len() != expected {
        return Err(EmbeddingError::response(format!(
            "expected {} embeddings, got {} (crid={:?})",
            expected,
            response.sentence_embeddings.len(),
            response.crid
        )));
    }
    Ok(response.sentence_embeddings)
}

#[async_trait]
impl EmbeddingFunction for SentenceEmbedding {
    fn dimensionality(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let client = self.client.get(|| self.headers()).await?;
        let request = EncodeRequest {
            crid: Uuid::new_v4().to_string(),
            sentences: texts,
        };

        tracing::debug!("Encoding {} sentences (crid={})", texts.len(), request.crid);
        let body = post_json(client, &self.endpoint, &request).await?;
        parse_response(&body, texts.len())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{"crid": "abc", "sentence_embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        let vectors = parse_response(body, 2).unwrap();
        assert_eq!(vectors[1], vec![0.3, 0.4]);
    }

    #[test]
    fn test_parse_error_body_is_response_error() {
        let body = r#"{"crid": null, "errors": ["http POST body required"]}"#;
        assert!(matches!(
            parse_response(body, 1),
            Err(EmbeddingError::Response { .. })
        ));
    }

    #[test]
    fn test_api_key_header() {
        let embedder = SentenceEmbedding::new(
            "http://localhost/encode".to_string(),
            Some("gateway-key".to_string()),
            "m".to_string(),
            4,
        );
        let headers = embedder.headers().unwrap();
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "gateway-key");

        let anonymous = SentenceEmbedding::new("http://localhost/encode".to_string(), None, "m".to_string(), 4);
        assert!(anonymous.headers().unwrap().get(API_KEY_HEADER).is_none());
    }
}
