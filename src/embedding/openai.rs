//! OpenAI 호환 임베딩 - `/v1/embeddings`
//!
//! ref: https://platform.openai.com/docs/api-reference/embeddings

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{post_json, EmbeddingFunction, LazyClient};
use crate::error::EmbeddingError;

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    client: LazyClient,
}

impl OpenAiEmbedding {
    /// 새 인스턴스 생성 (HTTP 클라이언트는 첫 호출 시 생성)
    ///
    /// # Arguments
    /// * `endpoint` - 임베딩 API URL
    /// * `api_key` - Bearer 토큰
    /// * `model` - 모델 식별자
    /// * `dims` - 벡터 차원
    pub fn new(endpoint: String, api_key: String, model: String, dims: usize) -> Self {
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
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
            EmbeddingError::Backend {
                status: None,
                message: format!("Invalid API key header: {}", e),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// 요청 본문
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

/// 응답 본문
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<UsageMetrics>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct UsageMetrics {
    prompt_tokens: u64,
    total_tokens: u64,
}

/// 응답 파싱 (index 순 정렬, 개수 검증)
fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::response(format!("Failed to parse embedding response: {}", e)))?;

    if response.data.len() != expected {
        return Err(EmbeddingError::response(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    if let Some(usage) = &response.usage {
        tracing::debug!(
            "Embedding usage: model={}, prompt_tokens={}, total_tokens={}",
            response.model.as_deref().unwrap_or("?"),
            usage.prompt_tokens,
            usage.total_tokens
        );
    }

    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingFunction for OpenAiEmbedding {
    fn dimensionality(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let client = self.client.get(|| self.headers()).await?;
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        tracing::debug!("Embedding {} texts with {}", texts.len(), self.model);
        let body = post_json(client, &self.endpoint, &request).await?;
        parse_response(&body, texts.len())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
