//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 임베딩 함수입니다.
//! 프로세스당 하나의 인스턴스를 만들어 `Arc`로 공유합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let vectors = embedder.encode(&["Hello, world!".to_string()]).await?;
//! ```

mod openai;
mod sentence;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{EmbeddingError, Error, Result};

pub use openai::OpenAiEmbedding;
pub use sentence::SentenceEmbedding;

// ============================================================================
// EmbeddingFunction Trait
// ============================================================================

/// 임베딩 함수 트레이트
///
/// 호출당 원격 요청 한 번. 청크 분할이나 재시도는 하지 않습니다.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// 벡터 차원 수 (인스턴스 수명 동안 고정)
    fn dimensionality(&self) -> usize;

    /// 텍스트 배치 임베딩
    ///
    /// 입력 순서대로 벡터를 반환합니다.
    async fn encode(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;

    /// 단일 텍스트 임베딩 (한 개짜리 배치로 전송)
    async fn encode_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.encode(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::response(format!(
                "expected 1 embedding, got {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Shared HTTP helpers
// ============================================================================

/// 첫 사용 시 생성되어 재사용되는 HTTP 클라이언트
#[derive(Debug, Default)]
pub(crate) struct LazyClient {
    cell: OnceCell<reqwest::Client>,
}

impl LazyClient {
    pub(crate) async fn get<F>(&self, headers: F) -> std::result::Result<&reqwest::Client, EmbeddingError>
    where
        F: FnOnce() -> std::result::Result<HeaderMap, EmbeddingError>,
    {
        self.cell
            .get_or_try_init(|| async move {
                let client = reqwest::Client::builder()
                    .default_headers(headers()?)
                    .build()?;
                tracing::debug!("Embedding HTTP client created");
                Ok::<_, EmbeddingError>(client)
            })
            .await
    }

    #[cfg(test)]
    pub(crate) fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

/// JSON POST 후 응답 본문 반환 (비성공 상태는 Backend 에러)
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    body: &T,
) -> std::result::Result<String, EmbeddingError> {
    let response = client.post(endpoint).json(body).send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(EmbeddingError::Backend {
            status: Some(status.as_u16()),
            message: error_message(&text),
        });
    }
    Ok(text)
}

/// 에러 응답 본문에서 메시지 추출
///
/// OpenAI 형식(`{"error": {"message"}}`)과 `{"errors": [...]}` 형식을 지원합니다.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct OpenAiError {
        error: OpenAiErrorDetail,
    }

    #[derive(Deserialize)]
    struct OpenAiErrorDetail {
        message: String,
    }

    #[derive(Deserialize)]
    struct ErrorList {
        errors: Vec<serde_json::Value>,
    }

    if let Ok(e) = serde_json::from_str::<OpenAiError>(body) {
        return e.error.message;
    }
    if let Ok(e) = serde_json::from_str::<ErrorList>(body) {
        return e
            .errors
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
    }
    body.chars().take(512).collect()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 함수 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingFunction>> {
    let embedder: Arc<dyn EmbeddingFunction> = match config.backend {
        EmbeddingBackend::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| Error::Config("openai backend requires an API key".to_string()))?;
            Arc::new(OpenAiEmbedding::new(
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
                config.dims,
            ))
        }
        EmbeddingBackend::Sentence => Arc::new(SentenceEmbedding::new(
            config.endpoint.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.dims,
        )),
    };

    tracing::info!(
        "Using embedding function {} (dimension: {})",
        embedder.name(),
        embedder.dimensionality()
    );
    Ok(embedder)
}

// ============================================================================
// Test doubles
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// 토큰 해시 기반 결정적 임베딩 (bag of words)
    pub(crate) struct HashEmbedding {
        dims: usize,
        calls: AtomicUsize,
    }

    impl HashEmbedding {
        pub(crate) fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn embed(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0f32; self.dims];
            for token in text
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
            {
                // FNV-1a
                let mut hash: u64 = 0xcbf29ce484222325;
                for byte in token.bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x100000001b3);
                }
                vector[(hash % self.dims as u64) as usize] += 1.0;
            }
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                vector.iter_mut().for_each(|x| *x /= norm);
            }
            vector
        }
    }

    #[async_trait]
    impl EmbeddingFunction for HashEmbedding {
        fn dimensionality(&self) -> usize {
            self.dims
        }

        async fn encode(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.embed(t)).collect())
        }

        fn name(&self) -> &str {
            "hash-embedding"
        }
    }

    /// 지정된 벡터를 그대로 돌려주는 임베딩 (형태 오류 재현용)
    pub(crate) struct FixedEmbedding {
        pub(crate) dims: usize,
        pub(crate) vectors: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingFunction for FixedEmbedding {
        fn dimensionality(&self) -> usize {
            self.dims
        }

        async fn encode(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(self.vectors.iter().take(texts.len()).cloned().collect())
        }

        fn name(&self) -> &str {
            "fixed-embedding"
        }
    }

    /// 항상 실패하는 임베딩
    pub(crate) struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingFunction for FailingEmbedding {
        fn dimensionality(&self) -> usize {
            8
        }

        async fn encode(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Backend {
                status: Some(503),
                message: "backend unavailable".to_string(),
            })
        }

        fn name(&self) -> &str {
            "failing-embedding"
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_error_message_openai_format() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(error_message(body), "Incorrect API key provided");
    }

    #[test]
    fn test_error_message_error_list_format() {
        let body = r#"{"crid": null, "errors": ["model error, view service logs"]}"#;
        assert_eq!(error_message(body), "model error, view service logs");
    }

    #[test]
    fn test_error_message_plain_body() {
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn test_encode_one_uses_single_batch() {
        let embedder = HashEmbedding::new(16);
        let vector = embedder.encode_one("hello world").await.unwrap();
        assert_eq!(vector.len(), 16);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_encode_one_rejects_empty_response() {
        let embedder = FixedEmbedding {
            dims: 4,
            vectors: vec![],
        };
        let result = embedder.encode_one("hello").await;
        assert!(matches!(result, Err(EmbeddingError::Response { .. })));
    }

    #[test]
    fn test_create_embedder_openai_requires_key() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::OpenAi,
            endpoint: "http://localhost:1/v1/embeddings".to_string(),
            api_key: None,
            model: "m".to_string(),
            dims: 8,
        };
        assert!(matches!(create_embedder(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_create_embedder_sentence() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Sentence,
            endpoint: "http://localhost:1/encode".to_string(),
            api_key: None,
            model: "all-MiniLM-L6-v2".to_string(),
            dims: 384,
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimensionality(), 384);
        assert_eq!(embedder.name(), "all-MiniLM-L6-v2");
    }
}
