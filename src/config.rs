//! 설정 - 환경변수 기반 서비스 설정
//!
//! 임베딩 백엔드, 저장 위치 접두사, 검색 융합 정책, 로그 레벨을 읽습니다.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::index::{FusionPolicy, VectorDistance, DEFAULT_RRF_K};

/// 기본 임베딩 엔드포인트 (OpenAI 호환)
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// 기본 임베딩 모델
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// 기본 벡터 차원 (text-embedding-3-small)
pub const DEFAULT_MODEL_DIM: usize = 1536;

/// API 키 파일 기본 경로
const DEFAULT_KEY_FILE: &str = ".env";

/// 기본 로그 레벨
const DEFAULT_LOG_LEVEL: &str = "info";

// ============================================================================
// Types
// ============================================================================

/// 임베딩 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI 호환 `/v1/embeddings`
    OpenAi,
    /// 자체 호스팅 sentence encoder 서비스
    Sentence,
}

/// 임베딩 함수 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dims: usize,
}

/// 서비스 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    /// 상대 데이터 위치 앞에 붙는 접두사 (예: `s3://bucket`)
    pub storage_prefix: Option<String>,
    /// 오브젝트 스토리지 위치의 BM25 인덱스 저장 디렉토리
    pub lexical_dir: PathBuf,
    pub fusion: FusionPolicy,
    pub distance: VectorDistance,
}

/// API 키 파일 형식
#[derive(Debug, Deserialize)]
struct KeyFile {
    openai_key: String,
}

impl Config {
    /// 프로세스 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정 로드
    ///
    /// 빈 문자열은 설정되지 않은 것으로 취급합니다.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("EMBEDDING_API_KIND").as_deref() {
            None | Some("openai") => EmbeddingBackend::OpenAi,
            Some("sentence") => EmbeddingBackend::Sentence,
            Some(other) => {
                return Err(Error::Config(format!(
                    "EMBEDDING_API_KIND must be `openai` or `sentence`, got `{}`",
                    other
                )))
            }
        };

        let api_key = match get("EMBEDDING_API_KEY") {
            Some(key) => Some(key),
            None => {
                let path = get("EMBEDDING_API_KEY_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_FILE));
                read_key_file(&path)?
            }
        };

        if backend == EmbeddingBackend::OpenAi && api_key.is_none() {
            return Err(Error::Config(
                "API key not found. Set EMBEDDING_API_KEY or provide a key file \
                 (EMBEDDING_API_KEY_FILE) with an `openai_key` field"
                    .to_string(),
            ));
        }

        let dims = match get("MODEL_DIM") {
            Some(v) => parse_number::<usize>("MODEL_DIM", &v)?,
            None => DEFAULT_MODEL_DIM,
        };
        if dims == 0 {
            return Err(Error::Config("MODEL_DIM must be positive".to_string()));
        }

        let embedding = EmbeddingConfig {
            backend,
            endpoint: get("EMBEDDING_API_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_ENDPOINT.to_string()),
            api_key,
            model: get("EMBEDDING_API_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            dims,
        };

        let storage_prefix = get("DATA_S3_BUCKET").map(|bucket| format!("s3://{}", bucket.trim()));

        let lexical_dir = get("LEXICAL_INDEX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_lexical_dir);

        let rrf_k = match get("RRF_K") {
            Some(v) => parse_number::<f32>("RRF_K", &v)?,
            None => DEFAULT_RRF_K,
        };
        let fusion = match get("SEARCH_FUSION").as_deref() {
            None | Some("concat") => FusionPolicy::Concat,
            Some("rrf") => FusionPolicy::ReciprocalRank { k: rrf_k },
            Some(other) => {
                return Err(Error::Config(format!(
                    "SEARCH_FUSION must be `concat` or `rrf`, got `{}`",
                    other
                )))
            }
        };

        let distance = match get("VECTOR_DISTANCE") {
            Some(v) => v.parse::<VectorDistance>().map_err(Error::Config)?,
            None => VectorDistance::default(),
        };

        Ok(Self {
            embedding,
            storage_prefix,
            lexical_dir,
            fusion,
            distance,
        })
    }

    /// 요청의 데이터 위치에 저장소 접두사 적용
    ///
    /// 이미 스킴이 있는 URI(`s3://...`)나 절대 경로는 그대로 둡니다.
    pub fn resolve_location(&self, data_location: &str) -> String {
        match &self.storage_prefix {
            Some(prefix) if !data_location.contains("://") && !Path::new(data_location).is_absolute() => {
                format!(
                    "{}/{}",
                    prefix.trim_end_matches('/'),
                    data_location.trim_start_matches("./").trim_start_matches('/')
                )
            }
            _ => data_location.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 로그 레벨 (`LOG_LEVEL`, 기본값 `info`)
///
/// 임베딩 설정과 무관하게 읽히므로 API 키 없이도 로깅을 초기화할 수 있습니다.
pub fn log_level<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("LOG_LEVEL")
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// 오브젝트 스토리지 BM25 인덱스 기본 디렉토리
pub fn default_lexical_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-search")
        .join("lexical")
}

/// API 키 파일 읽기 (없으면 None)
fn read_key_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read key file {:?}: {}", path, e)))?;
    let parsed: KeyFile = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("Invalid key file {:?}: {}", path, e)))?;
    tracing::debug!("Using API key from {:?}", path);
    Ok(Some(parsed.openai_key))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{} must be a number, got `{}`", key, value)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("EMBEDDING_API_KEY", "sk-test"),
            ("EMBEDDING_API_KEY_FILE", "/nonexistent/key.json"),
        ]))
        .unwrap();

        assert_eq!(config.embedding.backend, EmbeddingBackend::OpenAi);
        assert_eq!(config.embedding.endpoint, DEFAULT_EMBEDDING_ENDPOINT);
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.embedding.dims, DEFAULT_MODEL_DIM);
        assert_eq!(config.storage_prefix, None);
        assert_eq!(config.fusion, FusionPolicy::Concat);
        assert_eq!(config.distance, VectorDistance::L2);
    }

    #[test]
    fn test_missing_key_for_openai_is_error() {
        let result = Config::from_lookup(lookup(&[("EMBEDDING_API_KEY_FILE", "/nonexistent/key.json")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_sentence_backend_without_key() {
        let config = Config::from_lookup(lookup(&[
            ("EMBEDDING_API_KIND", "sentence"),
            ("EMBEDDING_API_KEY_FILE", "/nonexistent/key.json"),
            ("MODEL_DIM", "768"),
        ]))
        .unwrap();

        assert_eq!(config.embedding.backend, EmbeddingBackend::Sentence);
        assert_eq!(config.embedding.api_key, None);
        assert_eq!(config.embedding.dims, 768);
    }

    #[test]
    fn test_key_file_fallback() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(&path, r#"{"openai_key": "sk-from-file"}"#).unwrap();

        let config = Config::from_lookup(lookup(&[(
            "EMBEDDING_API_KEY_FILE",
            path.to_str().unwrap(),
        )]))
        .unwrap();

        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-from-file"));
    }

    #[test]
    fn test_invalid_values() {
        let base = [("EMBEDDING_API_KEY", "k")];
        for (key, value) in [
            ("MODEL_DIM", "abc"),
            ("MODEL_DIM", "0"),
            ("SEARCH_FUSION", "weighted"),
            ("VECTOR_DISTANCE", "manhattan"),
            ("EMBEDDING_API_KIND", "grpc"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((key, value));
            let result = Config::from_lookup(lookup(&pairs));
            assert!(matches!(result, Err(Error::Config(_))), "{key}={value}");
        }
    }

    #[test]
    fn test_rrf_fusion() {
        let config = Config::from_lookup(lookup(&[
            ("EMBEDDING_API_KEY", "k"),
            ("SEARCH_FUSION", "rrf"),
            ("RRF_K", "10"),
        ]))
        .unwrap();
        assert_eq!(config.fusion, FusionPolicy::ReciprocalRank { k: 10.0 });
    }

    #[test]
    fn test_resolve_location_with_bucket() {
        let config = Config::from_lookup(lookup(&[
            ("EMBEDDING_API_KEY", "k"),
            ("DATA_S3_BUCKET", "my-bucket"),
        ]))
        .unwrap();

        assert_eq!(config.resolve_location("data/test_1"), "s3://my-bucket/data/test_1");
        assert_eq!(config.resolve_location("s3://other/x"), "s3://other/x");
        assert_eq!(config.resolve_location("/abs/path"), "/abs/path");
    }

    #[test]
    fn test_resolve_location_without_bucket() {
        let config = Config::from_lookup(lookup(&[
            ("EMBEDDING_API_KEY", "k"),
            ("DATA_S3_BUCKET", ""),
        ]))
        .unwrap();
        assert_eq!(config.resolve_location("data/test_1"), "data/test_1");
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(lookup(&[])), "info");
        assert_eq!(log_level(lookup(&[("LOG_LEVEL", "  ")])), "info");
        assert_eq!(log_level(lookup(&[("LOG_LEVEL", "DEBUG")])), "debug");
    }
}
