//! 요청/응답 타입 - 외부 호출자와의 계약
//!
//! JSON 형태는 HTTP 계층과 CLI가 그대로 직렬화합니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{ApiStatus, Error};
use crate::index::{RetrievedRecord, SearchMode};

/// 기본 결과 개수
pub const DEFAULT_TOP_N: i64 = 10;

/// 500 응답에 노출되는 메시지
const INTERNAL_ERROR_MESSAGE: &str = "internal error, see service logs";

// ============================================================================
// Requests
// ============================================================================

/// 색인할 텍스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
}

/// 테이블 생성 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitFromData {
    #[serde(alias = "data_loc")]
    pub data_location: String,
    pub table_name: String,
    #[serde(default)]
    pub bm25_index: bool,
    pub data: Vec<Text>,
}

/// 행 추가 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendData {
    #[serde(alias = "data_loc")]
    pub data_location: String,
    pub table_name: String,
    pub data: Vec<Text>,
}

/// 검색 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndex {
    #[serde(alias = "data_loc")]
    pub data_location: String,
    pub table_name: String,
    pub query: String,
    #[serde(default = "default_top_n")]
    pub top_n: i64,
    #[serde(default)]
    pub search_type: SearchMode,
}

/// 테이블 참조 (삭제, 인덱스 생성)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(alias = "data_loc")]
    pub data_location: String,
    pub table_name: String,
}

fn default_top_n() -> i64 {
    DEFAULT_TOP_N
}

/// 요청 텍스트 목록을 문자열로
pub(crate) fn texts(data: Vec<Text>) -> Vec<String> {
    data.into_iter().map(|t| t.text).collect()
}

// ============================================================================
// Responses
// ============================================================================

/// 테이블 생성 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InitStatus {
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitResult {
    pub status: InitStatus,
}

/// 검색 결과 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub vector: Vec<f32>,
    pub score: f32,
}

impl From<RetrievedRecord> for SearchHit {
    fn from(record: RetrievedRecord) -> Self {
        Self {
            text: record.text,
            vector: record.vector,
            score: record.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendResult {
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    /// ANN 인덱스 생성 여부 (행이 적으면 false)
    pub built: bool,
}

/// 공통 에러 응답 본문
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<Value>,
}

// ============================================================================
// ApiError
// ============================================================================

/// 파사드 에러 (상태 코드 + 응답 본문)
#[derive(Debug, Error)]
#[error("request failed with status {}", status.code())]
pub struct ApiError {
    pub status: ApiStatus,
    pub body: ErrorResponse,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = e.status();
        let message = match status {
            ApiStatus::Internal => {
                tracing::error!("Request failed: {}", e);
                INTERNAL_ERROR_MESSAGE.to_string()
            }
            _ => {
                tracing::debug!("Request rejected: {}", e);
                e.to_string()
            }
        };

        Self {
            status,
            body: ErrorResponse {
                errors: vec![Value::String(message)],
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, StorageError};

    #[test]
    fn test_init_request_accepts_data_loc() {
        let json = r#"{
            "data_loc": "data/test_1",
            "table_name": "test",
            "bm25_index": true,
            "data": [{"text": "hi I am Harris"}]
        }"#;
        let req: InitFromData = serde_json::from_str(json).unwrap();
        assert_eq!(req.data_location, "data/test_1");
        assert!(req.bm25_index);
        assert_eq!(texts(req.data), vec!["hi I am Harris".to_string()]);
    }

    #[test]
    fn test_search_request_defaults() {
        let json = r#"{"data_location": "d", "table_name": "t", "query": "q"}"#;
        let req: SearchIndex = serde_json::from_str(json).unwrap();
        assert_eq!(req.top_n, DEFAULT_TOP_N);
        assert_eq!(req.search_type, SearchMode::Hybrid);
    }

    #[test]
    fn test_init_status_serialization() {
        let json = serde_json::to_string(&InitResult {
            status: InitStatus::Success,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"SUCCESS"}"#);
    }

    #[test]
    fn test_client_errors_keep_detail() {
        let err = ApiError::from(Error::TableNotFound {
            table: "nonexistent".to_string(),
        });
        assert_eq!(err.status.code(), 404);
        let message = err.body.errors[0].as_str().unwrap();
        assert!(message.contains("nonexistent"));
    }

    #[test]
    fn test_internal_errors_are_redacted() {
        let err = ApiError::from(Error::Storage(StorageError::Layout("secret path".to_string())));
        assert_eq!(err.status, ApiStatus::Internal);
        assert_eq!(err.body.errors, vec![Value::String(INTERNAL_ERROR_MESSAGE.to_string())]);

        let err = ApiError::from(Error::from(EmbeddingError::Backend {
            status: Some(401),
            message: "Incorrect API key sk-...".to_string(),
        }));
        assert_eq!(err.status.code(), 500);
        assert!(!err.body.errors[0].as_str().unwrap().contains("sk-"));
    }
}
