//! 에러 타입 - 검색 엔진 에러 분류
//!
//! 컴포넌트는 가장 구체적인 에러를 반환하고,
//! 파사드(`IndexManager`)가 외부용 상태 코드로 변환합니다.

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error
// ============================================================================

/// 검색 엔진 최상위 에러
#[derive(Error, Debug)]
pub enum Error {
    /// 잘못된 요청 (top_n <= 0, 빈 테이블 이름 등)
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// 테이블이 바인딩되지 않은 상태에서 검색
    #[error("no table set: init a table from data or attach an existing table before searching")]
    TableNotSet,

    /// 스토리지에 테이블이 없음
    #[error("table `{table}` not found in this data location")]
    TableNotFound { table: String },

    /// 같은 이름의 테이블이 이미 존재
    #[error("table `{table}` already exists in this data location")]
    TableAlreadyExists { table: String },

    /// BM25 인덱스 없이 키워드 검색 요청
    #[error("table `{table}` has no BM25 index")]
    LexicalIndexNotBuilt { table: String },

    /// 임베딩 백엔드 에러
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 설정 에러
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// 외부 노출용 상태 분류
    pub fn status(&self) -> ApiStatus {
        match self {
            Self::InvalidArgument { .. } | Self::TableNotSet | Self::LexicalIndexNotBuilt { .. } => {
                ApiStatus::BadRequest
            }
            Self::TableNotFound { .. } => ApiStatus::NotFound,
            Self::TableAlreadyExists { .. } => ApiStatus::Conflict,
            Self::Embedding(_) | Self::Storage(_) | Self::Config(_) => ApiStatus::Internal,
        }
    }
}

/// 임베딩 함수 에러
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// 전송 실패 또는 비성공 HTTP 상태
    #[error("embedding backend error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Backend {
        status: Option<u16>,
        message: String,
    },

    /// 응답을 기대한 벡터 형태로 해석할 수 없음
    #[error("embedding response error: {message}")]
    Response { message: String },
}

impl EmbeddingError {
    pub(crate) fn response(message: impl Into<String>) -> Self {
        Self::Response {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// 저장소 에러 ("not found" 이외의 영속화 실패)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("lancedb: {0}")]
    Lance(#[from] lancedb::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("arrow: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// 테이블 레이아웃이 스키마와 맞지 않음
    #[error("unexpected table layout: {0}")]
    Layout(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<lancedb::Error> for Error {
    fn from(e: lancedb::Error) -> Self {
        match e {
            lancedb::Error::TableNotFound { name } => Self::TableNotFound { table: name },
            lancedb::Error::TableAlreadyExists { name } => Self::TableAlreadyExists { table: name },
            other => Self::Storage(StorageError::Lance(other)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(e))
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(e: arrow_schema::ArrowError) -> Self {
        Self::Storage(StorageError::Arrow(e))
    }
}

/// 검색 엔진 Result 타입
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// External status
// ============================================================================

/// 외부 호출자에게 노출되는 상태 분류 (HTTP 상태 코드 대응)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiStatus {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl ApiStatus {
    /// HTTP 상태 코드
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
