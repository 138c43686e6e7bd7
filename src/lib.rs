//! rag-search - 하이브리드 검색 엔진
//!
//! 이름 붙은 텍스트 테이블을 LanceDB 벡터 검색(ANN)과
//! SQLite FTS5 BM25 키워드 검색으로 조회합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod service;

// Re-exports
pub use config::{Config, EmbeddingBackend, EmbeddingConfig};
pub use embedding::{create_embedder, EmbeddingFunction, OpenAiEmbedding, SentenceEmbedding};
pub use error::{ApiStatus, EmbeddingError, Error, Result, StorageError};
pub use index::{
    DataLocation, FusionPolicy, HybridRetriever, LexicalIndex, Record, RetrievedRecord, Schema,
    SearchMode, StoreOptions, TableStore, VectorDistance, VectorIndex,
};
pub use service::{
    ApiError, IndexManager, InitFromData, InitResult, InitStatus, SearchIndex, SearchResponse,
};
