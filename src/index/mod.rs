//! 인덱스 모듈 - 테이블 저장소와 하이브리드 검색
//!
//! LanceDB 벡터 검색 + SQLite FTS5 BM25 검색을 결합합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let mut store = TableStore::new("data/test_1", embedder, StoreOptions::default())?;
//! store.init_from_data("test", &texts, true).await?;
//! let results = store.search("what is the hypotenuse?", 2, SearchMode::Hybrid).await?;
//! ```

mod hybrid;
mod lexical;
mod schema;
mod store;
mod vector;

pub use hybrid::{FusionPolicy, HitSource, HybridRetriever, RetrievedRecord, SearchMode, DEFAULT_RRF_K};
pub use lexical::{LexicalHit, LexicalIndex, TOKENIZER};
pub use schema::{Record, Schema, ID_FIELD, TEXT_FIELD, VECTOR_FIELD};
pub use store::{
    validate_table_name, DataLocation, StoreOptions, TableBinding, TableHandle, TableStore,
    LEXICAL_FILE_NAME,
};
pub use vector::{VectorDistance, VectorIndex, MIN_ROWS_FOR_ANN_INDEX};
