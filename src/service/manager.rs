//! IndexManager - 외부 호출자용 파사드
//!
//! 요청마다 `TableStore`를 새로 열고, 내부 에러를 `ApiError`로 변환합니다.
//! 임베딩 함수는 프로세스 전체에서 하나를 공유합니다.

use std::sync::Arc;

use super::api::{
    texts, AppendData, AppendResult, ApiError, IndexResult, InitFromData, InitResult, InitStatus,
    SearchHit, SearchIndex, SearchResponse, TableRef,
};
use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingFunction};
use crate::error::{Error, Result};
use crate::index::{StoreOptions, TableStore};

/// 헬스 체크 응답
pub const PING_RESPONSE: &str = "ALIVE";

/// 검색 엔진 파사드
pub struct IndexManager {
    config: Config,
    embedder: Arc<dyn EmbeddingFunction>,
}

impl IndexManager {
    /// 설정으로 임베딩 함수를 만들어 생성
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::with_embedder(config, embedder))
    }

    /// 임베딩 함수를 주입하여 생성
    pub fn with_embedder(config: Config, embedder: Arc<dyn EmbeddingFunction>) -> Self {
        Self { config, embedder }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 요청의 데이터 위치로 저장소 열기
    fn open_store(&self, data_location: &str) -> Result<TableStore> {
        let resolved = self.config.resolve_location(data_location);
        if resolved != data_location {
            tracing::debug!("Rewrote data location {} -> {}", data_location, resolved);
        }

        let options = StoreOptions {
            lexical_dir: self.config.lexical_dir.clone(),
            distance: self.config.distance,
            fusion: self.config.fusion,
        };
        TableStore::new(&resolved, Arc::clone(&self.embedder), options)
    }

    /// 테이블 생성
    ///
    /// 실패 상세는 로그로만 남기고 `FAIL` 상태를 반환합니다.
    pub async fn init_from_data(&self, req: InitFromData) -> InitResult {
        tracing::info!("Init request started for table {}", req.table_name);
        let table_name = req.table_name.clone();

        let status = match self.try_init(req).await {
            Ok(()) => {
                tracing::debug!("Initialized table: {}", table_name);
                InitStatus::Success
            }
            Err(e) => {
                tracing::error!("Init of table {} failed: {}", table_name, e);
                InitStatus::Fail
            }
        };

        tracing::info!("Init request completed");
        InitResult { status }
    }

    async fn try_init(&self, req: InitFromData) -> Result<()> {
        let mut store = self.open_store(&req.data_location)?;
        store
            .init_from_data(&req.table_name, &texts(req.data), req.bm25_index)
            .await
    }

    /// 기존 테이블에 행 추가
    pub async fn append_data(&self, req: AppendData) -> std::result::Result<AppendResult, ApiError> {
        tracing::info!("Append request received for table {}", req.table_name);
        let mut store = self.open_store(&req.data_location)?;
        store.attach(&req.table_name);
        let rows = store.append(&texts(req.data)).await?;
        Ok(AppendResult { rows })
    }

    /// 테이블 검색
    pub async fn search(&self, req: SearchIndex) -> std::result::Result<SearchResponse, ApiError> {
        tracing::info!("Search request received for table {}", req.table_name);
        if req.top_n <= 0 {
            return Err(Error::invalid(format!("top_n must be greater than 0, got {}", req.top_n)).into());
        }

        let mut store = self.open_store(&req.data_location)?;
        store.attach(&req.table_name);
        let results = store
            .search(&req.query, req.top_n as usize, req.search_type)
            .await?;

        tracing::info!("Search complete: {} results", results.len());
        Ok(SearchResponse {
            results: results.into_iter().map(SearchHit::from).collect(),
        })
    }

    /// 테이블 삭제
    pub async fn drop_table(&self, req: TableRef) -> std::result::Result<(), ApiError> {
        tracing::info!("Drop request received for table {}", req.table_name);
        let mut store = self.open_store(&req.data_location)?;
        store.drop_table(&req.table_name).await?;
        Ok(())
    }

    /// ANN 인덱스 생성
    pub async fn build_vector_index(&self, req: TableRef) -> std::result::Result<IndexResult, ApiError> {
        tracing::info!("Index request received for table {}", req.table_name);
        let mut store = self.open_store(&req.data_location)?;
        store.attach(&req.table_name);
        let built = store.build_vector_index().await?;
        Ok(IndexResult { built })
    }

    /// 헬스 체크
    pub fn ping(&self) -> &'static str {
        PING_RESPONSE
    }
}

// ============================================================================
// Tests
// ============================================================================
