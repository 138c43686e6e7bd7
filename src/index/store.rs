//! 테이블 저장소 - 데이터 위치 하나의 테이블 수명주기
//!
//! 데이터 위치(로컬 경로 또는 오브젝트 스토리지 URI)에 대한 LanceDB 연결을 소유하고
//! 테이블 생성, 바인딩, 삭제를 관리합니다.
//!
//! 테이블 바인딩은 지연 검증됩니다: `attach`는 이름만 기록하고,
//! 실제 테이블은 저장소가 필요한 첫 작업에서 열립니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

use super::hybrid::{FusionPolicy, HybridRetriever, RetrievedRecord, SearchMode};
use super::lexical::LexicalIndex;
use super::schema::{Record, Schema};
use super::vector::{VectorDistance, VectorIndex};
use crate::config::default_lexical_dir;
use crate::embedding::EmbeddingFunction;
use crate::error::{EmbeddingError, Error, Result, StorageError};

/// 로컬 데이터 위치의 BM25 인덱스 파일 이름
pub const LEXICAL_FILE_NAME: &str = "_lexical.db";

/// 허용되는 테이블 이름
const TABLE_NAME_PATTERN: &str = r"^[A-Za-z0-9_.\-]+$";

// ============================================================================
// DataLocation
// ============================================================================

/// 데이터 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    /// 로컬 디렉토리 (`file://` URI 포함)
    Local(PathBuf),
    /// 오브젝트 스토리지 URI (`s3://`, `gs://`, `az://` ...)
    Remote(String),
}

impl DataLocation {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid("data location must not be empty"));
        }

        if !raw.contains("://") {
            return Ok(Self::Local(PathBuf::from(raw)));
        }

        let url = Url::parse(raw)
            .map_err(|e| Error::invalid(format!("invalid data location `{}`: {}", raw, e)))?;
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| Error::invalid(format!("invalid file location `{}`", raw)))?;
            return Ok(Self::Local(path));
        }
        Ok(Self::Remote(raw.trim_end_matches('/').to_string()))
    }

    /// LanceDB 연결 URI
    pub fn uri(&self) -> String {
        match self {
            Self::Local(path) => path.to_string_lossy().to_string(),
            Self::Remote(uri) => uri.clone(),
        }
    }

    /// BM25 인덱스 파일 경로
    ///
    /// 로컬 위치는 데이터 디렉토리 안에, 오브젝트 스토리지 위치는
    /// `lexical_dir` 아래 URI의 SHA-256 이름으로 둡니다.
    pub fn lexical_path(&self, lexical_dir: &Path) -> PathBuf {
        match self {
            Self::Local(path) => path.join(LEXICAL_FILE_NAME),
            Self::Remote(uri) => {
                let digest = Sha256::digest(uri.as_bytes());
                lexical_dir.join(format!("{:x}.db", digest))
            }
        }
    }
}

/// 테이블 이름 검증
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid("table name must not be empty"));
    }
    let pattern = regex::Regex::new(TABLE_NAME_PATTERN)
        .map_err(|e| Error::Config(format!("invalid table name pattern: {}", e)))?;
    if !pattern.is_match(name) {
        return Err(Error::invalid(format!(
            "table name `{}` may only contain letters, digits, `_`, `-` and `.`",
            name
        )));
    }
    Ok(())
}

// ============================================================================
// Types
// ============================================================================

/// 저장소 옵션
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 오브젝트 스토리지 위치의 BM25 인덱스 디렉토리
    pub lexical_dir: PathBuf,
    pub distance: VectorDistance,
    pub fusion: FusionPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lexical_dir: default_lexical_dir(),
            distance: VectorDistance::default(),
            fusion: FusionPolicy::default(),
        }
    }
}

/// 열린 테이블 핸들
#[derive(Clone)]
pub struct TableHandle {
    pub name: String,
    pub has_lexical_index: bool,
    pub vectors: VectorIndex,
}

/// 테이블 바인딩 상태
#[derive(Clone, Default)]
pub enum TableBinding {
    /// 바인딩된 테이블 없음
    #[default]
    Unset,
    /// 이름만 기록됨 (아직 열지 않음)
    Named(String),
    /// 열린 테이블
    Resolved(TableHandle),
}

impl TableBinding {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::Named(name) => Some(name),
            Self::Resolved(handle) => Some(&handle.name),
        }
    }
}

// ============================================================================
// TableStore
// ============================================================================

/// 데이터 위치 하나의 테이블 저장소
///
/// 요청 하나에 인스턴스 하나를 사용합니다. LanceDB 연결과 BM25 인덱스 파일은
/// 처음 필요할 때 열립니다.
pub struct TableStore {
    location: DataLocation,
    options: StoreOptions,
    embedder: Arc<dyn EmbeddingFunction>,
    schema: Schema,
    db: Option<lancedb::Connection>,
    lexical: Option<LexicalIndex>,
    binding: TableBinding,
}

impl TableStore {
    /// # Arguments
    /// * `data_location` - 로컬 경로 또는 오브젝트 스토리지 URI
    /// * `embedder` - 테이블 스키마가 바인딩될 임베딩 함수
    /// * `options` - 저장소 옵션
    pub fn new(data_location: &str, embedder: Arc<dyn EmbeddingFunction>, options: StoreOptions) -> Result<Self> {
        let location = DataLocation::parse(data_location)?;
        let schema = Schema::for_embedder(embedder.as_ref());

        Ok(Self {
            location,
            options,
            embedder,
            schema,
            db: None,
            lexical: None,
            binding: TableBinding::Unset,
        })
    }

    /// 바인딩된 테이블 이름
    pub fn table_name(&self) -> Option<&str> {
        self.binding.name()
    }

    // ------------------------------------------------------------------------
    // Table lifecycle
    // ------------------------------------------------------------------------

    /// 텍스트로 새 테이블 생성
    ///
    /// 모든 텍스트를 임베딩한 뒤 테이블을 만들고 행을 추가합니다.
    /// 임베딩이 실패하면 테이블은 생성되지 않고, 생성 이후 단계가 실패하면
    /// 테이블과 BM25 인덱스를 삭제한 뒤 원래 에러를 반환합니다.
    ///
    /// # Arguments
    /// * `table_name` - 새 테이블 이름
    /// * `texts` - 원문 텍스트
    /// * `build_lexical_index` - BM25 인덱스 생성 여부
    pub async fn init_from_data(&mut self, table_name: &str, texts: &[String], build_lexical_index: bool) -> Result<()> {
        validate_table_name(table_name)?;

        let db = self.connection().await?;
        let names = db.table_names().execute().await?;
        if names.iter().any(|n| n == table_name) {
            return Err(Error::TableAlreadyExists {
                table: table_name.to_string(),
            });
        }

        let records = self.embed_records(texts).await?;

        let table = db
            .create_empty_table(table_name, Arc::new(self.schema.to_arrow()))
            .execute()
            .await?;
        let vectors = VectorIndex::new(table, self.schema.clone(), self.options.distance);

        if let Err(e) = self.populate(table_name, &vectors, &records, build_lexical_index).await {
            self.rollback_init(&db, table_name, build_lexical_index).await;
            return Err(e);
        }

        tracing::info!(
            "Created table {} in {} ({} rows, bm25: {})",
            table_name,
            self.location.uri(),
            records.len(),
            build_lexical_index
        );

        self.binding = TableBinding::Resolved(TableHandle {
            name: table_name.to_string(),
            has_lexical_index: build_lexical_index,
            vectors,
        });
        Ok(())
    }

    /// 바인딩된 테이블에 행 추가
    ///
    /// BM25 인덱스가 있으면 새 행도 색인합니다. 색인이 실패하면 추가한 벡터 행을
    /// 지우고 에러를 반환합니다. 추가된 행 수를 반환합니다.
    pub async fn append(&mut self, texts: &[String]) -> Result<usize> {
        let handle = self.resolve().await?;
        let records = self.embed_records(texts).await?;
        if records.is_empty() {
            return Ok(0);
        }

        // 벡터 행을 쓰기 전에 BM25 인덱스를 연다
        let lexical = if handle.has_lexical_index {
            Some(self.lexical()?)
        } else {
            None
        };

        let first_id = handle.vectors.count().await? as i64;
        let added = handle.vectors.add(&records, first_id).await?;

        if let Some(lexical) = lexical {
            let rows = lexical_rows(&records, first_id);
            if let Err(e) = lexical.insert(&handle.name, &rows) {
                if let Err(undo) = handle.vectors.remove_from(first_id).await {
                    tracing::warn!("Failed to remove unindexed rows from {}: {}", handle.name, undo);
                }
                return Err(e);
            }
        }

        tracing::info!("Appended {} rows to {}", added, handle.name);
        Ok(added)
    }

    /// 기존 테이블 바인딩 (검증은 첫 사용 시)
    pub fn attach(&mut self, table_name: &str) {
        if self.binding.name() == Some(table_name) {
            return;
        }
        self.binding = TableBinding::Named(table_name.to_string());
    }

    /// 테이블과 파생 인덱스 삭제
    pub async fn drop_table(&mut self, table_name: &str) -> Result<()> {
        validate_table_name(table_name)?;

        let db = self.connection().await?;
        let names = db.table_names().execute().await?;
        if !names.iter().any(|n| n == table_name) {
            return Err(Error::TableNotFound {
                table: table_name.to_string(),
            });
        }

        db.drop_table(table_name).await?;
        if let Some(lexical) = self.lexical_if_exists()? {
            lexical.drop_index(table_name)?;
        }

        if self.binding.name() == Some(table_name) {
            self.binding = TableBinding::Named(table_name.to_string());
        }

        tracing::info!("Dropped table {} from {}", table_name, self.location.uri());
        Ok(())
    }

    /// 데이터 위치의 테이블 목록
    pub async fn table_names(&mut self) -> Result<Vec<String>> {
        let db = self.connection().await?;
        Ok(db.table_names().execute().await?)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// 바인딩된 테이블 검색
    pub async fn search(&mut self, query: &str, top_n: usize, mode: SearchMode) -> Result<Vec<RetrievedRecord>> {
        if matches!(self.binding, TableBinding::Unset) {
            return Err(Error::TableNotSet);
        }
        if top_n == 0 {
            return Err(Error::invalid("top_n must be greater than 0"));
        }

        let handle = self.resolve().await?;
        let lexical = if handle.has_lexical_index {
            self.lexical_if_exists()?
        } else {
            None
        };

        HybridRetriever::new(self.embedder.as_ref(), &handle.name, &handle.vectors, lexical.as_ref())
            .with_fusion(self.options.fusion)
            .search(query, top_n, mode)
            .await
    }

    /// ANN 인덱스 생성 (행이 적으면 `false`)
    pub async fn build_vector_index(&mut self) -> Result<bool> {
        let handle = self.resolve().await?;
        handle.vectors.build().await
    }

    pub async fn count_rows(&mut self) -> Result<usize> {
        let handle = self.resolve().await?;
        handle.vectors.count().await
    }

    pub async fn has_lexical_index(&mut self) -> Result<bool> {
        Ok(self.resolve().await?.has_lexical_index)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn resolve(&mut self) -> Result<TableHandle> {
        let name = match &self.binding {
            TableBinding::Unset => return Err(Error::TableNotSet),
            TableBinding::Resolved(handle) => return Ok(handle.clone()),
            TableBinding::Named(name) => name.clone(),
        };
        validate_table_name(&name)?;

        let db = self.connection().await?;
        let table = db.open_table(&name).execute().await?;
        let schema = Schema::from_arrow(table.schema().await?.as_ref())?;
        if schema.vector_dim() != self.schema.vector_dim() {
            return Err(Error::Config(format!(
                "table `{}` stores {}-dimensional vectors but embedding function {} produces {}",
                name,
                schema.vector_dim(),
                self.embedder.name(),
                self.schema.vector_dim()
            )));
        }

        let has_lexical_index = match self.lexical_if_exists()? {
            Some(lexical) => lexical.has_index(&name)?,
            None => false,
        };

        tracing::debug!("Resolved table {} (bm25: {})", name, has_lexical_index);
        let handle = TableHandle {
            name,
            has_lexical_index,
            vectors: VectorIndex::new(table, self.schema.clone(), self.options.distance),
        };
        self.binding = TableBinding::Resolved(handle.clone());
        Ok(handle)
    }

    /// 새 테이블에 행과 BM25 인덱스 채우기
    async fn populate(
        &mut self,
        table_name: &str,
        vectors: &VectorIndex,
        records: &[Record],
        build_lexical_index: bool,
    ) -> Result<()> {
        vectors.add(records, 0).await?;

        if build_lexical_index {
            let rows = lexical_rows(records, 0);
            self.lexical()?.build(table_name, &rows)?;
        } else if let Some(lexical) = self.lexical_if_exists()? {
            // 같은 이름의 이전 테이블이 남긴 인덱스
            if lexical.drop_index(table_name)? {
                tracing::debug!("Removed stale BM25 index for {}", table_name);
            }
        }
        Ok(())
    }

    /// 실패한 테이블 생성 되돌리기 (정리 실패는 로그만 남김)
    async fn rollback_init(&mut self, db: &lancedb::Connection, table_name: &str, build_lexical_index: bool) {
        tracing::warn!("Rolling back creation of table {}", table_name);
        if let Err(e) = db.drop_table(table_name).await {
            tracing::warn!("Failed to drop partially created table {}: {}", table_name, e);
        }

        if build_lexical_index {
            match self.lexical_if_exists() {
                Ok(Some(lexical)) => {
                    if let Err(e) = lexical.drop_index(table_name) {
                        tracing::warn!("Failed to drop partial BM25 index for {}: {}", table_name, e);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("BM25 index for {} unavailable during rollback: {}", table_name, e),
            }
        }
    }

    async fn connection(&mut self) -> Result<lancedb::Connection> {
        if let Some(db) = &self.db {
            return Ok(db.clone());
        }

        if let DataLocation::Local(path) = &self.location {
            if !path.exists() {
                std::fs::create_dir_all(path).map_err(StorageError::Io)?;
            }
        }

        let db = lancedb::connect(&self.location.uri()).execute().await?;
        tracing::debug!("Connected to {}", self.location.uri());
        self.db = Some(db.clone());
        Ok(db)
    }

    fn lexical(&mut self) -> Result<LexicalIndex> {
        if let Some(lexical) = &self.lexical {
            return Ok(lexical.clone());
        }
        let lexical = LexicalIndex::open(&self.location.lexical_path(&self.options.lexical_dir))?;
        self.lexical = Some(lexical.clone());
        Ok(lexical)
    }

    fn lexical_if_exists(&mut self) -> Result<Option<LexicalIndex>> {
        if let Some(lexical) = &self.lexical {
            return Ok(Some(lexical.clone()));
        }
        let lexical = LexicalIndex::open_existing(&self.location.lexical_path(&self.options.lexical_dir))?;
        self.lexical = lexical.clone();
        Ok(lexical)
    }

    /// 텍스트 임베딩 후 스키마에 맞춤 ("fill" 정책)
    async fn embed_records(&self, texts: &[String]) -> Result<Vec<Record>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let vectors = self.embedder.encode(texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::response(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }

        let mut filled = 0;
        let records: Vec<Record> = texts
            .iter()
            .zip(vectors)
            .map(|(text, vector)| {
                let (vector, coerced) = self.schema.conform(vector);
                if coerced {
                    filled += 1;
                }
                Record {
                    text: text.clone(),
                    vector,
                }
            })
            .collect();

        if filled > 0 {
            tracing::warn!(
                "{} of {} embeddings had the wrong shape and were replaced with zero vectors",
                filled,
                records.len()
            );
        }
        Ok(records)
    }
}

/// BM25 색인용 (행 ID, 텍스트) 목록
fn lexical_rows(records: &[Record], first_id: i64) -> Vec<(i64, &str)> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (first_id + i as i64, r.text.as_str()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
