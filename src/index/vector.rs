//! LanceDB 벡터 인덱스 - ANN 검색
//!
//! 테이블의 벡터 컬럼에 대한 근사 최근접 이웃 검색입니다.
//! ANN 인덱스가 없으면 LanceDB가 전수 검색을 수행합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::HashMap;
use std::str::FromStr;

use arrow_array::{Float32Array, RecordBatch, RecordBatchIterator};
use futures::TryStreamExt;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::hybrid::{HitSource, RetrievedRecord};
use super::schema::{records_by_id, BatchColumns, Record, Schema, ID_FIELD};
use crate::error::{Error, Result, StorageError};

/// IVF-PQ 학습에 필요한 최소 행 수
pub const MIN_ROWS_FOR_ANN_INDEX: usize = 256;

/// LanceDB가 추가하는 거리 컬럼
const DISTANCE_COLUMN: &str = "_distance";

// ============================================================================
// VectorDistance
// ============================================================================

/// 벡터 거리 함수 (값이 작을수록 유사)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VectorDistance {
    #[default]
    L2,
    Cosine,
    Dot,
}

impl VectorDistance {
    fn to_lance(self) -> DistanceType {
        match self {
            Self::L2 => DistanceType::L2,
            Self::Cosine => DistanceType::Cosine,
            Self::Dot => DistanceType::Dot,
        }
    }
}

impl FromStr for VectorDistance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            other => Err(format!("VECTOR_DISTANCE must be l2, cosine or dot, got `{}`", other)),
        }
    }
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 테이블 하나의 벡터 인덱스
#[derive(Clone)]
pub struct VectorIndex {
    table: lancedb::table::Table,
    schema: Schema,
    distance: VectorDistance,
}

impl VectorIndex {
    pub(crate) fn new(table: lancedb::table::Table, schema: Schema, distance: VectorDistance) -> Self {
        Self {
            table,
            schema,
            distance,
        }
    }

    /// 레코드 배치 추가
    ///
    /// # Arguments
    /// * `records` - 스키마 차원에 맞춰진 레코드
    /// * `first_id` - 첫 레코드의 행 ID
    pub async fn add(&self, records: &[Record], first_id: i64) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.schema.to_batch(records, first_id)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table.add(batches).execute().await?;

        tracing::debug!("Added {} rows to {}", records.len(), self.table.name());
        Ok(records.len())
    }

    /// 행 개수
    pub async fn count(&self) -> Result<usize> {
        Ok(self.table.count_rows(None).await?)
    }

    /// 벡터 검색
    ///
    /// 거리 오름차순으로 최대 `limit`개를 반환합니다. 점수는 거리 그대로입니다.
    pub async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<RetrievedRecord>> {
        if query.len() != self.schema.vector_dim() {
            return Err(Error::invalid(format!(
                "query vector has {} dimensions, table expects {}",
                query.len(),
                self.schema.vector_dim()
            )));
        }

        let stream = self
            .table
            .vector_search(query.to_vec())?
            .distance_type(self.distance.to_lance())
            .limit(limit)
            .execute()
            .await?;
        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            let columns = BatchColumns::from_batch(batch)?;
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| {
                    Error::Storage(StorageError::Layout(format!("missing {} column", DISTANCE_COLUMN)))
                })?;

            for i in 0..batch.num_rows() {
                let (id, record) = columns.row(i)?;
                results.push(RetrievedRecord {
                    id,
                    text: record.text,
                    vector: record.vector,
                    score: distances.value(i),
                    source: HitSource::Vector,
                });
            }
        }

        results.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    /// 행 ID로 레코드 조회
    pub async fn fetch(&self, ids: &[i64]) -> Result<HashMap<i64, Record>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        // id는 i64로 검증된 값만 필터에 들어감
        let id_list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
        let stream = self
            .table
            .query()
            .only_if(format!("{} IN ({})", ID_FIELD, id_list))
            .limit(ids.len())
            .execute()
            .await?;
        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        records_by_id(&batches)
    }

    /// 전체 행 조회 (ID -> 레코드)
    pub async fn scan(&self) -> Result<HashMap<i64, Record>> {
        let rows = self.count().await?;
        if rows == 0 {
            return Ok(HashMap::new());
        }

        let stream = self.table.query().limit(rows).execute().await?;
        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        records_by_id(&batches)
    }

    /// `first_id` 이상의 행 삭제
    pub async fn remove_from(&self, first_id: i64) -> Result<()> {
        self.table
            .delete(&format!("{} >= {}", ID_FIELD, first_id))
            .await?;
        tracing::debug!("Removed rows from id {} in {}", first_id, self.table.name());
        Ok(())
    }

    /// ANN 인덱스 생성
    ///
    /// 행 수가 `MIN_ROWS_FOR_ANN_INDEX` 미만이면 전수 검색을 유지하고 `false`를 반환합니다.
    pub async fn build(&self) -> Result<bool> {
        let rows = self.count().await?;
        if rows < MIN_ROWS_FOR_ANN_INDEX {
            tracing::info!(
                "Skipping ANN index for {} ({} rows < {}), exhaustive search stays in use",
                self.table.name(),
                rows,
                MIN_ROWS_FOR_ANN_INDEX
            );
            return Ok(false);
        }

        let index = Index::IvfPq(IvfPqIndexBuilder::default().distance_type(self.distance.to_lance()));
        self.table
            .create_index(&[self.schema.vector_field()], index)
            .execute()
            .await?;

        tracing::info!("Built ANN index for {} ({} rows)", self.table.name(), rows);
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
