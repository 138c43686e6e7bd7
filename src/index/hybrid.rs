//! 하이브리드 검색 - 벡터 + BM25 결과 통합
//!
//! 기본 정책은 단순 연결(concat)입니다. 두 경로의 결과를 중복 제거나
//! 점수 정규화 없이 이어 붙이며, 각 결과는 자기 경로의 점수를 유지합니다.
//! RRF (Reciprocal Rank Fusion)는 명시적으로 선택하는 확장 정책입니다.
//!
//! BM25 인덱스가 없는 테이블은 전체 행으로 메모리 FTS5 인덱스를 만들어
//! 같은 방식으로 점수를 매깁니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::lexical::{LexicalHit, LexicalIndex};
use super::schema::Record;
use super::vector::VectorIndex;
use crate::embedding::EmbeddingFunction;
use crate::error::{EmbeddingError, Error, Result};

/// RRF 기본 상수
pub const DEFAULT_RRF_K: f32 = 60.0;

// ============================================================================
// Types
// ============================================================================

/// 검색 모드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// 벡터 검색만
    Vector,
    /// BM25 키워드 검색만
    #[serde(alias = "bm25", alias = "fts")]
    Lexical,
    /// 두 검색 모두
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn includes_vector(self) -> bool {
        matches!(self, Self::Vector | Self::Hybrid)
    }

    pub fn includes_lexical(self) -> bool {
        matches!(self, Self::Lexical | Self::Hybrid)
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "lexical" | "bm25" | "fts" => Ok(Self::Lexical),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("search type must be vector, lexical or hybrid, got `{}`", other)),
        }
    }
}

/// 결과를 찾은 검색 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    Vector,
    Lexical,
    /// RRF로 병합된 결과 (두 경로 모두에서 발견)
    Both,
}

/// 검색 결과 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedRecord {
    /// 행 ID
    pub id: i64,
    pub text: String,
    pub vector: Vec<f32>,
    /// 경로별 원래 점수 (벡터: 거리, 낮을수록 유사 / BM25: 높을수록 관련)
    pub score: f32,
    pub source: HitSource,
}

// ============================================================================
// FusionPolicy
// ============================================================================

/// 하이브리드 결과 통합 정책
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum FusionPolicy {
    /// 벡터 결과 뒤에 BM25 결과를 그대로 연결
    #[default]
    Concat,
    /// 행 ID 기준 중복 제거 후 RRF 점수로 정렬
    ReciprocalRank { k: f32 },
}

impl FusionPolicy {
    /// 두 경로의 결과 통합
    pub fn fuse(&self, vector: Vec<RetrievedRecord>, lexical: Vec<RetrievedRecord>) -> Vec<RetrievedRecord> {
        match *self {
            Self::Concat => vector.into_iter().chain(lexical).collect(),
            Self::ReciprocalRank { k } => rrf_merge(vector, lexical, k),
        }
    }
}

/// RRF (Reciprocal Rank Fusion)
///
/// RRF Score = sum(1 / (k + rank)), rank는 1부터 시작
fn rrf_merge(vector: Vec<RetrievedRecord>, lexical: Vec<RetrievedRecord>, k: f32) -> Vec<RetrievedRecord> {
    let mut merged: HashMap<i64, RetrievedRecord> = HashMap::new();

    for list in [vector, lexical] {
        for (rank, record) in list.into_iter().enumerate() {
            let contribution = 1.0 / (k + rank as f32 + 1.0);
            match merged.get_mut(&record.id) {
                Some(existing) => {
                    existing.score += contribution;
                    if existing.source != record.source {
                        existing.source = HitSource::Both;
                    }
                }
                None => {
                    merged.insert(
                        record.id,
                        RetrievedRecord {
                            score: contribution,
                            ..record
                        },
                    );
                }
            }
        }
    }

    let mut results: Vec<RetrievedRecord> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    results
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 한 테이블의 벡터 인덱스와 (있다면) BM25 인덱스를 조회합니다.
pub struct HybridRetriever<'a> {
    embedder: &'a dyn EmbeddingFunction,
    table: &'a str,
    vectors: &'a VectorIndex,
    lexical: Option<&'a LexicalIndex>,
    fusion: FusionPolicy,
}

impl<'a> HybridRetriever<'a> {
    /// # Arguments
    /// * `embedder` - 쿼리 벡터화에 쓰는 임베딩 함수
    /// * `table` - 테이블 이름
    /// * `vectors` - 테이블의 벡터 인덱스
    /// * `lexical` - BM25 인덱스 (없으면 None)
    pub fn new(
        embedder: &'a dyn EmbeddingFunction,
        table: &'a str,
        vectors: &'a VectorIndex,
        lexical: Option<&'a LexicalIndex>,
    ) -> Self {
        Self {
            embedder,
            table,
            vectors,
            lexical,
            fusion: FusionPolicy::Concat,
        }
    }

    pub fn with_fusion(mut self, fusion: FusionPolicy) -> Self {
        self.fusion = fusion;
        self
    }

    /// 검색 실행
    ///
    /// 단일 모드는 최대 `top_n`개, 하이브리드는 최대 `2 * top_n`개를 반환합니다.
    pub async fn search(&self, query: &str, top_n: usize, mode: SearchMode) -> Result<Vec<RetrievedRecord>> {
        if top_n == 0 {
            return Err(Error::invalid("top_n must be greater than 0"));
        }

        let vector_hits = if mode.includes_vector() {
            self.search_vector(query, top_n).await?
        } else {
            vec![]
        };

        let lexical_hits = if mode.includes_lexical() {
            match self.lexical {
                Some(lexical) => self.search_lexical(lexical, query, top_n).await?,
                None => self.scan_lexical(query, top_n).await?,
            }
        } else {
            vec![]
        };

        tracing::debug!(
            "Search on {}: {} vector hits, {} lexical hits",
            self.table,
            vector_hits.len(),
            lexical_hits.len()
        );
        Ok(self.fusion.fuse(vector_hits, lexical_hits))
    }

    /// 벡터 검색 (쿼리 임베딩 후 ANN)
    async fn search_vector(&self, query: &str, top_n: usize) -> Result<Vec<RetrievedRecord>> {
        let embedding = self.embedder.encode_one(query).await?;
        if embedding.len() != self.embedder.dimensionality() {
            return Err(EmbeddingError::response(format!(
                "query embedding has {} dimensions, expected {}",
                embedding.len(),
                self.embedder.dimensionality()
            ))
            .into());
        }
        self.vectors.search(&embedding, top_n).await
    }

    /// BM25 검색 후 벡터 컬럼 조회
    async fn search_lexical(
        &self,
        lexical: &LexicalIndex,
        query: &str,
        top_n: usize,
    ) -> Result<Vec<RetrievedRecord>> {
        let hits = lexical.search(self.table, query, top_n)?;
        if hits.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        let rows = self.vectors.fetch(&ids).await?;
        Ok(self.join_rows(hits, rows))
    }

    /// 저장된 BM25 인덱스 없이 검색
    ///
    /// 전체 행을 읽어 메모리 FTS5 인덱스를 만든 뒤 같은 BM25 쿼리를 실행합니다.
    async fn scan_lexical(&self, query: &str, top_n: usize) -> Result<Vec<RetrievedRecord>> {
        tracing::debug!("Table {} has no BM25 index, scoring all rows in memory", self.table);
        let rows = self.vectors.scan().await?;
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let mut entries: Vec<(i64, &str)> = rows.iter().map(|(id, r)| (*id, r.text.as_str())).collect();
        entries.sort_by_key(|(id, _)| *id);

        let scratch = LexicalIndex::open_in_memory()?;
        scratch.build(self.table, &entries)?;
        let hits = scratch.search(self.table, query, top_n)?;

        Ok(self.join_rows(hits, rows))
    }

    /// BM25 결과에 행 내용 결합 (BM25 순서 유지)
    fn join_rows(&self, hits: Vec<LexicalHit>, mut rows: HashMap<i64, Record>) -> Vec<RetrievedRecord> {
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match rows.remove(&hit.id) {
                Some(record) => results.push(RetrievedRecord {
                    id: hit.id,
                    text: record.text,
                    vector: record.vector,
                    score: hit.score,
                    source: HitSource::Lexical,
                }),
                None => tracing::warn!("BM25 hit {} missing from table {}", hit.id, self.table),
            }
        }
        results
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, score: f32, source: HitSource) -> RetrievedRecord {
        RetrievedRecord {
            id,
            text: format!("record {}", id),
            vector: vec![],
            score,
            source,
        }
    }

    #[test]
    fn test_search_mode_parsing() {
        assert_eq!("vector".parse::<SearchMode>().unwrap(), SearchMode::Vector);
        assert_eq!("BM25".parse::<SearchMode>().unwrap(), SearchMode::Lexical);
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("semantic".parse::<SearchMode>().is_err());

        let mode: SearchMode = serde_json::from_str("\"lexical\"").unwrap();
        assert_eq!(mode, SearchMode::Lexical);
        assert_eq!(SearchMode::default(), SearchMode::Hybrid);
    }

    #[test]
    fn test_concat_keeps_duplicates_and_native_scores() {
        let vector = vec![hit(1, 0.2, HitSource::Vector), hit(2, 0.9, HitSource::Vector)];
        let lexical = vec![hit(1, 3.5, HitSource::Lexical)];

        let fused = FusionPolicy::Concat.fuse(vector, lexical);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].id, 1);
        assert_eq!(fused[0].score, 0.2);
        assert_eq!(fused[2].id, 1);
        assert_eq!(fused[2].score, 3.5);
        assert_eq!(fused[2].source, HitSource::Lexical);
    }

    #[test]
    fn test_rrf_dedupes_and_ranks_overlap_first() {
        let vector = vec![hit(1, 0.1, HitSource::Vector), hit(2, 0.5, HitSource::Vector)];
        let lexical = vec![hit(3, 9.0, HitSource::Lexical), hit(1, 4.0, HitSource::Lexical)];

        let fused = FusionPolicy::ReciprocalRank { k: DEFAULT_RRF_K }.fuse(vector, lexical);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].id, 1);
        assert_eq!(fused[0].source, HitSource::Both);
        // 1/(60+1) + 1/(60+2)
        assert!((fused[0].score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-6);
        // 2위 동점은 id 순
        assert_eq!(fused[1].id, 2);
        assert_eq!(fused[2].id, 3);
    }

    #[test]
    fn test_rrf_score_decreases_with_rank() {
        let vector = (0..5).map(|i| hit(i, 0.0, HitSource::Vector)).collect();
        let fused = FusionPolicy::ReciprocalRank { k: 10.0 }.fuse(vector, vec![]);
        for pair in fused.windows(2) {
            assert!(pair[0].score > pair[1].score);
        }
    }
}
