//! BM25 키워드 인덱스 - SQLite FTS5
//!
//! 데이터 위치마다 SQLite 파일 하나를 두고, 테이블마다 FTS5 가상 테이블을 만듭니다.
//! 토크나이저: porter 스테밍(영어) + unicode61 + ASCII 폴딩(remove_diacritics).
//!
//! source: https://www.sqlite.org/fts5.html

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::{Error, Result, StorageError};

/// FTS5 토크나이저 설정 (영어 스테밍 + ASCII 폴딩)
pub const TOKENIZER: &str = "porter unicode61 remove_diacritics 2";

// ============================================================================
// Types
// ============================================================================

/// BM25 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    /// 행 ID (벡터 테이블의 id 컬럼)
    pub id: i64,
    /// BM25 점수 (높을수록 관련)
    pub score: f32,
}

// ============================================================================
// LexicalIndex
// ============================================================================

/// 데이터 위치 하나의 BM25 인덱스 저장소
#[derive(Clone)]
pub struct LexicalIndex {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl LexicalIndex {
    /// 인덱스 파일 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        };
        index.initialize()?;
        Ok(index)
    }

    /// 메모리 인덱스 (저장된 인덱스가 없는 테이블의 일회성 검색용)
    pub fn open_in_memory() -> Result<Self> {
        let index = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: PathBuf::from(":memory:"),
        };
        index.initialize()?;
        Ok(index)
    }

    /// 파일이 있을 때만 열기
    pub fn open_existing(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            Self::open(path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Storage(StorageError::Lock(e.to_string())))
    }

    /// 레지스트리 테이블 생성
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS lexical_indexes (
                table_name TEXT PRIMARY KEY,
                fts_table TEXT NOT NULL,
                tokenizer TEXT NOT NULL,
                built_at TEXT NOT NULL
            )",
            [],
        )?;
        tracing::debug!("Lexical index store initialized at {:?}", self.path);
        Ok(())
    }

    /// 테이블의 BM25 인덱스 존재 여부
    pub fn has_index(&self, table: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT fts_table FROM lexical_indexes WHERE table_name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// BM25 인덱스 생성 (기존 인덱스는 교체)
    ///
    /// # Arguments
    /// * `table` - 테이블 이름
    /// * `rows` - (행 ID, 텍스트) 목록
    pub fn build(&self, table: &str, rows: &[(i64, &str)]) -> Result<usize> {
        let fts = fts_table_name(table);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {fts};
             CREATE VIRTUAL TABLE {fts} USING fts5(text, tokenize = '{TOKENIZER}');"
        ))?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {} (rowid, text) VALUES (?1, ?2)", fts))?;
            for (id, text) in rows {
                stmt.execute(params![id, text])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO lexical_indexes (table_name, fts_table, tokenizer, built_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![table, fts, TOKENIZER, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::info!("Built BM25 index for {} with {} rows", table, rows.len());
        Ok(rows.len())
    }

    /// 기존 BM25 인덱스에 행 추가
    pub fn insert(&self, table: &str, rows: &[(i64, &str)]) -> Result<usize> {
        if !self.has_index(table)? {
            return Err(Error::LexicalIndexNotBuilt {
                table: table.to_string(),
            });
        }

        let fts = fts_table_name(table);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {} (rowid, text) VALUES (?1, ?2)", fts))?;
            for (id, text) in rows {
                stmt.execute(params![id, text])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// BM25 검색
    ///
    /// 쿼리의 단어들을 OR로 결합해 점수 내림차순으로 최대 `limit`개를 반환합니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search(&self, table: &str, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        if !self.has_index(table)? {
            return Err(Error::LexicalIndexNotBuilt {
                table: table.to_string(),
            });
        }

        let match_query = build_match_query(query);
        if match_query.is_empty() {
            return Ok(vec![]);
        }

        let fts = fts_table_name(table);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, bm25({fts}) FROM {fts}
             WHERE {fts} MATCH ?1
             ORDER BY bm25({fts})
             LIMIT ?2"
        ))?;

        let hits = stmt
            .query_map(params![match_query, limit as i64], |row| {
                let rank: f64 = row.get(1)?;
                Ok(LexicalHit {
                    id: row.get(0)?,
                    // FTS5 bm25()는 음수 (작을수록 관련)
                    score: -rank as f32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(hits)
    }

    /// BM25 인덱스 삭제
    pub fn drop_index(&self, table: &str) -> Result<bool> {
        let fts = fts_table_name(table);
        let conn = self.lock()?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", fts))?;
        let removed = conn.execute(
            "DELETE FROM lexical_indexes WHERE table_name = ?1",
            params![table],
        )?;
        Ok(removed > 0)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 테이블 이름을 FTS5 테이블 식별자로 변환 (hex 인코딩)
fn fts_table_name(table: &str) -> String {
    let hex: String = table.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("fts_{}", hex)
}

/// FTS5 MATCH 쿼리 생성
///
/// 영숫자가 아닌 문자로 단어를 나누고 각 단어를 따옴표로 감싸 OR로 결합합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_match_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_index() -> (TempDir, LexicalIndex) {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::open(&dir.path().join("nested").join("_lexical.db")).unwrap();
        (dir, index)
    }

    const ROWS: [(i64, &str); 3] = [
        (0, "hi I am Harris"),
        (1, "the hypotenuse is the square root of the sum of the other sides squared"),
        (2, "Café owners are resuming operations"),
    ];

    #[test]
    fn test_build_match_query() {
        assert_eq!(build_match_query("what is the hypotenuse?"), "\"what\" OR \"is\" OR \"the\" OR \"hypotenuse\"");
        assert_eq!(build_match_query("  ?!  "), "");
        assert_eq!(build_match_query("AND\"OR"), "\"AND\" OR \"OR\"");
    }

    #[test]
    fn test_fts_table_name_is_identifier_safe() {
        assert_eq!(fts_table_name("test"), "fts_74657374");
        assert!(fts_table_name("my-table.v2")
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_search_question_finds_record() {
        let (_dir, index) = create_test_index();
        index.build("test", &ROWS).unwrap();

        let hits = index.search("test", "what is the hypotenuse?", 2).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.len() <= 2);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_search_uses_stemming_and_folding() {
        let (_dir, index) = create_test_index();
        index.build("test", &ROWS).unwrap();

        // porter: "resume" ~ "resuming"
        let hits = index.search("test", "resume", 5).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2]);

        // remove_diacritics: "cafe" ~ "Café"
        let hits = index.search("test", "cafe", 5).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_search_orders_by_descending_score() {
        let (_dir, index) = create_test_index();
        index
            .build(
                "scores",
                &[
                    (0, "rust"),
                    (1, "rust rust rust language"),
                    (2, "python"),
                ],
            )
            .unwrap();

        let hits = index.search("scores", "rust", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_missing_index_is_reported() {
        let (_dir, index) = create_test_index();
        assert!(!index.has_index("none").unwrap());
        assert!(matches!(
            index.search("none", "query", 1),
            Err(Error::LexicalIndexNotBuilt { .. })
        ));
    }

    #[test]
    fn test_insert_and_drop() {
        let (_dir, index) = create_test_index();
        index.build("test", &ROWS[..1]).unwrap();
        index.insert("test", &[(7, "appended hypotenuse row")]).unwrap();

        let hits = index.search("test", "hypotenuse", 5).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![7]);

        assert!(index.drop_index("test").unwrap());
        assert!(!index.has_index("test").unwrap());
        assert!(!index.drop_index("test").unwrap());
    }

    #[test]
    fn test_rebuild_replaces_rows() {
        let (_dir, index) = create_test_index();
        index.build("test", &ROWS).unwrap();
        index.build("test", &[(0, "fresh content")]).unwrap();

        assert!(index.search("test", "hypotenuse", 5).unwrap().is_empty());
        assert_eq!(index.search("test", "fresh", 5).unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_index() {
        let index = LexicalIndex::open_in_memory().unwrap();
        index.build("scratch", &ROWS).unwrap();
        let hits = index.search("scratch", "square root", 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_open_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("_lexical.db");
        assert!(LexicalIndex::open_existing(&path).unwrap().is_none());
        LexicalIndex::open(&path).unwrap();
        assert!(LexicalIndex::open_existing(&path).unwrap().is_some());
    }
}
