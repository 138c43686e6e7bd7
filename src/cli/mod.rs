//! CLI 모듈
//!
//! rag-search CLI 명령어 정의 및 구현. 각 명령은 환경변수 설정으로
//! `IndexManager`를 만들고 응답을 JSON으로 출력합니다.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::Config;
use crate::index::SearchMode;
use crate::service::{
    AppendData, ApiError, IndexManager, InitFromData, InitStatus, SearchIndex, TableRef, Text,
    DEFAULT_TOP_N, PING_RESPONSE,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "rag-search")]
#[command(version, about = "하이브리드 검색 엔진 (벡터 + BM25)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 테이블 지정 인자
#[derive(Args, Debug, Clone)]
pub struct TableArgs {
    /// 데이터 위치 (로컬 경로 또는 s3:// URI)
    #[arg(short = 'l', long = "data-location")]
    pub data_location: String,

    /// 테이블 이름
    #[arg(short, long)]
    pub table: String,
}

/// 입력 텍스트 인자
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// 색인할 텍스트 (여러 번 지정 가능)
    #[arg(long = "text")]
    pub texts: Vec<String>,

    /// 한 줄에 텍스트 하나씩 담긴 파일
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트로 새 테이블 생성
    Init {
        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        input: InputArgs,

        /// BM25 인덱스 생성
        #[arg(long)]
        bm25: bool,
    },

    /// 기존 테이블에 텍스트 추가
    Append {
        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        input: InputArgs,
    },

    /// 테이블 검색
    Search {
        /// 검색 쿼리
        query: String,

        #[command(flatten)]
        table: TableArgs,

        /// 경로별 결과 개수
        #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_N)]
        top_n: i64,

        /// 검색 모드 (vector, lexical, hybrid)
        #[arg(short, long, default_value = "hybrid")]
        mode: SearchMode,
    },

    /// 테이블 삭제
    Drop {
        #[command(flatten)]
        table: TableArgs,
    },

    /// ANN 벡터 인덱스 생성
    Index {
        #[command(flatten)]
        table: TableArgs,
    },

    /// 상태 확인
    Ping,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Ping = cli.command {
        return print_json(&PING_RESPONSE);
    }

    let config = Config::from_env().context("설정 로드 실패")?;
    let manager = IndexManager::from_config(config).context("IndexManager 초기화 실패")?;

    match cli.command {
        Commands::Init { table, input, bm25 } => cmd_init(&manager, table, input, bm25).await,
        Commands::Append { table, input } => cmd_append(&manager, table, input).await,
        Commands::Search {
            query,
            table,
            top_n,
            mode,
        } => cmd_search(&manager, query, table, top_n, mode).await,
        Commands::Drop { table } => cmd_drop(&manager, table).await,
        Commands::Index { table } => cmd_index(&manager, table).await,
        Commands::Ping => print_json(&PING_RESPONSE),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 테이블 생성 명령어 (init)
async fn cmd_init(manager: &IndexManager, table: TableArgs, input: InputArgs, bm25: bool) -> Result<()> {
    let data = read_input(input)?;
    let result = manager
        .init_from_data(InitFromData {
            data_location: table.data_location,
            table_name: table.table,
            bm25_index: bm25,
            data,
        })
        .await;

    print_json(&result)?;
    if result.status == InitStatus::Fail {
        bail!("테이블 생성 실패 (상세 내용은 로그 참조)");
    }
    Ok(())
}

/// 행 추가 명령어 (append)
async fn cmd_append(manager: &IndexManager, table: TableArgs, input: InputArgs) -> Result<()> {
    let data = read_input(input)?;
    let result = manager
        .append_data(AppendData {
            data_location: table.data_location,
            table_name: table.table,
            data,
        })
        .await;
    print_response(result)
}

/// 검색 명령어 (search)
async fn cmd_search(
    manager: &IndexManager,
    query: String,
    table: TableArgs,
    top_n: i64,
    mode: SearchMode,
) -> Result<()> {
    let result = manager
        .search(SearchIndex {
            data_location: table.data_location,
            table_name: table.table,
            query,
            top_n,
            search_type: mode,
        })
        .await;
    print_response(result)
}

/// 삭제 명령어 (drop)
async fn cmd_drop(manager: &IndexManager, table: TableArgs) -> Result<()> {
    let table_name = table.table.clone();
    let result = manager
        .drop_table(TableRef {
            data_location: table.data_location,
            table_name: table.table,
        })
        .await
        .map(|()| serde_json::json!({ "dropped": table_name }));
    print_response(result)
}

/// ANN 인덱스 생성 명령어 (index)
async fn cmd_index(manager: &IndexManager, table: TableArgs) -> Result<()> {
    let result = manager
        .build_vector_index(TableRef {
            data_location: table.data_location,
            table_name: table.table,
        })
        .await;
    print_response(result)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 입력 텍스트 수집 (--text 인자 + 파일의 비어 있지 않은 줄)
fn read_input(input: InputArgs) -> Result<Vec<Text>> {
    let mut texts = input.texts;
    if let Some(path) = input.file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("입력 파일 읽기 실패: {:?}", path))?;
        texts.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
    }

    if texts.is_empty() {
        bail!("--text 또는 --file 중 하나를 지정해야 합니다");
    }
    Ok(texts.into_iter().map(|text| Text { text }).collect())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 성공 응답 또는 에러 본문 출력
fn print_response<T: Serialize>(result: std::result::Result<T, ApiError>) -> Result<()> {
    match result {
        Ok(response) => print_json(&response),
        Err(e) => {
            print_json(&e.body)?;
            bail!("{}", e)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
