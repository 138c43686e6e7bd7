//! rag-search CLI 진입점

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // 로깅 초기화 (RUST_LOG 우선, 없으면 LOG_LEVEL)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(rag_search::config::log_level(|key| std::env::var(key).ok()))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // CLI 실행
    let cli = rag_search::cli::Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(rag_search::cli::run(cli))
}
