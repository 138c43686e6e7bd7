//! 서비스 모듈 - 외부 호출자용 파사드와 요청/응답 타입

mod api;
mod manager;

pub use api::{
    AppendData, AppendResult, ApiError, ErrorResponse, IndexResult, InitFromData, InitResult,
    InitStatus, SearchHit, SearchIndex, SearchResponse, TableRef, Text, DEFAULT_TOP_N,
};
pub use manager::{IndexManager, PING_RESPONSE};
