//! Knowledge 모듈 - 10-K 하이브리드 검색 코어
//!
//! - Chunker: 10-K 섹션 구조 기반 분할 (테이블 보존)
//! - SQLite: 제출 문서 원문 저장 (전체 문서 폴백 소스)
//! - LanceDB: 청크 임베딩 벡터 검색 (티커 필터)
//! - Lexical: 티커별 BM25 인덱스 (게으른 빌드 + 캐시)
//! - Hybrid: 덴스/렉시컬 가중 융합 랭킹
//! - Context: 토큰 예산 내 컨텍스트 조립

mod chunker;
mod context;
mod hybrid;
mod lance;
mod lexical;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    strip_xbrl_noise, ChunkerConfig, SectionChunk, SectionChunker, INTRODUCTION_SECTION,
};
pub use context::{assemble_context, estimate_tokens, DEFAULT_TOKEN_BUDGET};
pub use hybrid::{
    FusionConfig, HybridRetriever, IngestReport, RankedSection, RetrievalError, RetrieverStats,
};
pub use lance::LanceVectorStore;
pub use lexical::{tokenize, LexicalCache, LexicalHit, LexicalIndex};
pub use store::{
    get_data_dir, normalize_ticker, Filing, FilingStore, NewFiling, StoreStats,
};
pub use vector::{
    cosine_similarity, DenseHit, EmbeddingRecord, SectionPayload, VectorStore,
    EMBEDDING_DIMENSION,
};
