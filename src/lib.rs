//! edgar-rag - SEC 10-K 하이브리드 RAG 시스템
//!
//! 변환된 10-K Markdown을 섹션 단위로 청킹해 LanceDB에 임베딩으로
//! 색인하고, 덴스 벡터 검색과 티커별 BM25를 가중 융합해 관련 섹션을
//! 찾은 뒤, 토큰 예산 안에서 생성 단계용 컨텍스트를 조립합니다.

pub mod cli;
pub mod collector;
pub mod embedding;
pub mod knowledge;

// Re-exports
pub use collector::{CollectedFiling, CollectionStats, CollectorConfig, FilingCollector};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbeddingProvider, EmbeddingTask, GeminiEmbedding,
};
pub use knowledge::{
    assemble_context, cosine_similarity, estimate_tokens, get_data_dir, normalize_ticker,
    strip_xbrl_noise, ChunkerConfig, DenseHit, EmbeddingRecord, Filing, FilingStore, FusionConfig,
    HybridRetriever, IngestReport, LanceVectorStore, LexicalCache, LexicalHit, LexicalIndex,
    NewFiling, RankedSection, RetrievalError, RetrieverStats, SectionChunk, SectionChunker,
    SectionPayload, StoreStats, VectorStore, DEFAULT_TOKEN_BUDGET, EMBEDDING_DIMENSION,
    INTRODUCTION_SECTION,
};
