//! Hybrid Retriever - 덴스 + 렉시컬 융합 검색과 수집 파이프라인
//!
//! 덴스 벡터 유사도(시맨틱)와 BM25 키워드 스코어를 가중 융합해
//! 하나의 랭킹을 만듭니다. 렉시컬 신호가 없으면 덴스 전용으로
//! 조용히 강등됩니다. 외부 서비스 실패는 이 경계에서 잡아 빈
//! 결과로 바꿉니다 - 호출자가 전체 문서 폴백을 결정할 수 있도록.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::embedding::{create_embedder, EmbeddingProvider, EmbeddingTask};

use super::chunker::{strip_xbrl_noise, ChunkerConfig, SectionChunker};
use super::lance::LanceVectorStore;
use super::lexical::{LexicalCache, LexicalHit};
use super::store::{get_data_dir, normalize_ticker, FilingStore, NewFiling};
use super::vector::{EmbeddingRecord, SectionPayload, VectorStore};

// ============================================================================
// Configuration
// ============================================================================

/// 융합 스코어링 설정
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// 덴스 스코어 가중치 (렉시컬은 1 - dense_weight)
    pub dense_weight: f32,
    /// 원시 BM25 스코어 정규화 분모 (나눈 뒤 1.0으로 클램프)
    pub lexical_norm_divisor: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            lexical_norm_divisor: 10.0,
        }
    }
}

/// 융합 시 중복 제거 키로 쓰는 텍스트 프리픽스 길이 (문자)
const DEDUP_KEY_CHARS: usize = 100;

/// 업서트 배치 크기
const UPSERT_BATCH_SIZE: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// 랭킹된 섹션 - 한 번의 검색 호출 안에서만 존재 (비영속)
#[derive(Debug, Clone)]
pub struct RankedSection {
    /// 섹션 라벨
    pub section: String,
    /// 청크 원문
    pub text: String,
    /// 최종 융합 스코어
    pub score: f32,
    /// 덴스 유사도 스코어
    pub dense_score: f32,
    /// 원시 BM25 스코어
    pub lexical_score: f32,
    /// 저장된 페이로드 전체
    pub payload: SectionPayload,
}

/// 수집 결과 요약
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub ticker: String,
    pub year: String,
    /// 방출된 청크 수 (0이면 색인 불가 문서)
    pub chunk_count: usize,
    /// 덴스 인덱스에 업서트된 레코드 수
    pub indexed_count: usize,
}

/// 저장소 통계
#[derive(Debug, Clone)]
pub struct RetrieverStats {
    pub filing_count: usize,
    pub ticker_count: usize,
    pub vector_count: usize,
    pub cached_lexical_tickers: usize,
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// 검색 경계 오류
///
/// 폴백을 결정할 수 있는 가장 가까운 층까지만 전파하고,
/// `retrieve`에서 빈 결과로 변환합니다.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 질의 임베딩 실패 (외부 임베딩 서비스)
    #[error("query embedding failed: {0}")]
    Embedding(anyhow::Error),
    /// 벡터 스토어 질의 실패 (외부 서비스)
    #[error("vector store query failed: {0}")]
    Store(anyhow::Error),
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 명시적으로 주입되는 서비스 객체들(문서 저장소, 벡터 스토어,
/// 임베더)로 구성됩니다. 전역 싱글턴 없음 - 테스트에서 가짜 구현을
/// 주입할 수 있습니다.
pub struct HybridRetriever {
    store: FilingStore,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: SectionChunker,
    lexical: LexicalCache,
    config: FusionConfig,
}

impl HybridRetriever {
    /// 기본 데이터 디렉토리(~/.edgar-rag/)로 생성
    pub async fn new() -> Result<Self> {
        let data_dir = get_data_dir();
        Self::with_data_dir(&data_dir).await
    }

    /// 지정된 데이터 디렉토리로 생성
    pub async fn with_data_dir(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let db_path = data_dir.join("filings.db");
        let store = FilingStore::open(&db_path).context("Failed to open filing store")?;

        let lance_path = data_dir.join("sections.lance");
        let vector = LanceVectorStore::open(&lance_path)
            .await
            .context("Failed to open vector store")?;

        let embedder = create_embedder().context("Failed to create embedder")?;

        Ok(Self::with_services(
            store,
            Arc::new(vector),
            Arc::new(embedder),
            FusionConfig::default(),
        ))
    }

    /// 서비스 주입 생성자
    pub fn with_services(
        store: FilingStore,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: FusionConfig,
    ) -> Self {
        Self {
            store,
            vector,
            embedder,
            chunker: SectionChunker::new(ChunkerConfig::default()),
            lexical: LexicalCache::new(),
            config,
        }
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// 제출 문서 수집 (노이즈 제거 -> 청킹 -> 저장 -> 임베딩 교체)
    ///
    /// 같은 티커의 기존 임베딩 레코드는 삭제 후 교체됩니다
    /// (패치가 아닌 전체 재수집).
    pub async fn ingest_filing(
        &self,
        ticker: &str,
        year: &str,
        content: &str,
        file_path: Option<&str>,
    ) -> Result<IngestReport> {
        let ticker = normalize_ticker(ticker)?;

        let cleaned = strip_xbrl_noise(content);
        let chunks = self.chunker.chunk(&cleaned, &ticker);

        // 전체 문서는 폴백용으로 항상 저장
        self.store.upsert_filing(NewFiling {
            ticker: ticker.clone(),
            year: year.to_string(),
            content: cleaned.clone(),
            file_path: file_path.map(str::to_string),
        })?;

        if chunks.is_empty() {
            tracing::warn!("No indexable chunks for {} {}", ticker, year);
            return Ok(IngestReport {
                ticker,
                year: year.to_string(),
                chunk_count: 0,
                indexed_count: 0,
            });
        }

        // 기존 레코드 제거 (교체 의미론)
        self.vector
            .delete_by_ticker(&ticker)
            .await
            .context("Failed to delete stale records")?;

        let source_path = file_path.unwrap_or("(inline)");
        let mut batch: Vec<EmbeddingRecord> = Vec::new();
        let mut indexed = 0usize;

        for chunk in &chunks {
            let embedding = self
                .embedder
                .embed(&chunk.text, EmbeddingTask::Document)
                .await
                .context("Failed to embed chunk")?;

            batch.push(EmbeddingRecord::new(
                embedding,
                SectionPayload::from_chunk(chunk, year, source_path),
            ));

            if batch.len() >= UPSERT_BATCH_SIZE {
                indexed += self.vector.upsert_batch(&batch).await?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            indexed += self.vector.upsert_batch(&batch).await?;
        }

        // 재수집 후 렉시컬 인덱스는 다음 질의 때 새로 빌드
        self.lexical.invalidate(&ticker);

        tracing::info!(
            "Ingested {} {} ({} chunks, {} indexed)",
            ticker,
            year,
            chunks.len(),
            indexed
        );

        Ok(IngestReport {
            ticker,
            year: year.to_string(),
            chunk_count: chunks.len(),
            indexed_count: indexed,
        })
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// 하이브리드 검색
    ///
    /// # Arguments
    /// * `query` - 자연어 질의
    /// * `ticker` - 대상 티커
    /// * `limit` - 최대 결과 수
    /// * `use_hybrid` - false면 덴스 전용 랭킹
    ///
    /// # Returns
    /// 최종 스코어 내림차순 랭킹 (길이 <= limit). 외부 서비스 실패는
    /// 여기서 잡아 빈 목록으로 반환합니다 - 예외를 던지지 않습니다.
    pub async fn retrieve(
        &self,
        query: &str,
        ticker: &str,
        limit: usize,
        use_hybrid: bool,
    ) -> Result<Vec<RankedSection>> {
        let ticker = normalize_ticker(ticker)?;

        if !use_hybrid {
            return Ok(self.dense_search_or_empty(query, &ticker, limit).await);
        }

        // 융합 후 한쪽 신호가 굶지 않도록 후보 풀을 2배로 넓힘
        let dense = self.dense_search_or_empty(query, &ticker, limit * 2).await;
        let lexical = self.lexical_search(query, &ticker, limit * 2).await;

        if lexical.is_empty() {
            // 렉시컬 신호 없음: 덴스 전용으로 강등 (limit 재적용)
            let mut dense = dense;
            dense.truncate(limit);
            return Ok(dense);
        }

        Ok(Self::fuse(&self.config, dense, lexical, limit))
    }

    /// 덴스 검색, 실패 시 경고 로그 후 빈 목록
    async fn dense_search_or_empty(
        &self,
        query: &str,
        ticker: &str,
        limit: usize,
    ) -> Vec<RankedSection> {
        match self.dense_search(query, ticker, limit).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Dense search failed: {}", e);
                vec![]
            }
        }
    }

    /// 덴스 벡터 검색
    async fn dense_search(
        &self,
        query: &str,
        ticker: &str,
        limit: usize,
    ) -> Result<Vec<RankedSection>, RetrievalError> {
        let query_embedding = self
            .embedder
            .embed(query, EmbeddingTask::Query)
            .await
            .map_err(RetrievalError::Embedding)?;

        let hits = self
            .vector
            .search(&query_embedding, ticker, limit)
            .await
            .map_err(RetrievalError::Store)?;

        Ok(hits
            .into_iter()
            .map(|hit| RankedSection {
                section: hit.payload.section.clone(),
                text: hit.payload.text.clone(),
                score: hit.similarity,
                dense_score: hit.similarity,
                lexical_score: 0.0,
                payload: hit.payload,
            })
            .collect())
    }

    /// 렉시컬 검색 (인덱스 없으면 빈 목록)
    async fn lexical_search(&self, query: &str, ticker: &str, limit: usize) -> Vec<LexicalHit> {
        match self.lexical.get_or_build(ticker, self.vector.as_ref()).await {
            Some(index) => index.search(query, limit),
            None => vec![],
        }
    }

    /// 가중 융합
    ///
    /// 1. 텍스트 프리픽스 키로 두 풀의 중복을 병합 (같은 청크는 한 레코드)
    /// 2. 덴스는 그대로, 렉시컬은 분모로 나눠 [0, 1]로 정규화
    /// 3. final = w * dense + (1 - w) * lexical_norm
    /// 4. 안정 정렬 내림차순 (동점은 원래 덴스 순위 유지), limit로 절단
    fn fuse(
        config: &FusionConfig,
        dense: Vec<RankedSection>,
        lexical: Vec<LexicalHit>,
        limit: usize,
    ) -> Vec<RankedSection> {
        let mut merged: Vec<RankedSection> = Vec::with_capacity(dense.len() + lexical.len());
        let mut index_by_key: HashMap<String, usize> = HashMap::new();

        for result in dense {
            let key = dedup_key(&result.text);
            index_by_key.insert(key, merged.len());
            merged.push(result);
        }

        for hit in lexical {
            let key = dedup_key(&hit.payload.text);
            match index_by_key.get(&key) {
                Some(&i) => {
                    merged[i].lexical_score = hit.score;
                }
                None => {
                    index_by_key.insert(key, merged.len());
                    merged.push(RankedSection {
                        section: hit.payload.section.clone(),
                        text: hit.payload.text.clone(),
                        score: 0.0,
                        dense_score: 0.0,
                        lexical_score: hit.score,
                        payload: hit.payload,
                    });
                }
            }
        }

        for result in &mut merged {
            let lexical_norm = (result.lexical_score / config.lexical_norm_divisor).min(1.0);
            result.score = config.dense_weight * result.dense_score
                + (1.0 - config.dense_weight) * lexical_norm;
        }

        // sort_by는 안정 정렬: 동점은 덴스 풀의 원래 순서를 유지
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        merged
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// 내부 문서 저장소 접근
    pub fn store(&self) -> &FilingStore {
        &self.store
    }

    /// 저장소 통계
    pub async fn stats(&self) -> Result<RetrieverStats> {
        let store_stats = self.store.stats()?;
        let vector_count = self.vector.count().await?;

        Ok(RetrieverStats {
            filing_count: store_stats.filing_count,
            ticker_count: store_stats.ticker_count,
            vector_count,
            cached_lexical_tickers: self.lexical.cached_tickers(),
        })
    }
}

/// 중복 제거 키: 텍스트 앞 100문자
fn dedup_key(text: &str) -> String {
    text.chars().take(DEDUP_KEY_CHARS).collect()
}

// ============================================================================
// Tests
// ============================================================================
