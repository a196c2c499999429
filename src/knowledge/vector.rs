//! Vector Store - 덴스 인덱스 계약 (트레이트 및 타입)
//!
//! 청크 임베딩을 저장하는 벡터 검색 서비스의 공통 인터페이스입니다.
//! 질의 임베딩은 반드시 수집 시점과 동일한 모델/차원을 사용해야 합니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunker::SectionChunk;

/// 벡터 임베딩 차원 (Gemini gemini-embedding-001 기본값)
///
/// 수집과 질의가 같은 값을 공유해야 유사도가 의미를 가집니다.
pub const EMBEDDING_DIMENSION: i32 = 768;

// ============================================================================
// Types
// ============================================================================

/// 임베딩 레코드 페이로드
///
/// 덴스 인덱스에 청크와 함께 저장되는 메타데이터 필드 전체입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionPayload {
    /// 소유 티커
    pub ticker: String,
    /// 섹션 라벨
    pub section: String,
    /// 청크 원문
    pub text: String,
    /// 시작 줄 (0-based, inclusive)
    pub start_line: usize,
    /// 끝 줄 (0-based, exclusive)
    pub end_line: usize,
    /// 보고 연도
    pub year: String,
    /// 원본 파일 경로
    pub file_path: String,
    /// 청크 길이 (바이트)
    pub chunk_length: usize,
    /// 테이블 수 (대략치)
    pub tables_count: usize,
}

impl SectionPayload {
    /// 청크와 수집 컨텍스트에서 페이로드 구성
    pub fn from_chunk(chunk: &SectionChunk, year: &str, file_path: &str) -> Self {
        Self {
            ticker: chunk.ticker.clone(),
            section: chunk.section.clone(),
            text: chunk.text.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            year: year.to_string(),
            file_path: file_path.to_string(),
            chunk_length: chunk.byte_len(),
            tables_count: chunk.table_count(),
        }
    }
}

/// 임베딩 레코드 (저장용)
///
/// 청크 하나당 하나의 레코드. 재수집 시 티커 단위로 삭제 후 교체됩니다.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    /// 레코드 고유 ID (uuid v4)
    pub id: String,
    /// 임베딩 벡터 (EMBEDDING_DIMENSION 차원)
    pub embedding: Vec<f32>,
    /// 페이로드
    pub payload: SectionPayload,
}

impl EmbeddingRecord {
    /// 새 레코드 생성 (ID 자동 발급)
    pub fn new(embedding: Vec<f32>, payload: SectionPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            embedding,
            payload,
        }
    }
}

/// 덴스 검색 결과
#[derive(Debug, Clone)]
pub struct DenseHit {
    /// 유사도 스코어 (높을수록 유사, 대략 (0, 1])
    pub similarity: f32,
    /// 저장된 페이로드 전체
    pub payload: SectionPayload,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다. 검색과 스크롤은 항상
/// 티커 정확 일치 필터로 범위를 한정합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 레코드 배치 업서트
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<usize>;

    /// 티커 범위 내 top-K 유사도 검색
    async fn search(
        &self,
        query_embedding: &[f32],
        ticker: &str,
        limit: usize,
    ) -> Result<Vec<DenseHit>>;

    /// 티커의 모든 페이로드 조회 (렉시컬 인덱스 빌드용)
    async fn scroll_by_ticker(&self, ticker: &str) -> Result<Vec<SectionPayload>>;

    /// 티커의 레코드 전부 삭제 (재수집 시 교체)
    async fn delete_by_ticker(&self, ticker: &str) -> Result<usize>;

    /// 전체 레코드 수
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 차원이 다르거나 빈 벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> SectionChunk {
        SectionChunk {
            ticker: "AAPL".to_string(),
            section: "Revenue".to_string(),
            text: "| A | B |\n| --- | --- |\n| 1 | 2 |".to_string(),
            start_line: 10,
            end_line: 13,
        }
    }

    #[test]
    fn test_payload_from_chunk() {
        let payload = SectionPayload::from_chunk(&sample_chunk(), "2024", "data/AAPL_2024.md");

        assert_eq!(payload.ticker, "AAPL");
        assert_eq!(payload.section, "Revenue");
        assert_eq!(payload.year, "2024");
        assert_eq!(payload.start_line, 10);
        assert_eq!(payload.end_line, 13);
        assert_eq!(payload.chunk_length, payload.text.len());
        assert_eq!(payload.tables_count, 1);
    }

    #[test]
    fn test_record_ids_are_unique() {
        let payload = SectionPayload::from_chunk(&sample_chunk(), "2024", "x.md");
        let a = EmbeddingRecord::new(vec![0.0; 4], payload.clone());
        let b = EmbeddingRecord::new(vec![0.0; 4], payload);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        let b: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
