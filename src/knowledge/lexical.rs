//! Lexical Index - 티커별 BM25 키워드 랭킹
//!
//! 한 티커의 청크 코퍼스만으로 BM25 (Okapi) 통계를 계산합니다.
//! 티커 간 용어 통계는 절대 섞이지 않습니다. 인덱스는 첫 질의 때
//! 덴스 스토어에서 청크를 끌어와 게으르게 빌드되고, 프로세스 수명
//! 동안 캐시됩니다 (작고 고정된 코퍼스이므로 축출 없음).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use super::vector::{SectionPayload, VectorStore};

// ============================================================================
// Tokenization
// ============================================================================

/// 소문자 공백 분리 토크나이저
///
/// 의도적으로 단순하게 유지합니다: 스테밍 없음, 불용어 제거 없음.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// BM25 Index
// ============================================================================

/// BM25 파라미터 (Okapi 표준값)
const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// 렉시컬 검색 결과
#[derive(Debug, Clone)]
pub struct LexicalHit {
    /// 원시 BM25 스코어 (비음수, 정규화 전)
    pub score: f32,
    /// 청크 페이로드
    pub payload: SectionPayload,
}

/// 티커 단위 BM25 인덱스
///
/// 빌드 이후 불변입니다. 재수집 시에는 캐시에서 무효화하고
/// 새로 빌드합니다.
pub struct LexicalIndex {
    payloads: Vec<SectionPayload>,
    /// 문서별 용어 빈도
    term_freqs: Vec<HashMap<String, usize>>,
    /// 문서별 토큰 수
    doc_lens: Vec<usize>,
    /// 평균 문서 길이
    avg_doc_len: f32,
    /// 용어별 문서 빈도
    doc_freqs: HashMap<String, usize>,
}

impl LexicalIndex {
    /// 청크 페이로드 목록에서 인덱스 빌드
    pub fn build(payloads: Vec<SectionPayload>) -> Self {
        let mut term_freqs = Vec::with_capacity(payloads.len());
        let mut doc_lens = Vec::with_capacity(payloads.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for payload in &payloads {
            let tokens = tokenize(&payload.text);
            doc_lens.push(tokens.len());

            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            total_len as f32 / doc_lens.len() as f32
        };

        Self {
            payloads,
            term_freqs,
            doc_lens,
            avg_doc_len,
            doc_freqs,
        }
    }

    /// 인덱스된 청크 수
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// 인덱스가 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// 질의에 대한 청크별 BM25 랭킹
    ///
    /// 전체 코퍼스를 스코어링한 뒤 내림차순 정렬, `limit`개로 자릅니다.
    pub fn search(&self, query: &str, limit: usize) -> Vec<LexicalHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.is_empty() {
            return vec![];
        }

        let mut hits: Vec<LexicalHit> = self
            .payloads
            .iter()
            .enumerate()
            .map(|(doc, payload)| LexicalHit {
                score: self.score_doc(doc, &query_tokens),
                payload: payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }

    /// 단일 문서 BM25 스코어
    ///
    /// idf는 비음수 변형 ln(1 + (N - df + 0.5) / (df + 0.5))을 사용합니다.
    fn score_doc(&self, doc: usize, query_tokens: &[String]) -> f32 {
        let n = self.payloads.len() as f32;
        let doc_len = self.doc_lens[doc] as f32;
        let norm = if self.avg_doc_len > 0.0 {
            1.0 - BM25_B + BM25_B * doc_len / self.avg_doc_len
        } else {
            1.0
        };

        let mut score = 0.0;
        for token in query_tokens {
            let Some(&tf) = self.term_freqs[doc].get(token) else {
                continue;
            };
            let df = *self.doc_freqs.get(token).unwrap_or(&0) as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            let tf = tf as f32;
            score += idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
        }
        score
    }
}

// ============================================================================
// LexicalCache
// ============================================================================

/// 프로세스 전역 렉시컬 인덱스 캐시 (티커 키)
///
/// 같은 티커의 동시 첫 질의는 티커별 셀로 직렬화되어 빌드가 한 번만
/// 일어나고, 서로 다른 티커는 동시에 빌드할 수 있습니다. 빌드 실패는
/// 캐시되지 않고 다음 질의에서 재시도됩니다.
pub struct LexicalCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<LexicalIndex>>>>>,
}

impl LexicalCache {
    /// 빈 캐시 생성
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// 티커 인덱스 조회, 없으면 덴스 스토어에서 빌드
    ///
    /// # Returns
    /// 빌드 불가(스토어 오류, 청크 없음) 시 `None` - 호출자는
    /// 덴스 전용 랭킹으로 강등합니다.
    pub async fn get_or_build(
        &self,
        ticker: &str,
        store: &dyn VectorStore,
    ) -> Option<Arc<LexicalIndex>> {
        let cell = {
            let mut cells = self.cells.lock().ok()?;
            cells.entry(ticker.to_string()).or_default().clone()
        };

        let built = cell
            .get_or_try_init(|| async {
                let payloads = store.scroll_by_ticker(ticker).await?;
                if payloads.is_empty() {
                    anyhow::bail!("no indexed chunks for ticker {}", ticker);
                }
                let index = LexicalIndex::build(payloads);
                tracing::info!("Built BM25 index for {} ({} chunks)", ticker, index.len());
                Ok::<_, anyhow::Error>(Arc::new(index))
            })
            .await;

        match built {
            Ok(index) => Some(index.clone()),
            Err(e) => {
                tracing::warn!("Lexical index unavailable for {}: {}", ticker, e);
                None
            }
        }
    }

    /// 티커 인덱스 무효화 (재수집 후 호출)
    pub fn invalidate(&self, ticker: &str) {
        if let Ok(mut cells) = self.cells.lock() {
            cells.remove(ticker);
        }
    }

    /// 캐시된 티커 수
    pub fn cached_tickers(&self) -> usize {
        self.cells
            .lock()
            .map(|cells| {
                cells
                    .values()
                    .filter(|cell| cell.initialized())
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for LexicalCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::{DenseHit, EmbeddingRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(ticker: &str, section: &str, text: &str) -> SectionPayload {
        SectionPayload {
            ticker: ticker.to_string(),
            section: section.to_string(),
            text: text.to_string(),
            start_line: 0,
            end_line: 1,
            year: "2024".to_string(),
            file_path: "test.md".to_string(),
            chunk_length: text.len(),
            tables_count: 0,
        }
    }

    /// 테스트용 인메모리 벡터 스토어
    struct FakeStore {
        payloads: Vec<SectionPayload>,
        scrolls: AtomicUsize,
        fail: bool,
    }

    impl FakeStore {
        fn with_payloads(payloads: Vec<SectionPayload>) -> Self {
            Self {
                payloads,
                scrolls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> anyhow::Result<usize> {
            Ok(records.len())
        }

        async fn search(
            &self,
            _query_embedding: &[f32],
            _ticker: &str,
            _limit: usize,
        ) -> anyhow::Result<Vec<DenseHit>> {
            Ok(vec![])
        }

        async fn scroll_by_ticker(&self, ticker: &str) -> anyhow::Result<Vec<SectionPayload>> {
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("store unreachable");
            }
            Ok(self
                .payloads
                .iter()
                .filter(|p| p.ticker == ticker)
                .cloned()
                .collect())
        }

        async fn delete_by_ticker(&self, _ticker: &str) -> anyhow::Result<usize> {
            Ok(0)
        }

        async fn count(&self) -> anyhow::Result<usize> {
            Ok(self.payloads.len())
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Revenue  Growth"), vec!["revenue", "growth"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_bm25_ranks_matching_chunk_first() {
        let index = LexicalIndex::build(vec![
            payload("AAPL", "Revenue", "revenue grew twelve percent year over year"),
            payload("AAPL", "Properties", "offices and data centers in several states"),
            payload("AAPL", "MD&A", "discussion of revenue and operating margin trends"),
        ]);

        let hits = index.search("revenue growth", 3);
        assert_eq!(hits.len(), 3);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].payload.text.contains("revenue"));
        // 어떤 스코어도 음수가 아님
        assert!(hits.iter().all(|h| h.score >= 0.0));
    }

    #[test]
    fn test_bm25_empty_query() {
        let index = LexicalIndex::build(vec![payload("AAPL", "Revenue", "some text")]);
        assert!(index.search("", 5).is_empty());
    }

    #[test]
    fn test_bm25_limit_respected() {
        let payloads: Vec<SectionPayload> = (0..10)
            .map(|i| payload("AAPL", "Business", &format!("business text number {}", i)))
            .collect();
        let index = LexicalIndex::build(payloads);

        assert_eq!(index.search("business", 4).len(), 4);
    }

    #[test]
    fn test_bm25_deterministic() {
        let index = LexicalIndex::build(vec![
            payload("AAPL", "Revenue", "net sales increased across all segments"),
            payload("AAPL", "Risk Factors", "competition may reduce net sales"),
        ]);

        let a: Vec<f32> = index.search("net sales", 2).iter().map(|h| h.score).collect();
        let b: Vec<f32> = index.search("net sales", 2).iter().map(|h| h.score).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_cache_builds_once_per_ticker() {
        let store = FakeStore::with_payloads(vec![
            payload("AAPL", "Revenue", "revenue text"),
            payload("MSFT", "Revenue", "cloud revenue text"),
        ]);
        let cache = LexicalCache::new();

        let first = cache.get_or_build("AAPL", &store).await;
        let second = cache.get_or_build("AAPL", &store).await;

        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(store.scrolls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_tickers(), 1);
    }

    #[tokio::test]
    async fn test_cache_empty_corpus_degrades() {
        let store = FakeStore::with_payloads(vec![]);
        let cache = LexicalCache::new();

        assert!(cache.get_or_build("TSLA", &store).await.is_none());
        // 실패는 캐시되지 않고 다음 질의에서 재시도됨
        assert!(cache.get_or_build("TSLA", &store).await.is_none());
        assert_eq!(store.scrolls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_store_failure_degrades() {
        let store = FakeStore {
            payloads: vec![],
            scrolls: AtomicUsize::new(0),
            fail: true,
        };
        let cache = LexicalCache::new();

        assert!(cache.get_or_build("AAPL", &store).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_invalidate_forces_rebuild() {
        let store = FakeStore::with_payloads(vec![payload("AAPL", "Revenue", "revenue text")]);
        let cache = LexicalCache::new();

        cache.get_or_build("AAPL", &store).await;
        cache.invalidate("AAPL");
        cache.get_or_build("AAPL", &store).await;

        assert_eq!(store.scrolls.load(Ordering::SeqCst), 2);
    }
}
