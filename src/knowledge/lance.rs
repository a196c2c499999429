//! LanceDB Vector Store - 덴스 인덱스 구현
//!
//! 섹션 청크 임베딩을 티커 필터와 함께 저장/검색합니다.
//! ANN (Approximate Nearest Neighbor) 검색으로 빠른 top-K 조회를 지원합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::vector::{DenseHit, EmbeddingRecord, SectionPayload, VectorStore, EMBEDDING_DIMENSION};

/// 섹션 컬렉션 테이블 이름
const TABLE_NAME: &str = "financial_sections";

/// 티커당 스크롤 상한 (코퍼스 규모상 충분)
const SCROLL_LIMIT: usize = 1000;

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// Apache Arrow 기반 columnar 저장소로, 임베딩과 페이로드 필드를
/// 한 테이블에 함께 둡니다.
pub struct LanceVectorStore {
    db: Connection,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 섹션 테이블 스키마
    fn create_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("ticker", DataType::Utf8, false),
            Field::new("section", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("start_line", DataType::Int64, false),
            Field::new("end_line", DataType::Int64, false),
            Field::new("year", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("chunk_length", DataType::Int64, false),
            Field::new("tables_count", DataType::Int64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    EMBEDDING_DIMENSION,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(records: &[EmbeddingRecord]) -> Result<RecordBatch> {
        if records.is_empty() {
            anyhow::bail!("Cannot create batch from empty records");
        }

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let tickers: Vec<&str> = records.iter().map(|r| r.payload.ticker.as_str()).collect();
        let sections: Vec<&str> = records.iter().map(|r| r.payload.section.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.payload.text.as_str()).collect();
        let start_lines: Vec<i64> = records.iter().map(|r| r.payload.start_line as i64).collect();
        let end_lines: Vec<i64> = records.iter().map(|r| r.payload.end_line as i64).collect();
        let years: Vec<&str> = records.iter().map(|r| r.payload.year.as_str()).collect();
        let file_paths: Vec<&str> = records.iter().map(|r| r.payload.file_path.as_str()).collect();
        let chunk_lengths: Vec<i64> = records
            .iter()
            .map(|r| r.payload.chunk_length as i64)
            .collect();
        let tables_counts: Vec<i64> = records
            .iter()
            .map(|r| r.payload.tables_count as i64)
            .collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            EMBEDDING_DIMENSION,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(tickers)),
                Arc::new(StringArray::from(sections)),
                Arc::new(StringArray::from(texts)),
                Arc::new(Int64Array::from(start_lines)),
                Arc::new(Int64Array::from(end_lines)),
                Arc::new(StringArray::from(years)),
                Arc::new(StringArray::from(file_paths)),
                Arc::new(Int64Array::from(chunk_lengths)),
                Arc::new(Int64Array::from(tables_counts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 배치에서 행 하나를 페이로드로 복원
    fn payload_from_batch(batch: &RecordBatch, row: usize) -> Result<SectionPayload> {
        Ok(SectionPayload {
            ticker: string_col(batch, "ticker")?.value(row).to_string(),
            section: string_col(batch, "section")?.value(row).to_string(),
            text: string_col(batch, "text")?.value(row).to_string(),
            start_line: int_col(batch, "start_line")?.value(row) as usize,
            end_line: int_col(batch, "end_line")?.value(row) as usize,
            year: string_col(batch, "year")?.value(row).to_string(),
            file_path: string_col(batch, "file_path")?.value(row).to_string(),
            chunk_length: int_col(batch, "chunk_length")?.value(row) as usize,
            tables_count: int_col(batch, "tables_count")?.value(row) as usize,
        })
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    /// 티커 정확 일치 필터식
    ///
    /// 티커는 대문자 영숫자 1~5자로 검증된 값만 허용합니다.
    fn ticker_filter(ticker: &str) -> Result<String> {
        if ticker.is_empty()
            || ticker.len() > 5
            || !ticker.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            anyhow::bail!("Invalid ticker: {:?}", ticker);
        }
        Ok(format!("ticker = '{}'", ticker))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = Self::records_to_batch(records)?;
        let schema = batch.schema();

        if self.table_exists().await {
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add records to table")?;
        } else {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(records.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        ticker: &str,
        limit: usize,
    ) -> Result<Vec<DenseHit>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let filter = Self::ticker_filter(ticker)?;
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .only_if(filter)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = Vec::new();
        for batch in batches {
            // _distance 컬럼은 LanceDB가 자동 추가
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for row in 0..batch.num_rows() {
                let distance = distances.value(row);
                // 거리를 유사도로 변환 (낮은 거리 -> 높은 유사도, (0, 1])
                let similarity = 1.0 / (1.0 + distance);

                hits.push(DenseHit {
                    similarity,
                    payload: Self::payload_from_batch(&batch, row)?,
                });
            }
        }

        Ok(hits)
    }

    async fn scroll_by_ticker(&self, ticker: &str) -> Result<Vec<SectionPayload>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let filter = Self::ticker_filter(ticker)?;
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for scroll")?;

        let results = table
            .query()
            .only_if(filter)
            .limit(SCROLL_LIMIT)
            .execute()
            .await
            .context("Failed to execute scroll")?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut payloads = Vec::new();
        for batch in batches {
            for row in 0..batch.num_rows() {
                payloads.push(Self::payload_from_batch(&batch, row)?);
            }
        }

        Ok(payloads)
    }

    async fn delete_by_ticker(&self, ticker: &str) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let filter = Self::ticker_filter(ticker)?;
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for delete")?;

        let before_count = self.count().await?;

        table
            .delete(&filter)
            .await
            .context("Failed to delete records")?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자열 컬럼 다운캐스트
fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// 정수 컬럼 다운캐스트
fn int_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// Tests
// ============================================================================
