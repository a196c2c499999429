//! Filing Store - rusqlite 기반 동기 제출 문서 저장소
//!
//! 수집된 10-K Markdown 원문을 (ticker, year) 키로 보관합니다.
//! 섹션 검색이 비었을 때 전체 문서 폴백의 출처가 됩니다.
//! 저장 위치: ~/.edgar-rag/filings.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.edgar-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".edgar-rag")
}

// ============================================================================
// Ticker Validation
// ============================================================================

/// 티커 정규화 (대문자화 + 형식 검증)
///
/// 유효한 티커는 대문자 영숫자 1~5자입니다.
pub fn normalize_ticker(raw: &str) -> Result<String> {
    let ticker = raw.trim().to_uppercase();
    if ticker.is_empty()
        || ticker.len() > 5
        || !ticker.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        anyhow::bail!("Invalid ticker: {:?} (expected 1-5 uppercase alphanumerics)", raw);
    }
    Ok(ticker)
}

// ============================================================================
// Types
// ============================================================================

/// 저장된 제출 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    pub id: i64,
    pub ticker: String,
    pub year: String,
    pub content: String,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 새 제출 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewFiling {
    pub ticker: String,
    pub year: String,
    pub content: String,
    pub file_path: Option<String>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub filing_count: usize,
    pub ticker_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// FilingStore
// ============================================================================

/// Filing Store - 동기 문서 저장소
///
/// 문서는 수집 시 생성되고 이후 불변입니다. 같은 (ticker, year)의
/// 재수집은 패치가 아닌 전체 교체입니다.
pub struct FilingStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl FilingStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.edgar-rag/filings.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .context("Failed to create data directory")?;
        }

        let db_path = data_dir.join("filings.db");
        Self::open(&db_path)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS filings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                year TEXT NOT NULL,
                content TEXT NOT NULL,
                file_path TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(ticker, year)
            )",
            [],
        )
        .context("Failed to create filings table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_filings_ticker ON filings(ticker)",
            [],
        )
        .context("Failed to create ticker index")?;

        tracing::debug!("Filing store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 제출 문서 저장 ((ticker, year)가 같으면 교체)
    pub fn upsert_filing(&self, filing: NewFiling) -> Result<i64> {
        let ticker = normalize_ticker(&filing.ticker)?;
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT OR REPLACE INTO filings (ticker, year, content, file_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ticker, filing.year, filing.content, filing.file_path, now],
        )
        .context("Failed to insert filing")?;

        let id = conn.last_insert_rowid();
        tracing::info!("Stored filing: {} {} (id={})", ticker, filing.year, id);

        Ok(id)
    }

    /// (ticker, year)로 문서 조회
    pub fn get_filing(&self, ticker: &str, year: &str) -> Result<Option<Filing>> {
        let ticker = normalize_ticker(ticker)?;
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, ticker, year, content, file_path, created_at
             FROM filings WHERE ticker = ?1 AND year = ?2",
        )?;

        let filing = stmt
            .query_row(params![ticker, year], Self::row_to_filing)
            .ok();

        Ok(filing)
    }

    /// 티커의 가장 최근 연도 문서 조회 (전체 문서 폴백용)
    pub fn latest_filing(&self, ticker: &str) -> Result<Option<Filing>> {
        let ticker = normalize_ticker(ticker)?;
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, ticker, year, content, file_path, created_at
             FROM filings WHERE ticker = ?1
             ORDER BY year DESC
             LIMIT 1",
        )?;

        let filing = stmt.query_row(params![ticker], Self::row_to_filing).ok();

        Ok(filing)
    }

    /// 문서 목록 조회
    pub fn list_filings(&self, limit: usize) -> Result<Vec<Filing>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, ticker, year, content, file_path, created_at
             FROM filings
             ORDER BY ticker ASC, year DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], Self::row_to_filing)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// 티커의 문서 전부 삭제
    pub fn delete_by_ticker(&self, ticker: &str) -> Result<usize> {
        let ticker = normalize_ticker(ticker)?;
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let rows = conn.execute("DELETE FROM filings WHERE ticker = ?1", params![ticker])?;

        Ok(rows)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM filings", [], |row| row.get(0))
            .unwrap_or(0);

        let tickers: i64 = conn
            .query_row("SELECT COUNT(DISTINCT ticker) FROM filings", [], |row| row.get(0))
            .unwrap_or(0);

        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM filings",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(StoreStats {
            filing_count: count as usize,
            ticker_count: tickers as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }

    fn row_to_filing(row: &rusqlite::Row<'_>) -> rusqlite::Result<Filing> {
        Ok(Filing {
            id: row.get(0)?,
            ticker: row.get(1)?,
            year: row.get(2)?,
            content: row.get(3)?,
            file_path: row.get(4)?,
            created_at: parse_datetime(row.get::<_, String>(5)?),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, FilingStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = FilingStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn new_filing(ticker: &str, year: &str, content: &str) -> NewFiling {
        NewFiling {
            ticker: ticker.to_string(),
            year: year.to_string(),
            content: content.to_string(),
            file_path: Some(format!("data/{}_{}.md", ticker, year)),
        }
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker("aapl").unwrap(), "AAPL");
        assert_eq!(normalize_ticker(" MSFT ").unwrap(), "MSFT");
        assert_eq!(normalize_ticker("BRK2").unwrap(), "BRK2");
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("TOOLONG").is_err());
        assert!(normalize_ticker("A.B").is_err());
    }

    #[test]
    fn test_upsert_and_get_filing() {
        let (_dir, store) = create_test_store();

        let id = store
            .upsert_filing(new_filing("aapl", "2024", "Item 1. Business"))
            .unwrap();
        assert!(id > 0);

        // 소문자 입력도 정규화되어 조회됨
        let filing = store.get_filing("AAPL", "2024").unwrap().unwrap();
        assert_eq!(filing.ticker, "AAPL");
        assert_eq!(filing.year, "2024");
        assert_eq!(filing.content, "Item 1. Business");
    }

    #[test]
    fn test_reingest_replaces() {
        let (_dir, store) = create_test_store();

        store.upsert_filing(new_filing("AAPL", "2024", "old content")).unwrap();
        store.upsert_filing(new_filing("AAPL", "2024", "new content")).unwrap();

        let filing = store.get_filing("AAPL", "2024").unwrap().unwrap();
        assert_eq!(filing.content, "new content");
        assert_eq!(store.stats().unwrap().filing_count, 1);
    }

    #[test]
    fn test_latest_filing() {
        let (_dir, store) = create_test_store();

        store.upsert_filing(new_filing("AAPL", "2022", "old filing")).unwrap();
        store.upsert_filing(new_filing("AAPL", "2024", "latest filing")).unwrap();

        let latest = store.latest_filing("AAPL").unwrap().unwrap();
        assert_eq!(latest.year, "2024");

        assert!(store.latest_filing("MSFT").unwrap().is_none());
    }

    #[test]
    fn test_list_filings() {
        let (_dir, store) = create_test_store();

        store.upsert_filing(new_filing("MSFT", "2024", "msft body")).unwrap();
        store.upsert_filing(new_filing("AAPL", "2024", "aapl body")).unwrap();

        let list = store.list_filings(10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].ticker, "AAPL");
    }

    #[test]
    fn test_delete_by_ticker() {
        let (_dir, store) = create_test_store();

        store.upsert_filing(new_filing("AAPL", "2023", "a")).unwrap();
        store.upsert_filing(new_filing("AAPL", "2024", "b")).unwrap();
        store.upsert_filing(new_filing("MSFT", "2024", "c")).unwrap();

        assert_eq!(store.delete_by_ticker("AAPL").unwrap(), 2);
        assert!(store.get_filing("AAPL", "2024").unwrap().is_none());
        assert!(store.get_filing("MSFT", "2024").unwrap().is_some());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();

        store.upsert_filing(new_filing("AAPL", "2024", "1234567890")).unwrap();
        store.upsert_filing(new_filing("MSFT", "2024", "12345")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.filing_count, 2);
        assert_eq!(stats.ticker_count, 2);
        assert_eq!(stats.total_content_bytes, 15);
    }
}
