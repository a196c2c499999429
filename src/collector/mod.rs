//! 제출 문서 수집 모듈
//!
//! 로컬 폴더에서 `TICKER_YEAR.md` 형태의 변환된 10-K 파일을 수집합니다.
//! .gitignore 패턴을 존중하고, 파일명에서 티커와 연도를 파싱합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

use crate::knowledge::normalize_ticker;

/// 파일명에 연도가 없을 때의 기본값
const DEFAULT_YEAR: &str = "2024";

// ============================================================================
// Collected Filing
// ============================================================================

/// 수집된 제출 문서 파일
#[derive(Debug, Clone)]
pub struct CollectedFiling {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 파일명에서 파싱한 티커 (정규화됨)
    pub ticker: String,
    /// 파일명에서 파싱한 보고 연도
    pub year: String,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedFiling {
    /// 파일에서 CollectedFiling 생성
    ///
    /// Markdown이 아니거나 파일명에서 유효한 티커를 얻지 못하면 None.
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        let is_markdown = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        if !is_markdown {
            return Ok(None);
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let Some((ticker, year)) = parse_filing_stem(stem) else {
            tracing::warn!("Cannot parse ticker from filename: {:?}", path);
            return Ok(None);
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            ticker,
            year,
            size: metadata.len(),
        }))
    }
}

/// `AAPL_2024` 같은 파일 스템에서 (티커, 연도) 파싱
///
/// 첫 `_` 구분 토큰이 티커, 이후 토큰 중 첫 4자리 숫자가 연도입니다.
/// 연도 토큰이 없으면 기본 연도를 씁니다.
pub fn parse_filing_stem(stem: &str) -> Option<(String, String)> {
    let mut parts = stem.split('_');
    let ticker = normalize_ticker(parts.next()?).ok()?;

    let year = parts
        .find(|part| part.len() == 4 && part.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(DEFAULT_YEAR)
        .to_string();

    Some((ticker, year))
}

// ============================================================================
// Filing Collector
// ============================================================================

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 50 * 1024 * 1024, // 50MB (10-K 원문은 큼)
        }
    }
}

/// 제출 문서 수집기
pub struct FilingCollector {
    config: CollectorConfig,
}

impl FilingCollector {
    /// 새 수집기 생성
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 수집
    pub fn collect_file(&self, path: &Path) -> Result<Option<CollectedFiling>> {
        let abs_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        if !abs_path.exists() {
            anyhow::bail!("File not found: {:?}", abs_path);
        }

        if !abs_path.is_file() {
            anyhow::bail!("Not a file: {:?}", abs_path);
        }

        let filing = CollectedFiling::from_path(abs_path)?;

        if let Some(ref filing) = filing {
            if !self.should_include(filing) {
                return Ok(None);
            }
        }

        Ok(filing)
    }

    /// 폴더 재귀 수집
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFiling>> {
        let abs_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        if !abs_path.exists() {
            anyhow::bail!("Directory not found: {:?}", abs_path);
        }

        if !abs_path.is_dir() {
            anyhow::bail!("Not a directory: {:?}", abs_path);
        }

        let mut filings = Vec::new();

        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFiling::from_path(entry.path().to_path_buf()) {
                Ok(Some(filing)) => {
                    if self.should_include(&filing) {
                        filings.push(filing);
                    }
                }
                Ok(None) => {} // Markdown 아님 / 파싱 불가
                Err(e) => {
                    tracing::warn!("Failed to collect file: {}", e);
                }
            }
        }

        // 안정적인 처리 순서를 위해 티커/연도로 정렬
        filings.sort_by(|a, b| (&a.ticker, &a.year).cmp(&(&b.ticker, &b.year)));

        tracing::info!("Collected {} filings from {:?}", filings.len(), abs_path);
        Ok(filings)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, filing: &CollectedFiling) -> bool {
        if self.config.max_file_size > 0 && filing.size > self.config.max_file_size {
            tracing::debug!(
                "Skipping large file: {:?} ({} bytes)",
                filing.path,
                filing.size
            );
            return false;
        }

        true
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub total_size: u64,
    pub tickers: Vec<String>,
}

impl CollectionStats {
    /// 수집된 파일 목록에서 통계 계산
    pub fn from_filings(filings: &[CollectedFiling]) -> Self {
        let mut stats = Self::default();

        for filing in filings {
            stats.total_files += 1;
            stats.total_size += filing.size;
            if !stats.tickers.contains(&filing.ticker) {
                stats.tickers.push(filing.ticker.clone());
            }
        }

        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_filing_stem() {
        assert_eq!(
            parse_filing_stem("AAPL_2024"),
            Some(("AAPL".to_string(), "2024".to_string()))
        );
        assert_eq!(
            parse_filing_stem("msft_2023_10k"),
            Some(("MSFT".to_string(), "2023".to_string()))
        );
        // 연도 토큰이 없으면 기본 연도
        assert_eq!(
            parse_filing_stem("NVDA"),
            Some(("NVDA".to_string(), DEFAULT_YEAR.to_string()))
        );
        // 유효하지 않은 티커
        assert_eq!(parse_filing_stem("notaticker_2024"), None);
        assert_eq!(parse_filing_stem("_2024"), None);
    }

    #[test]
    fn test_collect_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("AAPL_2024.md"), "Item 1. Business").unwrap();
        std::fs::write(dir.path().join("MSFT_2024.md"), "Item 1. Business").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a filing").unwrap();

        let collector = FilingCollector::with_defaults();
        let filings = collector.collect_directory(dir.path()).unwrap();

        assert_eq!(filings.len(), 2);
        assert_eq!(filings[0].ticker, "AAPL");
        assert_eq!(filings[1].ticker, "MSFT");
    }

    #[test]
    fn test_collect_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("TSLA_2023.md");
        std::fs::write(&path, "Item 1. Business").unwrap();

        let collector = FilingCollector::with_defaults();
        let filing = collector.collect_file(&path).unwrap().unwrap();

        assert_eq!(filing.ticker, "TSLA");
        assert_eq!(filing.year, "2023");
    }

    #[test]
    fn test_size_cap_excludes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("AAPL_2024.md");
        std::fs::write(&path, "0123456789").unwrap();

        let collector = FilingCollector::new(CollectorConfig {
            max_file_size: 5,
            ..Default::default()
        });

        assert!(collector.collect_file(&path).unwrap().is_none());
    }

    #[test]
    fn test_collection_stats() {
        let filings = vec![
            CollectedFiling {
                path: PathBuf::from("AAPL_2023.md"),
                ticker: "AAPL".to_string(),
                year: "2023".to_string(),
                size: 10,
            },
            CollectedFiling {
                path: PathBuf::from("AAPL_2024.md"),
                ticker: "AAPL".to_string(),
                year: "2024".to_string(),
                size: 20,
            },
        ];

        let stats = CollectionStats::from_filings(&filings);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 30);
        assert_eq!(stats.tickers, vec!["AAPL".to_string()]);
    }
}
