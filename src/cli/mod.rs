//! CLI 모듈
//!
//! edgar-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, CollectorConfig, FilingCollector};
use crate::embedding::has_api_key;
use crate::knowledge::{
    assemble_context, get_data_dir, FilingStore, HybridRetriever, LanceVectorStore, VectorStore,
    DEFAULT_TOKEN_BUDGET,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "edgar-rag")]
#[command(version, about = "SEC 10-K 하이브리드 RAG 시스템", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 변환된 10-K Markdown 파일/폴더를 색인에 추가
    Ingest {
        /// 수집할 파일 경로 (TICKER_YEAR.md)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 섹션 검색 (하이브리드)
    Query {
        /// 검색 질의
        query: String,

        /// 대상 티커
        #[arg(short, long)]
        ticker: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 덴스 전용 랭킹 (BM25 비활성화)
        #[arg(long)]
        dense_only: bool,
    },

    /// 생성 단계용 컨텍스트 조립 (토큰 예산 적용)
    Context {
        /// 검색 질의
        query: String,

        /// 대상 티커
        #[arg(short, long)]
        ticker: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 토큰 예산 (추정치 기준)
        #[arg(short, long, default_value_t = DEFAULT_TOKEN_BUDGET)]
        budget: usize,

        /// 덴스 전용 랭킹 (BM25 비활성화)
        #[arg(long)]
        dense_only: bool,
    },

    /// 저장된 제출 문서 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 티커의 문서 및 임베딩 삭제
    Delete {
        /// 삭제할 티커
        ticker: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { file, dir } => cmd_ingest(file, dir).await,
        Commands::Query {
            query,
            ticker,
            limit,
            dense_only,
        } => cmd_query(&query, &ticker, limit, dense_only).await,
        Commands::Context {
            query,
            ticker,
            limit,
            budget,
            dense_only,
        } => cmd_context(&query, &ticker, limit, budget, dense_only).await,
        Commands::List { limit } => cmd_list(limit).await,
        Commands::Delete { ticker } => cmd_delete(&ticker).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
///
/// TICKER_YEAR.md 파일을 읽어 청킹/임베딩 후 색인에 추가합니다.
async fn cmd_ingest(file: Option<PathBuf>, dir: Option<PathBuf>) -> Result<()> {
    require_api_key()?;

    let collector = FilingCollector::new(CollectorConfig::default());

    let filings = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] 지원하지 않는 파일입니다 (TICKER_YEAR.md 형식 필요): {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if filings.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_filings(&filings);
    println!("[*] 수집 대상: {} 파일 ({} 티커)", stats.total_files, stats.tickers.len());
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let retriever = HybridRetriever::new()
        .await
        .context("HybridRetriever 초기화 실패")?;

    let mut success_count = 0;
    let mut error_count = 0;

    for (i, filing) in filings.iter().enumerate() {
        print!(
            "[{}/{}] {} ({})... ",
            i + 1,
            filings.len(),
            filing.ticker,
            filing.year
        );

        let content = match std::fs::read_to_string(&filing.path) {
            Ok(c) => c,
            Err(e) => {
                println!("읽기 실패: {}", e);
                error_count += 1;
                continue;
            }
        };

        let file_path = filing.path.display().to_string();
        match retriever
            .ingest_filing(&filing.ticker, &filing.year, &content, Some(&file_path))
            .await
        {
            Ok(report) if report.chunk_count == 0 => {
                println!("색인 가능한 섹션 없음 (전체 문서만 저장)");
                success_count += 1;
            }
            Ok(report) => {
                println!("완료 ({} 청크)", report.chunk_count);
                success_count += 1;
            }
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
            }
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);

    Ok(())
}

/// 검색 명령어 (query)
///
/// 하이브리드 검색 (덴스 + BM25)으로 관련 섹션을 찾습니다.
async fn cmd_query(query: &str, ticker: &str, limit: usize, dense_only: bool) -> Result<()> {
    require_api_key()?;

    println!("[*] 검색 중: \"{}\" (티커: {})", query, ticker);

    let retriever = HybridRetriever::new()
        .await
        .context("HybridRetriever 초기화 실패")?;

    let results = retriever
        .retrieve(query, ticker, limit, !dense_only)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{}] [점수: {:.4}] (dense {:.3} / bm25 {:.2})",
            i + 1,
            result.section,
            result.score,
            result.dense_score,
            result.lexical_score
        );
        println!(
            "   {} {} | 줄 {}-{}",
            result.payload.ticker, result.payload.year, result.payload.start_line, result.payload.end_line
        );
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 컨텍스트 조립 명령어 (context)
///
/// 랭킹된 섹션을 토큰 예산 내에서 생성 단계용 텍스트로 직렬화합니다.
/// 검색 결과가 없거나 예산 안에 아무 섹션도 못 넣으면 전체 문서로
/// 폴백합니다.
async fn cmd_context(
    query: &str,
    ticker: &str,
    limit: usize,
    budget: usize,
    dense_only: bool,
) -> Result<()> {
    require_api_key()?;

    let retriever = HybridRetriever::new()
        .await
        .context("HybridRetriever 초기화 실패")?;

    let results = retriever
        .retrieve(query, ticker, limit, !dense_only)
        .await
        .context("검색 실패")?;

    let context = assemble_context(&results, budget);

    if !context.is_empty() {
        println!("{}", context);
        return Ok(());
    }

    // 섹션 검색 불가: 전체 문서 폴백
    tracing::warn!("No sections within budget for {}; falling back to full document", ticker);

    match retriever.store().latest_filing(ticker)? {
        Some(filing) => {
            println!("{}", filing.content);
        }
        None => {
            bail!("티커 '{}'의 문서가 없습니다. 먼저 ingest를 실행하세요.", ticker);
        }
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(limit: usize) -> Result<()> {
    let store = FilingStore::open_default().context("FilingStore 열기 실패")?;

    let filings = store.list_filings(limit).context("문서 목록 조회 실패")?;

    if filings.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 제출 문서 ({} 건):\n", filings.len());

    for filing in filings {
        println!("  #{:<4} {} ({})", filing.id, filing.ticker, filing.year);
        if let Some(ref path) = filing.file_path {
            println!("        경로: {}", path);
        }
        println!(
            "        {} | {} chars",
            filing.created_at.format("%Y-%m-%d %H:%M"),
            filing.content.len()
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
///
/// 문서 저장소와 벡터 인덱스에서 티커를 모두 제거합니다.
async fn cmd_delete(ticker: &str) -> Result<()> {
    let store = FilingStore::open_default().context("FilingStore 열기 실패")?;

    let deleted_filings = store.delete_by_ticker(ticker).context("문서 삭제 실패")?;

    let lance_path = get_data_dir().join("sections.lance");
    let vector = LanceVectorStore::open(&lance_path)
        .await
        .context("벡터 스토어 열기 실패")?;
    let deleted_vectors = vector
        .delete_by_ticker(&ticker.trim().to_uppercase())
        .await
        .context("임베딩 삭제 실패")?;

    if deleted_filings == 0 && deleted_vectors == 0 {
        println!("[!] 티커 '{}'의 데이터가 없습니다.", ticker);
    } else {
        println!(
            "[OK] 티커 '{}' 삭제됨 (문서 {} 건, 임베딩 {} 건)",
            ticker, deleted_filings, deleted_vectors
        );
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("edgar-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match FilingStore::open_default() {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!(
                    "[OK] 저장된 문서: {} 건 ({} 티커)",
                    stats.filing_count, stats.ticker_count
                );
                println!(
                    "     총 콘텐츠: {}",
                    format_bytes(stats.total_content_bytes)
                );
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] FilingStore 열기 실패: {}", e);
        }
    }

    let lance_path = data_dir.join("sections.lance");
    match LanceVectorStore::open(&lance_path).await {
        Ok(vector) => match vector.count().await {
            Ok(count) => {
                println!("[OK] 벡터 인덱스: {} 청크", count);
            }
            Err(e) => {
                tracing::debug!("벡터 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            tracing::debug!("벡터 스토어 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// API 키 확인
fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }
}
