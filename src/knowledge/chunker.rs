//! Section Chunker - 10-K 섹션 단위 텍스트 분할
//!
//! 정제된 10-K Markdown을 표준 Item 구조(Business, Risk Factors, MD&A 등)
//! 경계에서 분할합니다. 파이프 테이블 블록은 절대 중간에서 잘리지 않으며,
//! 기준 길이 미만의 버퍼는 다음 섹션으로 병합됩니다.

use regex::Regex;
use serde::Serialize;

// ============================================================================
// Chunker Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// 청크로 인정하는 최소 길이 (trim 기준 문자 수, 초과해야 방출)
    pub min_chunk_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 100,
        }
    }
}

// ============================================================================
// Section Patterns
// ============================================================================

/// 표준 10-K 섹션 패턴 테이블
///
/// 우선순위 순서로 평가하며 첫 매치가 이깁니다. 닫힌 enum이 아닌
/// 데이터 테이블로 유지합니다 (분류 체계가 늘어날 수 있음).
const SECTION_PATTERNS: &[(&str, &str)] = &[
    (r"^Item\s+1\.?\s*[:\-]?\s*Business", "Business"),
    (r"^Item\s+1A\.?\s*[:\-]?\s*Risk\s+Factors", "Risk Factors"),
    (r"^Item\s+1B\.?\s*[:\-]?\s*Unresolved", "Unresolved Staff Comments"),
    (r"^Item\s+1C\.?\s*[:\-]?\s*Cybersecurity", "Cybersecurity"),
    (r"^Item\s+2\.?\s*[:\-]?\s*Properties", "Properties"),
    (r"^Item\s+3\.?\s*[:\-]?\s*Legal\s+Proceedings", "Legal Proceedings"),
    (r"^Item\s+4\.?\s*[:\-]?\s*Mine\s+Safety", "Mine Safety"),
    (r"^Item\s+5\.?\s*[:\-]?\s*Market", "Market Information"),
    (r"^Item\s+6\.?\s*[:\-]?\s*\[?Reserved\]?", "Reserved"),
    (r"^Item\s+7\.?\s*[:\-]?\s*Management", "MD&A"),
    (r"^Item\s+7A\.?\s*[:\-]?\s*Quantitative", "Market Risk"),
    (r"^Item\s+8\.?\s*[:\-]?\s*Financial\s+Statements", "Financial Statements"),
    (r"^Item\s+9\.?\s*[:\-]?\s*Changes", "Changes in Accountants"),
    (r"^Item\s+9A\.?\s*[:\-]?\s*Controls", "Controls and Procedures"),
    (r"^Item\s+9B\.?\s*[:\-]?\s*Other\s+Information", "Other Information"),
    (r"^Item\s+10\.?\s*[:\-]?\s*Directors", "Directors and Officers"),
    (r"^Item\s+11\.?\s*[:\-]?\s*Executive\s+Compensation", "Executive Compensation"),
    (r"^Item\s+12\.?\s*[:\-]?\s*Security\s+Ownership", "Security Ownership"),
    (r"^Item\s+13\.?\s*[:\-]?\s*Certain\s+Relationships", "Relationships and Transactions"),
    (r"^Item\s+14\.?\s*[:\-]?\s*Principal\s+Accountant", "Principal Accountant"),
    (
        r"^CONSOLIDATED\s+STATEMENTS?\s+OF\s+(INCOME|OPERATIONS|EARNINGS)",
        "Income Statement",
    ),
    (r"^CONSOLIDATED\s+BALANCE\s+SHEETS?", "Balance Sheet"),
    (r"^CONSOLIDATED\s+STATEMENTS?\s+OF\s+CASH\s+FLOWS?", "Cash Flow Statement"),
    (
        r"^NOTES?\s+TO\s+(CONSOLIDATED\s+)?FINANCIAL\s+STATEMENTS?",
        "Notes to Financial Statements",
    ),
    (r"^SEGMENT\s+INFORMATION", "Segment Information"),
    (r"^REVENUE", "Revenue"),
    (r"^NET\s+INCOME", "Net Income"),
];

/// 문서 시작 시 기본 섹션 라벨
pub const INTRODUCTION_SECTION: &str = "Introduction";

// ============================================================================
// SectionChunk
// ============================================================================

/// 섹션 청크 - 검색의 기본 단위
///
/// 청크는 문서의 연속된 줄 구간 `[start_line, end_line)`을 덮으며
/// 방출 이후 변경되지 않습니다 (재수집 시 교체).
#[derive(Debug, Clone, Serialize)]
pub struct SectionChunk {
    /// 소유 티커 (대문자)
    pub ticker: String,
    /// 섹션 라벨 (SECTION_PATTERNS의 라벨 또는 "Introduction")
    pub section: String,
    /// 청크 원문 (줄바꿈 포함, trim하지 않음)
    pub text: String,
    /// 시작 줄 인덱스 (0-based, inclusive)
    pub start_line: usize,
    /// 끝 줄 인덱스 (0-based, exclusive)
    pub end_line: usize,
}

impl SectionChunk {
    /// 청크 바이트 길이
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    /// 포함된 테이블 수 (구분자 행 기준 대략치)
    pub fn table_count(&self) -> usize {
        self.text.matches("| --- |").count()
    }
}

// ============================================================================
// SectionChunker
// ============================================================================

/// 10-K 섹션 청커
///
/// 줄 단위 스캔으로 문서를 빈틈/중복 없이 분할합니다:
/// - 섹션 헤더 줄은 자신이 여는 청크에만 속함
/// - 테이블 모드 안에서는 섹션 검사를 하지 않음
/// - 기준 미달 버퍼는 다음 섹션 버퍼 앞에 병합 (시작 줄 유지)
pub struct SectionChunker {
    config: ChunkerConfig,
    patterns: Vec<(Regex, &'static str)>,
}

impl SectionChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkerConfig) -> Self {
        let patterns = SECTION_PATTERNS
            .iter()
            .map(|(pattern, label)| {
                let re = Regex::new(&format!("(?i){}", pattern)).expect("invalid section pattern");
                (re, *label)
            })
            .collect();

        Self { config, patterns }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// 줄이 여는 섹션 라벨 (첫 매치 우선)
    fn match_section(&self, line: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(line))
            .map(|(_, label)| *label)
    }

    /// 문서를 섹션 청크로 분할
    ///
    /// # Arguments
    /// * `content` - 정제된 Markdown 원문
    /// * `ticker` - 소유 티커
    ///
    /// # Returns
    /// 문서 순서대로 정렬된 청크 목록. 인식되는 헤더가 없으면
    /// "Introduction" 청크 하나, 전체가 기준 미달이면 빈 목록.
    pub fn chunk(&self, content: &str, ticker: &str) -> Vec<SectionChunk> {
        let lines: Vec<&str> = content.lines().collect();

        let mut chunks: Vec<SectionChunk> = Vec::new();
        let mut current_section = INTRODUCTION_SECTION;
        let mut buffer: Vec<&str> = Vec::new();
        let mut buffer_start = 0usize;
        let mut in_table = false;
        let mut table_lines: Vec<&str> = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim();

            // 테이블 모드 진입: 파이프로 시작하고 구분자 행이 아닌 줄
            if !in_table && trimmed.starts_with('|') && !line.contains("---") {
                in_table = true;
                table_lines.push(line);
                continue;
            }

            if in_table {
                // 파이프 줄/빈 줄은 테이블에 계속 수집
                if trimmed.starts_with('|') || trimmed.is_empty() {
                    table_lines.push(line);
                    continue;
                }
                // 테이블 종료: 수집한 줄을 통째로 버퍼에 편입
                buffer.append(&mut table_lines);
                in_table = false;
                // 종료 줄은 아래에서 일반 줄로 처리 (섹션 검사 포함)
            }

            // 섹션 경계 검사 (테이블 모드 밖에서만 도달)
            if let Some(section) = self.match_section(line) {
                if section != current_section {
                    if Self::passes_threshold(&buffer, self.config.min_chunk_chars) {
                        chunks.push(Self::close_chunk(
                            ticker,
                            current_section,
                            &buffer,
                            buffer_start,
                            i,
                        ));
                        buffer.clear();
                        buffer_start = i;
                    }
                    // 기준 미달 버퍼는 비우지 않고 새 섹션으로 병합 (시작 줄 유지)
                    current_section = section;
                }
            }

            buffer.push(line);
        }

        // 입력 끝에서 열린 테이블은 마지막 버퍼로 흘려보냄
        buffer.append(&mut table_lines);

        // 마지막 버퍼 처리
        if Self::passes_threshold(&buffer, self.config.min_chunk_chars) {
            chunks.push(Self::close_chunk(
                ticker,
                current_section,
                &buffer,
                buffer_start,
                lines.len(),
            ));
        } else if !buffer.is_empty() {
            // 다음 섹션이 없으므로 직전 청크에 덧붙임 (청크가 없으면 버림)
            if let Some(last) = chunks.last_mut() {
                last.text.push('\n');
                last.text.push_str(&buffer.join("\n"));
                last.end_line = lines.len();
            }
        }

        chunks
    }

    fn passes_threshold(buffer: &[&str], min_chars: usize) -> bool {
        if buffer.is_empty() {
            return false;
        }
        buffer.join("\n").trim().chars().count() > min_chars
    }

    fn close_chunk(
        ticker: &str,
        section: &str,
        buffer: &[&str],
        start_line: usize,
        end_line: usize,
    ) -> SectionChunk {
        SectionChunk {
            ticker: ticker.to_string(),
            section: section.to_string(),
            text: buffer.join("\n"),
            start_line,
            end_line,
        }
    }
}

// ============================================================================
// XBRL Noise Stripping
// ============================================================================

/// 파일 선두의 XBRL 메타데이터 노이즈 제거
///
/// 문서 상단부터 스캔하며 네임스페이스 지표가 없는 첫 실질 콘텐츠 줄이
/// 나올 때까지 줄을 버립니다. 그 이후의 줄은 내용과 무관하게 모두
/// 통과합니다 (한 번 지나가면 되돌리지 않는 단방향 스캔).
pub fn strip_xbrl_noise(content: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut skipping = true;

    for line in content.lines() {
        if skipping {
            let trimmed = line.trim();
            if trimmed.is_empty()
                || trimmed.starts_with("xml")
                || trimmed.starts_with("false")
                || looks_like_xbrl_prefix(trimmed)
            {
                continue;
            }
            if !contains_xbrl_indicator(line) {
                skipping = false;
            }
        }

        if !skipping {
            kept.push(line);
        }
    }

    kept.join("\n")
}

/// XBRL 네임스페이스 지표 포함 여부
fn contains_xbrl_indicator(line: &str) -> bool {
    const INDICATORS: &[&str] = &["us-gaap:", "xbrli:", "iso4217:", "Member", "http://"];
    INDICATORS.iter().any(|ind| line.contains(ind))
}

/// `aapl-20240928` 같은 티커 네임스페이스 프리픽스 줄 여부
fn looks_like_xbrl_prefix(trimmed: &str) -> bool {
    let Some(dash) = trimmed.find('-') else {
        return false;
    };
    let (head, tail) = trimmed.split_at(dash);
    !head.is_empty()
        && head.chars().all(|c| c.is_ascii_lowercase())
        && tail[1..].starts_with(|c: char| c.is_ascii_digit())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(min_chars: usize) -> SectionChunker {
        SectionChunker::new(ChunkerConfig {
            min_chunk_chars: min_chars,
        })
    }

    const PADDING: &str = "padding padding padding padding padding padding padding \
                           padding padding padding padding padding padding padding";

    #[test]
    fn test_empty_document() {
        let chunks = SectionChunker::with_defaults().chunk("", "AAPL");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_no_headers_single_introduction_chunk() {
        let text = format!("Some opening narrative.\n{}", PADDING);
        let chunks = SectionChunker::with_defaults().chunk(&text, "AAPL");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, INTRODUCTION_SECTION);
        assert_eq!(chunks[0].start_line, 0);
        assert_eq!(chunks[0].end_line, 2);
    }

    #[test]
    fn test_sub_threshold_document_yields_nothing() {
        let chunks = SectionChunker::with_defaults().chunk("too short", "AAPL");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_section_merges_forward() {
        // "Business" 섹션이 짧으면 MD&A 청크로 앞부분이 병합됨
        let text = format!(
            "Item 1. Business\nSmall text\nItem 7. Management\nBigger text {}",
            PADDING
        );
        let chunks = chunker(100).chunk(&text, "AAPL");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "MD&A");
        assert!(chunks[0].text.contains("Small text"));
        assert!(chunks[0].text.contains("Bigger text"));
        // 병합된 청크는 앞선 시작 줄을 유지
        assert_eq!(chunks[0].start_line, 0);
        assert_eq!(chunks[0].end_line, 4);
    }

    #[test]
    fn test_two_substantial_sections() {
        let text = format!(
            "Item 1. Business\nAbout the business. {}\nItem 1A. Risk Factors\nThe risks. {}",
            PADDING, PADDING
        );
        let chunks = chunker(50).chunk(&text, "MSFT");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "Business");
        assert_eq!(chunks[1].section, "Risk Factors");
        // 헤더 줄은 자신이 여는 청크에만 속함
        assert!(chunks[0].text.starts_with("Item 1. Business"));
        assert!(!chunks[0].text.contains("Item 1A"));
        assert!(chunks[1].text.starts_with("Item 1A. Risk Factors"));
        assert_eq!(chunks[0].end_line, chunks[1].start_line);
    }

    #[test]
    fn test_table_stays_in_one_chunk() {
        // 테이블 셀 안의 "REVENUE"는 섹션 경계로 인식되면 안 됨
        let text = format!(
            "Item 8. Financial Statements\nIntro line. {}\n\
             | Metric | 2024 |\n| --- | --- |\n| REVENUE | 100 |\n| NET INCOME GROWTH | 5 |\n| Cost | 50 |\n\
             Closing line after the table.",
            PADDING
        );
        let chunks = chunker(50).chunk(&text, "AAPL");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "Financial Statements");
        assert!(chunks[0].text.contains("| REVENUE | 100 |"));
        assert!(chunks[0].text.contains("| Cost | 50 |"));
    }

    #[test]
    fn test_table_atomicity_across_boundary() {
        // 테이블이 끝난 뒤의 헤더 줄에서만 섹션이 바뀜
        let text = format!(
            "Item 7. Management\nDiscussion. {}\n| A | B |\n| --- | --- |\n| 1 | 2 |\n\
             Item 7A. Quantitative\nMarket risk detail. {}",
            PADDING, PADDING
        );
        let chunks = chunker(50).chunk(&text, "AAPL");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("| 1 | 2 |"));
        assert!(!chunks[1].text.contains("| 1 | 2 |"));
        assert_eq!(chunks[1].section, "Market Risk");
    }

    #[test]
    fn test_unterminated_table_is_flushed() {
        let text = format!(
            "Item 2. Properties\nFacilities. {}\n| Site | Sqft |\n| --- | --- |\n| HQ | 100 |",
            PADDING
        );
        let chunks = chunker(50).chunk(&text, "AAPL");

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("| HQ | 100 |"));
        assert_eq!(chunks[0].end_line, 5);
    }

    #[test]
    fn test_trailing_short_buffer_appends_to_previous() {
        let text = format!(
            "Item 1. Business\nThe business. {}\nItem 6. [Reserved]\nn/a",
            PADDING
        );
        let chunks = chunker(50).chunk(&text, "AAPL");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "Business");
        assert!(chunks[0].text.contains("[Reserved]"));
        assert_eq!(chunks[0].end_line, 4);
    }

    #[test]
    fn test_coverage_reconstructs_document() {
        let text = format!(
            "Preamble before items. {}\nItem 1. Business\nBody one. {}\n\
             | K | V |\n| --- | --- |\n| a | 1 |\n\nItem 7. Management\nBody two. {}",
            PADDING, PADDING, PADDING
        );
        let chunks = chunker(20).chunk(&text, "AAPL");

        let reconstructed: Vec<&str> = chunks.iter().flat_map(|c| c.text.lines()).collect();
        let original: Vec<&str> = text.lines().collect();
        assert_eq!(reconstructed, original);
    }

    #[test]
    fn test_min_substantiveness_holds() {
        let text = format!(
            "Item 1. Business\nBody. {}\nItem 3. Legal Proceedings\nMore. {}",
            PADDING, PADDING
        );
        for chunk in chunker(80).chunk(&text, "AAPL") {
            assert!(chunk.text.trim().chars().count() > 80);
        }
    }

    #[test]
    fn test_pattern_priority_case_insensitive() {
        let c = SectionChunker::with_defaults();
        assert_eq!(c.match_section("Item 7. Management's Discussion"), Some("MD&A"));
        assert_eq!(
            c.match_section("ITEM 7A. QUANTITATIVE AND QUALITATIVE"),
            Some("Market Risk")
        );
        assert_eq!(
            c.match_section("CONSOLIDATED STATEMENTS OF OPERATIONS"),
            Some("Income Statement")
        );
        assert_eq!(c.match_section("plain narrative line"), None);
        // 줄 시작 앵커: 중간 매치는 섹션이 아님
        assert_eq!(c.match_section("see Item 1. Business above"), None);
    }

    #[test]
    fn test_table_count() {
        let chunk = SectionChunk {
            ticker: "AAPL".to_string(),
            section: "Financial Statements".to_string(),
            text: "| A | B |\n| --- | --- |\n| 1 | 2 |".to_string(),
            start_line: 0,
            end_line: 3,
        };
        assert_eq!(chunk.table_count(), 1);
        assert_eq!(chunk.byte_len(), chunk.text.len());
    }

    #[test]
    fn test_strip_xbrl_noise() {
        let content = "xml version\naapl-20240928\nfalse\nus-gaap:RevenueMember note\n\n\
                       UNITED STATES SECURITIES AND EXCHANGE COMMISSION\nbody with us-gaap: later";
        let cleaned = strip_xbrl_noise(content);

        assert!(cleaned.starts_with("UNITED STATES"));
        // 스킵 종료 이후의 줄은 지표가 있어도 통과
        assert!(cleaned.contains("us-gaap: later"));
    }

    #[test]
    fn test_strip_xbrl_noise_clean_document() {
        let content = "Item 1. Business\nAll regular content.";
        assert_eq!(strip_xbrl_noise(content), content);
    }
}
