//! CLI 모듈
//!
//! oilnews-rag CLI 명령어 정의 및 구현

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::engine::{NewsEngine, SearchResult};
use crate::feed::FeedReader;
use crate::knowledge::{RawArticle, TopicLabel};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "oilnews-rag")]
#[command(version, about = "오일/가스 뉴스 질의응답 엔진", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (OILNEWS_DATA_DIR보다 우선)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 기사 파일, 폴더, 또는 직접 입력한 기사를 수집
    Ingest {
        /// 기사 파일 (CSV, JSON, JSONL)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 기사 파일 폴더 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 기사 제목
        #[arg(long)]
        title: Option<String>,

        /// 기사 본문
        #[arg(long)]
        body: Option<String>,

        /// 기사 URL
        #[arg(short, long)]
        url: Option<String>,

        /// 출처 (e.g. reuters)
        #[arg(short, long)]
        source: Option<String>,

        /// 발행일
        #[arg(long)]
        date: Option<String>,
    },

    /// 질문에 답변할 기사 검색
    Query {
        /// 질문
        query: String,

        /// 결과 개수 (기본값: 설정의 default_top_k)
        #[arg(short, long)]
        limit: Option<usize>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 대화형 질의 (quit 입력 시 종료)
    Chat {
        /// 결과 개수
        #[arg(short, long, default_value = "3")]
        limit: usize,
    },

    /// 저장된 기사 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// 토픽 필터 (e.g. price_market)
        #[arg(short, long)]
        topic: Option<String>,
    },

    /// 기사 상세 보기
    Show {
        /// 기사 ID
        id: String,
    },

    /// 저장소 통계
    Stats {
        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 헬스 체크
    Health,

    /// 저장된 기사로 임베딩/토픽 모델 재학습
    Retrain,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Ingest {
            file,
            dir,
            title,
            body,
            url,
            source,
            date,
        } => {
            let inline = InlineArticle {
                title,
                body,
                url,
                source,
                date,
            };
            cmd_ingest(data_dir, file, dir, inline)
        }
        Commands::Query { query, limit, json } => cmd_query(data_dir, &query, limit, json),
        Commands::Chat { limit } => cmd_chat(data_dir, limit),
        Commands::List { limit, topic } => cmd_list(data_dir, limit, topic),
        Commands::Show { id } => cmd_show(data_dir, &id),
        Commands::Stats { json } => cmd_stats(data_dir, json),
        Commands::Health => cmd_health(data_dir),
        Commands::Retrain => cmd_retrain(data_dir),
        Commands::Status => cmd_status(data_dir),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 명령줄로 직접 입력한 기사
struct InlineArticle {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
    source: Option<String>,
    date: Option<String>,
}

impl InlineArticle {
    fn into_raw(self) -> Result<RawArticle> {
        let Some(body) = self.body else {
            bail!("--file, --dir, 또는 --body/--url 중 하나를 지정해야 합니다");
        };
        let Some(url) = self.url else {
            bail!("직접 입력한 기사에는 --url이 필요합니다");
        };

        Ok(RawArticle {
            id: None,
            source: self.source.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            date: self.date,
            url,
            body,
        })
    }
}

/// 설정 로드 후 엔진 열기 (`--data-dir`이 환경 변수보다 우선)
fn open_engine(data_dir: Option<PathBuf>) -> Result<NewsEngine> {
    let config = load_config(data_dir)?;
    NewsEngine::open(config).context("엔진 초기화 실패")
}

fn load_config(data_dir: Option<PathBuf>) -> Result<EngineConfig> {
    let data_dir = data_dir.map(|p| p.to_string_lossy().to_string());
    EngineConfig::load_with(|key| match (key, &data_dir) {
        ("OILNEWS_DATA_DIR", Some(dir)) => Some(dir.clone()),
        _ => std::env::var(key).ok(),
    })
    .context("설정 로드 실패")
}

/// 수집 명령어 (ingest)
///
/// 파일/폴더의 기사 레코드 또는 직접 입력한 기사 하나를 수집합니다.
fn cmd_ingest(
    data_dir: Option<PathBuf>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    inline: InlineArticle,
) -> Result<()> {
    let engine = open_engine(data_dir)?;

    let Some(path) = file.or(dir) else {
        let raw = inline.into_raw()?;
        println!("[*] 기사 처리 중: {}", raw.url);

        let ingested = engine.ingest(raw).context("기사 수집 실패")?;
        let article = &ingested.article;
        if ingested.duplicate {
            println!("[!] 이미 저장된 기사입니다 (ID: {})", article.id);
        } else {
            println!("[OK] 기사가 추가되었습니다 (ID: {})", article.id);
        }
        println!(
            "     토픽: {} ({:.2})",
            article.topic(),
            article.analysis.topic_confidence
        );
        println!("     엔티티: {} 개", article.analysis.entities.len());
        return Ok(());
    };

    let reader = FeedReader::with_defaults();
    let raws = reader
        .read_path(&path)
        .with_context(|| format!("기사 파일 읽기 실패: {:?}", path))?;

    if raws.is_empty() {
        println!("[!] 수집할 기사가 없습니다.");
        return Ok(());
    }

    println!("[*] 수집 대상: {} 건", raws.len());

    let report = engine.ingest_batch(raws).context("배치 수집 실패")?;

    for failure in &report.failures {
        println!(
            "[!] #{} 건너뜀: {} ({})",
            failure.position + 1,
            truncate_text(&failure.url, 60),
            failure.reason
        );
    }

    println!();
    println!(
        "[OK] 완료: 추가 {}, 중복 {}, 실패 {}",
        report.inserted,
        report.duplicates,
        report.failures.len()
    );
    println!("     인덱스: {} 건", report.index_size);

    Ok(())
}

/// 질의 명령어 (query)
fn cmd_query(data_dir: Option<PathBuf>, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let engine = open_engine(data_dir)?;
    let top_k = limit.unwrap_or(engine.config().default_top_k);

    let results = engine.answer(query, top_k).context("질의 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("[*] 질문: \"{}\"", query);
    print_results(&results);
    Ok(())
}

/// 대화형 질의 (chat)
fn cmd_chat(data_dir: Option<PathBuf>, limit: usize) -> Result<()> {
    let engine = open_engine(data_dir)?;
    let health = engine.health()?;

    println!("oilnews-rag chat ({} 건 인덱싱됨)", health.index_size);
    println!("질문을 입력하세요. 종료: quit");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("입력 읽기 실패")?;
        let query = line.trim();

        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        match engine.answer(query, limit) {
            Ok(results) => print_results(&results),
            Err(e) => println!("[!] 질의 실패: {}", e),
        }
    }

    println!("[OK] 종료");
    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(data_dir: Option<PathBuf>, limit: usize, topic: Option<String>) -> Result<()> {
    let topic = topic
        .map(|t| t.parse::<TopicLabel>())
        .transpose()
        .context("알 수 없는 토픽")?;

    let engine = open_engine(data_dir)?;
    let articles = engine.list(limit, topic).context("기사 목록 조회 실패")?;

    if articles.is_empty() {
        println!("[!] 저장된 기사가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 기사 ({} 건):\n", articles.len());

    for article in articles {
        let date = article
            .published_on
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        println!(
            "  [{}] {} {}",
            article.topic(),
            date,
            truncate_text(&article.title, 60)
        );
        println!("        ID: {}", article.id);
        println!("        {} | {}", article.source, article.url);
        println!();
    }

    Ok(())
}

/// 기사 상세 (show)
fn cmd_show(data_dir: Option<PathBuf>, id: &str) -> Result<()> {
    let engine = open_engine(data_dir)?;
    let article = engine
        .get(id)
        .context("기사 조회 실패")?
        .ok_or_else(|| anyhow::anyhow!("ID '{}'인 기사를 찾을 수 없습니다", id))?;

    println!("{}", article.title);
    println!();
    println!("ID:     {}", article.id);
    println!("출처:   {}", article.source);
    println!(
        "발행일: {}",
        article
            .published_on
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("URL:    {}", article.url);
    println!(
        "토픽:   {} ({:.2})",
        article.topic(),
        article.analysis.topic_confidence
    );
    println!("수집:   {}", article.ingested_at.format("%Y-%m-%d %H:%M"));

    if !article.analysis.entities.is_empty() {
        println!();
        println!("엔티티:");
        for entity in &article.analysis.entities {
            println!("  - [{}] {}", entity.kind.as_str(), entity.normalized);
        }
    }

    println!();
    println!("{}", truncate_text(&article.body, 600));
    Ok(())
}

/// 통계 명령어 (stats)
fn cmd_stats(data_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let engine = open_engine(data_dir)?;
    let stats = engine.stats().context("통계 조회 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("[OK] 저장된 기사: {} 건", stats.article_count);
    match stats.last_ingestion_time {
        Some(time) => println!("     마지막 수집: {}", time.format("%Y-%m-%d %H:%M:%S")),
        None => println!("     마지막 수집: -"),
    }

    if !stats.topic_distribution.is_empty() {
        println!();
        println!("토픽 분포:");
        for (topic, count) in &stats.topic_distribution {
            println!("  {:<14} {}", topic.as_str(), count);
        }
    }

    Ok(())
}

/// 헬스 체크 (health)
fn cmd_health(data_dir: Option<PathBuf>) -> Result<()> {
    let engine = open_engine(data_dir)?;
    let health = engine.health()?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

/// 재학습 명령어 (retrain)
fn cmd_retrain(data_dir: Option<PathBuf>) -> Result<()> {
    let engine = open_engine(data_dir)?;

    println!("[*] 재학습 중...");
    let report = engine.retrain().context("재학습 실패")?;

    if report.articles == 0 {
        println!("[!] 저장된 기사가 없어 재학습을 건너뜁니다.");
        return Ok(());
    }

    println!("[OK] {} 건으로 재학습 완료", report.articles);
    println!("     임베딩 모델: {}", report.embedding_version);
    if let Some(topic) = &report.topic_version {
        println!("     토픽 모델:   {}", topic);
    }

    println!();
    println!("약한 라벨 분포:");
    for (topic, count) in &report.weak_labels {
        println!("  {:<14} {}", topic.as_str(), count);
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(data_dir: Option<PathBuf>) -> Result<()> {
    println!("oilnews-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = load_config(data_dir)?;
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    let db_path = config.db_path();
    match std::fs::metadata(&db_path) {
        Ok(meta) => println!("[*] DB: {} ({})", db_path.display(), format_bytes(meta.len() as usize)),
        Err(_) => println!("[!] DB 없음: {}", db_path.display()),
    }

    match NewsEngine::open(config) {
        Ok(engine) => {
            match engine.health() {
                Ok(health) => {
                    let versions = &health.model_versions;
                    println!("[OK] 임베딩 모델: {}", versions.embedding);
                    match &versions.topic {
                        Some(topic) => println!("[OK] 토픽 모델: {}", topic),
                        None => println!("[!] 토픽 모델: 미로드 (모든 기사 'other')"),
                    }
                    println!("[OK] 엔티티 모델: {}", versions.entity);
                    println!("[OK] 인덱스: {} 건", health.index_size);
                }
                Err(e) => println!("[!] 헬스 체크 실패: {}", e),
            }

            match engine.store().model_versions() {
                Ok(records) if !records.is_empty() => {
                    println!();
                    println!("기록된 모델 버전:");
                    for record in records {
                        println!(
                            "  {:<10} {} ({})",
                            record.kind,
                            record.version,
                            record.updated_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Model version lookup failed: {}", e),
            }
        }
        Err(e) => {
            println!("[!] 엔진 초기화 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("\n[!] 관련 기사가 없습니다.");
        return;
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let article = &result.article;
        let date = article
            .published_on
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        println!(
            "{}. [점수: {:.4}] [{}] {}",
            i + 1,
            result.score,
            article.topic(),
            article.title
        );
        println!("   {} | {} | {}", article.source, date, article.url);
        println!("   답변: {}", truncate_text(result.display_answer(), 300));

        for fact in &result.key_facts {
            println!("   - {}", truncate_text(fact, 200));
        }

        println!();
    }
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
