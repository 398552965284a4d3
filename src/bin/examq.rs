//! CLI binary for edgequake-exam.
//!
//! A thin shim over the library crate: each subcommand maps its flags to an
//! `ExamConfig`, runs one library operation and writes JSON.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_exam::{
    extract_pdf, generate_questions, solve_pyqs, write_json, ExamConfig, ExtractedQuestion,
    ExtractionProgressCallback, GeminiBackend, GenerationRequest, KeyPool, ModelBackend,
    ModelClient, PageSelection, Pass, PreviousYearQuestion, ProgressCallback, ProviderBackend,
    QuestionType, ReviewOutcome, Reviewer, Topic,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar across both passes: `2 × pages` steps.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} steps  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(2 * total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Pass 1");
        self.bar.reset_eta();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting questions from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, pass: Pass, page: usize, _total: usize) {
        self.bar.set_prefix(match pass {
            Pass::Structure => "Pass 1",
            Pass::Extraction => "Pass 2",
        });
        self.bar.set_message(format!("{pass} page {page}"));
    }

    fn on_page_complete(&self, pass: Pass, page: usize, total: usize, items: usize) {
        let detail = match pass {
            Pass::Structure if items > 0 => "shared description".to_string(),
            Pass::Structure => String::new(),
            Pass::Extraction => format!("{items:>3} questions"),
        };
        self.bar.println(format!(
            "  {} {:<10} page {:>3}/{:<3}  {}",
            green("✓"),
            pass,
            page,
            total,
            dim(&detail),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, pass: Pass, page: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<10} page {:>3}/{:<3}  {}",
            red("✗"),
            pass,
            page,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, total_questions: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} questions from {} pages{}",
            if errors == 0 { green("✔") } else { cyan("⚠") },
            bold(&total_questions.to_string()),
            total_pages,
            if errors == 0 {
                String::new()
            } else {
                format!("  ({} page failures)", red(&errors.to_string()))
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every question from a paper
  examq extract paper.pdf -o questions.json

  # Only pages 3-7, no pauses (paid quota)
  examq extract --pages 3-7 --structure-delay-ms 0 --extraction-delay-ms 0 paper.pdf

  # Generate five MCQs for a topic and check their answers
  examq generate --topic topic.json --exam JEE --course Physics --type MCQ --count 5 --review

  # Solve, validate and repair an existing question bank
  examq review questions.json -o reviewed.json

  # Answers for previous-year questions
  examq solve-pyqs --pyqs pyqs.json --notes notes.md

ENVIRONMENT VARIABLES:
  GEMINI_API_KEYS   Comma-separated Gemini keys, rotated least-used first
  GEMINI_API_KEY    A single Gemini key (added to the pool)
  EXAMQ_MODEL       Model ID (default: gemini-1.5-flash)
  EXAMQ_PROVIDER    Use an edgequake-llm provider instead of Gemini REST
  PDFIUM_LIB_PATH   Path to libpdfium (file or directory)
"#;

/// Extract, generate and repair exam questions with a multimodal LLM.
#[derive(Parser, Debug)]
#[command(
    name = "examq",
    version,
    about = "Extract, generate and repair exam questions with a multimodal LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Model ID passed to the backend.
    #[arg(long, global = true, env = "EXAMQ_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider (openai, anthropic, gemini, ollama …).
    /// Without it, calls go to the Gemini REST API with pooled keys.
    #[arg(long, global = true, env = "EXAMQ_PROVIDER")]
    provider: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "EXAMQ_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Wait before retrying a rate-limited call with the next key.
    #[arg(long, global = true, env = "EXAMQ_RETRY_BACKOFF_MS", default_value_t = 2000)]
    retry_backoff_ms: u64,

    /// Attempts per call (default: one per key).
    #[arg(long, global = true, env = "EXAMQ_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Max output tokens per call.
    #[arg(long, global = true, env = "EXAMQ_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EXAMQ_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EXAMQ_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract questions from a scanned question paper.
    Extract(ExtractArgs),
    /// Generate practice questions for a topic.
    Generate(GenerateArgs),
    /// Solve, validate and repair questions.
    Review(ReviewArgs),
    /// Write answers and solutions for previous-year questions.
    SolvePyqs(SolvePyqsArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// PDF file.
    pdf: PathBuf,

    /// Output JSON file (ExtractionOutput). Default: stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "EXAMQ_PAGES", default_value = "all")]
    pages: String,

    /// Pause between pages in pass 1.
    #[arg(long, env = "EXAMQ_STRUCTURE_DELAY_MS", default_value_t = 5000)]
    structure_delay_ms: u64,

    /// Pause between pages in pass 2.
    #[arg(long, env = "EXAMQ_EXTRACTION_DELAY_MS", default_value_t = 10000)]
    extraction_delay_ms: u64,

    /// Prior questions shown to the model on each page.
    #[arg(long, default_value_t = 3)]
    context_window: usize,

    /// Longest rendered page edge in pixels.
    #[arg(long, default_value_t = 2000)]
    max_pixels: u32,

    /// PDF user password.
    #[arg(long, env = "EXAMQ_PASSWORD")]
    password: Option<String>,

    /// Write only the question list instead of the full report.
    #[arg(long)]
    questions_only: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Topic JSON: {"id", "name", "notes"?, "weightage"?}.
    #[arg(long)]
    topic: PathBuf,

    #[arg(long)]
    exam: String,

    #[arg(long)]
    course: String,

    /// MCQ, MSQ, NAT or Subjective.
    #[arg(long = "type", value_parser = parse_question_type)]
    question_type: QuestionType,

    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Previous-year questions JSON (array).
    #[arg(long)]
    pyqs: Option<PathBuf>,

    /// Questions already generated for this topic (JSON array of questions).
    #[arg(long)]
    existing: Option<PathBuf>,

    /// Run every generated question through solve/validate/fix and keep
    /// only accepted ones.
    #[arg(long)]
    review: bool,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    /// Questions JSON: an array, or an extraction report.
    questions: PathBuf,

    /// Seed for MCQ answer placement.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SolvePyqsArgs {
    /// Previous-year questions JSON (array). Only the first 5 are solved.
    #[arg(long)]
    pyqs: PathBuf,

    /// Topic notes file.
    #[arg(long)]
    notes: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_question_type(s: &str) -> Result<QuestionType, String> {
    s.parse()
}

/// Review results as written to disk.
#[derive(Serialize, Default)]
struct ReviewReport {
    accepted: Vec<ExtractedQuestion>,
    rejected: Vec<RejectedQuestion>,
    fixed_count: usize,
}

#[derive(Serialize)]
struct RejectedQuestion {
    question: ExtractedQuestion,
    reason: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would interleave with the progress bar.
    let show_progress = match cli.command {
        Command::Extract(ref args) => !cli.common.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.common.verbose {
        "debug"
    } else if cli.common.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let client = build_client(&cli.common)?;

    match cli.command {
        Command::Extract(args) => run_extract(&cli.common, &client, args, show_progress).await,
        Command::Generate(args) => run_generate(&cli.common, &client, args).await,
        Command::Review(args) => run_review(&cli.common, &client, args).await,
        Command::SolvePyqs(args) => run_solve_pyqs(&client, args).await,
    }
}

/// Backend plus key pool for every subcommand.
fn build_client(common: &CommonArgs) -> Result<ModelClient> {
    let config = base_config(common)?;
    let backend: Arc<dyn ModelBackend> = match common.provider {
        Some(ref provider) => {
            let model = common.model.as_deref().unwrap_or("gemini-1.5-flash");
            Arc::new(ProviderBackend::from_name(provider, model).context("Failed to create provider")?)
        }
        None => Arc::new(GeminiBackend::from_config(&config).context("Failed to create Gemini client")?),
    };

    // Providers read their own key; one pool slot keeps retry accounting.
    let pool = match common.provider {
        Some(ref provider) => KeyPool::from_env().or_else(|_| KeyPool::new([format!("{provider}-env")])),
        None => KeyPool::from_env(),
    }
    .context("No API keys: set GEMINI_API_KEYS or GEMINI_API_KEY")?;

    Ok(ModelClient::from_config(backend, Arc::new(pool), &config))
}

fn base_config(common: &CommonArgs) -> Result<ExamConfig> {
    let mut builder = ExamConfig::builder()
        .api_timeout_secs(common.api_timeout)
        .retry_backoff_ms(common.retry_backoff_ms)
        .max_output_tokens(common.max_tokens);
    if let Some(n) = common.max_attempts {
        builder = builder.max_attempts(n);
    }
    if let Some(ref model) = common.model {
        builder = builder.model(model.clone());
    }
    builder.build().context("Invalid configuration")
}

async fn run_extract(
    common: &CommonArgs,
    client: &ModelClient,
    args: ExtractArgs,
    show_progress: bool,
) -> Result<()> {
    let pages: PageSelection = args.pages.parse().map_err(anyhow::Error::msg)?;

    let mut builder = ExamConfig::builder()
        .retry_backoff_ms(common.retry_backoff_ms)
        .max_output_tokens(common.max_tokens)
        .structure_delay_ms(args.structure_delay_ms)
        .extraction_delay_ms(args.extraction_delay_ms)
        .context_window(args.context_window)
        .max_rendered_pixels(args.max_pixels)
        .pages(pages);
    if let Some(ref password) = args.password {
        builder = builder.password(password.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let output = extract_pdf(&args.pdf, client, &config)
        .await
        .with_context(|| format!("Extraction failed for {}", args.pdf.display()))?;

    if !common.quiet && !show_progress {
        eprintln!(
            "Extracted {} questions from {} pages in {}ms",
            output.stats.total_questions, output.stats.total_pages, output.stats.total_duration_ms
        );
    }
    let empty = output.empty_pages();
    if !common.quiet && !empty.is_empty() {
        eprintln!("   {} {:?}", dim("pages with no questions:"), empty);
    }

    if args.questions_only {
        emit(args.output.as_deref(), &output.questions, common.quiet).await
    } else {
        emit(args.output.as_deref(), &output, common.quiet).await
    }
}

async fn run_generate(common: &CommonArgs, client: &ModelClient, args: GenerateArgs) -> Result<()> {
    let topic: Topic = read_json(&args.topic).await?;
    let pyqs: Vec<PreviousYearQuestion> = match args.pyqs {
        Some(ref path) => read_json(path).await?,
        None => Vec::new(),
    };
    let existing: Vec<ExtractedQuestion> = match args.existing {
        Some(ref path) => read_json(path).await?,
        None => Vec::new(),
    };
    let recent: Vec<String> = existing.iter().map(|q| q.question_statement.clone()).collect();
    let existing_context = recent.join("\n\n");

    let config = base_config(common)?;
    let request = GenerationRequest {
        topic: &topic,
        exam_name: &args.exam,
        course_name: &args.course,
        question_type: args.question_type,
        pyqs: &pyqs,
        existing_context: &existing_context,
        recent: &recent,
        count: args.count,
    };
    let generated = generate_questions(client, &request, &config)
        .await
        .with_context(|| format!("Generation failed for topic {}", topic.name))?;

    if !args.review {
        if !common.quiet {
            eprintln!("{} {} questions generated", green("✔"), generated.len());
        }
        return emit(args.output.as_deref(), &generated, common.quiet).await;
    }

    let report = review_all(&Reviewer::new(client.clone()), &generated, common.quiet).await;
    emit(args.output.as_deref(), &report.accepted, common.quiet).await
}

async fn run_review(common: &CommonArgs, client: &ModelClient, args: ReviewArgs) -> Result<()> {
    let questions = read_questions(&args.questions).await?;
    let reviewer = match args.seed {
        Some(seed) => Reviewer::with_seed(client.clone(), seed),
        None => Reviewer::new(client.clone()),
    };
    let report = review_all(&reviewer, &questions, common.quiet).await;
    emit(args.output.as_deref(), &report, common.quiet).await
}

async fn run_solve_pyqs(client: &ModelClient, args: SolvePyqsArgs) -> Result<()> {
    let pyqs: Vec<PreviousYearQuestion> = read_json(&args.pyqs).await?;
    let notes = match args.notes {
        Some(ref path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read notes from {}", path.display()))?,
        None => String::new(),
    };
    let solutions = solve_pyqs(client, &pyqs, &notes)
        .await
        .context("Solving previous-year questions failed")?;
    emit(args.output.as_deref(), &solutions, false).await
}

/// Review questions one by one. A failed review rejects that question and
/// the batch carries on.
async fn review_all(reviewer: &Reviewer, questions: &[ExtractedQuestion], quiet: bool) -> ReviewReport {
    let mut report = ReviewReport::default();
    let mut letters: BTreeMap<String, usize> = BTreeMap::new();

    for (i, question) in questions.iter().enumerate() {
        let label = format!("{}/{}", i + 1, questions.len());
        match reviewer.review(question).await {
            Ok(outcome) => {
                let fixed = outcome.was_fixed();
                match outcome {
                    ReviewOutcome::Accepted { question, .. } => {
                        if !quiet {
                            eprintln!(
                                "  {} {:<7} {}",
                                green("✓"),
                                label,
                                dim(if fixed { "fixed" } else { "accepted" })
                            );
                        }
                        if question.question_type == QuestionType::Mcq {
                            *letters.entry(question.answer().to_string()).or_default() += 1;
                        }
                        report.fixed_count += usize::from(fixed);
                        report.accepted.push(question);
                    }
                    ReviewOutcome::Rejected { question, issues } => {
                        if !quiet {
                            eprintln!("  {} {:<7} {}", red("✗"), label, red(&issues.join("; ")));
                        }
                        report.rejected.push(RejectedQuestion {
                            question,
                            reason: issues,
                        });
                    }
                }
            }
            Err(e) => {
                if !quiet {
                    eprintln!("  {} {:<7} {}", red("✗"), label, red(&e.to_string()));
                }
                report.rejected.push(RejectedQuestion {
                    question: question.clone(),
                    reason: vec![format!("Validation error: {e}")],
                });
            }
        }
    }

    if !quiet {
        eprintln!(
            "{} {} accepted ({} fixed), {} rejected",
            if report.rejected.is_empty() { green("✔") } else { cyan("⚠") },
            bold(&report.accepted.len().to_string()),
            report.fixed_count,
            report.rejected.len()
        );
        if !letters.is_empty() {
            eprintln!("   {} {:?}", dim("MCQ answer letters:"), letters);
        }
    }
    report
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// A plain question array, or the `questions` field of an extraction report.
async fn read_questions(path: &Path) -> Result<Vec<ExtractedQuestion>> {
    let value: serde_json::Value = read_json(path).await?;
    let list = match value {
        serde_json::Value::Object(mut map) => map.remove("questions").unwrap_or_default(),
        other => other,
    };
    serde_json::from_value(list).with_context(|| format!("No question list in {}", path.display()))
}

/// Write JSON to `output`, or pretty-print to stdout.
async fn emit<T: Serialize + ?Sized>(output: Option<&Path>, value: &T, quiet: bool) -> Result<()> {
    match output {
        Some(path) => {
            write_json(path, value)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !quiet {
                eprintln!("   → {}", bold(&path.display().to_string()));
            }
        }
        None => {
            let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
            println!("{json}");
        }
    }
    Ok(())
}
