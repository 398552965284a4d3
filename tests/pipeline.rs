//! Offline integration tests: the full pipeline against a scripted model.
//!
//! Every test runs in-process with a [`ModelBackend`] that answers from a
//! closure, so no network, pdfium or API key is needed. Page images are fake
//! payloads of the form `page-<n>` so the script can tell pages apart.

use async_trait::async_trait;
use edgequake_exam::{
    extract_questions, generate_questions, BackendError, Credential, ExamConfig, ExamError,
    ExtractionProgressCallback, GenerationRequest, InlineImage, KeyPool, ModelBackend,
    ModelClient, ModelRequest, NoDelay, PageError, Pass, QuestionType, ReviewOutcome, Reviewer,
    Throttle, Topic,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

type Script = dyn Fn(&ModelRequest, &Credential) -> Result<String, BackendError> + Send + Sync;

/// Answers every request with `script`, recording the credential used.
struct ScriptedModel {
    script: Box<Script>,
    keys_used: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(
        script: impl Fn(&ModelRequest, &Credential) -> Result<String, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            keys_used: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest, credential: &Credential) -> Result<String, BackendError> {
        self.keys_used
            .lock()
            .unwrap()
            .push(credential.secret().to_string());
        (self.script)(request, credential)
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pages(n: usize) -> Vec<InlineImage> {
    (1..=n).map(|i| InlineImage::png(format!("page-{i}"))).collect()
}

/// Page number encoded in the request image, if any.
fn page_of(request: &ModelRequest) -> Option<usize> {
    request
        .image
        .as_ref()
        .and_then(|img| img.data.strip_prefix("page-"))
        .and_then(|n| n.parse().ok())
}

fn is_structure(request: &ModelRequest) -> bool {
    request.prompt.contains("sharedDescription")
}

fn no_delay_config() -> ExamConfig {
    ExamConfig::builder()
        .structure_throttle(Arc::new(NoDelay))
        .extraction_throttle(Arc::new(NoDelay))
        .retry_backoff_ms(10)
        .build()
        .unwrap()
}

fn client(backend: Arc<ScriptedModel>, keys: &[&str], config: &ExamConfig) -> ModelClient {
    let pool = Arc::new(KeyPool::new(keys.iter().copied()).unwrap());
    ModelClient::from_config(backend, pool, config)
}

/// Two questions per page; the model claims every one is on page 99.
fn two_per_page(request: &ModelRequest, _: &Credential) -> Result<String, BackendError> {
    let page = page_of(request).unwrap_or(0);
    if is_structure(request) {
        return Ok(r#"{"sharedDescription": null, "hasMultiPageQuestion": false, "questionNumbers": []}"#.into());
    }
    Ok(format!(
        r#"```json
[
  {{"question_number": "{a}", "question_type": "NAT", "question_statement": "Page {page} first", "page_number": 99}},
  {{"question_number": "{b}", "question_type": "NAT", "question_statement": "Page {page} second", "page_number": 99}}
]
```"#,
        a = page * 2 - 1,
        b = page * 2
    ))
}

// ── Key pool ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pool_usage_is_balanced() {
    let backend = ScriptedModel::new(|_, _| Ok("ok".into()));
    let config = no_delay_config();
    let client = client(backend.clone(), &["k1", "k2", "k3"], &config);
    let request = ModelRequest::text("ping", edgequake_exam::SamplingParams::PRECISE);

    for _ in 0..30 {
        assert_ok!(client.call("ping", &request).await);
    }
    for (_, used) in client.pool().usage() {
        assert_eq!(used, 10);
    }
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_is_pool_size() {
    init_tracing();
    let backend = ScriptedModel::new(|_, _| Err(BackendError::new("HTTP 429: quota exceeded")));
    let config = ExamConfig::builder().retry_backoff_ms(2000).build().unwrap();
    let client = client(backend.clone(), &["k1", "k2", "k3"], &config);
    let request = ModelRequest::text("ping", edgequake_exam::SamplingParams::PRECISE);

    let err = assert_err!(client.call("solve", &request).await);
    assert!(
        matches!(err, ExamError::PoolExhausted { attempts: 3, .. }),
        "{err:?}"
    );
    assert_eq!(*backend.keys_used.lock().unwrap(), vec!["k1", "k2", "k3"]);
}

// ── Two-pass driver ──────────────────────────────────────────────────────────

#[tokio::test]
async fn page_numbers_come_from_the_driver() {
    let backend = ScriptedModel::new(two_per_page);
    let config = no_delay_config();
    let client = client(backend, &["k1"], &config);

    let out = extract_questions(&client, &pages(3), &config).await;
    let numbers: Vec<usize> = out.questions.iter().map(|q| q.page_number).collect();
    assert_eq!(numbers, vec![1, 1, 2, 2, 3, 3]);
    assert_eq!(out.stats.total_questions, 6);
    assert!(out.failed_pages().is_empty());
}

#[tokio::test]
async fn start_page_offsets_numbering() {
    let backend = ScriptedModel::new(two_per_page);
    let config = ExamConfig::builder()
        .structure_throttle(Arc::new(NoDelay))
        .extraction_throttle(Arc::new(NoDelay))
        .start_page(5)
        .build()
        .unwrap();
    let client = client(backend, &["k1"], &config);

    let out = extract_questions(&client, &pages(2), &config).await;
    assert_eq!(out.pages[0].page_number, 5);
    assert!(out.questions.iter().all(|q| q.page_number >= 5));
}

#[tokio::test]
async fn page_two_failure_keeps_pages_one_and_three() {
    init_tracing();
    let backend = ScriptedModel::new(|request, cred| {
        if !is_structure(request) && page_of(request) == Some(2) {
            return Err(BackendError::new("HTTP 500: internal error"));
        }
        two_per_page(request, cred)
    });
    let config = no_delay_config();
    let client = client(backend, &["k1", "k2"], &config);

    let out = extract_questions(&client, &pages(3), &config).await;
    let statements: Vec<&str> = out
        .questions
        .iter()
        .map(|q| q.question_statement.as_str())
        .collect();
    assert_eq!(
        statements,
        vec!["Page 1 first", "Page 1 second", "Page 3 first", "Page 3 second"]
    );
    assert_eq!(out.failed_pages(), vec![2]);
    assert_eq!(out.empty_pages(), vec![2]);
    assert!(matches!(
        out.pages[1].errors[0],
        PageError::ExtractionFailed { page: 2, .. }
    ));
    assert_eq!(out.stats.extraction_failures, 1);
}

#[tokio::test]
async fn structure_failure_does_not_block_extraction() {
    init_tracing();
    let backend = ScriptedModel::new(|request, cred| {
        if is_structure(request) && page_of(request) == Some(1) {
            return Err(BackendError::new("HTTP 503: unavailable"));
        }
        two_per_page(request, cred)
    });
    let config = no_delay_config();
    let client = client(backend, &["k1"], &config);

    let out = extract_questions(&client, &pages(2), &config).await;
    assert_eq!(out.questions.len(), 4);
    assert_eq!(out.stats.structure_failures, 1);
    assert!(matches!(
        out.pages[0].errors[0],
        PageError::StructureFailed { page: 1, .. }
    ));
}

#[tokio::test]
async fn shared_description_reaches_its_page_only() {
    let prompts: Arc<Mutex<Vec<(usize, String)>>> = Arc::default();
    let seen = prompts.clone();
    let backend = ScriptedModel::new(move |request, cred| {
        let page = page_of(request).unwrap_or(0);
        if is_structure(request) {
            if page == 2 {
                return Ok(r#"{"sharedDescription": "Read the passage about tides.", "hasMultiPageQuestion": true, "questionNumbers": [17, "18"]}"#.into());
            }
            return Ok("{}".into());
        }
        seen.lock().unwrap().push((page, request.prompt.clone()));
        two_per_page(request, cred)
    });
    let config = no_delay_config();
    let client = client(backend, &["k1"], &config);

    let out = extract_questions(&client, &pages(3), &config).await;
    assert!(out.pages[1].has_shared_description);
    assert!(out.pages[1].has_multi_page_question);
    assert_eq!(out.pages[1].question_numbers, vec!["17", "18"]);
    assert_eq!(out.stats.shared_descriptions, 1);

    let prompts = prompts.lock().unwrap();
    for (page, prompt) in prompts.iter() {
        assert_eq!(
            prompt.contains("Read the passage about tides."),
            *page == 2,
            "page {page}"
        );
    }
    // Rolling context: page 3 sees page 2's questions.
    let (_, third) = &prompts[2];
    assert!(third.contains("Q4: Page 2 second..."), "{third}");
}

#[tokio::test]
async fn unparseable_page_is_empty_not_failed() {
    init_tracing();
    let backend = ScriptedModel::new(|request, cred| {
        if !is_structure(request) && page_of(request) == Some(1) {
            return Ok("I could not find any questions, sorry.".into());
        }
        two_per_page(request, cred)
    });
    let config = no_delay_config();
    let client = client(backend, &["k1"], &config);

    let out = extract_questions(&client, &pages(2), &config).await;
    assert_eq!(out.questions.len(), 2);
    assert_eq!(out.empty_pages(), vec![1]);
    assert!(out.failed_pages().is_empty());
}

#[derive(Default)]
struct CountingThrottle(AtomicUsize);

#[async_trait]
impl Throttle for CountingThrottle {
    async fn pause(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn throttle_runs_between_pages_in_each_pass() {
    let backend = ScriptedModel::new(|request, cred| {
        if page_of(request) == Some(2) {
            return Err(BackendError::new("HTTP 500"));
        }
        two_per_page(request, cred)
    });
    let structure = Arc::new(CountingThrottle::default());
    let extraction = Arc::new(CountingThrottle::default());
    let config = ExamConfig::builder()
        .structure_throttle(structure.clone())
        .extraction_throttle(extraction.clone())
        .build()
        .unwrap();
    let client = client(backend, &["k1"], &config);

    extract_questions(&client, &pages(4), &config).await;
    assert_eq!(structure.0.load(Ordering::SeqCst), 3);
    assert_eq!(extraction.0.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn default_delays_pace_the_passes() {
    let backend = ScriptedModel::new(two_per_page);
    let config = ExamConfig::default();
    let client = client(backend, &["k1"], &config);

    let start = tokio::time::Instant::now();
    extract_questions(&client, &pages(3), &config).await;
    // Two gaps per pass: 2 × 5 s + 2 × 10 s.
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl ExtractionProgressCallback for EventLog {
    fn on_extraction_start(&self, total: usize) {
        self.0.lock().unwrap().push(format!("start {total}"));
    }

    fn on_page_complete(&self, pass: Pass, page: usize, _total: usize, items: usize) {
        self.0.lock().unwrap().push(format!("{pass} {page} {items}"));
    }

    fn on_page_error(&self, pass: Pass, page: usize, _total: usize, _error: &str) {
        self.0.lock().unwrap().push(format!("{pass} {page} error"));
    }

    fn on_extraction_complete(&self, pages: usize, questions: usize) {
        self.0.lock().unwrap().push(format!("done {pages} {questions}"));
    }
}

#[tokio::test]
async fn progress_events_follow_the_passes() {
    let backend = ScriptedModel::new(|request, cred| {
        if !is_structure(request) && page_of(request) == Some(2) {
            return Err(BackendError::new("HTTP 500"));
        }
        two_per_page(request, cred)
    });
    let log = Arc::new(EventLog::default());
    let config = ExamConfig::builder()
        .structure_throttle(Arc::new(NoDelay))
        .extraction_throttle(Arc::new(NoDelay))
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let client = client(backend, &["k1"], &config);

    extract_questions(&client, &pages(2), &config).await;
    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            "start 2",
            "structure 1 0",
            "structure 2 0",
            "extraction 1 2",
            "extraction 2 error",
            "done 2 2",
        ]
    );
}

// ── Generation and review ────────────────────────────────────────────────────

#[tokio::test]
async fn generated_questions_survive_review() {
    let backend = ScriptedModel::new(|request, _| {
        if request.prompt.contains("QUESTION TO SOLVE") {
            return Ok(r#"{"correctAnswer": "C", "detailedSolution": "Speed is distance over time: 100/20 = 5.", "reasoning": "definition"}"#.into());
        }
        Ok(r#"[
          {"question_statement": "A runner covers 100 m in 20 s. What is the average speed?",
           "question_type": "MCQ", "options": ["2 m/s", "4 m/s", "5 m/s", "10 m/s"],
           "answer": "C", "solution": "Average speed = 100 m / 20 s = 5 m/s.",
           "difficulty_level": "Easy"},
          {"question_statement": "A runner covers 100 m in 20 s. What is the average speed?",
           "question_type": "MCQ", "options": ["2 m/s", "4 m/s", "5 m/s", "10 m/s"],
           "answer": "C", "solution": "Average speed = 100 m / 20 s = 5 m/s."}
        ]"#
        .into())
    });
    let config = no_delay_config();
    let client = client(backend, &["k1"], &config);
    let topic = Topic {
        id: "kin".into(),
        name: "Kinematics".into(),
        notes: Some("v = d / t".into()),
        weightage: Some(0.05),
    };
    let mut request = GenerationRequest::new(&topic, "JEE", "Physics", QuestionType::Mcq);
    request.count = 2;

    let generated = assert_ok!(generate_questions(&client, &request, &config).await);
    assert_eq!(generated.len(), 1, "duplicate statement dropped");
    assert_eq!(generated[0].topic_id.as_deref(), Some("kin"));

    let reviewer = Reviewer::with_seed(client, 11);
    let outcome = assert_ok!(reviewer.review(&generated[0]).await);
    assert!(matches!(outcome, ReviewOutcome::Accepted { ref fixed, .. } if fixed.is_empty()));
}
