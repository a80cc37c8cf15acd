//! Integration tests for the full job path: download → normalise → infer →
//! save → meter, against a local fixture server and a scripted model.
//!
//! No test touches the network beyond 127.0.0.1 and no test calls a real
//! LLM. Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header;
use axum::routing::{get, MethodRouter};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use weighticket_extract::pipeline::embed::{image_to_pdf, pdf_page_sizes};
use weighticket_extract::{
    inspect_document, ExtractionConfig, InferenceClient, InferenceRequest, InferenceResponse,
    JobRunner, MemoryStore, ProcessReceiptEvent, ReceiptError, RecordingMeter, RunObserver,
    SourceFormat, UsageEvent,
};

// ── Fixtures ─────────────────────────────────────────────────────────────────

const TICKET_REPLY: &str = r#"```json
{
  "entreprise": "Carrières du Nord",
  "description": "Pesée de gravier 0/20 livré sur chantier",
  "telephone": "03 20 00 00 00",
  "email": "pesage@carrieres-nord.fr",
  "numero_pesee": "48213",
  "date_entree": "12/03/2024",
  "heure_entree": "08:14",
  "date_sortie": "12/03/2024",
  "heure_sortie": "08:41",
  "matricule": "AB-123-CD",
  "client": "BTP Lille",
  "transporteur": "Transports Martin",
  "destination": "Chantier Euralille",
  "bon_livraison": "BL-7781",
  "produit": "Gravier 0/20",
  "poids_entree_kg": 18340,
  "poids_sortie_kg": 12100,
  "poids_net_kg": 6240,
  "installateur": {"nom": "Précia Molen", "telephone": "", "email": ""}
}
```"#;

const BLANK_REPLY: &str = r#"{"entreprise":"","description":"","telephone":"","email":"","numero_pesee":"","date_entree":"","heure_entree":"","date_sortie":"","heure_sortie":"","matricule":"","client":"","transporteur":"","destination":"","bon_livraison":"","produit":"","poids_entree_kg":null,"poids_sortie_kg":null,"poids_net_kg":null,"installateur":{"nom":"","telephone":"","email":""}}"#;

fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([230, 230, 230])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("jpeg encode");
    buf
}

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encode");
    buf
}

fn file_route(content_type: &'static str, body: Vec<u8>) -> MethodRouter {
    let body = Bytes::from(body);
    get(move || {
        let body = body.clone();
        async move { ([(header::CONTENT_TYPE, content_type)], body) }
    })
}

/// Serve the fixture files; unknown paths answer 404.
async fn fixture_server() -> String {
    let blank_pdf = image_to_pdf(&png_bytes(595, 842), SourceFormat::Png).expect("blank pdf");
    let router = Router::new()
        .route("/ticket.jpg", file_route("image/jpeg", jpeg_bytes(640, 480)))
        .route("/ticket.png", file_route("image/png", png_bytes(300, 500)))
        .route("/blank.pdf", file_route("application/pdf", blank_pdf))
        .route(
            "/renamed.pdf",
            file_route("application/pdf", png_bytes(120, 90)),
        )
        .route(
            "/storage/8f2c",
            file_route("application/octet-stream", jpeg_bytes(200, 100)),
        )
        .route(
            "/animated.gif",
            file_route("image/gif", b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec()),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fixture server");
    });
    format!("http://{addr}")
}

/// Model stand-in: always answers `reply`, records every request.
struct ScriptedInference {
    reply: String,
    calls: AtomicUsize,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_pdf(&self) -> Vec<u8> {
        let requests = self.requests.lock().unwrap();
        let last = requests.last().expect("no inference request recorded");
        last.document.pdf_bytes().expect("inline document")
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ReceiptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        Ok(InferenceResponse {
            text: self.reply.clone(),
            input_tokens: 1500,
            output_tokens: 200,
        })
    }
}

struct Harness {
    runner: JobRunner,
    model: Arc<ScriptedInference>,
    store: Arc<MemoryStore>,
    meter: Arc<RecordingMeter>,
}

fn harness(reply: &str, receipts: &[&str]) -> Harness {
    harness_with(reply, receipts, ExtractionConfig::builder())
}

fn harness_with(
    reply: &str,
    receipts: &[&str],
    builder: weighticket_extract::ExtractionConfigBuilder,
) -> Harness {
    let model = ScriptedInference::new(reply);
    let store = Arc::new(MemoryStore::new());
    let meter = Arc::new(RecordingMeter::new());
    for id in receipts {
        store.insert_pending(*id, "user_42");
    }
    let config = builder
        .inference(model.clone())
        .retry_backoff_ms(1)
        .build()
        .expect("config");
    let runner = JobRunner::new(config, store.clone(), meter.clone()).expect("runner");
    Harness {
        runner,
        model,
        store,
        meter,
    }
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn jpeg_ticket_is_extracted_saved_and_metered() {
    let base = fixture_server().await;
    let h = harness(TICKET_REPLY, &["rcpt_1"]);

    let event = ProcessReceiptEvent::new(
        format!("{base}/ticket.jpg"),
        "rcpt_1",
        Some("image/jpeg".into()),
    );
    let receipt = h.runner.process(&event).await.expect("job should succeed");

    assert_eq!(receipt.as_deref(), Some("rcpt_1"));
    assert_eq!(h.model.calls(), 1);

    let pdf = h.model.last_pdf();
    assert!(pdf.starts_with(b"%PDF"));
    assert_eq!(pdf_page_sizes(&pdf).unwrap(), vec![(640.0, 480.0)]);

    let saved = h.store.get("rcpt_1").expect("receipt exists");
    let data = saved.parsed_data.expect("parsed data written");
    assert_eq!(data.poids_entree_kg, Some(18340.0));
    assert_eq!(data.poids_sortie_kg, Some(12100.0));
    assert_eq!(data.poids_net_kg, Some(6240.0));
    assert_eq!(data.installateur.nom, "Précia Molen");
    assert_eq!(
        saved.file_display_name.as_deref(),
        Some("Carrières du Nord - Ticket 48213")
    );
    assert_eq!(
        saved.receipt_summary.as_deref(),
        Some("Pesée de gravier 0/20 livré sur chantier")
    );
    assert_eq!(h.meter.events(), vec![UsageEvent::scan("user_42")]);
}

#[tokio::test]
async fn blank_pdf_still_saves_an_empty_record() {
    let base = fixture_server().await;
    let h = harness(BLANK_REPLY, &["rcpt_blank"]);

    let event = ProcessReceiptEvent::new(format!("{base}/blank.pdf"), "rcpt_blank", None);
    let receipt = h.runner.process(&event).await.unwrap();

    assert_eq!(receipt.as_deref(), Some("rcpt_blank"));
    let saved = h.store.get("rcpt_blank").unwrap();
    let data = saved.parsed_data.unwrap();
    assert!(data.is_blank());
    assert_eq!(data.poids_net_kg, None);
    assert_eq!(saved.file_display_name.as_deref(), Some("blank.pdf"));
    assert_eq!(h.meter.events().len(), 1);
}

#[tokio::test]
async fn pdf_bytes_are_sent_unchanged() {
    let base = fixture_server().await;
    let h = harness(BLANK_REPLY, &["r"]);

    h.runner
        .process(&ProcessReceiptEvent::new(format!("{base}/blank.pdf"), "r", None))
        .await
        .unwrap();

    let expected = image_to_pdf(&png_bytes(595, 842), SourceFormat::Png).unwrap();
    assert_eq!(h.model.last_pdf(), expected);
}

// ── Normalisation edge cases ─────────────────────────────────────────────────

#[tokio::test]
async fn png_named_pdf_is_embedded_by_signature() {
    let base = fixture_server().await;
    let h = harness(BLANK_REPLY, &["r"]);

    let event = ProcessReceiptEvent::new(
        format!("{base}/renamed.pdf"),
        "r",
        Some("application/pdf".into()),
    );
    h.runner.process(&event).await.unwrap();

    let pdf = h.model.last_pdf();
    assert!(pdf.starts_with(b"%PDF"));
    assert_eq!(pdf_page_sizes(&pdf).unwrap(), vec![(120.0, 90.0)]);
}

#[tokio::test]
async fn extensionless_url_with_generic_type_is_sniffed() {
    let base = fixture_server().await;
    let h = harness(BLANK_REPLY, &["r"]);

    let event = ProcessReceiptEvent::new(format!("{base}/storage/8f2c"), "r", None);
    let receipt = h.runner.process(&event).await.unwrap();

    assert_eq!(receipt.as_deref(), Some("r"));
    assert_eq!(pdf_page_sizes(&h.model.last_pdf()).unwrap(), vec![(200.0, 100.0)]);
    assert_eq!(
        h.store.get("r").unwrap().file_display_name.as_deref(),
        Some("Receipt r")
    );
}

#[tokio::test]
async fn every_format_reaches_the_model_as_pdf() {
    let base = fixture_server().await;
    for path in ["ticket.jpg", "ticket.png", "blank.pdf"] {
        let h = harness(BLANK_REPLY, &["r"]);
        h.runner
            .process(&ProcessReceiptEvent::new(format!("{base}/{path}"), "r", None))
            .await
            .unwrap();
        assert!(h.model.last_pdf().starts_with(b"%PDF"), "{path}");
    }
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_file_fails_before_inference() {
    let base = fixture_server().await;
    let h = harness(TICKET_REPLY, &["rcpt_404"]);

    let event = ProcessReceiptEvent::new(format!("{base}/gone.jpg"), "rcpt_404", None);
    let err = h.runner.process(&event).await.unwrap_err();

    match err {
        ReceiptError::DownloadFailed { status, .. } => assert_eq!(status, Some(404)),
        other => panic!("expected DownloadFailed, got {other}"),
    }
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.store.write_count(), 0);
    assert!(h.meter.events().is_empty());
}

#[tokio::test]
async fn unsupported_format_fails_before_inference() {
    let base = fixture_server().await;
    let h = harness(TICKET_REPLY, &["r"]);

    let err = h
        .runner
        .process(&ProcessReceiptEvent::new(
            format!("{base}/animated.gif"),
            "r",
            Some("image/gif".into()),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, ReceiptError::UnsupportedFormat { .. }));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn unusable_reply_is_fatal_and_nothing_is_saved() {
    let base = fixture_server().await;
    let h = harness("I could not read this ticket.", &["r"]);

    let err = h
        .runner
        .process(&ProcessReceiptEvent::new(format!("{base}/ticket.jpg"), "r", None))
        .await
        .unwrap_err();

    assert!(matches!(err, ReceiptError::InvalidResponse { .. }));
    assert_eq!(h.model.calls(), 1);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn oversized_download_is_rejected() {
    let base = fixture_server().await;
    let h = harness_with(
        TICKET_REPLY,
        &["r"],
        ExtractionConfig::builder().max_document_bytes(64),
    );

    let err = h
        .runner
        .process(&ProcessReceiptEvent::new(format!("{base}/ticket.jpg"), "r", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiptError::DocumentTooLarge { .. }));
    assert!(err.is_download_error());
    assert_eq!(h.model.calls(), 0);
}

// ── Persistence retries ──────────────────────────────────────────────────────

#[tokio::test]
async fn transient_store_failure_is_retried_once() {
    let base = fixture_server().await;
    let h = harness(TICKET_REPLY, &["rcpt_retry"]);
    h.store.fail_next(1);

    let out = h
        .runner
        .run(&ProcessReceiptEvent::new(format!("{base}/ticket.jpg"), "rcpt_retry", None))
        .await
        .unwrap();

    assert_eq!(out.receipt.as_deref(), Some("rcpt_retry"));
    assert_eq!(out.steps, 3);
    assert_eq!(out.state.saved_to_database(), Some(true));
    assert_eq!(h.model.calls(), 1);
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.meter.events().len(), 1);
}

#[tokio::test]
async fn unknown_receipt_exhausts_budget_without_receipt() {
    let base = fixture_server().await;
    let h = harness_with(TICKET_REPLY, &[], ExtractionConfig::builder().max_steps(4));

    let out = h
        .runner
        .run(&ProcessReceiptEvent::new(format!("{base}/ticket.jpg"), "nope", None))
        .await
        .unwrap();

    assert_eq!(out.receipt, None);
    assert_eq!(out.steps, 4);
    assert_eq!(out.state.saved_to_database(), None);
    assert_eq!(h.model.calls(), 1);
    assert!(h.meter.events().is_empty());
}

// ── Batch, inspect, observer ─────────────────────────────────────────────────

#[tokio::test]
async fn batch_runs_jobs_independently_in_input_order() {
    let base = fixture_server().await;
    let h = harness_with(
        BLANK_REPLY,
        &["a", "b", "c"],
        ExtractionConfig::builder().concurrency(3),
    );

    let events = vec![
        ProcessReceiptEvent::new(format!("{base}/ticket.jpg"), "a", None),
        ProcessReceiptEvent::new(format!("{base}/gone.pdf"), "b", None),
        ProcessReceiptEvent::new(format!("{base}/ticket.png"), "c", None),
    ];
    let outcomes = h.runner.process_batch(&events).await;

    let ids: Vec<_> = outcomes.iter().map(|o| o.receipt_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(outcomes[0].result.as_ref().unwrap().as_deref(), Some("a"));
    assert!(outcomes[1].result.is_err());
    assert_eq!(outcomes[2].result.as_ref().unwrap().as_deref(), Some("c"));
    assert_eq!(h.meter.events().len(), 2);
}

#[tokio::test]
async fn inspect_reports_embedded_page_size() {
    let base = fixture_server().await;
    let config = ExtractionConfig::default();

    let info = inspect_document(&format!("{base}/ticket.png"), None, &config)
        .await
        .unwrap();
    assert_eq!(info.detected, Some(SourceFormat::Png));
    assert_eq!(info.page_count, 1);
    assert_eq!(info.first_page_size, Some((300.0, 500.0)));
    assert!(info.pdf_bytes > 0);
}

#[derive(Default)]
struct Transcript {
    lines: Mutex<Vec<String>>,
}

impl RunObserver for Transcript {
    fn on_agent_start(&self, receipt_id: &str, step: usize, agent: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{receipt_id}:{step}:{agent}"));
    }

    fn on_run_complete(&self, receipt_id: &str, receipt: Option<&str>, steps: usize) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{receipt_id}:done:{}:{steps}", receipt.unwrap_or("-")));
    }
}

#[tokio::test]
async fn observer_sees_each_dispatch() {
    let base = fixture_server().await;
    let transcript = Arc::new(Transcript::default());
    let h = harness_with(
        BLANK_REPLY,
        &["r"],
        ExtractionConfig::builder().observer(transcript.clone()),
    );

    h.runner
        .process(&ProcessReceiptEvent::new(format!("{base}/ticket.jpg"), "r", None))
        .await
        .unwrap();

    let lines = transcript.lines.lock().unwrap().clone();
    assert_eq!(
        lines,
        vec![
            "r:1:receipt_scanning_agent".to_string(),
            "r:2:database_agent".to_string(),
            "r:done:r:2".to_string(),
        ]
    );
}
