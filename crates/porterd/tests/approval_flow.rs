//! End-to-end visitor approval scenarios against stubbed collaborators.
//!
//! The analyzer, messaging gateway, and decision service are all stubs;
//! everything else (store, correlation channel, session state machine)
//! is the real thing over an in-memory database.

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use porter_core::{AnalyzerError, DetectedFace, Encoding, FaceAnalyzer, FaceBox};
use porter_store::Store;
use porterd::config::MultiFacePolicy;
use porterd::correlation::ApprovalChannel;
use porterd::decision::{DecisionError, DecisionService, LedgerContext, Verdict};
use porterd::directory::ContactDirectory;
use porterd::engine::spawn_engine;
use porterd::gatekeeper::{FrameResult, Gatekeeper, GatekeeperError, StatusPoll};
use porterd::messaging::{GatewayError, MessageGateway};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const DAVE_CHANNEL: &str = "+15550001111";

const ROSTER: &str = r#"
[[contact]]
name = "Dave"
channel = "+15550001111"
"#;

/// Maps the top-left pixel to a deterministic analysis result:
/// black = no faces, white = two faces, anything else = one face whose
/// encoding is the pixel's RGB scaled to [0, 1].
struct PixelAnalyzer;

fn face(values: Vec<f32>, confidence: f32) -> DetectedFace {
    DetectedFace {
        bounds: FaceBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence,
        },
        encoding: Encoding { values },
    }
}

impl FaceAnalyzer for PixelAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let p = image.get_pixel(0, 0).0;
        if p == [0, 0, 0] {
            return Ok(vec![]);
        }
        if p == [255, 255, 255] {
            return Ok(vec![
                face(vec![1.0, 1.0, 1.0], 0.9),
                face(vec![0.9, 0.9, 0.9], 0.8),
            ]);
        }
        Ok(vec![face(
            p.iter().map(|&c| c as f32 / 255.0).collect(),
            0.9,
        )])
    }
}

/// Encode a uniform-color frame as PNG bytes.
fn frame(rgb: [u8; 3]) -> Vec<u8> {
    let mut img = RgbImage::new(8, 8);
    for pixel in img.pixels_mut() {
        pixel.0 = rgb;
    }
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn send(&self, channel: &str, body: &str) -> Result<String, GatewayError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), body.to_string()));
        Ok("msg-test".into())
    }
}

/// Deterministic stand-in for the language-model service.
struct ScriptedDecisions;

#[async_trait]
impl DecisionService for ScriptedDecisions {
    async fn extract_visitor(
        &self,
        text: &str,
    ) -> Result<Option<(String, String)>, DecisionError> {
        let lower = text.to_lowercase();
        let (Some(name_start), Some(see_start)) = (lower.find("i'm "), lower.find("to see "))
        else {
            return Ok(None);
        };

        let name = text[name_start + 4..]
            .split(',')
            .next()
            .unwrap_or("")
            .trim();
        let whom = text[see_start + 7..].trim().trim_end_matches('.').trim();
        if name.is_empty() || whom.is_empty() {
            return Ok(None);
        }
        Ok(Some((name.to_string(), whom.to_string())))
    }

    async fn judge(
        &self,
        _visitor: &str,
        _whom: &str,
        reply: Option<&str>,
    ) -> Result<Verdict, DecisionError> {
        Ok(match reply {
            Some(r) if r.to_lowercase().contains("yes") => Verdict::Approved,
            _ => Verdict::Denied,
        })
    }

    async fn answer(&self, query: &str, _context: &LedgerContext) -> Result<String, DecisionError> {
        Ok(format!("noted: {query}"))
    }
}

struct Fixture {
    gatekeeper: Gatekeeper,
    store: Store,
    gateway: Arc<RecordingGateway>,
}

async fn setup_with(policy: MultiFacePolicy, ttl_secs: u64) -> Fixture {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = Arc::new(RecordingGateway::default());
    let gatekeeper = Gatekeeper::new(
        store.clone(),
        spawn_engine(Box::new(PixelAnalyzer)),
        ApprovalChannel::new(gateway.clone()),
        Arc::new(ScriptedDecisions),
        ContactDirectory::parse(ROSTER).unwrap(),
        0.5,
        policy,
        ttl_secs,
    );
    Fixture {
        gatekeeper,
        store,
        gateway,
    }
}

async fn setup() -> Fixture {
    setup_with(MultiFacePolicy::First, 900).await
}

/// Walk a fresh visitor session up to `AwaitingReply` for Carol → Dave.
async fn drive_to_awaiting(fx: &Fixture) -> Uuid {
    let (_, id) = fx.gatekeeper.converse(None, "hello").await;
    let (reply, _) = fx
        .gatekeeper
        .converse(Some(id), "I'm Carol, here to see Dave")
        .await;
    assert!(reply.contains("Dave"), "unexpected reply: {reply}");
    id
}

#[tokio::test]
async fn enroll_then_frame_marks_attendance_once() {
    let fx = setup().await;

    fx.gatekeeper.enroll("Bob", &frame([200, 10, 10])).await.unwrap();

    let results = fx.gatekeeper.ingest_frame(&frame([200, 10, 10])).await.unwrap();
    assert!(matches!(
        &results[0],
        FrameResult::Identified { name, newly_recorded: true } if name == "Bob"
    ));

    // Same day, second frame: no new record.
    let results = fx.gatekeeper.ingest_frame(&frame([200, 10, 10])).await.unwrap();
    assert!(matches!(
        &results[0],
        FrameResult::Identified { name, newly_recorded: false } if name == "Bob"
    ));

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    assert_eq!(fx.store.todays_entries(&today).await.unwrap().len(), 1);
}

#[tokio::test]
async fn frame_with_empty_gallery_is_rejected() {
    let fx = setup().await;
    let result = fx.gatekeeper.ingest_frame(&frame([200, 10, 10])).await;
    assert!(matches!(result, Err(GatekeeperError::NoIdentities)));
}

#[tokio::test]
async fn unknown_face_opens_visitor_session() {
    let fx = setup().await;
    fx.gatekeeper.enroll("Bob", &frame([200, 10, 10])).await.unwrap();

    let results = fx.gatekeeper.ingest_frame(&frame([10, 200, 10])).await.unwrap();
    let FrameResult::Visitor { session_id } = &results[0] else {
        panic!("expected a visitor result, got {results:?}");
    };

    // The frame-opened session starts at the greeting.
    let id = Uuid::parse_str(session_id).unwrap();
    let (reply, returned) = fx.gatekeeper.converse(Some(id), "hi").await;
    assert_eq!(returned, id);
    assert!(reply.contains("name"), "unexpected greeting: {reply}");
}

#[tokio::test]
async fn full_approval_flow() {
    let fx = setup().await;
    let id = drive_to_awaiting(&fx).await;

    // The approval request went to Dave's channel.
    let sent = fx.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, DAVE_CHANNEL);
    assert!(sent[0].1.contains("Carol"));

    // Polling before the reply arrives is idempotent.
    assert_eq!(fx.gatekeeper.status(id).await.unwrap(), StatusPoll::Pending);
    assert_eq!(fx.gatekeeper.status(id).await.unwrap(), StatusPoll::Pending);

    fx.gatekeeper.receive_reply(DAVE_CHANNEL, "yes, send her in");

    let StatusPoll::Resolved(text) = fx.gatekeeper.status(id).await.unwrap() else {
        panic!("expected resolution");
    };
    assert!(text.contains("Approved"), "unexpected text: {text}");

    // The decision record exists.
    let visitors = fx.store.recent_visitors(10).await.unwrap();
    assert_eq!(visitors.len(), 1);
    assert_eq!(visitors[0].name, "Carol");
    assert_eq!(visitors[0].whom, "Dave");
    assert_eq!(visitors[0].status, "Approved");

    // Later polls still report the outcome.
    assert!(matches!(
        fx.gatekeeper.status(id).await.unwrap(),
        StatusPoll::Resolved(_)
    ));

    // Resolved sessions answer free-form queries without reopening the flow.
    let (reply, _) = fx.gatekeeper.converse(Some(id), "who came in today?").await;
    assert_eq!(reply, "noted: who came in today?");
    assert_eq!(fx.store.recent_visitors(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn denial_flow() {
    let fx = setup().await;
    let id = drive_to_awaiting(&fx).await;

    fx.gatekeeper.receive_reply(DAVE_CHANNEL, "no, I don't know them");

    let StatusPoll::Resolved(text) = fx.gatekeeper.status(id).await.unwrap() else {
        panic!("expected resolution");
    };
    assert!(text.contains("Denied"), "unexpected text: {text}");
    assert_eq!(fx.store.recent_visitors(10).await.unwrap()[0].status, "Denied");
}

#[tokio::test]
async fn fifo_correlation_across_two_visitors() {
    let fx = setup().await;

    let first = drive_to_awaiting(&fx).await;
    let (_, second) = fx.gatekeeper.converse(None, "hello").await;
    let (reply, _) = fx
        .gatekeeper
        .converse(Some(second), "I'm Erin, here to see Dave")
        .await;
    assert!(reply.contains("Dave"));

    // Replies arrive in dispatch order: first approves, second denies.
    fx.gatekeeper.receive_reply(DAVE_CHANNEL, "yes of course");
    fx.gatekeeper.receive_reply(DAVE_CHANNEL, "no");

    let StatusPoll::Resolved(text) = fx.gatekeeper.status(first).await.unwrap() else {
        panic!("expected resolution for first session");
    };
    assert!(text.contains("Approved"));

    let StatusPoll::Resolved(text) = fx.gatekeeper.status(second).await.unwrap() else {
        panic!("expected resolution for second session");
    };
    assert!(text.contains("Denied"));

    let visitors = fx.store.recent_visitors(10).await.unwrap();
    assert_eq!(visitors.len(), 2);
}

#[tokio::test]
async fn unparseable_message_stays_collecting() {
    let fx = setup().await;
    let (_, id) = fx.gatekeeper.converse(None, "hello").await;

    for _ in 0..2 {
        let (reply, _) = fx.gatekeeper.converse(Some(id), "the weather is nice").await;
        assert!(reply.contains("clearly"), "unexpected reply: {reply}");
    }
    assert!(fx.gateway.sent().is_empty());

    // A corrected message still proceeds.
    let (reply, _) = fx
        .gatekeeper
        .converse(Some(id), "I'm Carol, here to see Dave")
        .await;
    assert!(reply.contains("Dave"));
    assert_eq!(fx.gateway.sent().len(), 1);
}

#[tokio::test]
async fn unknown_responsible_party_reprompts() {
    let fx = setup().await;
    let (_, id) = fx.gatekeeper.converse(None, "hello").await;

    let (reply, _) = fx
        .gatekeeper
        .converse(Some(id), "I'm Carol, here to see Zed")
        .await;
    assert!(reply.contains("Zed"), "unexpected reply: {reply}");
    assert!(fx.gateway.sent().is_empty());

    let (reply, _) = fx
        .gatekeeper
        .converse(Some(id), "I'm Carol, here to see Dave")
        .await;
    assert!(reply.contains("Dave"));
    assert_eq!(fx.gateway.sent().len(), 1);
}

#[tokio::test]
async fn reply_without_pending_request_is_discarded() {
    let fx = setup().await;
    // Must not panic or create any state.
    fx.gatekeeper.receive_reply(DAVE_CHANNEL, "yes");

    let id = drive_to_awaiting(&fx).await;
    // The stray earlier reply was discarded, so the session still waits.
    assert_eq!(fx.gatekeeper.status(id).await.unwrap(), StatusPoll::Pending);
}

#[tokio::test]
async fn awaiting_session_expires_with_record() {
    let fx = setup_with(MultiFacePolicy::First, 0).await;
    let id = drive_to_awaiting(&fx).await;

    fx.gatekeeper.expire_stale().await;

    let StatusPoll::Resolved(text) = fx.gatekeeper.status(id).await.unwrap() else {
        panic!("expected expired resolution");
    };
    assert!(text.contains("expired"), "unexpected text: {text}");

    let visitors = fx.store.recent_visitors(10).await.unwrap();
    assert_eq!(visitors[0].status, "Expired");
    assert_eq!(visitors[0].name, "Carol");

    // The pending queue entry is gone: a late reply correlates to nothing.
    fx.gatekeeper.receive_reply(DAVE_CHANNEL, "yes");
    assert!(matches!(
        fx.gatekeeper.status(id).await.unwrap(),
        StatusPoll::Resolved(_)
    ));
}

#[tokio::test]
async fn idle_unstarted_session_is_evicted() {
    let fx = setup_with(MultiFacePolicy::First, 0).await;
    let (_, id) = fx.gatekeeper.converse(None, "hello").await;

    fx.gatekeeper.expire_stale().await;

    let result = fx.gatekeeper.status(id).await;
    assert!(matches!(result, Err(GatekeeperError::UnknownSession(_))));
    // No decision record for a conversation that never dispatched.
    assert!(fx.store.recent_visitors(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn enroll_rejects_faceless_image() {
    let fx = setup().await;
    let result = fx.gatekeeper.enroll("Bob", &frame([0, 0, 0])).await;
    assert!(matches!(result, Err(GatekeeperError::NoFaceDetected)));
}

#[tokio::test]
async fn enroll_multi_face_policies() {
    let fx = setup_with(MultiFacePolicy::Reject, 900).await;
    let result = fx.gatekeeper.enroll("Bob", &frame([255, 255, 255])).await;
    assert!(matches!(result, Err(GatekeeperError::MultipleFaces(2))));

    let fx = setup().await;
    fx.gatekeeper.enroll("Bob", &frame([255, 255, 255])).await.unwrap();
    // The highest-confidence face was kept.
    let gallery = fx.store.gallery().await.unwrap();
    assert_eq!(gallery[0].encoding.values, vec![1.0, 1.0, 1.0]);
}

#[tokio::test]
async fn enroll_duplicate_name_conflicts() {
    let fx = setup().await;
    fx.gatekeeper.enroll("Bob", &frame([200, 10, 10])).await.unwrap();
    let result = fx.gatekeeper.enroll("Bob", &frame([10, 200, 10])).await;
    assert!(matches!(
        result,
        Err(GatekeeperError::Store(porter_store::StoreError::DuplicateName(_)))
    ));
}

#[tokio::test]
async fn status_for_unknown_session() {
    let fx = setup().await;
    let result = fx.gatekeeper.status(Uuid::new_v4()).await;
    assert!(matches!(result, Err(GatekeeperError::UnknownSession(_))));
}
