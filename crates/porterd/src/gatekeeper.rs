//! The gatekeeper — frame ingestion, enrollment, and the visitor
//! approval state machine.

use crate::config::MultiFacePolicy;
use crate::correlation::ApprovalChannel;
use crate::decision::{DecisionService, LedgerContext, Verdict};
use crate::directory::ContactDirectory;
use crate::engine::{EngineError, EngineHandle};
use crate::session::{ConversationStep, Outcome, SessionManager, VisitorSession};
use chrono::{Duration, Local, Utc};
use porter_core::{classify, Classification, MatchError, PixelError};
use porter_store::{Attendance, Store, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GatekeeperError {
    #[error("no identities enrolled")]
    NoIdentities,
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("image contains {0} faces; enrollment requires exactly one")]
    MultipleFaces(usize),
    #[error("unknown session {0}")]
    UnknownSession(Uuid),
    #[error(transparent)]
    Image(#[from] PixelError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-face outcome of one ingested frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameResult {
    /// An enrolled identity; attendance recorded (or already present).
    Identified { name: String, newly_recorded: bool },
    /// Unrecognized face; a visitor session was opened.
    Visitor { session_id: String },
}

/// Result of a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusPoll {
    /// Nothing to report yet; poll again later.
    Pending,
    /// Final outcome text.
    Resolved(String),
}

/// Wires the inference engine, the store, the contact directory, the
/// correlation channel, and the decision service into the access-control
/// workflow.
pub struct Gatekeeper {
    store: Store,
    engine: EngineHandle,
    sessions: SessionManager,
    channel: ApprovalChannel,
    decisions: Arc<dyn DecisionService>,
    directory: ContactDirectory,
    match_threshold: f32,
    multi_face_policy: MultiFacePolicy,
    session_ttl: Duration,
}

impl Gatekeeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        engine: EngineHandle,
        channel: ApprovalChannel,
        decisions: Arc<dyn DecisionService>,
        directory: ContactDirectory,
        match_threshold: f32,
        multi_face_policy: MultiFacePolicy,
        session_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            engine,
            sessions: SessionManager::new(),
            channel,
            decisions,
            directory,
            match_threshold,
            multi_face_policy,
            session_ttl: Duration::seconds(session_ttl_secs as i64),
        }
    }

    /// Read access for the dashboard projections.
    pub fn store(&self) -> &Store {
        &self.store
    }

    // --- Frame ingestion ---

    /// Classify every face in a submitted frame.
    ///
    /// Matched identities are marked in the attendance ledger; each
    /// unmatched face opens a visitor session.
    pub async fn ingest_frame(&self, bytes: &[u8]) -> Result<Vec<FrameResult>, GatekeeperError> {
        let image = porter_core::decode_rgb(bytes)?;

        let gallery = self.store.gallery().await?;
        if gallery.is_empty() {
            return Err(GatekeeperError::NoIdentities);
        }

        let faces = self.engine.analyze(image).await?;
        let (date, time) = now_strings();

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            match classify(&face.encoding, &gallery, self.match_threshold)? {
                Classification::Match { name, distance } => {
                    tracing::debug!(name, distance, "face matched");
                    let attendance = self.store.mark_if_absent(&name, &date, &time).await?;
                    results.push(FrameResult::Identified {
                        name,
                        newly_recorded: attendance == Attendance::Recorded,
                    });
                }
                Classification::Unmatched => {
                    let (id, _) = self.sessions.create();
                    tracing::info!(session_id = %id, "unrecognized face; visitor session opened");
                    results.push(FrameResult::Visitor {
                        session_id: id.to_string(),
                    });
                }
            }
        }
        Ok(results)
    }

    // --- Enrollment ---

    /// Enroll a new identity from an image.
    pub async fn enroll(&self, name: &str, bytes: &[u8]) -> Result<(), GatekeeperError> {
        let image = porter_core::decode_rgb(bytes)?;
        let faces = self.engine.analyze(image).await?;

        let face = match (faces.len(), self.multi_face_policy) {
            (0, _) => return Err(GatekeeperError::NoFaceDetected),
            (1, _) => &faces[0],
            (n, MultiFacePolicy::Reject) => return Err(GatekeeperError::MultipleFaces(n)),
            // Faces arrive in confidence order; take the best.
            (_, MultiFacePolicy::First) => &faces[0],
        };

        self.store.enroll(name, &face.encoding).await?;
        Ok(())
    }

    // --- Conversation ---

    /// Handle one conversational message, creating a session when the id
    /// is absent or unknown. Always produces a reply.
    pub async fn converse(&self, session_id: Option<Uuid>, message: &str) -> (String, Uuid) {
        let (id, session) = self.sessions.get_or_create(session_id);
        let mut session = session.lock().await;
        session.touch();

        let reply = match session.step {
            ConversationStep::Greeting => {
                session.step = ConversationStep::Collecting;
                "Welcome. What is your name, and whom are you here to meet?".to_string()
            }
            ConversationStep::Collecting => self.handle_collecting(&mut session, message).await,
            ConversationStep::AwaitingReply => {
                "Still waiting for a reply. Check back shortly.".to_string()
            }
            ConversationStep::Resolved => self.handle_resolved_query(message).await,
        };

        (reply, id)
    }

    /// `Collecting`: extract the visitor's details and dispatch the
    /// approval request. Every failure path stays in `Collecting` so a
    /// corrected message can be resubmitted.
    async fn handle_collecting(&self, session: &mut VisitorSession, message: &str) -> String {
        let extracted = match self.decisions.extract_visitor(message).await {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(error = %e, "extraction call failed");
                return "I could not process that just now. Please tell me your name and whom \
                        you are here to meet."
                    .to_string();
            }
        };

        let Some((visitor_name, whom)) = extracted else {
            return "Please state your name and whom you want to meet clearly.".to_string();
        };

        let Some(contact) = self.directory.lookup(&whom) else {
            tracing::info!(whom, "responsible party not in roster");
            return format!("I don't have {whom} in the contact roster. Who are you here to meet?");
        };

        let body = format!("Visitor {visitor_name} is here to meet you. Reply to approve or deny.");
        match self.channel.dispatch(session.id, &contact.channel, &body).await {
            Ok(_) => {
                session.visitor_name = Some(visitor_name.clone());
                session.responsible_party = Some(contact.name.clone());
                session.responsible_channel = Some(contact.channel.clone());
                session.step = ConversationStep::AwaitingReply;
                format!(
                    "Thanks {visitor_name}. I've asked {} and will let you know as soon as \
                     they reply.",
                    contact.name
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "approval dispatch failed");
                "I could not reach them just now. Please try again in a moment.".to_string()
            }
        }
    }

    /// `Resolved`: free-form questions answered over ledger context.
    async fn handle_resolved_query(&self, message: &str) -> String {
        let context = match self.ledger_context().await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "ledger context unavailable");
                LedgerContext::default()
            }
        };

        match self.decisions.answer(message, &context).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "query call failed");
                "I could not answer that just now. Please try again.".to_string()
            }
        }
    }

    async fn ledger_context(&self) -> Result<LedgerContext, StoreError> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        Ok(LedgerContext {
            todays_entries: self.store.todays_entries(&today).await?,
            enrolled_names: self.store.identity_names().await?,
            recent_visitors: self
                .store
                .recent_visitors(10)
                .await?
                .into_iter()
                .map(|v| {
                    format!(
                        "{} to meet {}: {} on {} {}",
                        v.name, v.whom, v.status, v.date, v.time
                    )
                })
                .collect(),
        })
    }

    // --- Status polling ---

    /// Non-blocking status check.
    ///
    /// When a correlated reply has arrived for an `AwaitingReply` session,
    /// this consumes it: judges it, writes the visitor decision record,
    /// and resolves the session. Repeated calls without a reply leave the
    /// session untouched.
    pub async fn status(&self, session_id: Uuid) -> Result<StatusPoll, GatekeeperError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(GatekeeperError::UnknownSession(session_id))?;
        let mut session = session.lock().await;

        if session.step == ConversationStep::Resolved {
            return Ok(StatusPoll::Resolved(resolution_text(&session)));
        }
        if session.step != ConversationStep::AwaitingReply {
            return Ok(StatusPoll::Pending);
        }

        let Some(reply) = self.channel.poll(session_id) else {
            return Ok(StatusPoll::Pending);
        };

        // Both fields were set on the transition into AwaitingReply.
        let visitor = session.visitor_name.clone().unwrap_or_default();
        let whom = session.responsible_party.clone().unwrap_or_default();

        let verdict = match self.decisions.judge(&visitor, &whom, Some(&reply)).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // Safe default: an unreachable judge denies entry.
                tracing::warn!(error = %e, "judgment call failed; denying");
                Verdict::Denied
            }
        };
        let outcome = match verdict {
            Verdict::Approved => Outcome::Approved,
            Verdict::Denied => Outcome::Denied,
        };

        let (date, time) = now_strings();
        if let Err(e) = self
            .store
            .record_visitor(&visitor, &whom, outcome.as_str(), &date, &time)
            .await
        {
            // Put the reply back so the next poll can retry resolution.
            self.channel.restore_reply(session_id, reply);
            return Err(e.into());
        }

        session.outcome = Some(outcome);
        session.step = ConversationStep::Resolved;
        session.touch();
        tracing::info!(%session_id, outcome = outcome.as_str(), "visitor session resolved");

        let closing = match outcome {
            Outcome::Approved => "Gate opened.",
            _ => "Access denied.",
        };
        Ok(StatusPoll::Resolved(format!(
            "Reply from {whom}: {reply}\nDecision: {}\n{closing}",
            outcome.as_str()
        )))
    }

    // --- Webhooks ---

    /// Inbound webhook path: correlate a context-free reply to the oldest
    /// outstanding request from this sender. Judgment happens on the next
    /// status poll.
    pub fn receive_reply(&self, sender_channel: &str, body: &str) {
        match self.channel.correlate_reply(sender_channel, body) {
            Some(session_id) => {
                tracing::info!(%session_id, "reply stored for next status poll");
            }
            None => {
                tracing::warn!(sender = sender_channel, "reply with no pending request; discarded");
            }
        }
    }

    // --- Expiry ---

    /// Resolve sessions that outlived the TTL.
    ///
    /// `AwaitingReply` sessions get an `Expired` decision record and are
    /// dropped from the correlation queues; the resolved session then
    /// lingers one more TTL so status polls can observe the outcome.
    /// Idle sessions in any other step are simply evicted.
    pub async fn expire_stale(&self) {
        let cutoff = Utc::now() - self.session_ttl;

        for (id, session) in self.sessions.all() {
            let mut session = session.lock().await;
            if session.last_active > cutoff {
                continue;
            }

            match session.step {
                ConversationStep::AwaitingReply => {
                    let visitor = session.visitor_name.clone().unwrap_or_default();
                    let whom = session.responsible_party.clone().unwrap_or_default();
                    let (date, time) = now_strings();
                    if let Err(e) = self
                        .store
                        .record_visitor(&visitor, &whom, Outcome::Expired.as_str(), &date, &time)
                        .await
                    {
                        tracing::warn!(error = %e, %id, "could not record expiry; will retry next sweep");
                        continue;
                    }
                    self.channel.forget(id);
                    session.outcome = Some(Outcome::Expired);
                    session.step = ConversationStep::Resolved;
                    session.touch();
                    tracing::info!(%id, "visitor session expired");
                }
                _ => {
                    drop(session);
                    self.sessions.remove(id);
                    tracing::debug!(%id, "stale session evicted");
                }
            }
        }
    }
}

fn resolution_text(session: &VisitorSession) -> String {
    match session.outcome {
        Some(Outcome::Approved) => "Approved. Gate opened.".to_string(),
        Some(Outcome::Denied) => "Denied. Access denied.".to_string(),
        Some(Outcome::Expired) => {
            "The approval request expired before a reply arrived.".to_string()
        }
        None => "Resolved.".to_string(),
    }
}

/// Local date and time strings, `%Y-%m-%d` / `%H:%M:%S`.
fn now_strings() -> (String, String) {
    let now = Local::now();
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%H:%M:%S").to_string(),
    )
}
