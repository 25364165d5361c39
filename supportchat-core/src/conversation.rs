//! One conversation thread: drives send → stream → finalize exchanges.
//!
//! Exchange state machine:
//! `Idle → Sending → Streaming → {Completed | Failed}`, where `Sending` lasts
//! until the first body chunk of a successful response arrives. Only one
//! exchange runs at a time; a concurrent `send` is rejected with `Busy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::assembler::{Progress, ReplyAssembler};
use crate::config::ChatCfg;
use crate::error::{ChatError, CoreResult};
use crate::model::{Role, Session, UserIdentity};
use crate::normalizer::normalize_outbound;
use crate::source::ReplySource;
use crate::store::{new_record, HistoryStore};
use crate::telemetry;
use crate::transcript::{Entry, EntryId, Transcript, TranscriptSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

impl ExchangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: EntryId,
    pub text: String,
    pub state: ExchangeState,
}

struct HistoryLink {
    store: Arc<dyn HistoryStore>,
    user: UserIdentity,
    session: Session,
}

pub struct Conversation {
    source: Arc<dyn ReplySource>,
    history: Option<HistoryLink>,
    transcript: Mutex<Transcript>,
    state: Mutex<ExchangeState>,
    in_flight: AtomicBool,
    /// Cancelled when the conversation goes away; parent of every exchange token.
    shutdown: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

/// Holds the in-flight flag for the duration of one exchange.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Conversation {
    pub fn new(source: Arc<dyn ReplySource>, cfg: &ChatCfg) -> Self {
        let mut transcript = Transcript::new();
        if !cfg.greeting.trim().is_empty() {
            let mut greeting = Entry::new(Role::Assistant, cfg.greeting.clone());
            greeting.ephemeral = true;
            transcript.append(greeting);
        }
        Self {
            source,
            history: None,
            transcript: Mutex::new(transcript),
            state: Mutex::new(ExchangeState::Idle),
            in_flight: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// Persist this thread for a signed-in user and load what was saved before.
    /// Returns the number of messages loaded.
    pub async fn attach_history(
        &mut self,
        store: Arc<dyn HistoryStore>,
        user: UserIdentity,
    ) -> CoreResult<usize> {
        let session = store.ensure_session(&user).await?;
        let records = store.list_messages(&user, &session.id).await?;
        tracing::info!(store = store.name(), session = %session.id, loaded = records.len(), "history attached");
        lock(&self.transcript).load_history(&records);
        self.history = Some(HistoryLink {
            store,
            user,
            session,
        });
        Ok(records.len())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.history.as_ref().map(|h| h.session.id.as_str())
    }

    /// Subscribers are called synchronously on every transcript change.
    pub fn subscribe(&self, sub: Arc<dyn TranscriptSubscriber>) {
        lock(&self.transcript).subscribe(sub);
    }

    pub fn state(&self) -> ExchangeState {
        *lock(&self.state)
    }

    pub fn snapshot(&self) -> Vec<Entry> {
        lock(&self.transcript).entries().to_vec()
    }

    /// Token that tears the whole conversation down when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Abandon the exchange in flight, if any. Returns whether one was running.
    pub fn cancel_current(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Send one user message and stream the assistant reply into the transcript.
    pub async fn send(&self, text: &str) -> CoreResult<Reply> {
        let content = normalize_outbound(text)?;
        let _guard = InFlight::acquire(&self.in_flight).ok_or(ChatError::Busy)?;

        let exchange_id = Uuid::new_v4().to_string();
        let cancel = self.shutdown.child_token();
        *lock(&self.current) = Some(cancel.clone());

        let span = telemetry::exchange_span(&exchange_id);
        let result = self
            .run_exchange(content, &exchange_id, &cancel)
            .instrument(span)
            .await;

        *lock(&self.current) = None;
        result
    }

    async fn run_exchange(
        &self,
        content: String,
        exchange_id: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Reply> {
        self.set_state(ExchangeState::Sending);

        let history = {
            let mut t = lock(&self.transcript);
            t.append(Entry::new(Role::User, content.clone()));
            t.history()
        };
        self.persist(Role::User, &content).await;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            r = self.source.open(&history, exchange_id) => r,
        };
        let opened = match opened {
            Ok(o) => o,
            Err(e) => return Err(self.fail(e, None)),
        };
        if let Some(rid) = &opened.upstream_request_id {
            tracing::Span::current().record(telemetry::KEY_UPSTREAM_REQUEST_ID, rid.as_str());
        }

        let reply_id = EntryId::new();
        let mut asm = ReplyAssembler::new();
        let mut body = opened.body;
        let outcome: CoreResult<()> = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(ChatError::Cancelled),
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if self.state() == ExchangeState::Sending {
                        self.set_state(ExchangeState::Streaming);
                    }
                    let progress = {
                        let mut t = lock(&self.transcript);
                        asm.feed(&chunk, |text| t.upsert(reply_id, Role::Assistant, text))
                    };
                    if progress == Progress::Done {
                        break Ok(());
                    }
                }
                Some(Err(e)) => break Err(e),
                None => {
                    let mut t = lock(&self.transcript);
                    asm.finish(|text| t.upsert(reply_id, Role::Assistant, text));
                    break Ok(());
                }
            }
        };
        drop(body);

        match outcome {
            Ok(()) => {
                let text = asm.text().to_string();
                telemetry::record_frames(&tracing::Span::current(), &asm.stats(), text.chars().count());
                if !text.is_empty() {
                    self.persist(Role::Assistant, &text).await;
                }
                self.set_state(ExchangeState::Completed);
                telemetry::record_outcome(&tracing::Span::current(), ExchangeState::Completed.as_str(), None);
                tracing::info!(chars = text.chars().count(), "exchange completed");
                Ok(Reply {
                    id: reply_id,
                    text,
                    state: ExchangeState::Completed,
                })
            }
            // torn down: nothing may arrive in the discarded view, nothing is saved
            Err(ChatError::Cancelled) => Err(self.fail(ChatError::Cancelled, Some(&asm))),
            Err(e) => {
                // keep the visible partial reply
                if !asm.text().is_empty() {
                    self.persist(Role::Assistant, asm.text()).await;
                }
                Err(self.fail(e, Some(&asm)))
            }
        }
    }

    fn fail(&self, e: ChatError, asm: Option<&ReplyAssembler>) -> ChatError {
        self.set_state(ExchangeState::Failed);
        let span = tracing::Span::current();
        if let Some(asm) = asm {
            telemetry::record_frames(&span, &asm.stats(), asm.text().chars().count());
        }
        let kind = match &e {
            ChatError::Cancelled => "cancelled",
            e if e.is_connection_failure() => "connection",
            _ => "other",
        };
        telemetry::record_outcome(&span, ExchangeState::Failed.as_str(), Some(kind));
        tracing::warn!(error = %e, kind, "exchange failed");
        e
    }

    /// Best-effort write; failures are logged and never interrupt the exchange.
    async fn persist(&self, role: Role, content: &str) {
        let Some(link) = &self.history else {
            return;
        };
        let record = new_record(&link.session, role, content);
        if let Err(e) = link.store.append_message(&link.user, &record).await {
            tracing::warn!(
                store = link.store.name(),
                role = role.as_str(),
                error = %e,
                "failed to persist chat message"
            );
        }
    }

    fn set_state(&self, s: ExchangeState) {
        *lock(&self.state) = s;
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
