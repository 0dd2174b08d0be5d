//! Scripted collaborators for workflow tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::compliance::classifier::DetectionStrategy;
use crate::compliance::mapping::EntityType;
use crate::compliance::revert::{RenderedDocument, RevertScope};
use crate::core::collaborators::{
    ChangeCallback, ChatSurface, DetectedSpan, Detector, Faker, ResponseObserver, Subscription,
};
use crate::core::config::WorkflowConfig;
use crate::core::error::DetectorError;
use crate::core::workflow::{AnonymizerSession, Collaborators};

/// What the scripted detector does when called
pub enum DetectorScript {
    Spans(Vec<DetectedSpan>),
    Fail(DetectorError),
    /// Never returns
    Hang,
}

pub struct ScriptedDetector {
    script: DetectorScript,
    pub calls: Mutex<Vec<DetectionStrategy>>,
}

impl ScriptedDetector {
    pub fn new(script: DetectorScript) -> Arc<Self> {
        Arc::new(ScriptedDetector {
            script,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn spans(spans: Vec<DetectedSpan>) -> Arc<Self> {
        Self::new(DetectorScript::Spans(spans))
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(
        &self,
        _text: &str,
        strategy: DetectionStrategy,
    ) -> Result<Vec<DetectedSpan>, DetectorError> {
        self.calls.lock().push(strategy);
        match &self.script {
            DetectorScript::Spans(spans) => Ok(spans.clone()),
            DetectorScript::Fail(err) => Err(err.clone()),
            DetectorScript::Hang => std::future::pending().await,
        }
    }
}

/// Faker answering from a fixed table
pub struct TableFaker(pub HashMap<String, String>);

impl TableFaker {
    pub fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(TableFaker(
            pairs
                .iter()
                .map(|(o, s)| (o.to_string(), s.to_string()))
                .collect(),
        ))
    }
}

impl Faker for TableFaker {
    fn generate(&self, _entity_type: EntityType, original: &str) -> String {
        self.0
            .get(original)
            .cloned()
            .unwrap_or_else(|| format!("{}-fake", original))
    }
}

/// How the fake site answers a submit
pub enum Responder {
    /// Render the sent text back as the response
    Echo,
    /// Never answer
    Silent,
    /// Answer with a fixed text
    Fixed(String),
    /// Render the sent text back, then keep appending `chunk` to it
    /// `updates` times, one append per `every`
    Streaming {
        chunk: &'static str,
        updates: usize,
        every: Duration,
    },
}

/// Chat input plus response area of a fake chat page
pub struct FakeSite {
    editable: Mutex<String>,
    responses: Arc<Mutex<Vec<String>>>,
    listeners: Arc<Mutex<HashMap<u64, ChangeCallback>>>,
    next_listener: AtomicU64,
    responder: Responder,
    pub can_submit: bool,
    pub automation: Result<(), String>,
    pub submits: AtomicUsize,
    pub sent: Mutex<Vec<String>>,
    /// Response text as written back by each revert commit
    pub commits: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new(prompt: &str, responder: Responder) -> Self {
        FakeSite {
            editable: Mutex::new(prompt.to_string()),
            responses: Arc::new(Mutex::new(Vec::new())),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener: AtomicU64::new(0),
            responder,
            can_submit: true,
            automation: Ok(()),
            submits: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
        }
    }

    /// Append a response and notify subscribers
    pub fn push_response(&self, text: &str) {
        self.responses.lock().push(text.to_string());
        self.fire();
    }

    pub fn latest(&self) -> String {
        self.responses.lock().last().cloned().unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn fire(&self) {
        fire(&self.listeners);
    }

    /// Append to the latest response in the background, like a surface
    /// rendering a streamed answer
    fn stream(&self, chunk: &'static str, updates: usize, every: Duration) {
        let responses = self.responses.clone();
        let listeners = self.listeners.clone();
        tokio::spawn(async move {
            for _ in 0..updates {
                tokio::time::sleep(every).await;
                if let Some(last) = responses.lock().last_mut() {
                    last.push_str(chunk);
                }
                fire(&listeners);
            }
        });
    }
}

fn fire(listeners: &Mutex<HashMap<u64, ChangeCallback>>) {
    for callback in listeners.lock().values() {
        callback();
    }
}

impl ChatSurface for FakeSite {
    fn automation_support(&self) -> Result<(), String> {
        self.automation.clone()
    }

    fn editable_text(&self) -> String {
        self.editable.lock().clone()
    }

    fn set_editable_text(&self, text: &str) {
        *self.editable.lock() = text.to_string();
    }

    fn submit(&self) -> bool {
        if !self.can_submit {
            return false;
        }
        self.submits.fetch_add(1, Ordering::SeqCst);
        let text = self.editable_text();
        self.sent.lock().push(text.clone());
        match &self.responder {
            Responder::Echo => self.push_response(&text),
            Responder::Fixed(reply) => self.push_response(reply),
            Responder::Streaming { chunk, updates, every } => {
                self.push_response(&text);
                self.stream(*chunk, *updates, *every);
            }
            Responder::Silent => {}
        }
        true
    }
}

impl ResponseObserver for FakeSite {
    fn subscribe(&self, on_change: ChangeCallback) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, on_change);
        let listeners = self.listeners.clone();
        Subscription::new(move || {
            listeners.lock().remove(&id);
        })
    }

    fn count_responses(&self) -> usize {
        self.responses.lock().len()
    }

    fn latest_response_text(&self) -> String {
        self.latest()
    }

    fn commit_document(&self, document: &RenderedDocument) {
        let text = document.text_in(RevertScope::Document);
        if let Some(last) = self.responses.lock().last_mut() {
            *last = text.clone();
        }
        self.commits.lock().push(text);
    }
}

/// Timings short enough for tests
pub fn fast_config() -> WorkflowConfig {
    let mut config = WorkflowConfig::default();
    config.await_response.timeout_ms = 300;
    config.await_response.stability_checks = 2;
    config.await_response.stability_interval_ms = 10;
    config.revert.attempt_interval_ms = 5;
    config.dispatch_guard_ms = 200;
    config.clear_delay_ms = 50;
    config
}

pub fn session(
    config: WorkflowConfig,
    detector: Arc<ScriptedDetector>,
    faker: Arc<TableFaker>,
    site: Arc<FakeSite>,
) -> AnonymizerSession {
    AnonymizerSession::new(
        config,
        Collaborators {
            detector,
            faker,
            chat: site.clone(),
            observer: site,
        },
    )
}
