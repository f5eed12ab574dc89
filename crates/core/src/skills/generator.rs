//! # Generation Capability
//!
//! The narrow seam between the pipeline and any LLM: a prompt (plus the JSON
//! schema the answer should follow) goes in, raw text comes out. Everything
//! after that (decoding, validation, retries) belongs to the stage runner.

use async_trait::async_trait;
use schemars::JsonSchema;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::TransportError;

/// One generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Short routing label, e.g. `draft` or `assess:editor`
    pub label: String,
    pub system: String,
    pub prompt: String,
    /// Pretty-printed JSON schema of the expected answer
    pub schema_hint: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        label: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            system: system.into(),
            prompt: prompt.into(),
            schema_hint: None,
        }
    }

    /// Request whose answer must be a `T`
    pub fn for_payload<T: JsonSchema>(
        label: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let schema = schemars::schema_for!(T);
        let mut request = Self::new(label, system, prompt);
        request.schema_hint = serde_json::to_string_pretty(&schema).ok();
        request
    }

    /// Re-prompt carrying the reason the previous answer was refused
    pub fn with_feedback(&self, feedback: &str) -> Self {
        let mut next = self.clone();
        next.prompt = format!(
            "{}\n\n## Previous attempt rejected\n{}\nReturn one corrected JSON object only.",
            self.prompt, feedback
        );
        next
    }

    /// User message as sent to the model
    pub fn render_prompt(&self) -> String {
        match &self.schema_hint {
            Some(schema) => format!(
                "{}\n\n## Output format\nRespond with a single JSON object matching this JSON Schema:\n```json\n{}\n```",
                self.prompt, schema
            ),
            None => self.prompt.clone(),
        }
    }
}

/// External text generation capability
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError>;

    fn name(&self) -> &str {
        "generator"
    }
}

struct Route {
    matcher: String,
    queue: VecDeque<Result<String, TransportError>>,
    last: Option<Result<String, TransportError>>,
}

/// Deterministic generator answering from scripted queues.
///
/// Responses are routed by the first registered matcher contained in the
/// request label. Each route replays its queue in order and then keeps
/// repeating the last entry.
#[derive(Default)]
pub struct ScriptedGenerator {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, matcher: &str, response: Result<String, TransportError>) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes.iter_mut().find(|r| r.matcher == matcher) {
            Some(route) => route.queue.push_back(response),
            None => routes.push(Route {
                matcher: matcher.to_string(),
                queue: VecDeque::from([response]),
                last: None,
            }),
        }
    }

    /// Queue a raw text answer
    pub fn respond(self, matcher: &str, text: impl Into<String>) -> Self {
        self.push(matcher, Ok(text.into()));
        self
    }

    /// Queue a JSON answer
    pub fn respond_json(self, matcher: &str, value: &serde_json::Value) -> Self {
        self.respond(matcher, value.to_string())
    }

    /// Queue a transport failure
    pub fn fail(self, matcher: &str, error: TransportError) -> Self {
        self.push(matcher, Err(error));
        self
    }

    /// Total number of generate calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls whose label contains `fragment`
    pub fn calls_for(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.label.contains(fragment))
            .count()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes
            .iter_mut()
            .find(|r| request.label.contains(&r.matcher))
            .ok_or_else(|| {
                TransportError::Config(format!("no scripted response for '{}'", request.label))
            })?;

        match route.queue.pop_front() {
            Some(next) => {
                route.last = Some(next.clone());
                next
            }
            None => route.last.clone().unwrap_or_else(|| {
                Err(TransportError::Config(format!(
                    "script for '{}' is empty",
                    route.matcher
                )))
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
