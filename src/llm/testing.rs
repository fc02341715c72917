//! Scripted chat backend for unit tests.

use super::{ChatBackend, ChatRequest, ChatResponse};
use crate::error::LlmError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync>;

pub struct ScriptedBackend {
    responder: Responder,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    /// Answer every request through `responder`
    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Hand out `answers` in order, then fail with HTTP 500
    pub fn queue(answers: Vec<Result<String, LlmError>>) -> Self {
        let answers = Mutex::new(VecDeque::from(answers));
        Self::with(move |_| {
            answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::Status {
                    status: 500,
                    body: "script exhausted".to_string(),
                }))
        })
    }

    /// Fail every request
    pub fn failing() -> Self {
        Self::with(|_| {
            Err(LlmError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(request).map(|content| ChatResponse {
            content,
            usage: None,
        })
    }
}
