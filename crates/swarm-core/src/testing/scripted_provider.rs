//! A content provider that answers from a script.

use crate::provider::{ContentProvider, ProposalContext, ProviderError};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Serves queued responses in order, then a fallback.
///
/// Every request is recorded so tests can assert on what agents asked for.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProposalContext>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every request with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    #[must_use]
    pub fn then_err(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    /// Sleeps before answering, to exercise handler timeouts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, response: Result<String, ProviderError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ProposalContext> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ContentProvider for ScriptedProvider {
    fn propose(&self, ctx: &ProposalContext) -> Result<String, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.clone());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(ProviderError::Unavailable("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProposalContext {
        ProposalContext {
            agent: "ping".into(),
            state: "IDLE".into(),
            topic: "swarmsh.ping.request".to_string(),
            command: "swarmsh.ping.pong".to_string(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_script_then_fallback() {
        let provider = ScriptedProvider::always("later")
            .then_ok("first")
            .then_err(ProviderError::Rejected("no".into()));

        assert_eq!(provider.propose(&ctx()).unwrap(), "first");
        assert!(provider.propose(&ctx()).is_err());
        assert_eq!(provider.propose(&ctx()).unwrap(), "later");
        assert_eq!(provider.request_count(), 3);
    }

    #[test]
    fn test_empty_script_is_unavailable() {
        let provider = ScriptedProvider::new();
        assert!(matches!(provider.propose(&ctx()), Err(ProviderError::Unavailable(_))));
    }
}
