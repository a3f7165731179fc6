use crate::error::ProviderError;
use crate::provider::{MessagingProvider, ProviderFuture, SendReceipt, TemplateMessage, TokenGrant};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock provider for testing and dry runs
///
/// Token and send responses are replayed in order, cycling back to the first
/// once exhausted. Every call is counted and the last message and token are
/// recorded for inspection.
#[derive(Clone)]
pub struct MockProvider {
    token_responses: Vec<Result<TokenGrant, ProviderError>>,
    send_responses: Vec<Result<SendReceipt, ProviderError>>,
    state: Arc<Mutex<MockState>>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct MockState {
    token_index: usize,
    send_index: usize,
    fetch_count: usize,
    send_count: usize,
    last_message: Option<TemplateMessage>,
    last_token: Option<String>,
}

impl MockProvider {
    /// Create a mock with scripted responses
    pub fn with_responses(
        token_responses: Vec<Result<TokenGrant, ProviderError>>,
        send_responses: Vec<Result<SendReceipt, ProviderError>>,
    ) -> Self {
        Self {
            token_responses,
            send_responses,
            state: Arc::new(Mutex::new(MockState::default())),
            delay: None,
        }
    }

    /// Create a mock that issues fresh two-hour tokens and accepts every message
    ///
    /// Each issued token is distinct ("mock-token-1", "mock-token-2", ...).
    pub fn success() -> Self {
        Self::with_responses(Vec::new(), vec![Ok(Self::receipt())])
    }

    /// Create a mock whose token endpoint always fails
    pub fn token_error(error: ProviderError) -> Self {
        Self::with_responses(vec![Err(error)], vec![Ok(Self::receipt())])
    }

    /// Create a mock that issues tokens but rejects every message with `body`
    pub fn send_error(body: &str) -> Self {
        Self::with_responses(
            Vec::new(),
            vec![Err(ProviderError::Rejected {
                body: body.to_string(),
            })],
        )
    }

    /// Add a delay to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of token requests made
    pub fn fetch_count(&self) -> usize {
        self.state().fetch_count
    }

    /// Number of send requests made
    pub fn send_count(&self) -> usize {
        self.state().send_count
    }

    /// Last message passed to `send_message`
    pub fn last_message(&self) -> Option<TemplateMessage> {
        self.state().last_message.clone()
    }

    /// Access token used by the last `send_message` call
    pub fn last_token(&self) -> Option<String> {
        self.state().last_token.clone()
    }

    fn receipt() -> SendReceipt {
        SendReceipt {
            msg_id: Some(1),
            body: r#"{"errcode":0,"errmsg":"ok","msgid":1}"#.to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl MessagingProvider for MockProvider {
    fn fetch_token<'a>(
        &'a self,
        _app_id: &'a str,
        _app_secret: &'a str,
    ) -> ProviderFuture<'a, TokenGrant> {
        Box::pin(async move {
            self.pause().await;

            let mut state = self.state();
            state.fetch_count += 1;

            if self.token_responses.is_empty() {
                return Ok(TokenGrant {
                    access_token: format!("mock-token-{}", state.fetch_count),
                    expires_in: 7200,
                });
            }

            let index = state.token_index % self.token_responses.len();
            state.token_index += 1;
            self.token_responses[index].clone()
        })
    }

    fn send_message<'a>(
        &'a self,
        access_token: &'a str,
        message: &'a TemplateMessage,
    ) -> ProviderFuture<'a, SendReceipt> {
        Box::pin(async move {
            self.pause().await;

            let mut state = self.state();
            state.send_count += 1;
            state.last_message = Some(message.clone());
            state.last_token = Some(access_token.to_string());

            if self.send_responses.is_empty() {
                return Ok(Self::receipt());
            }

            let index = state.send_index % self.send_responses.len();
            state.send_index += 1;
            self.send_responses[index].clone()
        })
    }
}
