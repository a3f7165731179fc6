use crate::credentials::{Credential, CredentialCache};
use crate::error::{DispatchError, ProviderError};
use crate::provider::{MessagingProvider, SendReceipt, TemplateMessage};
use log::{info, warn};
use std::sync::Arc;

/// Delivers event notifications through the messaging provider
///
/// Each notification is a two-field template message addressed to the single
/// configured recipient. Delivery is best effort: a provider rejection is
/// returned to the caller without retry, except when the provider reports the
/// access token as expired, in which case the token is refreshed and the send
/// is retried exactly once.
pub struct NotificationDispatcher {
    credentials: Arc<CredentialCache>,
    provider: Arc<dyn MessagingProvider>,
    recipient_id: String,
    template_id: String,
}

impl NotificationDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    ///
    /// * `credentials` - Cache supplying access tokens
    /// * `provider` - Provider used to send messages
    /// * `recipient_id` - Recipient of every notification
    /// * `template_id` - Template every notification is rendered with
    pub fn new(
        credentials: Arc<CredentialCache>,
        provider: Arc<dyn MessagingProvider>,
        recipient_id: String,
        template_id: String,
    ) -> Self {
        Self {
            credentials,
            provider,
            recipient_id,
            template_id,
        }
    }

    /// Send a notification describing one event
    ///
    /// # Arguments
    ///
    /// * `event_kind` - Short description of the event source
    /// * `event_detail` - Event detail, typically its timestamp
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::CredentialUnavailable` if no access token can
    /// be obtained and `DispatchError::ProviderRejected` with the raw response
    /// body if the provider refuses the message.
    pub async fn send(
        &self,
        event_kind: &str,
        event_detail: &str,
    ) -> Result<SendReceipt, DispatchError> {
        let message = TemplateMessage::event(
            &self.recipient_id,
            &self.template_id,
            event_kind,
            event_detail,
        );

        let credential = self.credentials.get_valid_credential().await?;
        match self.deliver(&credential, &message).await {
            Err(DispatchError::Transport(ProviderError::CredentialExpired { code, .. })) => {
                warn!(
                    "Provider rejected access token (errcode {}), refreshing and retrying once",
                    code
                );
                let refreshed = self.credentials.force_refresh(&credential).await?;
                self.deliver(&refreshed, &message).await.map_err(|e| match e {
                    DispatchError::Transport(ProviderError::CredentialExpired { body, .. }) => {
                        DispatchError::ProviderRejected { body }
                    }
                    other => other,
                })
            }
            result => result,
        }
    }

    async fn deliver(
        &self,
        credential: &Credential,
        message: &TemplateMessage,
    ) -> Result<SendReceipt, DispatchError> {
        match self.provider.send_message(&credential.token, message).await {
            Ok(receipt) => {
                info!("Notification accepted by provider: {}", receipt.body);
                Ok(receipt)
            }
            Err(ProviderError::Rejected { body }) => Err(DispatchError::ProviderRejected { body }),
            Err(e) => Err(DispatchError::Transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::CredentialError;
    use crate::provider::{MockProvider, TokenGrant, DETAIL_FIELD, KIND_FIELD};
    use tempfile::TempDir;

    fn dispatcher(provider: &MockProvider, dir: &TempDir) -> NotificationDispatcher {
        let provider: Arc<dyn MessagingProvider> = Arc::new(provider.clone());
        let credentials = Arc::new(CredentialCache::new(
            Arc::clone(&provider),
            "wx-app".to_string(),
            "secret".to_string(),
            dir.path().join("access_token.json"),
            chrono::Duration::seconds(100),
            Arc::new(SystemClock),
        ));
        NotificationDispatcher::new(
            credentials,
            provider,
            "o-recipient".to_string(),
            "tpl-42".to_string(),
        )
    }

    fn expired() -> ProviderError {
        ProviderError::CredentialExpired {
            code: 42001,
            body: r#"{"errcode":42001,"errmsg":"access_token expired"}"#.to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_builds_template_message() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::success();

        let receipt = dispatcher(&provider, &dir)
            .send("Application Error", "2024-12-09 10:30:45")
            .await
            .unwrap();

        assert_eq!(receipt.msg_id, Some(1));
        let message = provider.last_message().unwrap();
        assert_eq!(message.touser, "o-recipient");
        assert_eq!(message.template_id, "tpl-42");
        assert_eq!(message.data[KIND_FIELD].value, "Application Error");
        assert_eq!(message.data[DETAIL_FIELD].value, "2024-12-09 10:30:45");
        assert_eq!(provider.last_token().as_deref(), Some("mock-token-1"));
    }

    #[tokio::test]
    async fn test_credential_failure_aborts_send() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::token_error(ProviderError::HttpError("down".to_string()));

        let result = dispatcher(&provider, &dir).send("kind", "detail").await;

        assert!(matches!(
            result,
            Err(DispatchError::CredentialUnavailable(CredentialError::FetchFailed(_)))
        ));
        assert_eq!(provider.send_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let body = r#"{"errcode":40037,"errmsg":"invalid template_id"}"#;
        let provider = MockProvider::send_error(body);

        let result = dispatcher(&provider, &dir).send("kind", "detail").await;

        match result {
            Err(DispatchError::ProviderRejected { body: b }) => assert_eq!(b, body),
            other => panic!("Expected ProviderRejected, got {:?}", other),
        }
        assert_eq!(provider.send_count(), 1);
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_retried_once() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::with_responses(
            Vec::new(),
            vec![
                Err(expired()),
                Ok(SendReceipt {
                    msg_id: Some(7),
                    body: "{}".to_string(),
                }),
            ],
        );

        let receipt = dispatcher(&provider, &dir).send("kind", "detail").await.unwrap();

        assert_eq!(receipt.msg_id, Some(7));
        assert_eq!(provider.fetch_count(), 2);
        assert_eq!(provider.send_count(), 2);
        assert_eq!(provider.last_token().as_deref(), Some("mock-token-2"));
    }

    #[tokio::test]
    async fn test_second_expiry_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::with_responses(Vec::new(), vec![Err(expired())]);

        let result = dispatcher(&provider, &dir).send("kind", "detail").await;

        assert!(matches!(result, Err(DispatchError::ProviderRejected { .. })));
        assert_eq!(provider.send_count(), 2);
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_aborts_retry() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::with_responses(
            vec![
                Ok(TokenGrant {
                    access_token: "first".to_string(),
                    expires_in: 7200,
                }),
                Err(ProviderError::HttpError("down".to_string())),
            ],
            vec![Err(expired())],
        );

        let result = dispatcher(&provider, &dir).send("kind", "detail").await;

        assert!(matches!(
            result,
            Err(DispatchError::CredentialUnavailable(CredentialError::FetchFailed(
                ProviderError::HttpError(_)
            )))
        ));
        assert_eq!(provider.send_count(), 1);
        assert_eq!(provider.fetch_count(), 2);
        assert_eq!(provider.last_token().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let provider = MockProvider::with_responses(
            Vec::new(),
            vec![Err(ProviderError::HttpError("connection reset".to_string()))],
        );

        let result = dispatcher(&provider, &dir).send("kind", "detail").await;

        assert!(matches!(
            result,
            Err(DispatchError::Transport(ProviderError::HttpError(_)))
        ));
        assert_eq!(provider.send_count(), 1);
    }
}
