use crate::error::ProviderError;
use crate::provider::{MessagingProvider, ProviderFuture, SendReceipt, TemplateMessage, TokenGrant};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Error codes that mean the access token is no longer accepted
const CREDENTIAL_EXPIRED_CODES: [i64; 3] = [40001, 40014, 42001];

/// WeChat official-account API client
///
/// Uses the `token` endpoint to obtain access tokens and the
/// `message/template/send` endpoint to deliver template messages.
pub struct WeChatProvider {
    client: Client,
    base_url: String,
}

/// Status fields present on every API response
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    msgid: Option<i64>,
}

impl WeChatProvider {
    /// Create a new provider client
    ///
    /// # Arguments
    /// * `base_url` - API root (e.g., "https://api.weixin.qq.com/cgi-bin")
    /// * `timeout` - Timeout applied to each request
    ///
    /// # Example
    /// ```
    /// use event_notifier::provider::WeChatProvider;
    /// use std::time::Duration;
    ///
    /// let provider = WeChatProvider::new(
    ///     "https://api.weixin.qq.com/cgi-bin".to_string(),
    ///     Duration::from_secs(10),
    /// ).unwrap();
    /// ```
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn token_url(&self) -> String {
        format!("{}/token", self.base_url.trim_end_matches('/'))
    }

    fn send_url(&self) -> String {
        format!("{}/message/template/send", self.base_url.trim_end_matches('/'))
    }

    /// Interpret the body returned by the token endpoint
    fn parse_token_response(success: bool, body: &str) -> Result<TokenGrant, ProviderError> {
        if !success {
            return Err(ProviderError::Rejected {
                body: body.to_string(),
            });
        }

        let status: ApiStatus = serde_json::from_str(body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse token response: {}", e))
        })?;
        if status.errcode != 0 {
            return Err(ProviderError::Rejected {
                body: body.to_string(),
            });
        }

        serde_json::from_str(body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse token response: {}", e))
        })
    }

    /// Interpret the body returned by the send endpoint
    fn parse_send_response(success: bool, body: &str) -> Result<SendReceipt, ProviderError> {
        // Token errors are signalled in the body, sometimes on a non-2xx status
        let status = serde_json::from_str::<ApiStatus>(body).ok();

        if let Some(ref status) = status {
            if CREDENTIAL_EXPIRED_CODES.contains(&status.errcode) {
                return Err(ProviderError::CredentialExpired {
                    code: status.errcode,
                    body: body.to_string(),
                });
            }
        }

        match status {
            Some(status) if success && status.errcode == 0 => Ok(SendReceipt {
                msg_id: status.msgid,
                body: body.to_string(),
            }),
            _ => Err(ProviderError::Rejected {
                body: body.to_string(),
            }),
        }
    }
}

impl MessagingProvider for WeChatProvider {
    fn fetch_token<'a>(
        &'a self,
        app_id: &'a str,
        app_secret: &'a str,
    ) -> ProviderFuture<'a, TokenGrant> {
        Box::pin(async move {
            debug!("Requesting access token from {}", self.token_url());

            let response = self
                .client
                .get(self.token_url())
                .query(&[
                    ("grant_type", "client_credential"),
                    ("appid", app_id),
                    ("secret", app_secret),
                ])
                .send()
                .await
                .map_err(|e| ProviderError::HttpError(format!("Token request failed: {}", e)))?;

            let success = response.status().is_success();
            let body = response
                .text()
                .await
                .map_err(|e| ProviderError::HttpError(format!("Failed to read token response: {}", e)))?;

            Self::parse_token_response(success, &body)
        })
    }

    fn send_message<'a>(
        &'a self,
        access_token: &'a str,
        message: &'a TemplateMessage,
    ) -> ProviderFuture<'a, SendReceipt> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.send_url())
                .query(&[("access_token", access_token)])
                .json(message)
                .send()
                .await
                .map_err(|e| ProviderError::HttpError(format!("Send request failed: {}", e)))?;

            let success = response.status().is_success();
            let body = response
                .text()
                .await
                .map_err(|e| ProviderError::HttpError(format!("Failed to read send response: {}", e)))?;

            debug!("Provider send response: {}", body);
            Self::parse_send_response(success, &body)
        })
    }
}
