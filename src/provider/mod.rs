//! Messaging provider seam
//!
//! The provider exposes two remote operations: exchanging the application
//! credentials for a short-lived access token, and sending a template message
//! with such a token. `WeChatProvider` talks to the real HTTP API and
//! `MockProvider` replays scripted responses.

pub mod mock;
pub mod wechat;

pub use mock::MockProvider;
pub use wechat::WeChatProvider;

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Display color applied to every template field
pub const FIELD_COLOR: &str = "#173177";

/// Template placeholder that carries the event kind
pub const KIND_FIELD: &str = "operatype";

/// Template placeholder that carries the event detail
pub const DETAIL_FIELD: &str = "operacnt";

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Remote messaging provider
pub trait MessagingProvider: Send + Sync {
    /// Exchange application credentials for an access token
    fn fetch_token<'a>(&'a self, app_id: &'a str, app_secret: &'a str)
        -> ProviderFuture<'a, TokenGrant>;

    /// Send a template message authorized by `access_token`
    fn send_message<'a>(
        &'a self,
        access_token: &'a str,
        message: &'a TemplateMessage,
    ) -> ProviderFuture<'a, SendReceipt>;
}

/// Token issued by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: String,
    /// Lifetime in seconds as reported by the provider
    #[serde(default)]
    pub expires_in: i64,
}

/// Acknowledgement of an accepted message
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    /// Provider-assigned message id, when one is returned
    pub msg_id: Option<i64>,
    /// Raw response body
    pub body: String,
}

/// A single colored template field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateField {
    pub value: String,
    pub color: String,
}

/// Payload of a template message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMessage {
    pub touser: String,
    pub template_id: String,
    pub data: BTreeMap<String, TemplateField>,
}

impl TemplateMessage {
    /// Build the two-field event message
    pub fn event(recipient_id: &str, template_id: &str, kind: &str, detail: &str) -> Self {
        let field = |value: &str| TemplateField {
            value: value.to_string(),
            color: FIELD_COLOR.to_string(),
        };

        let mut data = BTreeMap::new();
        data.insert(KIND_FIELD.to_string(), field(kind));
        data.insert(DETAIL_FIELD.to_string(), field(detail));

        Self {
            touser: recipient_id.to_string(),
            template_id: template_id.to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_message_serialization() {
        let message = TemplateMessage::event("o-user", "tpl-1", "Application Error", "2024-12-09");
        let json: serde_json::Value = serde_json::to_value(&message).unwrap();

        assert_eq!(json["touser"], "o-user");
        assert_eq!(json["template_id"], "tpl-1");
        assert_eq!(json["data"]["operatype"]["value"], "Application Error");
        assert_eq!(json["data"]["operatype"]["color"], "#173177");
        assert_eq!(json["data"]["operacnt"]["value"], "2024-12-09");
        assert_eq!(json["data"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_event_message_substitutes_verbatim() {
        let message = TemplateMessage::event("u", "t", "{{kind}}", "a \"quoted\" value");
        assert_eq!(message.data[KIND_FIELD].value, "{{kind}}");
        assert_eq!(message.data[DETAIL_FIELD].value, "a \"quoted\" value");
    }

    #[test]
    fn test_token_grant_defaults_missing_fields() {
        let grant: TokenGrant = serde_json::from_str(r#"{"errcode":40013}"#).unwrap();
        assert_eq!(grant.access_token, "");
        assert_eq!(grant.expires_in, 0);
    }
}
