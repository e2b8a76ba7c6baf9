use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{EmailMessage, EmailTemplate, Notifier};

/// In-process outbox that keeps every queued message. Nothing is delivered.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    messages: RwLock<Vec<EmailMessage>>,
}

impl MemoryOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<EmailMessage> {
        self.messages.read().await.clone()
    }

    /// Number of queued messages rendered with `template`.
    pub async fn count(&self, template: EmailTemplate) -> usize {
        self.messages
            .read()
            .await
            .iter()
            .filter(|message| message.template == template)
            .count()
    }

    /// String parameter `key` of the most recent `template` message.
    pub async fn last_param(&self, template: EmailTemplate, key: &str) -> Option<String> {
        self.messages
            .read()
            .await
            .iter()
            .rev()
            .find(|message| message.template == template)
            .and_then(|message| message.params.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[async_trait]
impl Notifier for MemoryOutbox {
    async fn enqueue(&self, message: EmailMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn keeps_messages_in_order() -> Result<()> {
        let outbox = MemoryOutbox::new();
        outbox
            .enqueue(EmailMessage::new("a@x.com", EmailTemplate::VerifyEmail, json!({"otp": "111111"})))
            .await?;
        outbox
            .enqueue(EmailMessage::new("a@x.com", EmailTemplate::VerifyEmail, json!({"otp": "222222"})))
            .await?;
        outbox
            .enqueue(EmailMessage::new("a@x.com", EmailTemplate::Welcome, json!({"name": "A"})))
            .await?;

        assert_eq!(outbox.messages().await.len(), 3);
        assert_eq!(outbox.count(EmailTemplate::VerifyEmail).await, 2);
        assert_eq!(
            outbox.last_param(EmailTemplate::VerifyEmail, "otp").await.as_deref(),
            Some("222222")
        );
        assert_eq!(outbox.last_param(EmailTemplate::PasswordReset, "url").await, None);
        Ok(())
    }
}
