//! Records replies on contacts and re-runs the engine for them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::sentiment::classify;
use crate::contacts::model::{Contact, Sentiment};
use crate::error::ReplyError;
use crate::sequence::{RunReport, SequenceEngine};

/// Entry point for inbound replies and manual reply marking.
pub struct ReplyIngestor {
    engine: Arc<SequenceEngine>,
}

impl ReplyIngestor {
    pub fn new(engine: Arc<SequenceEngine>) -> Self {
        Self { engine }
    }

    /// Record a reply for a contact, make it due now, and evaluate it immediately.
    pub async fn record_reply(
        &self,
        contact_id: Uuid,
        body: &str,
        sentiment: Sentiment,
    ) -> Result<RunReport, ReplyError> {
        let now = Utc::now();
        let body = body.to_string();
        let report = self
            .engine
            .update_and_run(contact_id, now, move |c| c.record_reply(&body, sentiment, now))
            .await?;
        Ok(report)
    }

    /// Match an inbound message to a contact by sender and record it.
    pub async fn ingest_inbound(
        &self,
        sender: &str,
        body: &str,
    ) -> Result<(Sentiment, RunReport), ReplyError> {
        let contact = self.find(sender).await?;
        let sentiment = classify(body);
        info!(contact = %contact.email, %sentiment, "Reply received");

        let report = self.record_reply(contact.id, body, sentiment).await?;
        Ok((sentiment, report))
    }

    /// Flag a contact as replied without a message body.
    pub async fn mark_replied(
        &self,
        email: &str,
        sentiment: Sentiment,
    ) -> Result<RunReport, ReplyError> {
        let contact = self.find(email).await?;
        info!(contact = %contact.email, %sentiment, "Reply marked manually");

        let now = Utc::now();
        let report = self
            .engine
            .update_and_run(contact.id, now, move |c| c.mark_replied(sentiment, now))
            .await?;
        Ok(report)
    }

    /// Opt a contact out. Returns `false` when no contact has that email.
    pub async fn opt_out(&self, email: &str) -> Result<bool, ReplyError> {
        let updated = self.engine.opt_out(email).await?;
        if updated {
            info!(contact = %email, "Contact opted out");
        } else {
            debug!(contact = %email, "Opt-out for unknown contact");
        }
        Ok(updated)
    }

    async fn find(&self, email: &str) -> Result<Contact, ReplyError> {
        self.engine
            .store()
            .get_contact_by_email(email)
            .await?
            .ok_or_else(|| ReplyError::UnknownSender(email.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::SequenceConfig;
    use crate::contacts::model::Stage;
    use crate::error::{OutreachError, TransportError};
    use crate::store::{Database, LibSqlBackend};
    use crate::templates::model::default_templates;
    use crate::transport::MailTransport;

    #[derive(Default)]
    struct RecordingTransport {
        subjects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, _: &str, subject: &str, _: &str) -> Result<(), TransportError> {
            self.subjects.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    async fn setup() -> (Arc<LibSqlBackend>, Arc<RecordingTransport>, ReplyIngestor) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for template in default_templates() {
            store.insert_template(&template).await.unwrap();
        }
        let transport = Arc::new(RecordingTransport::default());
        let engine = Arc::new(SequenceEngine::new(
            SequenceConfig::default(),
            store.clone(),
            transport.clone(),
        ));
        (store, transport, ReplyIngestor::new(engine))
    }

    async fn contacted(store: &LibSqlBackend, email: &str) -> Contact {
        let contact = Contact::new("Ada", email)
            .with_stage(Stage::Contacted)
            .with_next_follow_up(Utc::now() + chrono::Duration::days(2));
        store.insert_contact_if_absent(&contact).await.unwrap();
        contact
    }

    #[tokio::test]
    async fn positive_inbound_reply_sends_conversion() {
        let (store, transport, ingestor) = setup().await;
        let ada = contacted(&store, "ada@example.com").await;

        let (sentiment, report) = ingestor
            .ingest_inbound("ADA@example.com", "Yes, let's chat next week.")
            .await
            .unwrap();
        assert_eq!(sentiment, Sentiment::Positive);
        assert_eq!(report.sent, 1);
        assert_eq!(transport.subjects.lock().unwrap()[0], "Exclusive strategy for Ada");

        let ada = store.get_contact(ada.id).await.unwrap().unwrap();
        assert_eq!(ada.stage, Stage::Interested);
        // Reply flag consumed, history kept.
        assert!(!ada.replied);
        assert_eq!(ada.reply_history.len(), 1);
        assert_eq!(ada.last_reply_snippet.as_deref(), Some("Yes, let's chat next week."));
    }

    #[tokio::test]
    async fn negative_inbound_reply_follows_no_reply_path() {
        let (store, transport, ingestor) = setup().await;
        let ada = contacted(&store, "ada@example.com").await;

        let (sentiment, report) = ingestor
            .ingest_inbound("ada@example.com", "Not interested. Please remove me.")
            .await
            .unwrap();
        assert_eq!(sentiment, Sentiment::Negative);
        assert_eq!(report.sent, 1);
        assert_eq!(
            transport.subjects.lock().unwrap()[0],
            "Did you see my last email, Ada?"
        );
        let ada = store.get_contact(ada.id).await.unwrap().unwrap();
        assert_eq!(ada.stage, Stage::ReEngaged);
    }

    #[tokio::test]
    async fn unknown_sender_is_rejected() {
        let (_store, transport, ingestor) = setup().await;
        let err = ingestor
            .ingest_inbound("stranger@example.com", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ReplyError::UnknownSender(_)));
        assert!(transport.subjects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_reply_for_missing_contact() {
        let (_store, _transport, ingestor) = setup().await;
        let err = ingestor
            .record_reply(Uuid::new_v4(), "hi", Sentiment::Positive)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReplyError::Outreach(OutreachError::ContactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reply_from_opted_out_contact_is_recorded_but_not_acted_on() {
        let (store, transport, ingestor) = setup().await;
        let ada = contacted(&store, "ada@example.com").await;
        assert!(ingestor.opt_out("ada@example.com").await.unwrap());

        let (_, report) = ingestor
            .ingest_inbound("ada@example.com", "Actually, tell me more")
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(transport.subjects.lock().unwrap().is_empty());

        let ada = store.get_contact(ada.id).await.unwrap().unwrap();
        assert!(ada.opted_out);
        assert_eq!(ada.stage, Stage::Contacted);
        assert_eq!(ada.reply_history.len(), 1);
    }

    #[tokio::test]
    async fn manual_positive_mark_converts_interested_contact() {
        let (store, transport, ingestor) = setup().await;
        let ada = Contact::new("Ada", "ada@example.com").with_stage(Stage::Interested);
        store.insert_contact_if_absent(&ada).await.unwrap();

        let report = ingestor
            .mark_replied("ada@example.com", Sentiment::Positive)
            .await
            .unwrap();
        assert_eq!(report.converted, 1);
        assert!(transport.subjects.lock().unwrap().is_empty());

        let ada = store.get_contact(ada.id).await.unwrap().unwrap();
        assert_eq!(ada.stage, Stage::Converted);
        assert!(ada.reply_history.is_empty());
    }

    struct SlowTransport;

    #[async_trait]
    impl MailTransport for SlowTransport {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn opt_out_during_send_survives_the_send() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for template in default_templates() {
            store.insert_template(&template).await.unwrap();
        }
        let engine = Arc::new(SequenceEngine::new(
            SequenceConfig::default(),
            store.clone(),
            Arc::new(SlowTransport),
        ));
        let ingestor = ReplyIngestor::new(Arc::clone(&engine));

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(now - chrono::Duration::hours(1));
        store.insert_contact_if_absent(&ada).await.unwrap();

        let run = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_due_at(now).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(ingestor.opt_out("ada@example.com").await.unwrap());
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.sent, 1);

        let ada = store.get_contact(ada.id).await.unwrap().unwrap();
        assert!(ada.opted_out);
        assert_eq!(ada.stage, Stage::ReEngaged);
        assert!(store.list_due_contacts(now + chrono::Duration::days(30)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn opt_out_unknown_email() {
        let (_store, _transport, ingestor) = setup().await;
        assert!(!ingestor.opt_out("nobody@example.com").await.unwrap());
    }
}
