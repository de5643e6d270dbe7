//! Sequence engine: launch and stage transitions.
//!
//! Every trigger (periodic tick, reply ingestion, admin actions) goes through
//! this engine. Per contact: claim → re-read → decide → render → dispatch →
//! persist contact and log entry together. A failed dispatch leaves the
//! contact untouched so it is retried on the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SequenceConfig;
use crate::contacts::model::{Contact, Sentiment, Stage};
use crate::error::{OutreachError, TransportError};
use crate::outreach_log::model::SendLogEntry;
use crate::sequence::transition::{Action, CONVERTED_STEP, next_action};
use crate::store::Database;
use crate::templates::model::Template;
use crate::templates::render::{RenderedEmail, render_template};
use crate::transport::MailTransport;

/// Poll interval while waiting for another run to release a contact.
const CLAIM_RETRY: Duration = Duration::from_millis(25);

/// Result of handling one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Failed,
    Converted,
    Skipped,
}

/// Counts for one launch or scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub considered: usize,
    pub sent: usize,
    pub failed: usize,
    pub converted: usize,
    pub skipped: usize,
}

impl RunReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Converted => self.converted += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    fn tally(considered: usize, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        let mut report = Self {
            considered,
            ..Self::default()
        };
        for outcome in outcomes {
            report.record(outcome);
        }
        report
    }
}

/// Removes the contact from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

/// The outreach sequence engine.
pub struct SequenceEngine {
    config: SequenceConfig,
    store: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    /// Contacts currently being worked by some run.
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl SequenceEngine {
    pub fn new(
        config: SequenceConfig,
        store: Arc<dyn Database>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn Database> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn MailTransport> {
        &self.transport
    }

    // ── Entry points ────────────────────────────────────────────────

    /// Advance every due contact.
    pub async fn run_due(&self) -> Result<RunReport, OutreachError> {
        self.run_due_at(Utc::now()).await
    }

    /// Advance every contact due at `now`.
    pub async fn run_due_at(&self, now: DateTime<Utc>) -> Result<RunReport, OutreachError> {
        let ids: Vec<Uuid> = self
            .store
            .list_due_contacts(now)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let considered = ids.len();

        let outcomes: Vec<Outcome> = stream::iter(ids)
            .map(|id| async move { self.settle(id, self.advance(id, now, true).await) })
            .buffer_unordered(self.config.max_concurrent_sends.max(1))
            .collect()
            .await;

        let report = RunReport::tally(considered, outcomes);
        tracing::info!(
            considered = report.considered,
            sent = report.sent,
            failed = report.failed,
            converted = report.converted,
            skipped = report.skipped,
            "Sequence run complete"
        );
        Ok(report)
    }

    /// Evaluate one contact immediately, regardless of its due time.
    pub async fn run_for_contact(&self, id: Uuid) -> Result<RunReport, OutreachError> {
        self.run_for_contact_at(id, Utc::now()).await
    }

    pub async fn run_for_contact_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RunReport, OutreachError> {
        let outcome = self.advance(id, now, false).await?;
        Ok(RunReport::tally(1, [outcome]))
    }

    /// Apply `update` to a contact while holding its claim, persist it, then
    /// evaluate the contact immediately.
    ///
    /// Waits for any run currently working the contact so the update is never
    /// overwritten by that run's persist.
    pub async fn update_and_run<F>(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        update: F,
    ) -> Result<RunReport, OutreachError>
    where
        F: FnOnce(&mut Contact) + Send,
    {
        {
            let _guard = self.claim_wait(id).await;
            let mut contact = self
                .store
                .get_contact(id)
                .await?
                .ok_or_else(|| OutreachError::ContactNotFound(id.to_string()))?;
            update(&mut contact);
            self.store.update_contact(&contact).await?;
        }
        self.run_for_contact_at(id, now).await
    }

    /// Opt a contact out once no run is working it. Returns `false` when no
    /// contact has that email.
    pub async fn opt_out(&self, email: &str) -> Result<bool, OutreachError> {
        let Some(contact) = self.store.get_contact_by_email(email).await? else {
            return Ok(false);
        };
        let _guard = self.claim_wait(contact.id).await;
        Ok(self.store.set_opted_out(email).await?)
    }

    /// Send one message through the transport under the configured timeout,
    /// outside any sequence.
    pub async fn send_direct(
        &self,
        recipient: &str,
        email: &RenderedEmail,
    ) -> Result<(), TransportError> {
        self.dispatch(recipient, email).await
    }

    /// Send the Welcome template to every `new`, non-opted-out contact.
    pub async fn launch(&self) -> Result<RunReport, OutreachError> {
        self.launch_at(Utc::now()).await
    }

    pub async fn launch_at(&self, now: DateTime<Utc>) -> Result<RunReport, OutreachError> {
        let welcome = self
            .store
            .get_template_by_order(0)
            .await?
            .ok_or(OutreachError::WelcomeTemplateMissing)?;

        let ids: Vec<Uuid> = self
            .launch_candidates()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let considered = ids.len();
        let welcome = &welcome;

        let outcomes: Vec<Outcome> = stream::iter(ids)
            .map(|id| async move { self.settle(id, self.welcome(id, welcome, now).await) })
            .buffer_unordered(self.config.max_concurrent_sends.max(1))
            .collect()
            .await;

        let report = RunReport::tally(considered, outcomes);
        tracing::info!(
            template = %welcome.name,
            considered = report.considered,
            sent = report.sent,
            failed = report.failed,
            "Outreach launch complete"
        );
        Ok(report)
    }

    /// Contacts a launch would target.
    pub async fn launch_candidates(&self) -> Result<Vec<Contact>, OutreachError> {
        let contacts = self.store.list_contacts_by_stage(Stage::New).await?;
        Ok(contacts.into_iter().filter(|c| !c.opted_out).collect())
    }

    // ── Per-contact work ────────────────────────────────────────────

    /// Claim a contact for this run. `None` if another run holds it.
    fn claim(&self, id: Uuid) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            id,
        })
    }

    async fn claim_wait(&self, id: Uuid) -> InFlightGuard {
        loop {
            if let Some(guard) = self.claim(id) {
                return guard;
            }
            tokio::time::sleep(CLAIM_RETRY).await;
        }
    }

    /// Batch error policy: log, count, keep going.
    fn settle(&self, id: Uuid, result: Result<Outcome, OutreachError>) -> Outcome {
        match result {
            Ok(outcome) => outcome,
            Err(OutreachError::ContactNotFound(_)) => Outcome::Skipped,
            Err(e) => {
                tracing::error!(contact_id = %id, "Contact processing aborted: {e}");
                Outcome::Failed
            }
        }
    }

    async fn advance(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        require_due: bool,
    ) -> Result<Outcome, OutreachError> {
        let Some(_guard) = self.claim(id) else {
            tracing::debug!(contact_id = %id, "Skipped: already in flight");
            return Ok(Outcome::Skipped);
        };

        let contact = self
            .store
            .get_contact(id)
            .await?
            .ok_or_else(|| OutreachError::ContactNotFound(id.to_string()))?;

        if contact.is_terminal() {
            tracing::debug!(contact = %contact.email, stage = %contact.stage, "Skipped: terminal");
            return Ok(Outcome::Skipped);
        }
        if require_due && !contact.is_due(now) {
            // Another trigger advanced it after selection.
            return Ok(Outcome::Skipped);
        }

        match next_action(contact.stage, contact.replied, contact.sentiment) {
            Action::Hold => Ok(Outcome::Skipped),
            Action::Convert => self.convert(contact, now).await,
            Action::Send {
                template,
                stage,
                step,
            } => {
                let Some(template) = self.store.get_template_by_name(template).await? else {
                    tracing::warn!(
                        contact = %contact.email,
                        template,
                        "Template not found, skipping contact"
                    );
                    return Ok(Outcome::Skipped);
                };
                self.deliver(contact, &template, stage, step, now).await
            }
        }
    }

    async fn welcome(
        &self,
        id: Uuid,
        template: &Template,
        now: DateTime<Utc>,
    ) -> Result<Outcome, OutreachError> {
        let Some(_guard) = self.claim(id) else {
            return Ok(Outcome::Skipped);
        };

        let contact = self
            .store
            .get_contact(id)
            .await?
            .ok_or_else(|| OutreachError::ContactNotFound(id.to_string()))?;
        if contact.stage != Stage::New || contact.opted_out {
            return Ok(Outcome::Skipped);
        }

        self.deliver(contact, template, Stage::Contacted, 0, now).await
    }

    async fn convert(
        &self,
        mut contact: Contact,
        now: DateTime<Utc>,
    ) -> Result<Outcome, OutreachError> {
        let from = contact.stage;
        contact.stage = Stage::Converted;
        contact.sequence_step = CONVERTED_STEP;
        contact.replied = false;
        contact.sentiment = Sentiment::Neutral;
        contact.next_follow_up_at = None;
        contact.updated_at = now;
        self.store.update_contact(&contact).await?;

        tracing::info!(contact = %contact.email, from = %from, "Contact converted");
        Ok(Outcome::Converted)
    }

    async fn deliver(
        &self,
        mut contact: Contact,
        template: &Template,
        stage: Stage,
        step: u8,
        now: DateTime<Utc>,
    ) -> Result<Outcome, OutreachError> {
        let email = render_template(template, &HashMap::from([("name", contact.name.as_str())]));

        if let Err(e) = self.dispatch(&contact.email, &email).await {
            tracing::error!(
                contact = %contact.email,
                template = %template.name,
                transport = self.transport.name(),
                "Send failed: {e}"
            );
            let entry = SendLogEntry::failed(contact.id, Some(template.id), e.to_string(), now);
            self.store.append_log(&entry).await?;
            return Ok(Outcome::Failed);
        }

        let from = contact.stage;
        contact.stage = stage;
        contact.sequence_step = step;
        contact.last_sent_at = Some(now);
        contact.replied = false;
        contact.sentiment = Sentiment::Neutral;
        contact.next_follow_up_at = Some(now + template.delay_or(self.config.default_delay_days));
        contact.updated_at = now;

        let entry = SendLogEntry::sent(contact.id, template.id, now);
        self.store.record_send(&contact, &entry).await?;

        tracing::info!(
            contact = %contact.email,
            template = %template.name,
            from = %from,
            to = %stage,
            "Email sent"
        );
        Ok(Outcome::Sent)
    }

    async fn dispatch(&self, recipient: &str, email: &RenderedEmail) -> Result<(), TransportError> {
        let limit = self.config.send_timeout;
        match tokio::time::timeout(
            limit,
            self.transport.send(recipient, &email.subject, &email.html_body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }
}

/// Spawn the periodic scheduler tick.
pub fn spawn_ticker(engine: Arc<SequenceEngine>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = engine.run_due().await {
                tracing::error!("Scheduled sequence run failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outreach_log::model::SendStatus;
    use crate::store::LibSqlBackend;
    use crate::templates::model::{CONVERSION, RE_ENGAGEMENT, WELCOME, default_templates};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    // ── Stub transports ─────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingTransport {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl MailTransport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
            Err(TransportError::Rejected {
                transport: "failing".into(),
                reason: "550 mailbox unavailable".into(),
            })
        }
    }

    struct StallingTransport;

    #[async_trait]
    impl MailTransport for StallingTransport {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn seeded_store() -> Arc<LibSqlBackend> {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for template in default_templates() {
            db.insert_template(&template).await.unwrap();
        }
        db
    }

    fn engine(store: Arc<LibSqlBackend>, transport: Arc<dyn MailTransport>) -> SequenceEngine {
        let config = SequenceConfig {
            send_timeout: Duration::from_millis(200),
            ..SequenceConfig::default()
        };
        SequenceEngine::new(config, store, transport)
    }

    async fn insert(store: &LibSqlBackend, contact: &Contact) {
        assert!(store.insert_contact_if_absent(contact).await.unwrap());
    }

    async fn reload(store: &LibSqlBackend, contact: &Contact) -> Contact {
        store.get_contact(contact.id).await.unwrap().unwrap()
    }

    fn near(actual: Option<DateTime<Utc>>, expected: DateTime<Utc>) -> bool {
        actual.is_some_and(|a| (a - expected).num_seconds().abs() < 1)
    }

    async fn template_id(store: &LibSqlBackend, name: &str) -> Uuid {
        store.get_template_by_name(name).await.unwrap().unwrap().id
    }

    // ── Launch ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn launch_sends_welcome_and_schedules_follow_up() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let ada = Contact::new("Ada", "ada@example.com");
        insert(&store, &ada).await;

        let now = Utc::now();
        let report = engine.launch_at(now).await.unwrap();
        assert_eq!(report.considered, 1);
        assert_eq!(report.sent, 1);

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");
        assert_eq!(sent[0].1, "Quick question for you, Ada");
        assert!(sent[0].2.contains("Hi Ada,"));

        let ada = reload(&store, &ada).await;
        assert_eq!(ada.stage, Stage::Contacted);
        assert_eq!(ada.sequence_step, 0);
        assert!(near(ada.last_sent_at, now));
        assert!(near(ada.next_follow_up_at, now + ChronoDuration::days(2)));

        let log = store.list_log_for_contact(ada.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, SendStatus::Sent);
        assert_eq!(log[0].template_id, Some(template_id(&store, WELCOME).await));
    }

    #[tokio::test]
    async fn launch_without_welcome_template_fails() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());
        insert(&store, &Contact::new("Ada", "ada@example.com")).await;

        let err = engine.launch().await.unwrap_err();
        assert!(matches!(err, OutreachError::WelcomeTemplateMissing));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn launch_skips_opted_out_and_already_contacted() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        insert(&store, &Contact::new("Gone", "gone@example.com").opted_out()).await;
        insert(
            &store,
            &Contact::new("Old", "old@example.com").with_stage(Stage::Contacted),
        )
        .await;
        insert(&store, &Contact::new("Fresh", "fresh@example.com")).await;

        let report = engine.launch().await.unwrap();
        assert_eq!(report.considered, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(transport.sent.lock().unwrap()[0].0, "fresh@example.com");
    }

    #[tokio::test]
    async fn launch_failure_leaves_contact_new() {
        let store = seeded_store().await;
        let engine = engine(Arc::clone(&store), Arc::new(FailingTransport));
        let ada = Contact::new("Ada", "ada@example.com");
        insert(&store, &ada).await;

        let report = engine.launch().await.unwrap();
        assert_eq!(report.failed, 1);

        let reloaded = reload(&store, &ada).await;
        assert_eq!(reloaded.stage, Stage::New);
        assert!(reloaded.last_sent_at.is_none());

        let log = store.list_log_for_contact(ada.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, SendStatus::Failed);
        assert_eq!(log[0].template_id, Some(template_id(&store, WELCOME).await));
        assert!(log[0].error.as_deref().unwrap().contains("550"));
    }

    // ── Scheduler ───────────────────────────────────────────────────

    #[tokio::test]
    async fn contacted_without_reply_moves_to_re_engaged() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(now - ChronoDuration::hours(1));
        insert(&store, &ada).await;

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.sent, 1);

        let ada = reload(&store, &ada).await;
        assert_eq!(ada.stage, Stage::ReEngaged);
        assert_eq!(ada.sequence_step, 1);
        assert!(!ada.replied);
        assert_eq!(ada.sentiment, Sentiment::Neutral);
        assert!(near(ada.next_follow_up_at, now + ChronoDuration::days(3)));

        let log = store.list_log_for_contact(ada.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].template_id, Some(template_id(&store, RE_ENGAGEMENT).await));
    }

    #[tokio::test]
    async fn back_to_back_runs_send_once() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(now - ChronoDuration::minutes(5));
        insert(&store, &ada).await;

        engine.run_due_at(now).await.unwrap();
        let second = engine.run_due_at(now).await.unwrap();
        assert_eq!(second.considered, 0);
        assert_eq!(transport.count(), 1);
        assert_eq!(store.list_log_for_contact(ada.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_keeps_contact_due() {
        let store = seeded_store().await;
        let now = Utc::now();
        let due_at = now - ChronoDuration::hours(2);
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(due_at);
        insert(&store, &ada).await;

        let failing = engine(Arc::clone(&store), Arc::new(FailingTransport));
        let report = failing.run_due_at(now).await.unwrap();
        assert_eq!(report.failed, 1);

        let after = reload(&store, &ada).await;
        assert_eq!(after.stage, Stage::Contacted);
        assert_eq!(after.sequence_step, 0);
        assert!(near(after.next_follow_up_at, due_at));
        assert!(after.is_due(now));

        let log = store.list_log_for_contact(ada.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, SendStatus::Failed);
        assert!(log[0].error.is_some());

        // Next tick with a healthy transport picks it up again.
        let transport = Arc::new(RecordingTransport::default());
        let healthy = engine(Arc::clone(&store), transport.clone());
        let report = healthy.run_due_at(now).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(reload(&store, &ada).await.stage, Stage::ReEngaged);
    }

    #[tokio::test]
    async fn timed_out_send_is_a_failure() {
        let store = seeded_store().await;
        let engine = engine(Arc::clone(&store), Arc::new(StallingTransport));
        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::ReEngaged)
            .with_next_follow_up(now - ChronoDuration::hours(1));
        insert(&store, &ada).await;

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(reload(&store, &ada).await.stage, Stage::ReEngaged);

        let log = store.list_log_for_contact(ada.id).await.unwrap();
        assert!(log[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn interested_positive_reply_converts_without_sending() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Interested)
            .with_reply(Sentiment::Positive)
            .with_next_follow_up(now);
        insert(&store, &ada).await;

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.converted, 1);
        assert_eq!(transport.count(), 0);

        let ada = reload(&store, &ada).await;
        assert_eq!(ada.stage, Stage::Converted);
        assert_eq!(ada.sequence_step, CONVERTED_STEP);
        assert!(!ada.replied);
        assert!(store.list_log_for_contact(ada.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn positive_reply_from_contacted_sends_conversion() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_reply(Sentiment::Positive);
        insert(&store, &ada).await;

        let report = engine.run_for_contact(ada.id).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(transport.sent.lock().unwrap()[0].1, "Exclusive strategy for Ada");

        let ada = reload(&store, &ada).await;
        assert_eq!(ada.stage, Stage::Interested);
        assert_eq!(ada.sequence_step, 1);
        let log = store.list_log_for_contact(ada.id).await.unwrap();
        assert_eq!(log[0].template_id, Some(template_id(&store, CONVERSION).await));
    }

    #[tokio::test]
    async fn terminal_contacts_are_never_touched() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let past = now - ChronoDuration::days(10);
        let converted = Contact::new("Won", "won@example.com")
            .with_stage(Stage::Converted)
            .with_reply(Sentiment::Positive)
            .with_next_follow_up(past);
        let opted = Contact::new("Gone", "gone@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(past)
            .opted_out();
        insert(&store, &converted).await;
        insert(&store, &opted).await;

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.considered, 0);

        for contact in [&converted, &opted] {
            let report = engine.run_for_contact_at(contact.id, now).await.unwrap();
            assert_eq!(report.skipped, 1);
            let reloaded = reload(&store, contact).await;
            assert_eq!(reloaded.stage, contact.stage);
            assert!(store.list_log_for_contact(contact.id).await.unwrap().is_empty());
        }
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn missing_template_skips_without_log() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .insert_template(&Template::new(WELCOME, "s", "b", 0))
            .await
            .unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(now - ChronoDuration::hours(1));
        insert(&store, &ada).await;

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(transport.count(), 0);
        assert_eq!(reload(&store, &ada).await.stage, Stage::Contacted);
        assert!(store.list_log_for_contact(ada.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_contact_bypasses_due_filter() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Contacted)
            .with_next_follow_up(now + ChronoDuration::days(2));
        insert(&store, &ada).await;

        assert_eq!(engine.run_due_at(now).await.unwrap().considered, 0);
        let report = engine.run_for_contact_at(ada.id, now).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(reload(&store, &ada).await.stage, Stage::ReEngaged);
    }

    #[tokio::test]
    async fn unknown_contact_is_an_error() {
        let store = seeded_store().await;
        let engine = engine(store, Arc::new(RecordingTransport::default()));
        let err = engine.run_for_contact(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OutreachError::ContactNotFound(_)));
    }

    #[tokio::test]
    async fn in_flight_contact_is_skipped() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let ada = Contact::new("Ada", "ada@example.com").with_stage(Stage::Contacted);
        insert(&store, &ada).await;

        let guard = engine.claim(ada.id).expect("first claim succeeds");
        let report = engine.run_for_contact(ada.id).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(transport.count(), 0);

        drop(guard);
        let report = engine.run_for_contact(ada.id).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn update_waits_for_in_flight_claim() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = Arc::new(engine(Arc::clone(&store), transport.clone()));

        let ada = Contact::new("Ada", "ada@example.com").with_stage(Stage::Contacted);
        insert(&store, &ada).await;

        let guard = engine.claim(ada.id).expect("first claim succeeds");
        let task = {
            let engine = Arc::clone(&engine);
            let id = ada.id;
            tokio::spawn(async move {
                let now = Utc::now();
                engine
                    .update_and_run(id, now, move |c| c.mark_replied(Sentiment::Positive, now))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        assert_eq!(transport.count(), 0);

        drop(guard);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(reload(&store, &ada).await.stage, Stage::Interested);
    }

    #[tokio::test]
    async fn batch_processes_every_due_contact() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        for i in 0..20 {
            let contact = Contact::new(format!("C{i}"), &format!("c{i}@example.com"))
                .with_stage(Stage::Contacted)
                .with_next_follow_up(now - ChronoDuration::minutes(i));
            insert(&store, &contact).await;
        }

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.considered, 20);
        assert_eq!(report.sent, 20);
        assert_eq!(transport.count(), 20);

        let counts = store.count_contacts_by_stage().await.unwrap();
        assert_eq!(counts.re_engaged, 20);
    }

    #[tokio::test]
    async fn lto_without_reply_holds() {
        let store = seeded_store().await;
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(Arc::clone(&store), transport.clone());

        let now = Utc::now();
        let ada = Contact::new("Ada", "ada@example.com")
            .with_stage(Stage::Lto)
            .with_next_follow_up(now - ChronoDuration::hours(1));
        insert(&store, &ada).await;

        let report = engine.run_due_at(now).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(transport.count(), 0);
        assert_eq!(reload(&store, &ada).await.stage, Stage::Lto);
    }
}
