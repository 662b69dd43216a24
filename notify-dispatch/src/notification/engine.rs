//! Dispatch engine.
//!
//! For every configured rule of an event's code whose threshold the event
//! crosses, the engine resolves recipients, attaches the generated document,
//! composes the message, runs the extension hooks, hands the mail to the
//! transport and records one delivery per recipient.
//!
//! Failures are local: a failing step only affects the rule (or the
//! recipient) it happened for, and is reported in the [`DispatchResult`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};

use super::attachment::{Attachment, AttachmentResolver, ArtifactLayout, ArtifactStore, FsArtifactStore};
use super::channels::{NotificationChannel, OutgoingMail};
use super::composer::{MessageComposer, object_link};
use super::events::{NotificationCodeInfo, NotificationEvent, find_code, supported_codes};
use super::hooks::{FORMAT_MESSAGE_HOOK, HookBus, HookParameters};
use super::recipient::{NoSupervisor, Recipient, RecipientResolver, SupervisorLookup, validate_recipients};
use super::rules::{RuleEntry, RuleSet, ThresholdRule};
use crate::config::EngineConfig;
use crate::database::models::DeliveryRecord;
use crate::database::repositories::DeliveryRepository;
use crate::error::ErrorKind;
use crate::i18n::{I18nTranslator, Translator};
use crate::{Error, Result};

/// A failure attributed to one rule, or to one recipient of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFailure {
    /// Configuration key of the rule.
    pub rule_key: String,
    /// Recipient the failure applies to, `None` when the rule failed before
    /// its recipients were known.
    pub recipient: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Recipients the notification was sent to and recorded for.
    pub succeeded: u64,
    /// Failed recipients, plus rules that failed before reaching a recipient.
    pub failed: u64,
    /// Matching rules that had nobody to notify or were vetoed by a hook.
    pub skipped: u64,
    pub failures: Vec<RuleFailure>,
}

impl DispatchResult {
    /// Single-integer form: the negated failure count if anything failed,
    /// the success count otherwise.
    pub fn legacy_code(&self) -> i64 {
        if self.failed > 0 {
            -(self.failed as i64)
        } else {
            self.succeeded as i64
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn merge(&mut self, other: DispatchResult) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    fn fail(&mut self, rule: &str, recipient: Option<&Recipient>, error: &Error) {
        self.failed += 1;
        self.failures.push(RuleFailure {
            rule_key: rule.to_string(),
            recipient: recipient.map(|r| r.as_str().to_string()),
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub dispatches: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    dispatches: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl StatsCounters {
    fn add(&self, result: &DispatchResult) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.sent.fetch_add(result.succeeded, Ordering::Relaxed);
        self.failed.fetch_add(result.failed, Ordering::Relaxed);
        self.skipped.fetch_add(result.skipped, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Per-event values shared by every rule.
struct EventContext<'a> {
    event: &'a NotificationEvent,
    target: &'a NotificationCodeInfo,
    link: String,
    notice: String,
    candidates: &'a [Attachment],
}

/// The notification dispatch engine.
pub struct DispatchEngine {
    rules: RwLock<Arc<RuleSet>>,
    codes: Vec<NotificationCodeInfo>,
    recipients: RecipientResolver,
    attachments: AttachmentResolver,
    composer: MessageComposer,
    hooks: HookBus,
    channel: Arc<dyn NotificationChannel>,
    deliveries: Arc<dyn DeliveryRepository>,
    web_root: String,
    reply_to: String,
    send_timeout: Duration,
    concurrent_rules: bool,
    stats: StatsCounters,
}

impl DispatchEngine {
    pub fn builder(config: EngineConfig) -> DispatchEngineBuilder {
        DispatchEngineBuilder::new(config)
    }

    /// Current rule snapshot.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    /// Swap the rule snapshot. Dispatches already running keep the snapshot
    /// they started with.
    pub fn replace_rules(&self, rules: RuleSet) {
        info!(rules = rules.len(), "Replacing threshold rules");
        *self.rules.write() = Arc::new(rules);
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Dispatch `event`.
    ///
    /// `candidates` are attachments supplied by the caller; they precede the
    /// generated document, when one exists. Never fails as a whole: every
    /// failure is counted and described in the result.
    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
        candidates: Vec<Attachment>,
    ) -> DispatchResult {
        let span = info_span!("dispatch", code = %event.code, object_id = event.object.id);
        let result = self.dispatch_inner(event, &candidates).instrument(span).await;
        self.stats.add(&result);
        result
    }

    /// [`dispatch`](Self::dispatch), reduced to
    /// [`DispatchResult::legacy_code`].
    pub async fn dispatch_legacy(
        &self,
        event: &NotificationEvent,
        candidates: Vec<Attachment>,
    ) -> i64 {
        self.dispatch(event, candidates).await.legacy_code()
    }

    async fn dispatch_inner(
        &self,
        event: &NotificationEvent,
        candidates: &[Attachment],
    ) -> DispatchResult {
        let Some(target) = find_code(&self.codes, &event.code) else {
            debug!("Code is not supported, nothing to notify");
            return DispatchResult::default();
        };

        let rules = self.rules();
        let mut result = DispatchResult::default();
        let mut matched: Vec<&ThresholdRule> = Vec::new();

        for entry in rules.for_code(&event.code) {
            match entry {
                RuleEntry::Valid(rule) if rule.matches(event) => matched.push(rule),
                RuleEntry::Valid(rule) => {
                    debug!(
                        rule = %rule.key,
                        threshold = rule.threshold,
                        total = ?event.object.total,
                        "Threshold not reached"
                    );
                }
                // Without an amount no threshold can be evaluated, so a
                // broken key is not reported either.
                RuleEntry::Malformed { key, .. } if event.object.threshold_amount().is_none() => {
                    debug!(rule = %key, "No amount, malformed rule not evaluated");
                }
                RuleEntry::Malformed { key, reason, .. } => {
                    let error = Error::config(reason.clone());
                    warn!(rule = %key, error = %error, "Skipping malformed rule");
                    result.fail(key, None, &error);
                }
            }
        }

        if matched.is_empty() {
            return result;
        }

        let ctx = EventContext {
            event,
            target,
            link: object_link(&self.web_root, event, target),
            notice: self.composer.boilerplate_notice(),
            candidates,
        };

        if self.concurrent_rules {
            let outcomes = join_all(matched.iter().map(|rule| self.run_rule(&ctx, rule))).await;
            for outcome in outcomes {
                result.merge(outcome);
            }
        } else {
            for rule in matched {
                result.merge(self.run_rule(&ctx, rule).await);
            }
        }

        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            "Dispatch finished"
        );
        result
    }

    async fn run_rule(&self, ctx: &EventContext<'_>, rule: &ThresholdRule) -> DispatchResult {
        let mut result = DispatchResult::default();

        let Some(rule_id) = rule.rule_id else {
            let error = Error::config(format!("no action trigger registered for '{}'", rule.code));
            warn!(rule = %rule.key, error = %error, "Rule cannot be recorded");
            result.fail(&rule.key, None, &error);
            return result;
        };

        let recipients = match self
            .recipients
            .resolve(&rule.recipient_expression, ctx.event.actor_id)
            .await
        {
            Ok(recipients) => recipients,
            Err(error) => {
                warn!(rule = %rule.key, error = %error, "Failed to resolve recipients");
                result.fail(&rule.key, None, &error);
                return result;
            }
        };

        if recipients.is_empty() {
            debug!(rule = %rule.key, "Rule has no recipient, skipping");
            result.skipped += 1;
            return result;
        }

        let mut attachments = ctx.candidates.to_vec();
        if let Some(document) = self.attachments.resolve(ctx.event, ctx.target).await {
            attachments.push(document);
        }

        let message = self
            .composer
            .compose(ctx.event, ctx.target, &ctx.link, &ctx.notice, attachments);

        let params = HookParameters {
            code: &rule.code,
            recipients: &recipients,
            reply_to: &self.reply_to,
            attachments: &message.attachments,
        };
        let outcome = match self.hooks.run(FORMAT_MESSAGE_HOOK, &params, ctx.event).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(rule = %rule.key, error = %error, "Notification hook failed");
                result.fail(&rule.key, None, &error);
                return result;
            }
        };

        if outcome.vetoed {
            result.skipped += 1;
            return result;
        }

        let recipients = match outcome.recipients {
            Some(replacement) => match validate_recipients(&replacement) {
                Ok(recipients) => recipients,
                Err(error) => {
                    warn!(rule = %rule.key, error = %error, "Hook returned invalid recipients");
                    result.fail(&rule.key, None, &error);
                    return result;
                }
            },
            None => recipients,
        };

        let mut subject = message.subject;
        subject.push_str(outcome.subject_append.as_deref().unwrap_or_default());
        let mut body = message.body;
        body.push_str(outcome.message_append.as_deref().unwrap_or_default());

        let mail = OutgoingMail {
            subject,
            to: recipients,
            reply_to: self.reply_to.clone(),
            body,
            attachments: message.attachments,
        };

        if let Err(error) = self.send(&mail).await {
            warn!(rule = %rule.key, to = %mail.to_header(), error = %error, "Failed to send notification");
            for recipient in &mail.to {
                result.fail(&rule.key, Some(recipient), &error);
            }
            return result;
        }

        info!(
            rule = %rule.key,
            to = %mail.to_header(),
            attachments = mail.attachments.len(),
            "Notification sent"
        );

        for recipient in &mail.to {
            let record = DeliveryRecord::new(
                rule_id,
                ctx.event.object.company(),
                ctx.target.object_type,
                ctx.event.object.id,
                recipient.as_str(),
            );
            match self.deliveries.record(&record).await {
                Ok(()) => result.succeeded += 1,
                Err(error) => {
                    warn!(rule = %rule.key, recipient = %recipient, error = %error, "Failed to record delivery");
                    result.fail(&rule.key, Some(recipient), &error);
                }
            }
        }

        result
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        match tokio::time::timeout(self.send_timeout, self.channel.send(mail)).await {
            Ok(sent) => sent.map_err(|e| match e {
                Error::Transport(_) => e,
                other => Error::transport(other.to_string()),
            }),
            Err(_) => Err(Error::transport(format!(
                "{} send timed out after {:?}",
                self.channel.channel_type(),
                self.send_timeout
            ))),
        }
    }
}

/// Builder for [`DispatchEngine`].
pub struct DispatchEngineBuilder {
    config: EngineConfig,
    rules: RuleSet,
    codes: Vec<NotificationCodeInfo>,
    supervisors: Arc<dyn SupervisorLookup>,
    artifact_store: Arc<dyn ArtifactStore>,
    translator: Option<Arc<dyn Translator>>,
    hooks: HookBus,
    channel: Option<Arc<dyn NotificationChannel>>,
    deliveries: Option<Arc<dyn DeliveryRepository>>,
}

impl DispatchEngineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            rules: RuleSet::default(),
            codes: supported_codes().to_vec(),
            supervisors: Arc::new(NoSupervisor),
            artifact_store: Arc::new(FsArtifactStore),
            translator: None,
            hooks: HookBus::new(),
            channel: None,
            deliveries: None,
        }
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Replace the catalog of supported codes.
    pub fn codes(mut self, codes: Vec<NotificationCodeInfo>) -> Self {
        self.codes = codes;
        self
    }

    pub fn supervisors(mut self, supervisors: Arc<dyn SupervisorLookup>) -> Self {
        self.supervisors = supervisors;
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = store;
        self
    }

    /// Defaults to the compiled catalogs in the configured locale.
    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn hooks(mut self, hooks: HookBus) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn deliveries(mut self, deliveries: Arc<dyn DeliveryRepository>) -> Self {
        self.deliveries = Some(deliveries);
        self
    }

    pub fn build(self) -> Result<DispatchEngine> {
        self.config.validate()?;

        let channel = self
            .channel
            .ok_or_else(|| Error::config("no notification channel configured"))?;
        let deliveries = self
            .deliveries
            .ok_or_else(|| Error::config("no delivery repository configured"))?;
        if !channel.is_enabled() {
            warn!(channel = channel.channel_type(), "Notification channel is disabled, every send will fail");
        }

        let translator = self
            .translator
            .unwrap_or_else(|| Arc::new(I18nTranslator::new(self.config.locale.clone())));

        Ok(DispatchEngine {
            rules: RwLock::new(Arc::new(self.rules)),
            codes: self.codes,
            recipients: RecipientResolver::new(self.supervisors),
            attachments: AttachmentResolver::new(
                self.artifact_store,
                ArtifactLayout::new(self.config.data_root.clone()),
            ),
            composer: MessageComposer::new(
                translator,
                self.config.application_title.clone(),
                self.config.organization_name(),
            ),
            hooks: self.hooks,
            channel,
            deliveries,
            web_root: self.config.web_root(),
            reply_to: self.config.reply_to.clone(),
            send_timeout: self.config.send_timeout(),
            concurrent_rules: self.config.concurrent_rules,
            stats: StatsCounters::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::i18n::interpolate;
    use crate::notification::events::EventObject;
    use crate::notification::hooks::{HookOutcome, NotificationHook};
    use crate::notification::recipient::Supervisor;
    use crate::notification::rules::{ConfigEntry, DEFAULT_RULE_PREFIX};

    struct StaticTranslator;

    impl Translator for StaticTranslator {
        fn translate(&self, key: &str, args: &[(&str, &str)]) -> String {
            interpolate(&format!("{}:%{{link}}", key), args)
        }
    }

    #[derive(Default)]
    struct TestChannel {
        sent: Mutex<Vec<OutgoingMail>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl NotificationChannel for TestChannel {
        fn channel_type(&self) -> &'static str {
            "test"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn send(&self, mail: &OutgoingMail) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(Error::transport("relay refused"));
            }
            self.sent.lock().push(mail.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryDeliveries {
        records: Mutex<Vec<DeliveryRecord>>,
        fail_for: Option<&'static str>,
    }

    #[async_trait]
    impl DeliveryRepository for MemoryDeliveries {
        async fn record(&self, record: &DeliveryRecord) -> Result<()> {
            if self.fail_for == Some(record.recipient.as_str()) {
                return Err(Error::storage("disk full"));
            }
            self.records.lock().push(record.clone());
            Ok(())
        }

        async fn list_for_object(
            &self,
            event_type: &str,
            object_id: i64,
        ) -> Result<Vec<DeliveryRecord>> {
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|r| r.event_type == event_type && r.object_id == object_id)
                .cloned()
                .collect())
        }

        async fn count_for_rule(&self, rule_id: i64, event_type: &str, object_id: i64) -> Result<i64> {
            Ok(self
                .list_for_object(event_type, object_id)
                .await?
                .iter()
                .filter(|r| r.rule_id == rule_id)
                .count() as i64)
        }
    }

    struct FixedSupervisor;

    #[async_trait]
    impl SupervisorLookup for FixedSupervisor {
        async fn supervisor_of(&self, _actor_id: i64) -> Result<Option<Supervisor>> {
            Ok(Some(Supervisor::new("S", "s@x.com")))
        }
    }

    struct ScriptedHook(HookOutcome);

    #[async_trait]
    impl NotificationHook for ScriptedHook {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(
            &self,
            _hook: &str,
            _params: &HookParameters<'_>,
            _event: &NotificationEvent,
        ) -> Result<HookOutcome> {
            Ok(self.0.clone())
        }
    }

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        let entries = pairs.iter().map(|(k, v)| ConfigEntry::new(*k, *v));
        let ids = HashMap::from([
            ("ORDER_CLOSE".to_string(), 1),
            ("PROPAL_CLOSE_SIGNED_WEB".to_string(), 2),
        ]);
        RuleSet::from_entries(DEFAULT_RULE_PREFIX, entries, &ids).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            organization: "ACME".to_string(),
            base_url: "https://erp.example.com/".to_string(),
            reply_to: "noreply@x.com".to_string(),
            data_root: "/nonexistent".into(),
            ..Default::default()
        }
    }

    struct Harness {
        engine: DispatchEngine,
        channel: Arc<TestChannel>,
        deliveries: Arc<MemoryDeliveries>,
    }

    fn harness_with(
        config: EngineConfig,
        rules: RuleSet,
        channel: TestChannel,
        deliveries: MemoryDeliveries,
        hooks: HookBus,
    ) -> Harness {
        let channel = Arc::new(channel);
        let deliveries = Arc::new(deliveries);
        let engine = DispatchEngine::builder(config)
            .rules(rules)
            .translator(Arc::new(StaticTranslator))
            .supervisors(Arc::new(FixedSupervisor))
            .hooks(hooks)
            .channel(channel.clone())
            .deliveries(deliveries.clone())
            .build()
            .unwrap();
        Harness {
            engine,
            channel,
            deliveries,
        }
    }

    fn harness(rules: RuleSet) -> Harness {
        harness_with(
            config(),
            rules,
            TestChannel::default(),
            MemoryDeliveries::default(),
            HookBus::new(),
        )
    }

    fn order(total: f64) -> NotificationEvent {
        NotificationEvent::new(
            "ORDER_CLOSE",
            EventObject::new(42, "CO1").with_total(total).with_company(9),
        )
        .with_actor(3)
    }

    #[tokio::test]
    async fn test_single_rule_sends_and_records() {
        let h = harness(rules(&[(
            "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_500",
            "a@x.com",
        )]));
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!((result.succeeded, result.failed), (1, 0));
        let sent = h.channel.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[ACME] NotificationTitle:%{link}");
        assert!(sent[0].body.contains(
            "<a href=\"https://erp.example.com/commande/card.php?id=42&amp;entity=1\">CO1</a>"
        ));

        let records = h.deliveries.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule_id, 1);
        assert_eq!(records[0].company_id, Some(9));
        assert_eq!(records[0].event_type, "commande");
        assert_eq!(records[0].recipient, "a@x.com");
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let h = harness(rules(&[(
            "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_500",
            "a@x.com",
        )]));
        let result = h.engine.dispatch(&order(500.0), Vec::new()).await;
        assert_eq!(result, DispatchResult::default());
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_code_is_zero_result() {
        let h = harness(rules(&[(
            "NOTIFICATION_FIXEDEMAIL_BILL_VALIDATE_THRESHOLD_HIGHER_0",
            "a@x.com",
        )]));
        let event = NotificationEvent::new("BILL_VALIDATE", EventObject::new(1, "FA1").with_total(10.0));
        assert_eq!(h.engine.dispatch(&event, Vec::new()).await, DispatchResult::default());
    }

    #[tokio::test]
    async fn test_transport_failure_counts_every_recipient() {
        let h = harness_with(
            config(),
            rules(&[(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_500",
                "a@x.com, b@x.com",
            )]),
            TestChannel {
                fail: true,
                ..Default::default()
            },
            MemoryDeliveries::default(),
            HookBus::new(),
        );
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!((result.succeeded, result.failed), (0, 2));
        assert!(result.failures.iter().all(|f| f.kind == ErrorKind::Transport));
        assert!(h.deliveries.records.lock().is_empty());
        assert_eq!(result.legacy_code(), -2);
    }

    #[tokio::test]
    async fn test_send_timeout_is_transport_failure() {
        let h = harness_with(
            EngineConfig {
                send_timeout_secs: 1,
                ..config()
            },
            rules(&[(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_500",
                "a@x.com",
            )]),
            TestChannel {
                delay: Some(Duration::from_secs(3)),
                ..Default::default()
            },
            MemoryDeliveries::default(),
            HookBus::new(),
        );
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_recording_failure_does_not_undo_send() {
        let h = harness_with(
            config(),
            rules(&[(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_500",
                "a@x.com, b@x.com",
            )]),
            TestChannel::default(),
            MemoryDeliveries {
                fail_for: Some("b@x.com"),
                ..Default::default()
            },
            HookBus::new(),
        );
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!((result.succeeded, result.failed), (1, 1));
        assert_eq!(result.failures[0].recipient.as_deref(), Some("b@x.com"));
        assert_eq!(result.failures[0].kind, ErrorKind::Storage);
        assert_eq!(h.channel.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_recipients_skip_without_blocking_other_rules() {
        let h = harness(rules(&[
            ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100", " , "),
            ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_200", "b@x.com"),
        ]));
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!((result.succeeded, result.failed, result.skipped), (1, 0, 1));
        assert_eq!(h.channel.sent.lock()[0].to_header(), "b@x.com");
    }

    #[tokio::test]
    async fn test_supervisor_placeholder() {
        let h = harness(rules(&[(
            "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100",
            "a@x.com,__SUPERVISOREMAIL__",
        )]));
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!(result.succeeded, 2);
        assert_eq!(h.channel.sent.lock()[0].to_header(), "a@x.com, S <s@x.com>");
    }

    #[tokio::test]
    async fn test_malformed_and_unresolved_rules_fail_locally() {
        let entries = [
            ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_abc", "x@x.com"),
            ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_10", "a@x.com"),
        ]
        .map(|(k, v)| ConfigEntry::new(k, v));
        let no_ids = RuleSet::from_entries(DEFAULT_RULE_PREFIX, entries, &HashMap::new()).unwrap();

        let h = harness(no_ids);
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!((result.succeeded, result.failed), (0, 2));
        assert!(result.failures.iter().all(|f| f.kind == ErrorKind::Configuration));
    }

    #[tokio::test]
    async fn test_malformed_rule_ignored_without_amount() {
        let h = harness(rules(&[(
            "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_abc",
            "x@x.com",
        )]));
        let event = NotificationEvent::new("ORDER_CLOSE", EventObject::new(42, "CO1"));
        let result = h.engine.dispatch(&event, Vec::new()).await;

        assert_eq!(result, DispatchResult::default());
        assert_eq!(result.legacy_code(), 0);
        assert!(h.channel.sent.lock().is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl ArtifactStore for BrokenStore {
        async fn exists(&self, _path: &std::path::Path) -> Result<bool> {
            Err(Error::storage("permission denied"))
        }

        async fn mime_type(&self, _path: &std::path::Path) -> Result<String> {
            Err(Error::storage("permission denied"))
        }
    }

    #[tokio::test]
    async fn test_store_error_sends_without_document() {
        let invoice = NotificationCodeInfo {
            code: "BILL_VALIDATE",
            label: "Invoice validated",
            object_type: "facture",
            card_path: "/compta/facture/card.php",
            artifact_dir: "facture",
            message_key: "EMailTextOrderDelivered",
        };
        let channel = Arc::new(TestChannel::default());
        let deliveries = Arc::new(MemoryDeliveries::default());
        let entries = [(
            "NOTIFICATION_FIXEDEMAIL_BILL_VALIDATE_THRESHOLD_HIGHER_10",
            "a@x.com",
        )]
        .map(|(k, v)| ConfigEntry::new(k, v));
        let ids = HashMap::from([("BILL_VALIDATE".to_string(), 7)]);
        let engine = DispatchEngine::builder(config())
            .rules(RuleSet::from_entries(DEFAULT_RULE_PREFIX, entries, &ids).unwrap())
            .codes(vec![invoice])
            .artifact_store(Arc::new(BrokenStore))
            .translator(Arc::new(StaticTranslator))
            .channel(channel.clone())
            .deliveries(deliveries.clone())
            .build()
            .unwrap();

        let event = NotificationEvent::new(
            "BILL_VALIDATE",
            EventObject::new(8, "(PROV8)").with_new_ref("FA2402-0001").with_total(50.0),
        );
        let extra = Attachment::new("/tmp/terms.pdf", "application/pdf", "terms.pdf");
        let result = engine.dispatch(&event, vec![extra.clone()]).await;

        assert_eq!((result.succeeded, result.failed), (1, 0));
        let sent = channel.sent.lock();
        assert_eq!(sent[0].attachments, vec![extra]);
        assert!(sent[0].body.contains("/compta/facture/card.php?id=8"));
        assert!(sent[0].body.contains(">FA2402-0001</a>"));
        assert_eq!(deliveries.records.lock()[0].event_type, "facture");
    }

    #[tokio::test]
    async fn test_hook_appends_and_veto() {
        let rule = rules(&[(
            "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100",
            "a@x.com",
        )]);

        let mut appending = HookBus::new();
        appending.register(Arc::new(ScriptedHook(HookOutcome {
            subject_append: Some(" (urgent)".to_string()),
            message_append: Some("\n<p>extra</p>".to_string()),
            ..Default::default()
        })));
        let h = harness_with(
            config(),
            rule.clone(),
            TestChannel::default(),
            MemoryDeliveries::default(),
            appending,
        );
        h.engine.dispatch(&order(1000.0), Vec::new()).await;
        let sent = h.channel.sent.lock();
        assert!(sent[0].subject.ends_with(" (urgent)"));
        // Appended text is not run through the line break conversion.
        assert!(sent[0].body.ends_with("\n<p>extra</p>"));
        drop(sent);

        let mut vetoing = HookBus::new();
        vetoing.register(Arc::new(ScriptedHook(HookOutcome::veto())));
        let h = harness_with(
            config(),
            rule,
            TestChannel::default(),
            MemoryDeliveries::default(),
            vetoing,
        );
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;
        assert_eq!((result.succeeded, result.failed, result.skipped), (0, 0, 1));
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_hook_recipients_reject_the_rule() {
        let mut hooks = HookBus::new();
        hooks.register(Arc::new(ScriptedHook(HookOutcome {
            recipients: Some(vec!["a@x.com".to_string(), "a@x.com".to_string()]),
            ..Default::default()
        })));
        let h = harness_with(
            config(),
            rules(&[(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100",
                "a@x.com",
            )]),
            TestChannel::default(),
            MemoryDeliveries::default(),
            hooks,
        );
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;

        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].kind, ErrorKind::Validation);
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_rules_keep_rule_order() {
        let h = harness_with(
            EngineConfig {
                concurrent_rules: true,
                ..config()
            },
            rules(&[
                ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_1", "a@x.com"),
                ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_2", ""),
                ("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_3", "c@x.com"),
            ]),
            TestChannel::default(),
            MemoryDeliveries::default(),
            HookBus::new(),
        );
        let result = h.engine.dispatch(&order(1000.0), Vec::new()).await;
        assert_eq!(result.succeeded, 2);
        assert_eq!(h.deliveries.records.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_candidates_precede_generated_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc_dir = dir.path().join("commande").join("CO1");
        std::fs::create_dir_all(&doc_dir).unwrap();
        std::fs::write(doc_dir.join("CO1.pdf"), b"%PDF").unwrap();

        let h = harness_with(
            EngineConfig {
                data_root: dir.path().to_path_buf(),
                ..config()
            },
            rules(&[(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100",
                "a@x.com",
            )]),
            TestChannel::default(),
            MemoryDeliveries::default(),
            HookBus::new(),
        );
        let extra = Attachment::new("/tmp/terms.pdf", "application/pdf", "terms.pdf");
        h.engine.dispatch(&order(1000.0), vec![extra.clone()]).await;

        let sent = h.channel.sent.lock();
        let names: Vec<&str> = sent[0].attachments.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(names, vec!["terms.pdf", "CO1.pdf"]);
        assert_eq!(sent[0].attachments[0], extra);
    }

    #[tokio::test]
    async fn test_replace_rules_and_stats() {
        let h = harness(RuleSet::default());
        assert_eq!(h.engine.dispatch(&order(1000.0), Vec::new()).await.succeeded, 0);

        h.engine.replace_rules(rules(&[(
            "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100",
            "a@x.com",
        )]));
        assert_eq!(h.engine.dispatch_legacy(&order(1000.0), Vec::new()).await, 1);

        let stats = h.engine.stats();
        assert_eq!(stats.dispatches, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_unset_organization_uses_application_title() {
        let h = harness_with(
            EngineConfig {
                organization: String::new(),
                ..config()
            },
            rules(&[(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_100",
                "a@x.com",
            )]),
            TestChannel::default(),
            MemoryDeliveries::default(),
            HookBus::new(),
        );
        h.engine.dispatch(&order(1000.0), Vec::new()).await;
        assert!(h.channel.sent.lock()[0].subject.starts_with("[notify-dispatch] "));
    }

    #[test]
    fn test_builder_requires_channel() {
        let err = DispatchEngine::builder(config())
            .deliveries(Arc::new(MemoryDeliveries::default()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
