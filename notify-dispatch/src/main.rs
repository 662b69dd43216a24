use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use notify_dispatch::config::EngineConfig;
use notify_dispatch::database::{
    self,
    repositories::{
        SqlxActionTriggerRepository, SqlxConfigRepository, SqlxDeliveryRepository,
        SqlxUserRepository,
    },
};
use notify_dispatch::logging::{self, LoggingOptions};
use notify_dispatch::notification::{
    Attachment, ConfigEntry, DispatchEngine, NotificationEvent, RuleSet,
};

/// Event file accepted on the command line: an event plus optional
/// caller-supplied attachments.
#[derive(Debug, Deserialize)]
struct EventFile {
    #[serde(flatten)]
    event: NotificationEvent,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_guard = logging::init_logging(&LoggingOptions {
        filter: std::env::var("NOTIFY_LOG_FILTER").ok(),
        log_dir: std::env::var("NOTIFY_LOG_DIR").ok().map(PathBuf::from),
        json: std::env::var("NOTIFY_LOG_JSON").is_ok_and(|v| v == "1" || v == "true"),
    })?;

    let path = std::env::args()
        .nth(1)
        .context("usage: notify-dispatch <event.json>")?;
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("cannot read event file '{}'", path))?;
    let input: EventFile = serde_json::from_str(&raw)
        .with_context(|| format!("'{}' is not a valid event", path))?;

    let config = EngineConfig::from_env()?;

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let triggers = SqlxActionTriggerRepository::new(pool.clone());
    let mut rules = RuleSet::load(
        &SqlxConfigRepository::new(pool.clone()),
        &triggers,
        &config.rule_prefix,
        config.entity,
    )
    .await?;
    if rules.is_empty() {
        // No rule stored for this entity, fall back to the environment.
        let entries = ConfigEntry::from_env_vars(&config.rule_prefix);
        rules = RuleSet::resolve(&triggers, &config.rule_prefix, entries).await?;
        info!(rules = rules.len(), "Loaded threshold rules from the environment");
    }

    let channel = config
        .channel
        .as_ref()
        .context("NOTIFY_CHANNEL is not set")?
        .build()?;

    let engine = DispatchEngine::builder(config)
        .rules(rules)
        .supervisors(Arc::new(SqlxUserRepository::new(pool.clone())))
        .channel(channel)
        .deliveries(Arc::new(SqlxDeliveryRepository::new(pool)))
        .build()?;

    let result = engine.dispatch(&input.event, input.attachments).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.has_failures() {
        drop(log_guard);
        std::process::exit(1);
    }
    Ok(())
}
