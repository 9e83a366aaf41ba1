use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use escalert::cli::{Cli, LogFormat};
use escalert::config::Config;
use escalert::directory::{ConfigDirectory, RecipientResolver};
use escalert::dispatch::{Dispatcher, EmailSender, HttpPushSender, PushSender};
use escalert::lifecycle::AlertManager;
use escalert::provider::{ProviderClient, RetryCoordinator};
use escalert::store::{
    MemoryAlertStore, MemoryAttemptStore, MemoryAuditLog, MemoryMessageStore,
    MemoryWebhookEventStore,
};
use escalert::sweep::SweepScheduler;
use escalert::webhook::{self, CorrelationProcessor, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!(%error, "Configuration error");
        }
        anyhow::bail!("configuration invalid ({} errors)", errors.len());
    }
    if cli.check_config {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    if config.metrics.enabled {
        escalert::metrics::init(config.metrics.port)?;
    }

    let alerts = Arc::new(MemoryAlertStore::new());
    let attempts = Arc::new(MemoryAttemptStore::new());
    let messages = Arc::new(MemoryMessageStore::new());
    let events = Arc::new(MemoryWebhookEventStore::new());
    let audit = Arc::new(MemoryAuditLog::new());

    let http = reqwest::Client::new();
    let provider = Arc::new(ProviderClient::from_config(
        &config.provider,
        http.clone(),
        messages.clone(),
    )?);

    let email = match &config.email {
        Some(email_config) => Some(EmailSender::from_config(email_config)?),
        None => None,
    };
    let push: Option<Arc<dyn PushSender>> = match &config.push {
        Some(push_config) => Some(Arc::new(HttpPushSender::from_config(
            push_config,
            http.clone(),
        )?)),
        None => None,
    };

    let directory = Arc::new(ConfigDirectory::from_config(&config.directory));
    let resolver = RecipientResolver::new(directory, config.directory.default_role.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        resolver,
        provider.clone(),
        email,
        push,
        attempts.clone(),
        config.provider.alert_template.clone(),
    ));

    let manager = Arc::new(AlertManager::new(
        alerts.clone(),
        dispatcher,
        config.policy_table()?,
        audit.clone(),
    ));

    let processor = Arc::new(CorrelationProcessor::new(
        messages.clone(),
        attempts.clone(),
        events,
        audit,
        config.provider.concessions.clone(),
    ));
    let verify_token = escalert::config::resolve_env_vars(&config.webhook.verify_token)?;

    let shutdown = CancellationToken::new();

    let sweep = SweepScheduler::new(manager.clone(), alerts, config.sweep.interval);
    let sweep_task = tokio::spawn(sweep.run(shutdown.clone()));

    let retry = RetryCoordinator::new(
        provider,
        messages,
        config.retry.interval,
        config.retry.max_retries,
    );
    let retry_task = tokio::spawn(retry.run(shutdown.clone()));

    // Webhook callbacks and the alert API share one listener.
    let app = webhook::router(WebhookState {
        processor,
        verify_token,
    })
    .merge(escalert::api::router(manager.clone()));
    let webhook_task = tokio::spawn(webhook::serve(
        config.webhook.port,
        app,
        shutdown.clone(),
    ));

    tracing::info!("escalert started");
    wait_for_signal().await;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();

    let _ = sweep_task.await;
    let _ = retry_task.await;
    if let Ok(Err(e)) = webhook_task.await {
        tracing::error!(error = %e, "Webhook endpoint terminated with error");
    }
    tracing::info!("escalert stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
