//! Process wiring.
//!
//! Builds the queue, registry, cache and database handles once, starts the
//! loops enabled by [`Roles`](crate::config::Roles), and tears them down on
//! SIGINT or SIGTERM.

use crate::config::AppConfig;
use crate::db::{PgExecutionStore, WorkflowRepository};
use crate::error::StartupError;
use chainflow_chain::SolanaPubsubClient;
use chainflow_integration::{HttpNotifier, HttpOrderClient, HttpSigningRelay};
use chainflow_listener::{SubscriptionManager, WorkflowSource};
use chainflow_processor::{EventProcessor, Worker};
use chainflow_queue::{
    JobConsumer, JobQueue, NatsDedupCache, NatsJobQueue, NatsRepeatableJobStore,
    RepeatableJobStore,
};
use chainflow_scheduler::{CronScheduler, CronTicker};
use chainflow_workflow::{ActionExecutor, NodeExecutorRegistry, WorkflowEngine};
use rootcause::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn startup<E: std::fmt::Display>(
    variant: fn(String) -> StartupError,
) -> impl FnOnce(E) -> StartupError {
    move |e| variant(e.to_string())
}

fn database(reason: String) -> StartupError {
    StartupError::Database { reason }
}

fn queue(reason: String) -> StartupError {
    StartupError::Queue { reason }
}

fn chain(reason: String) -> StartupError {
    StartupError::Chain { reason }
}

/// Engine registry with the HTTP collaborators the config enables.
#[must_use]
pub fn executor_registry(config: &AppConfig) -> NodeExecutorRegistry {
    let client = reqwest::Client::new();
    let notifier = Arc::new(HttpNotifier::new(
        client.clone(),
        config.notifications.telegram_bot_token.clone(),
    ));

    let mut actions = ActionExecutor::new();
    if let Some(url) = &config.relay.url {
        actions = actions.with_transactions(Arc::new(HttpSigningRelay::new(
            client.clone(),
            url.clone(),
            config.relay.api_key.clone(),
        )));
    }
    if let Some(url) = &config.orders.url {
        actions = actions.with_orders(Arc::new(HttpOrderClient::new(
            client,
            url.clone(),
            config.orders.api_key.clone(),
        )));
    }

    NodeExecutorRegistry::standard(actions, notifier)
}

/// Runs until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if a required backend is unreachable at startup.
pub async fn run(config: AppConfig) -> Result<(), Report<StartupError>> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(startup(database))?;

    info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(startup(database))?;
    let workflows = WorkflowRepository::new(pool.clone());

    let nats_config = config.nats.to_nats_config();
    let jetstream = chainflow_queue::connect(&nats_config)
        .await
        .map_err(|e| queue(e.current_context().to_string()))?;
    let job_queue: Arc<dyn JobQueue> = Arc::new(
        NatsJobQueue::new(jetstream.clone(), nats_config.clone())
            .await
            .map_err(|e| queue(e.current_context().to_string()))?,
    );

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let mut listener = None;

    if config.roles.scheduler {
        let registry: Arc<dyn RepeatableJobStore> = Arc::new(
            NatsRepeatableJobStore::new(&jetstream, &nats_config)
                .await
                .map_err(|e| queue(e.current_context().to_string()))?,
        );
        let scheduler = CronScheduler::new(Arc::clone(&registry))
            .with_min_interval(config.scheduler.min_interval());
        let enabled = workflows.list_enabled().await.map_err(startup(database))?;
        match scheduler.reconcile_all(&enabled).await {
            Ok(result) => info!(
                added = result.added,
                removed = result.removed,
                failed = result.failed,
                "cron registrations reconciled"
            ),
            Err(e) => warn!(error = %e.current_context(), "cron reconciliation failed"),
        }

        let ticker = CronTicker::new(registry, Arc::clone(&job_queue))
            .with_interval(config.scheduler.tick_interval());
        tasks.spawn(ticker.run(cancel.clone()));
    }

    if config.roles.listener {
        let (client, events) =
            SolanaPubsubClient::connect(config.solana.to_pubsub_config(), cancel.clone())
                .await
                .map_err(|e| chain(e.current_context().to_string()))?;
        let manager = Arc::new(SubscriptionManager::new(
            Arc::new(client),
            Arc::clone(&job_queue),
        ));
        let source: Arc<dyn WorkflowSource> = Arc::new(workflows.clone());
        match source.enabled_workflows().await {
            Ok(enabled) => {
                manager.resync(&enabled).await;
            }
            Err(e) => warn!(error = %e.current_context(), "initial subscribe skipped"),
        }

        tasks.spawn(Arc::clone(&manager).run(
            events,
            source,
            config.listener.resync_interval(),
            cancel.clone(),
        ));
        listener = Some(manager);
    }

    if config.roles.worker {
        let cache = Arc::new(
            NatsDedupCache::new(&jetstream, &nats_config)
                .await
                .map_err(|e| queue(e.current_context().to_string()))?,
        );
        let processor = EventProcessor::new(
            WorkflowEngine::new(executor_registry(&config)),
            Arc::new(PgExecutionStore::new(pool.clone())),
            cache,
        )
        .with_lease(config.worker.lease());
        let consumer = JobConsumer::new(
            &jetstream,
            &nats_config,
            config.worker.to_consumer_settings(),
        )
        .await
        .map_err(|e| queue(e.current_context().to_string()))?;
        let worker = Worker::new(Arc::new(processor), config.worker.to_worker_config());

        let worker_cancel = cancel.clone();
        tasks.spawn(async move {
            match consumer.deliveries().await {
                Ok(deliveries) => worker.run(deliveries, worker_cancel).await,
                Err(e) => error!(error = %e.current_context(), "failed to start consuming jobs"),
            }
        });
    }

    info!(
        listener = config.roles.listener,
        scheduler = config.roles.scheduler,
        worker = config.roles.worker,
        "chainflow started"
    );
    shutdown_signal().await;
    info!("shutdown requested");

    if let Some(manager) = listener {
        manager.unsubscribe_all().await;
    }
    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "task ended abnormally");
        }
    }
    pool.close().await;
    info!("chainflow stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
