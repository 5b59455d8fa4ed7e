use chainflow::{app, config::AppConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chainflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().expect("failed to load configuration");
    tracing::info!("loaded configuration");

    if let Err(e) = app::run(config).await {
        tracing::error!(error = %e.current_context(), "chainflow failed to start");
        std::process::exit(1);
    }
}
