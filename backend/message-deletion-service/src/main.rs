use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;

use message_deletion_service::config::Config;
use message_deletion_service::logging::init_tracing;
use message_deletion_service::routes;
use message_deletion_service::state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        env = %config.app.env,
        delete_window_secs = config.policy.delete_window_secs,
        sender_sees_recalled = config.policy.sender_sees_recalled,
        "Starting message-deletion-service"
    );

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    let state = AppState::connect(config)
        .await
        .context("Failed to initialize backends")?;

    let sweeper = tokio::spawn(state.sweeper.clone().start());

    let data = web::Data::new(state);
    tracing::info!("Starting HTTP server at {}", bind_address);

    let result = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(routes::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await;

    sweeper.abort();
    tracing::info!("message-deletion-service stopped");

    result.context("HTTP server error")
}
