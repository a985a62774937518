use actix_web::{web, App, HttpServer};
use miniblog_service::app::Backends;
use miniblog_service::workers::WorkerPool;
use miniblog_service::{handlers, metrics, Config};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Miniblog Service
///
/// Serves the post, subscription and feed API and/or runs the fan-out worker,
/// depending on `SERVICE_ROLE`.
#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {:#}", e);
            eprintln!("ERROR: Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting miniblog-service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}, role: {:?}", config.app.env, config.app.role);

    let backends = match Backends::from_config(&config).await {
        Ok(backends) => backends,
        Err(e) => {
            tracing::error!("Backend initialization failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();
    let mut server_handle = None;

    if config.app.role.runs_api() {
        let post_service = web::Data::new(backends.post_service());
        let subscription_service = web::Data::new(backends.subscription_service());
        let feed_service = web::Data::new(backends.feed_service());

        let bind_address = format!("{}:{}", config.app.host, config.app.http_port);
        tracing::info!("Starting HTTP server on {}", bind_address);

        let server = HttpServer::new(move || {
            App::new()
                .app_data(post_service.clone())
                .app_data(subscription_service.clone())
                .app_data(feed_service.clone())
                .wrap(tracing_actix_web::TracingLogger::default())
                .route("/metrics", web::get().to(metrics::serve_metrics))
                .configure(handlers::configure)
        })
        .bind(&bind_address)?
        .run();

        server_handle = Some(server.handle());
        tasks.spawn(async move {
            tracing::info!("HTTP server is running");
            server.await
        });
    }

    if config.app.role.runs_worker() {
        if let Some(source) = backends.source.clone() {
            let pool = WorkerPool::new(
                source,
                Arc::new(backends.fanout_worker()),
                config.fanout.concurrency,
                Duration::from_secs(config.fanout.task_timeout_secs),
            );
            let worker_shutdown = shutdown_rx.clone();
            tasks.spawn(async move {
                pool.run(worker_shutdown).await;
                Ok(())
            });
        }
    }

    let mut first_error: Option<io::Error> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(_))) => {
                        tracing::info!("Background task completed");
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!("Task returned error: {}", e);
                        first_error.get_or_insert(e);
                    }
                    Some(Err(e)) => {
                        tracing::error!("Task join error: {}", e);
                        first_error.get_or_insert(io::Error::new(io::ErrorKind::Other, e.to_string()));
                    }
                    None => break,
                }
                break;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = server_handle {
        handle.stop(true).await;
    }
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::warn!("Task join error during shutdown: {}", e);
        }
    }

    tracing::info!("Miniblog-service shutting down");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
