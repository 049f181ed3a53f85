// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use gaugeline_core::crypto::Decryptor;
use gaugeline_core::signing::Signer;
use gaugeline_core::store::MetricStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gaugeline_server::{
    audit::{AuditManager, AuditSink, FileSink, HttpSink},
    config::Config,
    db::PgRepository,
    grpc,
    persist::{self, SnapshotFile},
    router::{self, AppState},
    service::MetricsService,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::new() {
        Ok(c) => c,
        Err(e) => {
            // The subscriber is not installed yet.
            eprintln!("Error creating server config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("h2=off,hyper=off,tower=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
    info!(
        "gaugeline-server {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.address
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), String> {
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let decryptor = config
        .crypto_key
        .as_deref()
        .map(Decryptor::from_file)
        .transpose()
        .map_err(|e| format!("Error loading private key: {e}"))?;
    let signer = config.key.as_deref().and_then(Signer::new);

    let audit = Arc::new(AuditManager::new());
    if let Some(path) = &config.audit_file {
        audit.attach(AuditSink::File(FileSink::new(path)));
        info!("Audit file sink enabled: {}", path.display());
    }
    if let Some(url) = &config.audit_url {
        let sink = HttpSink::new(url).map_err(|e| format!("Error creating audit sink: {e}"))?;
        audit.attach(AuditSink::Http(sink));
        info!("Audit HTTP sink enabled: {url}");
    }

    let store = Arc::new(MetricStore::new());
    if config.restore {
        persist::restore_snapshot(&store, &config.file_storage_path);
    }

    let mut service = MetricsService::new(Arc::clone(&store), audit);
    let repository = match &config.database_dsn {
        Some(dsn) => {
            let repository = PgRepository::connect(dsn, shutdown.clone())
                .await
                .map(Arc::new)
                .map_err(|e| format!("Error connecting to the database: {e}"))?;
            service = service.with_repository(repository.clone());
            Some(repository)
        }
        None => None,
    };

    let snapshot = Arc::new(SnapshotFile::new(config.file_storage_path.clone()));
    let mut store_loop = None;
    if config.sync_snapshot() {
        service = service.with_sync_snapshot(Arc::clone(&snapshot));
    } else {
        store_loop = Some(tokio::spawn(persist::run_store_loop(
            Arc::clone(&store),
            Arc::clone(&snapshot),
            config.store_interval,
            shutdown.clone(),
        )));
    }
    let service = Arc::new(service);

    let grpc_server = match &config.grpc_address {
        Some(address) => {
            let listener = TcpListener::bind(address)
                .await
                .map_err(|e| format!("Error binding gRPC listener on {address}: {e}"))?;
            info!("gRPC server listening on {address}");
            Some(tokio::spawn(grpc::serve(
                listener,
                Arc::clone(&service),
                config.trusted_subnet,
                shutdown.clone(),
            )))
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.address)
        .await
        .map_err(|e| format!("Error binding HTTP listener on {}: {e}", config.address))?;
    info!("HTTP server listening on {}", config.address);
    let state = AppState::new(Arc::clone(&service))
        .with_signer(signer)
        .with_decryptor(decryptor);
    let served = router::serve(listener, router::make_router(state), shutdown.clone()).await;

    // Stop the other tasks if the HTTP server exited on its own.
    shutdown.cancel();
    if let Some(handle) = grpc_server {
        match handle.await {
            Ok(Err(e)) => error!("gRPC server error: {e}"),
            Err(e) => error!("gRPC server task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(handle) = store_loop {
        let _ = handle.await;
    }

    snapshot.save(&store).await;
    info!("Saved {} metrics before exit", store.len());
    if let Some(repository) = repository {
        repository.close().await;
    }

    served.map_err(|e| format!("HTTP server error: {e}"))
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            () = shutdown.cancelled() => return,
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
            () = shutdown.cancelled() => return,
        }
    }
    shutdown.cancel();
}
