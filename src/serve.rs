//! Purpose: Provide the HTTP/JSON server in front of the provisioning engine.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum router, graceful shutdown, and error-to-status mapping.
//! Invariants: Engine failures are 200 responses; only adapter failures map to 4xx/5xx.
//! Invariants: Engine runs happen on blocking threads, bounded by a semaphore.
//! Invariants: Shutdown stops accepting first, then waits for every in-flight run to answer.

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tfapi::api::{CommandEngine, Error, ErrorKind, Operation, Runner};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub engine: PathBuf,
    pub temp_dir: Option<PathBuf>,
    pub max_body_bytes: u64,
    pub max_concurrent_runs: usize,
    pub run_timeout: Option<Duration>,
}

#[derive(Clone)]
struct AppState {
    runner: Runner,
    run_semaphore: Arc<Semaphore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let engine = CommandEngine::new(config.engine).with_timeout(config.run_timeout);
    info!(
        engine = %engine.program().display(),
        run_timeout_secs = config.run_timeout.map(|timeout| timeout.as_secs()),
        max_concurrent_runs = config.max_concurrent_runs,
        "provisioning engine configured"
    );
    let state = Arc::new(AppState {
        runner: Runner::new(Arc::new(engine)).with_staging_dir(config.temp_dir),
        run_semaphore: Arc::new(Semaphore::new(config.max_concurrent_runs)),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/apply", put(apply).delete(apply))
        .route("/plan", post(plan).delete(plan))
        .route("/refresh", put(refresh))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_hint("Check that the address is local and the port is free.")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().unwrap_or(config.bind);
    info!(addr = %local_addr, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutdown requested; draining in-flight requests");
            let _ = shutdown_tx.send(());
            // No deadline: engine runs may take minutes and must not be cut off.
            server.await.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
            info!("in-flight requests drained");
        }
    };
    Ok(())
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.engine.as_os_str().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--engine must not be empty")
            .with_hint("Use a command name like terraform or an absolute path."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 16777216."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.max_concurrent_runs == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-concurrent-runs must be greater than zero")
            .with_hint("Use a positive value like 8."));
    }

    if config.run_timeout.is_some_and(|timeout| timeout.is_zero()) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--run-timeout-secs must be greater than zero")
            .with_hint("Omit the flag to let engine runs take as long as they need."));
    }

    if let Some(dir) = &config.temp_dir {
        if !dir.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--temp-dir must be an existing directory")
                .with_path(dir));
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn apply(State(state): State<Arc<AppState>>, method: Method, body: Bytes) -> Response {
    run_operation(state, Operation::Apply, method == Method::DELETE, body).await
}

async fn plan(State(state): State<Arc<AppState>>, method: Method, body: Bytes) -> Response {
    run_operation(state, Operation::Plan, method == Method::DELETE, body).await
}

async fn refresh(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    run_operation(state, Operation::Refresh, false, body).await
}

async fn run_operation(
    state: Arc<AppState>,
    operation: Operation,
    destroy: bool,
    body: Bytes,
) -> Response {
    let permit = match state.run_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(
                Error::new(ErrorKind::Busy)
                    .with_message("too many concurrent engine runs")
                    .with_hint("Try again later or raise --max-concurrent-runs."),
            );
        }
    };

    let runner = state.runner.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        runner.run(operation, destroy, &body)
    })
    .await;

    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(err) => error_response(
            Error::new(ErrorKind::Internal)
                .with_message("engine task failed")
                .with_source(err),
        ),
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Engine => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            path: err.path().map(|path| path.to_string_lossy().to_string()),
        },
    };
    (status, Json(body)).into_response()
}
