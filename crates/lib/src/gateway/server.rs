//! Gateway HTTP server: health, Teams webhook and the optional raw command endpoint.

use crate::backend::{ClusterBackend, KubeApiBackend, MemoryBackend};
use crate::channels::{extract_command_text, TeamsActivity, TeamsReply};
use crate::command::{Command, DispatchError, Dispatcher, Outcome};
use crate::config::{BackendKind, ClusterConfig, Config, ConfigError, Settings};
use crate::gateway::middleware::{request_context, require_hmac, RequestContext};
use crate::render;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared, read-only state for all requests.
#[derive(Clone)]
pub struct GatewayState {
    pub settings: Arc<Settings>,
    pub dispatcher: Arc<Dispatcher>,
}

impl GatewayState {
    pub fn new(settings: Settings, dispatcher: Dispatcher) -> Self {
        Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Why a validated command produced no outcome.
enum CommandFailure {
    Timeout,
    Dispatch(DispatchError),
}

/// Backend selected by `cluster.backend`.
pub fn build_backend(cluster: &ClusterConfig) -> Result<Arc<dyn ClusterBackend>, ConfigError> {
    match cluster.backend {
        BackendKind::Kubernetes => Ok(Arc::new(KubeApiBackend::from_config(cluster)?)),
        BackendKind::Memory => {
            log::warn!("using in-memory cluster backend; commands do not reach a real cluster");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Resolve settings, build the backend and warn about allow-listed commands with no route.
pub fn build_state(config: &Config, config_path: &std::path::Path) -> Result<GatewayState> {
    let settings = Settings::resolve(config, config_path).context("loading settings")?;
    let backend = build_backend(&config.cluster).context("creating cluster backend")?;
    let dispatcher = Dispatcher::new(backend);
    for (verb, resource) in dispatcher.table().unwired(&settings.allowlist) {
        log::warn!(
            "permissions allow \"{} {}\" but no backend operation handles it; such commands will be rejected",
            verb,
            resource
        );
    }
    Ok(GatewayState::new(settings, dispatcher))
}

pub fn router(state: GatewayState) -> Router {
    let teams = Router::new()
        .route("/teams", post(teams_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_hmac));

    let mut app = Router::new()
        .route("/healthz", get(health_http))
        .merge(teams);

    if state.settings.insecure_commands {
        log::warn!("insecure command endpoint enabled on /command; do not expose it outside a trusted network");
        app = app.route("/command", post(raw_command));
    }

    let body_limit = DefaultBodyLimit::max(state.settings.max_body_bytes);
    app.layer(body_limit)
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}

/// Serve on an already-bound listener until SIGINT/SIGTERM.
pub async fn serve(listener: tokio::net::TcpListener, state: GatewayState) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Run the gateway; binds to server.bind:server.port. Blocks until shutdown (e.g. Ctrl+C).
/// Missing secret, permissions file or cluster access is fatal before the port is opened.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let state = build_state(&config, &config_path)?;
    let bind_addr = format!("{}:{}", state.settings.bind, state.settings.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    serve(listener, state).await
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET /healthz returns a simple health JSON (for probes).
async fn health_http(ctx: Option<Extension<RequestContext>>) -> Json<serde_json::Value> {
    let ctx = ctx.map(|Extension(c)| c).unwrap_or_default();
    log::debug!("{} /healthz request", ctx);
    Json(json!({ "health": true }))
}

/// Execute with the configured deadline. Dropping this future (client gone) aborts the backend call.
async fn run_command(
    state: &GatewayState,
    ctx: &RequestContext,
    command: &Command,
) -> Result<Outcome, CommandFailure> {
    log::info!("{} executing command: {}", ctx, command);
    let timeout = state.settings.backend_timeout;
    match tokio::time::timeout(timeout, state.dispatcher.execute(command)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => {
            match &e {
                DispatchError::BackendFailure(cause) => {
                    log::warn!("{} command failed: {}: {}", ctx, command, cause)
                }
                other => log::info!("{} command rejected: {}: {}", ctx, command, other),
            }
            Err(CommandFailure::Dispatch(e))
        }
        Err(_) => {
            log::warn!("{} command timed out after {:?}: {}", ctx, timeout, command);
            Err(CommandFailure::Timeout)
        }
    }
}

fn not_available(name: &str) -> TeamsReply {
    TeamsReply::text(format!(
        "{} - that command is not available. Please specify a valid command.",
        name
    ))
}

/// POST /teams: HMAC-verified Teams activity; replies in the conversation.
async fn teams_message(
    State(state): State<GatewayState>,
    ctx: Option<Extension<RequestContext>>,
    body: Bytes,
) -> (StatusCode, Json<TeamsReply>) {
    let ctx = ctx.map(|Extension(c)| c).unwrap_or_default();
    let activity: TeamsActivity = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(e) => {
            log::warn!("{} failed to decode request body from teams: {}", ctx, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(TeamsReply::text("failed to parse payload from teams")),
            );
        }
    };
    let name = activity.from.name.as_str();
    log::info!("{} received request from {}", ctx, name);

    let reply = match extract_command_text(&activity.text) {
        None => {
            log::info!("{} no command found in message", ctx);
            not_available(name)
        }
        Some(text) => match Command::parse(text, &state.settings.allowlist) {
            Err(e) => {
                log::info!("{} failed to parse and validate command '{}': {}", ctx, text, e);
                not_available(name)
            }
            Ok(command) => match run_command(&state, &ctx, &command).await {
                Ok(outcome) => render::teams_reply(&outcome, chrono::Utc::now()),
                Err(CommandFailure::Timeout) => {
                    TeamsReply::text(format!("{} - the command timed out", name))
                }
                Err(CommandFailure::Dispatch(e)) => TeamsReply::text(format!("{} - {}", name, e)),
            },
        },
    };

    log::info!("{} finished processing request", ctx);
    (StatusCode::OK, Json(reply))
}

fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::MissingIdentifier
        | DispatchError::UnknownVerb(_)
        | DispatchError::UnknownResource(_) => StatusCode::BAD_REQUEST,
        DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
        DispatchError::BackendFailure(_) => StatusCode::BAD_GATEWAY,
    }
}

/// POST /command: raw command string in the body. Not authenticated; mounted only when enabled.
async fn raw_command(
    State(state): State<GatewayState>,
    ctx: Option<Extension<RequestContext>>,
    body: Bytes,
) -> Response {
    let ctx = ctx.map(|Extension(c)| c).unwrap_or_default();
    let Ok(raw) = std::str::from_utf8(&body) else {
        log::info!("{} command body is not valid UTF-8", ctx);
        return (StatusCode::BAD_REQUEST, "request body is not valid UTF-8").into_response();
    };
    let raw = raw.trim_end_matches(&['\r', '\n'][..]);

    let command = match Command::parse(raw, &state.settings.allowlist) {
        Ok(c) => c,
        Err(e) => {
            log::info!("{} failed to parse and validate command '{}': {}", ctx, raw, e);
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to parse and validate command: {}", e),
            )
                .into_response();
        }
    };

    match run_command(&state, &ctx, &command).await {
        Ok(outcome) => {
            let body = render::render_outcome(
                &outcome,
                state.settings.response_format,
                chrono::Utc::now(),
            );
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(CommandFailure::Timeout) => {
            (StatusCode::GATEWAY_TIMEOUT, "command timed out").into_response()
        }
        Err(CommandFailure::Dispatch(e)) => (
            dispatch_status(&e),
            format!("failed to execute command: {}", e),
        )
            .into_response(),
    }
}
