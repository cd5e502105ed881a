use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use phantom_agent::{
    ActionProtocol, ChatMessage, Diagnostic, DiagnosticLog, MissionEngine, MissionHandle,
    MissionOutcome, Plan, Progress, Response, SecretEntry, SecretVault,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

/// Events streamed to clients via SSE.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Progress { mission: u64, progress: Progress },
    MissionFinished { mission: u64, outcome: MissionOutcome },
}

impl AgentEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            AgentEvent::Progress { mission, progress } => Event::default()
                .event("progress")
                .data(
                    serde_json::json!({
                        "mission": mission,
                        "line": progress.to_string(),
                        "detail": progress,
                    })
                    .to_string(),
                ),
            AgentEvent::MissionFinished { mission, outcome } => {
                let data = match outcome {
                    MissionOutcome::Completed { context } => serde_json::json!({
                        "mission": mission,
                        "status": "completed",
                        "context": context,
                    }),
                    MissionOutcome::Aborted { step, reason } => serde_json::json!({
                        "mission": mission,
                        "status": "aborted",
                        "step": step,
                        "reason": reason,
                    }),
                };
                Event::default().event("mission_finished").data(data.to_string())
            }
        }
    }
}

pub struct AppState {
    protocol: ActionProtocol,
    engine: MissionEngine,
    diagnostics: DiagnosticLog,
    event_tx: broadcast::Sender<AgentEvent>,
    next_mission: AtomicU64,
}

impl AppState {
    pub fn new(protocol: ActionProtocol, engine: MissionEngine, diagnostics: DiagnosticLog) -> Self {
        let (event_tx, _) = broadcast::channel::<AgentEvent>(256);
        Self {
            protocol,
            engine,
            diagnostics,
            event_tx,
            next_mission: AtomicU64::new(1),
        }
    }
}

#[derive(Deserialize)]
struct ConsolePayload {
    history: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct CodePayload {
    code: String,
}

#[derive(Deserialize)]
struct PlanPayload {
    objective: String,
}

#[derive(Deserialize)]
struct MissionPayload {
    plan: Plan,
    #[serde(default)]
    secrets: Vec<SecretEntry>,
}

#[derive(Serialize)]
struct MissionStarted {
    mission: u64,
}

/// Start the API server on the first free port from `first_port`. Returns the bound port.
pub async fn start_server(state: AppState, first_port: u16) -> Result<u16> {
    let state = Arc::new(state);

    let app = Router::new()
        .route("/console", post(console_handler))
        .route("/execute", post(execute_handler))
        .route("/plan", post(plan_handler))
        .route("/missions", post(mission_handler))
        .route("/events", get(sse_handler))
        .route(
            "/diagnostics",
            get(diagnostics_list_handler).post(diagnostics_handler),
        )
        .with_state(state);

    // Try the requested port, fall back to the next nine if in use
    let mut bound = None;
    for port in first_port..first_port.saturating_add(10) {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "Could not bind to any port {}-{}. Stop the old agent first.",
            first_port,
            first_port.saturating_add(9)
        )
    })?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    });

    Ok(port)
}

async fn console_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConsolePayload>,
) -> Json<Response> {
    info!(messages = payload.history.len(), "POST /console");
    Json(state.protocol.respond(&payload.history).await)
}

async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CodePayload>,
) -> Json<Response> {
    info!("POST /execute");
    Json(state.protocol.execute_code(&payload.code).await)
}

async fn plan_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlanPayload>,
) -> Json<Response> {
    info!(objective = %payload.objective, "POST /plan");
    Json(state.protocol.plan_response(&payload.objective).await)
}

async fn mission_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MissionPayload>,
) -> Json<MissionStarted> {
    let mission = state.next_mission.fetch_add(1, Ordering::SeqCst);
    let vault: SecretVault = payload.secrets.into_iter().collect();
    info!(mission, steps = payload.plan.len(), "POST /missions");

    let MissionHandle { mut progress, task } = state.engine.spawn(payload.plan, vault);
    let events = state.event_tx.clone();

    tokio::spawn(async move {
        while let Some(progress) = progress.recv().await {
            let _ = events.send(AgentEvent::Progress { mission, progress });
        }
        match task.await {
            Ok(outcome) => {
                let _ = events.send(AgentEvent::MissionFinished { mission, outcome });
            }
            Err(e) => error!(mission, error = %e, "mission task failed"),
        }
    });

    Json(MissionStarted { mission })
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}

async fn diagnostics_handler(
    State(state): State<Arc<AppState>>,
    Json(diagnostic): Json<Diagnostic>,
) -> StatusCode {
    state.diagnostics.record(diagnostic);
    StatusCode::NO_CONTENT
}

async fn diagnostics_list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Diagnostic>> {
    Json(state.diagnostics.entries())
}
