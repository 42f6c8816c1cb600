//! HTTP front-end.
//!
//! Runs on its own OS thread inside a current-thread tokio runtime. Handlers
//! never touch the camera: they read state snapshots, mutate the
//! user-editable fields under the state lock, and post commands. Synchronous
//! posts ride `spawn_blocking` so the slot wait never stalls the poll loop.

use crate::command::Command;
use crate::queue::CommandQueue;
use crate::render;
use crate::state::StateHandle;
use crate::tables;
use crate::timing::SleepGate;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct App {
    pub state: StateHandle,
    pub queue: Arc<CommandQueue>,
    pub gate: Arc<SleepGate>,
}

/// Block the HTTP thread's worker pool, not the poll loop, on the slot wait.
async fn post_and_wait(app: &App, command: Command) {
    let queue = Arc::clone(&app.queue);
    if let Err(error) = tokio::task::spawn_blocking(move || queue.post(command, true)).await {
        tracing::error!(%error, %command, "synchronous post failed");
    }
}

pub fn router(web_root: PathBuf, app: App) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/camera", get(camera))
        .route("/api/camera/connect", post(connect))
        .route("/api/camera/disconnect", post(disconnect))
        .route("/api/camera/start-shoot", post(start_shoot))
        .route("/api/camera/stop-shoot", post(stop_shoot))
        .route("/api/camera/take-picture", post(take_picture))
        .route("/api/camera/state", get(state_poll))
        .route("/api/camera/state/delay", post(set_delay))
        .route("/api/camera/state/interval", post(set_interval))
        .route("/api/camera/state/frames", post(set_frames))
        .route("/api/camera/state/exposure", post(set_exposure))
        .route("/api/camera/state/iso", post(set_iso))
        .nest_service("/assets", ServeDir::new(web_root))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Bind and serve until the process exits. Called from the dedicated HTTP
/// thread.
pub fn serve(listen: SocketAddr, web_root: PathBuf, app: App) -> eyre::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(listen).await?;
        tracing::info!(%listen, "web interface listening");
        axum::serve(listener, router(web_root, app)).await?;
        Ok(())
    })
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn index(State(app): State<App>) -> Html<String> {
    Html(render::page(&app.state.snapshot()))
}

async fn camera(State(app): State<App>) -> Html<String> {
    post_and_wait(&app, Command::Initialize).await;
    Html(render::camera_panel(&app.state.snapshot()))
}

async fn connect(State(app): State<App>) -> Html<String> {
    post_and_wait(&app, Command::Connect).await;
    Html(render::content(&app.state.snapshot()))
}

async fn disconnect(State(app): State<App>) -> Html<String> {
    post_and_wait(&app, Command::Disconnect).await;
    Html(render::content(&app.state.snapshot()))
}

async fn start_shoot(State(app): State<App>) -> Html<String> {
    post_and_wait(&app, Command::StartShooting).await;
    Html(render::content(&app.state.snapshot()))
}

async fn stop_shoot(State(app): State<App>) -> Html<String> {
    // The dispatcher may be inside a delay or bulb sleep and unable to
    // dequeue; clear the flag and cancel the sleep from here, then let the
    // command catch any race.
    app.state.update(|s| s.shooting = false);
    app.gate.cancel();
    app.queue.post(Command::StopShooting, false);
    Html(render::content(&app.state.snapshot()))
}

async fn take_picture(State(app): State<App>) -> Html<String> {
    post_and_wait(&app, Command::TakePicture).await;
    Html(render::content(&app.state.snapshot()))
}

async fn state_poll(State(app): State<App>) -> Response {
    let snapshot = app.state.snapshot();
    if snapshot.shooting {
        StatusCode::NO_CONTENT.into_response()
    } else {
        Html(render::content(&snapshot)).into_response()
    }
}

#[derive(Deserialize)]
struct DelayForm {
    delay: i64,
}

async fn set_delay(State(app): State<App>, Form(form): Form<DelayForm>) -> Html<String> {
    let seconds = form.delay.max(0);
    app.state.update(|s| s.delay_us = seconds * 1_000_000);
    Html(render::number_input("delay", seconds, true))
}

#[derive(Deserialize)]
struct IntervalForm {
    interval: i64,
}

async fn set_interval(State(app): State<App>, Form(form): Form<IntervalForm>) -> Html<String> {
    let seconds = form.interval.max(0);
    app.state.update(|s| s.interval_us = seconds * 1_000_000);
    Html(render::number_input("interval", seconds, true))
}

#[derive(Deserialize)]
struct FramesForm {
    frames: i64,
}

async fn set_frames(State(app): State<App>, Form(form): Form<FramesForm>) -> Html<String> {
    let frames = form.frames.max(0);
    app.state.update(|s| s.frames = frames);
    Html(render::number_input("frames", frames, true))
}

#[derive(Deserialize)]
struct ExposureForm {
    exposure: usize,
    #[serde(rename = "exposure-custom")]
    custom: Option<f64>,
}

async fn set_exposure(State(app): State<App>, Form(form): Form<ExposureForm>) -> Html<String> {
    let snapshot = app.state.update(|s| {
        s.exposure_index = form.exposure;
        if let Some(seconds) = form.custom {
            s.exposure_us = (seconds.max(0.0) * 1_000_000.0) as i64;
            // a custom length past the native ceiling only works in Bulb
            if s.exposure_us > tables::longest_native_us(&s.shutter_table) {
                s.exposure_index = s.shutter_table.len();
            }
        }
        s.clone()
    });
    Html(render::exposure_fragment(&snapshot))
}

#[derive(Deserialize)]
struct IsoForm {
    iso: usize,
}

async fn set_iso(State(app): State<App>, Form(form): Form<IsoForm>) -> Html<String> {
    let snapshot = app.state.update(|s| {
        s.iso_index = form.iso;
        s.clone()
    });
    Html(render::iso_fragment(&snapshot))
}
