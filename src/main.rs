mod command;
mod controller;
mod gphoto2_sdk;
mod queue;
mod render;
mod sdk;
mod state;
mod tables;
mod timing;
mod web;

use clap::Parser;
use command::Command;
use controller::Controller;
use gphoto2_sdk::Gphoto2Sdk;
use queue::CommandQueue;
use state::StateHandle;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use timing::SleepGate;
use tracing_subscriber::EnvFilter;

/// Intervalometer for a USB-attached Canon EOS camera, controlled from a
/// browser on the local network.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory served under /assets/ (stylesheet, htmx, scripts).
    #[arg(long)]
    web_root: PathBuf,

    /// Address the web interface listens on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: SocketAddr,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Args { web_root, listen } = Args::parse();

    let state = StateHandle::new();
    let queue = Arc::new(CommandQueue::new());
    let gate = Arc::new(SleepGate::new());

    // The dispatcher owns the camera and must disconnect it itself; the
    // handler only flags termination and wakes whatever the dispatcher is
    // blocked on.
    ctrlc::set_handler({
        let state = state.clone();
        let queue = Arc::clone(&queue);
        let gate = Arc::clone(&gate);
        move || {
            tracing::info!("shutdown signal received");
            state.update(|s| {
                s.running = false;
                s.shooting = false;
            });
            gate.cancel();
            queue.post(Command::Terminate, false);
        }
    })?;

    let app = web::App {
        state: state.clone(),
        queue: Arc::clone(&queue),
        gate: Arc::clone(&gate),
    };
    std::thread::Builder::new()
        .name("http".to_owned())
        .spawn(move || {
            if let Err(error) = web::serve(listen, web_root, app) {
                tracing::error!(?error, "web server exited");
                std::process::exit(1);
            }
        })?;

    // The vendor stack wants its calls on the main thread; the dispatcher
    // keeps it until termination and releases the camera on the way out.
    Controller::new(Gphoto2Sdk::new(), state, queue, gate).run();
    Ok(())
}
