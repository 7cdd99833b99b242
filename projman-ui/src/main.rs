//! projman UI server - web interface for cloning, running, updating and
//! switching local projects.

mod jobs;
mod origin;
mod routes;
mod scheduler;
mod shutdown;
mod sse;
mod state;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use clap::Parser;
use projman::io::settings::{DEFAULT_SETTINGS_FILE, load_settings};
use tower_http::services::ServeDir;
use tracing::info;

use crate::origin::AllowedOrigins;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "projman-ui")]
#[command(about = "Web UI for managing local Python projects")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Settings file (TOML)
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Directory containing UI static files (defaults to ./ui/dist)
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Extra browser origin allowed to call the API (e.g. a UI dev server)
    #[arg(long = "allow-origin", value_name = "ORIGIN")]
    allow_origins: Vec<String>,
}

/// API and event routes behind the origin guard, plus static UI files.
fn build_app(state: AppState, allowed: AllowedOrigins, ui_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(middleware::from_fn_with_state(
            allowed.clone(),
            origin::reject_foreign_origin,
        ));
    if let Some(cors) = allowed.cors_layer() {
        app = app.layer(cors);
    }
    let app = app.with_state(state);

    match ui_dir {
        Some(ui_dir) => {
            info!(ui_dir = %ui_dir.display(), "serving static UI files");
            app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true))
        }
        None => app,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("projman_ui=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();

    let settings = load_settings(&args.settings)?;
    info!(
        settings = %args.settings.display(),
        projects_dir = %settings.projects_dir.display(),
        "starting projman-ui"
    );

    let state = AppState::new(args.settings.clone(), settings);

    scheduler::start_autoupdate(state.clone());

    let allowed = AllowedOrigins::new(&args.allow_origins)?;
    let ui_dir = args.ui_dir.unwrap_or_else(|| PathBuf::from("ui").join("dist"));
    let ui_dir = if ui_dir.exists() {
        Some(ui_dir)
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
        None
    };
    let app = build_app(state.clone(), allowed, ui_dir);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // SSE streams never end on their own, so the server is dropped rather
    // than drained once running projects are stopped.
    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        () = shutdown::wait_for_signal() => {
            shutdown::stop_running_projects(&state).await;
        }
    }

    Ok(())
}
