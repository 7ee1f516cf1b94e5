mod api;
mod batches;
mod config;
mod models;
mod openapi;
mod spool;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Result;
use clap::Parser;
use fanout_engine::PlaybackEngine;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::batches::{BatchTracker, spawn_sweeper};
use crate::config::{ServerConfig, ServerSettings};
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "fanout-server")]
struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:5000 (overrides the config file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,fanout_server=info,fanout_engine=info")
        }))
        .init();

    let file_config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let settings = ServerSettings::resolve(&file_config, args.bind)?;

    tracing::info!(
        bind = %settings.bind,
        max_sessions = settings.max_sessions,
        spool_dir = %settings.spool_dir.display(),
        "starting fanout-server"
    );

    let engine = Arc::new(PlaybackEngine::new(settings.max_sessions));
    match engine.discover() {
        Ok(devices) => tracing::info!(count = devices.len(), "output devices cataloged"),
        Err(e) => tracing::warn!(error = %e, "initial device discovery failed"),
    }

    let batches = BatchTracker::new(settings.batch_max_age);
    spawn_sweeper(batches.clone(), settings.sweep_interval);

    let shutdown_engine = engine.clone();
    let shutdown_batches = batches.clone();
    let _ = ctrlc::set_handler(move || {
        shutdown_engine.stop_all();
        shutdown_batches.end_all();
        if let Some(system) = actix_web::rt::System::try_current() {
            system.stop();
        } else {
            std::process::exit(0);
        }
    });

    let max_upload_bytes = settings.max_upload_bytes;
    let bind = settings.bind;
    let state = web::Data::new(AppState::new(engine, batches, settings));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .wrap(Logger::default().exclude("/status"))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::devices_list)
            .service(api::device_test)
            .service(api::play_tone)
            .service(api::play_device)
            .service(api::play_all)
            .service(api::play_multi)
            .service(api::stop)
            .service(api::force_stop)
            .service(api::status::status)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
