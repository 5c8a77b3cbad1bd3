#[macro_use]
extern crate diesel;
extern crate env_logger;
extern crate log;

use std::io;

use actix_multipart::form::MultipartFormConfig;
use actix_web::rt::System;
use actix_web::web::Data;
use actix_web::{middleware, App, HttpServer};
use log::{info, warn};

use crate::config::Config;
use crate::core::error::Error;
use crate::dmn::reconciler::ReconcileDaemon;
use crate::tmdb::TmdbClient;

mod api;
mod config;
mod core;
mod db;
mod dmn;
mod ingest;
mod tmdb;

const UPLOAD_LIMIT: usize = 64 * 1024 * 1024;

fn startup_error(err: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

// The blocking TMDB client must be built outside the async runtime, so the
// system is started by hand instead of with `#[actix_web::main]`.
fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    std::env::set_var("RUST_LOG",
      format!("{}actix_web=debug", std::env::var("RUST_LOG")
          .map_or_else(|_| "".to_string(), |ll| format!("{},", ll))
      ));
    env_logger::init();

    let cfg = Config::from_env().map_err(startup_error)?;

    let pg_pool = Data::new(db::connect(&cfg.database_url, cfg.pool_size).map_err(startup_error)?);
    {
        let conn = pg_pool.get().map_err(|e| startup_error(e.into()))?;
        db::migrate::run(&conn).map_err(startup_error)?;
    }

    let tmdb: api::Tmdb = Data::new(match &cfg.tmdb {
        Some(tmdb_cfg) => Some(TmdbClient::new(tmdb_cfg).map_err(startup_error)?),
        None => {
            warn!("TMDB_API_KEY is not set, movies will be stored without TMDB data");
            None
        }
    });

    // Held here so the last handle drops after the runtime stops.
    let app_tmdb = tmdb.clone();

    System::new().block_on(async move {
        let reconciler = ReconcileDaemon::start(
            pg_pool.clone(),
            cfg.tracked_lists_dir.clone(),
            cfg.reconcile_every,
        );

        let bind = cfg.bind.clone();
        let cfg = Data::new(cfg);

        info!("Starting server at: {}", &bind);

        HttpServer::new(move || {
            App::new()
                .app_data(pg_pool.clone())
                .app_data(app_tmdb.clone())
                .app_data(cfg.clone())
                .app_data(reconciler.clone())
                .app_data(MultipartFormConfig::default().total_limit(UPLOAD_LIMIT))
                .wrap(middleware::Logger::default())
                .configure(api::configure)
        })
        .bind(&bind)?
        .max_connections(1000)
        .run()
        .await
    })
}
