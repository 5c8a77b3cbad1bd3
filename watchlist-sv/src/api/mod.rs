use std::convert::Infallible;

use actix_web::http::header;
use actix_web::web::{Bytes, ServiceConfig};
use actix_web::{get, web, HttpResponse, Responder};
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::error;
use serde_json::{json, Value};

use crate::tmdb::TmdbClient;

pub mod import;
pub mod movies;
pub mod preferences;
pub mod profile;
pub mod tmdb;

pub type Tmdb = web::Data<Option<TmdbClient>>;

pub fn client(tmdb: &Option<TmdbClient>) -> Option<&TmdbClient> {
    tmdb.as_ref()
}

#[get("/")]
pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(json!({"message": "Letterboxd Watchlist API"}))
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}

/// Streams progress events as Server-Sent Events.
pub fn event_stream(rx: UnboundedReceiver<Value>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(rx.map(|event| Ok::<_, Infallible>(Bytes::from(format!("data: {}\n\n", event)))))
}

/// Runs a long import off the request, on the blocking pool.
pub fn spawn_blocking<F>(work: F)
where
    F: FnOnce() + Send + 'static,
{
    actix_web::rt::spawn(async move {
        if let Err(err) = web::block(work).await {
            error!("background import was cancelled: {}", err);
        }
    });
}

/// Every route. Fixed `/api/movies/...` paths go before `/api/movies/{id}`.
pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(root)
        .service(health)
        .service(import::upload_local)
        .service(import::upload_csv)
        .service(import::preview_csv)
        .service(import::process_with_selections)
        .service(movies::list)
        .service(movies::stats)
        .service(movies::directors)
        .service(movies::countries)
        .service(movies::genres)
        .service(movies::original_languages)
        .service(movies::production_companies)
        .service(movies::spoken_languages)
        .service(movies::actors)
        .service(movies::writers)
        .service(movies::producers)
        .service(movies::export)
        .service(tmdb::search)
        .service(tmdb::details)
        .service(tmdb::director_movies)
        .service(tmdb::streaming_services)
        .service(movies::recache)
        .service(movies::clear_cache)
        .service(movies::process_tracked_lists)
        .service(movies::create)
        .service(movies::get_one)
        .service(movies::set_favorite)
        .service(movies::set_notes)
        .service(movies::set_seen_before)
        .service(movies::delete)
        .service(tmdb::collection)
        .service(tmdb::similar)
        .service(tmdb::streaming)
        .service(preferences::list_directors)
        .service(preferences::add_director)
        .service(preferences::remove_director)
        .service(preferences::list_countries)
        .service(preferences::add_country)
        .service(preferences::remove_country)
        .service(profile::export)
        .service(profile::import);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::time::Duration;

    use actix_web::web;
    use diesel::pg::PgConnection;
    use diesel::r2d2::ConnectionManager;

    use crate::config::{Config, DEFAULT_BIND};
    use crate::db::DbConnectionPool;

    use super::Tmdb;

    // Never connects; enough for requests rejected before any query runs.
    pub fn unreachable_pool() -> web::Data<DbConnectionPool> {
        let manager = ConnectionManager::<PgConnection>::new("postgres://localhost:1/none");
        web::Data::new(r2d2::Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_millis(10))
            .build_unchecked(manager))
    }

    pub fn config() -> web::Data<Config> {
        web::Data::new(Config {
            database_url: "postgres://localhost:1/none".to_string(),
            bind: DEFAULT_BIND.to_string(),
            pool_size: 1,
            tmdb: None,
            tracked_lists_dir: PathBuf::from("tracked-lists"),
            watchlist_csv: PathBuf::from("watchlist.csv"),
            reconcile_every: chrono::Duration::seconds(300),
        })
    }

    pub fn no_tmdb() -> Tmdb {
        web::Data::new(None)
    }
}

#[cfg(test)]
mod tests {
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use crate::ingest::progress::Events;

    use super::*;

    #[actix_web::test]
    async fn serves_banner_and_health() {
        let app = test::init_service(App::new().service(root).service(health)).await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["message"], json!("Letterboxd Watchlist API"));

        let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn streams_events_as_sse() {
        let (events, rx) = Events::channel();
        events.send(&json!({"current": 1, "done": false}));
        events.send(&json!({"done": true}));
        drop(events);

        let res = event_stream(rx);
        assert_eq!(res.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        let body = to_bytes(res.into_body()).await.unwrap();
        assert_eq!(body, Bytes::from("data: {\"current\":1,\"done\":false}\n\ndata: {\"done\":true}\n\n"));
    }
}
