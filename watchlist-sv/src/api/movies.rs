use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::web::Json;
use actix_web::{delete, get, patch, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{client, Tmdb};
use crate::config::Config;
use crate::core::action;
use crate::core::action::Distinct;
use crate::core::error::Error;
use crate::core::export::{self as exporter, ExportRequest};
use crate::core::listing::ListingQuery;
use crate::core::CreateMovieParams;
use crate::db::DbConnectionPool;

#[get("/api/movies")]
pub async fn list(
    req: HttpRequest,
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let query = ListingQuery::parse(req.query_string())?;

    let page = web::block(move || {
        let conn = pool.get()?;
        action::list_movies(&conn, &cfg.tracked_lists_dir, &query)
    }).await??;

    Ok(HttpResponse::Ok().json(page))
}

#[get("/api/movies/stats")]
pub async fn stats(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    let stats = web::block(move || {
        let conn = pool.get()?;
        action::movie_stats(&conn)
    }).await??;

    Ok(HttpResponse::Ok().json(stats))
}

async fn distinct(pool: web::Data<DbConnectionPool>, kind: Distinct) -> Result<HttpResponse, Error> {
    let values = web::block(move || {
        let conn = pool.get()?;
        action::distinct_values(&conn, kind)
    }).await??;

    Ok(HttpResponse::Ok().json(values))
}

#[get("/api/movies/directors")]
pub async fn directors(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::Directors).await
}

#[get("/api/movies/countries")]
pub async fn countries(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::Countries).await
}

#[get("/api/movies/genres")]
pub async fn genres(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::Genres).await
}

#[get("/api/movies/original-languages")]
pub async fn original_languages(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::OriginalLanguages).await
}

#[get("/api/movies/production-companies")]
pub async fn production_companies(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::ProductionCompanies).await
}

#[get("/api/movies/spoken-languages")]
pub async fn spoken_languages(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::SpokenLanguages).await
}

#[get("/api/movies/actors")]
pub async fn actors(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::Actors).await
}

#[get("/api/movies/writers")]
pub async fn writers(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::Writers).await
}

#[get("/api/movies/producers")]
pub async fn producers(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    distinct(pool, Distinct::Producers).await
}

#[get("/api/movies/export")]
pub async fn export(
    req: HttpRequest,
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let export_req = ExportRequest::parse(req.query_string())?;

    let rendered = web::block(move || {
        let conn = pool.get()?;
        exporter::export_movies(&conn, &cfg.tracked_lists_dir, &export_req)
    }).await??;

    Ok(HttpResponse::Ok()
        .content_type(rendered.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(rendered.filename)],
        })
        .body(rendered.body))
}

#[post("/api/movies/recache")]
pub async fn recache(pool: web::Data<DbConnectionPool>, tmdb: Tmdb) -> Result<HttpResponse, Error> {
    let result = web::block(move || {
        let tmdb = action::require(client(&tmdb))?;
        let conn = pool.get()?;
        action::recache(&conn, Some(tmdb))
    }).await??;

    Ok(HttpResponse::Ok().json(result))
}

#[post("/api/movies/clear-cache")]
pub async fn clear_cache(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    let result = web::block(move || {
        let conn = pool.get()?;
        action::clear_cache(&conn)
    }).await??;

    Ok(HttpResponse::Ok().json(result))
}

#[post("/api/movies/process-tracked-lists")]
pub async fn process_tracked_lists(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let result = web::block(move || {
        let conn = pool.get()?;
        action::process_tracked_lists(&conn, &cfg.tracked_lists_dir)
    }).await??;

    Ok(HttpResponse::Ok().json(result))
}

#[post("/api/movies")]
pub async fn create(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
    tmdb: Tmdb,
    req: Json<CreateMovieParams>,
) -> Result<HttpResponse, Error> {
    let movie = web::block(move || {
        let conn = pool.get()?;
        action::add_movie(&conn, client(&tmdb), &cfg.tracked_lists_dir, req.into_inner())
    }).await??;

    Ok(HttpResponse::Created().json(movie))
}

#[get("/api/movies/{movie_id}")]
pub async fn get_one(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
    movie_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let movie = web::block(move || {
        let conn = pool.get()?;
        action::find_movie(&conn, &cfg.tracked_lists_dir, movie_id.into_inner())
    }).await??;

    Ok(HttpResponse::Ok().json(movie))
}

#[derive(Debug, Deserialize)]
pub struct FavoriteBody {
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct NotesBody {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeenBeforeBody {
    pub seen_before: bool,
}

#[patch("/api/movies/{movie_id}/favorite")]
pub async fn set_favorite(
    pool: web::Data<DbConnectionPool>,
    movie_id: web::Path<Uuid>,
    req: Json<FavoriteBody>,
) -> Result<HttpResponse, Error> {
    let updated = web::block(move || {
        let conn = pool.get()?;
        action::set_favorite(&conn, movie_id.into_inner(), req.is_favorite)
    }).await??;

    Ok(HttpResponse::Ok().json(updated))
}

#[patch("/api/movies/{movie_id}/notes")]
pub async fn set_notes(
    pool: web::Data<DbConnectionPool>,
    movie_id: web::Path<Uuid>,
    req: Json<NotesBody>,
) -> Result<HttpResponse, Error> {
    let updated = web::block(move || {
        let conn = pool.get()?;
        action::set_notes(&conn, movie_id.into_inner(), req.notes.as_deref())
    }).await??;

    Ok(HttpResponse::Ok().json(updated))
}

#[patch("/api/movies/{movie_id}/seen-before")]
pub async fn set_seen_before(
    pool: web::Data<DbConnectionPool>,
    movie_id: web::Path<Uuid>,
    req: Json<SeenBeforeBody>,
) -> Result<HttpResponse, Error> {
    let updated = web::block(move || {
        let conn = pool.get()?;
        action::set_seen_before(&conn, movie_id.into_inner(), req.seen_before)
    }).await??;

    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/api/movies/{movie_id}")]
pub async fn delete(
    pool: web::Data<DbConnectionPool>,
    movie_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let deleted = web::block(move || {
        let conn = pool.get()?;
        action::delete_movie(&conn, movie_id.into_inner())
    }).await??;

    Ok(HttpResponse::Ok().json(deleted))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use crate::api::testing::{config, no_tmdb, unreachable_pool};

    use super::*;

    #[actix_web::test]
    async fn rejects_invalid_listing_params() {
        let app = test::init_service(App::new()
            .app_data(unreachable_pool())
            .app_data(config())
            .service(list)).await;

        for uri in &["/api/movies?limit=0", "/api/movies?limit=10001", "/api/movies?year_min=abc", "/api/movies?favorites_only=maybe"] {
            let res = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn rejects_unknown_export_format() {
        let app = test::init_service(App::new()
            .app_data(unreachable_pool())
            .app_data(config())
            .service(export)).await;

        for uri in &["/api/movies/export?format=xml", "/api/movies/export?format=csv&runtime_min=long"] {
            let res = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn recache_without_tmdb_is_unavailable() {
        let app = test::init_service(App::new()
            .app_data(unreachable_pool())
            .app_data(no_tmdb())
            .service(recache)).await;

        let res = test::call_service(&app, test::TestRequest::post().uri("/api/movies/recache").to_request()).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
