use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{client, Tmdb};
use crate::core::action;
use crate::core::error::Error;
use crate::db::DbConnectionPool;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub title: Option<String>,
    pub year: Option<i32>,
}

#[get("/api/movies/search-tmdb")]
pub async fn search(tmdb: Tmdb, params: web::Query<SearchParams>) -> Result<HttpResponse, Error> {
    let params = params.into_inner();
    let found = web::block(move || {
        action::search_tmdb(client(&tmdb), params.title.as_deref(), params.year)
    }).await??;

    Ok(HttpResponse::Ok().json(found))
}

#[get("/api/movies/tmdb/{tmdb_id}/details")]
pub async fn details(tmdb: Tmdb, tmdb_id: web::Path<i64>) -> Result<HttpResponse, Error> {
    let details = web::block(move || action::tmdb_details(client(&tmdb), tmdb_id.into_inner())).await??;

    Ok(HttpResponse::Ok().json(details))
}

#[get("/api/movies/director/{name}")]
pub async fn director_movies(
    pool: web::Data<DbConnectionPool>,
    tmdb: Tmdb,
    name: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let movies = web::block(move || {
        let conn = pool.get()?;
        action::director_movies(&conn, client(&tmdb), &name)
    }).await??;

    Ok(HttpResponse::Ok().json(movies))
}

#[get("/api/streaming-services")]
pub async fn streaming_services(tmdb: Tmdb) -> Result<HttpResponse, Error> {
    let services = web::block(move || action::streaming_services(client(&tmdb))).await??;

    Ok(HttpResponse::Ok().json(services))
}

#[get("/api/movies/{movie_id}/collection")]
pub async fn collection(
    pool: web::Data<DbConnectionPool>,
    tmdb: Tmdb,
    movie_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let movies = web::block(move || {
        let conn = pool.get()?;
        action::collection_movies(&conn, client(&tmdb), movie_id.into_inner())
    }).await??;

    Ok(HttpResponse::Ok().json(movies))
}

#[get("/api/movies/{movie_id}/similar")]
pub async fn similar(
    pool: web::Data<DbConnectionPool>,
    tmdb: Tmdb,
    movie_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let movies = web::block(move || {
        let conn = pool.get()?;
        action::similar_movies(&conn, client(&tmdb), movie_id.into_inner())
    }).await??;

    Ok(HttpResponse::Ok().json(movies))
}

#[derive(Debug, Deserialize)]
pub struct StreamingParams {
    pub country_code: Option<String>,
}

/// Served from cached TMDB data, so TMDB need not be configured.
#[get("/api/movies/{movie_id}/streaming")]
pub async fn streaming(
    pool: web::Data<DbConnectionPool>,
    movie_id: web::Path<Uuid>,
    params: web::Query<StreamingParams>,
) -> Result<HttpResponse, Error> {
    let info = web::block(move || {
        let conn = pool.get()?;
        action::streaming(&conn, movie_id.into_inner(), params.country_code.as_deref())
    }).await??;

    Ok(HttpResponse::Ok().json(info))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use crate::api::testing::{no_tmdb, unreachable_pool};

    use super::*;

    #[actix_web::test]
    async fn tmdb_routes_need_a_client() {
        let app = test::init_service(App::new()
            .app_data(no_tmdb())
            .service(search)
            .service(details)
            .service(streaming_services)).await;

        for uri in &["/api/movies/search-tmdb?title=Heat", "/api/movies/tmdb/949/details", "/api/streaming-services"] {
            let res = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn rejects_non_numeric_year() {
        let app = test::init_service(App::new().app_data(no_tmdb()).service(search)).await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/api/movies/search-tmdb?title=Heat&year=soon").to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn similar_reports_database_failure() {
        let app = test::init_service(App::new()
            .app_data(unreachable_pool())
            .app_data(no_tmdb())
            .service(similar)).await;

        let uri = format!("/api/movies/{}/similar", uuid::Uuid::nil());
        let res = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
