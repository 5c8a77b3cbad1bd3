use actix_multipart::form::tempfile::TempFile;
use actix_multipart::form::text::Text;
use actix_multipart::form::MultipartForm;
use actix_web::{post, web, HttpResponse};
use log::info;

use crate::api::{client, event_stream, spawn_blocking, Tmdb};
use crate::config::Config;
use crate::core::error::Error;
use crate::db::DbConnectionPool;
use crate::ingest::pipeline::{self, Importer, Selections};
use crate::ingest::progress::Events;

#[derive(Debug, MultipartForm)]
pub struct CsvUpload {
    pub file: TempFile,
}

#[derive(Debug, MultipartForm)]
pub struct SelectionsUpload {
    pub file: TempFile,
    pub selections: Text<String>,
}

/// Reads an uploaded watchlist, refusing anything not named `.csv`.
fn read_csv(file: &TempFile) -> Result<Vec<u8>, Error> {
    match file.file_name.as_deref() {
        Some(name) if name.ends_with(".csv") => {
            info!("received {} ({} bytes)", name, file.size);
            Ok(std::fs::read(file.file.path())?)
        }
        _ => Err(Error::BadRequest("File must be a CSV file".to_string())),
    }
}

#[post("/api/upload")]
pub async fn upload_local(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
    tmdb: Tmdb,
) -> HttpResponse {
    let (events, rx) = Events::channel();

    spawn_blocking(move || match pool.get() {
        Ok(conn) => Importer { conn: &conn, tmdb: client(&tmdb), lists_dir: &cfg.tracked_lists_dir }
            .run_local_csv(&cfg.watchlist_csv, &events),
        Err(err) => events.error(format!("Error processing CSV: {}", err)),
    });

    event_stream(rx)
}

#[post("/api/upload-csv")]
pub async fn upload_csv(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
    tmdb: Tmdb,
    MultipartForm(form): MultipartForm<CsvUpload>,
) -> Result<HttpResponse, Error> {
    let bytes = read_csv(&form.file)?;
    let (events, rx) = Events::channel();

    spawn_blocking(move || match pool.get() {
        Ok(conn) => Importer { conn: &conn, tmdb: client(&tmdb), lists_dir: &cfg.tracked_lists_dir }
            .run_csv(&bytes, &events),
        Err(err) => events.error(format!("Error processing CSV: {}", err)),
    });

    Ok(event_stream(rx))
}

#[post("/api/preview-csv")]
pub async fn preview_csv(
    pool: web::Data<DbConnectionPool>,
    MultipartForm(form): MultipartForm<CsvUpload>,
) -> Result<HttpResponse, Error> {
    let bytes = read_csv(&form.file)?;

    let preview = web::block(move || {
        let conn = pool.get()?;
        pipeline::preview_csv(&conn, &bytes)
    }).await??;

    Ok(HttpResponse::Ok().json(preview))
}

#[post("/api/process-csv-with-selections")]
pub async fn process_with_selections(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
    tmdb: Tmdb,
    MultipartForm(form): MultipartForm<SelectionsUpload>,
) -> Result<HttpResponse, Error> {
    let bytes = read_csv(&form.file)?;
    let selections = Selections::parse(&form.selections)?;
    info!(
        "processing selections: {} to add, {} to remove",
        selections.movies_to_add.len(),
        selections.movies_to_remove_ids.len(),
    );
    let (events, rx) = Events::channel();

    spawn_blocking(move || match pool.get() {
        Ok(conn) => Importer { conn: &conn, tmdb: client(&tmdb), lists_dir: &cfg.tracked_lists_dir }
            .run_selections(&bytes, &selections, &events),
        Err(err) => events.error(format!("Error processing CSV: {}", err)),
    });

    Ok(event_stream(rx))
}

#[cfg(test)]
mod tests {
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};

    use crate::api::testing::{config, no_tmdb, unreachable_pool};

    use super::*;

    fn multipart(fields: &[(&str, Option<&str>, &str)]) -> (String, Vec<u8>) {
        let boundary = "----watchlist-boundary";
        let mut body = String::new();
        for (name, filename, content) in fields {
            body.push_str(&format!("--{}\r\n", boundary));
            match filename {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/csv\r\n\r\n",
                    name, f,
                )),
                None => body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", boundary));
        (format!("multipart/form-data; boundary={}", boundary), body.into_bytes())
    }

    #[actix_web::test]
    async fn rejects_files_not_named_csv() {
        let app = test::init_service(App::new()
            .app_data(unreachable_pool())
            .service(preview_csv)).await;
        let (content_type, body) = multipart(&[("file", Some("watchlist.txt"), "Name,Year\n")]);

        let req = test::TestRequest::post()
            .uri("/api/preview-csv")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "File must be a CSV file");
    }

    #[actix_web::test]
    async fn rejects_malformed_selections() {
        let app = test::init_service(App::new()
            .app_data(unreachable_pool())
            .app_data(config())
            .app_data(no_tmdb())
            .service(process_with_selections)).await;
        let (content_type, body) = multipart(&[
            ("file", Some("watchlist.csv"), "Date,Name,Year,Letterboxd URI\n"),
            ("selections", None, "[1, 2]"),
        ]);

        let req = test::TestRequest::post()
            .uri("/api/process-csv-with-selections")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
