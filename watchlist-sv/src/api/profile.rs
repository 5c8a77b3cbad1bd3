use std::sync::Mutex;

use actix_multipart::form::tempfile::TempFile;
use actix_multipart::form::MultipartForm;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::web::Json;
use actix_web::{post, web, HttpResponse};
use log::{error, info};
use serde::Deserialize;
use serde_json::Value;

use crate::api::{client, event_stream, Tmdb};
use crate::config::Config;
use crate::core::error::Error;
use crate::core::profile;
use crate::db::DbConnectionPool;
use crate::dmn::reconciler::ReconcileDaemon;
use crate::ingest::progress::Events;

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default = "yes")]
    pub include_tmdb_data: bool,
    #[serde(default)]
    pub preferences: Option<Value>,
}

impl Default for ExportRequest {
    fn default() -> Self {
        ExportRequest { include_tmdb_data: true, preferences: None }
    }
}

#[post("/api/export-profile")]
pub async fn export(
    pool: web::Data<DbConnectionPool>,
    req: Option<Json<ExportRequest>>,
) -> Result<HttpResponse, Error> {
    let req = req.map(Json::into_inner).unwrap_or_default();

    let (archive, filename) = web::block(move || {
        let conn = pool.get()?;
        profile::export_profile(&conn, req.include_tmdb_data, req.preferences.unwrap_or(Value::Null))
    }).await??;

    Ok(HttpResponse::Ok()
        .content_type("application/zip")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        })
        .body(archive))
}

#[derive(Debug, MultipartForm)]
pub struct ProfileUpload {
    pub file: TempFile,
}

#[post("/api/import-profile")]
pub async fn import(
    pool: web::Data<DbConnectionPool>,
    cfg: web::Data<Config>,
    tmdb: Tmdb,
    daemon: web::Data<Mutex<ReconcileDaemon>>,
    MultipartForm(form): MultipartForm<ProfileUpload>,
) -> Result<HttpResponse, Error> {
    match form.file.file_name.as_deref() {
        Some(name) if name.ends_with(".zip") => info!("received profile {} ({} bytes)", name, form.file.size),
        _ => return Err(Error::BadRequest("File must be a ZIP file".to_string())),
    }
    let bytes = std::fs::read(form.file.file.path())?;
    let data = profile::unzip_profile(&bytes)?;
    let (events, rx) = Events::channel();

    let lists_dir = cfg.tracked_lists_dir.clone();
    let work_pool = pool.clone();
    let work = web::block(move || match work_pool.get() {
        Ok(conn) => profile::run_import(&conn, client(&tmdb), &cfg.tracked_lists_dir, &data, &events),
        Err(err) => {
            events.error(format!("Error during import: {}", err));
            false
        }
    });

    // Reconciling is handed to the daemon when the import left it undone.
    actix_web::rt::spawn(async move {
        match work.await {
            Ok(true) => ReconcileDaemon::request(daemon, pool, lists_dir),
            Ok(false) => {}
            Err(err) => error!("profile import was cancelled: {}", err),
        }
    });

    Ok(event_stream(rx))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::App;

    use crate::api::testing::unreachable_pool;

    use super::*;

    #[test]
    fn export_request_defaults_to_tmdb_data() {
        let req: ExportRequest = serde_json::from_str("{}").unwrap();
        assert!(req.include_tmdb_data);
        assert!(req.preferences.is_none());

        let req: ExportRequest = serde_json::from_str(r#"{"include_tmdb_data": false, "preferences": {"theme": "dark"}}"#).unwrap();
        assert!(!req.include_tmdb_data);
        assert_eq!(req.preferences.unwrap()["theme"], "dark");

        assert!(ExportRequest::default().include_tmdb_data);
    }

    #[actix_web::test]
    async fn export_reports_database_failure() {
        let app = init_service(App::new()
            .app_data(unreachable_pool())
            .service(export)).await;

        let res = call_service(&app, TestRequest::post().uri("/api/export-profile").to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
