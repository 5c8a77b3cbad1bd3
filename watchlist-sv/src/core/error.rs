use actix_web::error::BlockingError;
use actix_web::http::header::HeaderName;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("error reading file: {0}")]
    ReadFileError(#[from] std::io::Error),
    #[error("error querying database: {0}")]
    DBQueryError(#[from] diesel::result::Error),
    #[error("error getting db connection from pool: {0}")]
    DBPoolError(#[from] r2d2::Error),
    #[error("error serializing/deserializing json: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("error reading csv: {0}")]
    CsvError(#[from] csv::Error),
    #[error("{0}")]
    InvalidCsv(String),
    #[error("error reading archive: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("error calling tmdb: {0}")]
    TmdbRequestError(#[from] reqwest::Error),
    #[error("TMDB API is not configured")]
    TmdbUnavailable,
    #[error("invalid tracked list column: {0}")]
    InvalidColumn(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Duplicate { id: Uuid, message: String },
    #[error("blocking task was cancelled")]
    Blocking(#[from] BlockingError),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidCsv(_) | Error::CsvError(_) | Error::ZipError(_) |
            Error::InvalidColumn(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Duplicate { .. } => StatusCode::CONFLICT,
            Error::TmdbUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::TmdbRequestError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        }

        let mut res = HttpResponse::build(status);
        if let Error::Duplicate { id, .. } = self {
            res.insert_header((HeaderName::from_static("x-movie-id"), id.to_string()));
        }

        res.json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        assert_eq!(Error::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotFound("Movie not found".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::TmdbUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            Error::DBQueryError(diesel::result::Error::NotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    #[test]
    fn duplicate_carries_movie_id_header() {
        let id = Uuid::new_v4();
        let res = Error::Duplicate { id, message: "Movie already exists".into() }.error_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(res.headers().get("x-movie-id").unwrap().to_str().unwrap(), id.to_string());
    }
}
