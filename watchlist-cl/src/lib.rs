use std::collections::BTreeMap;

use log::debug;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::WatchlistError::UnexpectedStatusCode;

pub struct WatchlistConfig {
    pub url: String,
}

impl WatchlistConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// A stored movie as returned by `GET /api/movies/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
    pub director: Option<String>,
    pub country: Option<String>,
    pub runtime: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub tmdb_id: Option<i32>,
    pub tmdb_data: Option<serde_json::Value>,
    pub is_favorite: bool,
    pub seen_before: bool,
    #[serde(default)]
    pub notes: String,
    pub date_added: String,
    /// Membership in each tracked list, keyed by column name.
    #[serde(flatten)]
    pub lists: BTreeMap<String, bool>,
}

/// One row of a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
    pub director: Option<String>,
    pub country: Option<String>,
    pub runtime: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub tmdb_id: Option<i32>,
    pub poster_url: Option<String>,
    pub original_language: Option<String>,
    pub production_company: Option<String>,
    #[serde(default)]
    pub in_collection: bool,
    pub is_favorite: bool,
    pub seen_before: bool,
    #[serde(default)]
    pub notes: String,
    pub date_added: String,
    #[serde(flatten)]
    pub lists: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    pub movies: Vec<MovieSummary>,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateMovieRequest {
    pub title: String,
    pub year: i32,
    pub letterboxd_uri: Option<String>,
    pub notes: Option<String>,
    pub is_favorite: bool,
    pub seen_before: bool,
}

#[derive(Error, Debug)]
pub enum WatchlistError {
    #[error("error calling server: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    UnexpectedStatusCode(StatusCode),
    #[error("movie already exists: {id}")]
    Duplicate { id: Uuid },
}

fn get_movie_request(cfg: &WatchlistConfig, id: Uuid) -> RequestBuilder {
    reqwest::Client::new()
        .get(cfg.endpoint(&format!("movies/{}", id)))
        .header("Accept", "application/json")
}

/// `params` are passed through as listing query pairs, e.g. `("sort_by", "year")`.
fn list_movies_request(cfg: &WatchlistConfig, params: &[(&str, &str)]) -> RequestBuilder {
    reqwest::Client::new()
        .get(cfg.endpoint("movies"))
        .query(params)
        .header("Accept", "application/json")
}

pub async fn get_movie(
    cfg: &WatchlistConfig,
    id: Uuid,
) -> Result<Option<Movie>, WatchlistError> {
    let res = get_movie_request(cfg, id).send().await?;

    match res.status() {
        StatusCode::OK => Ok(Some(res.json::<Movie>().await?)),
        StatusCode::NOT_FOUND => Ok(None),
        unexpected => Err(UnexpectedStatusCode(unexpected))
    }
}

pub async fn list_movies(
    cfg: &WatchlistConfig,
    params: &[(&str, &str)],
) -> Result<ListingPage, WatchlistError> {
    let res = list_movies_request(cfg, params).send().await?;

    match res.status() {
        StatusCode::OK => {
            let page = res.json::<ListingPage>().await?;
            debug!("listed {} of {} movies", page.movies.len(), page.total);
            Ok(page)
        }
        unexpected => Err(UnexpectedStatusCode(unexpected))
    }
}

pub async fn add_movie(
    cfg: &WatchlistConfig,
    req: &CreateMovieRequest,
) -> Result<Movie, WatchlistError> {
    let res = reqwest::Client::new()
        .post(cfg.endpoint("movies"))
        .json(req)
        .header("Accept", "application/json")
        .send()
        .await?;

    match res.status() {
        StatusCode::CREATED => Ok(res.json::<Movie>().await?),
        StatusCode::CONFLICT => {
            let id = res.headers()
                .get("x-movie-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| Uuid::parse_str(v).ok());
            match id {
                Some(id) => Err(WatchlistError::Duplicate { id }),
                None => Err(UnexpectedStatusCode(StatusCode::CONFLICT)),
            }
        }
        unexpected => Err(UnexpectedStatusCode(unexpected))
    }
}

/// Returns false when no movie has `id`.
pub async fn set_favorite(
    cfg: &WatchlistConfig,
    id: Uuid,
    is_favorite: bool,
) -> Result<bool, WatchlistError> {
    let res = reqwest::Client::new()
        .patch(cfg.endpoint(&format!("movies/{}/favorite", id)))
        .json(&serde_json::json!({ "is_favorite": is_favorite }))
        .send()
        .await?;

    match res.status() {
        StatusCode::OK => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        unexpected => Err(UnexpectedStatusCode(unexpected))
    }
}
