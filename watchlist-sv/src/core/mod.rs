use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::{AsChangeset, Identifiable, Insertable, Queryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::schema::{favorite_directors, movies, seen_countries};
use crate::tmdb::Enrichment;

pub mod action;
pub mod error;
pub mod export;
pub mod listing;
pub mod profile;

pub const MAX_NOTES_CHARS: usize = 5000;

/// Ids follow the Letterboxd URI so re-imports of the same film keep their id.
pub fn movie_id(letterboxd_uri: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, letterboxd_uri.as_bytes())
}

#[derive(Clone, Debug, Serialize, Identifiable, Insertable, Queryable)]
#[table_name="movies"]
pub struct Movie {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
    pub director: Option<String>,
    pub country: Option<String>,
    pub runtime: Option<i32>,
    pub genres: Vec<String>,
    pub tmdb_id: Option<i32>,
    pub tmdb_data: Option<Value>,
    pub is_favorite: bool,
    pub seen_before: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Movie {
    pub fn new(title: &str, year: Option<i32>, letterboxd_uri: &str, created_at: DateTime<Utc>) -> Movie {
        Movie {
            id: movie_id(letterboxd_uri),
            title: title.to_string(),
            year,
            letterboxd_uri: letterboxd_uri.to_string(),
            director: None,
            country: None,
            runtime: None,
            genres: Vec::new(),
            tmdb_id: None,
            tmdb_data: None,
            is_favorite: false,
            seen_before: false,
            notes: None,
            created_at,
            updated_at: None,
        }
    }

    pub fn enriched(mut self, enrichment: Option<Enrichment>) -> Movie {
        if let Some(e) = enrichment {
            self.director = e.director;
            self.country = e.country;
            self.runtime = e.runtime;
            self.genres = e.genres;
            self.tmdb_id = Some(e.tmdb_id);
            self.tmdb_data = Some(e.tmdb_data);
        }
        self
    }

    pub fn key(&self) -> MovieKey {
        MovieKey {
            id: self.id,
            title: self.title.clone(),
            year: self.year,
            letterboxd_uri: self.letterboxd_uri.clone(),
        }
    }

    /// Cached TMDB fields that profile imports may arrive without.
    pub fn needs_enrichment(&self) -> bool {
        self.tmdb_data.is_none() || self.director.is_none() || self.runtime.is_none() || self.genres.is_empty()
    }
}

/// The columns used to match list entries and CSV rows against stored movies.
#[derive(Clone, Debug, PartialEq, Queryable)]
pub struct MovieKey {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
}

#[derive(Clone, Debug, Default, AsChangeset)]
#[table_name="movies"]
pub struct MovieChangeset {
    pub director: Option<Option<String>>,
    pub country: Option<Option<String>>,
    pub runtime: Option<Option<i32>>,
    pub genres: Option<Vec<String>>,
    pub tmdb_id: Option<Option<i32>>,
    pub tmdb_data: Option<Option<Value>>,
    pub is_favorite: Option<bool>,
    pub seen_before: Option<bool>,
    pub notes: Option<Option<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MovieChangeset {
    fn touched() -> MovieChangeset {
        MovieChangeset {
            updated_at: Some(Utc::now()),
            ..MovieChangeset::default()
        }
    }

    pub fn enrich(e: Enrichment) -> MovieChangeset {
        MovieChangeset {
            director: Some(e.director),
            country: Some(e.country),
            runtime: Some(e.runtime),
            genres: Some(e.genres),
            tmdb_id: Some(Some(e.tmdb_id)),
            tmdb_data: Some(Some(e.tmdb_data)),
            ..MovieChangeset::touched()
        }
    }

    /// Like `enrich`, but keeps stored values TMDB has nothing for.
    pub fn fill(e: Enrichment) -> MovieChangeset {
        MovieChangeset {
            director: e.director.map(Some),
            country: e.country.map(Some),
            runtime: e.runtime.map(Some),
            genres: Some(e.genres).filter(|g| !g.is_empty()),
            tmdb_id: Some(Some(e.tmdb_id)),
            tmdb_data: Some(Some(e.tmdb_data)),
            ..MovieChangeset::touched()
        }
    }

    pub fn favorite(is_favorite: bool) -> MovieChangeset {
        MovieChangeset { is_favorite: Some(is_favorite), ..MovieChangeset::touched() }
    }

    pub fn seen_before(seen_before: bool) -> MovieChangeset {
        MovieChangeset { seen_before: Some(seen_before), ..MovieChangeset::touched() }
    }

    pub fn notes(notes: Option<String>) -> MovieChangeset {
        MovieChangeset { notes: Some(notes), ..MovieChangeset::touched() }
    }

    pub fn date_added(created_at: DateTime<Utc>) -> MovieChangeset {
        MovieChangeset { created_at: Some(created_at), ..MovieChangeset::touched() }
    }
}

/// Trims notes, maps blank to `None` and caps the length.
pub fn clean_notes(notes: Option<&str>) -> Option<String> {
    notes.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(MAX_NOTES_CHARS).collect())
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateMovieParams {
    pub title: Option<String>,
    pub year: Option<Value>,
    pub letterboxd_uri: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub seen_before: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidMovieParams {
    pub title: String,
    pub year: i32,
    pub letterboxd_uri: Option<String>,
    pub notes: Option<String>,
    pub is_favorite: bool,
    pub seen_before: bool,
}

impl CreateMovieParams {
    pub fn validate(self) -> Result<ValidMovieParams, error::Error> {
        let title = self.title.as_deref().map(str::trim).unwrap_or("");
        if title.is_empty() {
            return Err(error::Error::BadRequest("Title is required".to_string()));
        }

        let year = self.year.as_ref()
            .and_then(Value::as_i64)
            .filter(|y| (1888..=2100).contains(y))
            .ok_or_else(|| error::Error::BadRequest("Valid year is required (1888-2100)".to_string()))?;

        Ok(ValidMovieParams {
            title: title.to_string(),
            year: year as i32,
            letterboxd_uri: self.letterboxd_uri.as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            notes: clean_notes(self.notes.as_deref()),
            is_favorite: self.is_favorite,
            seen_before: self.seen_before,
        })
    }
}

/// A movie with its cached TMDB payload and tracked list flags.
#[derive(Clone, Debug, Serialize)]
pub struct MovieDetail {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
    pub director: Option<String>,
    pub country: Option<String>,
    pub runtime: Option<i32>,
    pub genres: Vec<String>,
    pub tmdb_id: Option<i32>,
    pub tmdb_data: Option<Value>,
    pub is_favorite: bool,
    pub seen_before: bool,
    pub notes: String,
    pub date_added: String,
    #[serde(flatten)]
    pub lists: BTreeMap<String, bool>,
}

impl MovieDetail {
    pub fn new(movie: Movie, lists: BTreeMap<String, bool>) -> MovieDetail {
        MovieDetail {
            id: movie.id,
            title: movie.title,
            year: movie.year,
            letterboxd_uri: movie.letterboxd_uri,
            director: movie.director,
            country: movie.country,
            runtime: movie.runtime,
            genres: movie.genres,
            tmdb_id: movie.tmdb_id,
            tmdb_data: movie.tmdb_data,
            is_favorite: movie.is_favorite,
            seen_before: movie.seen_before,
            notes: movie.notes.unwrap_or_default(),
            date_added: movie.created_at.to_rfc3339(),
            lists,
        }
    }
}

#[derive(Clone, Debug, Serialize, Queryable)]
pub struct FavoriteDirector {
    pub id: i32,
    pub director_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[table_name="favorite_directors"]
pub struct NewFavoriteDirector<'a> {
    pub director_name: &'a str,
}

#[derive(Clone, Debug, Serialize, Queryable)]
pub struct SeenCountry {
    pub id: i32,
    pub country_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[table_name="seen_countries"]
pub struct NewSeenCountry<'a> {
    pub country_name: &'a str,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(body: Value) -> CreateMovieParams {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn ids_follow_uri() {
        assert_eq!(movie_id("https://boxd.it/1"), movie_id("https://boxd.it/1"));
        assert_ne!(movie_id("https://boxd.it/1"), movie_id("https://boxd.it/2"));
    }

    #[test]
    fn validates_new_movies() {
        let ok = params(json!({"title": "  Heat ", "year": 1995, "letterboxd_uri": " ", "notes": " great "}))
            .validate()
            .unwrap();
        assert_eq!(ok.title, "Heat");
        assert_eq!(ok.letterboxd_uri, None);
        assert_eq!(ok.notes.as_deref(), Some("great"));
        assert!(!ok.is_favorite);

        assert!(params(json!({"year": 1995})).validate().is_err());
        assert!(params(json!({"title": "Heat"})).validate().is_err());
        assert!(params(json!({"title": "Heat", "year": "1995"})).validate().is_err());
        assert!(params(json!({"title": "Heat", "year": 1700})).validate().is_err());
    }

    #[test]
    fn notes_are_capped() {
        let long = "x".repeat(MAX_NOTES_CHARS + 10);
        assert_eq!(clean_notes(Some(&long)).unwrap().chars().count(), MAX_NOTES_CHARS);
        assert_eq!(clean_notes(Some("   ")), None);
    }

    #[test]
    fn detail_flattens_list_flags() {
        let movie = Movie::new("Heat", Some(1995), "https://boxd.it/2bRu", Utc::now());
        let mut lists = BTreeMap::new();
        lists.insert("is_imdb_t250".to_string(), true);

        let body = serde_json::to_value(MovieDetail::new(movie, lists)).unwrap();
        assert_eq!(body["is_imdb_t250"], json!(true));
        assert_eq!(body["notes"], json!(""));
        assert_eq!(body["genres"], json!([]));
    }

    #[test]
    fn enrichment_fills_fields() {
        let e = Enrichment {
            tmdb_id: 949,
            director: Some("Michael Mann".into()),
            country: None,
            runtime: Some(170),
            genres: vec!["Crime".into()],
            tmdb_data: json!({"id": 949}),
        };
        let movie = Movie::new("Heat", Some(1995), "u", Utc::now()).enriched(Some(e));
        assert_eq!(movie.tmdb_id, Some(949));
        assert!(!movie.needs_enrichment());
        assert!(Movie::new("Heat", Some(1995), "u", Utc::now()).needs_enrichment());
    }
}
