use std::convert::TryFrom;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TmdbConfig;
use crate::core::error::Error;

pub mod extract;

const DETAIL_APPENDS: &str = "credits,videos,images,recommendations,similar,release_dates,watch/providers";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SearchResult {
    pub id: i64,
    pub title: String,
    pub original_title: String,
    pub release_date: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub popularity: f64,
    pub vote_count: f64,
    pub vote_average: f64,
}

impl SearchResult {
    pub fn year(&self) -> Option<i32> {
        self.release_date.as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub total_results: i64,
}

/// Fields copied onto a movie row from a TMDB details payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Enrichment {
    pub tmdb_id: i32,
    pub director: Option<String>,
    pub country: Option<String>,
    pub runtime: Option<i32>,
    pub genres: Vec<String>,
    pub tmdb_data: Value,
}

impl Enrichment {
    pub fn from_details(details: Value) -> Option<Enrichment> {
        let tmdb_id = details.get("id")
            .and_then(Value::as_i64)
            .and_then(|id| i32::try_from(id).ok())?;

        Some(Enrichment {
            tmdb_id,
            director: extract::director(&details),
            country: extract::production_countries(&details).into_iter().next(),
            runtime: details.get("runtime")
                .and_then(Value::as_i64)
                .and_then(|r| i32::try_from(r).ok()),
            genres: extract::genre_names(&details),
            tmdb_data: details,
        })
    }
}

fn title_score(candidate: &SearchResult, wanted: &str) -> f64 {
    let title = candidate.title.trim().to_lowercase();
    if title == wanted {
        return 100.0;
    }
    if title.starts_with(wanted) {
        return 80.0;
    }
    if title.contains(wanted) {
        return 60.0;
    }
    if wanted.contains(title.as_str()) {
        return 40.0;
    }

    let original = candidate.original_title.trim().to_lowercase();
    if original == wanted {
        90.0
    } else if original.contains(wanted) || wanted.contains(original.as_str()) {
        50.0
    } else {
        0.0
    }
}

/// Picks the search result most likely to be `title` released in `year`.
///
/// An exact title may be a year off (festival vs. wide release); anything
/// else must match the year exactly. Ties between identical titles are broken
/// by popularity, votes and TMDB's own ordering.
pub fn best_match<'a>(results: &'a [SearchResult], title: &str, year: Option<i32>) -> Option<&'a SearchResult> {
    let year = match year {
        Some(y) => y,
        None => return results.first(),
    };
    let wanted = title.trim().to_lowercase();

    let mut best: Option<(&SearchResult, f64)> = None;
    for (position, candidate) in results.iter().enumerate() {
        let candidate_year = match candidate.year() {
            Some(y) => y,
            None => continue,
        };
        let exact_title = candidate.title.trim().to_lowercase() == wanted;
        let year_ok = if exact_title { (candidate_year - year).abs() <= 1 } else { candidate_year == year };
        if !year_ok {
            debug!("skipping {} ({}): year mismatch", candidate.title, candidate_year);
            continue;
        }

        let mut score = title_score(candidate, &wanted);
        score += if candidate_year == year { 20.0 } else { 10.0 };
        if exact_title {
            score += (candidate.popularity / 10.0).min(30.0);
            score += (candidate.vote_count / 100.0).min(20.0);
            if candidate.vote_average > 0.0 {
                score += (candidate.vote_average * 2.0).min(15.0);
            }
        }
        score += 10usize.saturating_sub(position) as f64;

        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(m, _)| m)
}

/// Blocking TMDB v3 client. Only call it from blocking threads.
pub struct TmdbClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(cfg: &TmdbConfig) -> Result<TmdbClient, Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(TmdbClient {
            http,
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Option<Value>, Error> {
        debug!("tmdb GET {} {:?}", path, params);
        let res = self.http.get(format!("{}{}", self.base_url, path))
            .query(&[("api_key", self.api_key.as_str()), ("language", "en-US")])
            .query(params)
            .send()?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(res.error_for_status()?.json()?))
    }

    pub fn search(&self, title: &str, year: Option<i32>) -> Result<SearchPage, Error> {
        let mut params = vec![("query", title.to_string())];
        if let Some(y) = year {
            params.push(("year", y.to_string()));
        }

        match self.get("/search/movie", &params)? {
            Some(body) => Ok(serde_json::from_value(body)?),
            None => Ok(SearchPage::default()),
        }
    }

    pub fn search_movie(&self, title: &str, year: Option<i32>) -> Result<Option<SearchResult>, Error> {
        let page = self.search(title, year)?;
        let found = best_match(&page.results, title, year).cloned();
        if found.is_none() && !page.results.is_empty() {
            warn!("no tmdb result for '{}' matching year {:?}", title, year);
        }
        Ok(found)
    }

    pub fn movie_details(&self, tmdb_id: i64) -> Result<Option<Value>, Error> {
        self.get(&format!("/movie/{}", tmdb_id), &[("append_to_response", DETAIL_APPENDS.to_string())])
    }

    pub fn collection(&self, collection_id: i64) -> Result<Option<Value>, Error> {
        self.get(&format!("/collection/{}", collection_id), &[])
    }

    /// Id of the best person hit for `name`, preferring people known for directing.
    pub fn search_director(&self, name: &str) -> Result<Option<i64>, Error> {
        let body = self.get("/search/person", &[("query", name.to_string())])?;
        let people = body.as_ref()
            .and_then(|b| b.get("results"))
            .and_then(Value::as_array)
            .map(|r| r.as_slice())
            .unwrap_or(&[]);

        let director = people.iter()
            .find(|p| p.get("known_for_department").and_then(Value::as_str) == Some("Directing"))
            .or_else(|| people.first());

        Ok(director.and_then(|p| p.get("id")).and_then(Value::as_i64))
    }

    pub fn person_movie_credits(&self, person_id: i64) -> Result<Option<Value>, Error> {
        self.get(&format!("/person/{}", person_id), &[("append_to_response", "movie_credits".to_string())])
    }

    /// TMDB's full movie provider catalogue.
    pub fn watch_providers(&self) -> Result<Vec<Value>, Error> {
        let body = self.get("/watch/providers/movie", &[])?;
        Ok(body.and_then(|mut b| b.get_mut("results").map(Value::take))
            .and_then(|r| match r {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default())
    }

    /// Searches, fetches details and rejects results released more than a
    /// year away from `year`.
    pub fn enrich(&self, title: &str, year: Option<i32>) -> Result<Option<Enrichment>, Error> {
        let found = match self.search_movie(title, year)? {
            Some(r) if r.id > 0 => r,
            _ => return Ok(None),
        };

        let details = match self.movie_details(found.id)? {
            Some(d) => d,
            None => return Ok(None),
        };

        if let (Some(wanted), Some(actual)) = (year, extract::release_year(&details)) {
            if (actual - wanted).abs() > 1 {
                warn!("year mismatch for '{}': requested {}, found {} (tmdb id {})", title, wanted, actual, found.id);
                return Ok(None);
            }
        }

        Ok(Enrichment::from_details(details))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn result(id: i64, title: &str, date: &str) -> SearchResult {
        SearchResult {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            release_date: Some(date.to_string()),
            ..SearchResult::default()
        }
    }

    #[test]
    fn without_year_first_result_wins() {
        let results = vec![result(1, "Dune", "2021-09-15"), result(2, "Dune", "1984-12-14")];
        assert_eq!(best_match(&results, "Dune", None).unwrap().id, 1);
        assert!(best_match(&[], "Dune", None).is_none());
    }

    #[test]
    fn exact_year_beats_neighbouring_year() {
        let results = vec![result(1, "Dune", "2021-09-15"), result(2, "Dune", "2020-09-15")];
        assert_eq!(best_match(&results, "dune", Some(2020)).unwrap().id, 2);
    }

    #[test]
    fn exact_title_tolerates_one_year() {
        let results = vec![result(7, "Parasite", "2019-05-30")];
        assert_eq!(best_match(&results, "Parasite", Some(2020)).unwrap().id, 7);
        assert!(best_match(&results, "Parasite", Some(2021)).is_none());
    }

    #[test]
    fn inexact_title_needs_exact_year() {
        let results = vec![result(3, "Dune: Part Two", "2024-02-27")];
        assert!(best_match(&results, "Dune", Some(2023)).is_none());
        assert_eq!(best_match(&results, "Dune", Some(2024)).unwrap().id, 3);
    }

    #[test]
    fn popularity_breaks_title_ties() {
        let mut obscure = result(10, "Crash", "1996-10-04");
        obscure.popularity = 1.0;
        let mut famous = result(11, "Crash", "1996-05-17");
        famous.popularity = 300.0;
        famous.vote_count = 3000.0;
        famous.vote_average = 6.5;
        assert_eq!(best_match(&[obscure, famous], "Crash", Some(1996)).unwrap().id, 11);
    }

    #[test]
    fn original_title_counts() {
        let mut r = result(5, "The Seventh Seal", "1957-02-16");
        r.original_title = "Det sjunde inseglet".to_string();
        let other = result(6, "Unrelated", "1957-01-01");
        assert_eq!(best_match(&[other, r], "det sjunde inseglet", Some(1957)).unwrap().id, 5);
    }

    #[test]
    fn missing_release_dates_are_skipped() {
        let mut r = result(9, "Heat", "");
        r.release_date = None;
        assert!(best_match(&[r], "Heat", Some(1995)).is_none());
    }

    #[test]
    fn enrichment_from_details() {
        let details = json!({
            "id": 949,
            "runtime": 170,
            "genres": [{"name": "Action"}, {"name": "Crime"}],
            "production_countries": [{"name": "United States of America"}],
            "credits": {"crew": [{"job": "Writer", "name": "X"}, {"job": "Director", "name": "Michael Mann"}]}
        });
        let e = Enrichment::from_details(details).unwrap();
        assert_eq!(e.tmdb_id, 949);
        assert_eq!(e.director.as_deref(), Some("Michael Mann"));
        assert_eq!(e.country.as_deref(), Some("United States of America"));
        assert_eq!(e.runtime, Some(170));
        assert_eq!(e.genres, vec!["Action", "Crime"]);
        assert!(Enrichment::from_details(json!({"title": "no id"})).is_none());
    }

    #[test]
    fn search_page_tolerates_sparse_results() {
        let page: SearchPage = serde_json::from_value(json!({
            "results": [{"id": 1, "title": "Heat", "release_date": "1995-12-15", "vote_count": 10}]
        })).unwrap();
        assert_eq!(page.results[0].year(), Some(1995));
        assert_eq!(page.results[0].popularity, 0.0);
    }
}
