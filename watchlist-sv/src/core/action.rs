use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::convert::TryFrom;
use std::path::Path;

use chrono::Utc;
use diesel::pg::PgConnection;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::{CreateMovieParams, Movie, MovieChangeset, MovieDetail, clean_notes};
use crate::core::error::Error;
use crate::core::listing::{self, ListingPage, ListingQuery, MovieSummary, Stats};
use crate::db;
use crate::db::{filter, tracked};
use crate::ingest::lists::{self, ListReport};
use crate::ingest::normalize::placeholder_uri;
use crate::tmdb::{Enrichment, TmdbClient};
use crate::tmdb::extract;
use crate::tmdb::extract::StreamingService;

const SIMILAR_LIMIT: i64 = 10;
const SEARCH_RESULTS: usize = 10;

pub fn require(tmdb: Option<&TmdbClient>) -> Result<&TmdbClient, Error> {
    tmdb.ok_or(Error::TmdbUnavailable)
}

/// Tracked list columns that are both on disk and on the table.
pub fn tracked_columns(conn: &PgConnection, lists_dir: &Path) -> Result<Vec<String>, Error> {
    let existing = tracked::existing_columns(conn)?;
    Ok(lists::columns(lists_dir)?.into_iter()
        .filter(|c| existing.contains(c))
        .collect())
}

fn no_lists(columns: &[String]) -> BTreeMap<String, bool> {
    columns.iter().map(|c| (c.clone(), false)).collect()
}

fn find_or_404(conn: &PgConnection, id: Uuid) -> Result<Movie, Error> {
    db::find_one_movie(conn, id)?.ok_or_else(|| Error::NotFound("Movie not found".to_string()))
}

pub fn find_movie(conn: &PgConnection, lists_dir: &Path, id: Uuid) -> Result<MovieDetail, Error> {
    info!("finding movie id={}", id);
    let movie = find_or_404(conn, id)?;
    let columns = tracked_columns(conn, lists_dir)?;
    let flags = tracked::memberships_of(conn, &columns, id)?;
    Ok(MovieDetail::new(movie, flags))
}

pub fn list_movies(conn: &PgConnection, lists_dir: &Path, query: &ListingQuery) -> Result<ListingPage, Error> {
    info!("finding movies skip={} limit={} sorts={:?}", query.skip, query.limit, query.sorts);
    let columns = tracked_columns(conn, lists_dir)?;
    let movies = filter::load(conn, &query.filter, &columns)?;

    let sort_columns: Vec<String> = query.tracked_sort_columns().into_iter()
        .filter(|c| columns.contains(c))
        .collect();
    let sort_flags = if sort_columns.is_empty() {
        HashMap::new()
    } else {
        let ids: Vec<Uuid> = movies.iter().map(|m| m.id).collect();
        tracked::memberships(conn, &sort_columns, &ids)?
    };

    let (page, total) = listing::arrange(&movies, query, &sort_flags);
    debug!("{} movies matched, returning {}", total, page.len());

    let ids: Vec<Uuid> = page.iter().map(|m| m.id).collect();
    let flags = tracked::memberships(conn, &columns, &ids)?;
    let summaries = page.into_iter()
        .map(|m| {
            let lists = flags.get(&m.id).cloned().unwrap_or_else(|| no_lists(&columns));
            MovieSummary::new(m, lists)
        })
        .collect();

    Ok(ListingPage { movies: summaries, total, skip: query.skip, limit: query.limit })
}

pub fn movie_stats(conn: &PgConnection) -> Result<Stats, Error> {
    info!("computing collection stats");
    Ok(Stats::from_rows(&db::stats_rows(conn)?))
}

/// Facets offered as filter choices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Distinct {
    Directors,
    Countries,
    Genres,
    OriginalLanguages,
    ProductionCompanies,
    SpokenLanguages,
    Actors,
    Writers,
    Producers,
}

pub fn distinct_values(conn: &PgConnection, kind: Distinct) -> Result<Vec<String>, Error> {
    debug!("finding distinct {:?}", kind);
    let payloads = match kind {
        Distinct::Directors => return db::distinct_directors(conn),
        Distinct::Countries => return db::distinct_countries(conn),
        Distinct::Genres => {
            return Ok(db::all_genre_arrays(conn)?.into_iter()
                .flatten()
                .filter(|g| !g.is_empty())
                .collect::<BTreeSet<String>>()
                .into_iter()
                .collect());
        }
        _ => db::tmdb_payloads(conn)?,
    };

    Ok(match kind {
        Distinct::OriginalLanguages => extract::distinct(&payloads, |p| extract::original_language(p).into_iter().collect()),
        Distinct::ProductionCompanies => extract::distinct(&payloads, extract::production_companies),
        Distinct::SpokenLanguages => extract::distinct(&payloads, extract::spoken_languages),
        Distinct::Actors => extract::distinct(&payloads, extract::cast_names),
        Distinct::Writers => extract::distinct(&payloads, |p| extract::crew_names(p, &extract::WRITER_JOBS)),
        Distinct::Producers => extract::distinct(&payloads, |p| extract::crew_names(p, &extract::PRODUCER_JOBS)),
        _ => Vec::new(),
    })
}

/// TMDB fields for a new movie; lookup failures are logged and ignored.
pub fn enrich_quietly(tmdb: Option<&TmdbClient>, title: &str, year: Option<i32>) -> Option<Enrichment> {
    let client = tmdb?;
    client.enrich(title, year)
        .map_err(|err| warn!("could not enrich '{}' ({:?}): {}", title, year, err))
        .ok()
        .flatten()
}

pub fn add_movie(conn: &PgConnection, tmdb: Option<&TmdbClient>, lists_dir: &Path, params: CreateMovieParams) -> Result<MovieDetail, Error> {
    let params = params.validate()?;
    info!("creating movie {:?}", params);

    let duplicate = |id: Uuid| Error::Duplicate {
        id,
        message: format!("Movie '{}' ({}) already exists", params.title, params.year),
    };

    if let Some(existing) = db::find_existing(conn, params.letterboxd_uri.as_deref(), &params.title, params.year)? {
        return Err(duplicate(existing.id));
    }

    let uri = params.letterboxd_uri.clone()
        .unwrap_or_else(|| placeholder_uri(&params.title, params.year));
    let mut movie = Movie::new(&params.title, Some(params.year), &uri, Utc::now())
        .enriched(enrich_quietly(tmdb, &params.title, Some(params.year)));
    movie.is_favorite = params.is_favorite;
    movie.seen_before = params.seen_before;
    movie.notes = params.notes.clone();

    let created = match db::create_movie(conn, &movie)? {
        Some(m) => m,
        None => return Err(duplicate(movie.id)),
    };

    let loaded = lists::load_all(lists_dir)?;
    let columns = lists::lists_containing(&created.key(), &loaded);
    if !columns.is_empty() {
        info!("movie {} is on tracked lists {:?}", created.id, columns);
        tracked::ensure_columns(conn, &columns)?;
        for column in &columns {
            tracked::mark(conn, column, &[created.id])?;
        }
    }

    let all_columns = tracked_columns(conn, lists_dir)?;
    let flags = tracked::memberships_of(conn, &all_columns, created.id)?;
    Ok(MovieDetail::new(created, flags))
}

fn patch(conn: &PgConnection, id: Uuid, changes: &MovieChangeset) -> Result<Movie, Error> {
    db::update_movie(conn, id, changes)?.ok_or_else(|| Error::NotFound("Movie not found".to_string()))
}

#[derive(Debug, Serialize)]
pub struct FavoriteUpdated {
    pub id: Uuid,
    pub is_favorite: bool,
}

#[derive(Debug, Serialize)]
pub struct NotesUpdated {
    pub id: Uuid,
    pub notes: String,
}

#[derive(Debug, Serialize)]
pub struct SeenBeforeUpdated {
    pub id: Uuid,
    pub seen_before: bool,
}

pub fn set_favorite(conn: &PgConnection, id: Uuid, is_favorite: bool) -> Result<FavoriteUpdated, Error> {
    info!("updating movie id={} is_favorite={}", id, is_favorite);
    let movie = patch(conn, id, &MovieChangeset::favorite(is_favorite))?;
    Ok(FavoriteUpdated { id: movie.id, is_favorite: movie.is_favorite })
}

pub fn set_notes(conn: &PgConnection, id: Uuid, notes: Option<&str>) -> Result<NotesUpdated, Error> {
    info!("updating movie id={} notes", id);
    let movie = patch(conn, id, &MovieChangeset::notes(clean_notes(notes)))?;
    Ok(NotesUpdated { id: movie.id, notes: movie.notes.unwrap_or_default() })
}

pub fn set_seen_before(conn: &PgConnection, id: Uuid, seen_before: bool) -> Result<SeenBeforeUpdated, Error> {
    info!("updating movie id={} seen_before={}", id, seen_before);
    let movie = patch(conn, id, &MovieChangeset::seen_before(seen_before))?;
    Ok(SeenBeforeUpdated { id: movie.id, seen_before: movie.seen_before })
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: Uuid,
    pub message: &'static str,
}

pub fn delete_movie(conn: &PgConnection, id: Uuid) -> Result<Deleted, Error> {
    debug!("deleting movie id={}", id);
    if !db::delete_movie(conn, id)? {
        return Err(Error::NotFound("Movie not found".to_string()));
    }

    info!("deleted movie id={}", id);
    Ok(Deleted { id, message: "Movie deleted successfully" })
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TmdbCandidate {
    pub tmdb_id: i64,
    pub title: String,
    pub original_title: String,
    pub year: Option<i32>,
    pub release_date: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub vote_count: i64,
}

#[derive(Debug, Serialize)]
pub struct TmdbSearch {
    pub results: Vec<TmdbCandidate>,
    pub total_results: i64,
}

pub fn search_tmdb(tmdb: Option<&TmdbClient>, title: Option<&str>, year: Option<i32>) -> Result<TmdbSearch, Error> {
    let client = require(tmdb)?;
    let title = title.map(str::trim).filter(|t| !t.is_empty())
        .ok_or_else(|| Error::BadRequest("Title is required".to_string()))?;
    info!("searching tmdb title={} year={:?}", title, year);

    let page = client.search(title, year)?;
    let results = page.results.iter()
        .take(SEARCH_RESULTS)
        .map(|r| TmdbCandidate {
            tmdb_id: r.id,
            title: r.title.clone(),
            original_title: r.original_title.clone(),
            year: r.year(),
            release_date: r.release_date.clone().unwrap_or_default(),
            overview: r.overview.clone(),
            poster_path: r.poster_path.clone(),
            vote_count: r.vote_count as i64,
        })
        .collect();

    Ok(TmdbSearch { results, total_results: page.total_results })
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TmdbDetails {
    pub tmdb_id: Option<i64>,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub release_date: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub poster_url: Option<String>,
    pub genres: Vec<String>,
    pub original_language: String,
    pub original_language_name: Option<String>,
    pub vote_count: Option<i64>,
}

impl TmdbDetails {
    pub fn from_payload(details: &Value) -> TmdbDetails {
        let text = |key: &str| details.get(key).and_then(Value::as_str).map(str::to_string);
        let language = extract::original_language(details).unwrap_or_default();
        TmdbDetails {
            tmdb_id: details.get("id").and_then(Value::as_i64),
            title: text("title"),
            original_title: text("original_title"),
            year: extract::release_year(details),
            release_date: extract::release_date(details).unwrap_or("").to_string(),
            overview: text("overview"),
            poster_path: text("poster_path"),
            poster_url: extract::poster_url(details, "w500"),
            genres: extract::genre_names(details),
            original_language_name: Some(language.to_uppercase()).filter(|l| !l.is_empty()),
            original_language: language,
            vote_count: details.get("vote_count").and_then(Value::as_i64),
        }
    }
}

pub fn tmdb_details(tmdb: Option<&TmdbClient>, tmdb_id: i64) -> Result<TmdbDetails, Error> {
    let client = require(tmdb)?;
    info!("fetching tmdb details tmdb_id={}", tmdb_id);
    client.movie_details(tmdb_id)?
        .map(|d| TmdbDetails::from_payload(&d))
        .ok_or_else(|| Error::NotFound(format!("Movie with TMDB ID {} not found", tmdb_id)))
}

/// A film related to a stored movie, which may or may not be stored itself.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RelatedMovie {
    pub id: Option<Uuid>,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<i64>,
    pub in_db: bool,
}

impl RelatedMovie {
    fn stored(movie: &Movie) -> RelatedMovie {
        RelatedMovie {
            id: Some(movie.id),
            title: movie.title.clone(),
            year: movie.year,
            tmdb_id: movie.tmdb_id.map(i64::from),
            in_db: true,
        }
    }

    fn from_tmdb(entry: &Value) -> Option<RelatedMovie> {
        Some(RelatedMovie {
            id: None,
            title: entry.get("title").and_then(Value::as_str).unwrap_or("").to_string(),
            year: extract::release_year(entry),
            tmdb_id: Some(entry.get("id").and_then(Value::as_i64)?),
            in_db: false,
        })
    }
}

fn by_year(movies: &mut Vec<RelatedMovie>) {
    movies.sort_by_key(|m| m.year.unwrap_or(0));
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CollectionRef {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CollectionMovies {
    pub collection: Option<CollectionRef>,
    pub movies: Vec<RelatedMovie>,
}

/// Collection parts other than `current`, marked with their stored copies.
pub fn collection_parts(parts: &[Value], current: Option<i64>, stored: &[Movie]) -> Vec<RelatedMovie> {
    let by_tmdb: HashMap<i64, &Movie> = stored.iter()
        .filter_map(|m| m.tmdb_id.map(|t| (i64::from(t), m)))
        .collect();

    let mut movies: Vec<RelatedMovie> = parts.iter()
        .filter_map(RelatedMovie::from_tmdb)
        .filter(|m| m.tmdb_id != current)
        .map(|m| match m.tmdb_id.and_then(|t| by_tmdb.get(&t)) {
            Some(found) => RelatedMovie { title: m.title, year: m.year, ..RelatedMovie::stored(found) },
            None => m,
        })
        .collect();
    by_year(&mut movies);
    movies
}

pub fn collection_movies(conn: &PgConnection, tmdb: Option<&TmdbClient>, id: Uuid) -> Result<CollectionMovies, Error> {
    info!("finding collection of movie id={}", id);
    let movie = find_or_404(conn, id)?;
    let data = movie.tmdb_data.as_ref();

    let collection = match data.and_then(extract::collection).and_then(|c| {
        let cid = c.get("id").and_then(Value::as_i64)?;
        Some(CollectionRef { id: cid, name: c.get("name").and_then(Value::as_str).map(str::to_string) })
    }) {
        Some(c) => c,
        None => return Ok(CollectionMovies { collection: None, movies: Vec::new() }),
    };

    let current = movie.tmdb_id.map(i64::from);
    let stored: Vec<Movie> = db::all_movies(conn)?.into_iter()
        .filter(|m| m.tmdb_data.as_ref().and_then(extract::collection_id) == Some(collection.id))
        .collect();

    let fetched = match tmdb {
        Some(client) => client.collection(collection.id)
            .map_err(|err| warn!("could not fetch collection {}: {}", collection.id, err))
            .ok()
            .flatten(),
        None => None,
    };

    let movies = match fetched {
        Some(details) => {
            let parts = details.get("parts").and_then(Value::as_array).map(|p| p.as_slice()).unwrap_or(&[]);
            collection_parts(parts, current, &stored)
        }
        None => {
            let mut movies: Vec<RelatedMovie> = stored.iter()
                .filter(|m| m.id != movie.id)
                .map(RelatedMovie::stored)
                .collect();
            by_year(&mut movies);
            movies
        }
    };

    Ok(CollectionMovies { collection: Some(collection), movies })
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SimilarMovie {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<i32>,
    pub poster_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SimilarMovies {
    pub similar_movies: Vec<SimilarMovie>,
}

/// Stored movies TMDB lists as similar. A failed TMDB fetch yields an empty list.
pub fn similar_movies(conn: &PgConnection, tmdb: Option<&TmdbClient>, id: Uuid) -> Result<SimilarMovies, Error> {
    info!("finding movies similar to id={}", id);
    let movie = find_or_404(conn, id)?;

    let mut ids = movie.tmdb_data.as_ref().map(extract::similar_ids).unwrap_or_default();
    if ids.is_empty() {
        if let (Some(client), Some(tmdb_id)) = (tmdb, movie.tmdb_id) {
            ids = client.movie_details(i64::from(tmdb_id))
                .map_err(|err| warn!("could not fetch similar movies for {}: {}", tmdb_id, err))
                .ok()
                .flatten()
                .map(|d| extract::similar_ids(&d))
                .unwrap_or_default();
        }
    }

    let tmdb_ids: Vec<i32> = ids.into_iter().filter_map(|i| i32::try_from(i).ok()).collect();
    let similar = db::find_movies_by_tmdb_ids(conn, &tmdb_ids, movie.id, SIMILAR_LIMIT)?;

    Ok(SimilarMovies {
        similar_movies: similar.into_iter()
            .map(|m| SimilarMovie {
                poster_url: m.tmdb_data.as_ref().and_then(|d| extract::poster_url(d, "w300")),
                id: m.id,
                title: m.title,
                year: m.year,
                tmdb_id: m.tmdb_id,
            })
            .collect(),
    })
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DirectorMovies {
    pub director: String,
    pub movies: Vec<RelatedMovie>,
}

/// Stored movies followed by directing credits that are not stored, by year.
pub fn merge_director_credits(stored: &[Movie], credits: Option<&Value>) -> Vec<RelatedMovie> {
    let known: HashSet<i64> = stored.iter().filter_map(|m| m.tmdb_id.map(i64::from)).collect();
    let mut movies: Vec<RelatedMovie> = stored.iter().map(RelatedMovie::stored).collect();

    let crew = credits
        .and_then(|c| c.get("movie_credits"))
        .and_then(|c| c.get("crew"))
        .and_then(Value::as_array)
        .map(|c| c.as_slice())
        .unwrap_or(&[]);

    movies.extend(crew.iter()
        .filter(|c| c.get("job").and_then(Value::as_str) == Some("Director"))
        .filter_map(RelatedMovie::from_tmdb)
        .filter(|m| m.tmdb_id.map_or(false, |t| !known.contains(&t))));

    by_year(&mut movies);
    movies
}

pub fn director_movies(conn: &PgConnection, tmdb: Option<&TmdbClient>, name: &str) -> Result<DirectorMovies, Error> {
    info!("finding movies directed by {}", name);
    let stored = db::find_movies_by_director(conn, name)?;

    let credits = match tmdb {
        Some(client) => client.search_director(name)
            .and_then(|person| match person {
                Some(p) => client.person_movie_credits(p),
                None => Ok(None),
            })
            .map_err(|err| warn!("error fetching director movies from tmdb for '{}': {}", name, err))
            .ok()
            .flatten(),
        None => None,
    };

    Ok(DirectorMovies {
        director: name.to_string(),
        movies: merge_director_credits(&stored, credits.as_ref()),
    })
}

pub fn streaming(conn: &PgConnection, id: Uuid, region: Option<&str>) -> Result<Value, Error> {
    let region = region.map(str::trim).filter(|r| !r.is_empty()).unwrap_or(listing::DEFAULT_REGION);
    info!("finding streaming providers for id={} region={}", id, region);
    let movie = find_or_404(conn, id)?;
    Ok(extract::streaming_info(movie.tmdb_data.as_ref().unwrap_or(&Value::Null), region))
}

#[derive(Debug, Serialize)]
pub struct StreamingServices {
    pub services: Vec<StreamingService>,
}

pub fn streaming_services(tmdb: Option<&TmdbClient>) -> Result<StreamingServices, Error> {
    let client = require(tmdb)?;
    info!("fetching streaming services");
    let providers = client.watch_providers()?;
    Ok(StreamingServices { services: extract::group_streaming_services(&providers) })
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct Recached {
    pub message: &'static str,
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Refetches TMDB data for every stored movie. Failures keep the old cache.
pub fn recache(conn: &PgConnection, tmdb: Option<&TmdbClient>) -> Result<Recached, Error> {
    let client = require(tmdb)?;
    let movies = db::all_movies(conn)?;
    info!("recaching {} movies", movies.len());

    let mut result = Recached { message: "Recaching completed", total: movies.len(), ..Recached::default() };
    for movie in &movies {
        match client.enrich(&movie.title, movie.year) {
            Ok(Some(e)) => {
                db::update_movie(conn, movie.id, &MovieChangeset::enrich(e))?;
                result.updated += 1;
            }
            Ok(None) => {
                warn!("could not fetch tmdb data for {} ({:?})", movie.title, movie.year);
                result.failed += 1;
            }
            Err(err) => {
                warn!("error recaching {}: {}", movie.title, err);
                result.failed += 1;
            }
        }
    }

    info!("recached {} movies, {} failed", result.updated, result.failed);
    Ok(result)
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    pub message: &'static str,
    pub movies_deleted: usize,
}

pub fn clear_cache(conn: &PgConnection) -> Result<Cleared, Error> {
    let deleted = db::delete_all_movies(conn)?;
    info!("deleted {} movies", deleted);
    Ok(Cleared { message: "All movies deleted successfully", movies_deleted: deleted })
}

#[derive(Debug, Serialize)]
pub struct ListsProcessed {
    pub message: &'static str,
    pub results: BTreeMap<String, ListReport>,
}

pub fn process_tracked_lists(conn: &PgConnection, lists_dir: &Path) -> Result<ListsProcessed, Error> {
    info!("processing tracked lists in {}", lists_dir.display());
    let results = crate::ingest::pipeline::reconcile_all(conn, lists_dir)?;
    Ok(ListsProcessed { message: "Tracked lists processed successfully", results })
}

/// The two name lists kept as viewing preferences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Preference {
    FavoriteDirectors,
    SeenCountries,
}

impl Preference {
    fn noun(self) -> &'static str {
        match self {
            Preference::FavoriteDirectors => "Director",
            Preference::SeenCountries => "Country",
        }
    }

    fn place(self) -> &'static str {
        match self {
            Preference::FavoriteDirectors => "favorites",
            Preference::SeenCountries => "seen list",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Preference::FavoriteDirectors => "directors",
            Preference::SeenCountries => "countries",
        }
    }

    /// Request and response field holding a single name.
    pub fn name_field(self) -> &'static str {
        match self {
            Preference::FavoriteDirectors => "director_name",
            Preference::SeenCountries => "country_name",
        }
    }
}

pub fn preference_names(conn: &PgConnection, pref: Preference) -> Result<Vec<String>, Error> {
    debug!("finding {}", pref.key());
    match pref {
        Preference::FavoriteDirectors => db::favorite_director_names(conn),
        Preference::SeenCountries => db::seen_country_names(conn),
    }
}

/// Adds a name, answering with the name and a message about what happened.
pub fn add_preference(conn: &PgConnection, pref: Preference, name: Option<&str>) -> Result<(String, String), Error> {
    let name = name.map(str::trim).filter(|n| !n.is_empty())
        .ok_or_else(|| Error::BadRequest(format!("{} is required", pref.name_field())))?;
    info!("adding {} to {}", name, pref.key());

    let added = match pref {
        Preference::FavoriteDirectors => db::add_favorite_director(conn, name)?,
        Preference::SeenCountries => db::add_seen_country(conn, name)?,
    };
    let message = if added {
        format!("{} added to {}", pref.noun(), pref.place())
    } else {
        format!("{} already in {}", pref.noun(), pref.place())
    };
    Ok((name.to_string(), message))
}

pub fn remove_preference(conn: &PgConnection, pref: Preference, name: &str) -> Result<(String, String), Error> {
    info!("removing {} from {}", name, pref.key());
    let removed = match pref {
        Preference::FavoriteDirectors => db::remove_favorite_director(conn, name)?,
        Preference::SeenCountries => db::remove_seen_country(conn, name)?,
    };
    if !removed {
        return Err(Error::NotFound(format!("{} not found in {}", pref.noun(), pref.place())));
    }
    Ok((name.to_string(), format!("{} removed from {}", pref.noun(), pref.place())))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stored(title: &str, year: i32, tmdb_id: Option<i32>) -> Movie {
        let mut movie = Movie::new(title, Some(year), &format!("https://boxd.it/{}", title), Utc::now());
        movie.tmdb_id = tmdb_id;
        movie
    }

    #[test]
    fn collection_skips_current_and_links_stored() {
        let parts = vec![
            json!({"id": 120, "title": "The Fellowship of the Ring", "release_date": "2001-12-18"}),
            json!({"id": 122, "title": "The Return of the King", "release_date": "2003-12-01"}),
            json!({"id": 121, "title": "The Two Towers", "release_date": "2002-12-18"}),
            json!({"title": "No id"}),
        ];
        let stored = vec![stored("The Two Towers", 2002, Some(121))];

        let movies = collection_parts(&parts, Some(120), &stored);
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].tmdb_id, Some(121));
        assert!(movies[0].in_db);
        assert_eq!(movies[0].id, Some(stored[0].id));
        assert_eq!(movies[1].tmdb_id, Some(122));
        assert!(!movies[1].in_db);
        assert_eq!(movies[1].id, None);
    }

    #[test]
    fn director_credits_merge_without_duplicates() {
        let stored = vec![stored("Heat", 1995, Some(949)), stored("Thief", 1981, None)];
        let credits = json!({"movie_credits": {"crew": [
            {"id": 949, "job": "Director", "title": "Heat", "release_date": "1995-12-15"},
            {"id": 1001, "job": "Director", "title": "Collateral", "release_date": "2004-08-05"},
            {"id": 1002, "job": "Producer", "title": "The Aviator", "release_date": "2004-12-17"},
            {"id": 1003, "job": "Director", "title": "Untitled", "release_date": ""},
        ]}});

        let movies = merge_director_credits(&stored, Some(&credits));
        let titles: Vec<&str> = movies.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Untitled", "Thief", "Heat", "Collateral"]);
        assert_eq!(movies.iter().filter(|m| m.in_db).count(), 2);

        assert_eq!(merge_director_credits(&stored, None).len(), 2);
    }

    #[test]
    fn details_payload_is_summarised() {
        let details = TmdbDetails::from_payload(&json!({
            "id": 496243,
            "title": "Parasite",
            "original_title": "기생충",
            "release_date": "2019-05-30",
            "poster_path": "/7IiTTgloJzvGI1TAYymCfbfl3vT.jpg",
            "genres": [{"id": 35, "name": "Comedy"}, {"id": 53, "name": "Thriller"}],
            "original_language": "ko",
            "vote_count": 17000
        }));
        assert_eq!(details.year, Some(2019));
        assert_eq!(details.poster_url.as_deref(), Some("https://image.tmdb.org/t/p/w500/7IiTTgloJzvGI1TAYymCfbfl3vT.jpg"));
        assert_eq!(details.genres, vec!["Comedy", "Thriller"]);
        assert_eq!(details.original_language_name.as_deref(), Some("KO"));

        let empty = TmdbDetails::from_payload(&json!({}));
        assert_eq!(empty.original_language_name, None);
        assert_eq!(empty.release_date, "");
    }

    #[test]
    fn tmdb_calls_need_a_client() {
        assert!(matches!(search_tmdb(None, Some("Heat"), None), Err(Error::TmdbUnavailable)));
        assert!(matches!(tmdb_details(None, 949), Err(Error::TmdbUnavailable)));
        assert!(matches!(streaming_services(None), Err(Error::TmdbUnavailable)));
    }
}
