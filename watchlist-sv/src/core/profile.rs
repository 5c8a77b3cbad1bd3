//! Profile archives: every movie and preference zipped into one
//! `profile.json`, and the import that replaces the collection with one.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::pg::PgConnection;
use diesel::Connection;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::{clean_notes, Movie, MovieChangeset};
use crate::core::error::Error;
use crate::db;
use crate::ingest::pipeline::reconcile_all;
use crate::ingest::progress::Events;
use crate::tmdb::TmdbClient;

pub const PROFILE_VERSION: &str = "1.0";
const PROFILE_FILE: &str = "profile.json";
const PROGRESS_EVERY: usize = 25;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Metadata {
    pub total_movies: usize,
    pub favorite_movies_count: usize,
    pub includes_tmdb_data: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Profile {
    pub version: &'static str,
    pub export_date: String,
    pub metadata: Metadata,
    pub movies: Vec<Value>,
    pub favorite_directors: Vec<String>,
    pub seen_countries: Vec<String>,
    pub preferences: Value,
}

fn exported_movie(movie: &Movie, include_tmdb_data: bool) -> Value {
    let mut out = Map::new();
    out.insert("title".into(), json!(movie.title));
    out.insert("year".into(), json!(movie.year));
    out.insert("letterboxd_uri".into(), json!(movie.letterboxd_uri));
    if include_tmdb_data {
        out.insert("director".into(), json!(movie.director));
        out.insert("country".into(), json!(movie.country));
        out.insert("runtime".into(), json!(movie.runtime));
        out.insert("genres".into(), json!(movie.genres));
    }
    out.insert("tmdb_id".into(), json!(movie.tmdb_id));
    out.insert("is_favorite".into(), json!(movie.is_favorite));
    out.insert("seen_before".into(), json!(movie.seen_before));
    out.insert("notes".into(), json!(movie.notes));
    if include_tmdb_data {
        out.insert("created_at".into(), json!(movie.created_at.to_rfc3339()));
        if let Some(updated) = movie.updated_at {
            out.insert("updated_at".into(), json!(updated.to_rfc3339()));
        }
        if let Some(data) = &movie.tmdb_data {
            out.insert("tmdb_data".into(), data.clone());
        }
    }
    Value::Object(out)
}

pub fn build_profile(
    movies: &[Movie],
    favorite_directors: Vec<String>,
    seen_countries: Vec<String>,
    include_tmdb_data: bool,
    preferences: Value,
    now: DateTime<Utc>,
) -> Profile {
    Profile {
        version: PROFILE_VERSION,
        export_date: now.to_rfc3339_opts(SecondsFormat::Micros, true),
        metadata: Metadata {
            total_movies: movies.len(),
            favorite_movies_count: movies.iter().filter(|m| m.is_favorite).count(),
            includes_tmdb_data: include_tmdb_data,
        },
        movies: movies.iter().map(|m| exported_movie(m, include_tmdb_data)).collect(),
        favorite_directors,
        seen_countries,
        preferences: if preferences.is_null() { json!({}) } else { preferences },
    }
}

pub fn zip_profile(profile: &Profile) -> Result<Vec<u8>, Error> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(PROFILE_FILE, options)?;
    zip.write_all(serde_json::to_string_pretty(profile)?.as_bytes())?;
    Ok(zip.finish()?.into_inner())
}

/// Reads `profile.json` out of an uploaded archive.
pub fn unzip_profile(bytes: &[u8]) -> Result<Value, Error> {
    let invalid = |msg: String| Error::BadRequest(format!("Invalid profile file: {}", msg));

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|_| invalid("Invalid ZIP file format".to_string()))?;
    let mut file = match archive.by_name(PROFILE_FILE) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Err(invalid("ZIP file does not contain profile.json".to_string())),
        Err(err) => return Err(invalid(err.to_string())),
    };

    let mut raw = String::new();
    file.read_to_string(&mut raw)
        .map_err(|e| invalid(format!("profile.json is not UTF-8 text: {}", e)))?;
    let profile: Value = serde_json::from_str(&raw)
        .map_err(|e| invalid(format!("Invalid JSON in profile file: {}", e)))?;

    validate(&profile).map_err(|e| invalid(e.to_string()))?;
    Ok(profile)
}

fn validate(profile: &Value) -> Result<(), Error> {
    let object = profile.as_object()
        .ok_or_else(|| Error::BadRequest("Profile data must be a JSON object".to_string()))?;
    match object.get("movies") {
        None => Err(Error::BadRequest("Profile data missing required key: movies".to_string())),
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(Error::BadRequest("Profile data must contain a 'movies' array".to_string())),
    }
}

/// The zipped profile and its download name.
pub fn export_profile(conn: &PgConnection, include_tmdb_data: bool, preferences: Value) -> Result<(Vec<u8>, String), Error> {
    let movies = db::all_movies(conn)?;
    info!("exporting profile with {} movies include_tmdb_data={}", movies.len(), include_tmdb_data);

    let now = Utc::now();
    let profile = build_profile(
        &movies,
        db::favorite_director_names(conn)?,
        db::seen_country_names(conn)?,
        include_tmdb_data,
        preferences,
        now,
    );
    let filename = format!("profile-export-{}.zip", now.format("%Y-%m-%d-%H-%M-%S"));
    Ok((zip_profile(&profile)?, filename))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct ImportedMovie {
    title: Option<String>,
    year: Option<i32>,
    letterboxd_uri: Option<String>,
    director: Option<String>,
    country: Option<String>,
    runtime: Option<i32>,
    genres: Option<Vec<String>>,
    tmdb_id: Option<i32>,
    tmdb_data: Option<Value>,
    is_favorite: Option<bool>,
    seen_before: Option<bool>,
    notes: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

fn timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|r| DateTime::parse_from_rfc3339(r).ok()).map(|d| d.with_timezone(&Utc))
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ImportError {
    pub index: usize,
    pub movie: String,
    pub error: String,
}

/// Turns one profile entry into a movie row, or explains why it cannot be one.
fn profile_movie(entry: &Value) -> Result<Movie, String> {
    if !entry.is_object() {
        return Err("Movie data is not an object".to_string());
    }
    let m: ImportedMovie = serde_json::from_value(entry.clone()).map_err(|e| e.to_string())?;

    let uri = m.letterboxd_uri.as_deref().map(str::trim).filter(|u| !u.is_empty())
        .ok_or_else(|| "Missing required field: letterboxd_uri".to_string())?;
    let title = m.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
        .ok_or_else(|| "Missing required field: title".to_string())?;

    let created_at = timestamp(m.created_at.as_deref()).unwrap_or_else(Utc::now);
    let mut movie = Movie::new(title, m.year, uri, created_at);
    movie.director = m.director;
    movie.country = m.country;
    movie.runtime = m.runtime;
    movie.genres = m.genres.unwrap_or_default();
    movie.tmdb_id = m.tmdb_id;
    movie.tmdb_data = m.tmdb_data.filter(|d| d.as_object().map_or(true, |o| !o.is_empty()));
    movie.is_favorite = m.is_favorite.unwrap_or(false);
    movie.seen_before = m.seen_before.unwrap_or(false);
    movie.notes = clean_notes(m.notes.as_deref());
    movie.updated_at = timestamp(m.updated_at.as_deref());
    Ok(movie)
}

fn entry_title(entry: &Value) -> String {
    entry.get("title").and_then(Value::as_str).unwrap_or("Unknown").to_string()
}

fn names(profile: &Value, key: &str) -> Vec<String> {
    profile.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect())
        .unwrap_or_default()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
struct ImportPhase {
    import_phase: &'static str,
    current: usize,
    total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    imported: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<usize>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
struct ImportComplete<'a> {
    import_complete: bool,
    movies_imported: usize,
    movies_failed: usize,
    errors: &'a [ImportError],
    preferences: &'a Value,
    done: bool,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct EnrichProgress {
    pub current: usize,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb_data_fetched: Option<usize>,
    pub done: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportSummary {
    pub movies_imported: usize,
    pub movies_failed: usize,
    pub errors: Vec<ImportError>,
}

fn replace_collection(conn: &PgConnection, profile: &Value, events: &Events) -> Result<ImportSummary, Error> {
    let entries = profile.get("movies").and_then(Value::as_array).map(|m| m.as_slice()).unwrap_or(&[]);
    let total = entries.len();

    conn.transaction::<_, Error, _>(|| {
        let cleared = db::delete_all_movies(conn)?;
        db::clear_favorite_directors(conn)?;
        db::clear_seen_countries(conn)?;
        info!("cleared {} movies before profile import", cleared);

        events.send(&ImportPhase { import_phase: "starting", current: 0, total, imported: None, failed: None });

        let mut summary = ImportSummary::default();
        for (index, entry) in entries.iter().enumerate() {
            let stored = profile_movie(entry).and_then(|movie| {
                conn.transaction(|| db::create_movie(conn, &movie))
                    .map_err(|e: Error| e.to_string())?
                    .ok_or_else(|| format!("Duplicate letterboxd_uri: {}", movie.letterboxd_uri))
            });
            match stored {
                Ok(_) => summary.movies_imported += 1,
                Err(error) => {
                    warn!("failed to import movie {} ({}): {}", index, entry_title(entry), error);
                    summary.movies_failed += 1;
                    summary.errors.push(ImportError { index, movie: entry_title(entry), error });
                }
            }

            if (index + 1) % PROGRESS_EVERY == 0 {
                events.send(&ImportPhase {
                    import_phase: "movies",
                    current: index + 1,
                    total,
                    imported: Some(summary.movies_imported),
                    failed: Some(summary.movies_failed),
                });
            }
        }

        for name in names(profile, "favorite_directors") {
            db::add_favorite_director(conn, &name)?;
        }
        for name in names(profile, "seen_countries") {
            db::add_seen_country(conn, &name)?;
        }

        info!("imported {} movies, {} failed", summary.movies_imported, summary.movies_failed);
        Ok(summary)
    })
}

/// Fetches TMDB data for imported movies that arrived without it.
fn enrich_imported(conn: &PgConnection, client: &TmdbClient, movies: &[Movie], events: &Events) -> Result<EnrichProgress, Error> {
    let mut progress = EnrichProgress { total: movies.len(), ..EnrichProgress::default() };
    events.send(&progress);

    for (idx, movie) in movies.iter().enumerate() {
        match client.enrich(&movie.title, movie.year) {
            Ok(Some(e)) => {
                db::update_movie(conn, movie.id, &MovieChangeset::fill(e))?;
                progress.processed += 1;
            }
            Ok(None) => {
                warn!("could not fetch tmdb data for {} ({:?})", movie.title, movie.year);
                progress.failed += 1;
            }
            Err(err) => {
                warn!("error fetching tmdb data for {}: {}", movie.title, err);
                progress.failed += 1;
            }
        }
        progress.current = idx + 1;
        events.send(&progress);
    }

    info!("fetched tmdb data for {} imported movies, {} failed", progress.processed, progress.failed);
    Ok(progress)
}

/// Replaces the collection with `profile`, streaming progress. Returns true
/// when tracked lists still need reconciling.
pub fn import_profile(
    conn: &PgConnection,
    tmdb: Option<&TmdbClient>,
    lists_dir: &Path,
    profile: &Value,
    events: &Events,
) -> Result<bool, Error> {
    validate(profile)?;
    let summary = replace_collection(conn, profile, events)?;

    let preferences = profile.get("preferences").cloned().unwrap_or_else(|| json!({}));
    events.send(&ImportComplete {
        import_complete: true,
        movies_imported: summary.movies_imported,
        movies_failed: summary.movies_failed,
        errors: &summary.errors,
        preferences: &preferences,
        done: false,
    });

    let needing: Vec<Movie> = db::all_movies(conn)?.into_iter()
        .filter(Movie::needs_enrichment)
        .collect();
    debug!("{} imported movies lack tmdb data", needing.len());

    match tmdb {
        Some(client) if !needing.is_empty() && summary.movies_imported > 0 => {
            events.send(&json!({"tmdb_processing_starting": true, "total_movies": needing.len()}));
            let mut progress = enrich_imported(conn, client, &needing, events)?;

            if let Err(err) = reconcile_all(conn, lists_dir) {
                warn!("error processing tracked lists after import: {}", err);
            }

            progress.current = progress.total;
            progress.done = true;
            events.send(&progress);
            Ok(false)
        }
        _ => {
            events.send(&EnrichProgress {
                current: summary.movies_imported,
                total: summary.movies_imported,
                tmdb_data_fetched: Some(0),
                done: true,
                ..EnrichProgress::default()
            });
            Ok(true)
        }
    }
}

/// Imports a profile, reporting any failure as the final event.
pub fn run_import(conn: &PgConnection, tmdb: Option<&TmdbClient>, lists_dir: &Path, profile: &Value, events: &Events) -> bool {
    match import_profile(conn, tmdb, lists_dir, profile, events) {
        Ok(reconcile_later) => reconcile_later,
        Err(err) => {
            events.error(format!("Error during import: {}", err));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn movie(title: &str, uri: &str, favorite: bool) -> Movie {
        let mut m = Movie::new(title, Some(1995), uri, Utc.ymd(2024, 1, 2).and_hms(3, 4, 5));
        m.is_favorite = favorite;
        m.director = Some("Michael Mann".to_string());
        m.tmdb_data = Some(json!({"id": 949}));
        m
    }

    fn now() -> DateTime<Utc> {
        Utc.ymd(2024, 3, 9).and_hms(12, 30, 0)
    }

    #[test]
    fn full_export_carries_cache() {
        let movies = vec![movie("Heat", "https://boxd.it/2bRu", true), movie("Thief", "https://boxd.it/29c8", false)];
        let profile = build_profile(&movies, vec!["Michael Mann".into()], vec![], true, Value::Null, now());

        assert_eq!(profile.version, "1.0");
        assert_eq!(profile.metadata, Metadata { total_movies: 2, favorite_movies_count: 1, includes_tmdb_data: true });
        assert_eq!(profile.movies[0]["tmdb_data"], json!({"id": 949}));
        assert_eq!(profile.movies[0]["director"], json!("Michael Mann"));
        assert_eq!(profile.movies[0]["created_at"], json!("2024-01-02T03:04:05+00:00"));
        assert_eq!(profile.preferences, json!({}));
        assert!(profile.export_date.ends_with('Z'));
    }

    #[test]
    fn minimal_export_drops_cache() {
        let movies = vec![movie("Heat", "https://boxd.it/2bRu", false)];
        let profile = build_profile(&movies, vec![], vec![], false, json!({"theme": "dark"}), now());

        let keys: Vec<&String> = profile.movies[0].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
        assert!(profile.movies[0].get("tmdb_data").is_none());
        assert!(profile.movies[0].get("director").is_none());
        assert_eq!(profile.preferences, json!({"theme": "dark"}));
    }

    #[test]
    fn archives_round_trip() {
        let movies = vec![movie("Heat", "https://boxd.it/2bRu", true)];
        let profile = build_profile(&movies, vec!["Michael Mann".into()], vec!["France".into()], true, json!({}), now());

        let bytes = zip_profile(&profile).unwrap();
        let read = unzip_profile(&bytes).unwrap();
        assert_eq!(read["movies"][0]["title"], json!("Heat"));
        assert_eq!(names(&read, "favorite_directors"), vec!["Michael Mann"]);
        assert_eq!(names(&read, "seen_countries"), vec!["France"]);

        let restored = profile_movie(&read["movies"][0]).unwrap();
        assert_eq!(restored.id, movies[0].id);
        assert_eq!(restored.created_at, movies[0].created_at);
        assert!(restored.is_favorite);
    }

    #[test]
    fn rejects_bad_archives() {
        assert!(matches!(unzip_profile(b"not a zip"), Err(Error::BadRequest(_))));

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("other.json", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"{}").unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        let err = unzip_profile(&bytes).unwrap_err();
        assert!(err.to_string().contains("does not contain profile.json"));

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(PROFILE_FILE, SimpleFileOptions::default()).unwrap();
        zip.write_all(br#"{"movies": {}}"#).unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        assert!(unzip_profile(&bytes).unwrap_err().to_string().contains("'movies' array"));
    }

    #[test]
    fn entries_import_leniently() {
        assert_eq!(profile_movie(&json!("Heat")).unwrap_err(), "Movie data is not an object");
        assert_eq!(profile_movie(&json!({"title": "Heat"})).unwrap_err(), "Missing required field: letterboxd_uri");
        assert_eq!(profile_movie(&json!({"letterboxd_uri": "u"})).unwrap_err(), "Missing required field: title");

        let minimal = profile_movie(&json!({"title": "Heat", "year": null, "letterboxd_uri": "u", "notes": "  "})).unwrap();
        assert_eq!(minimal.year, None);
        assert_eq!(minimal.notes, None);
        assert!(minimal.genres.is_empty());
        assert!(minimal.needs_enrichment());

        let empty_cache = profile_movie(&json!({"title": "Heat", "letterboxd_uri": "u", "tmdb_data": {}})).unwrap();
        assert_eq!(empty_cache.tmdb_data, None);
    }
}
