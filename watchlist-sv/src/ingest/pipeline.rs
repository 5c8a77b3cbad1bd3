//! Storing watchlist CSVs and reconciling tracked lists.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::Connection;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{Movie, MovieChangeset, MovieKey};
use crate::core::action::enrich_quietly;
use crate::core::error::Error;
use crate::db;
use crate::db::tracked;
use crate::ingest::csv::{parse_watchlist, WatchlistEntry};
use crate::ingest::lists::{self, ListReport};
use crate::ingest::progress::{Events, Progress};
use crate::tmdb::TmdbClient;

/// Everything a CSV import needs besides the rows themselves.
#[derive(Clone, Copy)]
pub struct Importer<'a> {
    pub conn: &'a PgConnection,
    pub tmdb: Option<&'a TmdbClient>,
    pub lists_dir: &'a Path,
}

enum Stored {
    Added,
    Existing,
}

impl<'a> Importer<'a> {
    /// Inserts `entry` unless it is already stored; a stored copy only takes
    /// the row's date added.
    fn store(&self, entry: &WatchlistEntry, is_favorite: bool, seen_before: bool, by_uri_only: bool) -> Result<Stored, Error> {
        let existing = if by_uri_only {
            db::find_movie_by_uri(self.conn, &entry.letterboxd_uri)?
        } else {
            db::find_existing(self.conn, Some(&entry.letterboxd_uri), &entry.name, entry.year)?
        };

        if let Some(found) = existing {
            if let Some(date) = entry.date_added {
                db::update_movie(self.conn, found.id, &MovieChangeset::date_added(date))?;
            }
            debug!("{} ({}) already stored as {}", entry.name, entry.year, found.id);
            return Ok(Stored::Existing);
        }

        let mut movie = Movie::new(&entry.name, Some(entry.year), &entry.letterboxd_uri, entry.date_added.unwrap_or_else(Utc::now))
            .enriched(enrich_quietly(self.tmdb, &entry.name, Some(entry.year)));
        movie.is_favorite = is_favorite;
        movie.seen_before = seen_before;

        match db::create_movie(self.conn, &movie)? {
            Some(_) => Ok(Stored::Added),
            None => Ok(Stored::Existing),
        }
    }

    /// Stores one row inside a savepoint so a failing row leaves the rest of
    /// the import intact.
    fn store_row(&self, entry: &WatchlistEntry, is_favorite: bool, seen_before: bool, by_uri_only: bool, progress: &mut Progress) {
        match self.conn.transaction(|| self.store(entry, is_favorite, seen_before, by_uri_only)) {
            Ok(Stored::Added) => progress.processed += 1,
            Ok(Stored::Existing) => progress.skipped += 1,
            Err(err) => {
                warn!("error storing {} ({}): {}", entry.name, entry.year, err);
                progress.skipped += 1;
            }
        }
    }

    fn reconcile_quietly(&self) {
        match reconcile_all(self.conn, self.lists_dir) {
            Ok(reports) => info!("reconciled {} tracked lists", reports.len()),
            Err(err) => warn!("error processing tracked lists: {}", err),
        }
    }

    pub fn process_csv(&self, bytes: &[u8], events: &Events) -> Result<Progress, Error> {
        let entries = parse_watchlist(bytes)?;
        let mut progress = Progress::new(entries.len());
        events.send(&progress);

        self.conn.transaction::<_, Error, _>(|| {
            for (idx, entry) in entries.iter().enumerate() {
                self.store_row(entry, false, false, false, &mut progress);
                progress.current = idx + 1;
                events.send(&progress);
            }
            Ok(())
        })?;
        info!("stored csv: {} added, {} already present", progress.processed, progress.skipped);

        self.reconcile_quietly();

        progress.finish("CSV processed successfully".to_string());
        events.send(&progress);
        Ok(progress)
    }

    /// Processes an uploaded CSV, reporting any failure as the final event.
    pub fn run_csv(&self, bytes: &[u8], events: &Events) {
        if let Err(err) = self.process_csv(bytes, events) {
            error!("error processing csv: {}", err);
            events.error(format!("Error processing CSV: {}", err));
        }
    }

    /// Processes the watchlist CSV kept on the server.
    pub fn run_local_csv(&self, path: &Path, events: &Events) {
        if !path.exists() {
            events.error(format!("CSV file not found at {}", path.display()));
            return;
        }
        match fs::read(path) {
            Ok(bytes) => self.run_csv(&bytes, events),
            Err(err) => events.error(format!("Error processing CSV: {}", err)),
        }
    }

    /// Removes the selected movies, then adds only the selected rows.
    pub fn process_selections(&self, bytes: &[u8], selections: &Selections, events: &Events) -> Result<Progress, Error> {
        let entries = if selections.movies_to_add.is_empty() {
            Vec::new()
        } else {
            parse_watchlist(bytes)?
        };

        let wanted: HashMap<&str, &SelectedMovie> = selections.movies_to_add.iter()
            .map(|s| (s.letterboxd_uri.trim(), s))
            .collect();
        let to_add: Vec<(&WatchlistEntry, &SelectedMovie)> = entries.iter()
            .filter_map(|e| wanted.get(e.letterboxd_uri.as_str()).map(|s| (e, *s)))
            .collect();

        let mut progress = Progress::new(to_add.len() + selections.movies_to_remove_ids.len());
        progress.removed = Some(0);
        events.send(&progress);

        self.conn.transaction::<_, Error, _>(|| {
            let mut removed = 0;
            for id in &selections.movies_to_remove_ids {
                if db::delete_movie(self.conn, *id)? {
                    removed += 1;
                } else {
                    debug!("movie {} already gone", id);
                    progress.skipped += 1;
                }
                progress.current += 1;
                progress.removed = Some(removed);
                events.send(&progress);
            }

            for (entry, selected) in &to_add {
                self.store_row(entry, selected.is_favorite, selected.seen_before, true, &mut progress);
                progress.current += 1;
                events.send(&progress);
            }
            Ok(())
        })?;

        let removed = progress.removed.unwrap_or(0);
        let message = if selections.movies_to_add.is_empty() {
            format!("Removed {} movies", removed)
        } else {
            self.reconcile_quietly();
            format!("Added {} movies, removed {} movies", progress.processed, removed)
        };
        info!("{}", message);

        progress.finish(message);
        events.send(&progress);
        Ok(progress)
    }

    pub fn run_selections(&self, bytes: &[u8], selections: &Selections, events: &Events) {
        if let Err(err) = self.process_selections(bytes, selections, events) {
            error!("error processing csv with selections: {}", err);
            events.error(format!("Error processing CSV: {}", err));
        }
    }
}

/// A CSV row the user chose to add, with the flags to store it with.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SelectedMovie {
    pub letterboxd_uri: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub seen_before: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Selections {
    #[serde(default)]
    pub movies_to_add: Vec<SelectedMovie>,
    #[serde(default)]
    pub movies_to_remove_ids: Vec<Uuid>,
}

impl Selections {
    pub fn parse(raw: &str) -> Result<Selections, Error> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::BadRequest(format!("Invalid selections JSON: {}", e)))?;
        if !value.is_object() {
            return Err(Error::BadRequest("Selections must be a JSON object".to_string()));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::BadRequest(format!("Invalid selections JSON: {}", e)))
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MovieToAdd {
    pub name: String,
    pub year: i32,
    pub letterboxd_uri: String,
    pub will_add: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MovieToRemove {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
    pub action: &'static str,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Preview {
    pub movies_to_add: Vec<MovieToAdd>,
    pub movies_to_remove: Vec<MovieToRemove>,
    pub total_to_add: usize,
    pub total_to_remove: usize,
}

/// Compares a CSV against the stored movies by Letterboxd URI.
pub fn preview(entries: &[WatchlistEntry], stored: &[MovieKey]) -> Preview {
    let stored_uris: HashSet<&str> = stored.iter().map(|m| m.letterboxd_uri.as_str()).collect();
    let csv_uris: HashSet<&str> = entries.iter().map(|e| e.letterboxd_uri.as_str()).collect();

    let mut seen = HashSet::new();
    let movies_to_add: Vec<MovieToAdd> = entries.iter()
        .filter(|e| !stored_uris.contains(e.letterboxd_uri.as_str()))
        .filter(|e| seen.insert(e.letterboxd_uri.as_str()))
        .map(|e| MovieToAdd {
            name: e.name.clone(),
            year: e.year,
            letterboxd_uri: e.letterboxd_uri.clone(),
            will_add: true,
        })
        .collect();

    let movies_to_remove: Vec<MovieToRemove> = stored.iter()
        .filter(|m| !csv_uris.contains(m.letterboxd_uri.as_str()))
        .map(|m| MovieToRemove {
            id: m.id,
            title: m.title.clone(),
            year: m.year,
            letterboxd_uri: m.letterboxd_uri.clone(),
            action: "keep",
        })
        .collect();

    Preview {
        total_to_add: movies_to_add.len(),
        total_to_remove: movies_to_remove.len(),
        movies_to_add,
        movies_to_remove,
    }
}

pub fn preview_csv(conn: &PgConnection, bytes: &[u8]) -> Result<Preview, Error> {
    let entries = parse_watchlist(bytes)?;
    let stored = db::all_movie_keys(conn)?;
    let found = preview(&entries, &stored);
    info!("csv preview: {} to add, {} to remove", found.total_to_add, found.total_to_remove);
    Ok(found)
}

/// Rebuilds every tracked column from the list files on disk. All columns
/// are cleared first, so a list that fails to load ends up flagging nothing.
pub fn reconcile_all(conn: &PgConnection, lists_dir: &Path) -> Result<BTreeMap<String, ListReport>, Error> {
    let discovered = lists::discover(lists_dir)?;
    if discovered.is_empty() {
        debug!("no tracked lists in {}", lists_dir.display());
        return Ok(BTreeMap::new());
    }

    let loaded: Vec<lists::LoadedList> = discovered.iter()
        .filter_map(|list| lists::load(list)
            .map_err(|err| warn!("error loading tracked list {}: {}", list.name, err))
            .ok())
        .collect();
    let movies = db::all_movie_keys(conn)?;
    let plan = lists::plan(&discovered, &loaded, &movies);

    conn.transaction::<_, Error, _>(|| {
        tracked::ensure_columns(conn, &plan.columns)?;
        for column in &plan.columns {
            tracked::reset_column(conn, column)?;
        }
        for (column, ids) in &plan.marks {
            tracked::mark(conn, column, ids)?;
        }
        Ok(())
    })?;

    Ok(plan.reports)
}
