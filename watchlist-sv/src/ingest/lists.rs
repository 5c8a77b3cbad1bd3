use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::Error;
use crate::core::MovieKey;
use crate::ingest::csv::{parse_tracked_list, ListEntry};
use crate::ingest::normalize::{is_valid_column_name, normalize_title, normalize_uri, tracked_column_name};

/// Columns on `movies` a tracked list may never shadow.
const RESERVED_COLUMNS: [&str; 1] = ["is_favorite"];

/// A list export on disk and the boolean column it maintains.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedList {
    pub name: String,
    pub column: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoadedList {
    pub list: TrackedList,
    pub entries: Vec<ListEntry>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct UnmatchedMovie {
    pub name: String,
    pub year: Option<i32>,
    pub uri: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ListReport {
    Processed {
        total: usize,
        matched: usize,
        unmatched: usize,
        unmatched_movies: Vec<UnmatchedMovie>,
    },
    Failed {
        error: String,
        total: usize,
        matched: usize,
        unmatched: usize,
    },
}

impl ListReport {
    pub fn failed(error: String) -> ListReport {
        ListReport::Failed { error, total: 0, matched: 0, unmatched: 0 }
    }
}

/// Ids to flag per column, plus a report per list keyed by list name. Every
/// column gets a mark, empty when its list could not be read.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub columns: Vec<String>,
    pub marks: Vec<(String, Vec<Uuid>)>,
    pub reports: BTreeMap<String, ListReport>,
}

/// Finds `*.csv` list exports in `dir`, sorted by file name. A missing
/// directory means no tracked lists.
pub fn discover(dir: &Path) -> Result<Vec<TrackedList>, Error> {
    if !dir.exists() {
        debug!("tracked lists directory not found: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut lists = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv || !path.is_file() {
            continue;
        }

        let name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        let column = tracked_column_name(&name);

        if RESERVED_COLUMNS.contains(&column.as_str()) {
            warn!("tracked list {} would overwrite column {}, ignoring", name, column);
            continue;
        }
        if !is_valid_column_name(&column) || column == "is_" {
            warn!("tracked list {} has no usable column name, ignoring", name);
            continue;
        }

        lists.push(TrackedList { name, column, path });
    }

    lists.sort_by(|a, b| a.path.cmp(&b.path));
    let mut seen = HashSet::new();
    lists.retain(|l| {
        let fresh = seen.insert(l.column.clone());
        if !fresh {
            warn!("tracked list {} shares column {} with another list, ignoring", l.name, l.column);
        }
        fresh
    });
    Ok(lists)
}

/// Column names of every tracked list currently on disk.
pub fn columns(dir: &Path) -> Result<Vec<String>, Error> {
    let mut cols: Vec<String> = discover(dir)?.into_iter().map(|l| l.column).collect();
    cols.sort();
    Ok(cols)
}

/// Changes whenever a list file is added, removed or rewritten.
pub fn fingerprint(dir: &Path) -> Result<Vec<(String, Option<SystemTime>)>, Error> {
    discover(dir)?.into_iter()
        .map(|l| {
            let modified = fs::metadata(&l.path)?.modified().ok();
            Ok((l.column, modified))
        })
        .collect()
}

pub fn load(list: &TrackedList) -> Result<LoadedList, Error> {
    let bytes = fs::read(&list.path)?;
    let entries = parse_tracked_list(&bytes)?;
    info!("loaded tracked list {} with {} movies", list.name, entries.len());
    Ok(LoadedList { list: list.clone(), entries })
}

/// Loads every list that parses; broken files are logged and left out.
pub fn load_all(dir: &Path) -> Result<Vec<LoadedList>, Error> {
    Ok(discover(dir)?.iter()
        .filter_map(|list| load(list)
            .map_err(|e| warn!("error loading tracked list {}: {}", list.name, e))
            .ok())
        .collect())
}

/// Lookup tables over stored movies for matching list entries.
pub struct MovieIndex<'a> {
    movies: &'a [MovieKey],
    by_uri: HashMap<&'a str, usize>,
    by_normalized_uri: HashMap<String, usize>,
    by_year: HashMap<i32, Vec<usize>>,
}

impl<'a> MovieIndex<'a> {
    pub fn new(movies: &'a [MovieKey]) -> MovieIndex<'a> {
        let mut by_uri = HashMap::new();
        let mut by_normalized_uri = HashMap::new();
        let mut by_year: HashMap<i32, Vec<usize>> = HashMap::new();

        for (idx, m) in movies.iter().enumerate() {
            by_uri.entry(m.letterboxd_uri.as_str()).or_insert(idx);
            by_normalized_uri.entry(normalize_uri(&m.letterboxd_uri)).or_insert(idx);
            if let Some(year) = m.year {
                by_year.entry(year).or_default().push(idx);
            }
        }

        MovieIndex { movies, by_uri, by_normalized_uri, by_year }
    }

    /// Stored uri exactly, the entry's normalized uri as stored, then a stored
    /// uri that normalizes the same way.
    fn find_by_uri(&self, uri: &str) -> Option<&'a MovieKey> {
        let normalized = normalize_uri(uri);
        self.by_uri.get(uri)
            .or_else(|| self.by_uri.get(normalized.as_str()))
            .or_else(|| self.by_normalized_uri.get(&normalized))
            .map(|idx| &self.movies[*idx])
    }

    /// A single case-insensitive title hit in that year, otherwise the first
    /// movie of that year whose normalized title agrees.
    fn find_by_title_year(&self, title: &str, year: i32) -> Option<&'a MovieKey> {
        let candidates = self.by_year.get(&year)?;

        let lowered = title.to_lowercase();
        let exact: Vec<usize> = candidates.iter().copied()
            .filter(|idx| self.movies[*idx].title.to_lowercase() == lowered)
            .collect();
        if exact.len() == 1 {
            return Some(&self.movies[exact[0]]);
        }

        let normalized = normalize_title(title);
        candidates.iter()
            .map(|idx| &self.movies[*idx])
            .find(|m| normalize_title(&m.title) == normalized)
    }

    pub fn find(&self, entry: &ListEntry) -> Option<&'a MovieKey> {
        entry.letterboxd_uri.as_deref()
            .and_then(|uri| self.find_by_uri(uri))
            .or_else(|| entry.year.and_then(|y| self.find_by_title_year(&entry.name, y)))
    }
}

/// Matches every list against the stored movies.
pub fn plan(lists: &[TrackedList], loaded: &[LoadedList], movies: &[MovieKey]) -> ReconcilePlan {
    let index = MovieIndex::new(movies);
    let mut plan = ReconcilePlan {
        columns: lists.iter().map(|l| l.column.clone()).collect(),
        ..ReconcilePlan::default()
    };

    for list in lists {
        let loaded = match loaded.iter().find(|l| l.list.column == list.column) {
            Some(l) => l,
            None => {
                plan.reports.insert(list.name.clone(), ListReport::failed(format!("could not read {}", list.path.display())));
                plan.marks.push((list.column.clone(), Vec::new()));
                continue;
            }
        };

        let mut ids = Vec::new();
        let mut unmatched_movies = Vec::new();
        for entry in &loaded.entries {
            match index.find(entry) {
                Some(movie) => ids.push(movie.id),
                None => {
                    debug!("could not match {} ({:?}) in {}", entry.name, entry.year, list.name);
                    unmatched_movies.push(UnmatchedMovie {
                        name: entry.name.clone(),
                        year: entry.year,
                        uri: entry.letterboxd_uri.clone(),
                    });
                }
            }
        }

        info!("list '{}': {}/{} movies matched", list.name, ids.len(), loaded.entries.len());
        plan.reports.insert(list.name.clone(), ListReport::Processed {
            total: loaded.entries.len(),
            matched: ids.len(),
            unmatched: unmatched_movies.len(),
            unmatched_movies,
        });

        ids.sort();
        ids.dedup();
        plan.marks.push((list.column.clone(), ids));
    }

    plan
}

/// Tracked columns whose list contains `movie`, checked against already loaded lists.
pub fn lists_containing(movie: &MovieKey, lists: &[LoadedList]) -> Vec<String> {
    let uri = normalize_uri(&movie.letterboxd_uri);
    let title = normalize_title(&movie.title);

    lists.iter()
        .filter(|l| l.entries.iter().any(|e| {
            let uri_hit = !uri.is_empty() && e.letterboxd_uri.as_deref()
                .map_or(false, |u| normalize_uri(u) == uri);
            let title_hit = movie.year.is_some() && e.year == movie.year && normalize_title(&e.name) == title;
            uri_hit || title_hit
        }))
        .map(|l| l.list.column.clone())
        .collect()
}
