//! The in-memory half of `GET /api/movies`: query parsing, availability
//! filtering, sorting, expansion and paging over movies the SQL filter kept.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::Error;
use crate::core::Movie;
use crate::db::filter::{Facet, ListFilters, MovieFilter};
use crate::db::StatsRow;
use crate::ingest::normalize::is_valid_column_name;
use crate::tmdb::extract;
use crate::tmdb::extract::Availability;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 10_000;
pub const EXPORT_LIMIT: usize = 100_000;
pub const DEFAULT_REGION: &str = "US";

/// Decoded query string. Keys may repeat and may carry a `[]` suffix.
#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query_string: &str) -> Result<QueryParams, Error> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query_string)
            .map_err(|e| Error::BadRequest(format!("invalid query string: {}", e)))?;
        Ok(QueryParams {
            pairs: pairs.into_iter()
                .map(|(k, v)| (k.trim_end_matches("[]").to_string(), v))
                .collect(),
        })
    }

    /// Every non-blank value for `key`.
    pub fn all(&self, key: &str) -> Vec<String> {
        self.pairs.iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The last non-blank value for `key`.
    pub fn one(&self, key: &str) -> Option<&str> {
        self.pairs.iter()
            .rev()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    }

    pub fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        self.one(key)
            .map(|v| v.parse::<T>().map_err(|_| Error::BadRequest(format!("{} must be a number, got {:?}", key, v))))
            .transpose()
    }

    pub fn numbers<T: FromStr>(&self, key: &str) -> Result<Vec<T>, Error> {
        self.all(key).iter()
            .map(|v| v.parse::<T>().map_err(|_| Error::BadRequest(format!("{} must be numbers, got {:?}", key, v))))
            .collect()
    }

    pub fn boolean(&self, key: &str) -> Result<Option<bool>, Error> {
        match self.one(key).map(str::to_lowercase).as_deref() {
            None => Ok(None),
            Some("true") | Some("1") | Some("yes") | Some("on") => Ok(Some(true)),
            Some("false") | Some("0") | Some("no") | Some("off") => Ok(Some(false)),
            Some(other) => Err(Error::BadRequest(format!("{} must be a boolean, got {:?}", key, other))),
        }
    }

    pub fn flag(&self, key: &str) -> Result<bool, Error> {
        Ok(self.boolean(key)?.unwrap_or(false))
    }

    fn facet(&self, key: &str) -> Result<Facet, Error> {
        Ok(Facet {
            values: self.all(key),
            exclude: self.flag(&format!("{}_exclude", key))?,
        })
    }

    /// ISO 8601 timestamp; unparseable values are ignored.
    fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.one(key)?;
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| crate::ingest::csv::parse_date(raw));
        if parsed.is_none() {
            warn!("ignoring invalid {} {:?}", key, raw);
        }
        parsed
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortField {
    Title,
    Year,
    Runtime,
    Director,
    Country,
    OriginalLanguage,
    ProductionCompany,
    Genres,
    InCollection,
    IsFavorite,
    DateAdded,
    Tracked(String),
}

impl SortField {
    /// Unknown fields sort by release date.
    pub fn parse(raw: &str) -> SortField {
        match raw {
            "title" => SortField::Title,
            "year" => SortField::Year,
            "runtime" => SortField::Runtime,
            "director" => SortField::Director,
            "country" => SortField::Country,
            "original_language" => SortField::OriginalLanguage,
            "production_company" => SortField::ProductionCompany,
            "genres" => SortField::Genres,
            "in_collection" => SortField::InCollection,
            "is_favorite" => SortField::IsFavorite,
            "date_added" => SortField::DateAdded,
            col if is_valid_column_name(col) => SortField::Tracked(col.to_string()),
            _ => SortField::Year,
        }
    }

    fn expands(&self) -> bool {
        matches!(self, SortField::Genres | SortField::ProductionCompany)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: SortField) -> Sort {
        Sort { field, descending: false }
    }

    pub fn desc(field: SortField) -> Sort {
        Sort { field, descending: true }
    }
}

fn parse_sorts(raw: &str) -> Vec<Sort> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("ignoring malformed sorts {:?}: {}", raw, e);
            return Vec::new();
        }
    };

    parsed.as_array()
        .map(|items| items.iter()
            .filter_map(|item| {
                let field = item.get("field").and_then(Value::as_str)?;
                let order = item.get("order")
                    .or_else(|| item.get("direction"))
                    .and_then(Value::as_str)
                    .unwrap_or("asc");
                Some(Sort { field: SortField::parse(field), descending: order.eq_ignore_ascii_case("desc") })
            })
            .collect())
        .unwrap_or_default()
}

/// Keeps movies the preferred services offer in one of the wanted ways
/// (or, with `exclude`, those they do not).
#[derive(Clone, Debug, PartialEq)]
pub struct AvailabilityFilter {
    pub wanted: Vec<Availability>,
    pub preferred: Vec<i64>,
    pub region: String,
    pub exclude: bool,
}

impl AvailabilityFilter {
    pub fn keeps(&self, movie: &Movie) -> bool {
        let available = extract::is_available(movie.tmdb_data.as_ref(), &self.region, &self.preferred, &self.wanted);
        available != self.exclude
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListingQuery {
    pub filter: MovieFilter,
    pub skip: usize,
    pub limit: usize,
    pub sorts: Vec<Sort>,
    /// Sorting first by genres or production company lists a movie once per value.
    pub expand: bool,
    pub availability: Option<AvailabilityFilter>,
}

impl ListingQuery {
    pub fn parse(query_string: &str) -> Result<ListingQuery, Error> {
        ListingQuery::from_params(&QueryParams::parse(query_string)?, DEFAULT_LIMIT, MAX_LIMIT)
    }

    pub fn from_params(p: &QueryParams, default_limit: usize, max_limit: usize) -> Result<ListingQuery, Error> {
        let skip = p.number::<usize>("skip")?.unwrap_or(0);
        let limit = p.number::<usize>("limit")?.unwrap_or(default_limit);
        if limit < 1 || limit > max_limit {
            return Err(Error::BadRequest(format!("limit must be between 1 and {}", max_limit)));
        }

        let watch_region = p.one("watch_region").unwrap_or(DEFAULT_REGION).to_uppercase();

        let filter = MovieFilter {
            year_min: p.number("year_min")?,
            year_max: p.number("year_max")?,
            runtime_min: p.number("runtime_min")?,
            runtime_max: p.number("runtime_max")?,
            director: p.facet("director")?,
            country: p.facet("country")?,
            genre: p.facet("genre")?,
            original_language: p.facet("original_language")?,
            production_company: p.facet("production_company")?,
            actor: p.facet("actor")?,
            writer: p.facet("writer")?,
            producer: p.facet("producer")?,
            spoken_language: p.one("spoken_language").map(str::to_string),
            collection: p.boolean("collection")?,
            search: p.one("search").map(str::to_string),
            date_added_min: p.timestamp("date_added_min"),
            date_added_max: p.timestamp("date_added_max"),
            favorites_only: p.boolean("favorites_only")?,
            seen_before: p.boolean("seen_before")?,
            favorited_directors_only: p.flag("favorited_directors_only")?,
            exclude_seen_countries: p.flag("exclude_seen_countries")?,
            list_filters: p.one("list_filters").map(ListFilters::parse).unwrap_or_default(),
            streaming_services: p.numbers("streaming_service")?,
            streaming_provider_type: p.one("streaming_provider_type").map(str::to_string),
            watch_region: watch_region.clone(),
        };

        let requested = p.one("sorts").map(parse_sorts).unwrap_or_default();
        let expand = requested.first().map_or(false, |s| s.field.expands());

        let mut sorts = Vec::new();
        if p.flag("show_favorites_first")? {
            sorts.push(Sort::desc(SortField::IsFavorite));
        }
        if !requested.is_empty() {
            sorts.extend(requested);
        } else if let Some(field) = p.one("sort_by") {
            let descending = !p.one("sort_order").map_or(false, |o| o.eq_ignore_ascii_case("asc"));
            sorts.push(Sort { field: SortField::parse(field), descending });
            sorts.push(Sort::asc(SortField::Title));
        } else {
            sorts.push(Sort::desc(SortField::Year));
            sorts.push(Sort::asc(SortField::Title));
        }

        let wanted: Vec<Availability> = p.all("availability_type").iter()
            .filter_map(|a| Availability::parse(a))
            .collect();
        let preferred: Vec<i64> = p.numbers("preferred_services")?;
        let availability = if wanted.is_empty() || preferred.is_empty() {
            None
        } else {
            Some(AvailabilityFilter {
                wanted,
                preferred,
                region: watch_region,
                exclude: p.flag("availability_exclude")?,
            })
        };

        Ok(ListingQuery { filter, skip, limit, sorts, expand, availability })
    }

    pub fn tracked_sort_columns(&self) -> Vec<String> {
        self.sorts.iter()
            .filter_map(|s| match &s.field {
                SortField::Tracked(col) => Some(col.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Key {
    Text(String),
    Int(i64),
    Flag(bool),
    Time(DateTime<Utc>),
}

fn text(value: Option<&str>) -> Option<Key> {
    value.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| Key::Text(v.to_lowercase()))
}

/// Release date, or January 1st of the stored year.
fn release_key(movie: &Movie) -> Option<Key> {
    movie.tmdb_data.as_ref()
        .and_then(extract::release_date)
        .map(str::to_string)
        .or_else(|| movie.year.map(|y| format!("{:04}-01-01", y)))
        .map(Key::Text)
}

struct Row<'a> {
    movie: &'a Movie,
    expanded: Option<String>,
}

fn sort_key(row: &Row, field: &SortField, expand: bool, flags: &HashMap<Uuid, BTreeMap<String, bool>>) -> Option<Key> {
    let movie = row.movie;
    let data = movie.tmdb_data.as_ref();
    match field {
        SortField::Title => text(Some(&movie.title)),
        SortField::Year => release_key(movie),
        SortField::Runtime => movie.runtime.map(|r| Key::Int(r as i64)),
        SortField::Director => text(movie.director.as_deref()),
        SortField::Country => text(movie.country.as_deref()),
        SortField::OriginalLanguage => text(data.and_then(extract::original_language).as_deref()),
        SortField::Genres if expand => text(row.expanded.as_deref()),
        SortField::Genres => text(movie.genres.first().map(String::as_str)),
        SortField::ProductionCompany if expand => text(row.expanded.as_deref()),
        SortField::ProductionCompany => text(data.map(extract::production_companies).unwrap_or_default().first().map(String::as_str)),
        SortField::InCollection => Some(Key::Flag(data.map_or(false, extract::in_collection))),
        SortField::IsFavorite => Some(Key::Flag(movie.is_favorite)),
        SortField::DateAdded => Some(Key::Time(movie.created_at)),
        SortField::Tracked(col) => Some(Key::Flag(flags.get(&movie.id)
            .and_then(|f| f.get(col))
            .copied()
            .unwrap_or(false))),
    }
}

/// Nulls sort last whichever the direction.
fn compare(a: &Option<Key>, b: &Option<Key>, descending: bool) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) if descending => y.cmp(x),
        (Some(x), Some(y)) => x.cmp(y),
    }
}

fn expansion_values(movie: &Movie, field: &SortField) -> Vec<String> {
    let mut values: Vec<String> = match field {
        SortField::Genres => movie.genres.clone(),
        SortField::ProductionCompany => movie.tmdb_data.as_ref()
            .map(extract::production_companies)
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    values.sort();
    values.dedup();
    values
}

/// Applies availability, sorting, expansion and paging. Returns the page and
/// the total row count before paging.
pub fn arrange(movies: &[Movie], query: &ListingQuery, flags: &HashMap<Uuid, BTreeMap<String, bool>>) -> (Vec<Movie>, usize) {
    let kept = movies.iter().filter(|m| query.availability.as_ref().map_or(true, |a| a.keeps(m)));

    let expand_field = query.sorts.iter()
        .find(|s| s.field.expands())
        .map(|s| s.field.clone())
        .filter(|_| query.expand);

    let mut rows: Vec<Row> = Vec::new();
    for movie in kept {
        match &expand_field {
            Some(field) => {
                let values = expansion_values(movie, field);
                if values.is_empty() {
                    rows.push(Row { movie, expanded: None });
                }
                rows.extend(values.into_iter().map(|v| Row { movie, expanded: Some(v) }));
            }
            None => rows.push(Row { movie, expanded: None }),
        }
    }

    let mut keyed: Vec<(Vec<Option<Key>>, &Row)> = rows.iter()
        .map(|row| (query.sorts.iter().map(|s| sort_key(row, &s.field, query.expand, flags)).collect(), row))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        query.sorts.iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(s, (ka, kb))| compare(ka, kb, s.descending))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let total = keyed.len();
    let page = keyed.into_iter()
        .skip(query.skip)
        .take(query.limit)
        .map(|(_, row)| row.movie.clone())
        .collect();

    (page, total)
}

/// One movie as listed; the full payload is left to the detail endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct MovieSummary {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: String,
    pub director: Option<String>,
    pub country: Option<String>,
    pub runtime: Option<i32>,
    pub genres: Vec<String>,
    pub tmdb_id: Option<i32>,
    pub poster_url: Option<String>,
    pub original_language: Option<String>,
    pub production_company: Option<String>,
    pub in_collection: bool,
    pub is_favorite: bool,
    pub seen_before: bool,
    pub notes: String,
    pub date_added: String,
    #[serde(flatten)]
    pub lists: BTreeMap<String, bool>,
}

impl MovieSummary {
    pub fn new(movie: Movie, lists: BTreeMap<String, bool>) -> MovieSummary {
        let data = movie.tmdb_data.as_ref();
        MovieSummary {
            poster_url: data.and_then(|d| extract::poster_url(d, "w300")),
            original_language: data.and_then(extract::original_language),
            production_company: data.map(extract::production_companies).unwrap_or_default().into_iter().next(),
            in_collection: data.map_or(false, extract::in_collection),
            id: movie.id,
            title: movie.title,
            year: movie.year,
            letterboxd_uri: movie.letterboxd_uri,
            director: movie.director,
            country: movie.country,
            runtime: movie.runtime,
            genres: movie.genres,
            tmdb_id: movie.tmdb_id,
            is_favorite: movie.is_favorite,
            seen_before: movie.seen_before,
            notes: movie.notes.unwrap_or_default(),
            date_added: movie.created_at.to_rfc3339(),
            lists,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ListingPage {
    pub movies: Vec<MovieSummary>,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct YearRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Stats {
    pub total_movies: usize,
    pub year_range: YearRange,
    pub total_runtime: i64,
    pub favorite_runtime: i64,
    pub unique_directors: usize,
    pub unique_countries: usize,
    pub favorite_movies: usize,
    pub genre_distribution: BTreeMap<String, usize>,
}

impl Stats {
    pub fn from_rows(rows: &[StatsRow]) -> Stats {
        let mut stats = Stats { total_movies: rows.len(), ..Stats::default() };
        let mut directors = BTreeSet::new();
        let mut countries = BTreeSet::new();

        for (year, runtime, director, country, genres, is_favorite) in rows {
            if let Some(y) = year {
                stats.year_range.min = Some(stats.year_range.min.map_or(*y, |m| m.min(*y)));
                stats.year_range.max = Some(stats.year_range.max.map_or(*y, |m| m.max(*y)));
            }
            let minutes = runtime.map_or(0, i64::from);
            stats.total_runtime += minutes;
            if *is_favorite {
                stats.favorite_movies += 1;
                stats.favorite_runtime += minutes;
            }
            directors.extend(director.as_deref().filter(|d| !d.is_empty()));
            countries.extend(country.as_deref().filter(|c| !c.is_empty()));
            for genre in genres {
                *stats.genre_distribution.entry(genre.clone()).or_insert(0) += 1;
            }
        }

        stats.unique_directors = directors.len();
        stats.unique_countries = countries.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn movie(title: &str, year: Option<i32>) -> Movie {
        Movie::new(title, year, &format!("https://boxd.it/{}", title), Utc::now())
    }

    fn titles(movies: &[Movie]) -> Vec<&str> {
        movies.iter().map(|m| m.title.as_str()).collect()
    }

    fn query(qs: &str) -> ListingQuery {
        ListingQuery::parse(qs).unwrap()
    }

    #[test]
    fn parses_repeated_and_bracketed_keys() {
        let p = QueryParams::parse("director=Lynch&director%5B%5D=Varda&country=Korea,%20Republic%20of&skip=").unwrap();
        assert_eq!(p.all("director"), vec!["Lynch", "Varda"]);
        assert_eq!(p.all("country"), vec!["Korea, Republic of"]);
        assert_eq!(p.one("skip"), None);
    }

    #[test]
    fn clamps_pagination() {
        let q = query("");
        assert_eq!((q.skip, q.limit), (0, DEFAULT_LIMIT));
        assert!(ListingQuery::parse("limit=0").is_err());
        assert!(ListingQuery::parse("limit=10001").is_err());
        assert!(ListingQuery::parse("skip=-1").is_err());
        assert_eq!(query("limit=10000&skip=20").limit, 10000);
    }

    #[test]
    fn parses_filters() {
        let q = query("year_min=1990&director=Lynch&director_exclude=true&favorites_only=false\
            &list_filters=%7B%22is_imdb_t250%22%3Atrue%7D&date_added_min=2024-01-01T00:00:00Z&date_added_max=soon");
        assert_eq!(q.filter.year_min, Some(1990));
        assert_eq!(q.filter.director, Facet { values: vec!["Lynch".into()], exclude: true });
        assert_eq!(q.filter.favorites_only, Some(false));
        assert_eq!(q.filter.list_filters.and_filters, vec![("is_imdb_t250".to_string(), true)]);
        assert!(q.filter.date_added_min.is_some());
        assert!(q.filter.date_added_max.is_none());
        assert!(ListingQuery::parse("year_min=nineties").is_err());
        assert!(ListingQuery::parse("favorites_only=maybe").is_err());
    }

    #[test]
    fn resolves_sort_order() {
        assert_eq!(query("").sorts, vec![Sort::desc(SortField::Year), Sort::asc(SortField::Title)]);
        assert_eq!(query("sort_by=runtime&sort_order=asc").sorts,
                   vec![Sort::asc(SortField::Runtime), Sort::asc(SortField::Title)]);

        let q = query("show_favorites_first=true&sorts=%5B%7B%22field%22%3A%22genres%22%2C%22order%22%3A%22desc%22%7D%5D");
        assert_eq!(q.sorts, vec![Sort::desc(SortField::IsFavorite), Sort::desc(SortField::Genres)]);
        assert!(q.expand);
        assert!(!query("sorts=%5B%7B%22field%22%3A%22title%22%7D%2C%7B%22field%22%3A%22genres%22%7D%5D").expand);
    }

    #[test]
    fn unknown_sort_fields_use_release_date() {
        assert_eq!(SortField::parse("popularity"), SortField::Year);
        assert_eq!(SortField::parse("is_imdb_t250"), SortField::Tracked("is_imdb_t250".into()));
        assert_eq!(SortField::parse("is_favorite"), SortField::IsFavorite);
    }

    #[test]
    fn availability_needs_types_and_services() {
        assert!(query("availability_type=for_free").availability.is_none());
        let q = query("availability_type=for_free&preferred_services=8&watch_region=gb");
        let a = q.availability.unwrap();
        assert_eq!(a.region, "GB");
        assert_eq!(a.wanted, vec![Availability::ForFree]);
    }

    #[test]
    fn nulls_sort_last_both_ways() {
        let mut unknown = movie("Unknown", None);
        unknown.runtime = None;
        let mut short = movie("Short", Some(2000));
        short.runtime = Some(80);
        let mut long = movie("Long", Some(2001));
        long.runtime = Some(200);
        let movies = vec![unknown, short, long];

        let (asc, _) = arrange(&movies, &query("sort_by=runtime&sort_order=asc"), &HashMap::new());
        assert_eq!(titles(&asc), vec!["Short", "Long", "Unknown"]);
        let (desc, _) = arrange(&movies, &query("sort_by=runtime&sort_order=desc"), &HashMap::new());
        assert_eq!(titles(&desc), vec!["Long", "Short", "Unknown"]);
    }

    #[test]
    fn default_order_prefers_release_date() {
        let mut a = movie("A", Some(1999));
        a.tmdb_data = Some(json!({"release_date": "1999-12-01"}));
        let b = movie("B", Some(1999));
        let c = movie("C", Some(2005));
        let (page, total) = arrange(&[b, a, c], &query(""), &HashMap::new());
        assert_eq!(titles(&page), vec!["C", "A", "B"]);
        assert_eq!(total, 3);
    }

    #[test]
    fn genre_sort_expands_rows() {
        let mut a = movie("A", Some(2000));
        a.genres = vec!["Horror".into(), "Comedy".into()];
        let mut b = movie("B", Some(2000));
        b.genres = vec!["Drama".into()];
        let c = movie("C", Some(2000));

        let q = query("sorts=%5B%7B%22field%22%3A%22genres%22%2C%22order%22%3A%22asc%22%7D%5D");
        let (page, total) = arrange(&[a, b, c], &q, &HashMap::new());
        assert_eq!(total, 4);
        assert_eq!(titles(&page), vec!["A", "B", "A", "C"]);
    }

    #[test]
    fn pages_after_sorting() {
        let movies: Vec<Movie> = (0..5).map(|i| movie(&format!("M{}", i), Some(2000 + i))).collect();
        let (page, total) = arrange(&movies, &query("skip=1&limit=2"), &HashMap::new());
        assert_eq!(total, 5);
        assert_eq!(titles(&page), vec!["M3", "M2"]);
    }

    #[test]
    fn sorts_by_tracked_flags() {
        let a = movie("A", Some(2000));
        let b = movie("B", Some(2000));
        let mut flags = HashMap::new();
        let mut on = BTreeMap::new();
        on.insert("is_imdb_t250".to_string(), true);
        flags.insert(b.id, on);

        let (page, _) = arrange(&[a, b], &query("sort_by=is_imdb_t250"), &flags);
        assert_eq!(titles(&page), vec!["B", "A"]);
    }

    #[test]
    fn availability_filters_in_memory() {
        let mut streaming = movie("Streaming", Some(2000));
        streaming.tmdb_data = Some(json!({"watch/providers": {"results": {"US": {"flatrate": [{"provider_id": 8}]}}}}));
        let offline = movie("Offline", Some(2000));
        let movies = vec![streaming, offline];

        let (page, _) = arrange(&movies, &query("availability_type=for_free&preferred_services=8"), &HashMap::new());
        assert_eq!(titles(&page), vec!["Streaming"]);
        let (page, _) = arrange(&movies, &query("availability_type=for_free&preferred_services=8&availability_exclude=true"), &HashMap::new());
        assert_eq!(titles(&page), vec!["Offline"]);
    }

    #[test]
    fn summary_reads_payload() {
        let mut m = movie("Heat", Some(1995));
        m.tmdb_data = Some(json!({
            "poster_path": "/heat.jpg",
            "original_language": "en",
            "production_companies": [{"name": "Forward Pass"}, {"name": "Regency"}],
            "belongs_to_collection": null
        }));
        let s = MovieSummary::new(m, BTreeMap::new());
        assert_eq!(s.poster_url.as_deref(), Some("https://image.tmdb.org/t/p/w300/heat.jpg"));
        assert_eq!(s.production_company.as_deref(), Some("Forward Pass"));
        assert!(!s.in_collection);
    }

    #[test]
    fn computes_stats() {
        let rows: Vec<StatsRow> = vec![
            (Some(1995), Some(170), Some("Michael Mann".into()), Some("USA".into()), vec!["Crime".into()], true),
            (Some(1984), None, Some("Michael Mann".into()), None, vec!["Crime".into(), "Drama".into()], false),
            (None, Some(90), None, Some("France".into()), vec![], false),
        ];
        let stats = Stats::from_rows(&rows);
        assert_eq!(stats.total_movies, 3);
        assert_eq!(stats.year_range, YearRange { min: Some(1984), max: Some(1995) });
        assert_eq!(stats.total_runtime, 260);
        assert_eq!(stats.favorite_runtime, 170);
        assert_eq!(stats.unique_directors, 1);
        assert_eq!(stats.unique_countries, 2);
        assert_eq!(stats.genre_distribution["Crime"], 2);
    }
}
