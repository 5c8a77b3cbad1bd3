//! Builds the SQL side of the movie listing. Each filter becomes a boxed
//! predicate over `movies`; TMDB payload filters use jsonb containment so
//! user input is always bound, never spliced.

use chrono::{DateTime, Utc};
use diesel::dsl::{not, sql};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Jsonb};
use log::{debug, warn};
use serde_json::{json, Value};

use crate::core::error::Error;
use crate::core::Movie;
use crate::db;
use crate::db::schema::movies;
use crate::ingest::normalize::is_valid_column_name;
use crate::tmdb::extract::{PRODUCER_JOBS, PROVIDER_TYPES, WRITER_JOBS};

diesel_infix_operator!(JsonbContains, " @> ", backend: Pg);

pub type Predicate = Box<dyn BoxableExpression<movies::table, Pg, SqlType = Bool>>;

/// A multi-valued filter. Values are OR'd; `exclude` negates the result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Facet {
    pub values: Vec<String>,
    pub exclude: bool,
}

impl Facet {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Tracked list conditions: every `and_filters` entry must hold, and each
/// `or_groups` group needs at least one of its entries to hold.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListFilters {
    pub and_filters: Vec<(String, bool)>,
    pub or_groups: Vec<Vec<(String, bool)>>,
}

fn flag_pairs(obj: &serde_json::Map<String, Value>) -> Vec<(String, bool)> {
    obj.iter()
        .filter_map(|(col, v)| v.as_bool().map(|b| (col.clone(), b)))
        .collect()
}

impl ListFilters {
    /// Accepts `{col: bool}` as well as `{and_filters, or_groups}`, where a
    /// group is either `["is_a", "is_b"]` or `{"filters": [{"is_a": true}]}`.
    /// Malformed input is logged and ignored.
    pub fn parse(raw: &str) -> ListFilters {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("ignoring malformed list_filters {:?}: {}", raw, e);
                return ListFilters::default();
            }
        };
        let obj = match parsed.as_object() {
            Some(o) => o,
            None => return ListFilters::default(),
        };

        let or_groups: Vec<Vec<(String, bool)>> = obj.get("or_groups")
            .and_then(Value::as_array)
            .map(|groups| groups.iter().map(|group| match group {
                Value::Array(cols) => cols.iter()
                    .filter_map(Value::as_str)
                    .map(|c| (c.to_string(), true))
                    .collect(),
                Value::Object(o) => o.get("filters")
                    .and_then(Value::as_array)
                    .map(|fs| fs.iter().filter_map(Value::as_object).flat_map(flag_pairs).collect())
                    .unwrap_or_default(),
                _ => Vec::new(),
            }).collect())
            .unwrap_or_default();

        let and_filters = obj.get("and_filters")
            .and_then(Value::as_object)
            .map(flag_pairs)
            .unwrap_or_default();

        if or_groups.is_empty() && and_filters.is_empty() {
            return ListFilters { and_filters: flag_pairs(obj), or_groups };
        }
        ListFilters { and_filters, or_groups }
    }

    pub fn is_empty(&self) -> bool {
        self.and_filters.is_empty() && self.or_groups.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MovieFilter {
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub runtime_min: Option<i32>,
    pub runtime_max: Option<i32>,
    pub director: Facet,
    pub country: Facet,
    pub genre: Facet,
    pub original_language: Facet,
    pub production_company: Facet,
    pub actor: Facet,
    pub writer: Facet,
    pub producer: Facet,
    pub spoken_language: Option<String>,
    pub collection: Option<bool>,
    pub search: Option<String>,
    pub date_added_min: Option<DateTime<Utc>>,
    pub date_added_max: Option<DateTime<Utc>>,
    pub favorites_only: Option<bool>,
    pub seen_before: Option<bool>,
    pub favorited_directors_only: bool,
    pub exclude_seen_countries: bool,
    pub list_filters: ListFilters,
    pub streaming_services: Vec<i64>,
    pub streaming_provider_type: Option<String>,
    pub watch_region: String,
}

/// Stored preferences some filters read.
#[derive(Clone, Debug, Default)]
pub struct FilterContext {
    pub favorite_directors: Vec<String>,
    pub seen_countries: Vec<String>,
    pub tracked_columns: Vec<String>,
}

/// Escapes ILIKE wildcards so user text matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || c == '%' || c == '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Spellings under which a country may be stored.
pub fn country_aliases(name: &str) -> Vec<String> {
    let names: &[&str] = match name.trim().to_lowercase().as_str() {
        "uk" | "united kingdom" => &["UK", "United Kingdom"],
        "usa" | "united states" | "united states of america" => &["USA", "United States", "United States of America"],
        _ => return vec![name.trim().to_string()],
    };
    names.iter().map(|n| n.to_string()).collect()
}

fn any_of(predicates: Vec<Predicate>) -> Option<Predicate> {
    predicates.into_iter().fold(None, |acc, p| Some(match acc {
        None => p,
        Some(a) => Box::new(a.or(p)) as Predicate,
    }))
}

fn all_of(predicates: Vec<Predicate>) -> Option<Predicate> {
    predicates.into_iter().fold(None, |acc, p| Some(match acc {
        None => p,
        Some(a) => Box::new(a.and(p)) as Predicate,
    }))
}

fn negated(predicate: Predicate, exclude: bool) -> Predicate {
    if exclude {
        Box::new(not(predicate)) as Predicate
    } else {
        predicate
    }
}

/// `tmdb_data @> fragment`, false rather than NULL for movies without a payload.
fn tmdb_contains(fragment: Value) -> Predicate {
    let fragment = <Value as AsExpression<Jsonb>>::as_expression(fragment);
    Box::new(movies::tmdb_data.is_not_null()
        .and(JsonbContains::new(movies::tmdb_data, fragment)))
}

fn facet<F>(facet: &Facet, each: F) -> Option<Predicate>
    where F: Fn(&str) -> Predicate
{
    any_of(facet.values.iter().map(|v| each(v)).collect())
        .map(|p| negated(p, facet.exclude))
}

fn country_matches(name: &str) -> Predicate {
    Box::new(movies::country.is_not_null()
        .and(movies::country.ilike(escape_like(name.trim())))
        .or(tmdb_contains(json!({"production_countries": [{"name": name.trim()}]}))))
}

fn crew_matches(name: &str, jobs: &[&str]) -> Predicate {
    let each = jobs.iter()
        .map(|job| tmdb_contains(json!({"credits": {"crew": [{"name": name, "job": job}]}})))
        .collect();
    any_of(each).unwrap_or_else(|| Box::new(sql::<Bool>("FALSE")) as Predicate)
}

fn search_words(words: &[String]) -> Vec<Predicate> {
    let patterns: Vec<String> = words.iter().map(|w| format!("%{}%", escape_like(w))).collect();

    let title = all_of(patterns.iter()
        .map(|p| Box::new(movies::title.ilike(p.clone())) as Predicate)
        .collect());
    let notes = all_of(patterns.iter()
        .map(|p| Box::new(movies::notes.is_not_null().and(movies::notes.ilike(p.clone()))) as Predicate)
        .collect());
    let director = all_of(patterns.iter()
        .map(|p| Box::new(movies::director.is_not_null().and(movies::director.ilike(p.clone()))) as Predicate)
        .collect());

    vec![title, notes, director].into_iter().flatten().collect()
}

fn provider_matches(region: &str, provider_id: i64, kind: &str) -> Predicate {
    let offer = json!({"results": {region: {kind: [{"provider_id": provider_id}]}}});
    Box::new(tmdb_contains(json!({"watch/providers": offer.clone()}))
        .or(tmdb_contains(json!({"watch": {"providers": offer}}))))
}

fn tracked_flag(column: &str, wanted: bool, tracked: &[String]) -> Option<Predicate> {
    if !is_valid_column_name(column) || !tracked.iter().any(|c| c == column) {
        debug!("ignoring filter on unknown list column {}", column);
        return None;
    }
    Some(Box::new(sql::<Bool>(&format!("movies.{} = {}", column, if wanted { "TRUE" } else { "FALSE" }))))
}

/// One predicate per active filter; the listing ANDs them together.
pub fn predicates(filter: &MovieFilter, ctx: &FilterContext) -> Vec<Predicate> {
    let mut out: Vec<Predicate> = Vec::new();

    if let Some(v) = filter.year_min {
        out.push(Box::new(movies::year.ge(v)));
    }
    if let Some(v) = filter.year_max {
        out.push(Box::new(movies::year.le(v)));
    }
    if let Some(v) = filter.runtime_min {
        out.push(Box::new(movies::runtime.ge(v)));
    }
    if let Some(v) = filter.runtime_max {
        out.push(Box::new(movies::runtime.le(v)));
    }

    out.extend(facet(&filter.director, |d| {
        Box::new(movies::director.is_not_null()
            .and(movies::director.ilike(format!("%{}%", escape_like(d)))))
    }));

    let mut country_conditions: Vec<Predicate> = Vec::new();
    country_conditions.extend(facet(&filter.country, country_matches));
    if filter.exclude_seen_countries && !ctx.seen_countries.is_empty() {
        let seen = ctx.seen_countries.iter()
            .flat_map(|c| country_aliases(c))
            .map(|c| country_matches(&c))
            .collect();
        country_conditions.extend(any_of(seen).map(|p| negated(p, true)));
    }
    out.extend(any_of(country_conditions));

    if !filter.genre.is_empty() {
        let overlap: Predicate = Box::new(movies::genres.overlaps_with(filter.genre.values.clone()));
        out.push(negated(overlap, filter.genre.exclude));
    }

    out.extend(facet(&filter.original_language, |l| tmdb_contains(json!({"original_language": l}))));
    out.extend(facet(&filter.production_company, |c| tmdb_contains(json!({"production_companies": [{"name": c}]}))));
    out.extend(facet(&filter.actor, |a| tmdb_contains(json!({"credits": {"cast": [{"name": a}]}}))));
    out.extend(facet(&filter.writer, |w| crew_matches(w, &WRITER_JOBS)));
    out.extend(facet(&filter.producer, |p| crew_matches(p, &PRODUCER_JOBS)));

    if let Some(lang) = &filter.spoken_language {
        out.push(tmdb_contains(json!({"spoken_languages": [{"iso_639_1": lang}]})));
    }

    if let Some(in_collection) = filter.collection {
        let op = if in_collection { "<>" } else { "=" };
        out.push(Box::new(sql::<Bool>(&format!(
            "COALESCE(jsonb_typeof(movies.tmdb_data -> 'belongs_to_collection'), 'null') {} 'null'", op))));
    }

    if let Some(search) = &filter.search {
        let words: Vec<String> = search.split_whitespace().map(str::to_string).collect();
        if !words.is_empty() {
            out.extend(any_of(search_words(&words)));
        }
    }

    if let Some(min) = filter.date_added_min {
        out.push(Box::new(movies::created_at.ge(min)));
    }
    if let Some(max) = filter.date_added_max {
        out.push(Box::new(movies::created_at.le(max)));
    }
    if let Some(f) = filter.favorites_only {
        out.push(Box::new(movies::is_favorite.eq(f)));
    }
    if let Some(s) = filter.seen_before {
        out.push(Box::new(movies::seen_before.eq(s)));
    }

    if filter.favorited_directors_only {
        if ctx.favorite_directors.is_empty() {
            out.push(Box::new(sql::<Bool>("FALSE")));
        } else {
            out.push(Box::new(movies::director.eq_any(ctx.favorite_directors.clone())));
        }
    }

    for (column, wanted) in &filter.list_filters.and_filters {
        out.extend(tracked_flag(column, *wanted, &ctx.tracked_columns));
    }
    for group in &filter.list_filters.or_groups {
        let members = group.iter()
            .filter_map(|(column, wanted)| tracked_flag(column, *wanted, &ctx.tracked_columns))
            .collect();
        out.extend(any_of(members));
    }

    if !filter.streaming_services.is_empty() {
        let region = filter.watch_region.to_uppercase();
        let kinds: Vec<&str> = match filter.streaming_provider_type.as_deref() {
            Some(kind) => vec![kind],
            None => PROVIDER_TYPES.to_vec(),
        };
        let offers = filter.streaming_services.iter()
            .flat_map(|id| kinds.iter().map(move |k| (*id, *k)))
            .map(|(id, kind)| provider_matches(&region, id, kind))
            .collect();
        out.extend(any_of(offers));
    }

    out
}

/// Movies passing every SQL-expressible filter, oldest first.
pub fn load(conn: &PgConnection, filter: &MovieFilter, tracked_columns: &[String]) -> Result<Vec<Movie>, Error> {
    let ctx = FilterContext {
        favorite_directors: if filter.favorited_directors_only { db::favorite_director_names(conn)? } else { Vec::new() },
        seen_countries: if filter.exclude_seen_countries { db::seen_country_names(conn)? } else { Vec::new() },
        tracked_columns: tracked_columns.to_vec(),
    };

    let mut query = movies::table.into_boxed();
    for predicate in predicates(filter, &ctx) {
        query = query.filter(predicate);
    }
    let query = query.order(movies::created_at.asc());

    debug!("{}", diesel::debug_query::<Pg, _>(&query));

    Ok(query.load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(filter: &MovieFilter, ctx: &FilterContext) -> String {
        let mut query = movies::table.select(movies::id).into_boxed();
        for p in predicates(filter, ctx) {
            query = query.filter(p);
        }
        diesel::debug_query::<Pg, _>(&query).to_string()
    }

    fn values(vs: &[&str], exclude: bool) -> Facet {
        Facet { values: vs.iter().map(|v| v.to_string()).collect(), exclude }
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("100%_sure\\"), "100\\%\\_sure\\\\");
        assert_eq!(escape_like("Heat"), "Heat");
    }

    #[test]
    fn expands_country_aliases() {
        assert_eq!(country_aliases("uk"), vec!["UK", "United Kingdom"]);
        assert_eq!(country_aliases("United States").len(), 3);
        assert_eq!(country_aliases(" France "), vec!["France"]);
    }

    #[test]
    fn empty_filter_has_no_predicates() {
        assert!(predicates(&MovieFilter::default(), &FilterContext::default()).is_empty());
    }

    #[test]
    fn ranges_and_flags_each_add_a_predicate() {
        let filter = MovieFilter {
            year_min: Some(1990),
            year_max: Some(1999),
            runtime_max: Some(120),
            favorites_only: Some(true),
            ..MovieFilter::default()
        };
        assert_eq!(predicates(&filter, &FilterContext::default()).len(), 4);
    }

    #[test]
    fn director_filter_is_escaped_and_negatable() {
        let filter = MovieFilter { director: values(&["50%"], true), ..MovieFilter::default() };
        let sql = rendered(&filter, &FilterContext::default());
        assert!(sql.contains("NOT"), "{}", sql);
        assert!(sql.contains("ILIKE"), "{}", sql);
        assert!(sql.contains("%50\\\\%%") || sql.contains("%50\\%%"), "{}", sql);
    }

    #[test]
    fn payload_filters_use_containment() {
        let filter = MovieFilter {
            original_language: values(&["fr"], false),
            writer: values(&["Agnès Varda"], false),
            ..MovieFilter::default()
        };
        let sql = rendered(&filter, &FilterContext::default());
        assert!(sql.contains("@>"), "{}", sql);
        assert!(sql.contains("Screenplay"), "{}", sql);
    }

    #[test]
    fn seen_countries_only_apply_when_known() {
        let filter = MovieFilter { exclude_seen_countries: true, ..MovieFilter::default() };
        assert!(predicates(&filter, &FilterContext::default()).is_empty());

        let ctx = FilterContext { seen_countries: vec!["UK".into()], ..FilterContext::default() };
        let sql = rendered(&filter, &ctx);
        assert!(sql.contains("United Kingdom"), "{}", sql);
    }

    #[test]
    fn favorite_directors_without_favorites_match_nothing() {
        let filter = MovieFilter { favorited_directors_only: true, ..MovieFilter::default() };
        let sql = rendered(&filter, &FilterContext::default());
        assert!(sql.contains("FALSE"), "{}", sql);
    }

    #[test]
    fn list_filters_ignore_unknown_columns() {
        let filter = MovieFilter {
            list_filters: ListFilters::parse(r#"{"is_imdb_t250": true, "is_nope": false, "is_x; DROP": true}"#),
            ..MovieFilter::default()
        };
        let ctx = FilterContext { tracked_columns: vec!["is_imdb_t250".into()], ..FilterContext::default() };
        let sql = rendered(&filter, &ctx);
        assert!(sql.contains("movies.is_imdb_t250 = TRUE"), "{}", sql);
        assert!(!sql.contains("is_nope"), "{}", sql);
        assert!(!sql.contains("DROP"), "{}", sql);
    }

    #[test]
    fn parses_list_filter_shapes() {
        let legacy = ListFilters::parse(r#"{"is_a": true, "is_b": false, "is_c": null}"#);
        assert_eq!(legacy.and_filters, vec![("is_a".to_string(), true), ("is_b".to_string(), false)]);
        assert!(legacy.or_groups.is_empty());

        let grouped = ListFilters::parse(
            r#"{"and_filters": {"is_a": true}, "or_groups": [["is_b", "is_c"], {"filters": [{"is_d": false}]}]}"#);
        assert_eq!(grouped.and_filters, vec![("is_a".to_string(), true)]);
        assert_eq!(grouped.or_groups[0], vec![("is_b".to_string(), true), ("is_c".to_string(), true)]);
        assert_eq!(grouped.or_groups[1], vec![("is_d".to_string(), false)]);

        assert!(ListFilters::parse("not json").is_empty());
        assert!(ListFilters::parse("[1, 2]").is_empty());
    }

    #[test]
    fn search_needs_words() {
        let blank = MovieFilter { search: Some("   ".into()), ..MovieFilter::default() };
        assert!(predicates(&blank, &FilterContext::default()).is_empty());

        let words = MovieFilter { search: Some("blue velvet".into()), ..MovieFilter::default() };
        assert_eq!(predicates(&words, &FilterContext::default()).len(), 1);
    }

    #[test]
    fn streaming_checks_every_offer_type_by_default() {
        let filter = MovieFilter {
            streaming_services: vec![8],
            watch_region: "us".into(),
            ..MovieFilter::default()
        };
        let sql = rendered(&filter, &FilterContext::default());
        assert_eq!(sql.matches("@>").count(), PROVIDER_TYPES.len() * 2);
    }
}
