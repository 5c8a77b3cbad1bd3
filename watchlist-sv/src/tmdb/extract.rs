//! Readers over the cached TMDB details payload stored in `movies.tmdb_data`.
//!
//! Payloads come from whatever TMDB returned at enrichment time, so every
//! accessor tolerates missing or oddly typed fields.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Map, Value};

pub const POSTER_BASE: &str = "https://image.tmdb.org/t/p";

pub const WRITER_JOBS: [&str; 2] = ["Writer", "Screenplay"];
pub const PRODUCER_JOBS: [&str; 2] = ["Producer", "Executive Producer"];
pub const PROVIDER_TYPES: [&str; 5] = ["flatrate", "rent", "buy", "free", "ads"];

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn objects<'a>(v: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or(&[])
        .iter()
        .filter(|item| item.is_object())
}

fn names<'a>(v: &'a Value, key: &str, field: &str) -> Vec<String> {
    objects(v, key).filter_map(|o| str_field(o, field)).map(str::to_string).collect()
}

pub fn poster_url(data: &Value, size: &str) -> Option<String> {
    str_field(data, "poster_path")
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"))
        .map(|p| format!("{}/{}/{}", POSTER_BASE, size, p.trim_start_matches('/')))
}

pub fn original_language(data: &Value) -> Option<String> {
    str_field(data, "original_language").map(str::to_string)
}

pub fn release_date(data: &Value) -> Option<&str> {
    str_field(data, "release_date")
}

pub fn release_year(data: &Value) -> Option<i32> {
    release_date(data).and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

pub fn production_companies(data: &Value) -> Vec<String> {
    names(data, "production_companies", "name")
}

pub fn production_countries(data: &Value) -> Vec<String> {
    names(data, "production_countries", "name")
}

pub fn spoken_languages(data: &Value) -> Vec<String> {
    names(data, "spoken_languages", "iso_639_1")
}

pub fn genre_names(data: &Value) -> Vec<String> {
    names(data, "genres", "name")
}

pub fn cast_names(data: &Value) -> Vec<String> {
    data.get("credits").map(|c| names(c, "cast", "name")).unwrap_or_default()
}

pub fn crew_names(data: &Value, jobs: &[&str]) -> Vec<String> {
    data.get("credits")
        .map(|c| objects(c, "crew")
            .filter(|p| str_field(p, "job").map_or(false, |j| jobs.contains(&j)))
            .filter_map(|p| str_field(p, "name"))
            .map(str::to_string)
            .collect())
        .unwrap_or_default()
}

pub fn director(data: &Value) -> Option<String> {
    crew_names(data, &["Director"]).into_iter().next()
}

pub fn collection(data: &Value) -> Option<&Value> {
    data.get("belongs_to_collection").filter(|c| !c.is_null())
}

pub fn in_collection(data: &Value) -> bool {
    collection(data).is_some()
}

pub fn collection_id(data: &Value) -> Option<i64> {
    collection(data).and_then(|c| c.get("id")).and_then(Value::as_i64)
}

/// Ids under `similar.results`.
pub fn similar_ids(data: &Value) -> Vec<i64> {
    data.get("similar")
        .map(|s| objects(s, "results").filter_map(|m| m.get("id").and_then(Value::as_i64)).collect())
        .unwrap_or_default()
}

/// Distinct, sorted values collected from many payloads.
pub fn distinct<F>(payloads: &[Value], pick: F) -> Vec<String>
where
    F: Fn(&Value) -> Vec<String>,
{
    payloads.iter()
        .flat_map(|p| pick(p))
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// The `watch/providers` block, which older payloads store as `watch.providers`.
pub fn watch_providers(data: &Value) -> Option<&Value> {
    data.get("watch")
        .and_then(|w| w.get("providers"))
        .filter(|p| p.as_object().map_or(false, |o| !o.is_empty()))
        .or_else(|| data.get("watch/providers").filter(|p| p.as_object().map_or(false, |o| !o.is_empty())))
}

pub fn region_providers<'a>(data: &'a Value, region: &str) -> Option<&'a Value> {
    watch_providers(data)
        .and_then(|w| w.get("results"))
        .and_then(|r| r.get(region.to_uppercase()))
        .filter(|p| p.as_object().map_or(false, |o| !o.is_empty()))
}

/// Providers for a region, grouped by offer type.
pub fn streaming_info(data: &Value, region: &str) -> Value {
    let providers = region_providers(data, region);
    let mut info = Map::new();
    for kind in PROVIDER_TYPES.iter() {
        let list = providers.and_then(|p| p.get(*kind)).cloned().unwrap_or_else(|| json!([]));
        info.insert(kind.to_string(), list);
    }
    Value::Object(info)
}

fn provider_ids(providers: &Value, kind: &str) -> Vec<i64> {
    objects(providers, kind).filter_map(|p| p.get("provider_id").and_then(Value::as_i64)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    ForFree,
    ForRent,
    ToBuy,
    Unavailable,
}

impl Availability {
    pub fn parse(raw: &str) -> Option<Availability> {
        match raw {
            "for_free" => Some(Availability::ForFree),
            "for_rent" => Some(Availability::ForRent),
            "to_buy" => Some(Availability::ToBuy),
            "unavailable" => Some(Availability::Unavailable),
            _ => None,
        }
    }
}

/// True when any preferred service offers the movie in any of `wanted`.
/// `Unavailable` matches when none of the preferred services carry it at all.
pub fn is_available(data: Option<&Value>, region: &str, preferred: &[i64], wanted: &[Availability]) -> bool {
    let data = match data {
        Some(d) if d.is_object() => d,
        _ => return false,
    };
    if preferred.is_empty() || wanted.is_empty() {
        return false;
    }

    let providers = match region_providers(data, region) {
        Some(p) => p,
        None => return wanted.contains(&Availability::Unavailable),
    };

    let free: Vec<i64> = provider_ids(providers, "flatrate").into_iter()
        .chain(provider_ids(providers, "free"))
        .collect();
    let rent = provider_ids(providers, "rent");
    let buy = provider_ids(providers, "buy");
    let any = |ids: &[i64]| preferred.iter().any(|p| ids.contains(p));

    wanted.iter().any(|w| match w {
        Availability::ForFree => any(&free),
        Availability::ForRent => any(&rent),
        Availability::ToBuy => any(&buy),
        Availability::Unavailable => !(any(&free) || any(&rent) || any(&buy)),
    })
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StreamingService {
    pub id: i64,
    pub ids: Vec<i64>,
    pub name: String,
    pub logo_path: Option<String>,
}

fn service_key(name: &str) -> String {
    let key = name.trim().to_lowercase()
        .replace('+', " plus")
        .replace('&', " and")
        .replace(" and ", " ");
    key.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_reseller_channel(name: &str) -> bool {
    let lower = name.to_lowercase();
    ((lower.contains("amazon channel") || lower.contains("amzon channel")) && lower != "amazon prime video")
        || lower.contains("apple tv channel")
        || lower.contains("roku premium channel")
}

/// Collapses TMDB's provider catalogue into one entry per service, e.g.
/// "Disney+" and "Disney Plus" share an entry holding both provider ids.
pub fn group_streaming_services(providers: &[Value]) -> Vec<StreamingService> {
    let mut grouped: BTreeMap<String, StreamingService> = BTreeMap::new();

    for provider in providers {
        let name = match str_field(provider, "provider_name") {
            Some(n) if !is_reseller_channel(n) => n,
            _ => continue,
        };
        let key = service_key(name);
        if key.is_empty() {
            continue;
        }

        let id = match provider.get("provider_id").and_then(Value::as_i64) {
            Some(id) => id,
            None => continue,
        };
        let logo = str_field(provider, "logo_path").map(str::to_string);

        let service = grouped.entry(key).or_insert_with(|| StreamingService {
            id,
            ids: Vec::new(),
            name: name.to_string(),
            logo_path: None,
        });
        if !service.ids.contains(&id) {
            service.ids.push(id);
        }
        if service.logo_path.is_none() {
            service.logo_path = logo;
        }
        if name.len() < service.name.len() {
            service.name = name.to_string();
        }
    }

    let mut services: Vec<StreamingService> = grouped.into_iter().map(|(_, s)| s).collect();
    services.sort_by(|a, b| a.name.cmp(&b.name));
    services
}
