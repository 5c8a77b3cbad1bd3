use actix_web::web::Json;
use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::action::{self, Preference};
use crate::core::error::Error;
use crate::db::DbConnectionPool;

#[derive(Debug, Default, Deserialize)]
pub struct DirectorBody {
    pub director_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CountryBody {
    pub country_name: Option<String>,
}

/// `{"<name_field>": name, "message": message}`
fn named(pref: Preference, (name, message): (String, String)) -> Value {
    let mut body = Map::new();
    body.insert(pref.name_field().to_string(), Value::String(name));
    body.insert("message".to_string(), Value::String(message));
    Value::Object(body)
}

async fn list(pool: web::Data<DbConnectionPool>, pref: Preference) -> Result<HttpResponse, Error> {
    let names = web::block(move || {
        let conn = pool.get()?;
        action::preference_names(&conn, pref)
    }).await??;

    let mut body = Map::new();
    body.insert(pref.key().to_string(), Value::from(names));
    Ok(HttpResponse::Ok().json(Value::Object(body)))
}

async fn add(pool: web::Data<DbConnectionPool>, pref: Preference, name: Option<String>) -> Result<HttpResponse, Error> {
    let added = web::block(move || {
        let conn = pool.get()?;
        action::add_preference(&conn, pref, name.as_deref())
    }).await??;

    Ok(HttpResponse::Ok().json(named(pref, added)))
}

async fn remove(pool: web::Data<DbConnectionPool>, pref: Preference, name: String) -> Result<HttpResponse, Error> {
    let removed = web::block(move || {
        let conn = pool.get()?;
        action::remove_preference(&conn, pref, &name)
    }).await??;

    Ok(HttpResponse::Ok().json(named(pref, removed)))
}

#[get("/api/directors/favorites")]
pub async fn list_directors(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    list(pool, Preference::FavoriteDirectors).await
}

#[post("/api/directors/favorites")]
pub async fn add_director(pool: web::Data<DbConnectionPool>, req: Json<DirectorBody>) -> Result<HttpResponse, Error> {
    add(pool, Preference::FavoriteDirectors, req.into_inner().director_name).await
}

#[delete("/api/directors/favorites/{name}")]
pub async fn remove_director(pool: web::Data<DbConnectionPool>, name: web::Path<String>) -> Result<HttpResponse, Error> {
    remove(pool, Preference::FavoriteDirectors, name.into_inner()).await
}

#[get("/api/countries/seen")]
pub async fn list_countries(pool: web::Data<DbConnectionPool>) -> Result<HttpResponse, Error> {
    list(pool, Preference::SeenCountries).await
}

#[post("/api/countries/seen")]
pub async fn add_country(pool: web::Data<DbConnectionPool>, req: Json<CountryBody>) -> Result<HttpResponse, Error> {
    add(pool, Preference::SeenCountries, req.into_inner().country_name).await
}

#[delete("/api/countries/seen/{name}")]
pub async fn remove_country(pool: web::Data<DbConnectionPool>, name: web::Path<String>) -> Result<HttpResponse, Error> {
    remove(pool, Preference::SeenCountries, name.into_inner()).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn names_the_field_per_preference() {
        let body = named(Preference::SeenCountries, ("France".to_string(), "Country added to seen list".to_string()));
        assert_eq!(body, json!({"country_name": "France", "message": "Country added to seen list"}));

        let body = named(Preference::FavoriteDirectors, ("Agnès Varda".to_string(), "Director removed from favorites".to_string()));
        assert_eq!(body["director_name"], "Agnès Varda");
    }
}
