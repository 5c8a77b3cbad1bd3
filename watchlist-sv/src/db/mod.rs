use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use log::debug;
use r2d2::Pool;
use serde_json::Value;
use uuid::Uuid;

use crate::core::{FavoriteDirector, Movie, MovieChangeset, MovieKey, NewFavoriteDirector, NewSeenCountry, SeenCountry};
use crate::core::error::Error;
use crate::core::error::Error::DBQueryError;

pub mod filter;
pub mod migrate;
pub mod schema;
pub mod tracked;

pub type DbConnectionPool = Pool<ConnectionManager<PgConnection>>;

pub fn connect(database_url: &str, max_size: u32) -> Result<DbConnectionPool, Error> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Ok(Pool::builder().max_size(max_size).build(manager)?)
}

pub fn find_one_movie(conn: &PgConnection, movie_id: Uuid) -> Result<Option<Movie>, Error> {
    use schema::movies::dsl::*;

    movies.filter(id.eq(movie_id))
        .first(conn)
        .optional()
        .map_err(DBQueryError)
}

pub fn find_movie_by_uri(conn: &PgConnection, uri: &str) -> Result<Option<Movie>, Error> {
    use schema::movies::dsl::*;

    movies.filter(letterboxd_uri.eq(uri))
        .first(conn)
        .optional()
        .map_err(DBQueryError)
}

pub fn find_movie_by_title_year(conn: &PgConnection, movie_title: &str, movie_year: i32) -> Result<Option<Movie>, Error> {
    use schema::movies::dsl::*;

    movies.filter(title.eq(movie_title).and(year.eq(movie_year)))
        .order(created_at.asc())
        .first(conn)
        .optional()
        .map_err(DBQueryError)
}

/// An already stored copy of a film, by uri first and then by title and year.
pub fn find_existing(conn: &PgConnection, uri: Option<&str>, movie_title: &str, movie_year: i32) -> Result<Option<Movie>, Error> {
    if let Some(u) = uri {
        if let Some(found) = find_movie_by_uri(conn, u)? {
            return Ok(Some(found));
        }
    }
    find_movie_by_title_year(conn, movie_title, movie_year)
}

pub fn all_movies(conn: &PgConnection) -> Result<Vec<Movie>, Error> {
    use schema::movies::dsl::*;

    movies.order(created_at.asc())
        .load(conn)
        .map_err(DBQueryError)
}

pub fn all_movie_keys(conn: &PgConnection) -> Result<Vec<MovieKey>, Error> {
    use schema::movies::dsl::*;

    movies.select((id, title, year, letterboxd_uri))
        .order(created_at.asc())
        .load(conn)
        .map_err(DBQueryError)
}

pub fn find_movies_by_ids(conn: &PgConnection, ids: &[Uuid]) -> Result<Vec<Movie>, Error> {
    use schema::movies::dsl::*;

    if ids.is_empty() {
        return Ok(Vec::new());
    }

    movies.filter(id.eq_any(ids))
        .load(conn)
        .map_err(DBQueryError)
}

pub fn find_movies_by_tmdb_ids(conn: &PgConnection, tmdb_ids: &[i32], exclude: Uuid, max: i64) -> Result<Vec<Movie>, Error> {
    use schema::movies::dsl::*;

    if tmdb_ids.is_empty() {
        return Ok(Vec::new());
    }

    let query = movies
        .filter(tmdb_id.eq_any(tmdb_ids))
        .filter(id.ne(exclude))
        .limit(max);

    debug!("{}", diesel::debug_query(&query));

    query.load(conn).map_err(DBQueryError)
}

pub fn find_movies_by_director(conn: &PgConnection, name: &str) -> Result<Vec<Movie>, Error> {
    use schema::movies::dsl::*;

    movies.filter(director.eq(name))
        .load(conn)
        .map_err(DBQueryError)
}

pub fn create_movie(conn: &PgConnection, movie: &Movie) -> Result<Option<Movie>, Error> {
    use schema::movies;

    let query = diesel::insert_into(movies::table)
        .values(movie)
        .on_conflict_do_nothing();

    debug!("{}", diesel::debug_query(&query));

    query
        .get_result(conn)
        .optional()
        .map_err(DBQueryError)
}

pub fn update_movie(conn: &PgConnection, movie_id: Uuid, changes: &MovieChangeset) -> Result<Option<Movie>, Error> {
    use schema::movies;
    use schema::movies::dsl::*;

    let query = diesel::update(movies::table)
        .set(changes)
        .filter(id.eq(movie_id));

    debug!("{}", diesel::debug_query(&query));

    query
        .get_result(conn)
        .optional()
        .map_err(DBQueryError)
}

pub fn delete_movie(conn: &PgConnection, movie_id: Uuid) -> Result<bool, Error> {
    use schema::movies;
    use schema::movies::dsl::*;

    let query = diesel::delete(movies::table)
        .filter(id.eq(movie_id));

    debug!("{}", diesel::debug_query(&query));

    query
        .execute(conn)
        .map_err(DBQueryError)
        .map(|r| r > 0)
}

pub fn delete_movies(conn: &PgConnection, ids: &[Uuid]) -> Result<usize, Error> {
    use schema::movies;
    use schema::movies::dsl::*;

    if ids.is_empty() {
        return Ok(0);
    }

    diesel::delete(movies::table)
        .filter(id.eq_any(ids))
        .execute(conn)
        .map_err(DBQueryError)
}

pub fn delete_all_movies(conn: &PgConnection) -> Result<usize, Error> {
    diesel::delete(schema::movies::table)
        .execute(conn)
        .map_err(DBQueryError)
}

/// Movie columns feeding the collection stats.
pub type StatsRow = (Option<i32>, Option<i32>, Option<String>, Option<String>, Vec<String>, bool);

pub fn stats_rows(conn: &PgConnection) -> Result<Vec<StatsRow>, Error> {
    use schema::movies::dsl::*;

    movies.select((year, runtime, director, country, genres, is_favorite))
        .load(conn)
        .map_err(DBQueryError)
}

pub fn distinct_directors(conn: &PgConnection) -> Result<Vec<String>, Error> {
    use schema::movies::dsl::*;

    movies.select(director)
        .filter(director.is_not_null().and(director.ne("")))
        .distinct()
        .order(director.asc())
        .load::<Option<String>>(conn)
        .map(|rows| rows.into_iter().flatten().collect())
        .map_err(DBQueryError)
}

pub fn distinct_countries(conn: &PgConnection) -> Result<Vec<String>, Error> {
    use schema::movies::dsl::*;

    movies.select(country)
        .filter(country.is_not_null().and(country.ne("")))
        .distinct()
        .order(country.asc())
        .load::<Option<String>>(conn)
        .map(|rows| rows.into_iter().flatten().collect())
        .map_err(DBQueryError)
}

pub fn all_genre_arrays(conn: &PgConnection) -> Result<Vec<Vec<String>>, Error> {
    use schema::movies::dsl::*;

    movies.select(genres)
        .load(conn)
        .map_err(DBQueryError)
}

/// Every cached TMDB payload.
pub fn tmdb_payloads(conn: &PgConnection) -> Result<Vec<Value>, Error> {
    use schema::movies::dsl::*;

    movies.select(tmdb_data)
        .filter(tmdb_data.is_not_null())
        .load::<Option<Value>>(conn)
        .map(|rows| rows.into_iter().flatten().collect())
        .map_err(DBQueryError)
}

pub fn find_favorite_directors(conn: &PgConnection) -> Result<Vec<FavoriteDirector>, Error> {
    use schema::favorite_directors::dsl::*;

    favorite_directors.order(id.asc())
        .load(conn)
        .map_err(DBQueryError)
}

pub fn favorite_director_names(conn: &PgConnection) -> Result<Vec<String>, Error> {
    Ok(find_favorite_directors(conn)?.into_iter().map(|d| d.director_name).collect())
}

/// `false` when the director was already a favorite.
pub fn add_favorite_director(conn: &PgConnection, name: &str) -> Result<bool, Error> {
    use schema::favorite_directors;

    diesel::insert_into(favorite_directors::table)
        .values(&NewFavoriteDirector { director_name: name })
        .on_conflict_do_nothing()
        .execute(conn)
        .map(|r| r > 0)
        .map_err(DBQueryError)
}

pub fn remove_favorite_director(conn: &PgConnection, name: &str) -> Result<bool, Error> {
    use schema::favorite_directors;
    use schema::favorite_directors::dsl::*;

    diesel::delete(favorite_directors::table)
        .filter(director_name.eq(name))
        .execute(conn)
        .map(|r| r > 0)
        .map_err(DBQueryError)
}

pub fn clear_favorite_directors(conn: &PgConnection) -> Result<usize, Error> {
    diesel::delete(schema::favorite_directors::table)
        .execute(conn)
        .map_err(DBQueryError)
}

pub fn find_seen_countries(conn: &PgConnection) -> Result<Vec<SeenCountry>, Error> {
    use schema::seen_countries::dsl::*;

    seen_countries.order(id.asc())
        .load(conn)
        .map_err(DBQueryError)
}

pub fn seen_country_names(conn: &PgConnection) -> Result<Vec<String>, Error> {
    Ok(find_seen_countries(conn)?.into_iter().map(|c| c.country_name).collect())
}

/// `false` when the country was already marked seen.
pub fn add_seen_country(conn: &PgConnection, name: &str) -> Result<bool, Error> {
    use schema::seen_countries;

    diesel::insert_into(seen_countries::table)
        .values(&NewSeenCountry { country_name: name })
        .on_conflict_do_nothing()
        .execute(conn)
        .map(|r| r > 0)
        .map_err(DBQueryError)
}

pub fn remove_seen_country(conn: &PgConnection, name: &str) -> Result<bool, Error> {
    use schema::seen_countries;
    use schema::seen_countries::dsl::*;

    diesel::delete(seen_countries::table)
        .filter(country_name.eq(name))
        .execute(conn)
        .map(|r| r > 0)
        .map_err(DBQueryError)
}

pub fn clear_seen_countries(conn: &PgConnection) -> Result<usize, Error> {
    diesel::delete(schema::seen_countries::table)
        .execute(conn)
        .map_err(DBQueryError)
}
