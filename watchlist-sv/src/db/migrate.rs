use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use log::info;

use crate::core::error::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS movies (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    year INTEGER,
    letterboxd_uri TEXT NOT NULL UNIQUE,
    director TEXT,
    country TEXT,
    runtime INTEGER,
    genres TEXT[] NOT NULL DEFAULT '{}',
    tmdb_id INTEGER,
    tmdb_data JSONB,
    is_favorite BOOLEAN NOT NULL DEFAULT FALSE,
    seen_before BOOLEAN NOT NULL DEFAULT FALSE,
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS movies_title_idx ON movies (title);
CREATE INDEX IF NOT EXISTS movies_year_idx ON movies (year);
CREATE INDEX IF NOT EXISTS movies_director_idx ON movies (director);
CREATE INDEX IF NOT EXISTS movies_country_idx ON movies (country);
CREATE INDEX IF NOT EXISTS movies_is_favorite_idx ON movies (is_favorite);

CREATE TABLE IF NOT EXISTS favorite_directors (
    id SERIAL PRIMARY KEY,
    director_name TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS seen_countries (
    id SERIAL PRIMARY KEY,
    country_name TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

/// Creates the static tables. Safe to run on every start.
pub fn run(conn: &PgConnection) -> Result<(), Error> {
    info!("ensuring database schema");
    conn.batch_execute(SCHEMA)?;
    Ok(())
}
