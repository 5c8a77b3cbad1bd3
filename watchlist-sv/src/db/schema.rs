// Tracked list columns (`is_*`) are added at runtime and are not declared here.
table! {
    movies (id) {
        id -> Uuid,
        title -> Text,
        year -> Nullable<Integer>,
        letterboxd_uri -> Text,
        director -> Nullable<Text>,
        country -> Nullable<Text>,
        runtime -> Nullable<Integer>,
        genres -> Array<Text>,
        tmdb_id -> Nullable<Integer>,
        tmdb_data -> Nullable<Jsonb>,
        is_favorite -> Bool,
        seen_before -> Bool,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Nullable<Timestamptz>,
    }
}

table! {
    favorite_directors (id) {
        id -> Integer,
        director_name -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    seen_countries (id) {
        id -> Integer,
        country_name -> Text,
        created_at -> Timestamptz,
    }
}
