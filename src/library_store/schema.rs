//! SQLite schema for the listening library database.
//!
//! Catalog entities (artists, albums, tracks) are keyed by integer rowids
//! with unique external base62 ids for lookups. Play events are unique on
//! (user, track, played_at) so replayed imports can never duplicate history.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const USERS_TABLE: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("handle", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("last_import_at", &SqlType::Text),
        sqlite_column!("last_import_status", &SqlType::Text),
    ],
    indices: &[("idx_users_handle", "handle")],
    unique_constraints: &[],
};

/// Provider access/refresh token pair, one row per user.
const PROVIDER_TOKENS_TABLE: Table = Table {
    name: "provider_tokens",
    columns: &[
        sqlite_column!(
            "user_rowid",
            &SqlType::Integer,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("access_token", &SqlType::Text, non_null = true),
        sqlite_column!("refresh_token", &SqlType::Text, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const ARTISTS_TABLE: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("image_url", &SqlType::Text),
    ],
    indices: &[("idx_artists_id", "id")],
    unique_constraints: &[],
};

/// Genre tags arrive opportunistically, possibly after the artist row was
/// first created; rows are only ever added, never rewritten.
const ARTIST_GENRES_TABLE: Table = Table {
    name: "artist_genres",
    columns: &[
        sqlite_column!("artist_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("genre", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_artist_genres_artist", "artist_rowid")],
    unique_constraints: &[&["artist_rowid", "genre"]],
};

const ALBUMS_TABLE: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("release_date", &SqlType::Text),
        sqlite_column!("image_url", &SqlType::Text),
    ],
    indices: &[("idx_albums_id", "id")],
    unique_constraints: &[],
};

/// Audio feature columns are nullable; a track counts as feature-complete
/// only when all four are present.
const TRACKS_TABLE: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("album_rowid", &SqlType::Integer),
        sqlite_column!("popularity", &SqlType::Integer),
        sqlite_column!("preview_url", &SqlType::Text),
        sqlite_column!("image_url", &SqlType::Text),
        sqlite_column!("energy", &SqlType::Real),
        sqlite_column!("danceability", &SqlType::Real),
        sqlite_column!("valence", &SqlType::Real),
        sqlite_column!("tempo", &SqlType::Real),
    ],
    indices: &[
        ("idx_tracks_id", "id"),
        ("idx_tracks_album", "album_rowid"),
    ],
    unique_constraints: &[],
};

const TRACK_ARTISTS_TABLE: Table = Table {
    name: "track_artists",
    columns: &[
        sqlite_column!("track_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("artist_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_track_artists_track", "track_rowid"),
        ("idx_track_artists_artist", "artist_rowid"),
    ],
    unique_constraints: &[&["track_rowid", "artist_rowid"]],
};

/// played_at is RFC3339 with millisecond precision; the fixed format keeps
/// lexicographic order equal to chronological order for range scans.
const PLAY_EVENTS_TABLE: Table = Table {
    name: "play_events",
    columns: &[
        sqlite_column!("user_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("track_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("played_at", &SqlType::Text, non_null = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_play_events_user", "user_rowid"),
        ("idx_play_events_track", "track_rowid"),
    ],
    unique_constraints: &[&["user_rowid", "track_rowid", "played_at"]],
};

const IMPORT_RUNS_TABLE: Table = Table {
    name: "import_runs",
    columns: &[
        sqlite_column!("rowid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("user_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("message", &SqlType::Text),
        sqlite_column!("imported_plays", &SqlType::Integer, non_null = true),
        sqlite_column!("imported_tracks", &SqlType::Integer, non_null = true),
        sqlite_column!("rate_limited_hits", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
    ],
    indices: &[("idx_import_runs_user", "user_rowid")],
    unique_constraints: &[],
};

/// Daily recommendation cache, overwritten in place on forced regeneration.
const REC_RUNS_TABLE: Table = Table {
    name: "rec_runs",
    columns: &[
        sqlite_column!("user_rowid", &SqlType::Integer, non_null = true),
        sqlite_column!("date", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_rec_runs_user", "user_rowid")],
    unique_constraints: &[&["user_rowid", "date"]],
};

pub const LIBRARY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        USERS_TABLE,
        PROVIDER_TOKENS_TABLE,
        ARTISTS_TABLE,
        ARTIST_GENRES_TABLE,
        ALBUMS_TABLE,
        TRACKS_TABLE,
        TRACK_ARTISTS_TABLE,
        PLAY_EVENTS_TABLE,
        IMPORT_RUNS_TABLE,
        REC_RUNS_TABLE,
    ],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &LIBRARY_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn duplicate_play_event_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        LIBRARY_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        conn.execute(
            "INSERT INTO play_events (user_rowid, track_rowid, played_at, source)
             VALUES (1, 7, '2024-01-01T10:00:00.000Z', 'file_native')",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO play_events (user_rowid, track_rowid, played_at, source)
             VALUES (1, 7, '2024-01-01T10:00:00.000Z', 'provider_sync')",
            [],
        );
        assert!(err.is_err());

        // same instant for a different user is fine
        conn.execute(
            "INSERT INTO play_events (user_rowid, track_rowid, played_at, source)
             VALUES (2, 7, '2024-01-01T10:00:00.000Z', 'file_native')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn rec_run_is_singleton_per_user_and_date() {
        let conn = Connection::open_in_memory().unwrap();
        LIBRARY_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        conn.execute(
            "INSERT INTO rec_runs (user_rowid, date, payload, created_at)
             VALUES (1, '2024-03-01', '{}', '2024-03-01T08:00:00.000Z')",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO rec_runs (user_rowid, date, payload, created_at)
             VALUES (1, '2024-03-01', '{}', '2024-03-01T09:00:00.000Z')",
            [],
        );
        assert!(err.is_err());
    }
}
