//! JSON builders for import payloads and mock provider objects.

use serde_json::{json, Value};

/// Canonical payload with one album, one artist and the given tracks/plays.
pub fn canonical_payload(tracks: Vec<Value>, plays: Vec<Value>) -> Value {
    json!({
        "albums": [canonical_album("alb1", "First Album")],
        "artists": [canonical_artist("art1", "First Artist", vec!["indie rock"])],
        "tracks": tracks,
        "plays": plays,
    })
}

pub fn canonical_album(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "releaseDate": "2020-03-01",
        "imageUrl": format!("https://img.example/{}.jpg", id),
    })
}

pub fn canonical_artist(id: &str, name: &str, genres: Vec<&str>) -> Value {
    json!({
        "id": id,
        "name": name,
        "genres": genres,
    })
}

pub fn canonical_track(id: &str, name: &str, album_id: &str, artist_id: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "durationMs": 180_000,
        "albumId": album_id,
        "artistIds": [artist_id],
        "energy": 0.7,
        "danceability": 0.6,
        "valence": 0.5,
        "tempo": 120.0,
    })
}

pub fn canonical_play(track_id: &str, played_at: &str) -> Value {
    json!({
        "trackId": track_id,
        "playedAt": played_at,
    })
}

/// Name-based privacy export row.
pub fn name_based_entry(end_time: &str, artist: &str, track: &str, ms_played: i64) -> Value {
    json!({
        "endTime": end_time,
        "artistName": artist,
        "trackName": track,
        "msPlayed": ms_played,
    })
}

/// URI-based extended privacy export row.
pub fn uri_based_entry(ts: &str, track_id: &str, ms_played: i64) -> Value {
    json!({
        "ts": ts,
        "ms_played": ms_played,
        "spotify_track_uri": format!("spotify:track:{}", track_id),
    })
}

/// Full provider track object, as returned by /tracks, /search and
/// /recommendations.
pub fn provider_track(id: &str, name: &str, album_id: &str, artist_id: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "duration_ms": 200_000,
        "popularity": 55,
        "preview_url": format!("https://preview.example/{}", id),
        "album": {
            "id": album_id,
            "name": format!("Album {}", album_id),
            "release_date": "2021-06-15",
            "images": [{"url": format!("https://img.example/{}.jpg", album_id)}],
        },
        "artists": [{"id": artist_id, "name": format!("Artist {}", artist_id)}],
    })
}

pub fn provider_features(id: &str, energy: f64, danceability: f64, valence: f64, tempo: f64) -> Value {
    json!({
        "id": id,
        "energy": energy,
        "danceability": danceability,
        "valence": valence,
        "tempo": tempo,
    })
}

pub fn provider_artist(id: &str, name: &str, genres: Vec<&str>) -> Value {
    json!({
        "id": id,
        "name": name,
        "genres": genres,
        "images": [{"url": format!("https://img.example/{}.jpg", id)}],
    })
}

pub fn play_history_item(track: Value, played_at: &str) -> Value {
    json!({
        "track": track,
        "played_at": played_at,
    })
}

/// A 22-character provider track id padded from a short label.
pub fn track_id(label: &str) -> String {
    let mut id = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>();
    while id.len() < 22 {
        id.push('0');
    }
    id.truncate(22);
    id
}
