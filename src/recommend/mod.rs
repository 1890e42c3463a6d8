//! Seed selection, genre validation and the daily recommendation engine.

mod engine;
mod genres;
mod seeds;

pub use engine::{
    RecommendError, RecommendationEngine, RecommendationSet, RecommendedAlbum, RecommendedTrack,
};
pub use genres::{normalize_genre, validate_genres, GenreSeedCache};
pub use seeds::{strategies, SeedSelection, SeedStrategy};
