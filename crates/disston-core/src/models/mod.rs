//! Data models for the club API.
//!
//! - `Player`: roster, active list and join requests
//! - `BlogPost`: news posts awaiting approval or published
//! - `League`, `Team`, `LeagueStanding`: league tables
//! - `Match`: fixtures and results with nested team/league references

pub mod blog_post;
pub mod fixture;
pub mod league;
pub mod player;

pub use blog_post::{BlogPost, BlogPostList};
pub use fixture::{Match, MatchStatus};
pub use league::{League, LeagueStanding, LeagueType, Team};
pub use player::{Cards, Player, PositionGroup};

use serde::{Deserialize, Deserializer};

/// Records addressable by their server id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Copy of `items` without the record whose id is `id`.
pub fn without_id<T: Identified + Clone>(items: Option<&Vec<T>>, id: &str) -> Vec<T> {
    items
        .map(|items| items.iter().filter(|item| item.id() != id).cloned().collect())
        .unwrap_or_default()
}

/// Ids arrive as UUID strings from most endpoints and as integers from the
/// player table; both are kept as strings.
pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
