use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{id_from_string_or_number, Identified, League, Team};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Scheduled,
    InProgress,
    Completed,
    Postponed,
    Cancelled,
}

/// A fixture, with its teams and league embedded by the list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub match_date: String,
    pub match_time: Option<String>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub league_id: String,
    pub venue_name: Option<String>,
    pub field_name: Option<String>,
    pub full_location: Option<String>,
    pub match_type: Option<String>,
    pub division: Option<String>,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub status: MatchStatus,
    pub notes: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub home_team: Option<Team>,
    pub away_team: Option<Team>,
    pub league: Option<League>,
}

impl Match {
    /// Calendar date of the fixture (`match_date` may carry a time part).
    pub fn date(&self) -> Option<NaiveDate> {
        let day = self.match_date.get(..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    /// "2 - 1" once both scores are known.
    pub fn scoreline(&self) -> Option<String> {
        match (self.home_score, self.away_score) {
            (Some(home), Some(away)) => Some(format!("{} - {}", home, away)),
            _ => None,
        }
    }

    pub fn title(&self) -> String {
        let home = self.home_team.as_ref().map(|t| t.name.as_str()).unwrap_or("TBD");
        let away = self.away_team.as_ref().map(|t| t.name.as_str()).unwrap_or("TBD");
        format!("{} vs {}", home, away)
    }
}

impl Identified for Match {
    fn id(&self) -> &str {
        &self.id
    }
}
