use serde::{Deserialize, Serialize};

use super::{id_from_string_or_number, Identified};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeagueType {
    Suncoast,
    Mexican,
}

impl LeagueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeagueType::Suncoast => "SUNCOAST",
            LeagueType::Mexican => "MEXICAN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUNCOAST" => Some(LeagueType::Suncoast),
            "MEXICAN" => Some(LeagueType::Mexican),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub name: String,
    pub league_type: LeagueType,
    pub season: String,
    pub division: Option<String>,
    #[serde(default = "active_flag")]
    pub is_active: i32,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl League {
    pub fn is_active(&self) -> bool {
        self.is_active == 1
    }
}

impl Identified for League {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub name: String,
    pub league_id: String,
    #[serde(default = "active_flag")]
    pub is_active: i32,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// One row of a league table, optionally carrying its team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueStanding {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub league_id: String,
    pub team_id: String,
    #[serde(default)]
    pub matches_played: u32,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub draws: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub goals_for: u32,
    #[serde(default)]
    pub goals_against: u32,
    #[serde(default)]
    pub goal_difference: i32,
    #[serde(default)]
    pub points: u32,
    pub position: Option<u32>,
    pub team: Option<Team>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl LeagueStanding {
    pub fn team_name(&self) -> &str {
        self.team.as_ref().map(|t| t.name.as_str()).unwrap_or("Unknown team")
    }
}

fn active_flag() -> i32 {
    1
}
