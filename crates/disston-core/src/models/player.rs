use serde::{Deserialize, Serialize};

use super::{id_from_string_or_number, Identified};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cards {
    #[serde(default)]
    pub yellow: u32,
    #[serde(default)]
    pub red: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    pub jersey_number: Option<u8>,
    #[serde(default)]
    pub is_captain: bool,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub goals: u32,
    #[serde(default)]
    pub assists: u32,
    pub clean_sheets: Option<u32>,
    #[serde(default)]
    pub appearances: u32,
    #[serde(default)]
    pub cards: Cards,
    pub joined_at: Option<String>,
    pub profile_image_url: Option<String>,
}

/// Coarse grouping of playing positions (the roster colours by group).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionGroup {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
    Unknown,
}

impl PositionGroup {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "GK" => Self::Goalkeeper,
            "CB" | "LB" | "RB" => Self::Defender,
            "CDM" | "CM" | "CAM" | "LM" | "RM" => Self::Midfielder,
            "LW" | "RW" | "ST" => Self::Forward,
            _ => Self::Unknown,
        }
    }
}

impl Player {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn position_group(&self) -> PositionGroup {
        PositionGroup::from_code(&self.position)
    }

    /// Clean sheets are only tracked for goalkeepers and the back line.
    pub fn tracks_clean_sheets(&self) -> bool {
        matches!(self.position_group(), PositionGroup::Goalkeeper | PositionGroup::Defender)
    }
}

impl Identified for Player {
    fn id(&self) -> &str {
        &self.id
    }
}
