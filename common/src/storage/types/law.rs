use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The seventeen Laws of the Game a question can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Law {
    #[serde(rename = "Law 1")]
    FieldOfPlay,
    #[serde(rename = "Law 2")]
    Ball,
    #[serde(rename = "Law 3")]
    Players,
    #[serde(rename = "Law 4")]
    PlayersEquipment,
    #[serde(rename = "Law 5")]
    Referee,
    #[serde(rename = "Law 6")]
    OtherMatchOfficials,
    #[serde(rename = "Law 7")]
    DurationOfMatch,
    #[serde(rename = "Law 8")]
    StartAndRestartOfPlay,
    #[serde(rename = "Law 9")]
    BallInAndOutOfPlay,
    #[serde(rename = "Law 10")]
    DeterminingOutcome,
    #[serde(rename = "Law 11")]
    Offside,
    #[serde(rename = "Law 12")]
    FoulsAndMisconduct,
    #[serde(rename = "Law 13")]
    FreeKicks,
    #[serde(rename = "Law 14")]
    PenaltyKick,
    #[serde(rename = "Law 15")]
    ThrowIn,
    #[serde(rename = "Law 16")]
    GoalKick,
    #[serde(rename = "Law 17")]
    CornerKick,
}

impl Law {
    pub const ALL: [Law; 17] = [
        Law::FieldOfPlay,
        Law::Ball,
        Law::Players,
        Law::PlayersEquipment,
        Law::Referee,
        Law::OtherMatchOfficials,
        Law::DurationOfMatch,
        Law::StartAndRestartOfPlay,
        Law::BallInAndOutOfPlay,
        Law::DeterminingOutcome,
        Law::Offside,
        Law::FoulsAndMisconduct,
        Law::FreeKicks,
        Law::PenaltyKick,
        Law::ThrowIn,
        Law::GoalKick,
        Law::CornerKick,
    ];

    /// Category used when a law tag cannot be interpreted.
    pub const DEFAULT: Law = Law::FieldOfPlay;

    pub fn number(self) -> u8 {
        match self {
            Law::FieldOfPlay => 1,
            Law::Ball => 2,
            Law::Players => 3,
            Law::PlayersEquipment => 4,
            Law::Referee => 5,
            Law::OtherMatchOfficials => 6,
            Law::DurationOfMatch => 7,
            Law::StartAndRestartOfPlay => 8,
            Law::BallInAndOutOfPlay => 9,
            Law::DeterminingOutcome => 10,
            Law::Offside => 11,
            Law::FoulsAndMisconduct => 12,
            Law::FreeKicks => 13,
            Law::PenaltyKick => 14,
            Law::ThrowIn => 15,
            Law::GoalKick => 16,
            Law::CornerKick => 17,
        }
    }

    pub fn from_number(number: u32) -> Option<Law> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        Law::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Law::FieldOfPlay => "Law 1",
            Law::Ball => "Law 2",
            Law::Players => "Law 3",
            Law::PlayersEquipment => "Law 4",
            Law::Referee => "Law 5",
            Law::OtherMatchOfficials => "Law 6",
            Law::DurationOfMatch => "Law 7",
            Law::StartAndRestartOfPlay => "Law 8",
            Law::BallInAndOutOfPlay => "Law 9",
            Law::DeterminingOutcome => "Law 10",
            Law::Offside => "Law 11",
            Law::FoulsAndMisconduct => "Law 12",
            Law::FreeKicks => "Law 13",
            Law::PenaltyKick => "Law 14",
            Law::ThrowIn => "Law 15",
            Law::GoalKick => "Law 16",
            Law::CornerKick => "Law 17",
        }
    }

    /// Finds a `Law N` tag anywhere in `raw`, case-insensitively and with
    /// optional whitespace between the word and the number. Returns `None`
    /// when no tag is present or N is outside 1..=17.
    pub fn parse_tag(raw: &str) -> Option<Law> {
        let lowered = raw.to_ascii_lowercase();
        let mut search_from = 0;

        while let Some(offset) = lowered.get(search_from..)?.find("law") {
            let after = search_from + offset + 3;
            let rest = lowered.get(after..)?.trim_start();
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if !digits.is_empty() {
                return digits.parse::<u32>().ok().and_then(Law::from_number);
            }
            search_from = after;
        }

        None
    }

    /// Interprets a law tag, falling back to [`Law::DEFAULT`].
    pub fn normalize(raw: &str) -> Law {
        Law::parse_tag(raw).unwrap_or(Law::DEFAULT)
    }
}

impl fmt::Display for Law {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Law {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<u32>() {
            return Law::from_number(number).ok_or_else(|| format!("unknown law: {s}"));
        }
        Law::parse_tag(trimmed).ok_or_else(|| format!("unknown law: {s}"))
    }
}
