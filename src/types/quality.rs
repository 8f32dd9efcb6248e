use clap::ValueEnum;
use serde::Deserialize;

/// One of the three ordinal video quality levels offered by the html5 API.
///
/// The numeric order matters: tier windows are expressed as an inclusive
/// `[min, max]` range over this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Med,
    High,
    Higher,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Med, Tier::High, Tier::Higher];

    /// Key of the tier inside the html5 video version map.
    pub fn api_key(self) -> &'static str {
        match self {
            Tier::Med => "med",
            Tier::High => "high",
            Tier::Higher => "higher",
        }
    }
}

/// Which end of an ordered candidate list to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPick {
    Worst,
    Best,
}

/// Bias between the MP3 (html5) and AAC (mobile) audio encodings.
///
/// Mobile audio is usually AAC but occasionally plain MP3; the API does not
/// say which, so "prefer" and "only" act on the category, not the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AacPreference {
    Mp3Only,
    NoBias,
    PreferAac,
    AacOnly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::Med < Tier::High);
        assert!(Tier::High < Tier::Higher);
    }

    #[test]
    fn aac_preference_is_ordered() {
        assert!(AacPreference::Mp3Only < AacPreference::NoBias);
        assert!(AacPreference::PreferAac < AacPreference::AacOnly);
    }
}
