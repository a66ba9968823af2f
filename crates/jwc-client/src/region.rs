//! Voice regions and region groups.
//!
//! Nodes are tagged with a coarse region group at configuration time; the
//! voice server a guild lands on is inferred from its Discord-assigned
//! endpoint. The balancer prefers nodes whose group matches the voice
//! server's group (see the region penalty provider).

use regex::Regex;
use std::sync::LazyLock;

/// Coarse geographic grouping of voice regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionGroup {
    Africa,
    Asia,
    Europe,
    MiddleEast,
    SouthAmerica,
    Us,
    Unknown,
}

impl RegionGroup {
    /// Parses a configured group literal, case-insensitively. Anything
    /// unrecognized maps to [`RegionGroup::Unknown`].
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "AFRICA" => Self::Africa,
            "ASIA" => Self::Asia,
            "EUROPE" => Self::Europe,
            "MIDDLE_EAST" => Self::MiddleEast,
            "SOUTH_AMERICA" => Self::SouthAmerica,
            "US" => Self::Us,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Africa => "AFRICA",
            Self::Asia => "ASIA",
            Self::Europe => "EUROPE",
            Self::MiddleEast => "MIDDLE_EAST",
            Self::SouthAmerica => "SOUTH_AMERICA",
            Self::Us => "US",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Region ids Discord has assigned voice servers under, with their group.
const KNOWN_REGIONS: &[(&str, RegionGroup)] = &[
    ("amsterdam", RegionGroup::Europe),
    ("brazil", RegionGroup::SouthAmerica),
    ("buenos-aires", RegionGroup::SouthAmerica),
    ("dubai", RegionGroup::MiddleEast),
    ("eu-central", RegionGroup::Europe),
    ("eu-west", RegionGroup::Europe),
    ("europe", RegionGroup::Europe),
    ("finland", RegionGroup::Europe),
    ("frankfurt", RegionGroup::Europe),
    ("hongkong", RegionGroup::Asia),
    ("india", RegionGroup::Asia),
    ("japan", RegionGroup::Asia),
    ("london", RegionGroup::Europe),
    ("madrid", RegionGroup::Europe),
    ("milan", RegionGroup::Europe),
    ("rotterdam", RegionGroup::Europe),
    ("russia", RegionGroup::Europe),
    ("santiago", RegionGroup::SouthAmerica),
    ("singapore", RegionGroup::Asia),
    ("south-korea", RegionGroup::Asia),
    ("southafrica", RegionGroup::Africa),
    ("stockholm", RegionGroup::Europe),
    ("sydney", RegionGroup::Asia),
    ("tel-aviv", RegionGroup::MiddleEast),
    ("us-central", RegionGroup::Us),
    ("us-east", RegionGroup::Us),
    ("us-south", RegionGroup::Us),
    ("us-west", RegionGroup::Us),
];

static ENDPOINT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z\-]+)[0-9]+.*:443$").expect("endpoint pattern"));

/// A voice server's region, inferred from its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRegion {
    pub id: String,
    pub group: RegionGroup,
}

impl VoiceRegion {
    pub fn from_id(id: &str) -> Self {
        let group = KNOWN_REGIONS
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, group)| *group)
            .unwrap_or(RegionGroup::Unknown);
        Self {
            id: id.to_string(),
            group,
        }
    }

    /// Parses a Discord-assigned endpoint such as
    /// `rotterdam11.discord.media:443`. Endpoints that do not match the
    /// expected shape yield an unknown region.
    pub fn from_endpoint(endpoint: &str) -> Self {
        match ENDPOINT_PATTERN.captures(endpoint) {
            Some(captures) => Self::from_id(&captures[1]),
            None => Self {
                id: endpoint.to_string(),
                group: RegionGroup::Unknown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_GROUPS: &[RegionGroup] = &[
        RegionGroup::Africa,
        RegionGroup::Asia,
        RegionGroup::Europe,
        RegionGroup::MiddleEast,
        RegionGroup::SouthAmerica,
        RegionGroup::Us,
        RegionGroup::Unknown,
    ];

    #[test]
    fn test_group_name_round_trip() {
        for group in ALL_GROUPS {
            assert_eq!(RegionGroup::from_raw(group.name()).name(), group.name());
        }
    }

    #[test]
    fn test_from_raw_is_case_insensitive() {
        assert_eq!(RegionGroup::from_raw("europe"), RegionGroup::Europe);
        assert_eq!(RegionGroup::from_raw("Middle_East"), RegionGroup::MiddleEast);
        assert_eq!(RegionGroup::from_raw("us"), RegionGroup::Us);
    }

    #[test]
    fn test_from_raw_unrecognized_is_unknown() {
        assert_eq!(RegionGroup::from_raw("OCEANIA"), RegionGroup::Unknown);
        assert_eq!(RegionGroup::from_raw(""), RegionGroup::Unknown);
    }

    #[test]
    fn test_every_known_region_parses_from_endpoint() {
        for (id, group) in KNOWN_REGIONS {
            let endpoint = format!("{id}1234.discord.media:443");
            let region = VoiceRegion::from_endpoint(&endpoint);
            assert_eq!(region.id, *id, "endpoint {endpoint}");
            assert_eq!(region.group, *group, "endpoint {endpoint}");
        }
    }

    #[test]
    fn test_non_matching_endpoint_is_unknown() {
        for endpoint in ["", "garbage", "rotterdam.discord.media:443", "rotterdam11.discord.media:80"] {
            assert_eq!(VoiceRegion::from_endpoint(endpoint).group, RegionGroup::Unknown);
        }
    }

    #[test]
    fn test_unlisted_region_id_is_unknown() {
        let region = VoiceRegion::from_endpoint("atlantis42.discord.media:443");
        assert_eq!(region.id, "atlantis");
        assert_eq!(region.group, RegionGroup::Unknown);
    }
}
