/// Display names for publisher platforms.
const PLATFORMS: &[(&str, &str)] = &[
    ("facebook", "Facebook"),
    ("instagram", "Instagram"),
    ("messenger", "Messenger"),
    ("audience_network", "Audience Network"),
    ("threads", "Threads"),
    ("whatsapp", "WhatsApp"),
];

/// Positions whose generic title-casing reads badly.
const POSITION_OVERRIDES: &[(&str, &str)] = &[
    ("an_classic", "Classic"),
    ("ig_search", "Search Results"),
    ("instream_video", "In-Stream Video"),
    ("facebook_reels_overlay", "Reels Overlay"),
    ("rewarded_video", "Rewarded Video"),
    ("marketplace", "Marketplace"),
    ("search", "Search Results"),
    ("story", "Stories"),
    ("feed", "Feed"),
];

pub const NOT_AVAILABLE: &str = "N/A";

/// Combines a publisher platform and platform position into one label,
/// e.g. `instagram` + `instagram_stories` is `Instagram Stories`.
pub fn placement_name(platform: &str, position: &str) -> String {
    let platform = platform.trim().to_lowercase();
    let position = position.trim().to_lowercase();

    let platform_label = if platform.is_empty() || platform == "n/a" {
        None
    } else {
        Some(
            PLATFORMS
                .iter()
                .find(|(key, _)| *key == platform)
                .map(|(_, label)| label.to_string())
                .unwrap_or_else(|| title_case(&platform)),
        )
    };

    let position_label = if position.is_empty() || position == "n/a" {
        None
    } else {
        let stripped = position
            .strip_prefix(&format!("{}_", platform))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(position.as_str());
        Some(
            POSITION_OVERRIDES
                .iter()
                .find(|(key, _)| *key == stripped)
                .map(|(_, label)| label.to_string())
                .unwrap_or_else(|| title_case(stripped)),
        )
    };

    match (platform_label, position_label) {
        (Some(platform), Some(position)) => format!("{} {}", platform, position),
        (Some(platform), None) => platform,
        (None, Some(position)) => position,
        (None, None) => NOT_AVAILABLE.to_string(),
    }
}

fn title_case(raw: &str) -> String {
    raw.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_name_strips_redundant_prefix() {
        assert_eq!(placement_name("instagram", "instagram_stories"), "Instagram Stories");
        assert_eq!(placement_name("messenger", "messenger_inbox"), "Messenger Inbox");
        assert_eq!(placement_name("facebook", "facebook_reels"), "Facebook Reels");
    }

    #[test]
    fn test_placement_name_plain_positions() {
        assert_eq!(placement_name("facebook", "feed"), "Facebook Feed");
        assert_eq!(placement_name("facebook", "video_feeds"), "Facebook Video Feeds");
        assert_eq!(placement_name("audience_network", "an_classic"), "Audience Network Classic");
        assert_eq!(placement_name("instagram", "ig_search"), "Instagram Search Results");
    }

    #[test]
    fn test_placement_name_missing_parts() {
        assert_eq!(placement_name("", ""), NOT_AVAILABLE);
        assert_eq!(placement_name("facebook", ""), "Facebook");
        assert_eq!(placement_name("", "feed"), "Feed");
        assert_eq!(placement_name("N/A", "N/A"), NOT_AVAILABLE);
    }

    #[test]
    fn test_unknown_platform_is_title_cased() {
        assert_eq!(placement_name("oculus", "oculus_feed"), "Oculus Feed");
    }
}
