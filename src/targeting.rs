use serde_json::Value;

const LOOKALIKE_KEYWORDS: &[&str] = &["lookalike", "look-alike", "look alike", "similar"];
const LIST_KEYWORDS: &[&str] = &["list", "crm", "customer", "email", "upload", "subscriber"];
const INTEREST_KEYS: &[&str] = &["interests", "behaviors", "life_events"];

/// Items shown per summary section.
const SUMMARY_ITEMS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetingType {
    Mix,
    Lookalike,
    List,
    Remarketing,
    Interest,
    Broad,
    AdvantageBroad,
}

impl TargetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetingType::Mix => "Mix Audience",
            TargetingType::Lookalike => "Lookalike",
            TargetingType::List => "List Audience",
            TargetingType::Remarketing => "Remarketing",
            TargetingType::Interest => "Interest Audience",
            TargetingType::Broad => "Broad",
            TargetingType::AdvantageBroad => "Advantage+ (Broad)",
        }
    }
}

/// Classifies an ad-set's targeting configuration and summarizes it for display.
pub fn classify_targeting(targeting: &Value) -> (TargetingType, String) {
    let audiences = named_entries(targeting.get("custom_audiences"));
    let interests = interest_names(targeting);

    let archetype = if !audiences.is_empty() && !interests.is_empty() {
        TargetingType::Mix
    } else if audiences.iter().any(|name| matches_any(name, LOOKALIKE_KEYWORDS)) {
        TargetingType::Lookalike
    } else if audiences.iter().any(|name| matches_any(name, LIST_KEYWORDS)) {
        TargetingType::List
    } else if !audiences.is_empty() {
        TargetingType::Remarketing
    } else if !interests.is_empty() {
        TargetingType::Interest
    } else if is_advantage_audience(targeting) {
        TargetingType::AdvantageBroad
    } else {
        TargetingType::Broad
    };

    let mut parts = Vec::new();
    if !audiences.is_empty() {
        parts.push(format!("Audiences: {}", truncated(&audiences)));
    }
    if !interests.is_empty() {
        parts.push(format!("Interests: {}", truncated(&interests)));
    }
    let geo = geo_targets(targeting);
    if !geo.is_empty() {
        parts.push(format!("Geo: {}", truncated(&geo)));
    }
    if let Some(age) = age_range(targeting) {
        parts.push(format!("Age: {}", age));
    }
    if let Some(gender) = gender_label(targeting) {
        parts.push(format!("Gender: {}", gender));
    }

    let mut summary = if parts.is_empty() {
        "Broad".to_string()
    } else {
        parts.join(" | ")
    };
    if archetype == TargetingType::AdvantageBroad {
        summary = format!("Advantage+ | {}", summary);
    }

    (archetype, summary)
}

fn matches_any(name: &str, keywords: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

/// Names (or IDs, when unnamed) of `[{id, name}]` entries.
fn named_entries(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .get("name")
                .or_else(|| entry.get("id"))
                .and_then(crate::entities::value_as_text)
        })
        .collect()
}

fn interest_names(targeting: &Value) -> Vec<String> {
    let mut names = Vec::new();
    for key in INTEREST_KEYS {
        names.extend(named_entries(targeting.get(*key)));
    }
    if let Some(Value::Array(specs)) = targeting.get("flexible_spec") {
        for spec in specs {
            for key in INTEREST_KEYS {
                names.extend(named_entries(spec.get(*key)));
            }
        }
    }
    names
}

fn geo_targets(targeting: &Value) -> Vec<String> {
    let Some(geo) = targeting.get("geo_locations") else {
        return Vec::new();
    };
    let mut targets: Vec<String> = match geo.get("countries") {
        Some(Value::Array(codes)) => codes
            .iter()
            .filter_map(crate::entities::value_as_text)
            .collect(),
        _ => Vec::new(),
    };
    targets.extend(named_entries(geo.get("regions")));
    targets.extend(named_entries(geo.get("cities")));
    targets
}

fn age_range(targeting: &Value) -> Option<String> {
    let min = targeting.get("age_min").and_then(Value::as_u64);
    let max = targeting.get("age_max").and_then(Value::as_u64);
    match (min, max) {
        (None, None) => None,
        (min, max) => Some(format!(
            "{}-{}",
            min.unwrap_or(18),
            max.map(|m| if m >= 65 { "65+".to_string() } else { m.to_string() })
                .unwrap_or_else(|| "65+".to_string())
        )),
    }
}

fn gender_label(targeting: &Value) -> Option<&'static str> {
    let Some(Value::Array(genders)) = targeting.get("genders") else {
        return None;
    };
    let codes: Vec<u64> = genders.iter().filter_map(Value::as_u64).collect();
    match codes.as_slice() {
        [1] => Some("Male"),
        [2] => Some("Female"),
        _ => None,
    }
}

fn is_advantage_audience(targeting: &Value) -> bool {
    targeting
        .pointer("/targeting_automation/advantage_audience")
        .map(|flag| flag.as_u64() == Some(1) || flag.as_bool() == Some(true))
        .unwrap_or(false)
}

fn truncated(items: &[String]) -> String {
    let shown = items.iter().take(SUMMARY_ITEMS).cloned().collect::<Vec<_>>().join(", ");
    if items.len() > SUMMARY_ITEMS {
        format!("{} (+{})", shown, items.len() - SUMMARY_ITEMS)
    } else {
        shown
    }
}
