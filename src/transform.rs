use crate::api_client::{DataSource, RawInsightRow};
use crate::countries::map_country_code;
use crate::entities::{lookup_path, value_as_text, MetadataTable, ENTITY_SPECS};
use crate::error::Error;
use crate::placements::{placement_name, NOT_AVAILABLE};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Sentinel for unresolvable entity IDs and date keys.
pub const UNKNOWN_ID: u64 = 0;

/// Upstream column names mapped to the names used from here on.
const COLUMN_RENAMES: &[(&str, &str)] = &[
    ("date_start", "date"),
    ("publisher_platform", "platform"),
    ("platform_position", "position"),
    ("clicks", "all_clicks"),
    ("inline_link_clicks", "precise_link_clicks"),
    ("outbound_clicks", "outbound_clicks_actions"),
    ("account_currency", "currency"),
    ("video_play_actions", "video_plays_actions"),
    ("video_p25_watched_actions", "video_p25_actions"),
    ("video_p50_watched_actions", "video_p50_actions"),
    ("video_p75_watched_actions", "video_p75_actions"),
    ("video_p100_watched_actions", "video_p100_actions"),
    ("video_avg_time_watched_actions", "video_avg_time_actions"),
];

const PURCHASE_TYPES: &[&str] = &[
    "omni_purchase",
    "purchase",
    "offsite_conversion.fb_pixel_purchase",
];
const LEAD_TYPES: &[&str] = &[
    "lead",
    "onsite_conversion.lead_grouped",
    "offsite_conversion.fb_pixel_lead",
];
const LINK_CLICK_TYPE: &str = "link_click";
const VIDEO_VIEW_TYPE: &str = "video_view";
pub const DEFAULT_ATTRIBUTION_WINDOW: &str = "default";
const ATTRIBUTION_WINDOWS: &[&str] = &["1d_view", "1d_click", "7d_click", "28d_click", "7d_view"];

/// Click counters in the order they are trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickSource {
    PreciseLinkClicks,
    LinkClicks,
    OutboundClicks,
    AllClicks,
}

impl ClickSource {
    const PRIORITY: [ClickSource; 4] = [
        ClickSource::PreciseLinkClicks,
        ClickSource::LinkClicks,
        ClickSource::OutboundClicks,
        ClickSource::AllClicks,
    ];

    fn index(&self) -> usize {
        match self {
            ClickSource::PreciseLinkClicks => 0,
            ClickSource::LinkClicks => 1,
            ClickSource::OutboundClicks => 2,
            ClickSource::AllClicks => 3,
        }
    }
}

/// Additive measures shared by every fact table.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Metrics {
    pub spend: f64,
    pub impressions: f64,
    pub reach: f64,
    pub clicks: f64,
    pub purchases: f64,
    pub purchase_value: f64,
    pub leads: f64,
    pub video_plays: f64,
    pub video_p25: f64,
    pub video_p50: f64,
    pub video_p75: f64,
    pub video_p100: f64,
    pub video_avg_time: f64,
}

impl Metrics {
    pub const COLUMNS: [&'static str; 13] = [
        "spend",
        "impressions",
        "reach",
        "clicks",
        "purchases",
        "purchase_value",
        "leads",
        "video_plays",
        "video_p25",
        "video_p50",
        "video_p75",
        "video_p100",
        "video_avg_time",
    ];

    pub fn values(&self) -> [f64; 13] {
        [
            self.spend,
            self.impressions,
            self.reach,
            self.clicks,
            self.purchases,
            self.purchase_value,
            self.leads,
            self.video_plays,
            self.video_p25,
            self.video_p50,
            self.video_p75,
            self.video_p100,
            self.video_avg_time,
        ]
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, other: Metrics) {
        self.spend += other.spend;
        self.impressions += other.impressions;
        self.reach += other.reach;
        self.clicks += other.clicks;
        self.purchases += other.purchases;
        self.purchase_value += other.purchase_value;
        self.leads += other.leads;
        self.video_plays += other.video_plays;
        self.video_p25 += other.video_p25;
        self.video_p50 += other.video_p50;
        self.video_p75 += other.video_p75;
        self.video_p100 += other.video_p100;
        self.video_avg_time += other.video_avg_time;
    }
}

/// Entity tuple every fact row is keyed by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKeys {
    pub date_id: u64,
    pub account_id: u64,
    pub campaign_id: u64,
    pub adset_id: u64,
    pub ad_id: u64,
    pub creative_id: u64,
}

impl EntityKeys {
    pub const COLUMNS: [&'static str; 6] = [
        "date_id",
        "account_id",
        "campaign_id",
        "adset_id",
        "ad_id",
        "creative_id",
    ];

    pub fn values(&self) -> [u64; 6] {
        [
            self.date_id,
            self.account_id,
            self.campaign_id,
            self.adset_id,
            self.ad_id,
            self.creative_id,
        ]
    }

    pub fn get(&self, column: &str) -> Option<u64> {
        Self::COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|i| self.values()[i])
    }

    fn get_mut(&mut self, column: &str) -> Option<&mut u64> {
        match column {
            "date_id" => Some(&mut self.date_id),
            "account_id" => Some(&mut self.account_id),
            "campaign_id" => Some(&mut self.campaign_id),
            "adset_id" => Some(&mut self.adset_id),
            "ad_id" => Some(&mut self.ad_id),
            "creative_id" => Some(&mut self.creative_id),
            _ => None,
        }
    }
}

/// One conversion action as reported on an insights row.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionEntry {
    pub action_type: String,
    pub attribution_window: String,
    pub count: f64,
    pub value: f64,
}

/// Cleaned, join-ready insights row.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformedRow {
    pub source: DataSource,
    pub keys: EntityKeys,
    pub country: String,
    pub age: String,
    pub gender: String,
    pub placement: String,
    /// Display attributes keyed by dimension column name.
    pub attributes: BTreeMap<&'static str, String>,
    pub metrics: Metrics,
    pub actions: Vec<ActionEntry>,
}

impl TransformedRow {
    pub fn attribute(&self, column: &str) -> Option<&str> {
        self.attributes.get(column).map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    pub rows: Vec<TransformedRow>,
    pub click_source: Option<ClickSource>,
    pub warnings: Vec<String>,
}

/// Truncates float-formatted IDs at the decimal point without a float round
/// trip; anything else unparseable becomes [`UNKNOWN_ID`].
pub fn coerce_entity_id(raw: &str) -> u64 {
    let trimmed = raw.trim();
    let (integer, fraction) = match trimmed.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (trimmed, ""),
    };
    if integer.is_empty()
        || !integer.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return UNKNOWN_ID;
    }
    match integer.parse::<u64>() {
        Ok(id) if id <= i64::MAX as u64 => id,
        _ => UNKNOWN_ID,
    }
}

pub fn coerce_id_value(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::String(s)) => coerce_entity_id(s),
        Some(Value::Number(n)) => coerce_entity_id(&n.to_string()),
        _ => UNKNOWN_ID,
    }
}

/// `YYYYMMDD` key for a `YYYY-MM-DD` date.
pub fn date_key(raw: &str) -> u64 {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(date_key_of)
        .unwrap_or(UNKNOWN_ID)
}

pub fn date_key_of(date: NaiveDate) -> u64 {
    date.format("%Y%m%d")
        .to_string()
        .parse()
        .unwrap_or(UNKNOWN_ID)
}

/// Inverse of [`date_key_of`].
pub fn date_of_key(date_id: u64) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(&date_id.to_string(), "%Y%m%d").map_err(|_| Error::InvalidDate {
        date: date_id.to_string(),
    })
}

fn number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(value_as_text)
}

/// Sums `value` over entries whose `action_type` matches (or is absent).
/// Non-list input yields 0.
fn sum_action_values(value: Option<&Value>, action_type: Option<&str>) -> f64 {
    let Some(Value::Array(entries)) = value else {
        return 0.0;
    };
    entries
        .iter()
        .filter(|entry| match (action_type, entry.get("action_type").and_then(Value::as_str)) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        })
        .map(|entry| number(entry.get("value")))
        .sum()
}

/// First action type in `priority` present on the row.
fn first_action_value(value: Option<&Value>, priority: &[&str]) -> f64 {
    let Some(Value::Array(entries)) = value else {
        return 0.0;
    };
    priority
        .iter()
        .find_map(|wanted| {
            entries
                .iter()
                .find(|entry| entry.get("action_type").and_then(Value::as_str) == Some(*wanted))
                .map(|entry| number(entry.get("value")))
        })
        .unwrap_or(0.0)
}

fn rename_columns(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let renamed = COLUMN_RENAMES
                .iter()
                .find(|(from, _)| from == key)
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| key.clone());
            (renamed, value.clone())
        })
        .collect()
}

fn breakdown_value(fields: &Map<String, Value>, column: &str) -> String {
    text(fields.get(column)).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Explodes `actions`/`action_values` into entries, one per attribution window
/// when the row carries per-window counts.
pub fn parse_action_entries(fields: &Map<String, Value>) -> Vec<ActionEntry> {
    let Some(Value::Array(actions)) = fields.get("actions") else {
        return Vec::new();
    };
    let values = match fields.get("action_values") {
        Some(Value::Array(values)) => values.as_slice(),
        _ => &[],
    };

    let mut entries = Vec::new();
    for action in actions {
        let Some(action_type) = action.get("action_type").and_then(value_as_text) else {
            continue;
        };
        let matching_value = values
            .iter()
            .find(|v| v.get("action_type").and_then(Value::as_str) == Some(action_type.as_str()));

        let windows: Vec<&str> = ATTRIBUTION_WINDOWS
            .iter()
            .copied()
            .filter(|window| action.get(*window).is_some())
            .collect();

        if windows.is_empty() {
            entries.push(ActionEntry {
                action_type: action_type.clone(),
                attribution_window: DEFAULT_ATTRIBUTION_WINDOW.to_string(),
                count: number(action.get("value")),
                value: matching_value.map(|v| number(v.get("value"))).unwrap_or(0.0),
            });
        } else {
            for window in windows {
                entries.push(ActionEntry {
                    action_type: action_type.clone(),
                    attribution_window: window.to_string(),
                    count: number(action.get(window)),
                    value: matching_value.map(|v| number(v.get(window))).unwrap_or(0.0),
                });
            }
        }
    }
    entries
}

/// Per-row click counters in [`ClickSource::PRIORITY`] order.
fn click_candidates(fields: &Map<String, Value>) -> [f64; 4] {
    [
        number(fields.get("precise_link_clicks")),
        first_action_value(fields.get("actions"), &[LINK_CLICK_TYPE]),
        sum_action_values(fields.get("outbound_clicks_actions"), None),
        number(fields.get("all_clicks")),
    ]
}

/// Picks the first counter whose total across the whole batch is positive.
pub fn choose_click_source(candidates: &[[f64; 4]]) -> Option<ClickSource> {
    ClickSource::PRIORITY.into_iter().find(|source| {
        let total: f64 = candidates.iter().map(|row| row[source.index()]).sum();
        total > 0.0
    })
}

fn merge_metadata(
    fields: &Map<String, Value>,
    keys: &mut EntityKeys,
    metadata: Option<&MetadataTable>,
) -> BTreeMap<&'static str, String> {
    let mut attributes = BTreeMap::new();

    for spec in ENTITY_SPECS {
        let id = keys.get(spec.id_column).unwrap_or(UNKNOWN_ID);
        let record = metadata
            .filter(|_| id != UNKNOWN_ID)
            .and_then(|metadata| metadata.get(spec.kind, id));

        for link in spec.parents {
            let linked = record
                .and_then(|record| lookup_path(&record.attributes, link.path))
                .map(|value| coerce_id_value(Some(value)))
                .unwrap_or(UNKNOWN_ID);
            if linked != UNKNOWN_ID {
                if let Some(slot) = keys.get_mut(link.id_column) {
                    *slot = linked;
                }
            }
        }

        for attribute in spec.attributes {
            let from_metadata = record
                .and_then(|record| lookup_path(&record.attributes, attribute.path))
                .and_then(value_as_text);
            if let Some(value) = from_metadata.or_else(|| text(fields.get(attribute.column))) {
                attributes.insert(attribute.column, value);
            }
        }
    }

    attributes
}

/// Turns raw insights rows into cleaned rows, merging entity metadata when given.
///
/// # Arguments
/// * `raw` - Tagged insights rows as extracted
/// * `metadata` - Fetched entity records used to fill names and parent IDs
///
/// # Returns
/// A [`TransformOutput`] with the rows, the chosen click source and any warnings
pub fn transform_rows(
    raw: &[RawInsightRow],
    metadata: Option<&MetadataTable>,
) -> TransformOutput {
    let mut output = TransformOutput::default();
    let mut candidates = Vec::with_capacity(raw.len());

    for row in raw {
        let fields = rename_columns(&row.fields);

        let mut keys = EntityKeys {
            date_id: text(fields.get("date")).map(|d| date_key(&d)).unwrap_or(UNKNOWN_ID),
            account_id: coerce_id_value(fields.get("account_id")),
            campaign_id: coerce_id_value(fields.get("campaign_id")),
            adset_id: coerce_id_value(fields.get("adset_id")),
            ad_id: coerce_id_value(fields.get("ad_id")),
            creative_id: coerce_id_value(fields.get("creative_id")),
        };

        let country = match text(fields.get("country")) {
            Some(code) => map_country_code(&code),
            None => NOT_AVAILABLE.to_string(),
        };
        let placement = placement_name(
            &text(fields.get("platform")).unwrap_or_default(),
            &text(fields.get("position")).unwrap_or_default(),
        );

        let attributes = merge_metadata(&fields, &mut keys, metadata);

        let actions = fields.get("actions");
        let action_values = fields.get("action_values");
        let metrics = Metrics {
            spend: number(fields.get("spend")),
            impressions: number(fields.get("impressions")),
            reach: number(fields.get("reach")),
            clicks: 0.0,
            purchases: first_action_value(actions, PURCHASE_TYPES),
            purchase_value: first_action_value(action_values, PURCHASE_TYPES),
            leads: first_action_value(actions, LEAD_TYPES),
            video_plays: sum_action_values(
                fields.get("video_plays_actions"),
                Some(VIDEO_VIEW_TYPE),
            ),
            video_p25: sum_action_values(fields.get("video_p25_actions"), Some(VIDEO_VIEW_TYPE)),
            video_p50: sum_action_values(fields.get("video_p50_actions"), Some(VIDEO_VIEW_TYPE)),
            video_p75: sum_action_values(fields.get("video_p75_actions"), Some(VIDEO_VIEW_TYPE)),
            video_p100: sum_action_values(fields.get("video_p100_actions"), Some(VIDEO_VIEW_TYPE)),
            video_avg_time: sum_action_values(
                fields.get("video_avg_time_actions"),
                Some(VIDEO_VIEW_TYPE),
            ),
        };

        candidates.push(click_candidates(&fields));
        output.rows.push(TransformedRow {
            source: row.source,
            keys,
            country,
            age: breakdown_value(&fields, "age"),
            gender: breakdown_value(&fields, "gender"),
            placement,
            attributes,
            metrics,
            actions: parse_action_entries(&fields),
        });
    }

    output.click_source = choose_click_source(&candidates);
    match output.click_source {
        Some(source) => {
            let index = source.index();
            for (row, counters) in output.rows.iter_mut().zip(&candidates) {
                row.metrics.clicks = counters[index];
            }
            info!("Using {:?} as the click source for {} rows", source, output.rows.len());
        }
        None if !output.rows.is_empty() => {
            let message = "No click counter has a positive total; clicks set to 0".to_string();
            warn!("{}", message);
            output.warnings.push(message);
        }
        None => {}
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::EntityRecord;
    use crate::entities::EntityKind;
    use serde_json::json;

    fn raw(source: DataSource, value: Value) -> RawInsightRow {
        match value {
            Value::Object(fields) => RawInsightRow { source, fields },
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_coerce_entity_id() {
        assert_eq!(coerce_entity_id("123"), 123);
        assert_eq!(coerce_entity_id(" 123.0 "), 123);
        assert_eq!(coerce_entity_id("23851234567890123.0"), 23851234567890123);
        assert_eq!(coerce_entity_id(""), UNKNOWN_ID);
        assert_eq!(coerce_entity_id("nan"), UNKNOWN_ID);
        assert_eq!(coerce_entity_id("None"), UNKNOWN_ID);
        assert_eq!(coerce_entity_id("-5"), UNKNOWN_ID);
        assert_eq!(coerce_entity_id("1e5"), UNKNOWN_ID);
        assert_eq!(coerce_entity_id("99999999999999999999"), UNKNOWN_ID);
    }

    #[test]
    fn test_coerce_id_value() {
        assert_eq!(coerce_id_value(Some(&json!(120210000000000001u64))), 120210000000000001);
        assert_eq!(coerce_id_value(Some(&json!("42.0"))), 42);
        assert_eq!(coerce_id_value(Some(&json!(7.0))), 7);
        assert_eq!(coerce_id_value(Some(&Value::Null)), UNKNOWN_ID);
        assert_eq!(coerce_id_value(None), UNKNOWN_ID);
    }

    #[test]
    fn test_date_key() {
        assert_eq!(date_key("2024-03-09"), 20240309);
        assert_eq!(date_key("2024-13-09"), UNKNOWN_ID);
        assert_eq!(date_key("yesterday"), UNKNOWN_ID);
    }

    #[test]
    fn test_click_cascade_uses_first_positive_counter() {
        let rows = vec![
            raw(
                DataSource::Core,
                json!({
                    "date_start": "2024-01-01",
                    "inline_link_clicks": "0",
                    "outbound_clicks": [{"action_type": "outbound_click", "value": "4"}],
                    "clicks": "9"
                }),
            ),
            raw(
                DataSource::Core,
                json!({
                    "date_start": "2024-01-02",
                    "inline_link_clicks": "0",
                    "outbound_clicks": [{"action_type": "outbound_click", "value": "6"}],
                    "clicks": "11"
                }),
            ),
        ];

        let output = transform_rows(&rows, None);
        assert_eq!(output.click_source, Some(ClickSource::OutboundClicks));
        let clicks: Vec<f64> = output.rows.iter().map(|r| r.metrics.clicks).collect();
        assert_eq!(clicks, vec![4.0, 6.0]);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_click_cascade_all_zero_warns() {
        let rows = vec![raw(
            DataSource::Core,
            json!({"inline_link_clicks": "0", "clicks": 0, "impressions": "100"}),
        )];
        let output = transform_rows(&rows, None);
        assert_eq!(output.click_source, None);
        assert_eq!(output.rows[0].metrics.clicks, 0.0);
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn test_video_funnel_unpacking() {
        let rows = vec![raw(DataSource::Core, json!({
            "video_p25_watched_actions": [{"action_type": "video_view", "value": "40"}, {"action_type": "video_view", "value": "2"}],
            "video_p50_watched_actions": "not a list",
            "video_avg_time_watched_actions": [{"action_type": "video_view", "value": "3.5"}],
        }))];
        let metrics = transform_rows(&rows, None).rows[0].metrics;
        assert_eq!(metrics.video_p25, 42.0);
        assert_eq!(metrics.video_p50, 0.0);
        assert_eq!(metrics.video_avg_time, 3.5);
    }

    #[test]
    fn test_breakdown_normalization() {
        let rows = vec![
            raw(DataSource::Country, json!({"country": "DE"})),
            raw(DataSource::Demographic, json!({"age": "25-34", "gender": ""})),
            raw(
                DataSource::Placement,
                json!({"publisher_platform": "instagram", "platform_position": "instagram_stories"}),
            ),
        ];
        let output = transform_rows(&rows, None);
        assert_eq!(output.rows[0].country, "Germany");
        assert_eq!(output.rows[0].placement, NOT_AVAILABLE);
        assert_eq!(output.rows[1].age, "25-34");
        assert_eq!(output.rows[1].gender, NOT_AVAILABLE);
        assert_eq!(output.rows[2].placement, "Instagram Stories");
        assert_eq!(output.rows[2].country, NOT_AVAILABLE);
    }

    #[test]
    fn test_metadata_wins_over_raw_values() {
        let mut metadata = MetadataTable::new();
        metadata.insert(
            EntityKind::Campaign,
            EntityRecord::from_json(json!({
                "id": "10",
                "name": "Summer Sale",
                "status": "ACTIVE",
                "objective": "OUTCOME_SALES"
            }))
            .unwrap(),
        );
        metadata.insert(
            EntityKind::Ad,
            EntityRecord::from_json(json!({"id": "30", "name": "Video ad", "creative": {"id": "40"}}))
                .unwrap(),
        );

        let rows = vec![raw(DataSource::Core, json!({
            "campaign_id": "10", "campaign_name": "stale name", "ad_id": "30.0", "adset_name": "Raw ad set"
        }))];
        let row = &transform_rows(&rows, Some(&metadata)).rows[0];

        assert_eq!(row.attribute("campaign_name"), Some("Summer Sale"));
        assert_eq!(row.attribute("campaign_status"), Some("ACTIVE"));
        assert_eq!(row.attribute("adset_name"), Some("Raw ad set"));
        assert_eq!(row.keys.ad_id, 30);
        assert_eq!(row.keys.creative_id, 40);
    }

    #[test]
    fn test_conversion_summary_and_actions() {
        let rows = vec![raw(DataSource::Core, json!({
            "actions": [
                {"action_type": "purchase", "value": "3"},
                {"action_type": "offsite_conversion.fb_pixel_purchase", "value": "3"},
                {"action_type": "lead", "value": "5"},
                {"action_type": "link_click", "value": "17"}
            ],
            "action_values": [{"action_type": "purchase", "value": "120.50"}]
        }))];
        let output = transform_rows(&rows, None);
        let row = &output.rows[0];

        assert_eq!(row.metrics.purchases, 3.0);
        assert_eq!(row.metrics.purchase_value, 120.5);
        assert_eq!(row.metrics.leads, 5.0);
        assert_eq!(row.metrics.clicks, 17.0);
        assert_eq!(output.click_source, Some(ClickSource::LinkClicks));
        assert_eq!(row.actions.len(), 4);
        assert_eq!(row.actions[0].value, 120.5);
    }

    #[test]
    fn test_attribution_window_entries() {
        let fields = json!({
            "actions": [{"action_type": "purchase", "value": "5", "7d_click": "4", "1d_view": "1"}],
            "action_values": [{"action_type": "purchase", "value": "50", "7d_click": "40", "1d_view": "10"}]
        });
        let Value::Object(fields) = fields else { unreachable!() };
        let entries = parse_action_entries(&fields);

        assert_eq!(entries.len(), 2);
        let seven_day = entries.iter().find(|e| e.attribution_window == "7d_click").unwrap();
        assert_eq!((seven_day.count, seven_day.value), (4.0, 40.0));
    }
}
