use crate::api_client::DataSource;
use crate::transform::{EntityKeys, TransformedRow};

/// One granular conversion action for an entity tuple.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionRow {
    pub keys: EntityKeys,
    pub action_type: String,
    pub attribution_window: String,
    pub action_count: f64,
    pub action_value: f64,
}

/// Explodes the nested actions of core rows into one row per action type and window.
///
/// Breakdown rows repeat the same actions split across buckets, so only core
/// rows contribute; otherwise the action fact would be counted once per breakdown.
pub fn explode_actions(rows: &[TransformedRow]) -> Vec<ActionRow> {
    rows.iter()
        .filter(|row| row.source == DataSource::Core)
        .flat_map(|row| {
            row.actions.iter().map(move |action| ActionRow {
                keys: row.keys,
                action_type: action.action_type.clone(),
                attribution_window: action.attribution_window.clone(),
                action_count: action.count,
                action_value: action.value,
            })
        })
        .collect()
}
