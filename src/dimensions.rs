use crate::actions::ActionRow;
use crate::countries::get_country_code;
use crate::data::FrameBuilder;
use crate::entities::{lookup_path, value_as_text, EntityKind, MetadataTable};
use crate::error::Error;
use crate::placements::NOT_AVAILABLE;
use crate::transform::{date_key_of, date_of_key, TransformedRow, UNKNOWN_ID};
use crate::warehouse::{AttributeDim, TableSpec, DIM_DATE, ENTITY_LOAD_ORDER};
use chrono::{Datelike, NaiveDate, Weekday};
use datafusion::prelude::{DataFrame, SessionContext};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Places a creative may keep its video ID, in preference order.
const VIDEO_ID_PATHS: &[&str] = &[
    "/video_id",
    "/object_story_spec/video_data/video_id",
    "/asset_feed_spec/videos/0/video_id",
];

const ACTION_CATEGORIES: &[(&str, &str)] = &[
    ("purchase", "purchase"),
    ("lead", "lead"),
    ("add_to_cart", "cart"),
    ("checkout", "checkout"),
    ("video", "video"),
    ("click", "click"),
    ("landing_page", "click"),
    ("post", "engagement"),
    ("comment", "engagement"),
    ("like", "engagement"),
    ("reaction", "engagement"),
];

/// A dimension frame paired with the table it loads into.
pub struct DimensionFrame {
    pub table: &'static TableSpec,
    pub df: DataFrame,
    pub rows: usize,
}

pub fn action_category(action_type: &str) -> &'static str {
    ACTION_CATEGORIES
        .iter()
        .find(|(needle, _)| action_type.contains(needle))
        .map(|(_, category)| *category)
        .unwrap_or("other")
}

fn date_frame(
    rows: &[TransformedRow],
    ctx: &SessionContext,
) -> Result<Option<DimensionFrame>, Error> {
    let dates: Vec<NaiveDate> = rows
        .iter()
        .map(|row| row.keys.date_id)
        .filter(|id| *id != UNKNOWN_ID)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter_map(|id| date_of_key(id).ok())
        .collect();
    if dates.is_empty() {
        return Ok(None);
    }

    let df = FrameBuilder::new()
        .id_column("date_id", dates.iter().map(|d| date_key_of(*d)))
        .text_column("full_date", dates.iter().map(|d| Some(d.format("%Y-%m-%d").to_string())))
        .int_column("year", dates.iter().map(|d| Some(d.year() as i64)))
        .int_column("quarter", dates.iter().map(|d| Some(((d.month() - 1) / 3 + 1) as i64)))
        .int_column("month", dates.iter().map(|d| Some(d.month() as i64)))
        .text_column("month_name", dates.iter().map(|d| Some(d.format("%B").to_string())))
        .int_column("week_of_year", dates.iter().map(|d| Some(d.iso_week().week() as i64)))
        .int_column("day_of_month", dates.iter().map(|d| Some(d.day() as i64)))
        .int_column(
            "day_of_week",
            dates.iter().map(|d| Some(d.weekday().number_from_monday() as i64)),
        )
        .text_column("day_name", dates.iter().map(|d| Some(d.format("%A").to_string())))
        .int_column(
            "is_weekend",
            dates
                .iter()
                .map(|d| Some(matches!(d.weekday(), Weekday::Sat | Weekday::Sun) as i64)),
        )
        .to_dataframe(ctx)?;

    Ok(Some(DimensionFrame {
        table: &DIM_DATE,
        df,
        rows: dates.len(),
    }))
}

#[derive(Default)]
struct EntityMember {
    parents: BTreeMap<&'static str, u64>,
    attributes: BTreeMap<&'static str, String>,
}

fn video_id(metadata: Option<&MetadataTable>, creative_id: u64) -> String {
    metadata
        .and_then(|metadata| metadata.get(EntityKind::Creative, creative_id))
        .and_then(|record| {
            VIDEO_ID_PATHS
                .iter()
                .find_map(|path| lookup_path(&record.attributes, path).and_then(value_as_text))
        })
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn entity_frame(
    kind: EntityKind,
    rows: &[TransformedRow],
    metadata: Option<&MetadataTable>,
    ctx: &SessionContext,
) -> Result<Option<DimensionFrame>, Error> {
    let spec = kind.spec();
    let mut members: IndexMap<u64, EntityMember> = IndexMap::new();

    for row in rows {
        let id = row.keys.get(spec.id_column).unwrap_or(UNKNOWN_ID);
        if id == UNKNOWN_ID {
            continue;
        }
        let member = members.entry(id).or_default();
        for parent in spec.dimension_parents {
            let parent_id = row.keys.get(parent).unwrap_or(UNKNOWN_ID);
            if parent_id != UNKNOWN_ID || !member.parents.contains_key(parent) {
                member.parents.insert(*parent, parent_id);
            }
        }
        for attribute in spec.attributes {
            if let Some(value) = row.attribute(attribute.column) {
                member.attributes.insert(attribute.column, value.to_string());
            }
        }
        if kind == EntityKind::Creative {
            if let Some(ad_name) = row.attribute("ad_name") {
                member.attributes.insert("creative_name", ad_name.to_string());
            }
        }
    }
    if members.is_empty() {
        return Ok(None);
    }

    let mut builder = FrameBuilder::new().id_column(spec.id_column, members.keys().copied());
    for parent in spec.dimension_parents {
        builder = builder.id_column(
            parent,
            members
                .values()
                .map(|m| m.parents.get(parent).copied().unwrap_or(UNKNOWN_ID)),
        );
    }
    for attribute in spec.attributes {
        builder = builder.text_column(
            attribute.column,
            members.values().map(|m| {
                Some(
                    m.attributes
                        .get(attribute.column)
                        .map(String::as_str)
                        .unwrap_or(attribute.default),
                )
            }),
        );
    }
    if kind == EntityKind::Creative {
        builder = builder.text_column(
            "video_id",
            members.keys().map(|id| Some(video_id(metadata, *id))),
        );
    }

    debug!("Built {} {} rows", members.len(), spec.table.name);
    Ok(Some(DimensionFrame {
        table: spec.table,
        df: builder.to_dataframe(ctx)?,
        rows: members.len(),
    }))
}

fn attribute_values<'a>(
    dim: AttributeDim,
    values: impl Iterator<Item = &'a str>,
) -> IndexSet<String> {
    values
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != NOT_AVAILABLE && *v != dim.unknown_name())
        .map(str::to_string)
        .collect()
}

fn attribute_frame(
    dim: AttributeDim,
    rows: &[TransformedRow],
    actions: &[ActionRow],
    ctx: &SessionContext,
) -> Result<Option<DimensionFrame>, Error> {
    let values = match dim {
        AttributeDim::Age => attribute_values(dim, rows.iter().map(|r| r.age.as_str())),
        AttributeDim::Gender => attribute_values(dim, rows.iter().map(|r| r.gender.as_str())),
        AttributeDim::Country => attribute_values(dim, rows.iter().map(|r| r.country.as_str())),
        AttributeDim::Placement => attribute_values(dim, rows.iter().map(|r| r.placement.as_str())),
        AttributeDim::ActionType => {
            attribute_values(dim, actions.iter().map(|a| a.action_type.as_str()))
        }
    };
    if values.is_empty() {
        return Ok(None);
    }

    let mut builder = FrameBuilder::new().text_column(dim.name_column(), values.iter().map(Some));
    match dim {
        AttributeDim::Country => {
            builder = builder.text_column(
                "country_code",
                values
                    .iter()
                    .map(|name| Some(get_country_code(name).unwrap_or(NOT_AVAILABLE))),
            );
        }
        AttributeDim::ActionType => {
            builder = builder.text_column(
                "action_category",
                values.iter().map(|action_type| Some(action_category(action_type))),
            );
        }
        _ => {}
    }

    Ok(Some(DimensionFrame {
        table: dim.table(),
        df: builder.to_dataframe(ctx)?,
        rows: values.len(),
    }))
}

/// One deduplicated frame per dimension, in foreign-key load order.
/// Unknown members are never emitted; bootstrap inserts them.
///
/// # Arguments
/// * `rows` - Transformed insights rows of the run
/// * `actions` - Exploded action rows, source of the action types
/// * `metadata` - Fetched entity records, if any
/// * `ctx` - A reference to the [`SessionContext`] for DataFrame operations
///
/// # Returns
/// A Result containing the [`DimensionFrame`]s or an [`Error`]
pub fn build_dimensions(
    rows: &[TransformedRow],
    actions: &[ActionRow],
    metadata: Option<&MetadataTable>,
    ctx: &SessionContext,
) -> Result<Vec<DimensionFrame>, Error> {
    let mut frames = Vec::new();
    frames.extend(date_frame(rows, ctx)?);
    for kind in ENTITY_LOAD_ORDER {
        frames.extend(entity_frame(kind, rows, metadata, ctx)?);
    }
    for dim in AttributeDim::ALL {
        frames.extend(attribute_frame(dim, rows, actions, ctx)?);
    }
    Ok(frames)
}
