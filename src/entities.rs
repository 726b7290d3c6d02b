use crate::api_client::EntityRecord;
use crate::targeting::classify_targeting;
use crate::warehouse::{TableSpec, DIM_ACCOUNT, DIM_AD, DIM_ADSET, DIM_CAMPAIGN, DIM_CREATIVE};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Entity dimensions carrying platform-assigned IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Account,
    Campaign,
    AdSet,
    Ad,
    Creative,
}

/// One display attribute copied from metadata onto fact rows.
pub struct AttributeSpec {
    /// Column name on transformed rows and in the dimension table.
    pub column: &'static str,
    /// JSON pointer into the metadata record.
    pub path: &'static str,
    pub default: &'static str,
}

/// A metadata field that sets another entity's ID on the row.
pub struct ParentLink {
    pub id_column: &'static str,
    pub path: &'static str,
}

pub struct EntitySpec {
    pub kind: EntityKind,
    pub table: &'static TableSpec,
    pub id_column: &'static str,
    pub api_fields: &'static str,
    pub attributes: &'static [AttributeSpec],
    pub parents: &'static [ParentLink],
    /// Foreign keys stored on the dimension row itself.
    pub dimension_parents: &'static [&'static str],
}

const fn attr(column: &'static str, path: &'static str, default: &'static str) -> AttributeSpec {
    AttributeSpec {
        column,
        path,
        default,
    }
}

pub const UNKNOWN_STATUS: &str = "UNKNOWN";

pub static ENTITY_SPECS: &[EntitySpec] = &[
    EntitySpec {
        kind: EntityKind::Account,
        table: &DIM_ACCOUNT,
        id_column: "account_id",
        api_fields: "id,account_id,name,currency,timezone_name,account_status",
        attributes: &[
            attr("account_name", "/name", "Unknown Account"),
            attr("currency", "/currency", "N/A"),
            attr("timezone_name", "/timezone_name", "N/A"),
        ],
        parents: &[],
        dimension_parents: &[],
    },
    EntitySpec {
        kind: EntityKind::Campaign,
        table: &DIM_CAMPAIGN,
        id_column: "campaign_id",
        api_fields: "id,name,status,effective_status,objective,buying_type,daily_budget,lifetime_budget",
        attributes: &[
            attr("campaign_name", "/name", "Unknown Campaign"),
            attr("campaign_status", "/status", UNKNOWN_STATUS),
            attr("objective", "/objective", "N/A"),
            attr("buying_type", "/buying_type", "N/A"),
        ],
        parents: &[],
        dimension_parents: &["account_id"],
    },
    EntitySpec {
        kind: EntityKind::AdSet,
        table: &DIM_ADSET,
        id_column: "adset_id",
        api_fields: "id,name,status,campaign_id,optimization_goal,billing_event,targeting",
        attributes: &[
            attr("adset_name", "/name", "Unknown Ad Set"),
            attr("adset_status", "/status", UNKNOWN_STATUS),
            attr("optimization_goal", "/optimization_goal", "N/A"),
            attr("targeting_type", "/targeting_type", "Broad"),
            attr("targeting_summary", "/targeting_summary", "N/A"),
        ],
        parents: &[ParentLink {
            id_column: "campaign_id",
            path: "/campaign_id",
        }],
        dimension_parents: &["campaign_id"],
    },
    EntitySpec {
        kind: EntityKind::Ad,
        table: &DIM_AD,
        id_column: "ad_id",
        api_fields: "id,name,status,adset_id,campaign_id,creative{id}",
        attributes: &[
            attr("ad_name", "/name", "Unknown Ad"),
            attr("ad_status", "/status", UNKNOWN_STATUS),
        ],
        parents: &[
            ParentLink {
                id_column: "creative_id",
                path: "/creative/id",
            },
            ParentLink {
                id_column: "adset_id",
                path: "/adset_id",
            },
        ],
        dimension_parents: &["adset_id", "creative_id"],
    },
    EntitySpec {
        kind: EntityKind::Creative,
        table: &DIM_CREATIVE,
        id_column: "creative_id",
        api_fields: "id,name,title,body,image_url,thumbnail_url,video_id,call_to_action_type,object_story_spec,asset_feed_spec",
        attributes: &[
            attr("creative_name", "/name", "Unknown Creative"),
            attr("title", "/title", "N/A"),
            attr("body", "/body", "N/A"),
            attr("image_url", "/image_url", "N/A"),
            attr("thumbnail_url", "/thumbnail_url", "N/A"),
            attr("call_to_action_type", "/call_to_action_type", "N/A"),
        ],
        parents: &[],
        dimension_parents: &[],
    },
];

impl EntityKind {
    pub fn spec(&self) -> &'static EntitySpec {
        let index = match self {
            EntityKind::Account => 0,
            EntityKind::Campaign => 1,
            EntityKind::AdSet => 2,
            EntityKind::Ad => 3,
            EntityKind::Creative => 4,
        };
        &ENTITY_SPECS[index]
    }

    /// Account edge used by the bulk listing strategy; the account itself has none.
    pub fn listing_edge(&self) -> Option<&'static str> {
        match self {
            EntityKind::Account => None,
            EntityKind::Campaign => Some("campaigns"),
            EntityKind::AdSet => Some("adsets"),
            EntityKind::Ad => Some("ads"),
            EntityKind::Creative => Some("adcreatives"),
        }
    }
}

/// Renders a JSON scalar as the string stored in a dimension column.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// JSON pointer lookup starting from an object's fields.
pub fn lookup_path<'a>(attributes: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix('/')?;
    match path.split_once('/') {
        Some((head, rest)) => attributes.get(head)?.pointer(&format!("/{}", rest)),
        None => attributes.get(path),
    }
}

/// Fetched entity metadata, indexed by kind and coerced ID.
#[derive(Default, Debug)]
pub struct MetadataTable {
    records: HashMap<(EntityKind, u64), EntityRecord>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: EntityKind, mut record: EntityRecord) {
        let id = crate::transform::coerce_entity_id(&record.id);
        if id == crate::transform::UNKNOWN_ID {
            return;
        }
        if kind == EntityKind::AdSet {
            if let Some(targeting) = record.attributes.get("targeting") {
                let (archetype, summary) = classify_targeting(targeting);
                record.attributes.insert(
                    "targeting_type".to_string(),
                    Value::String(archetype.as_str().to_string()),
                );
                record
                    .attributes
                    .insert("targeting_summary".to_string(), Value::String(summary));
            }
        }
        self.records.insert((kind, id), record);
    }

    pub fn extend(&mut self, kind: EntityKind, records: impl IntoIterator<Item = EntityRecord>) {
        for record in records {
            self.insert(kind, record);
        }
    }

    pub fn get(&self, kind: EntityKind, id: u64) -> Option<&EntityRecord> {
        self.records.get(&(kind, id))
    }

    /// Attribute value at `path`, if the record exists and the value is non-empty.
    pub fn attribute(&self, kind: EntityKind, id: u64, path: &str) -> Option<String> {
        self.get(kind, id)
            .and_then(|record| lookup_path(&record.attributes, path))
            .and_then(value_as_text)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
