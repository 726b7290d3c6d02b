use crate::entities::EntityKind;
use crate::error::Error;
use crate::transform::{EntityKeys, UNKNOWN_ID};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Dimension,
    Fact,
}

/// Upsert target: table name, policy and the natural key used for conflicts.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub kind: TableKind,
    pub key_columns: &'static [&'static str],
}

const fn dimension(name: &'static str, key_columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        name,
        kind: TableKind::Dimension,
        key_columns,
    }
}

const fn fact(name: &'static str, key_columns: &'static [&'static str]) -> TableSpec {
    TableSpec {
        name,
        kind: TableKind::Fact,
        key_columns,
    }
}

pub const DIM_DATE: TableSpec = dimension("dim_date", &["date_id"]);
pub const DIM_ACCOUNT: TableSpec = dimension("dim_account", &["account_id"]);
pub const DIM_CAMPAIGN: TableSpec = dimension("dim_campaign", &["campaign_id"]);
pub const DIM_ADSET: TableSpec = dimension("dim_adset", &["adset_id"]);
pub const DIM_AD: TableSpec = dimension("dim_ad", &["ad_id"]);
pub const DIM_CREATIVE: TableSpec = dimension("dim_creative", &["creative_id"]);
pub const DIM_AGE: TableSpec = dimension("dim_age", &["age_range"]);
pub const DIM_GENDER: TableSpec = dimension("dim_gender", &["gender"]);
pub const DIM_COUNTRY: TableSpec = dimension("dim_country", &["country_name"]);
pub const DIM_PLACEMENT: TableSpec = dimension("dim_placement", &["placement_name"]);
pub const DIM_ACTION_TYPE: TableSpec = dimension("dim_action_type", &["action_type"]);

const ENTITY_KEY: &[&str] = &EntityKeys::COLUMNS;

pub const FACT_CORE: TableSpec = fact("fact_core", ENTITY_KEY);
pub const FACT_PLACEMENT: TableSpec = fact(
    "fact_placement",
    &["date_id", "account_id", "campaign_id", "adset_id", "ad_id", "creative_id", "placement_id"],
);
pub const FACT_AGE_GENDER: TableSpec = fact(
    "fact_age_gender",
    &[
        "date_id",
        "account_id",
        "campaign_id",
        "adset_id",
        "ad_id",
        "creative_id",
        "age_id",
        "gender_id",
    ],
);
pub const FACT_COUNTRY: TableSpec = fact(
    "fact_country",
    &["date_id", "account_id", "campaign_id", "adset_id", "ad_id", "creative_id", "country_id"],
);
pub const FACT_ACTION: TableSpec = fact(
    "fact_action",
    &[
        "date_id",
        "account_id",
        "campaign_id",
        "adset_id",
        "ad_id",
        "creative_id",
        "action_type_id",
        "attribution_window",
    ],
);

pub const FACT_TABLES: [&TableSpec; 5] = [
    &FACT_CORE,
    &FACT_PLACEMENT,
    &FACT_AGE_GENDER,
    &FACT_COUNTRY,
    &FACT_ACTION,
];

/// Entity dimensions in foreign-key order.
pub const ENTITY_LOAD_ORDER: [EntityKind; 5] = [
    EntityKind::Account,
    EntityKind::Campaign,
    EntityKind::AdSet,
    EntityKind::Creative,
    EntityKind::Ad,
];

/// Small dimensions whose IDs are assigned by the warehouse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeDim {
    Age,
    Gender,
    Country,
    Placement,
    ActionType,
}

impl AttributeDim {
    pub const ALL: [AttributeDim; 5] = [
        AttributeDim::Age,
        AttributeDim::Gender,
        AttributeDim::Country,
        AttributeDim::Placement,
        AttributeDim::ActionType,
    ];

    pub fn table(&self) -> &'static TableSpec {
        match self {
            AttributeDim::Age => &DIM_AGE,
            AttributeDim::Gender => &DIM_GENDER,
            AttributeDim::Country => &DIM_COUNTRY,
            AttributeDim::Placement => &DIM_PLACEMENT,
            AttributeDim::ActionType => &DIM_ACTION_TYPE,
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            AttributeDim::Age => "age_id",
            AttributeDim::Gender => "gender_id",
            AttributeDim::Country => "country_id",
            AttributeDim::Placement => "placement_id",
            AttributeDim::ActionType => "action_type_id",
        }
    }

    /// Natural key column in the dimension table.
    pub fn name_column(&self) -> &'static str {
        self.table().key_columns[0]
    }

    /// Column carrying the attribute on transformed rows.
    pub fn row_column(&self) -> &'static str {
        match self {
            AttributeDim::Age => "age",
            AttributeDim::Gender => "gender",
            AttributeDim::Country => "country",
            AttributeDim::Placement => "placement",
            AttributeDim::ActionType => "action_type",
        }
    }

    pub fn unknown_name(&self) -> &'static str {
        match self {
            AttributeDim::ActionType => "unknown",
            _ => "Unknown",
        }
    }
}

/// Synthetic country that absorbs the long tail of the country fact.
pub const OTHER_COUNTRY: &str = "Other";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dim_date (
    date_id INTEGER PRIMARY KEY,
    full_date TEXT NOT NULL,
    year INTEGER,
    quarter INTEGER,
    month INTEGER,
    month_name TEXT,
    week_of_year INTEGER,
    day_of_month INTEGER,
    day_of_week INTEGER,
    day_name TEXT,
    is_weekend INTEGER
);
CREATE TABLE IF NOT EXISTS dim_account (
    account_id INTEGER PRIMARY KEY,
    account_name TEXT NOT NULL,
    currency TEXT,
    timezone_name TEXT
);
CREATE TABLE IF NOT EXISTS dim_campaign (
    campaign_id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL DEFAULT 0 REFERENCES dim_account (account_id),
    campaign_name TEXT NOT NULL,
    campaign_status TEXT,
    objective TEXT,
    buying_type TEXT
);
CREATE TABLE IF NOT EXISTS dim_adset (
    adset_id INTEGER PRIMARY KEY,
    campaign_id INTEGER NOT NULL DEFAULT 0 REFERENCES dim_campaign (campaign_id),
    adset_name TEXT NOT NULL,
    adset_status TEXT,
    optimization_goal TEXT,
    targeting_type TEXT,
    targeting_summary TEXT
);
CREATE TABLE IF NOT EXISTS dim_creative (
    creative_id INTEGER PRIMARY KEY,
    creative_name TEXT NOT NULL,
    title TEXT,
    body TEXT,
    image_url TEXT,
    thumbnail_url TEXT,
    call_to_action_type TEXT,
    video_id TEXT NOT NULL DEFAULT 'N/A'
);
CREATE TABLE IF NOT EXISTS dim_ad (
    ad_id INTEGER PRIMARY KEY,
    adset_id INTEGER NOT NULL DEFAULT 0 REFERENCES dim_adset (adset_id),
    creative_id INTEGER NOT NULL DEFAULT 0 REFERENCES dim_creative (creative_id),
    ad_name TEXT NOT NULL,
    ad_status TEXT
);
CREATE TABLE IF NOT EXISTS dim_age (
    age_id INTEGER PRIMARY KEY AUTOINCREMENT,
    age_range TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS dim_gender (
    gender_id INTEGER PRIMARY KEY AUTOINCREMENT,
    gender TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS dim_country (
    country_id INTEGER PRIMARY KEY AUTOINCREMENT,
    country_name TEXT NOT NULL UNIQUE,
    country_code TEXT NOT NULL DEFAULT 'N/A'
);
CREATE TABLE IF NOT EXISTS dim_placement (
    placement_id INTEGER PRIMARY KEY AUTOINCREMENT,
    placement_name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS dim_action_type (
    action_type_id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type TEXT NOT NULL UNIQUE,
    action_category TEXT NOT NULL DEFAULT 'other'
);
";

const ENTITY_FACT_COLUMNS: &str = "
    date_id INTEGER NOT NULL REFERENCES dim_date (date_id),
    account_id INTEGER NOT NULL REFERENCES dim_account (account_id),
    campaign_id INTEGER NOT NULL REFERENCES dim_campaign (campaign_id),
    adset_id INTEGER NOT NULL REFERENCES dim_adset (adset_id),
    ad_id INTEGER NOT NULL REFERENCES dim_ad (ad_id),
    creative_id INTEGER NOT NULL REFERENCES dim_creative (creative_id),";

const METRIC_COLUMNS: &str = "
    spend REAL NOT NULL DEFAULT 0,
    impressions INTEGER NOT NULL DEFAULT 0,
    reach INTEGER NOT NULL DEFAULT 0,
    clicks INTEGER NOT NULL DEFAULT 0,
    purchases REAL NOT NULL DEFAULT 0,
    purchase_value REAL NOT NULL DEFAULT 0,
    leads REAL NOT NULL DEFAULT 0,
    video_plays REAL NOT NULL DEFAULT 0,
    video_p25 REAL NOT NULL DEFAULT 0,
    video_p50 REAL NOT NULL DEFAULT 0,
    video_p75 REAL NOT NULL DEFAULT 0,
    video_p100 REAL NOT NULL DEFAULT 0,
    video_avg_time REAL NOT NULL DEFAULT 0,";

fn fact_ddl(spec: &TableSpec) -> String {
    let (breakdown, measures) = match spec.name {
        "fact_placement" => (
            "placement_id INTEGER NOT NULL REFERENCES dim_placement (placement_id),",
            METRIC_COLUMNS,
        ),
        "fact_age_gender" => (
            "age_id INTEGER NOT NULL REFERENCES dim_age (age_id),
    gender_id INTEGER NOT NULL REFERENCES dim_gender (gender_id),",
            METRIC_COLUMNS,
        ),
        "fact_country" => (
            "country_id INTEGER NOT NULL REFERENCES dim_country (country_id),",
            METRIC_COLUMNS,
        ),
        "fact_action" => (
            "action_type_id INTEGER NOT NULL REFERENCES dim_action_type (action_type_id),
    attribution_window TEXT NOT NULL,",
            "
    action_count REAL NOT NULL DEFAULT 0,
    action_value REAL NOT NULL DEFAULT 0,",
        ),
        _ => ("", METRIC_COLUMNS),
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}\n    {}{}\n    PRIMARY KEY ({})\n);\nCREATE INDEX IF NOT EXISTS idx_{}_date ON {} (date_id);",
        spec.name,
        ENTITY_FACT_COLUMNS,
        breakdown,
        measures,
        spec.key_columns.join(", "),
        spec.name,
        spec.name
    )
}

/// Aggregates read back for post-load checks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualitySnapshot {
    pub campaigns: i64,
    pub unknown_campaigns: i64,
    pub error_campaigns: i64,
    pub clicks: f64,
    pub impressions: f64,
}

/// Shared warehouse connection. Each write runs in its own transaction.
#[derive(Clone)]
pub struct Warehouse {
    conn: Arc<Mutex<Connection>>,
}

impl Warehouse {
    pub fn open(path: &str) -> Result<Self, Error> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        info!("Opened warehouse at {}", path);

        Ok(Warehouse {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Self::open(":memory:")
    }

    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    pub fn ensure_schema(&self) -> Result<(), Error> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA)?;
            for spec in FACT_TABLES {
                tx.execute_batch(&fact_ddl(spec))?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Inserts every dimension's unknown member if missing. Attribute
    /// dimensions get it as their first row, so it receives ID 1.
    pub fn ensure_unknown_members(&self) -> Result<(), Error> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO dim_date (date_id, full_date) VALUES (?1, 'Unknown')",
                params![UNKNOWN_ID as i64],
            )?;

            for kind in ENTITY_LOAD_ORDER {
                let spec = kind.spec();
                let mut columns = vec![spec.id_column];
                columns.extend(spec.dimension_parents.iter().copied());
                let mut values = vec!["0".to_string(); columns.len()];
                for attribute in spec.attributes {
                    columns.push(attribute.column);
                    values.push(format!("'{}'", attribute.default.replace('\'', "''")));
                }
                tx.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                        spec.table.name,
                        columns.join(", "),
                        values.join(", ")
                    ),
                    [],
                )?;
            }

            for dim in AttributeDim::ALL {
                tx.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} ({}) VALUES (?1)",
                        dim.table().name,
                        dim.name_column()
                    ),
                    params![dim.unknown_name()],
                )?;
            }
            tx.execute(
                "INSERT OR IGNORE INTO dim_country (country_name) VALUES (?1)",
                params![OTHER_COUNTRY],
            )?;

            tx.commit()?;
            debug!("Unknown members present");
            Ok(())
        })
    }

    /// Deletes fact rows in `[start, end]` date keys across `tables`.
    pub fn delete_fact_range(
        &self,
        tables: &[&TableSpec],
        start_date_id: u64,
        end_date_id: u64,
    ) -> Result<usize, Error> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for spec in tables {
                deleted += tx.execute(
                    &format!("DELETE FROM {} WHERE date_id BETWEEN ?1 AND ?2", spec.name),
                    params![start_date_id as i64, end_date_id as i64],
                )?;
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Latest date key present in the core fact table.
    pub fn max_fact_date(&self) -> Result<Option<u64>, Error> {
        self.with_connection(|conn| {
            let max: Option<i64> = conn
                .query_row(
                    "SELECT MAX(date_id) FROM fact_core WHERE date_id > 0",
                    [],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            Ok(max.map(|v| v as u64))
        })
    }

    /// Name to ID map of one attribute dimension.
    pub fn attribute_lookup(&self, dim: AttributeDim) -> Result<HashMap<String, i64>, Error> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {} FROM {}",
                dim.name_column(),
                dim.id_column(),
                dim.table().name
            ))?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
        })
    }

    #[cfg(test)]
    pub fn row_count(&self, table: &str) -> Result<i64, Error> {
        self.with_connection(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
        })
    }

    pub fn quality_snapshot(
        &self,
        start_date_id: u64,
        end_date_id: u64,
        unknown_campaign: &str,
        error_name: &str,
    ) -> Result<QualitySnapshot, Error> {
        self.with_connection(|conn| {
            let (campaigns, unknown_campaigns, error_campaigns) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(c.campaign_name = ?3), 0),
                        COALESCE(SUM(c.campaign_name = ?4), 0)
                 FROM dim_campaign c
                 WHERE c.campaign_id IN (
                     SELECT DISTINCT campaign_id FROM fact_core WHERE date_id BETWEEN ?1 AND ?2
                 )",
                params![start_date_id as i64, end_date_id as i64, unknown_campaign, error_name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let (clicks, impressions) = conn.query_row(
                "SELECT COALESCE(SUM(clicks), 0.0), COALESCE(SUM(impressions), 0.0)
                 FROM fact_core WHERE date_id BETWEEN ?1 AND ?2",
                params![start_date_id as i64, end_date_id as i64],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
            )?;

            Ok(QualitySnapshot {
                campaigns,
                unknown_campaigns,
                error_campaigns,
                clicks,
                impressions,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ENTITY_SPECS;

    fn warehouse() -> Warehouse {
        let warehouse = Warehouse::open_in_memory().unwrap();
        warehouse.ensure_schema().unwrap();
        warehouse.ensure_unknown_members().unwrap();
        warehouse
    }

    fn table_columns(warehouse: &Warehouse, table: &str) -> Vec<String> {
        warehouse
            .with_connection(|conn| {
                let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .unwrap()
    }

    #[test]
    fn test_attribute_unknown_member_is_first() {
        let warehouse = warehouse();
        for dim in AttributeDim::ALL {
            let lookup = warehouse.attribute_lookup(dim).unwrap();
            assert_eq!(lookup.get(dim.unknown_name()), Some(&1), "{:?}", dim);
        }
        let countries = warehouse.attribute_lookup(AttributeDim::Country).unwrap();
        assert_eq!(countries.get(OTHER_COUNTRY), Some(&2));
    }

    #[test]
    fn test_unknown_members_are_idempotent() {
        let warehouse = warehouse();
        warehouse.ensure_schema().unwrap();
        warehouse.ensure_unknown_members().unwrap();
        assert_eq!(warehouse.row_count("dim_campaign").unwrap(), 1);
        assert_eq!(warehouse.row_count("dim_age").unwrap(), 1);
        assert_eq!(warehouse.row_count("dim_country").unwrap(), 2);
    }

    #[test]
    fn test_entity_unknown_member_uses_defaults() {
        let warehouse = warehouse();
        let name: String = warehouse
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT campaign_name FROM dim_campaign WHERE campaign_id = 0",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(name, "Unknown Campaign");
    }

    #[test]
    fn test_entity_spec_columns_exist_in_tables() {
        let warehouse = warehouse();
        for spec in ENTITY_SPECS {
            let columns = table_columns(&warehouse, spec.table.name);
            assert!(columns.contains(&spec.id_column.to_string()));
            for attribute in spec.attributes {
                assert!(
                    columns.contains(&attribute.column.to_string()),
                    "{} missing {}",
                    spec.table.name,
                    attribute.column
                );
            }
        }
    }

    #[test]
    fn test_fact_keys_exist_in_tables() {
        let warehouse = warehouse();
        for spec in FACT_TABLES {
            let columns = table_columns(&warehouse, spec.name);
            for key in spec.key_columns {
                assert!(columns.contains(&key.to_string()), "{} missing {}", spec.name, key);
            }
        }
    }

    #[test]
    fn test_delete_fact_range_and_max_date() {
        let warehouse = warehouse();
        warehouse
            .with_connection(|conn| {
                conn.execute_batch(
                    "INSERT INTO dim_date (date_id, full_date) VALUES (20240101, '2024-01-01'), (20240102, '2024-01-02');
                     INSERT INTO fact_core (date_id, account_id, campaign_id, adset_id, ad_id, creative_id, spend)
                     VALUES (20240101, 0, 0, 0, 0, 0, 1.0), (20240102, 0, 0, 0, 0, 0, 2.0);",
                )?;
                Ok(())
            })
            .unwrap();

        assert_eq!(warehouse.max_fact_date().unwrap(), Some(20240102));
        let deleted = warehouse
            .delete_fact_range(&FACT_TABLES, 20240102, 20240131)
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(warehouse.max_fact_date().unwrap(), Some(20240101));
    }

    #[test]
    fn test_fact_rows_must_reference_dimensions() {
        let warehouse = warehouse();
        let result = warehouse.with_connection(|conn| {
            conn.execute(
                "INSERT INTO fact_core (date_id, account_id, campaign_id, adset_id, ad_id, creative_id)
                 VALUES (0, 0, 999, 0, 0, 0)",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_on_disk_warehouse() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("warehouse.db");
        let warehouse = Warehouse::open(path.to_str().unwrap()).unwrap();
        warehouse.ensure_schema().unwrap();
        warehouse.ensure_unknown_members().unwrap();
        assert_eq!(warehouse.max_fact_date().unwrap(), None);
    }
}
