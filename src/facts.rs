use crate::api_client::{Breakdown, DataSource};
use crate::data::FrameBuilder;
use crate::error::Error;
use crate::loader::LookupCache;
use crate::transform::{EntityKeys, Metrics, UNKNOWN_ID};
use crate::warehouse::{
    AttributeDim, TableSpec, FACT_ACTION, FACT_AGE_GENDER, FACT_CORE, FACT_COUNTRY, FACT_PLACEMENT,
    OTHER_COUNTRY,
};
use datafusion::common::{JoinType, ScalarValue};
use datafusion::functions_aggregate::sum::sum;
use datafusion::prelude::{col, lit, DataFrame, Expr, SessionContext};
use log::{debug, warn};
use serde::Serialize;

const ACTION_MEASURES: &[&str] = &["action_count", "action_value"];
const COUNTRY_VIEW: &str = "country_fact_input";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Core,
    Placement,
    AgeGender,
    Country,
    Action,
}

impl FactKind {
    pub fn for_breakdown(breakdown: Breakdown) -> FactKind {
        match breakdown {
            Breakdown::Placement => FactKind::Placement,
            Breakdown::Demographic => FactKind::AgeGender,
            Breakdown::Country => FactKind::Country,
        }
    }

    pub fn table(&self) -> &'static TableSpec {
        match self {
            FactKind::Core => &FACT_CORE,
            FactKind::Placement => &FACT_PLACEMENT,
            FactKind::AgeGender => &FACT_AGE_GENDER,
            FactKind::Country => &FACT_COUNTRY,
            FactKind::Action => &FACT_ACTION,
        }
    }

    /// Only rows tagged with this origin feed the table.
    pub fn source(&self) -> DataSource {
        match self {
            FactKind::Core => DataSource::Core,
            FactKind::Placement => DataSource::Placement,
            FactKind::AgeGender => DataSource::Demographic,
            FactKind::Country => DataSource::Country,
            FactKind::Action => DataSource::Action,
        }
    }

    /// Insights request whose rows feed this table. Action rows are exploded
    /// from core rows.
    pub fn extracted_from(&self) -> DataSource {
        match self {
            FactKind::Action => DataSource::Core,
            other => other.source(),
        }
    }

    fn dimensions(&self) -> &'static [AttributeDim] {
        match self {
            FactKind::Core => &[],
            FactKind::Placement => &[AttributeDim::Placement],
            FactKind::AgeGender => &[AttributeDim::Age, AttributeDim::Gender],
            FactKind::Country => &[AttributeDim::Country],
            FactKind::Action => &[AttributeDim::ActionType],
        }
    }

    /// Key columns carried through untouched besides the entity tuple.
    fn passthrough_keys(&self) -> &'static [&'static str] {
        match self {
            FactKind::Action => &["attribution_window"],
            _ => &[],
        }
    }

    fn measures(&self) -> &'static [&'static str] {
        match self {
            FactKind::Action => ACTION_MEASURES,
            _ => &Metrics::COLUMNS,
        }
    }
}

pub struct FactFrame {
    pub kind: FactKind,
    pub df: DataFrame,
    /// Rows dropped for an unparseable date, or for an attribute with no ID
    /// and no unknown member.
    pub filtered_rows: usize,
}

fn group_by(columns: impl IntoIterator<Item = &'static str>) -> Vec<Expr> {
    columns.into_iter().map(|c| col(c).alias(c)).collect()
}

fn sums(measures: &[&str]) -> Vec<Expr> {
    measures.iter().map(|m| sum(col(*m)).alias(*m)).collect()
}

fn with_missing_measures(mut df: DataFrame, measures: &[&str]) -> Result<DataFrame, Error> {
    for measure in measures {
        if !df.schema().has_column_with_unqualified_name(measure) {
            debug!("Materializing missing measure {} as zero", measure);
            df = df.with_column(measure, lit(0.0))?;
        }
    }
    Ok(df)
}

/// Keeps the `top_n` countries by spend per entity tuple and folds the rest
/// into a single "Other" row. Totals are preserved.
async fn reduce_countries(
    df: DataFrame,
    measures: &[&str],
    top_n: usize,
    ctx: &SessionContext,
) -> Result<DataFrame, Error> {
    ctx.deregister_table(COUNTRY_VIEW)?;
    ctx.register_table(COUNTRY_VIEW, df.into_view())?;

    let keys = EntityKeys::COLUMNS.join(", ");
    let measure_sums = measures
        .iter()
        .map(|m| format!("SUM({m}) AS {m}"))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT {keys}, country_bucket AS country, {measure_sums}
         FROM (
             SELECT *, CASE WHEN country_rank <= {top_n} THEN country ELSE '{OTHER_COUNTRY}' END AS country_bucket
             FROM (
                 SELECT *, ROW_NUMBER() OVER (PARTITION BY {keys} ORDER BY spend DESC, country ASC) AS country_rank
                 FROM {COUNTRY_VIEW}
             ) ranked
         ) bucketed
         GROUP BY {keys}, country_bucket"
    );

    let reduced = ctx.sql(&query).await?;
    ctx.deregister_table(COUNTRY_VIEW)?;
    Ok(reduced)
}

/// Swaps each attribute name column for its warehouse ID via the lookup cache.
async fn resolve_attribute_ids(
    mut df: DataFrame,
    kind: FactKind,
    lookups: &LookupCache,
    ctx: &SessionContext,
) -> Result<(DataFrame, usize), Error> {
    let mut filtered = 0;

    for dim in kind.dimensions() {
        let name_column = format!("{}_lookup", dim.row_column());
        let entries: Vec<(&str, i64)> = lookups.entries(*dim).collect();
        let lookup = FrameBuilder::new()
            .text_column(&name_column, entries.iter().map(|(name, _)| Some(*name)))
            .int_column(dim.id_column(), entries.iter().map(|(_, id)| Some(*id)))
            .to_dataframe(ctx)?;

        df = df
            .join(
                lookup,
                JoinType::Left,
                &[dim.row_column()],
                &[name_column.as_str()],
                None,
            )?
            .drop_columns(&[dim.row_column(), name_column.as_str()])?;

        match lookups.unknown_id(*dim) {
            Some(unknown) => {
                df = df.fill_null(
                    ScalarValue::Int64(Some(unknown)),
                    vec![dim.id_column().to_string()],
                )?;
            }
            None => {
                let total = df.clone().count().await?;
                let missing = df
                    .clone()
                    .filter(col(dim.id_column()).is_null())?
                    .count()
                    .await?;
                if missing > 0 {
                    warn!(
                        "Dropping {} of {} {} rows ({:.1}%): no {} ID and no unknown member",
                        missing,
                        total,
                        kind.table().name,
                        missing as f64 * 100.0 / total as f64,
                        dim.row_column()
                    );
                    filtered += missing;
                }
                df = df.filter(col(dim.id_column()).is_not_null())?;
            }
        }
    }

    Ok((df, filtered))
}

/// Removes rows whose date never parsed. They would land outside every
/// reprocessed date range and could never be replaced by a later run.
async fn drop_undated(df: DataFrame, kind: FactKind) -> Result<(DataFrame, usize), Error> {
    let undated = df
        .clone()
        .filter(col("date_id").eq(lit(UNKNOWN_ID as i64)))?
        .count()
        .await?;
    if undated > 0 {
        warn!(
            "Dropping {} {} rows without a valid date",
            undated,
            kind.table().name
        );
    }
    Ok((df.filter(col("date_id").not_eq(lit(UNKNOWN_ID as i64)))?, undated))
}

/// Builds one pre-aggregated fact frame from the rows tagged for `kind`.
pub async fn build_fact(
    kind: FactKind,
    input: DataFrame,
    lookups: &LookupCache,
    top_n_countries: usize,
    ctx: &SessionContext,
) -> Result<FactFrame, Error> {
    let measures = kind.measures();
    let df = input.filter(col("data_source").eq(lit(kind.source().as_str())))?;
    let (df, undated) = drop_undated(df, kind).await?;
    let df = with_missing_measures(df, measures)?;

    let natural_key = EntityKeys::COLUMNS
        .into_iter()
        .chain(kind.dimensions().iter().map(|dim| dim.row_column()))
        .chain(kind.passthrough_keys().iter().copied());
    let df = df.aggregate(group_by(natural_key), sums(measures))?;

    let df = if kind == FactKind::Country {
        reduce_countries(df, measures, top_n_countries, ctx).await?
    } else {
        df
    };

    let (df, filtered_rows) = resolve_attribute_ids(df, kind, lookups, ctx).await?;

    // Different names can resolve to the same ID, e.g. "N/A" and "Unknown".
    let df = df.aggregate(group_by(kind.table().key_columns.iter().copied()), sums(measures))?;

    Ok(FactFrame {
        kind,
        df,
        filtered_rows: filtered_rows + undated,
    })
}

/// Builds the fact frames for `kinds`; action facts read the exploded action frame.
///
/// # Arguments
/// * `kinds` - The fact tables to build, in load order
/// * `transformed` - [`DataFrame`] of transformed insights rows from every source
/// * `actions` - [`DataFrame`] of exploded action rows
/// * `lookups` - The [`LookupCache`] used to swap attribute names for IDs
/// * `top_n_countries` - Countries kept per entity tuple before folding into "Other"
/// * `ctx` - A reference to the [`SessionContext`] for DataFrame operations
///
/// # Returns
/// A Result containing one [`FactFrame`] per kind or an [`Error`]
pub async fn build_facts(
    kinds: &[FactKind],
    transformed: &DataFrame,
    actions: &DataFrame,
    lookups: &LookupCache,
    top_n_countries: usize,
    ctx: &SessionContext,
) -> Result<Vec<FactFrame>, Error> {
    let mut frames = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let input = match kind {
            FactKind::Action => actions.clone(),
            _ => transformed.clone(),
        };
        frames.push(build_fact(*kind, input, lookups, top_n_countries, ctx).await?);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRow;
    use crate::data::{action_frame, collect_rows, transformed_frame, Cell, Rows};
    use crate::placements::NOT_AVAILABLE;
    use crate::transform::TransformedRow;
    use std::collections::BTreeMap;

    fn keys() -> EntityKeys {
        EntityKeys {
            date_id: 20240101,
            account_id: 1,
            campaign_id: 2,
            adset_id: 3,
            ad_id: 4,
            creative_id: 5,
        }
    }

    fn row(source: DataSource, spend: f64, impressions: f64) -> TransformedRow {
        TransformedRow {
            source,
            keys: keys(),
            country: NOT_AVAILABLE.into(),
            age: NOT_AVAILABLE.into(),
            gender: NOT_AVAILABLE.into(),
            placement: NOT_AVAILABLE.into(),
            attributes: BTreeMap::new(),
            metrics: Metrics {
                spend,
                impressions,
                clicks: 1.0,
                ..Metrics::default()
            },
            actions: Vec::new(),
        }
    }

    fn lookups() -> LookupCache {
        let mut cache = LookupCache::default();
        for dim in AttributeDim::ALL {
            cache.insert(dim, dim.unknown_name(), 1);
        }
        cache.insert(AttributeDim::Placement, "Facebook Feed", 2);
        cache.insert(AttributeDim::Country, OTHER_COUNTRY, 2);
        cache
    }

    fn value(rows: &Rows, row: usize, column: &str) -> Cell {
        rows.rows[row][rows.column_index(column).unwrap()].clone()
    }

    #[tokio::test]
    async fn test_breakdown_sources_do_not_cross() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let mut placement = row(DataSource::Placement, 7.0, 70.0);
        placement.placement = "Facebook Feed".into();
        let rows = vec![
            row(DataSource::Core, 5.0, 50.0),
            row(DataSource::Core, 2.0, 20.0),
            placement,
        ];
        let df = transformed_frame(&rows, &ctx)?;

        let frames = build_facts(
            &[FactKind::Core, FactKind::Placement],
            &df,
            &action_frame(&[], &ctx)?,
            &lookups(),
            10,
            &ctx,
        )
        .await?;

        let core = collect_rows(frames[0].df.clone()).await?;
        assert_eq!(core.len(), 1);
        assert_eq!(core.sum("spend"), 7.0);
        assert_eq!(core.sum("impressions"), 70.0);

        let placement = collect_rows(frames[1].df.clone()).await?;
        assert_eq!(placement.len(), 1);
        assert_eq!(value(&placement, 0, "placement_id"), Cell::Int(2));
        assert_eq!(placement.sum("spend"), 7.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_country_top_n_conserves_totals() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let top_n = 3;
        let mut cache = lookups();
        let names = ["Germany", "France", "Spain", "Italy", "Poland", "Austria", "Norway", "Chile"];
        let mut rows = Vec::new();
        for (i, name) in names.iter().enumerate() {
            cache.insert(AttributeDim::Country, name, 10 + i as i64);
            let mut r = row(DataSource::Country, (i + 1) as f64, 100.0 + i as f64);
            r.country = name.to_string();
            rows.push(r);
        }

        let df = transformed_frame(&rows, &ctx)?;
        let fact = build_fact(FactKind::Country, df, &cache, top_n, &ctx).await?;
        let reduced = collect_rows(fact.df).await?;

        assert_eq!(reduced.len(), top_n + 1);
        for measure in Metrics::COLUMNS {
            let index = Metrics::COLUMNS.iter().position(|m| *m == measure).unwrap();
            let before: f64 = rows.iter().map(|r| r.metrics.values()[index]).sum();
            assert_eq!(reduced.sum(measure), before, "{}", measure);
        }

        // Chile, Norway and Austria have the highest spend; the rest fold into Other.
        let country_ids: Vec<i64> = (0..reduced.len())
            .map(|i| value(&reduced, i, "country_id").as_i64().unwrap())
            .collect();
        assert!(country_ids.contains(&2));
        assert!(country_ids.contains(&17));
        assert!(!country_ids.contains(&10));
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolved_attribute_uses_unknown_member() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let mut r = row(DataSource::Placement, 3.0, 30.0);
        r.placement = "Audience Network Rewarded Video".into();
        let df = transformed_frame(&[r], &ctx)?;

        let fact = build_fact(FactKind::Placement, df, &lookups(), 10, &ctx).await?;
        let rows = collect_rows(fact.df).await?;
        assert_eq!(value(&rows, 0, "placement_id"), Cell::Int(1));
        assert_eq!(fact.filtered_rows, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rows_without_any_id_are_filtered() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let mut cache = LookupCache::default();
        cache.insert(AttributeDim::Age, "25-34", 2);
        cache.insert(AttributeDim::Gender, "female", 3);

        let mut known = row(DataSource::Demographic, 1.0, 10.0);
        known.age = "25-34".into();
        known.gender = "female".into();
        let mut unknown = row(DataSource::Demographic, 1.0, 10.0);
        unknown.age = "65+".into();
        unknown.gender = "female".into();

        let df = transformed_frame(&[known, unknown], &ctx)?;
        let fact = build_fact(FactKind::AgeGender, df, &cache, 10, &ctx).await?;
        assert_eq!(fact.filtered_rows, 1);
        assert_eq!(collect_rows(fact.df).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_undated_rows_are_dropped_and_counted() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let mut undated = row(DataSource::Core, 4.0, 40.0);
        undated.keys.date_id = UNKNOWN_ID;
        let df = transformed_frame(&[row(DataSource::Core, 1.0, 10.0), undated], &ctx)?;

        let fact = build_fact(FactKind::Core, df, &lookups(), 10, &ctx).await?;
        assert_eq!(fact.filtered_rows, 1);
        let rows = collect_rows(fact.df).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(value(&rows, 0, "date_id"), Cell::Int(20240101));
        assert_eq!(value(&rows, 0, "spend"), Cell::Float(1.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_action_fact_keys_include_window() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let mut cache = lookups();
        cache.insert(AttributeDim::ActionType, "purchase", 4);
        let action = |window: &str, count: f64| ActionRow {
            keys: keys(),
            action_type: "purchase".into(),
            attribution_window: window.into(),
            action_count: count,
            action_value: count * 10.0,
        };
        let actions = action_frame(
            &[action("7d_click", 2.0), action("7d_click", 1.0), action("1d_view", 4.0)],
            &ctx,
        )?;

        let fact = build_fact(FactKind::Action, actions, &cache, 10, &ctx).await?;
        let rows = collect_rows(fact.df).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.sum("action_count"), 7.0);
        assert_eq!(rows.sum("action_value"), 70.0);
        assert_eq!(value(&rows, 0, "action_type_id"), Cell::Int(4));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_measures_become_zero() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = FrameBuilder::new()
            .text_column("data_source", [Some("core")])
            .id_column("date_id", [20240101])
            .id_column("account_id", [1])
            .id_column("campaign_id", [2])
            .id_column("adset_id", [3])
            .id_column("ad_id", [4])
            .id_column("creative_id", [5])
            .float_column("spend", [9.5])
            .to_dataframe(&ctx)?;

        let fact = build_fact(FactKind::Core, df, &lookups(), 10, &ctx).await?;
        let rows = collect_rows(fact.df).await?;
        assert_eq!(rows.sum("spend"), 9.5);
        assert_eq!(value(&rows, 0, "reach"), Cell::Float(0.0));
        Ok(())
    }
}
