use crate::actions::explode_actions;
use crate::api_client::{
    AdsApi, DataSource, EntityRecord, GraphApiClient, RawInsightRow, FETCH_ERROR_NAME,
};
use crate::batch_client::BatchClient;
use crate::config::{Config, PipelineSettings};
use crate::data::{action_frame, transformed_frame};
use crate::dimensions::build_dimensions;
use crate::entities::{lookup_path, EntityKind, MetadataTable};
use crate::error::Error;
use crate::extractor::InsightsExtractor;
use crate::facts::{build_facts, FactKind};
use crate::loader::{LoadOutcome, WarehouseLoader};
use crate::transform::{
    coerce_id_value, date_key_of, date_of_key, transform_rows, ClickSource, UNKNOWN_ID,
};
use crate::warehouse::Warehouse;
use crate::workers::WorkerPool;
use chrono::{Duration, NaiveDate, Utc};
use datafusion::prelude::SessionContext;
use indexmap::IndexSet;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Share of campaigns with API-error names above which a run is flagged.
const ERROR_CAMPAIGN_THRESHOLD: f64 = 0.05;
const ACCOUNT_NODE_PREFIX: &str = "act_";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    #[default]
    Init,
    SchemaReady,
    Extracted,
    Transformed,
    DimensionsLoaded,
    FactsLoaded,
    Validated,
    Done,
    Failed,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub state: PipelineState,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub rows_extracted: BTreeMap<DataSource, usize>,
    pub failed_chunks: usize,
    pub rows_transformed: usize,
    pub action_rows: usize,
    pub metadata_records: usize,
    pub dimension_rows: BTreeMap<String, usize>,
    pub fact_rows: BTreeMap<String, usize>,
    pub failed_tables: Vec<String>,
    /// One entry per table load, in load order.
    pub loads: Vec<LoadOutcome>,
    pub filtered_rows: usize,
    pub click_source: Option<ClickSource>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunStats),
    /// The pull window was empty; nothing was extracted.
    UpToDate(RunStats),
}

impl RunOutcome {
    pub fn stats(&self) -> &RunStats {
        match self {
            RunOutcome::Completed(stats) | RunOutcome::UpToDate(stats) => stats,
        }
    }
}

/// Window to pull, or `None` when the warehouse is already current.
///
/// Explicit bounds win. Otherwise the window ends yesterday and starts
/// `refresh_days` before the day after the last loaded date, or
/// `initial_lookback_days` back on an empty warehouse.
pub fn pull_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    latest_loaded: Option<NaiveDate>,
    today: NaiveDate,
    settings: &PipelineSettings,
) -> Result<Option<(NaiveDate, NaiveDate)>, Error> {
    let end = end.unwrap_or(today - Duration::days(1));

    let start = match (start, latest_loaded) {
        (Some(start), _) => start,
        (None, Some(latest)) if latest >= end => return Ok(None),
        (None, Some(latest)) => {
            latest + Duration::days(1) - Duration::days(i64::from(settings.refresh_days))
        }
        (None, None) => {
            end - Duration::days(i64::from(settings.initial_lookback_days)) + Duration::days(1)
        }
    };

    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }
    Ok(Some((start, end)))
}

/// Distinct non-sentinel IDs found in `column` of the raw rows.
fn collect_ids(rows: &[RawInsightRow], column: &str) -> Vec<String> {
    rows.iter()
        .map(|row| coerce_id_value(row.fields.get(column)))
        .filter(|id| *id != UNKNOWN_ID)
        .collect::<IndexSet<_>>()
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

fn linked_ids(records: &[EntityRecord], path: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| lookup_path(&record.attributes, path))
        .map(|value| coerce_id_value(Some(value)))
        .filter(|id| *id != UNKNOWN_ID)
        .collect::<IndexSet<_>>()
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

/// Orchestrates one ETL run as an explicit state machine.
pub struct Pipeline<A: AdsApi> {
    warehouse: Warehouse,
    settings: PipelineSettings,
    extractor: InsightsExtractor<A>,
    batch_client: BatchClient<A>,
    today: NaiveDate,
    stats: RunStats,
}

impl<A: AdsApi> Pipeline<A> {
    pub fn new(api: Arc<A>, warehouse: Warehouse, config: &Config) -> Self {
        let settings = PipelineSettings::from(config);
        let extractor = InsightsExtractor::new(
            api.clone(),
            WorkerPool::new("insights", config.insights_workers),
            settings.chunk_days,
            settings.batch_retry,
        );
        let batch_client = BatchClient::new(
            api,
            WorkerPool::new("metadata", config.metadata_workers),
            &settings,
        );

        Pipeline {
            warehouse,
            settings,
            extractor,
            batch_client,
            today: Utc::now().date_naive(),
            stats: RunStats::default(),
        }
    }

    #[cfg(test)]
    fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    fn transition(&mut self, next: PipelineState) {
        info!("Pipeline {:?} -> {:?}", self.stats.state, next);
        self.stats.state = next;
    }

    fn warn_quality(&mut self, message: String) {
        warn!("{}", message);
        self.stats.warnings.push(message);
    }

    /// Runs the pipeline. On error the state becomes `Failed`, the stats so
    /// far are logged and the error is returned.
    pub async fn run(
        &mut self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<RunOutcome, Error> {
        self.stats = RunStats::default();
        match self.execute(start, end).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!("Pipeline failed in state {:?}: {}", self.stats.state, err);
                self.transition(PipelineState::Failed);
                error!(
                    "Stats at failure: {}",
                    serde_json::to_string(&self.stats).unwrap_or_default()
                );
                Err(err)
            }
        }
    }

    async fn execute(
        &mut self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<RunOutcome, Error> {
        self.warehouse.ensure_schema()?;
        self.warehouse.ensure_unknown_members()?;
        self.transition(PipelineState::SchemaReady);

        let latest = self.warehouse.max_fact_date()?.map(date_of_key).transpose()?;
        let Some((start, end)) = pull_window(start, end, latest, self.today, &self.settings)? else {
            info!("Warehouse is up to date (last loaded {:?})", latest);
            return Ok(RunOutcome::UpToDate(self.stats.clone()));
        };
        self.stats.window_start = Some(start.to_string());
        self.stats.window_end = Some(end.to_string());

        let extraction = self
            .extractor
            .extract_all(start, end, &self.settings.breakdowns)
            .await?;
        self.stats.rows_extracted = extraction.rows_by_source.clone();
        self.stats.failed_chunks = extraction.failed_chunks;
        self.transition(PipelineState::Extracted);

        if extraction.rows.is_empty() {
            // Keep existing facts: clearing the range would replace them with nothing.
            self.warn_quality(format!("No insights rows for {} to {}", start, end));
            self.transition(PipelineState::Done);
            return Ok(RunOutcome::Completed(self.stats.clone()));
        }

        let metadata = self.fetch_metadata(&extraction.rows).await?;
        self.stats.metadata_records = metadata.len();

        let output = transform_rows(&extraction.rows, Some(&metadata));
        let actions = explode_actions(&output.rows);
        self.stats.rows_transformed = output.rows.len();
        self.stats.action_rows = actions.len();
        self.stats.click_source = output.click_source;
        for warning in output.warnings {
            self.stats.warnings.push(warning);
        }
        self.transition(PipelineState::Transformed);

        let ctx = SessionContext::new();
        let mut loader = WarehouseLoader::new(self.warehouse.clone());

        for dimension in build_dimensions(&output.rows, &actions, Some(&metadata), &ctx)? {
            let outcome = loader.load_dataframe(dimension.df, dimension.table).await;
            self.record_load(outcome, true);
        }
        loader.reload_lookups()?;
        self.transition(PipelineState::DimensionsLoaded);

        let mut kinds = vec![FactKind::Core];
        kinds.extend(self.settings.breakdowns.iter().map(|b| FactKind::for_breakdown(*b)));
        kinds.push(FactKind::Action);

        let facts = build_facts(
            &kinds,
            &transformed_frame(&output.rows, &ctx)?,
            &action_frame(&actions, &ctx)?,
            loader.lookups(),
            self.settings.top_n_countries,
            &ctx,
        )
        .await?;

        // Only dates that were actually re-fetched are replaced; facts under a
        // failed chunk stay as they were.
        let mut cleared = 0;
        for kind in &kinds {
            for chunk in extraction.chunks_for(kind.extracted_from()) {
                cleared += self.warehouse.delete_fact_range(
                    &[kind.table()],
                    date_key_of(chunk.since),
                    date_key_of(chunk.until),
                )?;
            }
        }
        info!("Cleared {} fact rows for {} to {}", cleared, start, end);

        for fact in facts {
            self.stats.filtered_rows += fact.filtered_rows;
            let outcome = loader.load_dataframe(fact.df, fact.kind.table()).await;
            self.record_load(outcome, false);
        }
        self.transition(PipelineState::FactsLoaded);

        self.validate_or_warn(start, end);
        self.transition(PipelineState::Validated);

        self.transition(PipelineState::Done);
        info!(
            "Run stats: {}",
            serde_json::to_string(&self.stats).unwrap_or_default()
        );
        Ok(RunOutcome::Completed(self.stats.clone()))
    }

    fn record_load(&mut self, outcome: LoadOutcome, dimension: bool) {
        match &outcome {
            LoadOutcome::Loaded { table, rows } => {
                let counts = if dimension {
                    &mut self.stats.dimension_rows
                } else {
                    &mut self.stats.fact_rows
                };
                counts.insert(table.clone(), *rows);
            }
            LoadOutcome::Failed { .. } => {
                self.stats.failed_tables.push(outcome.table().to_string())
            }
        }
        self.stats.loads.push(outcome);
    }

    /// Campaigns, ad sets and ads by the IDs on the rows, creatives by the
    /// IDs on the ads, and the account itself.
    async fn fetch_metadata(&self, rows: &[RawInsightRow]) -> Result<MetadataTable, Error> {
        let mut metadata = MetadataTable::new();

        let account_ids: Vec<String> = collect_ids(rows, "account_id")
            .into_iter()
            .map(|id| format!("{}{}", ACCOUNT_NODE_PREFIX, id))
            .collect();
        let accounts = self
            .batch_client
            .fetch_entities(EntityKind::Account, &account_ids)
            .await?;
        metadata.extend(
            EntityKind::Account,
            accounts.into_iter().map(|mut record| {
                record.id = record.id.trim_start_matches(ACCOUNT_NODE_PREFIX).to_string();
                record
            }),
        );

        for (kind, column) in [
            (EntityKind::Campaign, "campaign_id"),
            (EntityKind::AdSet, "adset_id"),
        ] {
            let records = self
                .batch_client
                .fetch_entities(kind, &collect_ids(rows, column))
                .await?;
            metadata.extend(kind, records);
        }

        let ads = self
            .batch_client
            .fetch_entities(EntityKind::Ad, &collect_ids(rows, "ad_id"))
            .await?;
        let creative_ids = linked_ids(&ads, "/creative/id");
        metadata.extend(EntityKind::Ad, ads);

        let creatives = self
            .batch_client
            .fetch_entities(EntityKind::Creative, &creative_ids)
            .await?;
        metadata.extend(EntityKind::Creative, creatives);

        info!("Indexed {} metadata records", metadata.len());
        Ok(metadata)
    }

    /// Runs [`Self::validate`]. A failing check is recorded as a warning and
    /// never fails a run whose facts are already committed.
    fn validate_or_warn(&mut self, start: NaiveDate, end: NaiveDate) {
        if let Err(err) = self.validate(start, end) {
            self.warn_quality(format!("Post-load validation skipped: {}", err));
        }
    }

    /// Post-load checks. They only warn; the load stands.
    fn validate(&mut self, start: NaiveDate, end: NaiveDate) -> Result<(), Error> {
        let unknown_campaign = EntityKind::Campaign
            .spec()
            .attributes
            .iter()
            .find(|attribute| attribute.column == "campaign_name")
            .map(|attribute| attribute.default)
            .unwrap_or("Unknown Campaign");

        let snapshot = self.warehouse.quality_snapshot(
            date_key_of(start),
            date_key_of(end),
            unknown_campaign,
            FETCH_ERROR_NAME,
        )?;

        if snapshot.campaigns > 0 && snapshot.unknown_campaigns * 2 > snapshot.campaigns {
            self.warn_quality(format!(
                "{} of {} campaigns are still named '{}'; metadata merge likely failed",
                snapshot.unknown_campaigns, snapshot.campaigns, unknown_campaign
            ));
        }
        let error_share = snapshot.error_campaigns as f64 / snapshot.campaigns.max(1) as f64;
        if snapshot.campaigns > 0 && error_share > ERROR_CAMPAIGN_THRESHOLD {
            self.warn_quality(format!(
                "{} of {} campaigns could not be fetched from the API",
                snapshot.error_campaigns, snapshot.campaigns
            ));
        }
        if snapshot.clicks == 0.0 && snapshot.impressions > 0.0 {
            let message = format!(
                "Zero clicks recorded against {} impressions; check the requested click fields",
                snapshot.impressions
            );
            error!("{}", message);
            self.stats.warnings.push(message);
        }
        Ok(())
    }
}

/// Creates the warehouse schema and unknown members.
pub fn init_warehouse(config: &Config) -> Result<(), Error> {
    let warehouse = Warehouse::open(&config.database_path)?;
    warehouse.ensure_schema()?;
    warehouse.ensure_unknown_members()?;
    info!("Warehouse initialized at {}", config.database_path);
    Ok(())
}

pub async fn run_pipeline(
    config: Config,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<RunOutcome, Error> {
    let api = Arc::new(GraphApiClient::new(&config)?);
    let warehouse = Warehouse::open(&config.database_path)?;
    let mut pipeline = Pipeline::new(api, warehouse, &config);
    pipeline.run(start, end).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::{Breakdown, DateChunk};
    use crate::config::tests::test_config;
    use serde_json::{json, Map, Value};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn insight(date: &str, extra: Value) -> Map<String, Value> {
        let mut row = object(json!({
            "date_start": date,
            "account_id": "1",
            "campaign_id": "10",
            "adset_id": "20",
            "ad_id": "30",
            "spend": "5.00",
            "impressions": "100",
            "inline_link_clicks": "4",
            "actions": [{"action_type": "purchase", "value": "1"}],
            "action_values": [{"action_type": "purchase", "value": "25"}]
        }));
        row.extend(object(extra));
        row
    }

    fn hero_ad() -> Value {
        json!({"id": "30", "name": "Hero video", "adset_id": "20", "creative": {"id": "40"}})
    }

    /// In-memory upstream: fixed insights per source and a table of entities.
    struct FakeApi {
        core: Vec<Map<String, Value>>,
        placement: Vec<Map<String, Value>>,
        entities: Mutex<HashMap<String, Value>>,
        revoked: AtomicBool,
        core_down: AtomicBool,
    }

    impl FakeApi {
        fn new() -> Self {
            let api = FakeApi {
                core: vec![
                    insight("2024-01-02", json!({})),
                    insight("2024-01-02", json!({"spend": "3.00"})),
                ],
                placement: vec![insight(
                    "2024-01-02",
                    json!({"publisher_platform": "facebook", "platform_position": "feed"}),
                )],
                entities: Mutex::new(HashMap::new()),
                revoked: AtomicBool::new(false),
                core_down: AtomicBool::new(false),
            };
            for entity in [
                json!({"id": "act_1", "account_id": "1", "name": "Main account"}),
                json!({"id": "10", "name": "Summer Sale", "status": "ACTIVE"}),
                json!({
                    "id": "20",
                    "name": "Prospecting",
                    "campaign_id": "10",
                    "targeting": {"interests": [{"name": "Running"}]}
                }),
                hero_ad(),
                json!({"id": "40", "name": "creative-40", "video_id": "v-1"}),
            ] {
                api.put_entity(entity);
            }
            api
        }

        /// Every insights row loses its click counters.
        fn without_clicks(mut self) -> Self {
            for row in self.core.iter_mut().chain(self.placement.iter_mut()) {
                row.remove("inline_link_clicks");
            }
            self
        }

        fn put_entity(&self, entity: Value) {
            let id = entity["id"].as_str().unwrap_or_default().to_string();
            self.entities.lock().insert(id, entity);
        }

        fn remove_entity(&self, id: &str) {
            self.entities.lock().remove(id);
        }

        fn auth_error() -> Error {
            Error::Api {
                status: 400,
                code: 190,
                subcode: None,
                message: "Error validating access token".into(),
            }
        }
    }

    #[async_trait::async_trait]
    impl AdsApi for FakeApi {
        async fn fetch_insights(
            &self,
            chunk: DateChunk,
            breakdown: Option<Breakdown>,
        ) -> Result<Vec<Map<String, Value>>, Error> {
            if self.revoked.load(Ordering::SeqCst) {
                return Err(Self::auth_error());
            }
            if breakdown.is_none() && self.core_down.load(Ordering::SeqCst) {
                return Err(Error::Timeout {
                    operation: "insights".into(),
                });
            }
            let rows = match breakdown {
                None => &self.core,
                Some(Breakdown::Placement) => &self.placement,
                Some(_) => return Ok(Vec::new()),
            };
            Ok(rows
                .iter()
                .filter(|row| {
                    let day = row["date_start"].as_str().map(date);
                    day.is_some_and(|d| d >= chunk.since && d <= chunk.until)
                })
                .cloned()
                .collect())
        }

        async fn fetch_by_ids(
            &self,
            ids: &[String],
            _fields: &str,
        ) -> Result<Vec<EntityRecord>, Error> {
            Ok(ids
                .iter()
                .filter_map(|id| self.entities.lock().get(id).cloned())
                .filter_map(EntityRecord::from_json)
                .collect())
        }

        async fn fetch_entity(&self, id: &str, _fields: &str) -> Result<EntityRecord, Error> {
            self.entities
                .lock()
                .get(id)
                .cloned()
                .and_then(EntityRecord::from_json)
                .ok_or_else(|| Error::NoData {
                    message: format!("{} not found", id),
                })
        }

        async fn list_account_entities(
            &self,
            _kind: EntityKind,
            _fields: &str,
        ) -> Result<Vec<EntityRecord>, Error> {
            Ok(Vec::new())
        }
    }

    fn pipeline(api: Arc<FakeApi>, warehouse: Warehouse) -> Pipeline<FakeApi> {
        let mut config = test_config();
        config.breakdowns = vec![Breakdown::Placement, Breakdown::Country];
        Pipeline::new(api, warehouse, &config).with_today(date("2024-01-04"))
    }

    fn fact_contents(warehouse: &Warehouse, table: &str) -> Vec<(i64, i64, i64, f64, f64)> {
        warehouse
            .with_connection(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT date_id, campaign_id, creative_id, spend, clicks
                     FROM {} ORDER BY 1, 2, 3",
                    table
                ))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_breakdown_sources_stay_in_their_tables() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let mut pipeline = pipeline(Arc::new(FakeApi::new()), warehouse.clone());

        let outcome = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let stats = outcome.stats();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(stats.state, PipelineState::Done);
        assert!(stats.failed_tables.is_empty(), "{:?}", stats.failed_tables);
        assert_eq!(stats.rows_extracted[&DataSource::Core], 2);
        assert_eq!(stats.rows_extracted[&DataSource::Placement], 1);

        let core = fact_contents(&warehouse, "fact_core");
        assert_eq!(core, vec![(20240102, 10, 40, 8.0, 8.0)]);
        let placement = fact_contents(&warehouse, "fact_placement");
        assert_eq!(placement, vec![(20240102, 10, 40, 5.0, 4.0)]);
        assert_eq!(warehouse.row_count("fact_country")?, 0);
        assert_eq!(warehouse.row_count("fact_action")?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_metadata_lands_in_dimensions() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let mut pipeline = pipeline(Arc::new(FakeApi::new()), warehouse.clone());
        pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;

        let (campaign, targeting, creative, video): (String, String, String, String) = warehouse
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT c.campaign_name, s.targeting_type, cr.creative_name, cr.video_id
                     FROM dim_ad a
                     JOIN dim_adset s ON s.adset_id = a.adset_id
                     JOIN dim_campaign c ON c.campaign_id = s.campaign_id
                     JOIN dim_creative cr ON cr.creative_id = a.creative_id
                     WHERE a.ad_id = 30",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?)
            })?;
        assert_eq!(campaign, "Summer Sale");
        assert_eq!(targeting, "Interest Audience");
        assert_eq!(creative, "Hero video");
        assert_eq!(video, "v-1");
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let mut pipeline = pipeline(Arc::new(FakeApi::new()), warehouse.clone());

        pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let first: Vec<_> = ["fact_core", "fact_placement", "fact_action"]
            .iter()
            .map(|t| fact_contents(&warehouse, t))
            .collect();

        pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let second: Vec<_> = ["fact_core", "fact_placement", "fact_action"]
            .iter()
            .map(|t| fact_contents(&warehouse, t))
            .collect();

        assert_eq!(first, second);
        Ok(())
    }

    fn campaign_and_creative(warehouse: &Warehouse) -> Vec<(i64, String, i64)> {
        warehouse
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.date_id, c.campaign_name, f.creative_id
                     FROM fact_core f
                     JOIN dim_campaign c ON c.campaign_id = f.campaign_id
                     ORDER BY 1, 3",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_earlier_facts() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let api = Arc::new(FakeApi::new());
        let mut pipeline = pipeline(api.clone(), warehouse.clone());

        pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let core_before = fact_contents(&warehouse, "fact_core");
        assert_eq!(core_before, vec![(20240102, 10, 40, 8.0, 8.0)]);

        api.core_down.store(true, Ordering::SeqCst);
        let outcome = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let stats = outcome.stats();
        assert_eq!(stats.state, PipelineState::Done);
        assert_eq!(stats.failed_chunks, 1);

        assert_eq!(fact_contents(&warehouse, "fact_core"), core_before);
        assert_eq!(warehouse.row_count("fact_action")?, 1);
        assert_eq!(
            fact_contents(&warehouse, "fact_placement"),
            vec![(20240102, 10, 40, 5.0, 4.0)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_members_are_reattributed_on_rerun() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let api = Arc::new(FakeApi::new());
        api.remove_entity("10");
        api.remove_entity("30");
        let mut pipeline = pipeline(api.clone(), warehouse.clone());

        pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        assert_eq!(
            campaign_and_creative(&warehouse),
            vec![(20240102, FETCH_ERROR_NAME.to_string(), 0)]
        );

        api.put_entity(json!({"id": "10", "name": "Summer Sale", "status": "ACTIVE"}));
        api.put_entity(hero_ad());
        pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;

        assert_eq!(
            campaign_and_creative(&warehouse),
            vec![(20240102, "Summer Sale".to_string(), 40)]
        );
        assert_eq!(fact_contents(&warehouse, "fact_core"), vec![(20240102, 10, 40, 8.0, 8.0)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_nameless_campaigns_are_flagged() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let api = Arc::new(FakeApi::new());
        api.put_entity(json!({"id": "10", "status": "ACTIVE"}));
        let mut pipeline = pipeline(api, warehouse);

        let outcome = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let warnings = &outcome.stats().warnings;
        assert!(
            warnings.iter().any(|w| w.contains("still named 'Unknown Campaign'")),
            "{:?}",
            warnings
        );
        assert!(!warnings.iter().any(|w| w.contains("could not be fetched")));
        Ok(())
    }

    #[tokio::test]
    async fn test_unfetchable_campaigns_are_flagged() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let api = Arc::new(FakeApi::new());
        api.remove_entity("10");
        let mut pipeline = pipeline(api, warehouse);

        let outcome = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let warnings = &outcome.stats().warnings;
        assert!(
            warnings.iter().any(|w| w.contains("1 of 1 campaigns could not be fetched")),
            "{:?}",
            warnings
        );
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_clicks_warn_but_complete() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let mut pipeline = pipeline(Arc::new(FakeApi::new().without_clicks()), warehouse);

        let outcome = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let stats = outcome.stats();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(stats.state, PipelineState::Done);
        assert_eq!(stats.click_source, None);
        assert!(
            stats.warnings.iter().any(|w| w.starts_with("Zero clicks recorded against 200")),
            "{:?}",
            stats.warnings
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_errors_only_warn() {
        let warehouse = Warehouse::open_in_memory().unwrap();
        let mut pipeline = pipeline(Arc::new(FakeApi::new()), warehouse);
        pipeline.transition(PipelineState::FactsLoaded);

        // No schema, so the quality queries fail.
        pipeline.validate_or_warn(date("2024-01-01"), date("2024-01-03"));
        assert_eq!(pipeline.stats.state, PipelineState::FactsLoaded);
        assert_eq!(pipeline.stats.warnings.len(), 1);
        assert!(pipeline.stats.warnings[0].starts_with("Post-load validation skipped"));
    }

    #[tokio::test]
    async fn test_load_outcomes_are_recorded() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let mut pipeline = pipeline(Arc::new(FakeApi::new()), warehouse);

        let outcome = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await?;
        let stats = outcome.stats();
        assert!(stats.loads.contains(&LoadOutcome::Loaded {
            table: "fact_core".into(),
            rows: 1,
        }));
        let json = serde_json::to_value(stats)?;
        assert_eq!(json["loads"][0]["status"], "loaded");
        assert_eq!(json["loads"][0]["table"], "dim_date");
        Ok(())
    }

    #[tokio::test]
    async fn test_up_to_date_is_not_an_error() -> Result<(), Error> {
        let warehouse = Warehouse::open_in_memory()?;
        let api = Arc::new(FakeApi::new());
        let mut pipeline = pipeline(api.clone(), warehouse.clone()).with_today(date("2024-01-03"));

        pipeline.run(None, None).await?;
        let outcome = pipeline.run(None, None).await?;
        assert!(matches!(outcome, RunOutcome::UpToDate(_)));
        assert_eq!(outcome.stats().state, PipelineState::SchemaReady);
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_failure_fails_the_run() {
        let warehouse = Warehouse::open_in_memory().unwrap();
        let api = Arc::new(FakeApi::new());
        api.revoked.store(true, Ordering::SeqCst);
        let mut pipeline = pipeline(api, warehouse);

        let result = pipeline.run(Some(date("2024-01-01")), Some(date("2024-01-03"))).await;
        assert!(result.unwrap_err().is_auth_failure());
        assert_eq!(pipeline.stats.state, PipelineState::Failed);
    }

    #[test]
    fn test_pull_window() {
        let settings = PipelineSettings::from(&test_config());
        let today = date("2024-03-10");

        assert_eq!(
            pull_window(None, None, None, today, &settings).unwrap(),
            Some((date("2024-02-09"), date("2024-03-09")))
        );
        assert_eq!(
            pull_window(None, None, Some(date("2024-03-05")), today, &settings).unwrap(),
            Some((date("2024-03-03"), date("2024-03-09")))
        );
        assert_eq!(
            pull_window(None, None, Some(date("2024-03-09")), today, &settings).unwrap(),
            None
        );

        let (start, end) = (Some(date("2024-01-01")), Some(date("2024-01-31")));
        assert_eq!(
            pull_window(start, end, Some(date("2024-03-09")), today, &settings).unwrap(),
            Some((date("2024-01-01"), date("2024-01-31")))
        );
        let inverted = (Some(date("2024-02-01")), Some(date("2024-01-31")));
        assert!(pull_window(inverted.0, inverted.1, None, today, &settings).is_err());
    }
}
