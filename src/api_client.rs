use crate::config::Config;
use crate::entities::{EntityKind, UNKNOWN_STATUS};
use crate::error::Error;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use log::debug;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::time::Duration;

const PAGE_LIMIT: &str = "1000";

/// Placeholder name given to entities whose lookup failed for good.
pub const FETCH_ERROR_NAME: &str = "Unknown/Error";

const INSIGHT_FIELDS: &[&str] = &[
    "account_id",
    "account_name",
    "account_currency",
    "campaign_id",
    "campaign_name",
    "adset_id",
    "adset_name",
    "ad_id",
    "ad_name",
    "date_start",
    "spend",
    "impressions",
    "reach",
    "clicks",
    "inline_link_clicks",
    "outbound_clicks",
    "actions",
    "action_values",
    "video_play_actions",
    "video_p25_watched_actions",
    "video_p50_watched_actions",
    "video_p75_watched_actions",
    "video_p100_watched_actions",
    "video_avg_time_watched_actions",
];

const LISTING_STATUSES: &[&str] = &["ACTIVE", "PAUSED", "DELETED", "ARCHIVED"];

/// Which extraction produced a row; keeps breakdown rows out of the wrong fact table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Core,
    Placement,
    Demographic,
    Country,
    Action,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Core => "core",
            DataSource::Placement => "placement",
            DataSource::Demographic => "demographic",
            DataSource::Country => "country",
            DataSource::Action => "action",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Breakdown {
    Placement,
    Demographic,
    Country,
}

impl Breakdown {
    pub fn api_fields(&self) -> &'static [&'static str] {
        match self {
            Breakdown::Placement => &["publisher_platform", "platform_position"],
            Breakdown::Demographic => &["age", "gender"],
            Breakdown::Country => &["country"],
        }
    }

    pub fn data_source(&self) -> DataSource {
        match self {
            Breakdown::Placement => DataSource::Placement,
            Breakdown::Demographic => DataSource::Demographic,
            Breakdown::Country => DataSource::Country,
        }
    }
}

/// Inclusive date window of one insights request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateChunk {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

/// One insights row as returned upstream, tagged with its extraction source.
#[derive(Clone, Debug, PartialEq)]
pub struct RawInsightRow {
    pub source: DataSource,
    pub fields: Map<String, Value>,
}

/// Attributes of one platform entity, keyed by its ID.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    pub id: String,
    pub attributes: Map<String, Value>,
}

impl EntityRecord {
    pub fn from_json(value: Value) -> Option<Self> {
        let Value::Object(attributes) = value else {
            return None;
        };
        let id = match attributes.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(EntityRecord { id, attributes })
    }

    /// Stand-in for an entity that could not be fetched.
    pub fn safe_default(id: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert("id".to_string(), Value::String(id.to_string()));
        attributes.insert("name".to_string(), Value::String(FETCH_ERROR_NAME.to_string()));
        attributes.insert("status".to_string(), Value::String(UNKNOWN_STATUS.to_string()));
        EntityRecord {
            id: id.to_string(),
            attributes,
        }
    }

    pub fn is_fetch_error(&self) -> bool {
        self.attributes.get("name").and_then(Value::as_str) == Some(FETCH_ERROR_NAME)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AdsApi: Send + Sync + 'static {
    /// Fetches every ad-level insights row for the chunk, following pagination.
    /// `breakdown` adds the breakdown dimension columns to each row.
    async fn fetch_insights(
        &self,
        chunk: DateChunk,
        breakdown: Option<Breakdown>,
    ) -> Result<Vec<Map<String, Value>>, Error>;

    /// Multi-ID lookup of at most 50 IDs. `fields` is a comma separated field list.
    async fn fetch_by_ids(&self, ids: &[String], fields: &str) -> Result<Vec<EntityRecord>, Error>;

    /// Single entity lookup, the fallback for failed batches.
    async fn fetch_entity(&self, id: &str, fields: &str) -> Result<EntityRecord, Error>;

    /// Lists every entity of `kind` in the configured account.
    async fn list_account_entities(
        &self,
        kind: EntityKind,
        fields: &str,
    ) -> Result<Vec<EntityRecord>, Error>;
}

#[derive(Clone)]
pub struct GraphApiClient {
    client: Client,
    base_url: String,
    api_version: String,
    account_id: String,
    token: String,
    appsecret_proof: Option<String>,
}

impl GraphApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        if config.access_token.is_empty() {
            return Err(Error::MissingConfig {
                name: "access_token".to_string(),
            });
        }
        if config.account_id.trim_start_matches("act_").is_empty() {
            return Err(Error::MissingConfig {
                name: "account_id".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(GraphApiClient {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            account_id: config.account_id.trim_start_matches("act_").to_string(),
            token: config.access_token.clone(),
            appsecret_proof: appsecret_proof(&config.access_token, &config.app_secret),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .push(&self.api_version)
            .extend(segments);
        self.authorize(&mut url);
        Ok(url)
    }

    fn authorize(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("access_token", &self.token);
        if let Some(proof) = &self.appsecret_proof {
            pairs.append_pair("appsecret_proof", proof);
        }
    }

    fn account_node(&self) -> String {
        format!("act_{}", self.account_id)
    }

    async fn get_json(&self, url: Url) -> Result<Value, Error> {
        debug!("GET {}", url.path());
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;

        if let Some(err) = parse_error_body(status.as_u16(), &body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                code: 0,
                subcode: None,
                message: body.to_string(),
            });
        }

        Ok(body)
    }

    /// Collects `data` across all pages.
    async fn get_paged(&self, url: Url) -> Result<Vec<Value>, Error> {
        let mut rows = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            let mut page = self.get_json(url).await?;
            if let Some(Value::Array(data)) = page.get_mut("data").map(Value::take) {
                rows.extend(data);
            }
            next = page
                .pointer("/paging/next")
                .and_then(Value::as_str)
                .map(Url::parse)
                .transpose()?;
        }

        Ok(rows)
    }
}

#[async_trait::async_trait]
impl AdsApi for GraphApiClient {
    async fn fetch_insights(
        &self,
        chunk: DateChunk,
        breakdown: Option<Breakdown>,
    ) -> Result<Vec<Map<String, Value>>, Error> {
        let node = self.account_node();
        let mut url = self.endpoint(&[&node, "insights"])?;
        let time_range = json!({
            "since": chunk.since.format("%Y-%m-%d").to_string(),
            "until": chunk.until.format("%Y-%m-%d").to_string(),
        });
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("level", "ad")
                .append_pair("time_increment", "1")
                .append_pair("limit", PAGE_LIMIT)
                .append_pair("fields", &INSIGHT_FIELDS.join(","))
                .append_pair("time_range", &time_range.to_string());
            if let Some(breakdown) = breakdown {
                pairs.append_pair("breakdowns", &breakdown.api_fields().join(","));
            }
        }

        let rows = self.get_paged(url).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn fetch_by_ids(&self, ids: &[String], fields: &str) -> Result<Vec<EntityRecord>, Error> {
        let mut url = self.endpoint(&[""])?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("fields", fields);

        let body = self.get_json(url).await?;
        let Value::Object(by_id) = body else {
            return Err(Error::NoData {
                message: "Multi-ID lookup returned a non-object body".to_string(),
            });
        };

        Ok(by_id
            .into_iter()
            .filter_map(|(_, value)| EntityRecord::from_json(value))
            .collect())
    }

    async fn fetch_entity(&self, id: &str, fields: &str) -> Result<EntityRecord, Error> {
        let mut url = self.endpoint(&[id])?;
        url.query_pairs_mut().append_pair("fields", fields);

        let body = self.get_json(url).await?;
        EntityRecord::from_json(body).ok_or_else(|| Error::NoData {
            message: format!("Entity {} returned no id", id),
        })
    }

    async fn list_account_entities(
        &self,
        kind: EntityKind,
        fields: &str,
    ) -> Result<Vec<EntityRecord>, Error> {
        let node = self.account_node();
        let Some(edge) = kind.listing_edge() else {
            let mut url = self.endpoint(&[&node])?;
            url.query_pairs_mut().append_pair("fields", fields);
            return Ok(EntityRecord::from_json(self.get_json(url).await?)
                .into_iter()
                .collect());
        };

        let mut url = self.endpoint(&[&node, edge])?;
        let filtering = json!([{
            "field": "effective_status",
            "operator": "IN",
            "value": LISTING_STATUSES,
        }]);
        url.query_pairs_mut()
            .append_pair("fields", fields)
            .append_pair("limit", PAGE_LIMIT)
            .append_pair("filtering", &filtering.to_string());

        let rows = self.get_paged(url).await?;
        Ok(rows.into_iter().filter_map(EntityRecord::from_json).collect())
    }
}

/// Hex HMAC-SHA256 of the access token keyed by the app secret.
fn appsecret_proof(token: &str, app_secret: &str) -> Option<String> {
    if app_secret.is_empty() {
        return None;
    }
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Maps an upstream `{"error": {...}}` body to [`Error::Api`].
fn parse_error_body(status: u16, body: &Value) -> Option<Error> {
    let err = body.get("error")?;
    Some(Error::Api {
        status,
        code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
        subcode: err.get("error_subcode").and_then(Value::as_i64),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_fetch_insights_invalid_url() {
        let mut config = test_config();
        config.api_url = String::from("invalid_url");
        let client = GraphApiClient::new(&config).unwrap();
        let chunk = DateChunk {
            since: NaiveDate::from_str("2024-01-01").unwrap(),
            until: NaiveDate::from_str("2024-01-07").unwrap(),
        };

        let result = client.fetch_insights(chunk, None).await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let mut config = test_config();
        config.access_token = String::new();
        assert!(matches!(
            GraphApiClient::new(&config),
            Err(Error::MissingConfig { name }) if name == "access_token"
        ));
    }

    #[test]
    fn test_endpoint_carries_credentials() {
        let client = GraphApiClient::new(&test_config()).unwrap();
        let url = client.endpoint(&["act_1234", "insights"]).unwrap();
        assert_eq!(url.path(), "/v19.0/act_1234/insights");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("access_token".to_string(), "token".to_string())));
        assert!(query.iter().any(|(k, _)| k == "appsecret_proof"));
    }

    #[test]
    fn test_appsecret_proof_matches_hmac_sha256() {
        let proof = appsecret_proof("The quick brown fox jumps over the lazy dog", "key");
        assert_eq!(
            proof.as_deref(),
            Some("f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8")
        );
        assert_eq!(appsecret_proof("token", ""), None);
    }

    #[test]
    fn test_parse_error_body() {
        let body = json!({
            "error": {"message": "Invalid OAuth access token", "code": 190, "error_subcode": 463}
        });
        let err = parse_error_body(400, &body).unwrap();
        assert!(err.is_auth_failure());
        assert!(matches!(err, Error::Api { subcode: Some(463), .. }));
        assert!(parse_error_body(200, &json!({"data": []})).is_none());
    }

    #[test]
    fn test_entity_record_from_json() {
        let record = EntityRecord::from_json(json!({"id": "42", "name": "Spring"})).unwrap();
        assert_eq!(record.id, "42");
        let numeric = EntityRecord::from_json(json!({"id": 7, "name": "x"})).unwrap();
        assert_eq!(numeric.id, "7");
        assert!(EntityRecord::from_json(json!({"name": "no id"})).is_none());
        assert!(EntityRecord::from_json(json!([1, 2])).is_none());
    }

    #[test]
    fn test_safe_default_record() {
        let record = EntityRecord::safe_default("99");
        assert!(record.is_fetch_error());
        assert_eq!(record.attributes["status"], json!(UNKNOWN_STATUS));
    }
}
