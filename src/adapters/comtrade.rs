//! UN Comtrade monthly HS data. Months are batched per calendar year in a
//! single call; a batch that comes back at the truncation limit is split in
//! halves and refetched. A year counts as fetched once both its sector and
//! partner queries are through.

use crate::adapters::{json_number, json_text};
use crate::config::credentials::Credential;
use crate::config::toml_config::ResolvedSource;
use crate::core::context::RunContext;
use crate::core::http::{ApiRequest, RateLimitedClient};
use crate::domain::model::{Currency, Flow, RawRecord};
use crate::domain::period::{FetchRange, Period};
use crate::domain::ports::{FetchedRange, SourceAdapter};
use crate::domain::source::{SourceId, SourceProfile};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::Value;

const SOURCE: SourceId = SourceId::Comtrade;

/// Responses this large are assumed truncated.
pub const TRUNCATION_THRESHOLD: usize = 99_000;

/// M49 codes of the supported reporters.
pub const REPORTERS: [(&str, u16); 4] = [("GB", 826), ("JP", 392), ("CA", 124), ("CN", 156)];

/// Bilateral partner set, M49 to ISO-3166 alpha-2.
pub const PARTNERS: [(u16, &str); 21] = [
    (276, "DE"),
    (251, "FR"),
    (380, "IT"),
    (724, "ES"),
    (156, "CN"),
    (842, "US"),
    (392, "JP"),
    (124, "CA"),
    (528, "NL"),
    (372, "IE"),
    (56, "BE"),
    (756, "CH"),
    (410, "KR"),
    (356, "IN"),
    (36, "AU"),
    (826, "GB"),
    (484, "MX"),
    (76, "BR"),
    (702, "SG"),
    (158, "TW"),
    (752, "SE"),
];

pub fn reporter_m49(iso: &str) -> Option<u16> {
    REPORTERS.iter().find(|(code, _)| *code == iso).map(|(_, m49)| *m49)
}

pub fn partner_iso(m49: u16) -> Option<&'static str> {
    PARTNERS.iter().find(|(code, _)| *code == m49).map(|(_, iso)| *iso)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Query {
    Sectors,
    Partners,
}

pub struct ComtradeAdapter {
    profile: SourceProfile,
    base_url: String,
    client: RateLimitedClient,
    credential: Credential,
}

impl ComtradeAdapter {
    pub fn new(settings: &ResolvedSource, client: RateLimitedClient, credential: Credential) -> Self {
        Self {
            profile: settings.profile(),
            base_url: settings.base_url.clone(),
            client,
            credential,
        }
    }

    fn request(&self, key: &str, reporter: &str, m49: u16, months: &[Period], query: Query) -> ApiRequest {
        let periods = months.iter().map(Period::to_compact).collect::<Vec<_>>().join(",");
        let request = ApiRequest::get(self.base_url.clone())
            .header("Ocp-Apim-Subscription-Key", key)
            .query("reporterCode", m49.to_string())
            .query("period", periods)
            .query("flowCode", "X,M");

        match query {
            Query::Sectors => request.query("cmdCode", "AG2").query("partnerCode", "0"),
            Query::Partners => {
                let partners = PARTNERS
                    .iter()
                    .filter(|(_, iso)| *iso != reporter)
                    .map(|(code, _)| code.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                request.query("cmdCode", "TOTAL").query("partnerCode", partners)
            }
        }
    }

    /// Fetches one batch of months, splitting it while the provider
    /// truncates. Batches are processed in month order.
    async fn fetch_batch(
        &self,
        ctx: &mut RunContext,
        key: &str,
        reporter: &str,
        m49: u16,
        months: Vec<Period>,
        query: Query,
    ) -> Result<Vec<Value>> {
        let mut pending = vec![months];
        let mut rows = Vec::new();

        while let Some(batch) = pending.pop() {
            if batch.is_empty() {
                continue;
            }
            let request = self.request(key, reporter, m49, &batch, query);
            let Some(body) = self.client.get_json(ctx.budget_mut(SOURCE), &request).await? else {
                continue;
            };
            let data = extract_data(body)?;

            if data.len() >= TRUNCATION_THRESHOLD && batch.len() > 1 {
                tracing::info!(
                    source = SOURCE.name(),
                    reporter,
                    months = batch.len(),
                    records = data.len(),
                    "response truncated, splitting batch"
                );
                let (left, right) = batch.split_at(batch.len() / 2);
                pending.push(right.to_vec());
                pending.push(left.to_vec());
                continue;
            }
            if data.len() >= TRUNCATION_THRESHOLD {
                tracing::warn!(source = SOURCE.name(), reporter, period = %batch[0], "single month at truncation limit");
            }
            rows.extend(data);
        }

        Ok(rows)
    }

    async fn fetch_year(
        &self,
        ctx: &mut RunContext,
        key: &str,
        reporter: &str,
        m49: u16,
        chunk: FetchRange,
    ) -> Result<Vec<RawRecord>> {
        tracing::info!(source = SOURCE.name(), reporter = %reporter, range = %chunk, "fetching");
        let months: Vec<Period> = chunk.months().collect();

        let mut records = Vec::new();
        for query in [Query::Sectors, Query::Partners] {
            let rows = self.fetch_batch(ctx, key, reporter, m49, months.clone(), query).await?;
            for row in &rows {
                if let Some(record) = decode_record(reporter, row, query)? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for ComtradeAdapter {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    async fn fetch_range(
        &self,
        ctx: &mut RunContext,
        reporters: &[String],
        start: Period,
        end: Period,
    ) -> Result<FetchedRange> {
        let key = self.credential.require(SOURCE)?;
        let mut fetched = FetchedRange::default();
        if start > end {
            return Ok(fetched);
        }

        for reporter in reporters {
            let m49 = reporter_m49(reporter)
                .ok_or_else(|| EtlError::fatal(SOURCE.name(), format!("no M49 code for reporter '{}'", reporter)))?;

            for chunk in start.year_chunks(end) {
                match self.fetch_year(ctx, key, reporter, m49, chunk).await {
                    Ok(records) => fetched.push_chunk(reporter, chunk.end, records),
                    Err(e) => return fetched.stop(e),
                }
            }
        }

        Ok(fetched)
    }
}

fn field<'a>(row: &'a Value, name: &str) -> Result<&'a Value> {
    row.get(name)
        .ok_or_else(|| EtlError::schema(SOURCE.name(), format!("record has no '{}'", name)))
}

fn extract_data(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => Ok(rows),
            Some(Value::Null) => Ok(Vec::new()),
            _ => Err(EtlError::schema(SOURCE.name(), "response has no 'data' array")),
        },
        _ => Err(EtlError::schema(SOURCE.name(), "response is not an object")),
    }
}

/// One Comtrade row as a raw record. Rows outside the requested shape
/// (other flows, partners outside the fixed set) yield `None`.
fn decode_record(reporter: &str, row: &Value, query: Query) -> Result<Option<RawRecord>> {
    let period_text = json_text(field(row, "period")?)
        .ok_or_else(|| EtlError::schema(SOURCE.name(), "record period is not text"))?;
    let period: Period = period_text
        .parse()
        .map_err(|e: String| EtlError::schema(SOURCE.name(), e))?;

    let flow = match json_text(field(row, "flowCode")?).as_deref() {
        Some("X") => Flow::Export,
        Some("M") => Flow::Import,
        _ => return Ok(None),
    };

    let Some(value) = json_number(field(row, "primaryValue")?) else {
        return Ok(None);
    };

    let code = json_text(field(row, "cmdCode")?).unwrap_or_default();
    let breakdown = ["motCode", "partner2Code", "customsCode"]
        .iter()
        .map(|name| row.get(*name).and_then(json_text).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("/");

    let record = match query {
        Query::Sectors => RawRecord::world(period, reporter, &code, flow, value, Currency::Usd),
        Query::Partners => {
            let partner_code = json_number(field(row, "partnerCode")?).map(|c| c as u16);
            let Some(partner) = partner_code.and_then(partner_iso) else {
                return Ok(None);
            };
            if partner == reporter {
                return Ok(None);
            }
            RawRecord::bilateral(period, reporter, partner, &code, flow, value, Currency::Usd)
        }
    };

    Ok(Some(record.with_breakdown(breakdown)))
}
