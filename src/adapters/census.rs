//! US Census international trade time series (`exports/sitc`,
//! `imports/sitc`). One request per month, flow and table; responses are
//! arrays of rows with the column names in the first row.

use crate::adapters::parse_number;
use crate::config::credentials::Credential;
use crate::config::toml_config::ResolvedSource;
use crate::core::context::RunContext;
use crate::core::http::{ApiRequest, RateLimitedClient};
use crate::domain::model::{Currency, Flow, RawRecord};
use crate::domain::period::Period;
use crate::domain::ports::{FetchedRange, SourceAdapter};
use crate::domain::source::{SourceId, SourceProfile};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::Value;

const SOURCE: SourceId = SourceId::Census;
const TOTAL_CODE: &str = "-";
const SECTOR_LEVEL: &str = "SITC1";

/// Census country codes of the bilateral partner set.
pub const PARTNER_CODES: [(&str, &str); 30] = [
    ("4280", "DE"),
    ("4790", "ES"),
    ("4279", "FR"),
    ("4759", "IT"),
    ("4120", "GB"),
    ("5880", "JP"),
    ("5700", "CN"),
    ("1220", "CA"),
    ("2010", "MX"),
    ("5800", "KR"),
    ("5330", "IN"),
    ("3510", "BR"),
    ("6021", "AU"),
    ("4210", "NL"),
    ("2940", "CH"),
    ("4231", "BE"),
    ("4330", "AT"),
    ("4010", "SE"),
    ("4090", "NO"),
    ("4550", "PL"),
    ("4351", "CZ"),
    ("4710", "PT"),
    ("4190", "IE"),
    ("4621", "RU"),
    ("5170", "SA"),
    ("5590", "SG"),
    ("5830", "TW"),
    ("5520", "VN"),
    ("4623", "UA"),
    ("3370", "CL"),
];

pub fn partner_iso(census_code: &str) -> Option<&'static str> {
    PARTNER_CODES
        .iter()
        .find(|(code, _)| *code == census_code)
        .map(|(_, iso)| *iso)
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Exports,
    Imports,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Exports => "exports/sitc",
            Endpoint::Imports => "imports/sitc",
        }
    }

    fn value_column(self) -> &'static str {
        match self {
            Endpoint::Exports => "ALL_VAL_MO",
            Endpoint::Imports => "GEN_VAL_MO",
        }
    }

    fn flow(self) -> Flow {
        match self {
            Endpoint::Exports => Flow::Export,
            Endpoint::Imports => Flow::Import,
        }
    }
}

pub struct CensusAdapter {
    profile: SourceProfile,
    base_url: String,
    client: RateLimitedClient,
    credential: Credential,
}

impl CensusAdapter {
    pub fn new(settings: &ResolvedSource, client: RateLimitedClient, credential: Credential) -> Self {
        Self {
            profile: settings.profile(),
            base_url: settings.base_url.clone(),
            client,
            credential,
        }
    }

    async fn fetch_sectors(
        &self,
        ctx: &mut RunContext,
        key: &str,
        reporter: &str,
        period: Period,
        endpoint: Endpoint,
    ) -> Result<Vec<RawRecord>> {
        let request = ApiRequest::get(format!("{}/{}", self.base_url, endpoint.path()))
            .query("get", format!("{},SITC,COMM_LVL", endpoint.value_column()))
            .query("time", period.to_dashed())
            .query("key", key);

        let Some(body) = self.client.get_json(ctx.budget_mut(SOURCE), &request).await? else {
            return Ok(Vec::new());
        };
        let table = Table::parse(&body)?;
        let value_col = table.column(endpoint.value_column())?;
        let code_col = table.column("SITC")?;
        let level_col = table.column("COMM_LVL")?;

        let mut records = Vec::new();
        for row in &table.rows {
            let code = row[code_col].as_str();
            if code != TOTAL_CODE && row[level_col] != SECTOR_LEVEL {
                continue;
            }
            let Some(value) = parse_number(&row[value_col]) else {
                continue;
            };
            records.push(RawRecord::world(period, reporter, code, endpoint.flow(), value, Currency::Usd));
        }
        Ok(records)
    }

    /// Sector and partner tables of both flows for one month.
    async fn fetch_month(&self, ctx: &mut RunContext, key: &str, reporter: &str, period: Period) -> Result<Vec<RawRecord>> {
        tracing::debug!(source = SOURCE.name(), period = %period, "fetching month");
        let mut records = Vec::new();
        for endpoint in [Endpoint::Exports, Endpoint::Imports] {
            records.extend(self.fetch_sectors(ctx, key, reporter, period, endpoint).await?);
            records.extend(self.fetch_partners(ctx, key, reporter, period, endpoint).await?);
        }
        Ok(records)
    }

    async fn fetch_partners(
        &self,
        ctx: &mut RunContext,
        key: &str,
        reporter: &str,
        period: Period,
        endpoint: Endpoint,
    ) -> Result<Vec<RawRecord>> {
        let request = ApiRequest::get(format!("{}/{}", self.base_url, endpoint.path()))
            .query("get", format!("{},CTY_CODE", endpoint.value_column()))
            .query("time", period.to_dashed())
            .query("SITC", TOTAL_CODE)
            .query("key", key);

        let Some(body) = self.client.get_json(ctx.budget_mut(SOURCE), &request).await? else {
            return Ok(Vec::new());
        };
        let table = Table::parse(&body)?;
        let value_col = table.column(endpoint.value_column())?;
        let country_col = table.column("CTY_CODE")?;

        let mut records = Vec::new();
        for row in &table.rows {
            let Some(partner) = partner_iso(&row[country_col]) else {
                continue;
            };
            let Some(value) = parse_number(&row[value_col]) else {
                continue;
            };
            records.push(RawRecord::bilateral(
                period,
                reporter,
                partner,
                TOTAL_CODE,
                endpoint.flow(),
                value,
                Currency::Usd,
            ));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for CensusAdapter {
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
            if reporter != "US" {
                tracing::warn!(source = SOURCE.name(), reporter = %reporter, "census only reports US trade, skipping");
                continue;
            }

            for period in start.months_through(end) {
                match self.fetch_month(ctx, key, reporter, period).await {
                    Ok(records) => fetched.push_chunk(reporter, period, records),
                    Err(e) => return fetched.stop(e),
                }
            }
        }

        tracing::info!(source = SOURCE.name(), start = %start, end = %end, records = fetched.records.len(), "fetched");
        Ok(fetched)
    }
}

/// Header row plus string cells.
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(body: &Value) -> Result<Self> {
        let mut lines = body
            .as_array()
            .ok_or_else(|| EtlError::schema(SOURCE.name(), "expected an array of rows"))?
            .iter()
            .map(|line| {
                line.as_array()
                    .map(|cells| cells.iter().map(cell_text).collect::<Vec<_>>())
                    .ok_or_else(|| EtlError::schema(SOURCE.name(), "row is not an array"))
            });

        let header = match lines.next() {
            Some(header) => header?,
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        for line in lines {
            let line = line?;
            if line.len() != header.len() {
                return Err(EtlError::schema(
                    SOURCE.name(),
                    format!("row has {} cells, header has {}", line.len(), header.len()),
                ));
            }
            rows.push(line);
        }

        Ok(Self { header, rows })
    }

    fn column(&self, name: &str) -> Result<usize> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EtlError::schema(SOURCE.name(), format!("missing column '{}'", name)))
    }
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
