//! Eurostat Comext `ds-059331` over the SDMX 3.0 dissemination API.
//!
//! Responses are JSON-stat 2.0 cubes: `id` and `size` give the dimension
//! order, `dimension.<id>.category.index` maps codes to positions and
//! `value` holds the observations (sparse object or dense array) in
//! row-major order.

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

const SOURCE: SourceId = SourceId::Eurostat;

/// Fixed partner set for the bilateral table, ISO-3166 alpha-2.
pub const PARTNERS: [&str; 31] = [
    "AT", "AU", "BE", "BR", "CA", "CH", "CL", "CN", "CZ", "DE", "ES", "FR", "GB", "IE", "IN", "IT", "JP", "KR",
    "MX", "NL", "NO", "PL", "PT", "RU", "SA", "SE", "SG", "TW", "UA", "US", "VN",
];

const PRODUCTS: &str = "0,1,2,3,4,5,6,7,8,9,TOTAL";
const WORLD: &str = "WORLD";

/// Eurostat geo codes that differ from ISO-3166.
const GEO_TO_ISO: [(&str, &str); 3] = [("EL", "GR"), ("UK", "GB"), ("CN_X_HK", "CN")];

pub fn geo_to_iso(code: &str) -> &str {
    GEO_TO_ISO
        .iter()
        .find(|(geo, _)| *geo == code)
        .map(|(_, iso)| *iso)
        .unwrap_or(code)
}

pub fn iso_to_geo(code: &str) -> &str {
    GEO_TO_ISO
        .iter()
        .find(|(_, iso)| *iso == code)
        .map(|(geo, _)| *geo)
        .unwrap_or(code)
}

pub struct EurostatAdapter {
    profile: SourceProfile,
    base_url: String,
    client: RateLimitedClient,
}

impl EurostatAdapter {
    pub fn new(settings: &ResolvedSource, client: RateLimitedClient) -> Self {
        Self {
            profile: settings.profile(),
            base_url: settings.base_url.clone(),
            client,
        }
    }

    fn request(&self, reporter: &str, partner: &str, product: &str, range: FetchRange) -> ApiRequest {
        ApiRequest::get(format!("{}/*.*.*.*.*.*", self.base_url))
            .query("c[freq]", "M")
            .query("c[reporter]", iso_to_geo(reporter))
            .query("c[partner]", partner)
            .query("c[product]", product)
            .query("c[flow]", "1,2")
            .query("c[indicators]", "VALUE_EUR")
            .query(
                "c[TIME_PERIOD]",
                format!("ge:{}+le:{}", range.start.to_dashed(), range.end.to_dashed()),
            )
            .query("format", "JSON")
            .query("lang", "en")
    }

    /// World totals by product and partner totals for one year slice.
    async fn fetch_year(&self, ctx: &mut RunContext, reporter: &str, chunk: FetchRange) -> Result<Vec<RawRecord>> {
        tracing::info!(source = SOURCE.name(), reporter = %reporter, range = %chunk, "fetching");
        let partners = PARTNERS.iter().map(|p| iso_to_geo(p)).collect::<Vec<_>>().join(",");
        let mut records = Vec::new();

        let world = self.request(reporter, WORLD, PRODUCTS, chunk);
        if let Some(body) = self.client.get_json(ctx.budget_mut(SOURCE), &world).await? {
            records.extend(decode_observations(&body)?);
        }

        let bilateral = self.request(reporter, &partners, "TOTAL", chunk);
        if let Some(body) = self.client.get_json(ctx.budget_mut(SOURCE), &bilateral).await? {
            records.extend(decode_observations(&body)?);
        }

        // the API may widen the window to whole publication slices
        records.retain(|r| chunk.contains(r.period));
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for EurostatAdapter {
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
        let mut fetched = FetchedRange::default();
        if start > end {
            return Ok(fetched);
        }

        for reporter in reporters {
            for chunk in start.year_chunks(end) {
                match self.fetch_year(ctx, reporter, chunk).await {
                    Ok(records) => fetched.push_chunk(reporter, chunk.end, records),
                    Err(e) => return fetched.stop(e),
                }
            }
        }

        Ok(fetched)
    }
}

/// A decoded JSON-stat cube.
struct Cube {
    ids: Vec<String>,
    sizes: Vec<usize>,
    /// Position-indexed category codes per dimension.
    codes: Vec<Vec<String>>,
    values: Vec<(usize, f64)>,
}

impl Cube {
    fn parse(body: &Value) -> Result<Self> {
        let ids: Vec<String> = body
            .get("id")
            .and_then(Value::as_array)
            .ok_or_else(|| EtlError::schema(SOURCE.name(), "JSON-stat response has no 'id'"))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let sizes: Vec<usize> = body
            .get("size")
            .and_then(Value::as_array)
            .ok_or_else(|| EtlError::schema(SOURCE.name(), "JSON-stat response has no 'size'"))?
            .iter()
            .map(|v| v.as_u64().map(|n| n as usize))
            .collect::<Option<_>>()
            .ok_or_else(|| EtlError::schema(SOURCE.name(), "non-integer entry in 'size'"))?;

        if ids.len() != sizes.len() {
            return Err(EtlError::schema(
                SOURCE.name(),
                format!("'id' has {} entries but 'size' has {}", ids.len(), sizes.len()),
            ));
        }

        sizes
            .iter()
            .try_fold(1usize, |cells, size| cells.checked_mul(*size))
            .ok_or_else(|| EtlError::schema(SOURCE.name(), "cube dimensions overflow"))?;

        let mut codes = Vec::with_capacity(ids.len());
        for (id, size) in ids.iter().zip(&sizes) {
            let index = body
                .pointer(&format!("/dimension/{}/category/index", id))
                .ok_or_else(|| EtlError::schema(SOURCE.name(), format!("dimension '{}' has no category index", id)))?;
            codes.push(category_codes(id, index, *size)?);
        }

        let values = match body.get("value") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| Some((k.parse::<usize>().ok()?, v.as_f64()?)))
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.as_f64().map(|x| (i, x)))
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(EtlError::schema(SOURCE.name(), "'value' is neither an object nor an array")),
        };

        Ok(Self {
            ids,
            sizes,
            codes,
            values,
        })
    }

    fn position(&self, candidates: &[&str]) -> Result<usize> {
        self.ids
            .iter()
            .position(|id| candidates.iter().any(|c| id.eq_ignore_ascii_case(c)))
            .ok_or_else(|| EtlError::schema(SOURCE.name(), format!("missing dimension '{}'", candidates[0])))
    }

    /// Category code of every dimension for a flat row-major index.
    fn coordinates(&self, mut flat: usize) -> Option<Vec<&str>> {
        let mut coords = vec![""; self.sizes.len()];
        for dim in (0..self.sizes.len()).rev() {
            let size = self.sizes[dim];
            if size == 0 {
                return None;
            }
            coords[dim] = self.codes[dim].get(flat % size)?.as_str();
            flat /= size;
        }
        (flat == 0).then_some(coords)
    }
}

/// Codes of one dimension by position. `size` may not exceed the number of
/// categories the index lists.
fn category_codes(id: &str, index: &Value, size: usize) -> Result<Vec<String>> {
    let listed = match index {
        Value::Object(map) => map.len(),
        Value::Array(items) => items.len(),
        _ => 0,
    };
    if size > listed {
        return Err(EtlError::schema(
            SOURCE.name(),
            format!("dimension '{}' has size {} but {} categories", id, size, listed),
        ));
    }

    let mut codes = vec![String::new(); size];
    match index {
        Value::Object(map) => {
            for (code, pos) in map {
                let pos = pos.as_u64().map(|p| p as usize).filter(|p| *p < size).ok_or_else(|| {
                    EtlError::schema(SOURCE.name(), format!("bad position for '{}' in dimension '{}'", code, id))
                })?;
                codes[pos] = code.clone();
            }
        }
        Value::Array(items) => {
            for (pos, code) in items.iter().enumerate().take(size) {
                codes[pos] = code.as_str().unwrap_or_default().to_string();
            }
        }
        _ => {
            return Err(EtlError::schema(
                SOURCE.name(),
                format!("category index of '{}' is neither an object nor an array", id),
            ))
        }
    }
    Ok(codes)
}

/// Turns a JSON-stat response into raw records. Partner `WORLD` becomes a
/// world aggregate; every other partner a bilateral record.
pub fn decode_observations(body: &Value) -> Result<Vec<RawRecord>> {
    let cube = Cube::parse(body)?;
    let reporter_dim = cube.position(&["reporter"])?;
    let partner_dim = cube.position(&["partner"])?;
    let product_dim = cube.position(&["product"])?;
    let flow_dim = cube.position(&["flow"])?;
    let time_dim = cube.position(&["TIME_PERIOD", "time"])?;

    let mut records = Vec::with_capacity(cube.values.len());
    for (flat, value) in &cube.values {
        let Some(coords) = cube.coordinates(*flat) else {
            tracing::debug!(source = SOURCE.name(), index = flat, "observation index outside the cube");
            continue;
        };

        let flow = match coords[flow_dim] {
            "1" => Flow::Import,
            "2" => Flow::Export,
            other => {
                tracing::debug!(source = SOURCE.name(), flow = other, "skipping unknown flow");
                continue;
            }
        };

        let period: Period = coords[time_dim]
            .parse()
            .map_err(|e: String| EtlError::schema(SOURCE.name(), e))?;
        let reporter = geo_to_iso(coords[reporter_dim]);
        let product = coords[product_dim];

        let record = match coords[partner_dim] {
            WORLD => RawRecord::world(period, reporter, product, flow, *value, Currency::Eur),
            partner => RawRecord::bilateral(period, reporter, geo_to_iso(partner), product, flow, *value, Currency::Eur),
        };
        records.push(record);
    }

    Ok(records)
}
