use crate::domain::period::Period;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Canonical one-digit SITC sector, the TOTAL aggregate, or the bucket for
/// codes the classification tables do not cover. `Unclassified` is never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectorCode {
    Sitc(u8),
    Total,
    Unclassified,
}

impl SectorCode {
    /// The eleven persistable values, in table order.
    pub fn canonical() -> impl Iterator<Item = SectorCode> {
        (0..=9).map(SectorCode::Sitc).chain(std::iter::once(SectorCode::Total))
    }

    pub fn is_canonical(&self) -> bool {
        match self {
            SectorCode::Sitc(d) => *d <= 9,
            SectorCode::Total => true,
            SectorCode::Unclassified => false,
        }
    }

    pub fn as_code(&self) -> String {
        match self {
            SectorCode::Sitc(d) => d.to_string(),
            SectorCode::Total => "TOTAL".to_string(),
            SectorCode::Unclassified => "UNCLASSIFIED".to_string(),
        }
    }

    pub fn parse_canonical(code: &str) -> Option<Self> {
        let code = code.trim();
        SectorCode::canonical().find(|s| s.as_code() == code)
    }
}

impl fmt::Display for SectorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_code())
    }
}

impl Serialize for SectorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_code())
    }
}

impl<'de> Deserialize<'de> for SectorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SectorCode::parse_canonical(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown sector code '{}'", raw)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flow {
    Export,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Eur => f.write_str("EUR"),
            Currency::Usd => f.write_str("USD"),
        }
    }
}

/// One provider observation in adapter-local form, before classification
/// and aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub period: Period,
    pub reporter: String,
    /// `None` for world aggregates.
    pub partner: Option<String>,
    pub native_code: String,
    pub flow: Flow,
    pub value: f64,
    pub currency: Currency,
    /// Extra provider dimensions (transport mode, second partner, customs
    /// procedure) joined into one key. Empty when the provider has none.
    pub breakdown: String,
}

impl RawRecord {
    pub fn world(
        period: Period,
        reporter: &str,
        native_code: &str,
        flow: Flow,
        value: f64,
        currency: Currency,
    ) -> Self {
        Self {
            period,
            reporter: reporter.to_string(),
            partner: None,
            native_code: native_code.to_string(),
            flow,
            value,
            currency,
            breakdown: String::new(),
        }
    }

    pub fn bilateral(
        period: Period,
        reporter: &str,
        partner: &str,
        native_code: &str,
        flow: Flow,
        value: f64,
        currency: Currency,
    ) -> Self {
        Self {
            partner: Some(partner.to_string()),
            ..Self::world(period, reporter, native_code, flow, value, currency)
        }
    }

    pub fn with_breakdown(mut self, breakdown: impl Into<String>) -> Self {
        self.breakdown = breakdown.into();
        self
    }
}

/// Row of the per-reporter aggregate-by-sector table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub period: Period,
    pub reporter: String,
    pub sector_code: SectorCode,
    pub export_value: f64,
    pub import_value: f64,
    pub balance: f64,
    pub currency: Currency,
}

impl AggregateRow {
    pub fn new(
        period: Period,
        reporter: &str,
        sector_code: SectorCode,
        export_value: f64,
        import_value: f64,
        currency: Currency,
    ) -> Self {
        Self {
            period,
            reporter: reporter.to_string(),
            sector_code,
            export_value,
            import_value,
            balance: export_value - import_value,
            currency,
        }
    }
}

/// Row of the per-reporter bilateral-by-partner table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BilateralRow {
    pub period: Period,
    pub reporter: String,
    pub partner: String,
    pub export_value: f64,
    pub import_value: f64,
    pub currency: Currency,
}

/// Rows that share a table key: `(period, reporter, sector-or-partner)`.
pub trait TableRow: Clone {
    fn period(&self) -> Period;
    fn reporter(&self) -> &str;
    fn dimension(&self) -> String;

    fn key(&self) -> (Period, String, String) {
        (self.period(), self.reporter().to_string(), self.dimension())
    }
}

impl TableRow for AggregateRow {
    fn period(&self) -> Period {
        self.period
    }

    fn reporter(&self) -> &str {
        &self.reporter
    }

    fn dimension(&self) -> String {
        self.sector_code.as_code()
    }
}

impl TableRow for BilateralRow {
    fn period(&self) -> Period {
        self.period
    }

    fn reporter(&self) -> &str {
        &self.reporter
    }

    fn dimension(&self) -> String {
        self.partner.clone()
    }
}
