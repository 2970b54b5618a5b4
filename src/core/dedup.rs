//! Deduplication and aggregation down to the canonical table keys.
//!
//! Two different things look like duplicates in provider data:
//! - the same full native key reported twice (a corrected resubmission):
//!   the later value replaces the earlier one;
//! - several rows that differ only in a dimension the tables do not keep
//!   (transport mode, second partner, deeper commodity code): these are
//!   summed.

use crate::domain::model::{AggregateRow, BilateralRow, Currency, Flow, RawRecord, SectorCode};
use crate::domain::period::Period;
use std::collections::{BTreeMap, HashMap};

type NativeKey = (Period, String, Option<String>, String, Flow, String);

fn native_key(record: &RawRecord) -> NativeKey {
    (
        record.period,
        record.reporter.clone(),
        record.partner.clone(),
        record.native_code.clone(),
        record.flow,
        record.breakdown.clone(),
    )
}

/// Keeps one record per full native key: the position of the first report
/// with the value of the last one. Returns the records and how many reports
/// were replaced.
pub fn collapse_resubmissions(records: Vec<RawRecord>) -> (Vec<RawRecord>, usize) {
    let mut positions: HashMap<NativeKey, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<RawRecord> = Vec::with_capacity(records.len());
    let mut replaced = 0;

    for record in records {
        let key = native_key(&record);
        match positions.get(&key) {
            Some(&index) => {
                kept[index] = record;
                replaced += 1;
            }
            None => {
                positions.insert(key, kept.len());
                kept.push(record);
            }
        }
    }

    (kept, replaced)
}

/// A world-level observation after classification.
#[derive(Debug, Clone)]
pub struct SectorObservation {
    pub period: Period,
    pub reporter: String,
    pub sector: SectorCode,
    pub flow: Flow,
    pub value: f64,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy)]
struct FlowTotals {
    export: f64,
    import: f64,
    currency: Currency,
}

impl FlowTotals {
    fn new(currency: Currency) -> Self {
        Self {
            export: 0.0,
            import: 0.0,
            currency,
        }
    }

    fn add(&mut self, flow: Flow, value: f64) {
        match flow {
            Flow::Export => self.export += value,
            Flow::Import => self.import += value,
        }
    }
}

/// Sums observations to `(period, reporter, sector)` and pivots the two
/// flows into one row. With `derive_total`, a TOTAL row is built from every
/// observation, unclassified ones included, and any TOTAL the provider sent
/// is ignored. Unclassified observations never produce a row of their own.
pub fn aggregate_sectors(
    observations: impl IntoIterator<Item = SectorObservation>,
    derive_total: bool,
) -> Vec<AggregateRow> {
    let mut totals: BTreeMap<(Period, String, SectorCode), FlowTotals> = BTreeMap::new();

    for obs in observations {
        if derive_total {
            if obs.sector == SectorCode::Total {
                continue;
            }
            totals
                .entry((obs.period, obs.reporter.clone(), SectorCode::Total))
                .or_insert_with(|| FlowTotals::new(obs.currency))
                .add(obs.flow, obs.value);
        }

        if obs.sector == SectorCode::Unclassified {
            continue;
        }

        totals
            .entry((obs.period, obs.reporter, obs.sector))
            .or_insert_with(|| FlowTotals::new(obs.currency))
            .add(obs.flow, obs.value);
    }

    totals
        .into_iter()
        .map(|((period, reporter, sector), t)| {
            AggregateRow::new(period, &reporter, sector, t.export, t.import, t.currency)
        })
        .collect()
}

/// Sums bilateral records to `(period, reporter, partner)`, collapsing any
/// breakdown dimension, and pivots flows. Records without a partner are
/// ignored.
pub fn aggregate_partners<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Vec<BilateralRow> {
    let mut totals: BTreeMap<(Period, String, String), FlowTotals> = BTreeMap::new();

    for record in records {
        let Some(partner) = &record.partner else {
            continue;
        };
        totals
            .entry((record.period, record.reporter.clone(), partner.clone()))
            .or_insert_with(|| FlowTotals::new(record.currency))
            .add(record.flow, record.value);
    }

    totals
        .into_iter()
        .map(|((period, reporter, partner), t)| BilateralRow {
            period,
            reporter,
            partner,
            export_value: t.export,
            import_value: t.import,
            currency: t.currency,
        })
        .collect()
}
