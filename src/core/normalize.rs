use crate::core::classification::ClassificationMapper;
use crate::core::dedup::{aggregate_partners, aggregate_sectors, collapse_resubmissions, SectorObservation};
use crate::domain::model::{AggregateRow, BilateralRow, RawRecord, SectorCode};
use crate::domain::source::SourceId;

/// Canonical rows produced from one fetch batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub aggregate: Vec<AggregateRow>,
    pub bilateral: Vec<BilateralRow>,
    /// Records whose native code fell outside the classification tables.
    pub unclassified: usize,
    /// Records replaced by a later report of the same native key.
    pub resubmissions: usize,
}

/// Classifies and aggregates a batch. Runs before anything is merged or
/// persisted.
pub fn normalize(source: SourceId, mapper: &ClassificationMapper, records: Vec<RawRecord>) -> NormalizedBatch {
    let (records, resubmissions) = collapse_resubmissions(records);
    let mut unclassified = 0;
    let mut observations = Vec::new();
    let mut bilateral = Vec::new();

    for record in records {
        let sector = mapper.map_code(source, &record.native_code);
        if sector == SectorCode::Unclassified {
            unclassified += 1;
            tracing::debug!(
                source = source.name(),
                code = %record.native_code,
                period = %record.period,
                "unclassified native code"
            );
        }

        if record.partner.is_some() {
            // partner rows are whole-trade totals
            if sector == SectorCode::Total {
                bilateral.push(record);
            } else if sector != SectorCode::Unclassified {
                unclassified += 1;
            }
            continue;
        }

        observations.push(SectorObservation {
            period: record.period,
            reporter: record.reporter,
            sector,
            flow: record.flow,
            value: record.value,
            currency: record.currency,
        });
    }

    if unclassified > 0 {
        tracing::warn!(source = source.name(), unclassified, "records outside the classification tables");
    }

    NormalizedBatch {
        aggregate: aggregate_sectors(observations, mapper.derives_total(source)),
        bilateral: aggregate_partners(&bilateral),
        unclassified,
        resubmissions,
    }
}
