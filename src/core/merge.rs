use crate::domain::model::TableRow;
use crate::domain::period::{FetchRange, Period};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergePolicy {
    /// Incremental runs: only periods the table does not hold yet for a
    /// reporter are added; stored periods are never rewritten.
    AppendNewPeriods,
    /// Force runs: every stored row of `reporter` inside `range` is dropped
    /// and the fetched rows take their place.
    ReplaceRange { reporter: String, range: FetchRange },
}

#[derive(Debug, Clone)]
pub struct MergeOutcome<R> {
    pub rows: Vec<R>,
    pub inserted: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl<R> MergeOutcome<R> {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.removed > 0
    }
}

/// Combines stored and fetched rows. Afterwards no `(period, reporter,
/// sector-or-partner)` key appears twice; among fetched rows sharing a key
/// the last one wins. Output is sorted by reporter, dimension, period.
pub fn merge<R: TableRow>(existing: Vec<R>, new_rows: Vec<R>, policy: &MergePolicy) -> MergeOutcome<R> {
    let new_rows = dedup_last_wins(new_rows);
    let mut skipped = 0;
    let mut removed = 0;

    let (mut rows, incoming) = match policy {
        MergePolicy::AppendNewPeriods => {
            let stored: HashSet<(String, Period)> = existing
                .iter()
                .map(|r| (r.reporter().to_string(), r.period()))
                .collect();
            let incoming: Vec<R> = new_rows
                .into_iter()
                .filter(|r| {
                    let fresh = !stored.contains(&(r.reporter().to_string(), r.period()));
                    if !fresh {
                        skipped += 1;
                    }
                    fresh
                })
                .collect();
            (existing, incoming)
        }
        MergePolicy::ReplaceRange { reporter, range } => {
            if new_rows.is_empty() {
                (existing, new_rows)
            } else {
                let before = existing.len();
                let kept: Vec<R> = existing
                    .into_iter()
                    .filter(|r| !(r.reporter() == reporter && range.contains(r.period())))
                    .collect();
                removed = before - kept.len();
                (kept, new_rows)
            }
        }
    };

    let inserted = incoming.len();
    rows.extend(incoming);
    let mut rows = dedup_last_wins(rows);
    rows.sort_by(|a, b| {
        (a.reporter(), a.dimension(), a.period()).cmp(&(b.reporter(), b.dimension(), b.period()))
    });

    MergeOutcome {
        rows,
        inserted,
        removed,
        skipped,
    }
}

fn dedup_last_wins<R: TableRow>(rows: Vec<R>) -> Vec<R> {
    let mut positions: HashMap<(Period, String, String), usize> = HashMap::with_capacity(rows.len());
    let mut kept: Vec<R> = Vec::with_capacity(rows.len());
    for row in rows {
        match positions.get(&row.key()) {
            Some(&index) => kept[index] = row,
            None => {
                positions.insert(row.key(), kept.len());
                kept.push(row);
            }
        }
    }
    kept
}
