use crate::types::CanonicalRecord;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

/// Result of collapsing a batch onto unique keys
#[derive(Debug, Clone, Default)]
pub struct DedupReport {
    pub records: Vec<CanonicalRecord>,
    pub total_input: usize,
    pub duplicates: usize,
    /// `duplicates / total_input`, 0 for an empty batch
    pub dedup_rate: f64,
}

/// Keeps one record per dedup key, preferring the higher quality score.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn deduplicate(&self, records: Vec<CanonicalRecord>) -> DedupReport {
        let total_input = records.len();
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(total_input);
        let mut unique: Vec<CanonicalRecord> = Vec::with_capacity(total_input);
        let mut duplicates = 0usize;

        for record in records {
            match positions.get(&record.dedup_key) {
                Some(&pos) => {
                    duplicates += 1;
                    // Ties keep the first-seen record.
                    if record.quality_score > unique[pos].quality_score {
                        unique[pos] = record;
                    }
                }
                None => {
                    positions.insert(record.dedup_key.clone(), unique.len());
                    unique.push(record);
                }
            }
        }

        unique.sort_by(|a, b| by_date_desc(a, b));

        let dedup_rate = if total_input == 0 {
            0.0
        } else {
            duplicates as f64 / total_input as f64
        };
        info!(
            "Deduplicated {} records to {} ({} duplicates, rate {:.3})",
            total_input,
            unique.len(),
            duplicates,
            dedup_rate
        );

        DedupReport {
            records: unique,
            total_input,
            duplicates,
            dedup_rate,
        }
    }
}

/// Newest transaction first; records without a date go last.
fn by_date_desc(a: &CanonicalRecord, b: &CanonicalRecord) -> Ordering {
    match (a.transaction_date, b.transaction_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn record(key: &str, score: u8, name: &str, date: Option<(i32, u32, u32)>) -> CanonicalRecord {
        CanonicalRecord {
            dedup_key: key.to_string(),
            district_code: "11680".into(),
            district_name: "강남구".into(),
            dong_name: String::new(),
            apartment_name: name.to_string(),
            amount_minor_unit: 1,
            area_sqm: 1.0,
            area_alt_unit: 0.3,
            price_per_area: 1,
            construction_year: None,
            floor: None,
            transaction_date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            registration_date: String::new(),
            quality_score: score,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_higher_score_wins() {
        let report = Deduplicator::new().deduplicate(vec![
            record("k", 60, "low", Some((2024, 6, 1))),
            record("k", 90, "high", Some((2024, 6, 1))),
        ]);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].apartment_name, "high");
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.dedup_rate, 0.5);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let report = Deduplicator::new().deduplicate(vec![
            record("k", 70, "first", None),
            record("k", 70, "second", None),
            record("k", 50, "third", None),
        ]);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].apartment_name, "first");
        assert_eq!(report.duplicates, 2);
    }

    #[test]
    fn test_sorted_by_date_desc_with_missing_last() {
        let report = Deduplicator::new().deduplicate(vec![
            record("a", 50, "a", Some((2024, 5, 1))),
            record("b", 50, "b", None),
            record("c", 50, "c", Some((2024, 6, 9))),
            record("d", 50, "d", Some((2024, 5, 20))),
        ]);
        let names: Vec<_> = report.records.iter().map(|r| r.apartment_name.as_str()).collect();
        assert_eq!(names, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn test_idempotent() {
        let dedup = Deduplicator::new();
        let first = dedup.deduplicate(vec![
            record("a", 50, "a", Some((2024, 5, 1))),
            record("a", 80, "a2", Some((2024, 5, 1))),
            record("b", 50, "b", Some((2024, 6, 1))),
        ]);
        let second = dedup.deduplicate(first.records.clone());
        assert_eq!(second.records, first.records);
        assert_eq!(second.duplicates, 0);
        assert_eq!(second.dedup_rate, 0.0);
    }

    #[test]
    fn test_empty_batch() {
        let report = Deduplicator::new().deduplicate(Vec::new());
        assert!(report.records.is_empty());
        assert_eq!(report.total_input, 0);
        assert_eq!(report.dedup_rate, 0.0);
    }
}
