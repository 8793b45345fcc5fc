use crate::constants::{MAN_WON, SOURCE_DATE_FORMAT, SQM_PER_PYEONG};
use crate::pipeline::quality::{quality_score, DerivedFields};
use crate::types::{CanonicalRecord, RawRecord, SkipReason};
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Result of normalizing one batch
#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub records: Vec<CanonicalRecord>,
    /// Input position and reason for every excluded record
    pub skipped: Vec<(usize, SkipReason)>,
}

impl NormalizeReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Maps raw source rows onto canonical records.
///
/// `current_year` is fixed at construction so that normalizing the same raw
/// record twice yields the same key and score.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    current_year: i32,
}

impl Normalizer {
    pub fn new(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn normalize(&self, raw: &RawRecord) -> std::result::Result<CanonicalRecord, SkipReason> {
        if raw.district_code.trim().is_empty()
            && raw.apartment_name.trim().is_empty()
            && raw.transaction_date.trim().is_empty()
        {
            return Err(SkipReason::Unidentifiable);
        }

        let amount_man_won = parse_amount(&raw.amount);
        if amount_man_won < 0 {
            return Err(SkipReason::NegativeAmount(raw.amount.clone()));
        }
        let area_sqm = parse_area(&raw.area);
        if area_sqm < 0.0 {
            return Err(SkipReason::NegativeArea(raw.area.clone()));
        }

        let amount_minor_unit = amount_man_won.saturating_mul(MAN_WON);
        let area_sqm = round2(area_sqm);
        let area_alt_unit = round2(area_sqm / SQM_PER_PYEONG);
        let price_per_area = if area_sqm > 0.0 {
            (amount_minor_unit as f64 / area_sqm) as i64
        } else {
            0
        };

        let transaction_date = parse_date(&raw.transaction_date);
        let derived = DerivedFields {
            amount_minor_unit,
            area_sqm,
            construction_year: parse_int(&raw.construction_year),
            transaction_date,
        };

        Ok(CanonicalRecord {
            dedup_key: dedup_key(
                &raw.district_code,
                &raw.apartment_name,
                &raw.transaction_date,
                amount_minor_unit,
                area_sqm,
            ),
            district_code: raw.district_code.trim().to_string(),
            district_name: raw.district_name.trim().to_string(),
            dong_name: raw.dong_name.trim().to_string(),
            apartment_name: raw.apartment_name.trim().to_string(),
            amount_minor_unit,
            area_sqm,
            area_alt_unit,
            price_per_area,
            construction_year: derived.construction_year,
            floor: parse_int(&raw.floor),
            transaction_date,
            registration_date: raw.registration_date.trim().to_string(),
            quality_score: quality_score(raw, &derived, self.current_year),
            created_at: Utc::now(),
        })
    }

    /// Normalize every record, excluding the invalid ones with a warning each.
    pub fn normalize_batch(&self, raws: Vec<RawRecord>) -> NormalizeReport {
        let mut report = NormalizeReport {
            records: Vec::with_capacity(raws.len()),
            skipped: Vec::new(),
        };

        for (index, raw) in raws.iter().enumerate() {
            match self.normalize(raw) {
                Ok(record) => report.records.push(record),
                Err(reason) => {
                    warn!(index, apartment = %raw.apartment_name, "Skipping record: {}", reason);
                    report.skipped.push((index, reason));
                }
            }
        }

        info!(
            "Normalized {} records ({} skipped)",
            report.records.len(),
            report.skipped.len()
        );
        report
    }
}

/// Stable identity of a transaction: sha256 hex over its identifying fields.
pub fn dedup_key(
    district_code: &str,
    apartment_name: &str,
    raw_transaction_date: &str,
    amount_minor_unit: i64,
    area_sqm: f64,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{:.2}",
        district_code.trim(),
        apartment_name.trim(),
        raw_transaction_date.trim(),
        amount_minor_unit,
        area_sqm
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

/// Amount in 만원 with thousands separators stripped. Non-numeric input is 0.
pub fn parse_amount(raw: &str) -> i64 {
    let cleaned = strip_number(raw);
    if cleaned.is_empty() {
        return 0;
    }
    cleaned.parse::<i64>().unwrap_or_else(|_| {
        match cleaned.parse::<f64>() {
            Ok(v) if v.is_finite() => v.trunc() as i64,
            _ => {
                debug!("Non-numeric amount '{}', treating as 0", raw);
                0
            }
        }
    })
}

/// Area in square metres. Non-numeric input is 0, and so is negative zero.
pub fn parse_area(raw: &str) -> f64 {
    let cleaned = strip_number(raw);
    if cleaned.is_empty() {
        return 0.0;
    }
    match cleaned.parse::<f64>() {
        // `-0` would otherwise format as "-0.00" in the dedup key.
        Ok(v) if v == 0.0 => 0.0,
        Ok(v) if v.is_finite() => v,
        _ => {
            debug!("Non-numeric area '{}', treating as 0", raw);
            0.0
        }
    }
}

fn strip_number(raw: &str) -> String {
    raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect()
}

fn parse_int(raw: &str) -> Option<i32> {
    raw.trim().parse().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = NaiveDate::parse_from_str(raw, SOURCE_DATE_FORMAT).ok();
    if parsed.is_none() {
        debug!("Unparseable transaction date '{}'", raw);
    }
    parsed
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawRecord {
        RawRecord {
            apartment_name: "래미안대치팰리스".into(),
            district_code: "11680".into(),
            district_name: "강남구".into(),
            dong_name: "대치동".into(),
            amount: " 82,500".into(),
            area: "84.97".into(),
            construction_year: "2015".into(),
            floor: "12".into(),
            transaction_date: "2024-06-07".into(),
            registration_date: "24.06.20".into(),
        }
    }

    #[test]
    fn test_normalize_converts_units() {
        let record = Normalizer::new(2024).normalize(&sample()).unwrap();
        assert_eq!(record.amount_minor_unit, 825_000_000);
        assert_eq!(record.area_sqm, 84.97);
        assert_eq!(record.area_alt_unit, 25.7);
        assert_eq!(record.price_per_area, (825_000_000f64 / 84.97) as i64);
        assert_eq!(record.construction_year, Some(2015));
        assert_eq!(record.floor, Some(12));
        assert_eq!(record.transaction_date, NaiveDate::from_ymd_opt(2024, 6, 7));
        assert_eq!(record.quality_score, 100);
        assert_eq!(record.dedup_key.len(), 64);
    }

    #[test]
    fn test_normalize_is_deterministic_apart_from_created_at() {
        let normalizer = Normalizer::new(2024);
        let a = normalizer.normalize(&sample()).unwrap();
        let mut b = normalizer.normalize(&sample()).unwrap();
        b.created_at = a.created_at;
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_area_gives_zero_price_per_area() {
        let mut raw = sample();
        raw.area = "".into();
        let record = Normalizer::new(2024).normalize(&raw).unwrap();
        assert_eq!(record.area_sqm, 0.0);
        assert_eq!(record.price_per_area, 0);
        assert_eq!(record.quality_score, 80);
    }

    #[test]
    fn test_non_numeric_amount_becomes_zero() {
        let mut raw = sample();
        raw.amount = "n/a".into();
        let record = Normalizer::new(2024).normalize(&raw).unwrap();
        assert_eq!(record.amount_minor_unit, 0);
        assert_eq!(record.quality_score, 75);
    }

    #[test]
    fn test_negative_values_are_skipped() {
        let normalizer = Normalizer::new(2024);
        let mut raw = sample();
        raw.amount = "-1,000".into();
        assert_eq!(
            normalizer.normalize(&raw),
            Err(SkipReason::NegativeAmount("-1,000".into()))
        );

        let mut raw = sample();
        raw.area = "-3.5".into();
        assert_eq!(
            normalizer.normalize(&raw),
            Err(SkipReason::NegativeArea("-3.5".into()))
        );
    }

    #[test]
    fn test_unidentifiable_record_is_skipped() {
        let raw = RawRecord {
            amount: "1000".into(),
            area: "50".into(),
            ..Default::default()
        };
        assert_eq!(
            Normalizer::new(2024).normalize(&raw),
            Err(SkipReason::Unidentifiable)
        );
    }

    #[test]
    fn test_unparseable_date_keeps_raw_in_key() {
        let normalizer = Normalizer::new(2024);
        let mut raw = sample();
        raw.transaction_date = "2024-13-45".into();
        let a = normalizer.normalize(&raw).unwrap();
        assert_eq!(a.transaction_date, None);
        assert_eq!(a.quality_score, 85);

        raw.transaction_date = "2024-13-46".into();
        let b = normalizer.normalize(&raw).unwrap();
        assert_ne!(a.dedup_key, b.dedup_key);
    }

    #[test]
    fn test_dedup_key_ignores_surrounding_whitespace_and_area_precision() {
        assert_eq!(
            dedup_key("11680", " 래미안 ", "2024-06-07", 1_000, 84.5),
            dedup_key("11680", "래미안", "2024-06-07 ", 1_000, 84.50)
        );
        assert_ne!(
            dedup_key("11680", "래미안", "2024-06-07", 1_000, 84.5),
            dedup_key("11680", "래미안", "2024-06-07", 1_000, 84.51)
        );
    }

    #[test]
    fn test_missing_field_costs_at_least_ten_points() {
        let normalizer = Normalizer::new(2024);
        let full = normalizer.normalize(&sample()).unwrap().quality_score;
        let mut raw = sample();
        raw.district_name.clear();
        let partial = normalizer.normalize(&raw).unwrap().quality_score;
        assert!(full - partial >= 10);
    }

    #[test]
    fn test_non_numeric_amount_and_missing_area_cost_45_points() {
        let normalizer = Normalizer::new(2024);
        let full = normalizer.normalize(&sample()).unwrap();
        let mut raw = sample();
        raw.amount = "미상".into();
        raw.area.clear();
        let degraded = normalizer.normalize(&raw).unwrap();
        assert_eq!(degraded.amount_minor_unit, 0);
        assert_eq!(degraded.area_sqm, 0.0);
        assert!(full.quality_score - degraded.quality_score >= 45);
    }

    #[test]
    fn test_normalize_batch_counts_skips() {
        let mut bad = sample();
        bad.area = "-1".into();
        let report = Normalizer::new(2024).normalize_batch(vec![sample(), bad, RawRecord::default()]);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped_count(), 2);
        assert_eq!(report.skipped[0].0, 1);
        assert_eq!(report.skipped[1], (2, SkipReason::Unidentifiable));
    }

    #[test]
    fn test_negative_zero_area_shares_the_zero_key() {
        let normalizer = Normalizer::new(2024);
        let mut zero = sample();
        zero.area = "0".into();
        let mut negative_zero = sample();
        negative_zero.area = "-0".into();

        let a = normalizer.normalize(&zero).unwrap();
        let b = normalizer.normalize(&negative_zero).unwrap();
        assert_eq!(a.dedup_key, b.dedup_key);
        assert!(b.area_sqm.is_sign_positive());
        assert!(parse_area("-0.00").is_sign_positive());
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("1,234,567"), 1_234_567);
        assert_eq!(parse_amount("  95000 "), 95_000);
        assert_eq!(parse_amount(""), 0);
        assert_eq!(parse_amount("abc"), 0);
        assert_eq!(parse_amount("-5"), -5);
    }
}
