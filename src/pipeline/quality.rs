use crate::constants::{
    MIN_CONSTRUCTION_YEAR, SCORE_AMOUNT, SCORE_AREA, SCORE_CONSTRUCTION_YEAR, SCORE_DISTRICT_NAME,
    SCORE_NAME, SCORE_TRANSACTION_DATE,
};
use crate::types::RawRecord;
use chrono::NaiveDate;

/// Values the normalizer derived from a raw record, as seen by the scorer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFields {
    pub amount_minor_unit: i64,
    pub area_sqm: f64,
    pub construction_year: Option<i32>,
    pub transaction_date: Option<NaiveDate>,
}

/// Additive 0-100 completeness/validity score for one record.
///
/// Each criterion contributes its full weight or nothing, so the score never
/// decreases when a missing field becomes present.
pub fn quality_score(raw: &RawRecord, derived: &DerivedFields, current_year: i32) -> u8 {
    let mut score = 0u8;

    if !raw.apartment_name.trim().is_empty() {
        score += SCORE_NAME;
    }
    if derived.amount_minor_unit > 0 {
        score += SCORE_AMOUNT;
    }
    if derived.area_sqm > 0.0 {
        score += SCORE_AREA;
    }
    if derived.transaction_date.is_some() {
        score += SCORE_TRANSACTION_DATE;
    }
    if !raw.district_name.trim().is_empty() {
        score += SCORE_DISTRICT_NAME;
    }
    if let Some(year) = derived.construction_year {
        if (MIN_CONSTRUCTION_YEAR..=current_year).contains(&year) {
            score += SCORE_CONSTRUCTION_YEAR;
        }
    }

    score.min(100)
}
