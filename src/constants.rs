//! Constants shared across the pipeline stages

/// Apartment trade endpoint of the public real-estate transaction API
pub const DEFAULT_SOURCE_BASE_URL: &str =
    "https://apis.data.go.kr/1613000/RTMSDataSvcAptTrade/getRTMSDataSvcAptTrade";

/// Source amounts are quoted in units of 10,000 won
pub const MAN_WON: i64 = 10_000;

/// Square metres per pyeong
pub const SQM_PER_PYEONG: f64 = 3.3058;

/// Oldest construction year considered plausible by the quality scorer
pub const MIN_CONSTRUCTION_YEAR: i32 = 1950;

/// The one date format the normalizer accepts for transaction dates
pub const SOURCE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Table that canonical records are upserted into
pub const TRANSACTIONS_TABLE: &str = "apartment_transactions";

// Quality score weights (sum to 100)
pub const SCORE_NAME: u8 = 20;
pub const SCORE_AMOUNT: u8 = 25;
pub const SCORE_AREA: u8 = 20;
pub const SCORE_TRANSACTION_DATE: u8 = 15;
pub const SCORE_DISTRICT_NAME: u8 = 10;
pub const SCORE_CONSTRUCTION_YEAR: u8 = 10;

/// Seoul district (gu) codes used as the default fetch partitions
pub const SEOUL_DISTRICTS: &[(&str, &str)] = &[
    ("11110", "종로구"),
    ("11140", "중구"),
    ("11170", "용산구"),
    ("11200", "성동구"),
    ("11215", "광진구"),
    ("11230", "동대문구"),
    ("11260", "중랑구"),
    ("11290", "성북구"),
    ("11305", "강북구"),
    ("11320", "도봉구"),
    ("11350", "노원구"),
    ("11380", "은평구"),
    ("11410", "서대문구"),
    ("11440", "마포구"),
    ("11470", "양천구"),
    ("11500", "강서구"),
    ("11530", "구로구"),
    ("11545", "금천구"),
    ("11560", "영등포구"),
    ("11590", "동작구"),
    ("11620", "관악구"),
    ("11650", "서초구"),
    ("11680", "강남구"),
    ("11710", "송파구"),
    ("11740", "강동구"),
];

/// Look up a district name by its code
pub fn district_name(code: &str) -> Option<&'static str> {
    SEOUL_DISTRICTS
        .iter()
        .find(|(c, _)| *c == code.trim())
        .map(|(_, name)| *name)
}

/// All default partition codes
pub fn default_partitions() -> Vec<String> {
    SEOUL_DISTRICTS.iter().map(|(c, _)| c.to_string()).collect()
}
