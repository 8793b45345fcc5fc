//! Decoding of source API responses into raw records.
//!
//! The transaction API answers with XML by default and with JSON when asked
//! for it. Both carry the same `response > header / body > items > item`
//! shape, and item fields come either with English tags (`aptNm`,
//! `dealAmount`, ...) or with the legacy Korean tags (`아파트`, `거래금액`, ...).

use crate::apis::SourcePage;
use crate::error::{EtlError, Result};
use crate::types::RawRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<item>(.*?)</item>").expect("valid item regex"));
static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<([^<>/\s]+)>([^<]*)</([^<>/\s]+)>|<([^<>/\s]+)\s*/>")
        .expect("valid field regex")
});

/// Result codes that mean success
const OK_RESULT_CODES: &[&str] = &["00", "000"];

#[derive(Debug, Default)]
struct DateParts {
    year: String,
    month: String,
    day: String,
}

impl DateParts {
    /// Compose `YYYY-MM-DD` from the separate parts the API sends.
    fn compose(&self) -> String {
        if self.year.is_empty() || self.month.is_empty() || self.day.is_empty() {
            return String::new();
        }
        match (
            self.year.parse::<u32>(),
            self.month.parse::<u32>(),
            self.day.parse::<u32>(),
        ) {
            (Ok(y), Ok(m), Ok(d)) => format!("{y:04}-{m:02}-{d:02}"),
            // Keep whatever was sent; the normalizer decides what it is worth.
            _ => format!("{}-{}-{}", self.year, self.month, self.day),
        }
    }
}

fn apply_field(record: &mut RawRecord, date: &mut DateParts, name: &str, value: &str) {
    let value = value.trim().to_string();
    match name {
        "aptNm" | "아파트" => record.apartment_name = value,
        "sggCd" | "지역코드" => record.district_code = value,
        "sggNm" => record.district_name = value,
        "umdNm" | "법정동" => record.dong_name = value,
        "dealAmount" | "거래금액" => record.amount = value,
        "excluUseAr" | "전용면적" => record.area = value,
        "buildYear" | "건축년도" => record.construction_year = value,
        "floor" | "층" => record.floor = value,
        "dealYear" | "년" => date.year = value,
        "dealMonth" | "월" => date.month = value,
        "dealDay" | "일" => date.day = value,
        "rgstDate" | "등기일자" => record.registration_date = value,
        _ => {}
    }
}

/// Decode a response body, sniffing JSON versus XML.
pub fn decode(body: &str) -> Result<SourcePage> {
    if body.trim_start().starts_with('{') {
        decode_json(body)
    } else {
        decode_xml(body)
    }
}

pub fn decode_xml(body: &str) -> Result<SourcePage> {
    if let Some(err) = gateway_error(body) {
        return Err(err);
    }
    if let Some(code) = xml_tag_text(body, "resultCode") {
        if !OK_RESULT_CODES.contains(&code.as_str()) {
            let message = xml_tag_text(body, "resultMsg").unwrap_or_default();
            return Err(EtlError::Api {
                message: format!("source result code {code}: {message}"),
            });
        }
    }

    let total_count = xml_tag_text(body, "totalCount").and_then(|v| v.parse::<usize>().ok());

    let mut records = Vec::new();
    for item in ITEM_RE.captures_iter(body) {
        let inner = &item[1];
        let mut record = RawRecord::default();
        let mut date = DateParts::default();
        for field in FIELD_RE.captures_iter(inner) {
            if let (Some(open), Some(text), Some(close)) = (field.get(1), field.get(2), field.get(3)) {
                if open.as_str() != close.as_str() {
                    continue;
                }
                apply_field(&mut record, &mut date, open.as_str(), &unescape(text.as_str()));
            } else if let Some(empty) = field.get(4) {
                apply_field(&mut record, &mut date, empty.as_str(), "");
            }
        }
        record.transaction_date = date.compose();
        records.push(record);
    }

    debug!("Decoded {} items from XML payload", records.len());
    Ok(SourcePage {
        records,
        total_count,
    })
}

/// The API gateway rejects requests (unregistered key, quota, unknown service)
/// with an `OpenAPI_ServiceResponse > cmmMsgHeader` envelope instead of the
/// usual `response > header`.
fn gateway_error(body: &str) -> Option<EtlError> {
    let code = xml_tag_text(body, "returnReasonCode");
    let err_msg = xml_tag_text(body, "errMsg");
    if code.is_none() && err_msg.is_none() {
        return None;
    }
    let code = code.unwrap_or_default();
    if OK_RESULT_CODES.contains(&code.as_str()) {
        return None;
    }
    let reason = xml_tag_text(body, "returnAuthMsg")
        .filter(|m| !m.is_empty())
        .or(err_msg)
        .unwrap_or_default();
    Some(EtlError::Api {
        message: format!("source gateway error {code}: {reason}"),
    })
}

pub fn decode_json(body: &str) -> Result<SourcePage> {
    let root: Value = serde_json::from_str(body)?;
    let response = root.get("response").unwrap_or(&root);

    if let Some(code) = response
        .get("header")
        .and_then(|h| h.get("resultCode"))
        .map(value_to_string)
    {
        if !OK_RESULT_CODES.contains(&code.as_str()) {
            let message = response
                .get("header")
                .and_then(|h| h.get("resultMsg"))
                .map(value_to_string)
                .unwrap_or_default();
            return Err(EtlError::Api {
                message: format!("source result code {code}: {message}"),
            });
        }
    }

    let body = response.get("body");
    let total_count = body
        .and_then(|b| b.get("totalCount"))
        .and_then(|v| value_to_string(v).parse::<usize>().ok());

    // `items` is an empty string when there are no rows, `item` is an object
    // when there is exactly one.
    let items = body.and_then(|b| b.get("items"));
    let item_values: Vec<&Value> = match items {
        Some(Value::Array(arr)) => arr.iter().collect(),
        Some(Value::Object(obj)) => match obj.get("item") {
            Some(Value::Array(arr)) => arr.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let records: Vec<RawRecord> = item_values
        .into_iter()
        .filter_map(|item| item.as_object())
        .map(|obj| {
            let mut record = RawRecord::default();
            let mut date = DateParts::default();
            for (name, value) in obj {
                apply_field(&mut record, &mut date, name, &value_to_string(value));
            }
            record.transaction_date = date.compose();
            record
        })
        .collect();

    debug!("Decoded {} items from JSON payload", records.len());
    Ok(SourcePage {
        records,
        total_count,
    })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn xml_tag_text(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(unescape(body[start..end].trim()))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<response>
  <header><resultCode>000</resultCode><resultMsg>OK</resultMsg></header>
  <body>
    <items>
      <item>
        <aptNm>래미안 &amp; 자이</aptNm>
        <buildYear>2008</buildYear>
        <dealAmount>    82,500</dealAmount>
        <dealDay>7</dealDay>
        <dealMonth>6</dealMonth>
        <dealYear>2024</dealYear>
        <excluUseAr>84.97</excluUseAr>
        <floor>12</floor>
        <rgstDate/>
        <sggCd>11680</sggCd>
        <umdNm>대치동</umdNm>
      </item>
      <item>
        <아파트>은마</아파트>
        <거래금액>250,000</거래금액>
        <년>2024</년>
        <월>06</월>
        <일>21</일>
        <전용면적>76.79</전용면적>
        <지역코드>11680</지역코드>
      </item>
    </items>
    <numOfRows>1000</numOfRows><pageNo>1</pageNo><totalCount>2</totalCount>
  </body>
</response>"#;

    #[test]
    fn test_decode_xml_both_tag_styles() {
        let page = decode(XML_PAGE).unwrap();
        assert_eq!(page.total_count, Some(2));
        assert_eq!(page.records.len(), 2);

        let first = &page.records[0];
        assert_eq!(first.apartment_name, "래미안 & 자이");
        assert_eq!(first.amount, "82,500");
        assert_eq!(first.area, "84.97");
        assert_eq!(first.construction_year, "2008");
        assert_eq!(first.floor, "12");
        assert_eq!(first.district_code, "11680");
        assert_eq!(first.dong_name, "대치동");
        assert_eq!(first.transaction_date, "2024-06-07");
        assert_eq!(first.registration_date, "");

        let second = &page.records[1];
        assert_eq!(second.apartment_name, "은마");
        assert_eq!(second.amount, "250,000");
        assert_eq!(second.transaction_date, "2024-06-21");
    }

    #[test]
    fn test_decode_xml_error_result_code() {
        let body = "<response><header><resultCode>30</resultCode>\
                    <resultMsg>SERVICE KEY IS NOT REGISTERED</resultMsg></header></response>";
        let err = decode(body).unwrap_err();
        assert!(matches!(err, EtlError::Api { .. }));
        assert!(err.to_string().contains("SERVICE KEY"));
    }

    #[test]
    fn test_decode_gateway_error_envelope() {
        let body = "<OpenAPI_ServiceResponse><cmmMsgHeader><errMsg>SERVICE ERROR</errMsg>\
                    <returnAuthMsg>SERVICE_KEY_IS_NOT_REGISTERED_ERROR</returnAuthMsg>\
                    <returnReasonCode>30</returnReasonCode></cmmMsgHeader></OpenAPI_ServiceResponse>";
        let err = decode(body).unwrap_err();
        assert!(matches!(err, EtlError::Api { .. }));
        assert!(err.is_transient());
        assert!(err.to_string().contains("SERVICE_KEY_IS_NOT_REGISTERED_ERROR"));

        let bare = "<OpenAPI_ServiceResponse><cmmMsgHeader><errMsg>SERVICE ERROR</errMsg>\
                    </cmmMsgHeader></OpenAPI_ServiceResponse>";
        let err = decode(bare).unwrap_err();
        assert!(err.to_string().contains("SERVICE ERROR"));
    }

    #[test]
    fn test_decode_json_single_and_array_items() {
        let single = r#"{"response":{"header":{"resultCode":"000","resultMsg":"OK"},
            "body":{"items":{"item":{"aptNm":"A","dealAmount":"1,234","excluUseAr":84.5,
            "dealYear":2024,"dealMonth":6,"dealDay":1,"sggCd":"11110"}},"totalCount":1}}}"#;
        let page = decode(single).unwrap();
        assert_eq!(page.total_count, Some(1));
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].area, "84.5");
        assert_eq!(page.records[0].transaction_date, "2024-06-01");

        let many = r#"{"response":{"header":{"resultCode":"00"},
            "body":{"items":{"item":[{"aptNm":"A"},{"aptNm":"B"}]},"totalCount":"2"}}}"#;
        let page = decode(many).unwrap();
        assert_eq!(page.total_count, Some(2));
        assert_eq!(page.records.len(), 2);
    }

    #[test]
    fn test_decode_json_empty_items() {
        let body = r#"{"response":{"header":{"resultCode":"000"},"body":{"items":"","totalCount":0}}}"#;
        let page = decode(body).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total_count, Some(0));
    }

    #[test]
    fn test_partial_date_is_left_blank() {
        let body = "<items><item><aptNm>A</aptNm><dealYear>2024</dealYear></item></items>";
        let page = decode(body).unwrap();
        assert_eq!(page.records[0].transaction_date, "");
    }
}
