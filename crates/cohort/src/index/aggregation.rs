//! Demographic breakdown aggregations for the person index.
//!
//! Each age range is a `date_range` aggregation over `birth_datetime`
//! (`d_<range>`) with a `terms` aggregation on gender or sex at birth
//! (`g_<range>`) nesting a `terms` aggregation on race (`r_<range>`).
//! Range bounds are concrete dates relative to the reference date; `from`
//! is inclusive and `to` exclusive, so each bound is the day after the
//! latest birth date of the age it separates.

use chrono::NaiveDate;
use serde_json::{Value, json};

use super::query_builder::{DATE_FORMAT, date_value, latest_birth_date, next_day, unsupported};
use crate::error::{BackendError, CohortResult};
use crate::routing::DemographicBucket;
use crate::types::Stratification;

/// `(label, aggregation suffix, youngest age, first age past the range)`.
const AGE_RANGES: [(&str, &str, i64, Option<i64>); 3] = [
    ("18-44", "18-44", 18, Some(45)),
    ("45-64", "45-64", 45, Some(65)),
    ("> 65", "65", 65, None),
];

fn stratification_field(stratification: Stratification) -> &'static str {
    match stratification {
        Stratification::Gender => "gender_concept_name",
        Stratification::SexAtBirth => "sex_at_birth_concept_name",
    }
}

/// Exclusive-upper `date_range` bound separating ages below `years` from
/// `years` and above.
fn age_boundary(today: NaiveDate, years: i64) -> CohortResult<Value> {
    latest_birth_date(today, years)
        .and_then(next_day)
        .map(date_value)
        .ok_or_else(|| unsupported("age range"))
}

/// Builds the `aggs` object for a breakdown search with ages as of `today`.
pub fn demographic_aggregations(
    stratification: Stratification,
    today: NaiveDate,
) -> CohortResult<Value> {
    let mut aggs = serde_json::Map::new();
    for (_, suffix, youngest, past) in AGE_RANGES {
        let mut range = json!({ "to": age_boundary(today, youngest)? });
        if let Some(past) = past {
            range["from"] = age_boundary(today, past)?;
        }
        aggs.insert(
            format!("d_{suffix}"),
            json!({
                "date_range": {
                    "field": "birth_datetime",
                    "format": DATE_FORMAT,
                    "ranges": [range]
                },
                "aggs": {
                    format!("g_{suffix}"): {
                        "terms": {
                            "field": stratification_field(stratification),
                            "order": { "_key": "asc" }
                        },
                        "aggs": {
                            format!("r_{suffix}"): {
                                "terms": {
                                    "field": "race_concept_name",
                                    "order": { "_key": "asc" },
                                    "min_doc_count": 1
                                }
                            }
                        }
                    }
                }
            }),
        );
    }
    Ok(Value::Object(aggs))
}

/// Flattens a breakdown search response into buckets.
///
/// Buckets come out ordered by age range, then gender, then race.
pub fn parse_breakdown(response: &Value) -> CohortResult<Vec<DemographicBucket>> {
    let aggregations = response
        .get("aggregations")
        .ok_or_else(|| malformed("response has no aggregations"))?;

    let mut buckets = Vec::new();
    for (label, suffix, _, _) in AGE_RANGES {
        let date_name = format!("d_{suffix}");
        let gender_name = format!("g_{suffix}");
        let race_name = format!("r_{suffix}");

        for date_bucket in bucket_array(aggregations.get(&date_name), &date_name)? {
            for gender_bucket in bucket_array(date_bucket.get(&gender_name), &gender_name)? {
                let gender = bucket_key(gender_bucket, &gender_name)?;
                for race_bucket in bucket_array(gender_bucket.get(&race_name), &race_name)? {
                    buckets.push(DemographicBucket {
                        gender: gender.chars().take(1).collect(),
                        race: bucket_key(race_bucket, &race_name)?.to_string(),
                        age_range: label.to_string(),
                        count: doc_count(race_bucket, &race_name)?,
                    });
                }
            }
        }
    }
    Ok(buckets)
}

fn bucket_array<'a>(aggregation: Option<&'a Value>, name: &str) -> CohortResult<&'a Vec<Value>> {
    aggregation
        .and_then(|agg| agg.get("buckets"))
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(format!("aggregation '{name}' has no buckets")))
}

fn bucket_key<'a>(bucket: &'a Value, name: &str) -> CohortResult<&'a str> {
    bucket
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("bucket of '{name}' has no string key")))
}

fn doc_count(bucket: &Value, name: &str) -> CohortResult<i64> {
    bucket
        .get("doc_count")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed(format!("bucket of '{name}' has no doc_count")))
}

fn malformed(message: impl Into<String>) -> crate::error::CohortError {
    BackendError::MalformedResponse {
        backend_name: "index".to_string(),
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CohortError;

    #[test]
    fn test_aggregation_names_and_fields() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let aggs = demographic_aggregations(Stratification::SexAtBirth, today).unwrap();
        assert_eq!(
            aggs["d_18-44"]["date_range"]["ranges"][0],
            json!({ "from": "1979-06-16", "to": "2006-06-16" })
        );
        assert_eq!(
            aggs["d_45-64"]["date_range"]["ranges"][0],
            json!({ "from": "1959-06-16", "to": "1979-06-16" })
        );
        assert_eq!(
            aggs["d_65"]["date_range"]["ranges"][0],
            json!({ "to": "1959-06-16" })
        );
        assert_eq!(aggs["d_65"]["date_range"]["format"], "yyyy-MM-dd");
        assert_eq!(
            aggs["d_45-64"]["aggs"]["g_45-64"]["terms"]["field"],
            "sex_at_birth_concept_name"
        );
        assert_eq!(
            aggs["d_45-64"]["aggs"]["g_45-64"]["aggs"]["r_45-64"]["terms"]["min_doc_count"],
            1
        );
    }

    #[test]
    fn test_parse_breakdown() {
        let empty = json!({ "buckets": [{ "key": "x", "doc_count": 0, "g_18-44": { "buckets": [] } }] });
        let response = json!({
            "aggregations": {
                "d_18-44": empty,
                "d_45-64": { "buckets": [{
                    "key": "1959-06-16-1979-06-16",
                    "doc_count": 3,
                    "g_45-64": { "buckets": [
                        { "key": "FEMALE", "doc_count": 2, "r_45-64": { "buckets": [
                            { "key": "Asian", "doc_count": 1 },
                            { "key": "White", "doc_count": 1 }
                        ] } },
                        { "key": "MALE", "doc_count": 1, "r_45-64": { "buckets": [
                            { "key": "White", "doc_count": 1 }
                        ] } }
                    ] }
                }] },
                "d_65": { "buckets": [{ "key": "*", "doc_count": 0, "g_65": { "buckets": [] } }] }
            }
        });
        let buckets = parse_breakdown(&response).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(
            buckets[0],
            DemographicBucket {
                gender: "F".to_string(),
                race: "Asian".to_string(),
                age_range: "45-64".to_string(),
                count: 1,
            }
        );
        assert_eq!(buckets[2].gender, "M");
    }

    #[test]
    fn test_parse_breakdown_missing_aggregation() {
        let err = parse_breakdown(&json!({ "aggregations": {} })).unwrap_err();
        assert!(matches!(
            err,
            CohortError::Backend(BackendError::MalformedResponse { .. })
        ));
    }
}
