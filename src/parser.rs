//! Record parser: loosely-typed page payload to normalized [`Record`]s.
//!
//! Field extraction is path based. A path is a dot-separated list of segments;
//! each segment indexes an object by key or an array by position:
//!
//! ```
//! use catalog_harvest::parser::{lookup_f64, lookup_str};
//! use serde_json::json;
//!
//! let product = json!({"images": [{"url": "/a.jpg"}], "price": {"value": 9.99}});
//! assert_eq!(lookup_str(&product, "images.0.url"), "/a.jpg");
//! assert_eq!(lookup_f64(&product, "price.value"), 9.99);
//! assert_eq!(lookup_str(&product, "images.3.url"), "");
//! ```
//!
//! Lookups are total: a missing key, a wrong-typed value or an out-of-range index
//! yields the zero value (`""` or `0.0`). Only a `products` field that exists but is
//! not an array rejects the whole page.

use crate::error::MalformedPageError;
use crate::types::Record;
use serde_json::Value;

/// Source paths for each [`Record`] field
mod paths {
    pub(super) const CODE: &str = "code";
    pub(super) const NAME: &str = "name";
    pub(super) const BRAND_NAME: &str = "fnlColorVariantData.brandName";
    pub(super) const BRAND_TYPE: &str = "brandTypeName";
    pub(super) const COLOR_GROUP: &str = "fnlColorVariantData.colorGroup";
    pub(super) const SEGMENT: &str = "segmentNameText";
    pub(super) const VERTICAL: &str = "verticalNameText";
    pub(super) const BRICK: &str = "brickNameText";
    pub(super) const IMAGE_URL: &str = "images.0.url";
    pub(super) const PRICE: &str = "price.value";
    pub(super) const WAS_PRICE: &str = "wasPriceData.value";
    pub(super) const OFFER_PRICE: &str = "offerPrice.value";
    pub(super) const URL: &str = "url";
}

/// Top-level key holding the page's product array
const PRODUCTS_KEY: &str = "products";

/// Parse one decoded page payload into records, preserving payload order
///
/// A missing or `null` `products` key is an empty page, not an error.
///
/// # Errors
///
/// Returns [`MalformedPageError`] if `products` is present but is not an array.
pub fn parse_page(payload: &Value) -> Result<Vec<Record>, MalformedPageError> {
    match payload.get(PRODUCTS_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(products)) => Ok(products.iter().map(parse_record).collect()),
        Some(other) => Err(MalformedPageError {
            found: json_kind(other),
        }),
    }
}

/// Normalize a single product element
///
/// Never fails; a non-object element produces a record of zero values.
pub fn parse_record(product: &Value) -> Record {
    Record {
        code: lookup_str(product, paths::CODE),
        name: lookup_str(product, paths::NAME),
        brand_name: lookup_str(product, paths::BRAND_NAME),
        brand_type: lookup_str(product, paths::BRAND_TYPE),
        color_group: lookup_str(product, paths::COLOR_GROUP),
        segment: lookup_str(product, paths::SEGMENT),
        vertical: lookup_str(product, paths::VERTICAL),
        brick: lookup_str(product, paths::BRICK),
        image_url: lookup_str(product, paths::IMAGE_URL),
        price: lookup_f64(product, paths::PRICE),
        was_price: lookup_f64(product, paths::WAS_PRICE),
        offer_price: lookup_f64(product, paths::OFFER_PRICE),
        url: lookup_str(product, paths::URL),
    }
}

/// Resolve `path` and return the string found there, or `""`
pub fn lookup_str(value: &Value, path: &str) -> String {
    lookup(value, path)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Resolve `path` and return the number found there, or `0.0`
///
/// Prices are non-negative, so negative numbers also normalize to `0.0`.
pub fn lookup_f64(value: &Value, path: &str) -> f64 {
    lookup(value, path)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .unwrap_or(0.0)
}

/// Walk `path` through nested objects and arrays
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_product() -> Value {
        json!({
            "code": "460123456001",
            "name": "Slim Fit Crew-Neck T-shirt",
            "brandTypeName": "Private",
            "url": "/slim-fit-tshirt/p/460123456001",
            "segmentNameText": "Men",
            "verticalNameText": "Apparel",
            "brickNameText": "Tshirts",
            "fnlColorVariantData": {"brandName": "DNMX", "colorGroup": "Navy"},
            "images": [{"url": "/img/first.jpg"}, {"url": "/img/second.jpg"}],
            "price": {"value": 399.0},
            "wasPriceData": {"value": 799},
            "offerPrice": {"value": 359.1}
        })
    }

    #[test]
    fn parses_every_field_from_its_path() {
        let record = parse_record(&full_product());

        assert_eq!(record.code, "460123456001");
        assert_eq!(record.name, "Slim Fit Crew-Neck T-shirt");
        assert_eq!(record.brand_name, "DNMX");
        assert_eq!(record.brand_type, "Private");
        assert_eq!(record.color_group, "Navy");
        assert_eq!(record.segment, "Men");
        assert_eq!(record.vertical, "Apparel");
        assert_eq!(record.brick, "Tshirts");
        assert_eq!(record.image_url, "/img/first.jpg");
        assert_eq!(record.price, 399.0);
        assert_eq!(record.was_price, 799.0, "integers read as decimals");
        assert_eq!(record.offer_price, 359.1);
        assert_eq!(record.url, "/slim-fit-tshirt/p/460123456001");
    }

    #[test]
    fn missing_fields_normalize_to_zero_values() {
        let record = parse_record(&json!({"code": "A1"}));
        assert_eq!(
            record,
            Record {
                code: "A1".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn wrong_types_normalize_to_zero_values() {
        let record = parse_record(&json!({
            "code": 12345,
            "name": null,
            "images": {"0": {"url": "/not-an-array.jpg"}},
            "price": {"value": "399.00"},
            "wasPriceData": 799,
            "fnlColorVariantData": ["DNMX"]
        }));

        assert_eq!(record.code, "");
        assert_eq!(record.name, "");
        // An object keyed "0" is still an object, so the path resolves through it.
        assert_eq!(record.image_url, "/not-an-array.jpg");
        assert_eq!(record.price, 0.0);
        assert_eq!(record.was_price, 0.0);
        assert_eq!(record.brand_name, "");
    }

    #[test]
    fn out_of_range_and_non_numeric_indexes_yield_empty() {
        let product = json!({"images": [{"url": "/only.jpg"}]});
        assert_eq!(lookup_str(&product, "images.1.url"), "");
        assert_eq!(lookup_str(&product, "images.-1.url"), "");
        assert_eq!(lookup_str(&product, "images.first.url"), "");
        assert_eq!(lookup_str(&json!({"images": []}), "images.0.url"), "");
    }

    #[test]
    fn negative_prices_normalize_to_zero() {
        assert_eq!(lookup_f64(&json!({"price": {"value": -5.0}}), "price.value"), 0.0);
    }

    #[test]
    fn non_object_element_yields_empty_record() {
        assert_eq!(parse_record(&json!("garbage")), Record::default());
        assert_eq!(parse_record(&Value::Null), Record::default());
    }

    #[test]
    fn page_preserves_payload_order() {
        let page = json!({"products": [{"code": "B"}, {"code": "A"}, {"code": "C"}]});
        let codes: Vec<String> = parse_page(&page)
            .unwrap()
            .into_iter()
            .map(|r| r.code)
            .collect();
        assert_eq!(codes, vec!["B", "A", "C"]);
    }

    #[test]
    fn missing_or_null_products_is_an_empty_page() {
        assert!(parse_page(&json!({})).unwrap().is_empty());
        assert!(parse_page(&json!({"products": null})).unwrap().is_empty());
        assert!(parse_page(&json!({"products": []})).unwrap().is_empty());
        assert!(parse_page(&json!([1, 2, 3])).unwrap().is_empty());
    }

    #[test]
    fn non_array_products_is_malformed() {
        assert_eq!(
            parse_page(&json!({"products": 7})).unwrap_err(),
            MalformedPageError { found: "number" }
        );
        assert_eq!(
            parse_page(&json!({"products": {"code": "A1"}})).unwrap_err(),
            MalformedPageError { found: "object" }
        );
        assert_eq!(
            parse_page(&json!({"products": "none"})).unwrap_err(),
            MalformedPageError { found: "string" }
        );
    }

    #[test]
    fn reference_example_page() {
        let page = json!({"products": [{"code": "A1", "price": {"value": 9.99}}]});
        let records = parse_page(&page).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "A1");
        assert_eq!(records[0].price, 9.99);
    }
}
