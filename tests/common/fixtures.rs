//! Catalog payload fixtures and mock-server helpers

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::CATALOG_PATH;

/// A product element carrying the fields the parser reads
pub fn product(code: &str, price: f64) -> Value {
    json!({
        "code": code,
        "name": format!("Product {code}"),
        "brandTypeName": "Private",
        "url": format!("/p/{code}"),
        "segmentNameText": "Men",
        "verticalNameText": "Apparel",
        "brickNameText": "Tshirts",
        "fnlColorVariantData": {"brandName": "DNMX", "colorGroup": "Navy"},
        "images": [{"url": format!("/img/{code}.jpg")}],
        "price": {"value": price},
        "wasPriceData": {"value": price * 2.0},
        "offerPrice": {"value": price}
    })
}

/// Page body wrapping `products`
pub fn page_body(products: Vec<Value>) -> Value {
    json!({ "products": products })
}

/// Serve `body` for `currentPage=page`
pub async fn mount_page(server: &MockServer, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .and(query_param("currentPage", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Answer `currentPage=page` with `status`, expecting exactly `attempts` requests
pub async fn mount_failing_page(server: &MockServer, page: u32, status: u16, attempts: u64) {
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .and(query_param("currentPage", page.to_string()))
        .respond_with(ResponseTemplate::new(status))
        .expect(attempts)
        .mount(server)
        .await;
}
