//! Verify request building, classification and pagination against the JSON
//! test vectors stored in `test-vectors/`.
//!
//! Each vector file lists inputs and expected results. Request bodies are
//! compared as parsed JSON, not raw strings, so field order does not matter.

use concourse_core::classify::{classify, Outcome};
use concourse_core::pagination::Page;
use concourse_core::{
    ApiError, ApiRequest, Headers, HttpMethod, HttpResponse, Pagination, ResponseBody, RouteTable,
};
use serde_json::Value;
use url::Url;

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn string_pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| {
            let arr = pair.as_array().unwrap();
            (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
        })
        .collect()
}

fn page(value: &Value) -> Option<Page> {
    if value.is_null() {
        return None;
    }
    Some(Page {
        since: value["since"].as_u64(),
        until: value["until"].as_u64(),
        limit: value["limit"].as_u64(),
    })
}

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

#[test]
fn build_request_vectors() {
    let raw = include_str!("../../test-vectors/build_request.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    let routes = RouteTable::atc();
    let base_url = Url::parse(vectors["base_url"].as_str().unwrap()).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let route_name = case["route"].as_str().unwrap();

        let mut request = ApiRequest::new(route_name).query_pairs(string_pairs(&case["query"]));
        for (key, value) in case["params"].as_object().unwrap() {
            request = request.param(key.as_str(), value.as_str().unwrap());
        }
        if let Some(body) = case.get("body") {
            request = request.json(body).unwrap();
        }

        let built = routes
            .resolve(route_name)
            .and_then(|route| concourse_core::request::build(route, &base_url, request));

        if let Some(expected) = case.get("expected_error") {
            let err = built.expect_err(name);
            let variant = match err {
                ApiError::RouteNotFound { .. } => "RouteNotFound",
                ApiError::MissingPathParameter { .. } => "MissingPathParameter",
                other => panic!("{name}: unexpected error {other:?}"),
            };
            assert_eq!(variant, expected.as_str().unwrap(), "{name}: error");
            continue;
        }

        let built = built.unwrap_or_else(|err| panic!("{name}: {err}"));
        let expected = &case["expected"];
        assert_eq!(built.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(built.url.as_str(), expected["url"].as_str().unwrap(), "{name}: url");

        for (header, value) in string_pairs(&expected["headers"]) {
            assert_eq!(built.headers.get(&header), Some(value.as_str()), "{name}: {header}");
        }

        match case.get("body") {
            Some(body) => {
                let sent: Value = serde_json::from_slice(built.body.as_deref().unwrap()).unwrap();
                assert_eq!(&sent, body, "{name}: body");
            }
            None => assert!(built.body.is_none(), "{name}: unexpected body"),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn classify_vectors() {
    let raw = include_str!("../../test-vectors/classify.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let status = case["status"].as_u64().unwrap() as u16;
        let body = case["body"].as_str().unwrap().to_string();
        let expected_message = case["message"].as_str();

        let response = HttpResponse::new(status, Headers::new(), ResponseBody::from_bytes(body));
        let outcome = classify(Ok(response)).await;

        let (kind, message) = match &outcome {
            Outcome::Success(resp) => {
                assert_eq!(resp.status, status, "{name}: status");
                ("Success", None)
            }
            Outcome::NotFound => ("NotFound", None),
            Outcome::Forbidden { message } => ("Forbidden", message.as_deref()),
            Outcome::UnexpectedStatus { status: seen, message } => {
                assert_eq!(*seen, status, "{name}: status");
                ("UnexpectedStatus", message.as_deref())
            }
            Outcome::Transport(err) => panic!("{name}: transport error {err}"),
        };
        assert_eq!(kind, case["outcome"].as_str().unwrap(), "{name}: outcome");
        assert_eq!(message, expected_message, "{name}: message");
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[test]
fn pagination_vectors() {
    let raw = include_str!("../../test-vectors/pagination.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let mut headers = Headers::new();
        if let Some(link) = case["link"].as_str() {
            headers.append("Link", link);
        }

        let parsed = Pagination::from_headers(&headers);
        if case["error"].as_bool() == Some(true) {
            assert!(parsed.is_err(), "{name}: expected an error, got {parsed:?}");
            continue;
        }

        let parsed = parsed.unwrap_or_else(|err| panic!("{name}: {err}"));
        assert_eq!(parsed.previous, page(&case["previous"]), "{name}: previous");
        assert_eq!(parsed.next, page(&case["next"]), "{name}: next");
    }
}
