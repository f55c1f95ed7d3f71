//! Synthetic request type.

use std::collections::BTreeMap;

use http::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

/// Caller-supplied overrides for the synthetic request.
///
/// Every field is optional; missing ones fall back to `GET /test` with no
/// headers, no query and a `null` body. Deserializes straight from the
/// `request` member of a run payload.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RequestSpec {
    pub method: Option<String>,
    pub path: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, Value>,
    pub body: Value,
}

impl RequestSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_owned());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.query.insert(key.to_owned(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }
}

/// The request every step in a run sees.
///
/// Built once per run and shared behind an `Arc`; nothing can mutate it.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, Value>,
    body: Value,
}

impl Request {
    /// Merges `spec` over the defaults.
    ///
    /// The method is upper-cased and must be a valid HTTP token, the path must
    /// be absolute, and header names are lower-cased (the last duplicate wins).
    pub fn from_spec(spec: RequestSpec) -> Result<Self, Error> {
        let method = match spec.method {
            Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::InvalidRequest(format!("invalid method `{m}`")))?,
            None => Method::GET,
        };

        let path = spec.path.unwrap_or_else(|| "/test".to_owned());
        if !path.starts_with('/') {
            return Err(Error::InvalidRequest(format!("path `{path}` must start with `/`")));
        }

        let headers = spec.headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        Ok(Self { method, path, headers, query: spec.query, body: spec.body })
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &BTreeMap<String, String> { &self.headers }
    pub fn body(&self) -> &Value { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn query(&self, key: &str) -> Option<&Value> {
        self.query.get(key)
    }
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: "/test".to_owned(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_when_nothing_is_overridden() {
        let req = Request::from_spec(RequestSpec::new()).unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.path(), "/test");
        assert!(req.headers().is_empty());
        assert_eq!(req.body(), &Value::Null);
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let spec = RequestSpec::new().header("X-Api-Key", "secret");
        let req = Request::from_spec(spec).unwrap();
        assert_eq!(req.header("x-api-key"), Some("secret"));
        assert_eq!(req.header("X-API-KEY"), Some("secret"));
        assert!(req.headers().contains_key("x-api-key"));
    }

    #[test]
    fn method_is_upper_cased() {
        let req = Request::from_spec(RequestSpec::new().method("post")).unwrap();
        assert_eq!(req.method(), Method::POST);
    }

    #[test]
    fn overrides_carry_query_and_body() {
        let spec = RequestSpec::new()
            .path("/users")
            .query("page", "2")
            .body(json!({ "name": "alice" }));
        let req = Request::from_spec(spec).unwrap();
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query("page"), Some(&json!("2")));
        assert_eq!(req.body()["name"], "alice");
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = Request::from_spec(RequestSpec::new().path("users")).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn malformed_method_is_rejected() {
        let err = Request::from_spec(RequestSpec::new().method("GE T")).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn spec_deserializes_from_partial_json() {
        let spec: RequestSpec = serde_json::from_value(json!({
            "method": "DELETE",
            "headers": { "Authorization": "Bearer t" }
        }))
        .unwrap();
        let req = Request::from_spec(spec).unwrap();
        assert_eq!(req.method(), Method::DELETE);
        assert_eq!(req.header("authorization"), Some("Bearer t"));
        assert_eq!(req.path(), "/test");
    }
}
