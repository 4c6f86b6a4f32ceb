use std::collections::BTreeMap;

use crate::error::ExecError;
use crate::value::Variable;

/// Result of one scripting-collaborator evaluation: the expression value plus
/// every binding the script left behind, handed back for the engine to merge
/// into the live context.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Variable,
    pub bindings: Vec<(String, Variable)>,
}

impl Evaluation {
    pub fn value_only(value: Variable) -> Self {
        Self {
            value,
            bindings: Vec::new(),
        }
    }
}

/// Scripting collaborator contract. The engine supplies a snapshot of the
/// currently visible context bindings; the evaluator never touches the
/// context itself.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        code: &str,
        language: &str,
        bindings: &[(String, Variable)],
    ) -> Result<Evaluation, ExecError>;
}

/// Default evaluator for sessions built without a scripting collaborator.
#[derive(Debug, Default)]
pub struct NoExpressionEvaluator;

impl ExpressionEvaluator for NoExpressionEvaluator {
    fn evaluate(
        &self,
        _code: &str,
        language: &str,
        _bindings: &[(String, Variable)],
    ) -> Result<Evaluation, ExecError> {
        Err(ExecError::eval(format!(
            "no scripting collaborator registered for language \"{}\"",
            language
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub charset: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub declared_length: Option<u64>,
    pub body: Vec<u8>,
    pub charset_hint: Option<String>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// HTTP transport collaborator: one blocking call per request, retries and
/// redirect policy handled inside the collaborator.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ExecError>;
}

/// Default transport for sessions built without one.
#[derive(Debug, Default)]
pub struct NoHttpClient;

impl HttpClient for NoHttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ExecError> {
        Err(ExecError::resource(format!(
            "no http collaborator registered (request to \"{}\")",
            request.url
        )))
    }
}

/// Snapshot helper used by evaluator implementations that want name-keyed
/// access to the supplied bindings.
pub fn bindings_to_map(bindings: &[(String, Variable)]) -> BTreeMap<String, Variable> {
    bindings
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collaborators_reject_with_typed_errors() {
        let eval_error = NoExpressionEvaluator
            .evaluate("1 + 1", "rhai", &[])
            .expect_err("no evaluator");
        assert!(matches!(eval_error, ExecError::Eval { .. }));

        let request = HttpRequest {
            url: "http://example.com".to_string(),
            ..HttpRequest::default()
        };
        let http_error = NoHttpClient.execute(&request).expect_err("no client");
        assert!(matches!(http_error, ExecError::Resource { .. }));
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status_code: 200,
            status_text: "OK".to_string(),
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            declared_length: None,
            body: Vec::new(),
            charset_hint: None,
        };
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header("x-missing"), None);
    }
}
