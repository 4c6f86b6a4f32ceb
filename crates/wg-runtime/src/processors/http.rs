use std::sync::Arc;

use tracing::debug;
use wg_core::{decode_bytes, ExecError, HttpRequest, OperationDef, Variable};

use crate::session::{HttpActivation, Session};
use crate::HTTP_INFO_VARIABLE;

impl Session {
    /// Issues one blocking request through the transport collaborator.
    /// Children run first: `http-param`/`http-header` elements register with
    /// this activation, everything else contributes to the request body.
    /// The response handle is bound as an internal context variable and the
    /// decoded body is the processor result.
    pub(crate) fn execute_http(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let method = self
            .attr_text(def, "method")?
            .unwrap_or_else(|| "GET".to_string())
            .to_ascii_uppercase();
        let url = self.required_attr(def, "url")?;
        let charset = self
            .attr_text(def, "charset")?
            .unwrap_or_else(|| self.config.charset.clone());
        let content_type = self.attr_text(def, "content-type")?;
        let username = self.attr_text(def, "username")?;
        let password = self.attr_text(def, "password")?;
        let retry_attempts = self.attr_f64(def, "retry-attempts", 1.0)? as u32;
        let retry_delay_ms = self.attr_f64(def, "retry-delay", 0.0)? as u64;

        self.http_activations.push(HttpActivation::default());
        let body_result = self.execute_body(def);
        let activation = self.http_activations.pop().unwrap_or_default();
        let body_value = body_result?;

        let mut headers = activation.headers;
        if let Some(content_type) = content_type {
            headers.push(("Content-Type".to_string(), content_type));
        }
        let body = if body_value.is_empty() {
            None
        } else {
            Some(body_value.to_binary_with_charset(&charset)?)
        };

        let request = HttpRequest {
            method,
            url,
            headers,
            params: activation.params,
            body,
            charset: charset.clone(),
            username,
            password,
            retry_attempts,
            retry_delay_ms,
        };
        debug!(url = %request.url, method = %request.method, "issuing http request");

        let client = Arc::clone(&self.http);
        let response = client.execute(&request)?;

        self.set_diag("statusCode", response.status_code.to_string());
        self.set_diag("statusText", response.status_text.clone());
        if let Some(declared) = response.declared_length {
            self.set_diag("declaredLength", declared.to_string());
        }
        self.set_diag("contentLength", response.body.len().to_string());

        let resolved_charset = response.charset_hint.clone().unwrap_or(charset);
        let body_bytes = response.body.clone();
        self.context.set_local(
            HTTP_INFO_VARIABLE,
            Variable::internal("http-info", Arc::new(response)),
        );

        // Undecodable charsets fall back to the raw bytes; charset
        // heuristics belong to the transport collaborator.
        Ok(match decode_bytes(&body_bytes, &resolved_charset) {
            Ok(text) => Variable::text(text),
            Err(_) => Variable::binary(body_bytes),
        })
    }

    pub(crate) fn execute_http_param(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let name = self.required_attr(def, "name")?;
        if !self.inside_element("http") {
            return Err(ExecError::config(
                "http-param must appear inside an http element",
            ));
        }
        let value = self.execute_body(def)?.to_text();
        if let Some(activation) = self.http_activations.last_mut() {
            activation.params.push((name, value));
        }
        Ok(Variable::empty())
    }

    pub(crate) fn execute_http_header(
        &mut self,
        def: &OperationDef,
    ) -> Result<Variable, ExecError> {
        let name = self.required_attr(def, "name")?;
        if !self.inside_element("http") {
            return Err(ExecError::config(
                "http-header must appear inside an http element",
            ));
        }
        let value = self.execute_body(def)?.to_text();
        if let Some(activation) = self.http_activations.last_mut() {
            activation.headers.push((name, value));
        }
        Ok(Variable::empty())
    }
}
