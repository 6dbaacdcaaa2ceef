use crate::{ClientContext, DriverError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// JSON-over-HTTP transport shared by the remote drivers.
///
/// Every call is a single blocking request against `ClientContext.endpoint`.
/// Error statuses are read as `{Code, Message}` bodies and classified by
/// `DriverError::from_api`.
pub struct JsonTransport {
    context: ClientContext,
    agent: ureq::Agent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

type HttpResponse = ureq::http::Response<ureq::Body>;

impl JsonTransport {
    pub fn new(context: ClientContext) -> Self {
        let agent = context.agent();
        Self { context, agent }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    fn authorize<B>(&self, req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let req = req.header("Accept", "application/json");
        match self.context.auth_token {
            Some(ref token) => req.header("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DriverError> {
        let url = self.context.url(path);
        tracing::debug!("GET {url}");
        let mut req = self.authorize(self.agent.get(&url));
        for (key, value) in query {
            req = req.query(*key, *value);
        }
        let resp = req.call().map_err(|e| DriverError::Http(e.to_string()))?;
        decode(&url, resp)
    }

    pub fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DriverError> {
        let url = self.context.url(path);
        let payload =
            serde_json::to_vec(body).map_err(|e| DriverError::Serialization(e.to_string()))?;
        tracing::debug!("POST {url} ({} bytes)", payload.len());
        let resp = self
            .authorize(self.agent.post(&url))
            .header("Content-Type", "application/json")
            .send(payload.as_slice())
            .map_err(|e| DriverError::Http(e.to_string()))?;
        decode(&url, resp)
    }

    pub fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<(), DriverError> {
        let url = self.context.url(path);
        tracing::debug!("DELETE {url}");
        let mut req = self.authorize(self.agent.delete(&url));
        for (key, value) in query {
            req = req.query(*key, *value);
        }
        let resp = req.call().map_err(|e| DriverError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = read_body(resp)?;
        if status >= 400 {
            return Err(api_error(&url, status, &body));
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(url: &str, resp: HttpResponse) -> Result<T, DriverError> {
    let status = resp.status().as_u16();
    let body = read_body(resp)?;
    if status >= 400 {
        return Err(api_error(url, status, &body));
    }
    serde_json::from_slice(&body).map_err(|e| DriverError::Serialization(format!("{url}: {e}")))
}

fn read_body(resp: HttpResponse) -> Result<Vec<u8>, DriverError> {
    let mut reader = resp.into_body().into_reader();
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| DriverError::Http(e.to_string()))?;
    Ok(body)
}

fn api_error(url: &str, status: u16, body: &[u8]) -> DriverError {
    let parsed: ApiErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        format!("HTTP {status} for {url}")
    } else {
        parsed.message
    };
    DriverError::from_api(status, &parsed.code, &message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_server::MockServer;
    use serde_json::{json, Value};

    fn transport(url: &str) -> JsonTransport {
        JsonTransport::new(ClientContext::new(url))
    }

    #[test]
    fn get_decodes_json_body() {
        let server = MockServer::start(|_| (200, r#"{"Answer": 42}"#.to_owned()));
        let value: Value = transport(&server.addr).get("/things", &[]).unwrap();
        assert_eq!(value["Answer"], 42);
    }

    #[test]
    fn query_parameters_are_encoded() {
        let server = MockServer::start(|_| (200, "{}".to_owned()));
        let _: Value = transport(&server.addr)
            .get("/acm/us-east-1/certificate", &[("arn", "arn:aws:acm:us-east-1:1:certificate/a b")])
            .unwrap();
        let reqs = server.captured_requests();
        assert!(reqs[0].path.starts_with("/acm/us-east-1/certificate?arn="));
        assert!(!reqs[0].path.contains(' '), "{}", reqs[0].path);
    }

    #[test]
    fn post_sends_json_with_content_type() {
        let server = MockServer::start(|_| (200, "{}".to_owned()));
        let _: Value = transport(&server.addr)
            .post("/buckets/b/delete", &json!({"Quiet": true}))
            .unwrap();
        let reqs = server.captured_requests();
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(
            reqs[0].headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(reqs[0].json()["Quiet"], true);
    }

    #[test]
    fn auth_token_sent_as_bearer_header() {
        let server = MockServer::start(|_| (200, "{}".to_owned()));
        let t = JsonTransport::new(ClientContext::new(&server.addr).with_token("tok-1"));
        let _: Value = t.get("/x", &[]).unwrap();
        let reqs = server.captured_requests();
        assert_eq!(
            reqs[0].headers.get("authorization").map(String::as_str),
            Some("Bearer tok-1")
        );
    }

    #[test]
    fn no_auth_header_without_token() {
        let server = MockServer::start(|_| (200, "{}".to_owned()));
        let _: Value = transport(&server.addr).get("/x", &[]).unwrap();
        assert!(!server.captured_requests()[0]
            .headers
            .contains_key("authorization"));
    }

    #[test]
    fn error_body_becomes_api_error() {
        let server = MockServer::start(|_| {
            (400, r#"{"Code": "Throttling", "Message": "Rate exceeded"}"#.to_owned())
        });
        let err = transport(&server.addr).get::<Value>("/x", &[]).unwrap_err();
        match err {
            DriverError::Api { status, code, message } => {
                assert_eq!(status, 400);
                assert_eq!(code, "Throttling");
                assert_eq!(message, "Rate exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bare_404_is_an_api_error() {
        let server = MockServer::start(|_| (404, String::new()));
        let err = transport(&server.addr).delete("/no-such-route", &[]).unwrap_err();
        assert!(!err.is_not_found(), "{err}");
        assert!(matches!(err, DriverError::Api { status: 404, .. }), "{err}");
    }

    #[test]
    fn malformed_success_body_is_serialization_error() {
        let server = MockServer::start(|_| (200, "not json".to_owned()));
        let err = transport(&server.addr).get::<Value>("/x", &[]).unwrap_err();
        assert!(matches!(err, DriverError::Serialization(_)));
    }

    #[test]
    fn connection_refused_returns_error() {
        let err = transport("http://127.0.0.1:1").get::<Value>("/x", &[]).unwrap_err();
        assert!(matches!(err, DriverError::Http(_)));
    }
}
