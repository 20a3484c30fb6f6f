use crate::errors::TouristError;
use crate::transport::{HttpRequest, RequestBody, ReqwestTransport, Transport};
use colorful::Color;
use colorful::Colorful;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Base URL used when neither the options nor the environment name one.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Tourist Platform client options. Pass this into `Session::new()`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL of the API, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Whether the SDK should print debug statements to the console.
    pub debug: bool,
    /// Where to persist the access token. `None` keeps it in memory only.
    pub token_path: Option<PathBuf>,
    /// Per-request timeout. `None` leaves reqwest's default in place.
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            debug: false,
            token_path: None,
            timeout: None,
        }
    }
}

impl ClientOptions {
    /// Reads options from the environment.
    ///
    /// `TOURIST_API_URL` (or `NEXT_PUBLIC_API_URL`) selects the base URL,
    /// `TOURIST_DEBUG` turns on console output, `TOURIST_TOKEN_PATH` enables
    /// file persistence and `TOURIST_TIMEOUT_SECS` sets a request timeout.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = get("TOURIST_API_URL")
            .or_else(|| get("NEXT_PUBLIC_API_URL"))
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let debug = get("TOURIST_DEBUG")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let token_path = get("TOURIST_TOKEN_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let timeout = get("TOURIST_TIMEOUT_SECS")
            .and_then(|secs| secs.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Self {
            base_url,
            debug,
            token_path,
            timeout,
        }
    }
}

/// Holder of the bearer token attached to authenticated requests.
pub trait Credentials {
    /// The token to send, if any.
    fn bearer_token(&self) -> Option<String>;
    /// Called when the API rejected a request that carried `bearer_token()`.
    fn unauthorized(&self);
}

/// Options for a single `ApiClient::request()` call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub headers: HeaderMap,
}

impl RequestOptions {
    fn new(method: Method, body: RequestBody) -> Self {
        Self {
            method,
            body,
            headers: HeaderMap::new(),
        }
    }

    /// A request with no body.
    pub fn empty(method: Method) -> Self {
        Self::new(method, RequestBody::Empty)
    }

    pub fn get() -> Self {
        Self::new(Method::GET, RequestBody::Empty)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE, RequestBody::Empty)
    }

    pub fn post<T: Serialize + ?Sized>(body: &T) -> Result<Self, TouristError> {
        Ok(Self::new(Method::POST, json_body(body)?))
    }

    pub fn put<T: Serialize + ?Sized>(body: &T) -> Result<Self, TouristError> {
        Ok(Self::new(Method::PUT, json_body(body)?))
    }

    pub fn patch<T: Serialize + ?Sized>(body: &T) -> Result<Self, TouristError> {
        Ok(Self::new(Method::PATCH, json_body(body)?))
    }

    /// A form-encoded POST, as the token endpoint expects.
    pub fn form(pairs: &[(&str, &str)]) -> Self {
        let pairs = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self::new(Method::POST, RequestBody::Form(pairs))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

fn json_body<T: Serialize + ?Sized>(body: &T) -> Result<RequestBody, TouristError> {
    serde_json::to_value(body)
        .map(RequestBody::Json)
        .map_err(|err| TouristError::Decode(format!("failed to encode request body: {}", err)))
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Empty,
}

impl Payload {
    pub fn into_json(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
            Payload::Empty => Value::Null,
        }
    }
}

/// HTTP client wrapper. Resolves endpoints against the base URL, attaches
/// the bearer token and turns error responses into `TouristError`s.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    debug: bool,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client that talks to the API over reqwest.
    pub fn new(options: &ClientOptions) -> Result<Self, TouristError> {
        let transport = ReqwestTransport::new(options.timeout)?;
        let mut client = Self::with_transport(&options.base_url, Arc::new(transport))?;
        client.debug = options.debug;
        Ok(client)
    }

    /// Creates a client on top of any transport.
    pub fn with_transport(
        base_url: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TouristError> {
        // Verify that the base URL is usable before anything gets sent
        let parsed =
            Url::parse(base_url).map_err(|_| TouristError::InvalidBaseUrl(base_url.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(TouristError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            debug: false,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Resolves an endpoint path against the base URL.
    pub fn url(&self, endpoint: &str) -> Result<Url, TouristError> {
        // Append a / to path if it does not start with one
        let path = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{}", endpoint)
        };

        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|_| TouristError::InvalidBaseUrl(format!("{}{}", self.base_url, path)))
    }

    /// Sends a request to the API.
    ///
    /// A 401 on a request that carried a token calls `credentials.unauthorized()`
    /// before returning `TouristError::AuthenticationExpired`.
    pub fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
        credentials: Option<&dyn Credentials>,
    ) -> Result<Payload, TouristError> {
        let url = self.url(endpoint)?;
        let mut headers = options.headers;

        let token = credentials.and_then(|c| c.bearer_token());

        if let Some(token) = &token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                TouristError::Validation("Bearer token contains invalid characters.".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        if !headers.contains_key(CONTENT_TYPE) {
            let content_type = match options.body {
                RequestBody::Form(_) => "application/x-www-form-urlencoded",
                _ => "application/json",
            };
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        log::debug!("{} {}", options.method, url);

        let response = self.transport.execute(HttpRequest {
            method: options.method,
            url,
            headers,
            body: options.body,
        })?;

        if response.status == StatusCode::UNAUTHORIZED && token.is_some() {
            log::warn!("{} was rejected with 401, dropping the session", endpoint);

            if let Some(credentials) = credentials {
                credentials.unauthorized();
            }

            return Err(TouristError::AuthenticationExpired);
        }

        if !response.status.is_success() {
            return Err(TouristError::RequestFailed {
                status: response.status.as_u16(),
                detail: server_detail(&response.body),
            });
        }

        let is_json = response
            .content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Payload::Empty);
        }

        if is_json {
            let value = serde_json::from_slice(&response.body)
                .map_err(|err| TouristError::Decode(err.to_string()))?;
            return Ok(Payload::Json(value));
        }

        String::from_utf8(response.body)
            .map(Payload::Text)
            .map_err(|err| TouristError::Decode(err.to_string()))
    }

    /// Sends a request and decodes the response body into `T`.
    pub fn request_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
        credentials: Option<&dyn Credentials>,
    ) -> Result<T, TouristError> {
        let payload = self.request(endpoint, options, credentials)?;
        serde_json::from_value(payload.into_json())
            .map_err(|err| TouristError::Decode(err.to_string()))
    }

    /// Prints a debug line when debug output is on.
    pub(crate) fn debug_line(&self, message: &str) {
        if !self.debug {
            return;
        }

        #[cfg(windows)]
        println!("[TOURIST] {}", message);

        #[cfg(not(windows))]
        println!(
            "{} {}",
            "[TOURIST]".gradient_with_color(Color::Cyan, Color::SpringGreen4),
            message.gradient_with_color(Color::SpringGreen4, Color::Cyan)
        );
    }
}

/// Pulls the server's explanation out of an error body.
///
/// The API answers errors with `{"detail": "..."}`, or with a list of
/// `{"msg": "..."}` objects for validation failures.
pub(crate) fn server_detail(body: &[u8]) -> Option<String> {
    let json = serde_json::from_slice::<Value>(body).ok()?;

    match json.get("detail") {
        Some(Value::String(detail)) if !detail.is_empty() => return Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect::<Vec<_>>();

            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    json.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockTransport;
    use crate::transport::HttpResponse;
    use serde_json::json;
    use std::cell::Cell;

    struct FixedToken {
        token: Option<&'static str>,
        rejected: Cell<u32>,
    }

    impl Credentials for FixedToken {
        fn bearer_token(&self) -> Option<String> {
            self.token.map(str::to_string)
        }

        fn unauthorized(&self) {
            self.rejected.set(self.rejected.get() + 1);
        }
    }

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::with_transport("http://api.test/", mock.clone()).unwrap()
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mock = MockTransport::new(|_| HttpResponse::json(200, &json!({})));
        assert!(matches!(
            ApiClient::with_transport("ftp://api.test", mock.clone()),
            Err(TouristError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            ApiClient::with_transport("not a url", mock),
            Err(TouristError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn normalises_endpoint_paths() {
        let mock = MockTransport::new(|_| HttpResponse::json(200, &json!({})));
        let api = client(&mock);

        assert_eq!(api.url("auth/me").unwrap().as_str(), "http://api.test/auth/me");
        assert_eq!(api.url("/auth/me").unwrap().as_str(), "http://api.test/auth/me");
    }

    #[test]
    fn injects_bearer_token_and_json_content_type() {
        let mock = MockTransport::new(|_| HttpResponse::json(200, &json!({"ok": true})));
        let api = client(&mock);
        let creds = FixedToken {
            token: Some("abc"),
            rejected: Cell::new(0),
        };

        let payload = api
            .request("/auth/me", RequestOptions::get(), Some(&creds))
            .unwrap();
        assert_eq!(payload, Payload::Json(json!({"ok": true})));

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.header("authorization").as_deref(), Some("Bearer abc"));
        assert_eq!(sent.header("content-type").as_deref(), Some("application/json"));
    }

    #[test]
    fn form_bodies_are_not_sent_as_json() {
        let mock = MockTransport::new(|_| HttpResponse::json(200, &json!({})));
        let api = client(&mock);

        api.request(
            "/auth/token",
            RequestOptions::form(&[("username", "a@b.com"), ("password", "pw")]),
            None,
        )
        .unwrap();

        let sent = mock.last_request().unwrap();
        assert_eq!(
            sent.header("content-type").as_deref(),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(sent.header("authorization"), None);
        assert_eq!(
            sent.body,
            RequestBody::Form(vec![
                ("username".to_string(), "a@b.com".to_string()),
                ("password".to_string(), "pw".to_string()),
            ])
        );
    }

    #[test]
    fn unauthorized_with_token_expires_the_session() {
        let mock = MockTransport::new(|_| HttpResponse::json(401, &json!({"detail": "Not authenticated"})));
        let api = client(&mock);
        let creds = FixedToken {
            token: Some("abc"),
            rejected: Cell::new(0),
        };

        let result = api.request("/auth/me", RequestOptions::get(), Some(&creds));
        assert!(matches!(result, Err(TouristError::AuthenticationExpired)));
        assert_eq!(creds.rejected.get(), 1);
    }

    #[test]
    fn unauthorized_without_token_is_a_plain_failure() {
        let mock = MockTransport::new(|_| {
            HttpResponse::json(401, &json!({"detail": "Incorrect email or password"}))
        });
        let api = client(&mock);
        let creds = FixedToken {
            token: None,
            rejected: Cell::new(0),
        };

        match api.request("/auth/token", RequestOptions::get(), Some(&creds)) {
            Err(TouristError::RequestFailed { status, detail }) => {
                assert_eq!(status, 401);
                assert_eq!(detail.as_deref(), Some("Incorrect email or password"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(creds.rejected.get(), 0);
    }

    #[test]
    fn server_detail_shapes() {
        assert_eq!(
            server_detail(br#"{"detail":"Booking not found"}"#).as_deref(),
            Some("Booking not found")
        );
        assert_eq!(
            server_detail(br#"{"detail":[{"msg":"field required"},{"msg":"bad date"}]}"#).as_deref(),
            Some("field required; bad date")
        );
        assert_eq!(server_detail(br#"{"message":"nope"}"#).as_deref(), Some("nope"));
        assert_eq!(server_detail(b"<html>oops</html>"), None);
        assert_eq!(server_detail(br#"{"detail":""}"#), None);
    }

    #[test]
    fn failures_without_detail_fall_back_to_the_status() {
        let mock = MockTransport::new(|_| HttpResponse::text(502, "Bad Gateway"));
        let api = client(&mock);

        let err = api
            .request("/profiles/guides", RequestOptions::get(), None)
            .unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.to_string(), "HTTP error! status: 502");
    }

    #[test]
    fn text_and_empty_payloads() {
        let mock = MockTransport::new(|request| {
            if request.url.path() == "/health" {
                HttpResponse::text(200, "healthy")
            } else {
                HttpResponse::text(204, "")
            }
        });
        let api = client(&mock);

        assert_eq!(
            api.request("/health", RequestOptions::get(), None).unwrap(),
            Payload::Text("healthy".to_string())
        );
        assert_eq!(
            api.request("/users/1", RequestOptions::delete(), None).unwrap(),
            Payload::Empty
        );
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mock = MockTransport::new(|_| HttpResponse {
            status: StatusCode::OK,
            content_type: Some("application/json".to_string()),
            body: b"{not json".to_vec(),
        });
        let api = client(&mock);

        assert!(matches!(
            api.request("/auth/me", RequestOptions::get(), None),
            Err(TouristError::Decode(_))
        ));
    }

    #[test]
    fn options_from_vars() {
        let options = ClientOptions::from_vars(|key| match key {
            "NEXT_PUBLIC_API_URL" => Some("https://api.example.com".to_string()),
            "TOURIST_DEBUG" => Some("true".to_string()),
            "TOURIST_TIMEOUT_SECS" => Some("15".to_string()),
            _ => None,
        });

        assert_eq!(options.base_url, "https://api.example.com");
        assert!(options.debug);
        assert_eq!(options.token_path, None);
        assert_eq!(options.timeout, Some(Duration::from_secs(15)));

        let defaults = ClientOptions::from_vars(|_| None);
        assert_eq!(defaults.base_url, DEFAULT_API_URL);
        assert!(!defaults.debug);
    }
}
