//! Replayable request descriptions.
//!
//! An `ApiRequest` owns everything needed to send it again (method, path,
//! headers, body), so a request that failed on an expired token can be
//! re-sent verbatim once a new token is available.

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;

use super::ApiError;

const JSON_MIME: &str = "application/json";

/// A file attached to a multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FilePart>),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    /// Set a multipart body. The content type (with boundary) is generated at
    /// send time, so no JSON content type is attached.
    pub fn multipart(mut self, parts: Vec<FilePart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// Add a header, overriding any default the pipeline would attach
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Headers as they go on the wire: caller headers win, then the default
    /// content headers, then the bearer token.
    pub(crate) fn effective_headers(&self, token: Option<&str>) -> Result<HeaderMap, ApiError> {
        let mut headers = self.headers.clone();

        if !headers.contains_key(header::ACCEPT) {
            headers.insert(header::ACCEPT, HeaderValue::from_static(JSON_MIME));
        }
        let multipart = matches!(self.body, RequestBody::Multipart(_));
        if !multipart && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_MIME));
        }

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid access token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// Build a `reqwest` request against `base_url` with the given token.
    pub(crate) fn build(
        &self,
        client: &Client,
        base_url: &Url,
        token: Option<&str>,
    ) -> Result<RequestBuilder, ApiError> {
        let url = resolve(base_url, &self.path)?;
        let builder = client
            .request(self.method.clone(), url)
            .headers(self.effective_headers(token)?);

        let builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(value.to_string()),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };
        Ok(builder)
    }
}

fn build_form(parts: &[FilePart]) -> Result<Form, ApiError> {
    let mut form = Form::new();
    for part in parts {
        let file = Part::bytes(part.bytes.clone())
            .file_name(part.file_name.clone())
            .mime_str(&part.mime)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid mime type {}: {}", part.mime, e)))?;
        form = form.part(part.field.clone(), file);
    }
    Ok(form)
}

/// Join a request path onto the base URL, keeping any path prefix of the base.
pub(crate) fn resolve(base_url: &Url, path: &str) -> Result<Url, ApiError> {
    let base = base_url.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{}/{}", base, path))
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid URL for path {}: {}", path, e)))
}

/// Percent-encode a value for use as a single path segment
pub fn path_segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers_with_token() {
        let request = ApiRequest::get("/history");
        let headers = request.effective_headers(Some("abc")).expect("headers");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer abc");
        assert_eq!(headers[header::ACCEPT], JSON_MIME);
        assert_eq!(headers[header::CONTENT_TYPE], JSON_MIME);
    }

    #[test]
    fn test_no_authorization_without_session() {
        let headers = ApiRequest::get("/groups").effective_headers(None).expect("headers");
        assert!(!headers.contains_key(header::AUTHORIZATION));
    }

    #[test]
    fn test_caller_overrides_content_headers() {
        let request = ApiRequest::post("/upload")
            .header("Content-Type", "text/plain")
            .and_then(|r| r.header("Accept", "*/*"))
            .expect("request");
        let headers = request.effective_headers(Some("abc")).expect("headers");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::ACCEPT], "*/*");
    }

    #[test]
    fn test_multipart_leaves_content_type_to_form() {
        let request = ApiRequest::patch("/users/avatar").multipart(vec![FilePart {
            field: "avatar".into(),
            file_name: "ana.png".into(),
            mime: "image/png".into(),
            bytes: vec![1, 2, 3],
        }]);
        let headers = request.effective_headers(Some("abc")).expect("headers");
        assert!(!headers.contains_key(header::CONTENT_TYPE));
        assert_eq!(headers[header::ACCEPT], JSON_MIME);
    }

    #[test]
    fn test_resolve_keeps_base_prefix() {
        let base = Url::parse("http://localhost:3333/api/").expect("url");
        let url = resolve(&base, "/exercises/bygroup/costas").expect("resolve");
        assert_eq!(url.as_str(), "http://localhost:3333/api/exercises/bygroup/costas");
    }

    #[test]
    fn test_path_segment_encoding() {
        assert_eq!(path_segment("costas"), "costas");
        assert_eq!(path_segment("ombro e trapézio"), "ombro%20e%20trap%C3%A9zio");
        assert_eq!(path_segment("a/b"), "a%2Fb");
    }
}
