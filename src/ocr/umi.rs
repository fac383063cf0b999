//! OCR over the Umi-OCR HTTP API.
//!
//! The service takes a base64 image and answers with a status code and either
//! a merged string or a list of fragments with bounding boxes. We make exactly
//! one request per region and never retry.

use async_trait::async_trait;
use base64::{Engine as _, prelude::BASE64_STANDARD};
use serde_json::{Value, json};

use crate::{config::OcrConfig, prelude::*};

use super::{OcrEngine, OcrMode, OcrRequest, OcrResult};

/// Status codes reported by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UmiStatus {
    /// Text was found.
    Ok,
    /// The image was read, but contained no text.
    NoText,
    /// Anything else is an error, described by `data`.
    Error(i64),
}

impl From<i64> for UmiStatus {
    fn from(code: i64) -> Self {
        match code {
            100 => UmiStatus::Ok,
            101 => UmiStatus::NoText,
            other => UmiStatus::Error(other),
        }
    }
}

/// Response body from the service.
#[derive(Debug, Deserialize)]
struct UmiResponse {
    code: i64,
    #[serde(default)]
    data: Value,
}

/// A fragment of text returned in `dict` format.
#[derive(Debug, Deserialize)]
struct UmiFragment {
    #[serde(default)]
    text: String,

    /// Corner points, starting with the top-left.
    #[serde(rename = "box", default)]
    bbox: Vec<Vec<f64>>,
}

impl UmiFragment {
    /// Top edge of the bounding box, or 0 if we don't have one.
    fn top(&self) -> f64 {
        self.bbox
            .first()
            .and_then(|point| point.get(1))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Client for a local Umi-OCR server.
pub struct UmiOcrClient {
    client: reqwest::Client,
    url: String,
}

impl UmiOcrClient {
    /// Create a new client.
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("cannot build HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// Send one request, reporting transport and protocol errors.
    async fn try_recognize(&self, request: &OcrRequest) -> Result<OcrResult> {
        let format = match request.mode {
            OcrMode::Text => "text",
            OcrMode::Lines => "dict",
        };
        let payload = json!({
            "base64": BASE64_STANDARD.encode(&request.png),
            "options": {
                "tbpu.parser": "single_line",
                "data.format": format,
            },
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("cannot reach OCR service at {}", self.url))?
            .error_for_status()
            .context("OCR service returned an error status")?;
        let body = response
            .json::<UmiResponse>()
            .await
            .context("cannot parse OCR service response")?;
        Ok(parse_response(body, request.mode))
    }
}

#[async_trait]
impl OcrEngine for UmiOcrClient {
    #[instrument(level = "debug", skip_all, fields(region = %request.region, mode = %request.mode))]
    async fn recognize(&self, request: OcrRequest) -> OcrResult {
        match self.try_recognize(&request).await {
            Ok(result) => result,
            Err(err) => {
                error!("OCR failed for region {:?}: {:?}", request.region, err);
                OcrResult::empty(request.mode)
            }
        }
    }
}

/// Interpret a response body.
fn parse_response(body: UmiResponse, mode: OcrMode) -> OcrResult {
    match UmiStatus::from(body.code) {
        UmiStatus::Ok => {}
        UmiStatus::NoText => return OcrResult::empty(mode),
        UmiStatus::Error(code) => {
            let msg = match &body.data {
                Value::String(msg) => msg.clone(),
                Value::Null => "unknown error".to_owned(),
                other => other.to_string(),
            };
            error!(code, "OCR service reported an error: {}", msg);
            return OcrResult::empty(mode);
        }
    }

    match mode {
        OcrMode::Text => match body.data {
            Value::String(text) => OcrResult::Text(text),
            other => {
                warn!("Expected text from OCR service, got {}", other);
                OcrResult::empty(mode)
            }
        },
        OcrMode::Lines => {
            let mut fragments = match serde_json::from_value::<Vec<UmiFragment>>(body.data) {
                Ok(fragments) => fragments,
                Err(err) => {
                    warn!("Unexpected fragment list from OCR service: {}", err);
                    return OcrResult::empty(mode);
                }
            };
            // `sort_by` is stable, so fragments on the same line keep their
            // detection order.
            fragments.sort_by(|a, b| a.top().total_cmp(&b.top()));
            OcrResult::Lines(
                fragments
                    .into_iter()
                    .map(|f| f.text.trim().to_owned())
                    .filter(|t| !t.is_empty())
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, http::StatusCode, routing::post};

    use super::*;

    fn body(value: Value) -> UmiResponse {
        serde_json::from_value(value).expect("test body should parse")
    }

    #[test]
    fn sorts_lines_by_top_edge() {
        let result = parse_response(
            body(json!({
                "code": 100,
                "data": [
                    { "text": "third", "box": [[0, 50], [10, 50], [10, 60], [0, 60]] },
                    { "text": " first ", "box": [[5, 10], [10, 10]] },
                    { "text": "", "box": [[5, 12]] },
                    { "text": "second-a", "box": [[0, 20.5]] },
                    { "text": "second-b", "box": [[90, 20.5]] },
                    { "text": "no-box" },
                ],
            })),
            OcrMode::Lines,
        );
        assert_eq!(
            result,
            OcrResult::Lines(vec![
                "no-box".to_owned(),
                "first".to_owned(),
                "second-a".to_owned(),
                "second-b".to_owned(),
                "third".to_owned(),
            ])
        );
    }

    #[test]
    fn returns_merged_text() {
        let result = parse_response(
            body(json!({ "code": 100, "data": "ACME AB1234\nZED XY99" })),
            OcrMode::Text,
        );
        assert_eq!(result, OcrResult::Text("ACME AB1234\nZED XY99".to_owned()));
    }

    #[test]
    fn no_text_and_errors_degrade_to_empty() {
        for mode in [OcrMode::Text, OcrMode::Lines] {
            let no_text = parse_response(body(json!({ "code": 101, "data": "" })), mode);
            assert_eq!(no_text, OcrResult::empty(mode));
            let error = parse_response(
                body(json!({ "code": 902, "data": "[Error] decode failed" })),
                mode,
            );
            assert_eq!(error, OcrResult::empty(mode));
        }
    }

    #[test]
    fn wrong_data_shape_degrades_to_empty() {
        let result = parse_response(body(json!({ "code": 100, "data": [] })), OcrMode::Text);
        assert_eq!(result, OcrResult::empty(OcrMode::Text));
        let result = parse_response(body(json!({ "code": 100, "data": "x" })), OcrMode::Lines);
        assert_eq!(result, OcrResult::empty(OcrMode::Lines));
    }

    /// Serve `router` on an ephemeral port and return its OCR endpoint URL.
    async fn serve(router: Router) -> Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("test server failed");
        });
        Ok(format!("http://{addr}/api/ocr"))
    }

    fn client_for(url: String) -> Result<UmiOcrClient> {
        UmiOcrClient::new(&OcrConfig {
            url,
            timeout_secs: 5,
        })
    }

    fn request(mode: OcrMode) -> OcrRequest {
        OcrRequest {
            region: "test".to_owned(),
            png: vec![1, 2, 3],
            mode,
        }
    }

    #[tokio::test]
    async fn sends_expected_payload() -> Result<()> {
        let seen = Arc::new(Mutex::new(vec![]));
        let seen_by_handler = seen.clone();
        let router = Router::new().route(
            "/api/ocr",
            post(move |Json(payload): Json<Value>| {
                let seen = seen_by_handler.clone();
                async move {
                    seen.lock().expect("lock poisoned").push(payload);
                    Json(json!({ "code": 100, "data": "ZED 0099-A" }))
                }
            }),
        );
        let client = client_for(serve(router).await?)?;

        let result = client.recognize(request(OcrMode::Text)).await;
        assert_eq!(result, OcrResult::Text("ZED 0099-A".to_owned()));

        let payloads = seen.lock().expect("lock poisoned").clone();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["base64"], "AQID");
        assert_eq!(payloads[0]["options"]["data.format"], "text");
        assert_eq!(payloads[0]["options"]["tbpu.parser"], "single_line");
        Ok(())
    }

    #[tokio::test]
    async fn http_errors_degrade_to_empty() -> Result<()> {
        let router = Router::new().route(
            "/api/ocr",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = client_for(serve(router).await?)?;
        assert_eq!(
            client.recognize(request(OcrMode::Lines)).await,
            OcrResult::empty(OcrMode::Lines)
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_empty() -> Result<()> {
        // Bind and immediately drop a listener to find a port nobody uses.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        let client = client_for(format!("http://{addr}/api/ocr"))?;
        assert_eq!(
            client.recognize(request(OcrMode::Text)).await,
            OcrResult::empty(OcrMode::Text)
        );
        Ok(())
    }
}
