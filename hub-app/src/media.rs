//! Request/response clients for thumbnail images, teaser videos and text
//! strategy advice.
//!
//! Blocking `reqwest`; callers on the async runtime go through
//! `spawn_blocking`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";
pub const ADVICE_MODEL: &str = "gemini-3-flash-preview";

pub const STRATEGIST_INSTRUCTION: &str = "You are 'Elite Channel Strategist', a world-class YouTube growth expert. Help users optimize titles, thumbnails, and viral concepts.";
pub const NO_RESPONSE: &str = "No response received.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub fn thumbnail_prompt(prompt: &str) -> String {
    format!(
        "Create a viral YouTube thumbnail visual for: \"{prompt}\". \
         Style: High contrast, vibrant colors, \"MrBeast\" style expressions or high-action cinematic scenes, \
         clutter-free composition, professional lighting, 4K quality. NO TEXT in the image."
    )
}

pub fn teaser_prompt(prompt: &str) -> String {
    format!(
        "Cinematic YouTube video intro/teaser about: {prompt}. \
         Dynamic movement, vibrant colors, professional grade."
    )
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

/// A generated image or video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailAsset {
    pub id: String,
    /// `data:` URL for images, download URL for videos (empty when the
    /// operation produced no video).
    pub url: String,
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub created_at: DateTime<Utc>,
}

impl ThumbnailAsset {
    pub fn new(kind: AssetKind, url: String, prompt: &str) -> Self {
        let created_at = Utc::now();
        let prefix = match kind {
            AssetKind::Image => "img",
            AssetKind::Video => "vid",
        };
        Self {
            id: format!("{prefix}-{}", created_at.timestamp_millis()),
            url,
            prompt: prompt.to_string(),
            kind,
            created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    fn inline_image(&self) -> Option<&str> {
        self.first_parts()
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
            .filter(|d| !d.is_empty())
    }

    fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .concat()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<VideoResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResponse {
    #[serde(default)]
    generate_video_response: Option<GeneratedSamples>,
    #[serde(default)]
    generated_videos: Vec<GeneratedVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedSamples {
    #[serde(default)]
    generated_samples: Vec<GeneratedVideo>,
}

#[derive(Debug, Default, Deserialize)]
struct GeneratedVideo {
    #[serde(default)]
    video: Option<VideoRef>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoRef {
    #[serde(default)]
    uri: Option<String>,
}

impl Operation {
    fn video_uri(&self) -> Option<&str> {
        let response = self.response.as_ref()?;
        response
            .generate_video_response
            .as_ref()
            .map_or(&response.generated_videos, |r| &r.generated_samples)
            .first()
            .and_then(|v| v.video.as_ref())
            .and_then(|v| v.uri.as_deref())
            .filter(|uri| !uri.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct MediaClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
}

impl MediaClient {
    pub fn new(api_key: impl Into<String>, poll_interval: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: API_BASE.into(),
            poll_interval,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// One 16:9 thumbnail as a `data:image/png;base64,` URL.
    pub fn generate_thumbnail(&self, prompt: &str) -> Result<ThumbnailAsset> {
        let body = json!({
            "contents": [{ "parts": [{ "text": thumbnail_prompt(prompt) }] }],
            "generationConfig": { "imageConfig": { "aspectRatio": "16:9" } },
        });
        let response: GenerateContentResponse =
            self.post_json(&format!("models/{IMAGE_MODEL}:generateContent"), &body)?;
        let data = response
            .inline_image()
            .ok_or_else(|| anyhow!("No image generated"))?;
        info!(bytes = data.len(), "thumbnail generated");
        Ok(ThumbnailAsset::new(
            AssetKind::Image,
            format!("data:image/png;base64,{data}"),
            prompt,
        ))
    }

    /// Start a teaser video and poll until the operation is done.
    pub fn generate_teaser(&self, prompt: &str) -> Result<ThumbnailAsset> {
        let body = json!({
            "instances": [{ "prompt": teaser_prompt(prompt) }],
            "parameters": { "sampleCount": 1, "resolution": "720p", "aspectRatio": "16:9" },
        });
        let mut operation: Operation =
            self.post_json(&format!("models/{VIDEO_MODEL}:predictLongRunning"), &body)?;
        info!(operation = %operation.name, "teaser generation started");

        let mut polls = 0u32;
        while !operation.done {
            std::thread::sleep(self.poll_interval);
            polls += 1;
            debug!(operation = %operation.name, polls, "polling teaser operation");
            operation = self.get_json(&operation.name)?;
        }

        if let Some(err) = operation.error {
            bail!("video generation failed ({}): {}", err.code, err.message);
        }
        let url = operation
            .video_uri()
            .map(|uri| teaser_url(uri, &self.api_key))
            .unwrap_or_default();
        info!(polls, has_video = !url.is_empty(), "teaser generation finished");
        Ok(ThumbnailAsset::new(AssetKind::Video, url, prompt))
    }

    /// One-shot text advice from the channel strategist persona.
    pub fn strategy_advice(&self, message: &str) -> Result<String> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": STRATEGIST_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": message }] }],
        });
        let response: GenerateContentResponse =
            self.post_json(&format!("models/{ADVICE_MODEL}:generateContent"), &body)?;
        let text = response.text();
        Ok(if text.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            text
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn post_json<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .with_context(|| format!("request to {path} failed"))?;
        decode_response(response, path)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .with_context(|| format!("request to {path} failed"))?;
        decode_response(response, path)
    }
}

fn decode_response<T: DeserializeOwned>(response: reqwest::blocking::Response, path: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        bail!("{path} returned {status}: {}", body.trim());
    }
    response
        .json()
        .with_context(|| format!("invalid JSON from {path}"))
}

/// Download URL for a generated video.
pub fn teaser_url(uri: &str, api_key: &str) -> String {
    format!("{uri}&key={api_key}")
}

/// Payload of a `data:<mime>;base64,<payload>` URL.
pub fn data_url_payload(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    meta.ends_with(";base64").then_some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};

    /// Serve one canned JSON body per connection and return each request head.
    fn serve_json(bodies: Vec<&'static str>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = std::thread::spawn(move || {
            bodies
                .into_iter()
                .map(|body| {
                    let (mut stream, _) = listener.accept().unwrap();
                    let head = read_request(&stream);
                    write!(
                        stream,
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                    .unwrap();
                    head
                })
                .collect()
        });
        (base, server)
    }

    fn read_request(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut head = String::new();
        let mut length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.trim_end().is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap();
                }
            }
            head.push_str(&line);
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();
        head
    }

    /// Client for a loopback server; ignores any proxy set in the environment.
    fn local_client(base: &str) -> MediaClient {
        MediaClient {
            http: reqwest::blocking::Client::builder().no_proxy().build().unwrap(),
            api_key: "k".into(),
            base_url: API_BASE.into(),
            poll_interval: Duration::from_millis(1),
        }
        .with_base_url(format!("{base}/"))
    }

    #[test]
    fn teaser_polls_the_operation_until_done() {
        let (base, server) = serve_json(vec![
            r#"{"name":"operations/t1","done":false}"#,
            r#"{"name":"operations/t1"}"#,
            r#"{"name":"operations/t1","done":true,"response":{"generateVideoResponse":
                {"generatedSamples":[{"video":{"uri":"https://files/v1?alt=media"}}]}}}"#,
        ]);

        let asset = local_client(&base).generate_teaser("chess openings").unwrap();
        assert_eq!(asset.url, "https://files/v1?alt=media&key=k");

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with(&format!("POST /models/{VIDEO_MODEL}:predictLongRunning ")));
        assert!(requests[1].starts_with("GET /operations/t1 "));
        assert!(requests[2].starts_with("GET /operations/t1 "));
        assert!(requests
            .iter()
            .all(|r| r.to_ascii_lowercase().contains("x-goog-api-key: k")));
    }

    #[test]
    fn failed_teaser_operation_is_an_error() {
        let (base, server) = serve_json(vec![
            r#"{"name":"operations/t2","done":true,"error":{"code":400,"message":"prompt rejected"}}"#,
        ]);

        let err = local_client(&base).generate_teaser("x").unwrap_err();
        assert!(err.to_string().contains("prompt rejected"), "{err}");
        server.join().unwrap();
    }

    #[test]
    fn thumbnail_prompt_embeds_the_topic() {
        let prompt = thumbnail_prompt("I survived 100 days");
        assert!(prompt.starts_with("Create a viral YouTube thumbnail visual for: \"I survived 100 days\"."));
        assert!(prompt.ends_with("NO TEXT in the image."));
        assert!(!prompt.contains("  "));
    }

    #[test]
    fn teaser_prompt_embeds_the_topic() {
        assert_eq!(
            teaser_prompt("budget travel"),
            "Cinematic YouTube video intro/teaser about: budget travel. Dynamic movement, vibrant colors, professional grade."
        );
    }

    #[test]
    fn inline_image_is_the_first_part_with_data() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"here you go"},
                {"inlineData":{"mimeType":"image/png","data":"iVBORw0K"}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.inline_image(), Some("iVBORw0K"));
    }

    #[test]
    fn response_without_image_has_none() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"sorry"}]}}]}"#)
                .unwrap();
        assert_eq!(response.inline_image(), None);
        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.inline_image(), None);
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn advice_text_concatenates_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hook in "},{"text":"3 seconds."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "Hook in 3 seconds.");
    }

    #[test]
    fn video_uri_from_either_response_shape() {
        let rest: Operation = serde_json::from_str(
            r#"{"name":"models/veo/operations/1","done":true,"response":{
                "generateVideoResponse":{"generatedSamples":[{"video":{"uri":"https://v/1?alt=media"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(rest.video_uri(), Some("https://v/1?alt=media"));

        let sdk: Operation = serde_json::from_str(
            r#"{"name":"op","done":true,"response":{"generatedVideos":[{"video":{"uri":"https://v/2"}}]}}"#,
        )
        .unwrap();
        assert_eq!(sdk.video_uri(), Some("https://v/2"));

        let none: Operation = serde_json::from_str(r#"{"name":"op","done":true}"#).unwrap();
        assert_eq!(none.video_uri(), None);
    }

    #[test]
    fn teaser_url_appends_the_key() {
        assert_eq!(
            teaser_url("https://v/1?alt=media", "k123"),
            "https://v/1?alt=media&key=k123"
        );
    }

    #[test]
    fn data_url_payload_requires_base64() {
        assert_eq!(data_url_payload("data:image/png;base64,AAAA"), Some("AAAA"));
        assert_eq!(data_url_payload("data:text/plain,hello"), None);
        assert_eq!(data_url_payload("https://example.com"), None);
    }

    #[test]
    fn asset_serializes_kind_as_type() {
        let asset = ThumbnailAsset::new(AssetKind::Video, String::new(), "intro");
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["prompt"], "intro");
        assert!(json["id"].as_str().unwrap().starts_with("vid-"));
        assert!(json["createdAt"].is_string());
    }
}
