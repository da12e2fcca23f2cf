use crate::events::UpstreamEvent;
use crate::models::StoredFile;
use crate::validate::ValidatedParams;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use std::pin::Pin;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

/// Used when the caller does not name a model.
pub const DEFAULT_MODEL_NAME: &str = "google/gemini-2.0-flash-exp:free";

const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent, GenerationError>> + Send>>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation service returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream read error: {0}")]
    Lines(#[from] LinesCodecError),

    #[error("Invalid upstream event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Stream(String),
}

// ============================================================================
// Request / Output
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub header: String,
    pub description: String,
    pub api_key: String,
    pub files: Vec<StoredFile>,
    pub model_name: String,
}

impl GenerationRequest {
    pub fn from_params(params: ValidatedParams, files: Vec<StoredFile>) -> Self {
        Self {
            header: params.header,
            description: params.description,
            api_key: params.api_key,
            files,
            model_name: params.model_name,
        }
    }
}

pub struct GenerationOutput {
    pub stream: Option<EventStream>,
}

impl GenerationOutput {
    pub fn streaming(stream: EventStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn empty() -> Self {
        Self { stream: None }
    }
}

// ============================================================================
// Client seam
// ============================================================================

/// The external question-generation service.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError>;
}

/// Talks to the generation service over HTTP.
///
/// POST `<base_url>/generate` as multipart; the response body is one JSON
/// event per line, optionally SSE-framed with `data:`.
#[derive(Debug, Clone)]
pub struct HttpQuestionGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuestionGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/generate", self.base_url.trim_end_matches('/'))
    }

    async fn build_form(request: &GenerationRequest) -> Result<Form, GenerationError> {
        let mut form = Form::new()
            .text("questionHeader", request.header.clone())
            .text("questionDescription", request.description.clone())
            .text("apiKey", request.api_key.clone())
            .text("modelName", request.model_name.clone());

        for file in &request.files {
            let data = tokio::fs::read(&file.path).await?;
            let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
            let part = Part::bytes(data)
                .file_name(file.filename.clone())
                .mime_str(mime.as_ref())?;
            form = form.part("files", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        let form = Self::build_form(&request).await?;

        log::debug!(
            "Calling generation service {} (model {}, {} files)",
            self.endpoint(),
            request.model_name,
            request.files.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&request.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(GenerationOutput::empty());
        }

        Ok(GenerationOutput::streaming(decode_event_lines(
            response.bytes_stream(),
        )))
    }
}

// ============================================================================
// Line decoding
// ============================================================================

enum Line<'a> {
    Skip,
    Done,
    Event(&'a str),
}

fn classify_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty()
        || line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
    {
        return Line::Skip;
    }

    let payload = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    match payload {
        "" => Line::Skip,
        "[DONE]" => Line::Done,
        payload => Line::Event(payload),
    }
}

/// Lazily turn a byte body into upstream events, one JSON document per line.
pub fn decode_event_lines<S, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = StreamReader::new(Box::pin(body.map(|r| r.map_err(std::io::Error::other))));
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    Box::pin(async_stream::stream! {
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield Err(GenerationError::from(e));
                    break;
                }
            };
            match classify_line(&line) {
                Line::Skip => continue,
                Line::Done => break,
                Line::Event(payload) => {
                    yield serde_json::from_str::<UpstreamEvent>(payload).map_err(GenerationError::from);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Multipart;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn body(chunks: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let chunks: Vec<Result<Bytes, std::io::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        futures::stream::iter(chunks)
    }

    async fn collect(stream: EventStream) -> Vec<Result<UpstreamEvent, GenerationError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_decodes_ndjson_split_across_chunks() {
        let events = collect(decode_event_lines(body(&[
            "{\"Formatter\":{\"messa",
            "ges\":[{\"content\":\"Q1\"}]}}\n{\"Planner\":{}}\n",
        ])))
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().agent_tag(), Some("Formatter"));
        assert_eq!(events[1].as_ref().unwrap().agent_tag(), Some("Planner"));
    }

    #[tokio::test]
    async fn test_decodes_sse_framing_and_stops_at_done() {
        let events = collect(decode_event_lines(body(&[
            ": ping\n",
            "event: message\n",
            "data: {\"Formatter\":{\"messages\":[]}}\n\n",
            "data: [DONE]\n\n",
            "data: {\"Formatter\":{\"messages\":[]}}\n\n",
        ])))
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap().as_value(),
            &json!({ "Formatter": { "messages": [] } })
        );
    }

    #[tokio::test]
    async fn test_invalid_line_yields_decode_error() {
        let events = collect(decode_event_lines(body(&["not json\n"]))).await;
        assert!(matches!(events[0], Err(GenerationError::Decode(_))));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"Formatter\":{}}\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let events = collect(decode_event_lines(futures::stream::iter(chunks))).await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].as_ref().unwrap_err().to_string().contains("connection reset"));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let generator = HttpQuestionGenerator::new("http://localhost:8000/");
        assert_eq!(generator.endpoint(), "http://localhost:8000/generate");
    }

    // ------------------------------------------------------------------------
    // HTTP adapter against a local generation service
    // ------------------------------------------------------------------------

    /// What the fake generation service saw in the last request.
    #[derive(Debug, Default)]
    struct Received {
        authorization: Option<String>,
        texts: Vec<(String, String)>,
        files: Vec<(String, String, Vec<u8>)>,
    }

    async fn serve(status: StatusCode, body: &'static str) -> (String, Arc<Mutex<Received>>) {
        let received = Arc::new(Mutex::new(Received::default()));
        let captured = received.clone();

        let app = Router::new().route(
            "/generate",
            post(move |headers: HeaderMap, mut multipart: Multipart| {
                let captured = captured.clone();
                async move {
                    let mut seen = Received {
                        authorization: headers
                            .get(axum::http::header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string),
                        ..Default::default()
                    };
                    while let Some(field) = multipart.next_field().await.unwrap() {
                        let name = field.name().unwrap_or_default().to_string();
                        match field.file_name().map(str::to_string) {
                            Some(file_name) => {
                                let data = field.bytes().await.unwrap().to_vec();
                                seen.files.push((name, file_name, data));
                            }
                            None => seen.texts.push((name, field.text().await.unwrap())),
                        }
                    }
                    *captured.lock().unwrap() = seen;
                    (status, body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), received)
    }

    fn request_with_file(dir: &TempDir) -> GenerationRequest {
        let path = dir.path().join("1700000000000.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        GenerationRequest {
            header: "Optics".to_string(),
            description: "Ten MCQs".to_string(),
            api_key: "sk-test".to_string(),
            files: vec![StoredFile {
                filename: "1700000000000.pdf".to_string(),
                path,
            }],
            model_name: DEFAULT_MODEL_NAME.to_string(),
        }
    }

    #[tokio::test]
    async fn test_http_generate_streams_events_and_sends_form() {
        let (url, received) = serve(
            StatusCode::OK,
            "{\"Formatter\":{\"messages\":[{\"content\":\"Q1\"}]}}\n{\"Planner\":{}}\n",
        )
        .await;
        let dir = TempDir::new().unwrap();
        let generator = HttpQuestionGenerator::new(url);

        let output = generator.generate(request_with_file(&dir)).await.unwrap();
        let events = collect(output.stream.expect("stream")).await;

        let tags: Vec<Option<String>> = events
            .iter()
            .map(|e| e.as_ref().unwrap().agent_tag().map(str::to_string))
            .collect();
        assert_eq!(tags, vec![Some("Formatter".to_string()), Some("Planner".to_string())]);

        let received = received.lock().unwrap();
        assert_eq!(received.authorization.as_deref(), Some("Bearer sk-test"));
        assert_eq!(
            received.texts,
            vec![
                ("questionHeader".to_string(), "Optics".to_string()),
                ("questionDescription".to_string(), "Ten MCQs".to_string()),
                ("apiKey".to_string(), "sk-test".to_string()),
                ("modelName".to_string(), DEFAULT_MODEL_NAME.to_string()),
            ]
        );
        assert_eq!(
            received.files,
            vec![(
                "files".to_string(),
                "1700000000000.pdf".to_string(),
                b"%PDF-1.4".to_vec()
            )]
        );
    }

    #[tokio::test]
    async fn test_http_generate_error_status() {
        let (url, _) = serve(StatusCode::INTERNAL_SERVER_ERROR, "overloaded").await;
        let dir = TempDir::new().unwrap();
        let generator = HttpQuestionGenerator::new(url);

        match generator.generate(request_with_file(&dir)).await {
            Err(GenerationError::Upstream { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "overloaded");
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an upstream error"),
        }
    }

    #[tokio::test]
    async fn test_http_generate_no_content_has_no_stream() {
        let (url, _) = serve(StatusCode::NO_CONTENT, "").await;
        let dir = TempDir::new().unwrap();
        let generator = HttpQuestionGenerator::new(url);

        let output = generator.generate(request_with_file(&dir)).await.unwrap();
        assert!(output.stream.is_none());
    }

    #[tokio::test]
    async fn test_http_generate_missing_staged_file() {
        let (url, received) = serve(StatusCode::OK, "").await;
        let dir = TempDir::new().unwrap();
        let mut request = request_with_file(&dir);
        std::fs::remove_file(&request.files[0].path).unwrap();
        request.files[0].filename = "gone.pdf".to_string();

        match HttpQuestionGenerator::new(url).generate(request).await {
            Err(GenerationError::Io(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an IO error"),
        }
        assert!(received.lock().unwrap().authorization.is_none());
    }
}
