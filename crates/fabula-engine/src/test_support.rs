use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::Value;

use crate::imaging::{prepare_for_vision, CanonicalImage};
use crate::requests::{FewShotExample, GenerationRequest, SamplingParams};
use crate::retry::{RetryPolicy, Sleeper};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::ProviderContext;

/// Replays scripted responses in order and records every request it saw.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    seen: Mutex<Vec<(HttpRequest, Duration)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(Ok(HttpResponse::json(status, &body)));
    }

    pub fn push_bytes(&self, status: u16, content_type: &str, body: Vec<u8>) {
        self.push(Ok(HttpResponse {
            status,
            content_type: Some(content_type.to_string()),
            body,
        }));
    }

    pub fn push_error(&self, err: TransportError) {
        self.push(Err(err));
    }

    pub fn push(&self, entry: Result<HttpResponse, TransportError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|(request, _)| request.clone()).collect())
            .unwrap_or_default()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|(_, timeout)| *timeout).collect())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or_default()
    }

    pub fn last_body(&self) -> Value {
        self.requests()
            .last()
            .and_then(|request| request.json.clone())
            .unwrap_or(Value::Null)
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((request.clone(), timeout));
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| Err(TransportError::Other("fake transport script exhausted".into())))
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

pub fn context(transport: &Arc<FakeTransport>, sleeper: &Arc<RecordingSleeper>) -> ProviderContext {
    ProviderContext {
        transport: transport.clone(),
        sleeper: sleeper.clone(),
        retry: RetryPolicy::default(),
        base_timeout: Duration::from_secs(30),
        image_max_dimension: 2048,
    }
}

pub fn solid_image(width: u32, height: u32, pixel: [u8; 4]) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(pixel)))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("png encode");
    bytes.into_inner()
}

/// `images` small opaque images and `examples` numbered few-shot examples.
pub fn story_request(images: usize, examples: usize) -> GenerationRequest {
    GenerationRequest {
        images: (0..images)
            .map(|_| CanonicalImage::new(solid_image(8, 6, [120, 80, 40, 255])))
            .collect(),
        api_key: "sk-test-0123456789".to_string(),
        model: String::new(),
        sampling: SamplingParams::default(),
        few_shot_examples: (0..examples)
            .map(|idx| FewShotExample {
                image_base64: example_image(idx),
                story: format!("example story {idx}"),
            })
            .collect(),
    }
}

/// A few-shot image as the gateway hands it to adapters: a base64 JPEG whose
/// shade depends on `idx`.
pub fn example_image(idx: usize) -> String {
    let shade = (idx * 40 % 256) as u8;
    let image = CanonicalImage::new(solid_image(6, 4, [shade, 90, 160, 255]));
    prepare_for_vision(image, 2048).expect("example jpeg")
}

pub fn is_base64_jpeg(encoded: &str) -> bool {
    BASE64
        .decode(encoded)
        .map(|bytes| bytes.starts_with(&[0xFF, 0xD8]))
        .unwrap_or(false)
}
