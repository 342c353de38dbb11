//! `reqwest` transport

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{multipart, Client};

use super::{parse_body, Headers, RawResponse, Transport, TransportError};
use crate::types::{GraphRequest, Method};

/// HTTP transport against the platform base URL
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connection(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("pagecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(classify)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn multipart_form(request: &GraphRequest) -> Result<multipart::Form, TransportError> {
        let mut form = multipart::Form::new();
        for (key, value) in &request.params {
            form = form.text(key.clone(), value.clone());
        }
        for media in &request.media {
            let part = multipart::Part::bytes(media.bytes.clone())
                .file_name(media.file_name.clone())
                .mime_str(&media.mime_type)
                .map_err(classify)?;
            form = form.part(media.field.clone(), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &GraphRequest) -> Result<RawResponse, TransportError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url).query(&request.params),
            Method::Post => self.client.post(&url).form(&request.params),
            Method::Multipart => self
                .client
                .post(&url)
                .multipart(Self::multipart_form(request)?),
        };
        builder = builder.timeout(request.method.timeout());
        if let Some(bearer) = request.bearer() {
            builder = builder.header(AUTHORIZATION, bearer);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();

        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let text = response.text().await.map_err(classify)?;
        Ok(RawResponse {
            status,
            headers,
            body: parse_body(status, &text),
        })
    }
}
