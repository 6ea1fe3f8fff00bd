//! S3-compatible REST transport

use super::ObjectTransport;
use crate::error::{ClientError, Result, TransportError, TransportResult};
use crate::types::{
    GetObjectOutput, ObjectBody, ObjectMetadata, PartRecord, PutObjectResult, SessionSummary,
};
use crate::Config;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client, Method, Response};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, instrument};
use url::Url;

const META_PREFIX: &str = "x-amz-meta-";

/// Transport speaking the S3 REST protocol over HTTP
#[derive(Clone, Debug)]
pub struct HttpTransport {
    endpoint: Url,
    access_token: Option<String>,
    http: Client,
}

impl HttpTransport {
    /// Create a transport from the client configuration
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ClientError::InvalidConfig(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(ClientError::InvalidConfig(format!(
                "endpoint {} cannot carry a path",
                config.endpoint
            )));
        }

        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ClientError::InvalidConfig(format!("invalid user agent: {}", e)))?;
        headers.insert(header::USER_AGENT, user_agent);

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            access_token: config.access_token.clone(),
            http,
        })
    }

    fn url(&self, bucket: &str, key: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket);
            if let Some(key) = key {
                segments.extend(key.split('/'));
            }
        }
        url
    }

    fn session_url(&self, bucket: &str, key: &str, session_id: &str) -> Url {
        let mut url = self.url(bucket, Some(key));
        url.query_pairs_mut().append_pair("uploadId", session_id);
        url
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> TransportResult<Response> {
        debug!("Sending {} request to {}", method, url);
        let mut req = self.http.request(method, url).headers(headers);

        if let Some(token) = &self.access_token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(body) = body {
            req = req.body(body);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::from_s3_xml(&text, status.as_u16()));
        }

        Ok(response)
    }
}

#[async_trait]
impl ObjectTransport for HttpTransport {
    #[instrument(skip(self, metadata))]
    async fn create_session(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> TransportResult<String> {
        let mut url = self.url(bucket, Some(key));
        url.query_pairs_mut().append_key_only("uploads");

        let response = self
            .request(Method::POST, url, metadata_headers(metadata)?, None)
            .await?;
        let result: InitiateMultipartUploadResult = parse_xml(&response.text().await?)?;
        Ok(result.upload_id)
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self, bucket: &str) -> TransportResult<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            let mut url = self.url(bucket, None);
            {
                let mut query = url.query_pairs_mut();
                query.append_key_only("uploads");
                if let Some(marker) = &key_marker {
                    query.append_pair("key-marker", marker);
                }
                if let Some(marker) = &upload_id_marker {
                    query.append_pair("upload-id-marker", marker);
                }
            }

            let response = self.request(Method::GET, url, HeaderMap::new(), None).await?;
            let page: ListMultipartUploadsResult = parse_xml(&response.text().await?)?;

            sessions.extend(page.uploads.into_iter().map(|upload| SessionSummary {
                key: upload.key,
                session_id: upload.upload_id,
                initiated: upload.initiated.as_deref().and_then(parse_timestamp),
            }));

            if !page.is_truncated {
                break;
            }
            key_marker = non_empty(page.next_key_marker);
            upload_id_marker = non_empty(page.next_upload_id_marker);
            if key_marker.is_none() && upload_id_marker.is_none() {
                return Err(TransportError::InvalidResponse(
                    "truncated upload listing without a continuation marker".to_string(),
                ));
            }
        }

        Ok(sessions)
    }

    #[instrument(skip(self, body), fields(len = body.len()))]
    async fn submit_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> TransportResult<String> {
        let mut url = self.session_url(bucket, key, session_id);
        url.query_pairs_mut()
            .append_pair("partNumber", &part_number.to_string());

        let response = self
            .request(Method::PUT, url, HeaderMap::new(), Some(Body::from(body)))
            .await?;
        etag_header(&response)
            .ok_or_else(|| TransportError::InvalidResponse("Missing ETag".to_string()))
    }

    #[instrument(skip(self))]
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> TransportResult<Vec<PartRecord>> {
        let mut parts = Vec::new();
        let mut marker: Option<u32> = None;

        loop {
            let mut url = self.session_url(bucket, key, session_id);
            if let Some(marker) = marker {
                url.query_pairs_mut()
                    .append_pair("part-number-marker", &marker.to_string());
            }

            let response = self.request(Method::GET, url, HeaderMap::new(), None).await?;
            let page: ListPartsResult = parse_xml(&response.text().await?)?;

            parts.extend(page.parts.into_iter().map(|part| PartRecord {
                part_number: part.part_number,
                etag: part.etag.trim_matches('"').to_string(),
            }));

            if !page.is_truncated {
                break;
            }
            match page.next_part_number_marker {
                Some(next) if Some(next) != marker => marker = Some(next),
                _ => {
                    return Err(TransportError::InvalidResponse(
                        "truncated part listing without a new part-number-marker".to_string(),
                    ))
                }
            }
        }

        Ok(parts)
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[PartRecord],
    ) -> TransportResult<String> {
        let url = self.session_url(bucket, key, session_id);

        let mut xml = String::from("<CompleteMultipartUpload>");
        for part in parts {
            xml.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
                part.part_number,
                quick_xml::escape::escape(part.etag.as_str())
            ));
        }
        xml.push_str("</CompleteMultipartUpload>");

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));

        let response = self
            .request(Method::POST, url, headers, Some(Body::from(xml)))
            .await?;
        let text = response.text().await?;

        // S3 may report a failed completion inside a 200 response
        if text.contains("<Error>") {
            return Err(TransportError::from_s3_xml(&text, 200));
        }

        let result: CompleteMultipartUploadResult = parse_xml(&text)?;
        Ok(result
            .etag
            .map(|etag| etag.trim_matches('"').to_string())
            .unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> TransportResult<()> {
        let url = self.session_url(bucket, key, session_id);
        self.request(Method::DELETE, url, HeaderMap::new(), None).await?;
        Ok(())
    }

    #[instrument(skip(self, body, metadata))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> TransportResult<PutObjectResult> {
        let url = self.url(bucket, Some(key));
        let mut headers = metadata_headers(metadata)?;
        if let Some(len) = body.content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }

        let stream = Body::wrap_stream(ReaderStream::new(body.reader));
        let response = self.request(Method::PUT, url, headers, Some(stream)).await?;

        Ok(PutObjectResult {
            etag: etag_header(&response).unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> TransportResult<GetObjectOutput> {
        let url = self.url(bucket, Some(key));
        let response = match self.request(Method::GET, url, HeaderMap::new(), None).await {
            Err(e) if e.is_not_found() => {
                return Err(TransportError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            other => other?,
        };

        let headers = response.headers();
        let etag = etag_header(&response).unwrap_or_default();
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .or_else(|| response.content_length())
            .unwrap_or(0);
        let metadata = response_metadata(headers);

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

        Ok(GetObjectOutput {
            body: Box::pin(StreamReader::new(stream)),
            metadata,
            content_length,
            etag,
        })
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        let url = self.url(bucket, Some(key));
        match self.request(Method::DELETE, url, HeaderMap::new(), None).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

// ==================== Headers ====================

fn metadata_headers(metadata: &ObjectMetadata) -> TransportResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(ct) = &metadata.content_type {
        let value = HeaderValue::from_str(ct)
            .map_err(|e| TransportError::InvalidRequest(format!("content type {}: {}", ct, e)))?;
        headers.insert(header::CONTENT_TYPE, value);
    }
    for (k, v) in &metadata.user_metadata {
        let name = HeaderName::from_bytes(format!("{}{}", META_PREFIX, k).as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("metadata key {}: {}", k, e)))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| TransportError::InvalidRequest(format!("metadata value for {}: {}", k, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn response_metadata(headers: &HeaderMap) -> ObjectMetadata {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut user_metadata = HashMap::new();
    for (name, value) in headers.iter() {
        if let Some(key) = name.as_str().strip_prefix(META_PREFIX) {
            if let Ok(v) = value.to_str() {
                user_metadata.insert(key.to_string(), v.to_string());
            }
        }
    }

    ObjectMetadata {
        content_type,
        user_metadata,
    }
}

fn etag_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
}

// ==================== Response Parsers ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListMultipartUploadsResult {
    #[serde(default)]
    is_truncated: bool,
    next_key_marker: Option<String>,
    next_upload_id_marker: Option<String>,
    #[serde(default, rename = "Upload")]
    uploads: Vec<UploadEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadEntry {
    key: String,
    upload_id: String,
    initiated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPartsResult {
    #[serde(default)]
    is_truncated: bool,
    next_part_number_marker: Option<u32>,
    #[serde(default, rename = "Part")]
    parts: Vec<PartEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PartEntry {
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag")]
    etag: Option<String>,
}

fn parse_xml<T: serde::de::DeserializeOwned>(xml: &str) -> TransportResult<T> {
    quick_xml::de::from_str(xml).map_err(|e| TransportError::XmlParse(e.to_string()))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
