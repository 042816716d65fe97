//! Per-shape translation between descriptors and transport values.
//!
//! # Design
//! Each adapter is a stateless unit struct. `adapt` is pure construction of a
//! `TransportRequest` from the descriptor fields relevant to its shape;
//! `unwrap` turns a `TransportResponse` into the shape's payload type. The
//! registry attaches retry policy and injected headers afterwards, so adapters
//! never see registry state and can be shared across threads freely.
//!
//! Parameter placement is shared by all shapes: query string for `GET`,
//! `HEAD` and `DELETE`; form-encoded body for other methods when no raw body
//! is set; query string otherwise.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use url::form_urlencoded;
use uuid::Uuid;

use crate::descriptor::{FormItem, RequestDescriptor, SeqId};
use crate::error::ModelError;
use crate::http::{HttpMethod, RequestKind, ResponseMeta, TransportRequest, TransportResponse};
use crate::policy::RetryPolicy;

const CONTENT_TYPE: &str = "Content-Type";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded; charset=UTF-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Translator for one request shape.
pub trait KindAdapter: Send + Sync + 'static {
    type Output: Send + 'static;

    fn kind(&self) -> RequestKind;

    fn adapt(&self, seq_id: SeqId, descriptor: &RequestDescriptor) -> TransportRequest;

    fn unwrap(
        &self,
        response: TransportResponse,
    ) -> Result<(ResponseMeta, Option<Self::Output>), ModelError>;
}

/// Text responses, decoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextAdapter;

impl KindAdapter for TextAdapter {
    type Output = String;

    fn kind(&self) -> RequestKind {
        RequestKind::Text
    }

    fn adapt(&self, seq_id: SeqId, descriptor: &RequestDescriptor) -> TransportRequest {
        base_request(seq_id, self.kind(), descriptor.method, descriptor)
    }

    fn unwrap(
        &self,
        response: TransportResponse,
    ) -> Result<(ResponseMeta, Option<String>), ModelError> {
        let (meta, body) = split(response);
        Ok((meta, body.map(utf8).transpose()?))
    }
}

/// Raw bytes in, raw bytes out.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryAdapter;

impl KindAdapter for BinaryAdapter {
    type Output = Vec<u8>;

    fn kind(&self) -> RequestKind {
        RequestKind::Binary
    }

    fn adapt(&self, seq_id: SeqId, descriptor: &RequestDescriptor) -> TransportRequest {
        let mut request = base_request(seq_id, self.kind(), descriptor.method, descriptor);
        if descriptor.body.is_some() && request.header(CONTENT_TYPE).is_none() {
            request.set_header(CONTENT_TYPE, OCTET_STREAM);
        }
        request
    }

    fn unwrap(
        &self,
        response: TransportResponse,
    ) -> Result<(ResponseMeta, Option<Vec<u8>>), ModelError> {
        Ok(split(response))
    }
}

/// Multipart form uploads. Always `POST`; the raw body is ignored in favour
/// of the descriptor's form items.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadAdapter;

impl KindAdapter for UploadAdapter {
    type Output = String;

    fn kind(&self) -> RequestKind {
        RequestKind::Upload
    }

    fn adapt(&self, seq_id: SeqId, descriptor: &RequestDescriptor) -> TransportRequest {
        let mut request = TransportRequest {
            seq_id,
            kind: self.kind(),
            method: HttpMethod::Post,
            url: with_query(&descriptor.url, &encode_params(&descriptor.params)),
            headers: sorted_headers(&descriptor.headers),
            body: None,
            destination: None,
            retry: RetryPolicy::default(),
        };
        let boundary = format!("courier-{}", Uuid::new_v4().simple());
        request.body = Some(encode_multipart(&boundary, &descriptor.form_items));
        request.set_header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        );
        request
    }

    fn unwrap(
        &self,
        response: TransportResponse,
    ) -> Result<(ResponseMeta, Option<String>), ModelError> {
        let (meta, body) = split(response);
        Ok((meta, body.map(utf8).transpose()?))
    }
}

/// In-memory downloads. Always `GET`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadAdapter;

impl KindAdapter for DownloadAdapter {
    type Output = Vec<u8>;

    fn kind(&self) -> RequestKind {
        RequestKind::Download
    }

    fn adapt(&self, seq_id: SeqId, descriptor: &RequestDescriptor) -> TransportRequest {
        base_request(seq_id, self.kind(), HttpMethod::Get, descriptor)
    }

    fn unwrap(
        &self,
        response: TransportResponse,
    ) -> Result<(ResponseMeta, Option<Vec<u8>>), ModelError> {
        Ok(split(response))
    }
}

/// Downloads streamed to a file by the transport. Always `GET`; the payload is
/// the path the transport reports having written.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadFileAdapter;

impl KindAdapter for DownloadFileAdapter {
    type Output = PathBuf;

    fn kind(&self) -> RequestKind {
        RequestKind::DownloadFile
    }

    fn adapt(&self, seq_id: SeqId, descriptor: &RequestDescriptor) -> TransportRequest {
        let mut request = base_request(seq_id, self.kind(), HttpMethod::Get, descriptor);
        request.destination = descriptor.file_path.clone();
        request
    }

    fn unwrap(
        &self,
        response: TransportResponse,
    ) -> Result<(ResponseMeta, Option<PathBuf>), ModelError> {
        let meta = ResponseMeta {
            status: response.status,
            headers: response.headers,
        };
        Ok((meta, response.saved_to))
    }
}

fn base_request(
    seq_id: SeqId,
    kind: RequestKind,
    method: HttpMethod,
    descriptor: &RequestDescriptor,
) -> TransportRequest {
    let query = encode_params(&descriptor.params);
    let mut request = TransportRequest {
        seq_id,
        kind,
        method,
        url: descriptor.url.clone(),
        headers: sorted_headers(&descriptor.headers),
        body: None,
        destination: None,
        retry: RetryPolicy::default(),
    };

    if method.is_query_only() {
        request.url = with_query(&descriptor.url, &query);
    } else if let Some(body) = &descriptor.body {
        request.url = with_query(&descriptor.url, &query);
        request.body = Some(body.clone());
    } else if !query.is_empty() {
        request.body = Some(query.into_bytes());
        if request.header(CONTENT_TYPE).is_none() {
            request.set_header(CONTENT_TYPE, FORM_URLENCODED);
        }
    }
    request
}

fn split(response: TransportResponse) -> (ResponseMeta, Option<Vec<u8>>) {
    let meta = ResponseMeta {
        status: response.status,
        headers: response.headers,
    };
    (meta, response.body)
}

fn utf8(bytes: Vec<u8>) -> Result<String, ModelError> {
    String::from_utf8(bytes)
        .map_err(|e| ModelError::decode(format!("response body is not valid UTF-8: {e}")))
}

fn sorted_headers(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut list: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    list.sort();
    list
}

/// Form-encode parameters in key order so adapted requests are reproducible.
fn encode_params(params: &HashMap<String, Value>) -> String {
    let mut entries: Vec<(&String, &Value)> = params.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in entries {
        match value {
            Value::String(s) => serializer.append_pair(key, s),
            other => serializer.append_pair(key, &other.to_string()),
        };
    }
    serializer.finish()
}

fn with_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&{query}")
    } else {
        format!("{url}?{query}")
    }
}

fn encode_multipart(boundary: &str, items: &[FormItem]) -> Vec<u8> {
    let mut body = Vec::new();
    for item in items {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let disposition = match &item.file_name {
            Some(file) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                quote(&item.name),
                quote(file)
            ),
            None => format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n",
                quote(&item.name)
            ),
        };
        body.extend_from_slice(disposition.as_bytes());
        if let Some(content_type) = &item.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&item.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(url: &str, method: HttpMethod) -> RequestDescriptor {
        let mut d = RequestDescriptor::new();
        d.url = url.to_string();
        d.method = method;
        d
    }

    #[test]
    fn get_params_go_to_query_in_key_order() {
        let mut d = descriptor("http://h/a", HttpMethod::Get);
        d.param("q", "two words").param("page", 2).param("all", true);
        let req = TextAdapter.adapt(SeqId::new(1), &d);
        assert_eq!(req.url, "http://h/a?all=true&page=2&q=two+words");
        assert!(req.body.is_none());
        assert_eq!(req.kind, RequestKind::Text);
    }

    #[test]
    fn query_is_appended_to_existing_query() {
        let mut d = descriptor("http://h/a?x=1", HttpMethod::Delete);
        d.param("y", "2");
        let req = TextAdapter.adapt(SeqId::new(1), &d);
        assert_eq!(req.url, "http://h/a?x=1&y=2");
    }

    #[test]
    fn post_params_become_form_body() {
        let mut d = descriptor("http://h/a", HttpMethod::Post);
        d.param("name", "a&b");
        let req = TextAdapter.adapt(SeqId::new(3), &d);
        assert_eq!(req.url, "http://h/a");
        assert_eq!(req.body.as_deref(), Some(&b"name=a%26b"[..]));
        assert_eq!(req.header("content-type"), Some(FORM_URLENCODED));
    }

    #[test]
    fn post_with_raw_body_keeps_params_in_query() {
        let mut d = descriptor("http://h/a", HttpMethod::Put);
        d.param("v", 1);
        d.body = Some(br#"{"x":1}"#.to_vec());
        d.header("Content-Type", "application/json");
        let req = TextAdapter.adapt(SeqId::new(3), &d);
        assert_eq!(req.url, "http://h/a?v=1");
        assert_eq!(req.body.as_deref(), Some(&br#"{"x":1}"#[..]));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn binary_defaults_octet_stream() {
        let mut d = descriptor("http://h/bin", HttpMethod::Post);
        d.body = Some(vec![0, 1, 2]);
        let req = BinaryAdapter.adapt(SeqId::new(1), &d);
        assert_eq!(req.header("Content-Type"), Some(OCTET_STREAM));
        assert_eq!(req.body, Some(vec![0, 1, 2]));
    }

    #[test]
    fn upload_is_multipart_post() {
        let mut d = descriptor("http://h/files", HttpMethod::Get);
        d.body = Some(b"ignored".to_vec());
        d.form_items.push(FormItem::field("title", "report"));
        d.form_items
            .push(FormItem::file("file", "a.txt", "text/plain", b"hello".to_vec()));
        let req = UploadAdapter.adapt(SeqId::new(1), &d);

        assert_eq!(req.method, HttpMethod::Post);
        let content_type = req.header("content-type").unwrap();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let body = String::from_utf8(req.body.clone().unwrap()).unwrap();
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains("name=\"title\"\r\n\r\nreport\r\n"));
        assert!(body.contains("name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n"));
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
        assert!(!body.contains("ignored"));
    }

    #[test]
    fn download_forces_get() {
        let mut d = descriptor("http://h/file", HttpMethod::Post);
        d.param("v", 2);
        let req = DownloadAdapter.adapt(SeqId::new(1), &d);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://h/file?v=2");
    }

    #[test]
    fn download_file_carries_destination() {
        let mut d = descriptor("http://h/file", HttpMethod::Get);
        d.file_path = Some(PathBuf::from("/tmp/out.bin"));
        let req = DownloadFileAdapter.adapt(SeqId::new(1), &d);
        assert_eq!(req.destination, Some(PathBuf::from("/tmp/out.bin")));
    }

    #[test]
    fn text_unwrap_decodes_utf8() {
        let resp = TransportResponse::new(200)
            .with_header("X-A", "1")
            .with_body("héllo");
        let (meta, text) = TextAdapter.unwrap(resp).unwrap();
        assert_eq!(meta.status, 200);
        assert_eq!(meta.header("x-a"), Some("1"));
        assert_eq!(text.as_deref(), Some("héllo"));
    }

    #[test]
    fn text_unwrap_rejects_invalid_utf8() {
        let resp = TransportResponse::new(200).with_body(vec![0xff, 0xfe]);
        let err = TextAdapter.unwrap(resp).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Decode);
    }

    #[test]
    fn missing_body_is_not_an_error() {
        let (_, text) = TextAdapter.unwrap(TransportResponse::new(204)).unwrap();
        assert!(text.is_none());
        let (_, path) = DownloadFileAdapter.unwrap(TransportResponse::new(200)).unwrap();
        assert!(path.is_none());
    }

    #[test]
    fn json_params_use_json_text() {
        let mut params = HashMap::new();
        params.insert("ids".to_string(), json!([1, 2]));
        assert_eq!(encode_params(&params), "ids=%5B1%2C2%5D");
    }
}
