//! Gateway view of an incoming HTTP request.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::header::{COOKIE, HOST};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use bytes::{BufMut, Bytes};
use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::handler::error::HandlerError;
use crate::handler::recycle::Recycle;
use crate::handler::tree::DataTree;
use crate::handler::uploads::{UploadPolicy, Uploads};
use crate::http::attributes::Attributes;
use crate::pool::{Codec, Payload};
use crate::security::TrustedResolver;

/// Request extension marking a connection as TLS terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secure;

/// Body forwarded to the worker.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Forwarded unchanged.
    Raw(Bytes),
    /// Parsed form data, serialized as JSON.
    Form(DataTree),
}

#[derive(Debug, Default)]
pub struct Request {
    pub remote_addr: String,
    pub protocol: String,
    pub method: String,
    pub uri: String,
    pub headers: HashMap<String, Vec<String>>,
    pub cookies: HashMap<String, String>,
    pub raw_query: String,
    /// True when the body was parsed into form data.
    pub parsed: bool,
    pub uploads: Option<Uploads>,
    pub attributes: HashMap<String, Vec<String>>,
    pub body: RequestBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestContext<'a> {
    remote_addr: &'a str,
    protocol: &'a str,
    method: &'a str,
    uri: &'a str,
    headers: &'a HashMap<String, Vec<String>>,
    cookies: &'a HashMap<String, String>,
    raw_query: &'a str,
    parsed: bool,
    uploads: Option<&'a Uploads>,
    attributes: &'a HashMap<String, Vec<String>>,
}

impl Request {
    /// Copy request metadata from the transport request.
    pub fn fill(&mut self, parts: &mut Parts, peer: SocketAddr, trusted: &TrustedResolver) {
        self.remote_addr = trusted.resolve(&parts.headers, peer);

        self.protocol.clear();
        self.protocol.push_str(&format!("{:?}", parts.version));

        self.method.clear();
        self.method.push_str(parts.method.as_str());

        self.uri = full_uri(parts);

        self.raw_query.clear();
        self.raw_query.push_str(&strip_line_breaks(parts.uri.query().unwrap_or_default()));

        self.headers.clear();
        for (name, value) in &parts.headers {
            self.headers
                .entry(canonical_header_key(name.as_str()))
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        self.cookies.clear();
        collect_cookies(&parts.headers, &mut self.cookies);

        self.attributes = parts
            .extensions
            .remove::<Attributes>()
            .map(Attributes::into_inner)
            .unwrap_or_default();
    }

    pub async fn open_uploads(&mut self, policy: &UploadPolicy) {
        if let Some(uploads) = &mut self.uploads {
            uploads.open(policy).await;
        }
    }

    pub fn close_uploads(&mut self) {
        if let Some(mut uploads) = self.uploads.take() {
            uploads.close();
        }
    }

    /// Encode the request into a worker payload.
    ///
    /// In raw mode only unparsed bodies are accepted.
    pub fn encode(&self, payload: &mut Payload, raw_body: bool) -> Result<(), HandlerError> {
        if payload.codec != Codec::Json {
            return Err(HandlerError::UnsupportedCodec(payload.codec));
        }

        let context = RequestContext {
            remote_addr: &self.remote_addr,
            protocol: &self.protocol,
            method: &self.method,
            uri: &self.uri,
            headers: &self.headers,
            cookies: &self.cookies,
            raw_query: &self.raw_query,
            parsed: self.parsed,
            uploads: self.uploads.as_ref().filter(|uploads| !uploads.is_empty()),
            attributes: &self.attributes,
        };
        serde_json::to_writer((&mut payload.context).writer(), &context)
            .map_err(HandlerError::Encode)?;

        match &self.body {
            RequestBody::Empty => {}
            RequestBody::Raw(bytes) => payload.body.extend_from_slice(bytes),
            RequestBody::Form(_) if raw_body => return Err(HandlerError::BodyMismatch),
            RequestBody::Form(data) => {
                serde_json::to_writer((&mut payload.body).writer(), data)
                    .map_err(HandlerError::Encode)?;
            }
        }
        Ok(())
    }
}

impl Recycle for Request {
    fn recycle(&mut self) {
        self.close_uploads();
        self.remote_addr.clear();
        self.protocol.clear();
        self.method.clear();
        self.uri.clear();
        self.headers.clear();
        self.cookies.clear();
        self.raw_query.clear();
        self.parsed = false;
        self.attributes.clear();
        self.body = RequestBody::Empty;
    }
}

/// `content-type` → `Content-Type`.
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn strip_line_breaks(value: &str) -> String {
    value.replace(['\r', '\n'], "")
}

/// Absolute request URI with scheme and host.
fn full_uri(parts: &Parts) -> String {
    if parts.uri.authority().is_some() {
        return strip_line_breaks(&parts.uri.to_string());
    }

    let scheme = if parts.extensions.get::<Secure>().is_some() {
        "https"
    } else {
        "http"
    };
    let host = parts
        .headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or_default();
    let path = parts
        .uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");

    strip_line_breaks(&format!("{scheme}://{host}{path}"))
}

/// Cookies whose value fails to unescape are left out.
fn collect_cookies(headers: &HeaderMap, cookies: &mut HashMap<String, String>) {
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for pair in header.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            if let Some(value) = query_unescape(value) {
                cookies.insert(name.to_owned(), value);
            }
        }
    }
}

fn query_unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let value = value.replace('+', " ");
    Some(percent_decode_str(&value).decode_utf8_lossy().into_owned())
}
