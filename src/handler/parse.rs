//! Request body classification and form parsing.

use std::collections::HashMap;
use std::path::Path;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::handler::error::HandlerError;
use crate::handler::request::canonical_header_key;
use crate::handler::tree::DataTree;
use crate::handler::uploads::{FileHeader, FileRef, FileUpload, Uploads};

/// How a request body is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// HEAD and OPTIONS carry no body.
    None,
    /// Forwarded as raw bytes.
    Stream,
    UrlEncoded,
    Multipart,
}

pub fn content_kind(method: &Method, headers: &HeaderMap) -> ContentKind {
    if method == Method::HEAD || method == Method::OPTIONS {
        return ContentKind::None;
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("application/x-www-form-urlencoded") {
        ContentKind::UrlEncoded
    } else if content_type.contains("multipart/form-data") {
        ContentKind::Multipart
    } else {
        ContentKind::Stream
    }
}

/// Read the whole body. Size limits are enforced by the router layer.
pub async fn read_all(body: Body) -> Result<Bytes, HandlerError> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(HandlerError::Body)
}

pub fn parse_urlencoded(body: &[u8]) -> Result<DataTree, HandlerError> {
    let mut data = DataTree::new();
    for (name, value) in url::form_urlencoded::parse(body) {
        data.push(&name, vec![value.into_owned()])?;
    }
    Ok(data)
}

/// Parsed multipart form: values and the spooled files.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub data: DataTree,
    pub uploads: Uploads,
}

/// Stream a multipart body, spooling file parts into `spool_dir`.
///
/// File parts are grouped by field name so repeated fields mount as lists.
/// On error every spooled file is removed before returning.
pub async fn parse_multipart(
    body: Body,
    content_type: &str,
    spool_dir: &Path,
) -> Result<MultipartForm, HandlerError> {
    let boundary = multer::parse_boundary(content_type)?;
    let mut multipart = multer::Multipart::new(body.into_data_stream(), boundary);

    let mut form = MultipartForm::default();
    let mut groups: Vec<(String, Vec<FileRef>)> = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        let filename = field
            .file_name()
            .filter(|filename| !filename.is_empty())
            .map(str::to_owned);

        let Some(filename) = filename else {
            let value = field.text().await?;
            form.data.push(&name, vec![value])?;
            continue;
        };

        let mime = field
            .content_type()
            .map(|mime| mime.to_string())
            .unwrap_or_default();
        let header = FileHeader {
            filename,
            size: 0,
            header: part_headers(field.headers()),
        };

        let spool = spool_dir.join(format!("multipart-{}", Uuid::new_v4().simple()));
        let file = form.uploads.stash(FileUpload::spooled(header, mime, spool.clone()));

        let mut out = tokio::fs::File::create(&spool)
            .await
            .map_err(HandlerError::Spool)?;
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            out.write_all(&chunk).await.map_err(HandlerError::Spool)?;
            size += chunk.len() as u64;
        }
        out.flush().await.map_err(HandlerError::Spool)?;

        if let Some(upload) = form.uploads.get_mut(file) {
            upload.set_size(size);
        }

        match groups.iter_mut().find(|(field, _)| *field == name) {
            Some((_, refs)) => refs.push(file),
            None => groups.push((name, vec![file])),
        }
    }

    for (field, refs) in groups {
        form.uploads.mount(&field, refs)?;
    }

    Ok(form)
}

fn part_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        out.entry(canonical_header_key(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}
