//! Per-request attribute bag.
//!
//! Middleware attaches string attributes to a request; the handler moves the
//! bag into the worker context.

use std::collections::HashMap;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributesError {
    #[error("attributes bag is not initialized for this request")]
    NotInitialized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(HashMap<String, Vec<String>>);

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.0.insert(key.into(), values);
    }

    pub fn delete(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn into_inner(self) -> HashMap<String, Vec<String>> {
        self.0
    }
}

/// Attach an empty bag unless one is present.
pub fn init<B>(request: &mut axum::http::Request<B>) {
    if request.extensions().get::<Attributes>().is_none() {
        request.extensions_mut().insert(Attributes::default());
    }
}

/// Every attribute, empty when the bag is missing.
pub fn all<B>(request: &axum::http::Request<B>) -> HashMap<String, Vec<String>> {
    request
        .extensions()
        .get::<Attributes>()
        .map(|attributes| attributes.0.clone())
        .unwrap_or_default()
}

pub fn get<'a, B>(request: &'a axum::http::Request<B>, key: &str) -> Option<&'a [String]> {
    request.extensions().get::<Attributes>()?.get(key)
}

pub fn set<B>(
    request: &mut axum::http::Request<B>,
    key: impl Into<String>,
    values: Vec<String>,
) -> Result<(), AttributesError> {
    let attributes = request
        .extensions_mut()
        .get_mut::<Attributes>()
        .ok_or(AttributesError::NotInitialized)?;
    attributes.set(key, values);
    Ok(())
}

pub fn delete<B>(request: &mut axum::http::Request<B>, key: &str) {
    if let Some(attributes) = request.extensions_mut().get_mut::<Attributes>() {
        attributes.delete(key);
    }
}

/// Middleware giving every request an attribute bag.
pub async fn attributes_middleware(mut request: Request, next: Next) -> Response {
    init(&mut request);
    next.run(request).await
}
