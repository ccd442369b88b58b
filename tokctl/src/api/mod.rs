//! HTTP API layer: request handlers, wire models and the JSON body extractor.

pub mod handlers;
pub mod json;
pub mod models;
