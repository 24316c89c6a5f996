//! Trigger envelope parsing
//!
//! Resolves an inbound notification to the blob locations it announces.
//! Accepted shapes, outermost first:
//! - SQS event whose record bodies are SNS notifications carrying an S3 event
//! - SQS event whose record bodies are S3 events
//! - SNS event (`Records[].Sns.Message`) carrying an S3 event
//! - a bare S3 event

use crate::error::{Result, RetroError};
use crate::transport::BlobLocation;
use serde::Deserialize;
use serde_json::Value as Json;

#[derive(Debug, Deserialize)]
struct S3Event {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    #[serde(rename = "awsRegion")]
    aws_region: String,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Every blob location named by the envelope, in envelope order.
///
/// Fails with a `Parse` error if the envelope is not JSON, has an
/// unrecognized shape, or names no location at all.
pub fn parse_trigger(raw: &str) -> Result<Vec<BlobLocation>> {
    let envelope: Json = serde_json::from_str(raw).map_err(|e| RetroError::Json {
        source: e,
        context: "Failed to parse trigger envelope".to_string(),
    })?;

    let mut locations = Vec::new();
    collect(&envelope, &mut locations, 0)?;

    if locations.is_empty() {
        return Err(RetroError::Parse(
            "Trigger envelope names no blob location".to_string(),
        ));
    }
    Ok(locations)
}

// SQS -> SNS -> S3 is the deepest legitimate nesting
const MAX_DEPTH: usize = 3;

fn collect(envelope: &Json, out: &mut Vec<BlobLocation>, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(RetroError::Parse("Trigger envelope nested too deeply".to_string()));
    }

    // SNS notification as delivered to SQS
    if let Some(message) = envelope.get("Message").and_then(Json::as_str) {
        return collect_str(message, out, depth);
    }

    let records = envelope
        .get("Records")
        .and_then(Json::as_array)
        .ok_or_else(|| RetroError::Parse("Trigger envelope has no Records".to_string()))?;

    for (index, record) in records.iter().enumerate() {
        if record.get("s3").is_some() {
            let record: S3EventRecord =
                serde_json::from_value(record.clone()).map_err(|e| RetroError::Json {
                    source: e,
                    context: format!("Malformed S3 record at index {}", index),
                })?;
            out.push(to_location(record)?);
        } else if let Some(body) = record.get("body").and_then(Json::as_str) {
            collect_str(body, out, depth)?;
        } else if let Some(message) = record
            .get("Sns")
            .and_then(|sns| sns.get("Message"))
            .and_then(Json::as_str)
        {
            collect_str(message, out, depth)?;
        } else {
            return Err(RetroError::Parse(format!(
                "Unrecognized trigger record at index {}",
                index
            )));
        }
    }
    Ok(())
}

fn collect_str(inner: &str, out: &mut Vec<BlobLocation>, depth: usize) -> Result<()> {
    let inner: Json = serde_json::from_str(inner).map_err(|e| RetroError::Json {
        source: e,
        context: "Failed to parse nested trigger message".to_string(),
    })?;

    // S3 test notifications carry no records and announce nothing
    if inner.get("Event").and_then(Json::as_str) == Some("s3:TestEvent") {
        return Ok(());
    }

    collect(&inner, out, depth + 1)
}

fn to_location(record: S3EventRecord) -> Result<BlobLocation> {
    // Event keys are form-encoded: '+' is a space, the rest percent-encoded
    let key = urlencoding::decode(&record.s3.object.key.replace('+', " "))
        .map_err(|e| RetroError::Parse(format!("Invalid object key encoding: {}", e)))?
        .into_owned();

    Ok(BlobLocation::new(record.aws_region, record.s3.bucket.name, key))
}

/// Parse a bare S3 event (no SQS/SNS wrapping); used by tests and tools
pub fn parse_s3_event(raw: &str) -> Result<Vec<BlobLocation>> {
    let event: S3Event = serde_json::from_str(raw).map_err(|e| RetroError::Json {
        source: e,
        context: "Failed to parse S3 event".to_string(),
    })?;
    event.records.into_iter().map(to_location).collect()
}
