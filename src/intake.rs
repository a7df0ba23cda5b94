use crate::error::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{pin_mut, Stream, StreamExt};
use log::{debug, warn};
use serde_json::Value;
use warp::multipart::{FormData, Part};

/// Everything the acquirer may look at, in whichever encoding the client
/// chose.
#[derive(Debug, Default)]
pub struct Submission {
    /// Contents of the multipart `file` field.
    pub file: Option<Vec<u8>>,
    /// Multipart `region` text field.
    pub region: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, PartialEq)]
pub struct AcquiredImage {
    pub bytes: Vec<u8>,
    /// Region named in the body, if any. The query string takes precedence.
    pub region: Option<String>,
}

impl Submission {
    pub fn raw(content_type: Option<String>, body: Bytes) -> Submission {
        Submission {
            content_type,
            body,
            ..Submission::default()
        }
    }

    /// Drains a multipart body. A malformed part ends the read; whatever
    /// was collected up to that point is kept.
    pub async fn from_form(mut form: FormData) -> Submission {
        let mut submission = Submission::default();
        while let Some(part) = form.next().await {
            let part = match part {
                Ok(part) => part,
                Err(e) => {
                    warn!("Malformed multipart body: {}", e);
                    break;
                }
            };
            let name = part.name().to_string();
            debug!("Got part {}", name);
            match name.as_str() {
                // `frame` is what the browser capture client sends.
                "file" | "frame" if submission.file.is_none() => match read_part(part).await {
                    Ok(data) if !data.is_empty() => submission.file = Some(data),
                    Ok(_) => debug!("Ignoring empty file part"),
                    Err(e) => {
                        warn!("Failed to read file part: {}", e);
                        break;
                    }
                },
                "region" => match read_part(part).await {
                    Ok(data) => submission.region = String::from_utf8(data).ok(),
                    Err(e) => {
                        warn!("Failed to read region part: {}", e);
                        break;
                    }
                },
                _ => debug!("Ignoring part {}", name),
            }
        }
        submission
    }
}

async fn read_part(mut part: Part) -> Result<Vec<u8>, warp::Error> {
    let mut data: Vec<u8> = vec![];
    while let Some(buf) = part.data().await {
        data.extend_from_slice(buf?.chunk());
    }
    Ok(data)
}

/// Collects a request body of any framing, chunked or not, refusing to
/// buffer more than `limit` bytes. A body that breaks off mid-read counts
/// as empty.
pub async fn read_capped<S, B>(body: S, limit: u64) -> Result<Bytes, Error>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    pin_mut!(body);
    let mut data = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return Ok(Bytes::new());
            }
        };
        if (data.len() + chunk.remaining()) as u64 > limit {
            return Err(Error::PayloadTooLarge(limit));
        }
        data.put(chunk);
    }
    Ok(data.freeze())
}

/// Resolves the image bytes: multipart file first, then an octet-stream
/// body, then a JSON `{"image": ...}` body.
pub fn acquire(submission: Submission) -> Result<AcquiredImage, Error> {
    if let Some(bytes) = submission.file.filter(|b| !b.is_empty()) {
        return Ok(AcquiredImage {
            bytes,
            region: submission.region,
        });
    }

    if is_octet_stream(submission.content_type.as_deref()) && !submission.body.is_empty() {
        return Ok(AcquiredImage {
            bytes: submission.body.to_vec(),
            region: submission.region,
        });
    }

    let json: Value = match serde_json::from_slice(&submission.body) {
        Ok(json) => json,
        Err(e) => {
            debug!("Body is not JSON: {}", e);
            return Err(Error::MissingImage);
        }
    };
    let bytes = json
        .get("image")
        .and_then(Value::as_str)
        .and_then(decode_image)
        .ok_or(Error::MissingImage)?;
    let region = json
        .get("region")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(submission.region);
    Ok(AcquiredImage { bytes, region })
}

fn is_octet_stream(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/octet-stream"))
        .unwrap_or(false)
}

/// Decodes a data URL or bare base64 string. Only the text after the last
/// comma is decoded.
pub fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    let payload = match encoded.rfind(',') {
        Some(i) => &encoded[i + 1..],
        None => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(payload) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            warn!("Undecodable base64 image: {}", e);
            None
        }
    }
}
