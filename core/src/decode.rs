//! Response body decoding.
//!
//! # Design
//! A `ResponseFormat` names the shape an operation expects. The body is
//! read incrementally to the end, then handed to the format; the
//! `ResponseBody` is consumed by value and dropped on every path.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::http::ResponseBody;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response body is empty")]
    EmptyBody,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The expected shape of a successful response body.
pub trait ResponseFormat {
    type Output;

    fn decode(bytes: Bytes) -> Result<Self::Output, DecodeError>;
}

/// A JSON document deserialised into `T`.
#[derive(Debug)]
pub struct Json<T>(PhantomData<T>);

impl<T: DeserializeOwned> ResponseFormat for Json<T> {
    type Output = T;

    fn decode(bytes: Bytes) -> Result<T, DecodeError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::EmptyBody);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// No body expected; whatever arrives is ignored.
#[derive(Debug)]
pub struct NoContent;

impl ResponseFormat for NoContent {
    type Output = ();

    fn decode(_bytes: Bytes) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// The raw body bytes.
#[derive(Debug)]
pub struct Raw;

impl ResponseFormat for Raw {
    type Output = Bytes;

    fn decode(bytes: Bytes) -> Result<Bytes, DecodeError> {
        Ok(bytes)
    }
}

/// Body read failures are transport failures; shape mismatches are
/// decode failures.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub async fn decode<F: ResponseFormat>(body: ResponseBody) -> Result<F::Output, ReadError> {
    let bytes = body.read_to_end().await?;
    Ok(F::decode(bytes)?)
}
