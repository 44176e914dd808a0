//! Inbound carrier webhook signatures.
//!
//! Every carrier signs with HMAC but builds the signed string differently:
//!
//! | carrier    | digest | signed input                                   |
//! |------------|--------|------------------------------------------------|
//! | hp_express | sha256 | `"{timestamp}.{body}"`                         |
//! | dhl        | sha256 | body                                           |
//! | overseas   | sha1   | top-level `key=value` pairs, sorted, `&` joined |
//! | boxnow     | sha256 | `"{timestamp}{body}"`                          |
//!
//! `timestamp` is the payload's own `timestamp` field. Signatures are hex.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use sha2::Sha256;

use crate::carriers::CarrierCode;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature is not valid hex")]
    Encoding,
    #[error("payload cannot be signed: {0}")]
    Payload(&'static str),
    #[error("signing key rejected")]
    InvalidKey,
    #[error("signature mismatch")]
    Mismatch,
}

fn parse_object(body: &[u8]) -> Result<serde_json::Map<String, Value>, SignatureError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SignatureError::Payload("body is not a JSON object")),
        Err(_) => Err(SignatureError::Payload("body is not JSON")),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn payload_timestamp(body: &[u8]) -> Result<String, SignatureError> {
    parse_object(body)?
        .get("timestamp")
        .filter(|v| !v.is_null())
        .map(scalar_text)
        .ok_or(SignatureError::Payload("timestamp field missing"))
}

/// Bytes the carrier feeds into its HMAC
pub fn signing_input(provider: CarrierCode, body: &[u8]) -> Result<Vec<u8>, SignatureError> {
    match provider {
        CarrierCode::Dhl => Ok(body.to_vec()),
        CarrierCode::HpExpress => {
            let mut input = format!("{}.", payload_timestamp(body)?).into_bytes();
            input.extend_from_slice(body);
            Ok(input)
        }
        CarrierCode::BoxNow => {
            let mut input = payload_timestamp(body)?.into_bytes();
            input.extend_from_slice(body);
            Ok(input)
        }
        CarrierCode::Overseas => {
            let map = parse_object(body)?;
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let joined = keys
                .into_iter()
                .map(|k| format!("{}={}", k, scalar_text(&map[k])))
                .collect::<Vec<_>>()
                .join("&");
            Ok(joined.into_bytes())
        }
    }
}

fn keyed<M: Mac + KeyInit>(secret: &str, input: &[u8]) -> Result<M, SignatureError> {
    let mut mac =
        <M as KeyInit>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(input);
    Ok(mac)
}

/// Computes the hex signature a carrier would send for `body`
pub fn sign(provider: CarrierCode, secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let input = signing_input(provider, body)?;
    let digest = match provider {
        CarrierCode::Overseas => keyed::<HmacSha1>(secret, &input)?
            .finalize()
            .into_bytes()
            .to_vec(),
        _ => keyed::<HmacSha256>(secret, &input)?
            .finalize()
            .into_bytes()
            .to_vec(),
    };
    Ok(hex::encode(digest))
}

/// Checks `signature` in constant time
pub fn verify(
    provider: CarrierCode,
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;
    let expected = hex::decode(signature).map_err(|_| SignatureError::Encoding)?;
    let input = signing_input(provider, body)?;

    let verified = match provider {
        CarrierCode::Overseas => keyed::<HmacSha1>(secret, &input)?.verify_slice(&expected),
        _ => keyed::<HmacSha256>(secret, &input)?.verify_slice(&expected),
    };
    verified.map_err(|_| SignatureError::Mismatch)
}
