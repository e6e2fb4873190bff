//! `data:<mime>;base64,<payload>` strings, the form sound records are
//! persisted in.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;

/// Extract the binary payload of a data URI.
///
/// Fails when there is no comma separator, the payload is empty, or it is not
/// valid base64.
pub fn parse_data_uri(uri: &str) -> anyhow::Result<Vec<u8>> {
    let (_, payload) = uri
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("data URI has no ',' separator"))?;

    let payload = payload.trim();
    if payload.is_empty() {
        anyhow::bail!("data URI payload is empty");
    }

    let bytes = BASE64_STANDARD.decode(payload)?;
    if bytes.is_empty() {
        anyhow::bail!("data URI decodes to zero bytes");
    }
    Ok(bytes)
}

pub fn encode_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes))
}
