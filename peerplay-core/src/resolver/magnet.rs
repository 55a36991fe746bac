//! Magnet URI resolution.

use super::{InfoHash, TorrentDescriptor};
use crate::error::ResolveError;

const BTIH_PREFIX: &str = "urn:btih:";

/// Magnet link parsing utilities.
pub struct MagnetParser;

impl MagnetParser {
    /// Builds a descriptor from a magnet URI.
    ///
    /// Magnets carry no info dictionary, so the descriptor has no pieces and
    /// a zero length. The name falls back to the info hash when `dn` is absent.
    ///
    /// # Errors
    /// - `ResolveError::InvalidMagnet` - Malformed URI or missing/invalid `xt`
    pub fn parse_magnet_link(uri: &str) -> Result<TorrentDescriptor, ResolveError> {
        let magnet = magnet_url::Magnet::new(uri).map_err(|e| ResolveError::InvalidMagnet {
            reason: format!("{e:?}"),
        })?;

        let info_hash = Self::extract_info_hash(uri)?;
        let name = magnet
            .display_name()
            .map(|s| s.to_string())
            .map(|raw| decode_component(&raw))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| info_hash.to_string());

        Ok(TorrentDescriptor {
            info_hash,
            name,
            total_length: 0,
            piece_length: 0,
            piece_hashes: Vec::new(),
            files: Vec::new(),
            announce_urls: magnet.trackers().to_vec(),
            source: uri.to_string(),
        })
    }

    fn extract_info_hash(uri: &str) -> Result<InfoHash, ResolveError> {
        let parsed = url::Url::parse(uri).map_err(|e| ResolveError::InvalidMagnet {
            reason: e.to_string(),
        })?;

        let topic = parsed
            .query_pairs()
            .filter(|(key, _)| key == "xt")
            .find_map(|(_, value)| value.strip_prefix(BTIH_PREFIX).map(str::to_string))
            .ok_or_else(|| ResolveError::InvalidMagnet {
                reason: format!("Missing or invalid info hash in magnet link: {uri}"),
            })?;

        match topic.len() {
            40 => InfoHash::from_hex(&topic),
            32 => decode_base32(&topic).map(InfoHash::new),
            len => Err(ResolveError::InvalidMagnet {
                reason: format!("Invalid hash length: {len} (expected 40 hex or 32 base32)"),
            }),
        }
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|cow| cow.into_owned())
        .unwrap_or(spaced)
}

/// RFC 4648 base32 without padding, as used by older magnet links.
fn decode_base32(encoded: &str) -> Result<[u8; 20], ResolveError> {
    let mut out = [0u8; 20];
    let mut buffer: u64 = 0;
    let mut bits = 0;
    let mut written = 0;

    for c in encoded.bytes() {
        let value = match c.to_ascii_uppercase() {
            c @ b'A'..=b'Z' => c - b'A',
            c @ b'2'..=b'7' => c - b'2' + 26,
            _ => {
                return Err(ResolveError::InvalidMagnet {
                    reason: format!("Invalid base32 character in hash: {encoded}"),
                });
            }
        };
        buffer = (buffer << 5) | u64::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out[written] = (buffer >> bits) as u8;
            written += 1;
        }
    }

    Ok(out)
}
