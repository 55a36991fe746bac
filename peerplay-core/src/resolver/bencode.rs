//! `.torrent` metainfo decoding and info hash calculation.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use super::{InfoHash, TorrentDescriptor, TorrentFile};
use crate::error::ResolveError;

type BencodeDict<'a> = HashMap<&'a [u8], bencode_rs::Value<'a>>;
type ParseResult<T> = Result<T, ResolveError>;

fn invalid(reason: impl Into<String>) -> ResolveError {
    ResolveError::InvalidTorrentFile {
        reason: reason.into(),
    }
}

/// Bencode metainfo parser.
pub struct BencodeParser;

impl BencodeParser {
    /// Decodes a metainfo document into a descriptor.
    ///
    /// # Errors
    ///
    /// - `ResolveError::InvalidTorrentFile` - Malformed bencode or missing fields
    pub fn parse_bencode_data(torrent_bytes: &[u8], source: &str) -> ParseResult<TorrentDescriptor> {
        let parsed = bencode_rs::Value::parse(torrent_bytes)
            .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

        let Some(bencode_rs::Value::Dictionary(root)) = parsed.first() else {
            return Err(invalid("Root element must be dictionary"));
        };

        let Some(bencode_rs::Value::Dictionary(info)) = root.get(b"info".as_slice()) else {
            return Err(invalid("Missing 'info' field"));
        };

        let info_hash = Self::calculate_info_hash(torrent_bytes)?;
        let name = Self::extract_string(info, b"name")?;
        let piece_length = u32::try_from(Self::extract_integer(info, b"piece length")?)
            .map_err(|_| invalid("Invalid piece length"))?;

        let pieces = Self::extract_bytes(info, b"pieces")?;
        if pieces.len() % 20 != 0 {
            return Err(invalid("Invalid pieces length"));
        }
        let piece_hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let (files, total_length) = match Self::extract_integer(info, b"length") {
            Ok(length) => {
                let length = length.max(0) as u64;
                let file = TorrentFile {
                    path: vec![name.clone()],
                    length,
                };
                (vec![file], length)
            }
            Err(_) => match info.get(b"files".as_slice()) {
                Some(bencode_rs::Value::List(list)) => Self::extract_files(list)?,
                _ => return Err(invalid("Missing 'files' or 'length' field")),
            },
        };

        Ok(TorrentDescriptor {
            info_hash,
            name,
            total_length,
            piece_length,
            piece_hashes,
            files,
            announce_urls: Self::extract_announce_urls(root),
            source: source.to_string(),
        })
    }

    /// SHA-1 over the raw bytes of the info dictionary.
    fn calculate_info_hash(torrent_bytes: &[u8]) -> ParseResult<InfoHash> {
        let key = b"4:info";
        let start = torrent_bytes
            .windows(key.len())
            .position(|window| window == key)
            .map(|pos| pos + key.len())
            .ok_or_else(|| invalid("Could not find info dictionary in data"))?;

        let end = start + Self::find_bencode_dictionary_end(&torrent_bytes[start..])?;

        let digest = Sha1::digest(&torrent_bytes[start..end]);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        Ok(InfoHash::new(hash))
    }

    /// Returns the length of the dictionary starting at `data[0]`.
    ///
    /// # Errors
    ///
    /// - `ResolveError::InvalidTorrentFile` - Not a complete bencode dictionary
    pub fn find_bencode_dictionary_end(data: &[u8]) -> ParseResult<usize> {
        if data.first() != Some(&b'd') {
            return Err(invalid("Expected dictionary start"));
        }

        let mut pos = 1;
        let mut depth = 1;

        while pos < data.len() && depth > 0 {
            match data[pos] {
                b'd' | b'l' => {
                    depth += 1;
                    pos += 1;
                }
                b'e' => {
                    depth -= 1;
                    pos += 1;
                }
                b'i' => {
                    let close = data[pos..]
                        .iter()
                        .position(|&b| b == b'e')
                        .ok_or_else(|| invalid("Unterminated integer"))?;
                    pos += close + 1;
                }
                b'0'..=b'9' => {
                    let colon = data[pos..]
                        .iter()
                        .position(|&b| b == b':')
                        .ok_or_else(|| invalid("Invalid string format"))?;
                    let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| invalid("Invalid string length"))?;
                    pos += colon + 1 + length;
                }
                _ => return Err(invalid("Invalid bencode character")),
            }
        }

        if depth != 0 || pos > data.len() {
            return Err(invalid("Incomplete bencode dictionary"));
        }

        Ok(pos)
    }

    fn extract_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
        let bytes = Self::extract_bytes(dict, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            invalid(format!(
                "Invalid UTF-8 in field: {:?}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(invalid(format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => Ok(*value),
            _ => Err(invalid(format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_files(list: &[bencode_rs::Value<'_>]) -> ParseResult<(Vec<TorrentFile>, u64)> {
        let mut files = Vec::with_capacity(list.len());
        let mut total_length = 0u64;

        for entry in list {
            let bencode_rs::Value::Dictionary(file) = entry else {
                return Err(invalid("Invalid file entry type"));
            };
            let length = Self::extract_integer(file, b"length")?.max(0) as u64;
            let Some(bencode_rs::Value::List(components)) = file.get(b"path".as_slice()) else {
                return Err(invalid("Missing or invalid path in file"));
            };

            let path = components
                .iter()
                .map(|component| match component {
                    bencode_rs::Value::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                        .map_err(|_| invalid("Invalid UTF-8 in file path")),
                    _ => Err(invalid("Invalid path component type")),
                })
                .collect::<ParseResult<Vec<_>>>()?;

            total_length += length;
            files.push(TorrentFile { path, length });
        }

        Ok((files, total_length))
    }

    /// Primary announce URL followed by every announce-list tier.
    ///
    /// Trackerless torrents are valid here; the engine falls back to DHT.
    fn extract_announce_urls(dict: &BencodeDict<'_>) -> Vec<String> {
        let mut urls = Vec::new();

        if let Ok(announce) = Self::extract_string(dict, b"announce") {
            urls.push(announce);
        }

        if let Some(bencode_rs::Value::List(tiers)) = dict.get(b"announce-list".as_slice()) {
            for tier in tiers {
                if let bencode_rs::Value::List(tier_urls) = tier {
                    for url in tier_urls {
                        if let bencode_rs::Value::Bytes(bytes) = url
                            && let Ok(url) = String::from_utf8(bytes.to_vec())
                            && !urls.contains(&url)
                        {
                            urls.push(url);
                        }
                    }
                }
            }
        }

        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_file_torrent() {
        let data = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890ee";
        let descriptor = BencodeParser::parse_bencode_data(data, "test.torrent").unwrap();

        assert_eq!(descriptor.name, "test.txt");
        assert_eq!(descriptor.piece_length, 32768);
        assert_eq!(descriptor.total_length, 1000);
        assert_eq!(descriptor.piece_count(), 1);
        assert_eq!(descriptor.announce_urls, vec!["test:8080"]);
        assert_eq!(descriptor.source, "test.torrent");
    }

    #[test]
    fn test_info_hash_covers_info_dictionary_only() {
        let info = b"d6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890e";
        let mut data = b"d8:announce9:test:80804:info".to_vec();
        data.extend_from_slice(info);
        data.push(b'e');

        let descriptor = BencodeParser::parse_bencode_data(&data, "t").unwrap();
        let expected = Sha1::digest(info);
        assert_eq!(descriptor.info_hash.as_bytes().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_multi_file_torrent() {
        let data = b"d8:announce9:test:80804:infod5:filesld6:lengthi500e4:pathl5:file1eed6:lengthi300e4:pathl3:sub5:file2eee4:name8:test.dir12:piece lengthi32768e6:pieces20:12345678901234567890ee";
        let descriptor = BencodeParser::parse_bencode_data(data, "t").unwrap();

        assert_eq!(descriptor.total_length, 800);
        assert_eq!(descriptor.files.len(), 2);
        assert_eq!(descriptor.files[1].path, vec!["sub", "file2"]);
    }

    #[test]
    fn test_missing_info_field() {
        let result = BencodeParser::parse_bencode_data(b"d8:announce9:test:8080e", "t");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("info"));
    }

    #[test]
    fn test_invalid_pieces_length() {
        let data = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces19:1234567890123456789ee";
        let err = BencodeParser::parse_bencode_data(data, "t").unwrap_err();
        assert!(err.to_string().contains("Invalid pieces length"));
    }

    #[test]
    fn test_not_bencode() {
        assert!(BencodeParser::parse_bencode_data(b"invalid torrent data", "t").is_err());
    }

    #[test]
    fn test_find_bencode_dictionary_end() {
        assert_eq!(BencodeParser::find_bencode_dictionary_end(b"d3:keyi42ee").unwrap(), 11);
        assert_eq!(
            BencodeParser::find_bencode_dictionary_end(b"d3:keyd4:namei42eeeXYZ").unwrap(),
            19
        );
        assert!(BencodeParser::find_bencode_dictionary_end(b"l4:teste").is_err());
        assert!(BencodeParser::find_bencode_dictionary_end(b"d3:key").is_err());
        assert!(BencodeParser::find_bencode_dictionary_end(b"d3:key999:").is_err());
    }
}
