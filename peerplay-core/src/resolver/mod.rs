//! Torrent locator resolution.
//!
//! Turns whatever a client posts to `/play` (magnet URI, bare info hash,
//! `.torrent` URL or local path) into a [`TorrentDescriptor`] the streaming
//! engine can start from.

pub mod bencode;
pub mod magnet;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use self::bencode::BencodeParser;
use self::magnet::MagnetParser;
use crate::config::ResolverConfig;
use crate::error::ResolveError;

/// SHA-1 hash identifying a unique torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    /// - `ResolveError::InvalidMagnet` - Wrong length or non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, ResolveError> {
        let mut hash = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut hash).map_err(|e| ResolveError::InvalidMagnet {
            reason: format!("Invalid info hash '{hex_str}': {e}"),
        })?;
        Ok(Self(hash))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Individual file within a torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

/// Resolved torrent metadata, immutable for the lifetime of a session.
///
/// Descriptors built from magnet links carry no piece list and a zero
/// length; the streaming engine completes them from the swarm.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentDescriptor {
    pub info_hash: InfoHash,
    pub name: String,
    pub total_length: u64,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub files: Vec<TorrentFile>,
    pub announce_urls: Vec<String>,
    /// Locator the descriptor was resolved from
    pub source: String,
}

impl TorrentDescriptor {
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Whether the info dictionary is known (false for bare magnets).
    pub fn has_metainfo(&self) -> bool {
        !self.piece_hashes.is_empty()
    }
}

/// Resolves torrent locators into descriptors.
#[async_trait]
pub trait TorrentResolver: Send + Sync {
    /// # Errors
    /// - `ResolveError` - Locator malformed, unreachable, or not a torrent
    async fn resolve(&self, locator: &str) -> Result<TorrentDescriptor, ResolveError>;
}

/// Locator kinds accepted by [`MetainfoResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Magnet(String),
    InfoHash(String),
    Url(String),
    File(PathBuf),
}

impl Locator {
    /// Classifies a trimmed locator string.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("magnet:") {
            Locator::Magnet(raw.to_string())
        } else if raw.len() == 40 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Locator::InfoHash(raw.to_string())
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            Locator::Url(raw.to_string())
        } else {
            Locator::File(PathBuf::from(raw))
        }
    }
}

/// Production resolver backed by bencode-rs, magnet-url and reqwest.
pub struct MetainfoResolver {
    client: reqwest::Client,
    fetch_timeout: Duration,
}

impl MetainfoResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            fetch_timeout: config.fetch_timeout,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let fetch_error = |source| ResolveError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        let body = response.bytes().await.map_err(fetch_error)?;
        Ok(body.to_vec())
    }

    async fn resolve_locator(&self, locator: Locator) -> Result<TorrentDescriptor, ResolveError> {
        match locator {
            Locator::Magnet(uri) => MagnetParser::parse_magnet_link(&uri),
            Locator::InfoHash(hash) => {
                MagnetParser::parse_magnet_link(&format!("magnet:?xt=urn:btih:{hash}"))
            }
            Locator::Url(url) => {
                let bytes = self.fetch(&url).await?;
                BencodeParser::parse_bencode_data(&bytes, &url)
            }
            Locator::File(path) => {
                if path.as_os_str().is_empty() {
                    return Err(ResolveError::UnsupportedLocator {
                        locator: String::new(),
                    });
                }
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|source| ResolveError::Read {
                        path: path.clone(),
                        source,
                    })?;
                BencodeParser::parse_bencode_data(&bytes, &path.to_string_lossy())
            }
        }
    }
}

#[async_trait]
impl TorrentResolver for MetainfoResolver {
    async fn resolve(&self, locator: &str) -> Result<TorrentDescriptor, ResolveError> {
        let kind = Locator::classify(locator);
        tracing::debug!("Resolving {:?}", kind);

        tokio::time::timeout(self.fetch_timeout, self.resolve_locator(kind))
            .await
            .map_err(|_| ResolveError::TimedOut {
                seconds: self.fetch_timeout.as_secs(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_FILE: &[u8] = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:clip.mp412:piece lengthi512e6:pieces40:1234567890123456789012345678901234567890ee";

    #[test]
    fn test_info_hash_hex_round_trip() {
        let hex_str = "0123456789abcdef0123456789abcdef01234567";
        let hash = InfoHash::from_hex(hex_str).unwrap();
        assert_eq!(hash.to_string(), hex_str);
        assert!(InfoHash::from_hex("abc").is_err());
    }

    #[test]
    fn test_locator_classification() {
        assert!(matches!(
            Locator::classify("magnet:?xt=urn:btih:abc"),
            Locator::Magnet(_)
        ));
        assert!(matches!(
            Locator::classify("  0123456789ABCDEF0123456789abcdef01234567 "),
            Locator::InfoHash(_)
        ));
        assert!(matches!(
            Locator::classify("https://example.com/a.torrent"),
            Locator::Url(_)
        ));
        assert!(matches!(
            Locator::classify("/srv/media/a.torrent"),
            Locator::File(_)
        ));
    }

    #[tokio::test]
    async fn test_resolves_bare_info_hash_as_magnet() {
        let resolver = MetainfoResolver::new(&ResolverConfig::default());
        let descriptor = resolver
            .resolve("0123456789abcdef0123456789abcdef01234567")
            .await
            .unwrap();
        assert_eq!(
            descriptor.info_hash.to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert!(!descriptor.has_metainfo());
    }

    #[tokio::test]
    async fn test_resolves_local_torrent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.torrent");
        tokio::fs::write(&path, SINGLE_FILE).await.unwrap();

        let resolver = MetainfoResolver::new(&ResolverConfig::default());
        let descriptor = resolver.resolve(path.to_str().unwrap()).await.unwrap();

        assert_eq!(descriptor.name, "clip.mp4");
        assert_eq!(descriptor.total_length, 1000);
        assert_eq!(descriptor.piece_count(), 2);
        assert_eq!(descriptor.source, path.to_string_lossy());
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let resolver = MetainfoResolver::new(&ResolverConfig::default());
        let result = resolver.resolve("/nonexistent/file.torrent").await;
        assert!(matches!(result, Err(ResolveError::Read { .. })));
    }
}
