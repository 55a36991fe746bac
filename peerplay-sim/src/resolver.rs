//! Catalogue-backed resolver producing synthetic descriptors.

use std::collections::HashMap;

use async_trait::async_trait;
use peerplay_core::error::ResolveError;
use peerplay_core::resolver::magnet::MagnetParser;
use peerplay_core::resolver::{InfoHash, Locator, TorrentDescriptor, TorrentFile, TorrentResolver};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha1::{Digest, Sha1};

use crate::SimulationConfig;

const PIECE_LENGTH: u32 = 256 * 1024;
const MIN_SYNTHETIC_SIZE: u64 = 50 * 1024 * 1024;
const MAX_SYNTHETIC_SIZE: u64 = 1536 * 1024 * 1024;

/// Known torrent in the simulated catalogue.
#[derive(Debug, Clone)]
pub struct CatalogueEntry {
    pub name: String,
    pub size: u64,
}

/// Resolves any magnet, hash, URL or path into a synthetic descriptor.
///
/// Catalogue hits keep their configured name and size; anything else gets a
/// deterministic size derived from the seed and the info hash.
pub struct SimulatedResolver {
    catalogue: HashMap<InfoHash, CatalogueEntry>,
    seed: u64,
}

impl SimulatedResolver {
    pub fn new(config: &SimulationConfig) -> Self {
        let mut resolver = Self {
            catalogue: HashMap::new(),
            seed: config.seed,
        };
        resolver.populate_default_catalogue();
        resolver
    }

    /// Adds or replaces a catalogue entry.
    pub fn with_entry(mut self, info_hash: InfoHash, name: &str, size: u64) -> Self {
        self.catalogue.insert(
            info_hash,
            CatalogueEntry {
                name: name.to_string(),
                size,
            },
        );
        self
    }

    fn populate_default_catalogue(&mut self) {
        let defaults = [
            (
                "dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c",
                "Big Buck Bunny.mp4",
                276_134_947,
            ),
            (
                "08ada5a7a6183aae1e09d831df6748d566095a10",
                "Sintel.mp4",
                129_241_752,
            ),
            (
                "c9e15763f722f23e98a29decdfae341b98d53056",
                "Cosmos Laundromat.mp4",
                220_087_570,
            ),
        ];
        for (hash, name, size) in defaults {
            if let Ok(info_hash) = InfoHash::from_hex(hash) {
                self.catalogue.insert(
                    info_hash,
                    CatalogueEntry {
                        name: name.to_string(),
                        size,
                    },
                );
            }
        }
    }

    fn identify(locator: &str) -> Result<(InfoHash, Option<String>), ResolveError> {
        match Locator::classify(locator) {
            Locator::Magnet(uri) => {
                let parsed = MagnetParser::parse_magnet_link(&uri)?;
                let name = Some(parsed.name).filter(|n| !n.is_empty());
                Ok((parsed.info_hash, name))
            }
            Locator::InfoHash(hex) => Ok((InfoHash::from_hex(&hex)?, None)),
            Locator::Url(raw) => Ok((hash_of(&raw), None)),
            Locator::File(path) => {
                if path.as_os_str().is_empty() {
                    return Err(ResolveError::UnsupportedLocator {
                        locator: locator.to_string(),
                    });
                }
                Ok((hash_of(&path.to_string_lossy()), None))
            }
        }
    }

    fn synthesize(&self, info_hash: InfoHash, name: Option<String>) -> TorrentDescriptor {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ seed_of(&info_hash));

        let (name, size) = match self.catalogue.get(&info_hash) {
            Some(entry) => (entry.name.clone(), entry.size),
            None => (
                name.unwrap_or_else(|| format!("Simulated Stream {}.mp4", &info_hash.to_string()[..8])),
                rng.random_range(MIN_SYNTHETIC_SIZE..=MAX_SYNTHETIC_SIZE),
            ),
        };

        let piece_count = size.div_ceil(u64::from(PIECE_LENGTH)) as usize;
        let piece_hashes = (0..piece_count).map(|_| rng.random::<[u8; 20]>()).collect();

        TorrentDescriptor {
            info_hash,
            name: name.clone(),
            total_length: size,
            piece_length: PIECE_LENGTH,
            piece_hashes,
            files: vec![TorrentFile {
                path: vec![name],
                length: size,
            }],
            announce_urls: vec!["http://tracker.peerplay.local/announce".to_string()],
            source: "simulation".to_string(),
        }
    }
}

fn hash_of(text: &str) -> InfoHash {
    let digest = Sha1::digest(text.as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest);
    InfoHash::new(bytes)
}

fn seed_of(info_hash: &InfoHash) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&info_hash.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

#[async_trait]
impl TorrentResolver for SimulatedResolver {
    async fn resolve(&self, locator: &str) -> Result<TorrentDescriptor, ResolveError> {
        let (info_hash, name) = Self::identify(locator.trim())?;
        let descriptor = self.synthesize(info_hash, name);
        tracing::debug!(
            "Simulated resolve of {} -> {} ({} bytes)",
            locator,
            descriptor.name,
            descriptor.total_length
        );
        Ok(descriptor)
    }
}
