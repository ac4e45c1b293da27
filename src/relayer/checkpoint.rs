//! Validator checkpoint fetching and quorum assembly.

use crate::error::RelayError;
use alloy::{
    hex,
    primitives::{Address, B256, Bytes, Signature, U256, eip191_hash_message, keccak256},
};
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, RelayError>;

/// A checkpoint as signed by a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Checkpoint {
    /// Merkle root at `index`.
    pub root: B256,
    /// Leaf index the checkpoint covers.
    pub index: u32,
}

/// Checkpoint payload stored at a validator's storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CheckpointWithMessageId {
    /// The signed checkpoint.
    pub checkpoint: Checkpoint,
    /// Id of the message inserted at `checkpoint.index`.
    pub message_id: B256,
}

/// Signature attached to a stored checkpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CheckpointSignature {
    pub r: U256,
    pub s: U256,
    pub v: u64,
}

/// `signed_checkpoint_<index>.json` as written by hyperlane validators.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedCheckpoint {
    /// The checkpoint value.
    pub value: CheckpointWithMessageId,
    /// The validator's signature over the checkpoint digest.
    pub signature: CheckpointSignature,
}

impl SignedCheckpoint {
    /// The EIP-191 prehash the validator signed: the keccak digest of the
    /// origin domain hash, root, index, and message id.
    pub fn signing_hash(&self, origin_domain: u32, origin_merkle_hook: B256) -> B256 {
        let mut domain = Vec::with_capacity(4 + 32 + 9);
        domain.extend_from_slice(&origin_domain.to_be_bytes());
        domain.extend_from_slice(origin_merkle_hook.as_slice());
        domain.extend_from_slice(b"HYPERLANE");
        let domain_hash = keccak256(&domain);

        let mut digest = Vec::with_capacity(32 + 32 + 4 + 32);
        digest.extend_from_slice(domain_hash.as_slice());
        digest.extend_from_slice(self.value.checkpoint.root.as_slice());
        digest.extend_from_slice(&self.value.checkpoint.index.to_be_bytes());
        digest.extend_from_slice(self.value.message_id.as_slice());
        eip191_hash_message(keccak256(&digest))
    }

    /// Recovers the signer of the checkpoint.
    pub fn recover(&self, origin_domain: u32, origin_merkle_hook: B256) -> Result<Address> {
        let signature = self.signature()?;
        signature
            .recover_address_from_prehash(&self.signing_hash(origin_domain, origin_merkle_hook))
            .map_err(|err| RelayError::CheckpointMismatch(format!("unrecoverable signature: {err}")))
    }

    fn signature(&self) -> Result<Signature> {
        let parity = match self.signature.v {
            0 | 27 => false,
            1 | 28 => true,
            v => {
                return Err(RelayError::CheckpointMismatch(format!(
                    "invalid signature recovery id {v}"
                )));
            }
        };
        Ok(Signature::new(self.signature.r, self.signature.s, parity))
    }
}

/// A checkpoint with a quorum of validator signatures behind it.
#[derive(Debug, Clone)]
pub struct QuorumCheckpoint {
    /// The agreed-upon checkpoint.
    pub value: CheckpointWithMessageId,
    /// Signatures from distinct validators over `value`.
    pub signatures: Vec<Signature>,
}

impl QuorumCheckpoint {
    /// Encodes the quorum into message-id multisig ISM metadata:
    /// origin merkle hook (32) ‖ root (32) ‖ index (4, BE) ‖ signatures.
    pub fn to_metadata(&self, origin_merkle_hook: B256) -> Bytes {
        let mut out = Vec::with_capacity(68 + self.signatures.len() * 65);
        out.extend_from_slice(origin_merkle_hook.as_slice());
        out.extend_from_slice(self.value.checkpoint.root.as_slice());
        out.extend_from_slice(&self.value.checkpoint.index.to_be_bytes());
        for signature in &self.signatures {
            out.extend_from_slice(&signature.r().to_be_bytes::<32>());
            out.extend_from_slice(&signature.s().to_be_bytes::<32>());
            out.push(27 + signature.v() as u8);
        }
        out.into()
    }
}

/// Fetches signed checkpoints from a validator's announced storage location.
#[derive(Debug, Clone)]
pub enum CheckpointFetcher {
    /// `s3://<bucket>/<region>` locations, read over HTTPS.
    S3 { validator: Address, bucket: String, region: String, http: reqwest::Client },
    /// `file://<dir>` locations, for local validators in tests.
    File { validator: Address, dir: PathBuf },
}

impl CheckpointFetcher {
    /// Builds a fetcher from an announced storage location.
    pub fn from_storage_location(validator: Address, location: &str) -> Result<Self> {
        if let Some(rest) = location.strip_prefix("s3://") {
            let (bucket, region) = rest
                .split_once('/')
                .ok_or_else(|| RelayError::CheckpointFetch(format!("bad s3 location {location}")))?;
            Ok(Self::S3 {
                validator,
                bucket: bucket.to_string(),
                region: region.trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
            })
        } else if let Some(dir) = location.strip_prefix("file://") {
            Ok(Self::File { validator, dir: PathBuf::from(dir) })
        } else {
            Err(RelayError::CheckpointFetch(format!("unsupported storage location {location}")))
        }
    }

    /// The validator this fetcher reads for.
    pub fn validator(&self) -> Address {
        match self {
            Self::S3 { validator, .. } | Self::File { validator, .. } => *validator,
        }
    }

    /// Fetches the signed checkpoint at `index`, `None` if the validator has
    /// not signed it yet.
    pub async fn checkpoint(&self, index: u32) -> Result<Option<SignedCheckpoint>> {
        match self {
            Self::S3 { bucket, region, http, .. } => {
                for name in Self::checkpoint_names(index) {
                    let url = format!("https://{bucket}.s3.{region}.amazonaws.com/{name}");
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|err| RelayError::CheckpointFetch(err.to_string()))?;
                    if response.status() == reqwest::StatusCode::NOT_FOUND {
                        continue;
                    }
                    let response = response
                        .error_for_status()
                        .map_err(|err| RelayError::CheckpointFetch(err.to_string()))?;
                    let checkpoint = response
                        .json()
                        .await
                        .map_err(|err| RelayError::CheckpointFetch(err.to_string()))?;
                    return Ok(Some(checkpoint));
                }
                Ok(None)
            }
            Self::File { dir, .. } => {
                for name in Self::checkpoint_names(index) {
                    let path = dir.join(name);
                    let raw = match tokio::fs::read_to_string(&path).await {
                        Ok(raw) => raw,
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(RelayError::CheckpointFetch(err.to_string())),
                    };
                    return serde_json::from_str(&raw)
                        .map(Some)
                        .map_err(|err| RelayError::CheckpointFetch(err.to_string()));
                }
                Ok(None)
            }
        }
    }

    fn checkpoint_names(index: u32) -> [String; 2] {
        [format!("signed_checkpoint_{index}.json"), format!("checkpoint_{index}_with_id.json")]
    }
}

/// Assembles a quorum of signed checkpoints at `index`.
///
/// Checkpoints whose index differs, whose signature does not recover to the
/// fetcher's validator, or which cannot be fetched are skipped; the first
/// root to collect `threshold` signatures wins. The winner must agree with
/// the dispatch's message id.
pub async fn checkpoint_at_index(
    fetchers: &[CheckpointFetcher],
    index: u32,
    threshold: usize,
    origin_domain: u32,
    origin_merkle_hook: B256,
    expected_message_id: B256,
) -> Result<QuorumCheckpoint> {
    let mut per_root: HashMap<B256, QuorumCheckpoint> = HashMap::new();
    let mut found = 0usize;

    for fetcher in fetchers {
        let validator = fetcher.validator();
        let signed = match fetcher.checkpoint(index).await {
            Ok(Some(signed)) => signed,
            Ok(None) => continue,
            Err(err) => {
                warn!(%validator, index, %err, "failed to fetch checkpoint");
                continue;
            }
        };

        if signed.value.checkpoint.index != index {
            debug!(
                %validator,
                expected = index,
                got = signed.value.checkpoint.index,
                "checkpoint index mismatch"
            );
            continue;
        }

        match signed.recover(origin_domain, origin_merkle_hook) {
            Ok(signer) if signer == validator => {}
            Ok(signer) => {
                warn!(%validator, %signer, index, "checkpoint not signed by its validator");
                continue;
            }
            Err(err) => {
                warn!(%validator, index, %err, "checkpoint signature recovery failed");
                continue;
            }
        }

        found += 1;
        let entry = per_root
            .entry(signed.value.checkpoint.root)
            .or_insert_with(|| QuorumCheckpoint { value: signed.value, signatures: Vec::new() });
        entry.signatures.push(signed.signature().expect("validated during recovery"));

        if entry.signatures.len() >= threshold {
            let quorum = entry.clone();
            if quorum.value.message_id != expected_message_id {
                return Err(RelayError::CheckpointMismatch(format!(
                    "dispatch has message id {} but checkpoint has {}",
                    hex::encode(expected_message_id),
                    hex::encode(quorum.value.message_id),
                )));
            }
            return Ok(quorum);
        }
    }

    Err(RelayError::NotEnoughSignatures { threshold, found })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{SignerSync, local::PrivateKeySigner};

    fn signed_checkpoint(
        signer: &PrivateKeySigner,
        root: B256,
        index: u32,
        message_id: B256,
        origin_domain: u32,
        hook: B256,
    ) -> SignedCheckpoint {
        let mut checkpoint = SignedCheckpoint {
            value: CheckpointWithMessageId { checkpoint: Checkpoint { root, index }, message_id },
            signature: CheckpointSignature { r: U256::ZERO, s: U256::ZERO, v: 27 },
        };
        // Sign the raw digest; eip191 framing is applied by signing_hash, so
        // recompute the inner keccak here the same way.
        let mut domain = Vec::new();
        domain.extend_from_slice(&origin_domain.to_be_bytes());
        domain.extend_from_slice(hook.as_slice());
        domain.extend_from_slice(b"HYPERLANE");
        let domain_hash = keccak256(&domain);
        let mut digest = Vec::new();
        digest.extend_from_slice(domain_hash.as_slice());
        digest.extend_from_slice(root.as_slice());
        digest.extend_from_slice(&index.to_be_bytes());
        digest.extend_from_slice(message_id.as_slice());

        let signature = signer.sign_message_sync(keccak256(&digest).as_slice()).unwrap();
        checkpoint.signature = CheckpointSignature {
            r: signature.r(),
            s: signature.s(),
            v: 27 + signature.v() as u64,
        };
        checkpoint
    }

    #[tokio::test]
    async fn quorum_prefers_first_root_to_reach_threshold() {
        let hook = B256::repeat_byte(7);
        let message_id = B256::repeat_byte(8);
        let root = B256::repeat_byte(9);
        let domain = 875;
        let index = 12;

        let dir = tempfile::tempdir().unwrap();
        let mut fetchers = Vec::new();
        for i in 0..3 {
            let signer = PrivateKeySigner::random();
            let sub = dir.path().join(format!("validator{i}"));
            std::fs::create_dir(&sub).unwrap();
            let checkpoint = signed_checkpoint(&signer, root, index, message_id, domain, hook);
            std::fs::write(
                sub.join(format!("signed_checkpoint_{index}.json")),
                serde_json::json!({
                    "value": {
                        "checkpoint": {
                            "root": checkpoint.value.checkpoint.root,
                            "index": index,
                        },
                        "message_id": message_id,
                    },
                    "signature": {
                        "r": format!("{:#x}", checkpoint.signature.r),
                        "s": format!("{:#x}", checkpoint.signature.s),
                        "v": checkpoint.signature.v,
                    },
                })
                .to_string(),
            )
            .unwrap();
            fetchers.push(
                CheckpointFetcher::from_storage_location(
                    signer.address(),
                    &format!("file://{}", sub.display()),
                )
                .unwrap(),
            );
        }

        let quorum =
            checkpoint_at_index(&fetchers, index, 2, domain, hook, message_id).await.unwrap();
        assert_eq!(quorum.value.checkpoint.root, root);
        assert_eq!(quorum.signatures.len(), 2);

        let metadata = quorum.to_metadata(hook);
        assert_eq!(metadata.len(), 32 + 32 + 4 + 2 * 65);
        assert_eq!(&metadata[..32], hook.as_slice());
        assert_eq!(&metadata[32..64], root.as_slice());
        assert_eq!(&metadata[64..68], index.to_be_bytes().as_slice());
    }

    #[tokio::test]
    async fn rejects_checkpoints_from_unexpected_signers() {
        let hook = B256::repeat_byte(7);
        let message_id = B256::repeat_byte(8);
        let domain = 875;
        let index = 3;

        let dir = tempfile::tempdir().unwrap();
        let signer = PrivateKeySigner::random();
        let checkpoint =
            signed_checkpoint(&signer, B256::repeat_byte(9), index, message_id, domain, hook);
        std::fs::write(
            dir.path().join(format!("signed_checkpoint_{index}.json")),
            serde_json::json!({
                "value": {
                    "checkpoint": { "root": checkpoint.value.checkpoint.root, "index": index },
                    "message_id": message_id,
                },
                "signature": {
                    "r": format!("{:#x}", checkpoint.signature.r),
                    "s": format!("{:#x}", checkpoint.signature.s),
                    "v": checkpoint.signature.v,
                },
            })
            .to_string(),
        )
        .unwrap();

        // Announce the location under a different validator address.
        let fetcher = CheckpointFetcher::from_storage_location(
            Address::repeat_byte(0x42),
            &format!("file://{}", dir.path().display()),
        )
        .unwrap();

        let err = checkpoint_at_index(&[fetcher], index, 1, domain, hook, message_id)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotEnoughSignatures { threshold: 1, found: 0 }));
    }

    #[tokio::test]
    async fn skips_checkpoints_at_other_indices() {
        let hook = B256::repeat_byte(1);
        let message_id = B256::repeat_byte(2);
        let domain = 42161;

        let dir = tempfile::tempdir().unwrap();
        let signer = PrivateKeySigner::random();
        let checkpoint =
            signed_checkpoint(&signer, B256::repeat_byte(3), 5, message_id, domain, hook);
        // Stored under index 6 but contains index 5.
        std::fs::write(
            dir.path().join("signed_checkpoint_6.json"),
            serde_json::json!({
                "value": {
                    "checkpoint": { "root": checkpoint.value.checkpoint.root, "index": 5 },
                    "message_id": message_id,
                },
                "signature": {
                    "r": format!("{:#x}", checkpoint.signature.r),
                    "s": format!("{:#x}", checkpoint.signature.s),
                    "v": checkpoint.signature.v,
                },
            })
            .to_string(),
        )
        .unwrap();

        let fetcher = CheckpointFetcher::from_storage_location(
            signer.address(),
            &format!("file://{}", dir.path().display()),
        )
        .unwrap();

        let err =
            checkpoint_at_index(&[fetcher], 6, 1, domain, hook, message_id).await.unwrap_err();
        assert!(matches!(err, RelayError::NotEnoughSignatures { .. }));
    }
}
