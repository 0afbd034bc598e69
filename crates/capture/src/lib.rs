//! Minimap Session Capture
//!
//! Records the raw primary traffic of a session so it can be replayed and
//! checked offline.
//!
//! # Architecture
//!
//! - [`CaptureRecorder`]: collects timestamped events while a session runs
//! - [`verify_capture`]: re-applies a finished capture to a fresh
//!   [`SessionState`] and checks it lands on the recorded digest
//! - [`write_capture`] / [`read_capture`]: Protobuf artifact I/O
//!
//! A capture only holds what reaches the decoder. Relay traffic is not
//! recorded because it never touches the registry.

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use minimap_state::{ENTITY_TTL_MS, Millis, STATE_DIGEST_ALGO_ID, SessionState};
use minimap_wire::{CaptureArtifact, CapturedEventProto, CapturedKind};
use prost::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Artifact layout version written by [`CaptureRecorder::finalize`].
pub const CAPTURE_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Captured Event
// ============================================================================

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    pub at_ms: Millis,
    pub kind: CapturedKind,
    pub payload: Vec<u8>,
}

impl From<CapturedEvent> for CapturedEventProto {
    fn from(event: CapturedEvent) -> Self {
        CapturedEventProto::new(event.at_ms, event.kind, event.payload)
    }
}

// ============================================================================
// Capture Recorder
// ============================================================================

/// Session parameters stored alongside the events.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub default_world_size: f64,
    pub entity_ttl_ms: Millis,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_world_size: minimap_state::DEFAULT_WORLD_SIZE,
            entity_ttl_ms: ENTITY_TTL_MS,
        }
    }
}

/// Collects primary traffic for a capture artifact.
#[derive(Debug, Clone, Default)]
pub struct CaptureRecorder {
    config: CaptureConfig,
    events: Vec<CapturedEvent>,
}

impl CaptureRecorder {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Primary channel opened on `url`.
    pub fn record_reset(&mut self, at_ms: Millis, url: &str) {
        self.push(at_ms, CapturedKind::Reset, url.as_bytes().to_vec());
    }

    pub fn record_inbound(&mut self, at_ms: Millis, frame: &[u8]) {
        self.push(at_ms, CapturedKind::Inbound, frame.to_vec());
    }

    pub fn record_outbound(&mut self, at_ms: Millis, frame: &[u8]) {
        self.push(at_ms, CapturedKind::Outbound, frame.to_vec());
    }

    pub fn record_sweep(&mut self, at_ms: Millis) {
        self.push(at_ms, CapturedKind::Sweep, Vec::new());
    }

    fn push(&mut self, at_ms: Millis, kind: CapturedKind, payload: Vec<u8>) {
        self.events.push(CapturedEvent {
            at_ms,
            kind,
            payload,
        });
    }

    pub fn events(&self) -> &[CapturedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Finish recording. `state` is the live state after the last recorded
    /// event; its digest becomes the verification anchor.
    pub fn finalize(self, state: &SessionState) -> CaptureArtifact {
        let events: Vec<CapturedEventProto> = self.events.into_iter().map(Into::into).collect();
        CaptureArtifact {
            format_version: CAPTURE_FORMAT_VERSION,
            payload_sha256: payload_sha256(&events),
            events,
            final_digest: state.state_digest(),
            final_entity_count: state.store().len() as u64,
            state_digest_algo_id: STATE_DIGEST_ALGO_ID.to_string(),
            default_world_size: self.config.default_world_size,
            entity_ttl_ms: self.config.entity_ttl_ms,
        }
    }
}

/// Hex SHA-256 over every event as `i32 LE kind | u64 LE length | payload`.
pub fn payload_sha256(events: &[CapturedEventProto]) -> String {
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(event.kind.to_le_bytes());
        hasher.update((event.payload.len() as u64).to_le_bytes());
        hasher.update(&event.payload);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Capture Verification
// ============================================================================

/// Capture verification error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("unsupported capture format version {0}")]
    UnsupportedVersion(u32),
    #[error("state digest algorithm mismatch: expected {expected}, got {actual}")]
    DigestAlgorithmMismatch { expected: String, actual: String },
    #[error("payload hash mismatch: expected {expected}, got {actual}")]
    PayloadHashMismatch { expected: String, actual: String },
    #[error("event {index} has unknown kind {kind}")]
    UnknownKind { index: usize, kind: i32 },
    #[error("event {index} goes back in time ({at_ms} < {previous})")]
    NonMonotonic {
        index: usize,
        at_ms: Millis,
        previous: Millis,
    },
    #[error("final entity count mismatch: expected {expected}, got {actual}")]
    EntityCountMismatch { expected: u64, actual: u64 },
    #[error("final digest mismatch: expected {expected:#x}, got {actual:#x}")]
    FinalDigestMismatch { expected: u64, actual: u64 },
}

/// Re-apply every captured event to a fresh state.
///
/// Inbound frames that fail to decode are skipped, the same as the live
/// session drops them.
pub fn replay(artifact: &CaptureArtifact) -> Result<SessionState, VerifyError> {
    let mut state = SessionState::new(artifact.default_world_size);
    let mut previous: Millis = 0;

    for (index, event) in artifact.events.iter().enumerate() {
        let kind = event.captured_kind().ok_or(VerifyError::UnknownKind {
            index,
            kind: event.kind,
        })?;
        if event.at_ms < previous {
            return Err(VerifyError::NonMonotonic {
                index,
                at_ms: event.at_ms,
                previous,
            });
        }
        previous = event.at_ms;

        match kind {
            CapturedKind::Reset => state.reset(),
            CapturedKind::Inbound => match minimap_wire::decode(&event.payload) {
                Ok(events) if events.is_empty() => {}
                Ok(events) => {
                    state.apply(&events, event.at_ms);
                }
                Err(err) => {
                    tracing::debug!(index, %err, "skipping undecodable captured frame");
                }
            },
            CapturedKind::Outbound => {}
            CapturedKind::Sweep => {
                state.sweep(event.at_ms, artifact.entity_ttl_ms);
            }
        }
    }

    Ok(state)
}

/// Verify a capture reproduces its recorded final state.
///
/// # Verification Steps
/// 1. Format version and digest algorithm match this build
/// 2. Payload hash matches the events
/// 3. Replay the events (kinds known, timestamps non-decreasing)
/// 4. Entity count and state digest match the recorded anchors
pub fn verify_capture(artifact: &CaptureArtifact) -> Result<(), VerifyError> {
    if artifact.format_version != CAPTURE_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(artifact.format_version));
    }
    if artifact.state_digest_algo_id != STATE_DIGEST_ALGO_ID {
        return Err(VerifyError::DigestAlgorithmMismatch {
            expected: STATE_DIGEST_ALGO_ID.to_string(),
            actual: artifact.state_digest_algo_id.clone(),
        });
    }

    let actual_hash = payload_sha256(&artifact.events);
    if actual_hash != artifact.payload_sha256 {
        return Err(VerifyError::PayloadHashMismatch {
            expected: artifact.payload_sha256.clone(),
            actual: actual_hash,
        });
    }

    let state = replay(artifact)?;

    let actual_count = state.store().len() as u64;
    if actual_count != artifact.final_entity_count {
        return Err(VerifyError::EntityCountMismatch {
            expected: artifact.final_entity_count,
            actual: actual_count,
        });
    }

    let actual_digest = state.state_digest();
    if actual_digest != artifact.final_digest {
        return Err(VerifyError::FinalDigestMismatch {
            expected: artifact.final_digest,
            actual: actual_digest,
        });
    }

    Ok(())
}

// ============================================================================
// Capture I/O
// ============================================================================

/// Capture file error.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture already exists at {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("capture i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode capture: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Write a capture artifact. Never overwrites an existing file.
pub fn write_capture(artifact: &CaptureArtifact, path: &Path) -> Result<(), CaptureError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(CaptureError::AlreadyExists(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    file.write_all(&artifact.encode_to_vec())?;

    tracing::info!(
        path = %path.display(),
        events = artifact.events.len(),
        "capture written"
    );
    Ok(())
}

pub fn read_capture(path: &Path) -> Result<CaptureArtifact, CaptureError> {
    let data = fs::read(path)?;
    Ok(CaptureArtifact::decode(data.as_slice())?)
}

// ============================================================================
// Tests
// ============================================================================
