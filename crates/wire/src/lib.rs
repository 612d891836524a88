//! Vaultrun Wire Protocol Types
//!
//! This crate defines the shared Protobuf message types exchanged over the
//! peer links between the Host Session and Team Sessions. Both sides MUST
//! depend on this crate so the two ends of a link agree on the schema.
//!
//! # Message Directions
//!
//! - host → team: `SyncIdentities`, `IdentityAccepted`, `IdentityDenied`,
//!   `LaunchMission`
//! - team → host: `RequestIdentity`, `TeamFinished`, `TeamProgress`
//!
//! Every message travels wrapped in an [`Envelope`]; a frame that fails to
//! decode, or decodes to an empty envelope, is discarded by the receiver.
//! Per-link delivery is assumed ordered and reliable; nothing here
//! retransmits.

#![deny(unsafe_code)]

use prost::{Message, Oneof};
use rand::Rng;
use vaultrun_engine::{Question, Sector, SectorPhase};

/// Identifier for one peer link, assigned by the host transport.
pub type LinkId = u64;

// ============================================================================
// Room Addressing
// ============================================================================

/// Length of a room code, in characters.
pub const ROOM_CODE_LEN: usize = 5;

/// A short code addressing one hosted session.
///
/// Codes are not guaranteed globally unique; two hosts racing for the same
/// code is a connectivity-layer concern, not handled here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCode(String);

impl RoomCode {
    /// Draw a fresh code of uppercase letters and digits.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse a code typed by a team, uppercasing it.
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        let code = raw.trim().to_uppercase();
        if code.len() != ROOM_CODE_LEN {
            return Err("room code must be exactly 5 characters");
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err("room code must be alphanumeric");
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Protocol Messages
// ============================================================================

/// Full reservation-set snapshot, host → every team.
///
/// Idempotent: always safe to reapply, and the host sends one immediately
/// on connect so a fresh team never races against stale information.
#[derive(Clone, PartialEq, Message)]
pub struct SyncIdentities {
    /// Reserved identity names, ordered by reservation time.
    #[prost(string, repeated, tag = "1")]
    pub reserved: Vec<String>,
}

/// Reservation attempt, team → host.
#[derive(Clone, PartialEq, Message)]
pub struct RequestIdentity {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Reservation granted, host → requesting team only.
#[derive(Clone, PartialEq, Message)]
pub struct IdentityAccepted {}

/// Identity already taken (or not in the catalog), host → requesting team
/// only.
#[derive(Clone, PartialEq, Message)]
pub struct IdentityDenied {}

/// One-time full mission payload, host → every team.
#[derive(Clone, PartialEq, Message)]
pub struct LaunchMission {
    /// Mission keyword, revealed to players only after the vault opens.
    #[prost(string, tag = "1")]
    pub keyword: String,

    #[prost(message, repeated, tag = "2")]
    pub sectors: Vec<SectorState>,
}

/// Completion report, team → host. The host deduplicates by identity.
#[derive(Clone, PartialEq, Message)]
pub struct TeamFinished {
    #[prost(string, tag = "1")]
    pub identity: String,
}

/// Progress report for the host's monitor view, team → host.
#[derive(Clone, PartialEq, Message)]
pub struct TeamProgress {
    #[prost(string, tag = "1")]
    pub identity: String,

    /// Number of sectors this team has solved so far.
    #[prost(uint32, tag = "2")]
    pub solved_sectors: u32,
}

/// Serialized sector, embedded in `LaunchMission`.
///
/// Carries the full gameplay state so the receiving team owns an
/// independent copy; the host's copy is never mutated after launch.
#[derive(Clone, PartialEq, Message)]
pub struct SectorState {
    #[prost(uint32, tag = "1")]
    pub id: u32,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(message, repeated, tag = "3")]
    pub questions: Vec<QuestionState>,

    #[prost(string, tag = "4")]
    pub access_code: String,

    #[prost(bool, tag = "5")]
    pub solved: bool,

    #[prost(bool, tag = "6")]
    pub locked: bool,

    /// Lockout expiry in milliseconds; present iff `locked`.
    #[prost(uint64, optional, tag = "7")]
    pub lockout_end_ms: Option<u64>,

    /// Index of the question currently being asked.
    #[prost(uint32, tag = "8")]
    pub cursor: u32,
}

/// Serialized question, embedded in `SectorState`.
#[derive(Clone, PartialEq, Message)]
pub struct QuestionState {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub text: String,

    #[prost(string, repeated, tag = "3")]
    pub options: Vec<String>,

    #[prost(uint32, tag = "4")]
    pub correct_index: u32,

    #[prost(uint32, tag = "5")]
    pub time_limit_secs: u32,

    /// Empty string when the question has no image.
    #[prost(string, tag = "6")]
    pub image_url: String,
}

// ============================================================================
// Envelope
// ============================================================================

/// Wrapper carrying any protocol message over a link.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(oneof = "Payload", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub payload: Option<Payload>,
}

/// The message kinds an [`Envelope`] can carry.
#[derive(Clone, PartialEq, Oneof)]
pub enum Payload {
    #[prost(message, tag = "1")]
    SyncIdentities(SyncIdentities),
    #[prost(message, tag = "2")]
    RequestIdentity(RequestIdentity),
    #[prost(message, tag = "3")]
    IdentityAccepted(IdentityAccepted),
    #[prost(message, tag = "4")]
    IdentityDenied(IdentityDenied),
    #[prost(message, tag = "5")]
    LaunchMission(LaunchMission),
    #[prost(message, tag = "6")]
    TeamFinished(TeamFinished),
    #[prost(message, tag = "7")]
    TeamProgress(TeamProgress),
}

impl From<Payload> for Envelope {
    fn from(payload: Payload) -> Self {
        Self { payload: Some(payload) }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<&Question> for QuestionState {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            text: q.text.clone(),
            options: q.options.clone(),
            correct_index: q.correct_index as u32,
            time_limit_secs: q.time_limit_secs,
            image_url: q.image_url.clone().unwrap_or_default(),
        }
    }
}

impl TryFrom<QuestionState> for Question {
    type Error = &'static str;

    fn try_from(q: QuestionState) -> Result<Self, Self::Error> {
        if q.options.is_empty() {
            return Err("question must have at least one option");
        }
        Ok(Self {
            id: q.id,
            text: q.text,
            options: q.options,
            correct_index: q.correct_index as usize,
            time_limit_secs: q.time_limit_secs,
            image_url: (!q.image_url.is_empty()).then_some(q.image_url),
        })
    }
}

impl From<&Sector> for SectorState {
    fn from(sector: &Sector) -> Self {
        let cursor = match sector.phase() {
            SectorPhase::Active { cursor } => cursor as u32,
            _ => 0,
        };

        Self {
            id: sector.id(),
            name: sector.name().to_string(),
            questions: sector.questions().iter().map(QuestionState::from).collect(),
            access_code: sector.access_code().to_string(),
            solved: sector.is_solved(),
            locked: sector.is_locked(),
            lockout_end_ms: sector.lockout_end(),
            cursor,
        }
    }
}

impl TryFrom<SectorState> for Sector {
    type Error = &'static str;

    fn try_from(state: SectorState) -> Result<Self, Self::Error> {
        if state.questions.is_empty() {
            return Err("sector must carry at least one question");
        }
        if state.solved && state.locked {
            return Err("sector cannot be both locked and solved");
        }

        let phase = if state.solved {
            SectorPhase::Solved
        } else if state.locked {
            let until = state
                .lockout_end_ms
                .ok_or("locked sector is missing its lockout expiry")?;
            SectorPhase::Locked { until }
        } else {
            let cursor = state.cursor as usize;
            if cursor >= state.questions.len() {
                return Err("sector cursor out of range");
            }
            SectorPhase::Active { cursor }
        };

        let questions: Result<Vec<_>, _> =
            state.questions.into_iter().map(Question::try_from).collect();

        Ok(Sector::restore(
            state.id,
            state.name,
            questions?,
            state.access_code,
            phase,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
