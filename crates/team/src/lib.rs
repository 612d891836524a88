//! Vaultrun Team Session
//!
//! One team's half of the peer protocol: connect to a host, win an identity
//! reservation, receive the mission payload, then drive the local sectors
//! and the vault to completion. The session owns its copy of every sector;
//! after launch the host's copy is never consulted again.
//!
//! # Architecture
//!
//! Like the host, the team session is a pure state machine over inbound
//! envelopes. The transport decodes each frame and feeds it to
//! [`TeamSession::handle_message`]; gameplay calls come from the local
//! presentation layer. Outputs are [`TeamEvent`]s for that layer and
//! ready-to-send envelopes for the transport. No I/O, no clock reads:
//! every time-dependent call takes an explicit millisecond timestamp.

#![deny(unsafe_code)]

use thiserror::Error;
use tracing::{debug, info, warn};
use vaultrun_engine::{AnswerError, AnswerOutcome, Sector, SectorId, TimestampMs, vault_open};
use vaultrun_wire::{Envelope, Payload, RequestIdentity, RoomCode, TeamFinished, TeamProgress};

/// Default cadence for the lockout sweep, in milliseconds.
///
/// The cadence itself is a caller concern; [`TeamSession::tick`] tolerates
/// late or irregular calls.
pub const TICK_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Phases of a team session, in order. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamPhase {
    /// Link to the host not yet acknowledged.
    Connecting,
    /// Connected; choosing a squad identity.
    SelectingIdentity,
    /// Identity granted; waiting for the mission payload.
    AwaitingLaunch,
    /// Mission running: sectors and vault are live.
    Active,
    /// Vault opened; keyword revealed.
    Finished,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TeamEvent {
    /// The link to the host could not be established. Surfaced once; the
    /// session does not retry.
    ConnectionFailed { reason: String },
    /// Fresh reservation snapshot from the host.
    RosterChanged { reserved: Vec<String> },
    /// Our reservation went through.
    IdentityAccepted { name: String },
    /// Our chosen name was taken; pick another.
    IdentityDenied,
    /// Mission payload received; gameplay is live.
    MissionStarted,
}

/// Why a gameplay call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TeamError {
    #[error("identity selection is not open")]
    SelectionClosed,
    #[error("mission is not active")]
    MissionNotActive,
    #[error("no sector with id {0}")]
    UnknownSector(SectorId),
    #[error(transparent)]
    Answer(#[from] AnswerError),
}

/// Result of registering an answer through the session.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerFeedback {
    pub outcome: AnswerOutcome,
    /// Progress report to send the host when this answer solved its sector.
    pub progress: Option<Envelope>,
}

/// Result of a vault attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultSubmission {
    /// Every entered code matched its sector. `report` carries the
    /// completion envelope exactly once; repeat submissions open again but
    /// report nothing.
    Opened { keyword: String, report: Option<Envelope> },
    /// At least one slot mismatched; nothing changed.
    Denied,
}

// ============================================================================
// Team Session
// ============================================================================

/// One team's session against a single host.
pub struct TeamSession {
    room_code: RoomCode,
    phase: TeamPhase,
    /// Name we have asked for but not yet heard back about.
    pending_identity: Option<String>,
    identity: Option<String>,
    taken: Vec<String>,
    keyword: Option<String>,
    sectors: Vec<Sector>,
}

impl TeamSession {
    /// Start connecting to the host addressed by `room_code`.
    ///
    /// The host's first roster snapshot doubles as the connection
    /// acknowledgement and moves the session to identity selection.
    pub fn new(room_code: RoomCode) -> Self {
        info!(room = %room_code, "connecting to host");

        Self {
            room_code,
            phase: TeamPhase::Connecting,
            pending_identity: None,
            identity: None,
            taken: Vec::new(),
            keyword: None,
            sectors: Vec::new(),
        }
    }

    /// Surface a connection failure from the transport. No retry; the
    /// caller decides whether to build a fresh session.
    pub fn on_connect_failed(&self, reason: impl Into<String>) -> TeamEvent {
        let reason = reason.into();
        warn!(room = %self.room_code, %reason, "connection to host failed");
        TeamEvent::ConnectionFailed { reason }
    }

    /// Ask the host to reserve `name` for us.
    ///
    /// Returns the envelope to send. Re-requesting after a denial simply
    /// repeats the handshake with the new name.
    pub fn request_identity(&mut self, name: &str) -> Result<Envelope, TeamError> {
        if self.phase != TeamPhase::SelectingIdentity {
            return Err(TeamError::SelectionClosed);
        }

        debug!(identity = name, "requesting identity");
        self.pending_identity = Some(name.to_string());
        Ok(Payload::RequestIdentity(RequestIdentity { name: name.to_string() }).into())
    }

    /// Handle one inbound envelope to completion.
    ///
    /// Malformed or phase-inappropriate messages are discarded with a
    /// warning and produce no events.
    pub fn handle_message(&mut self, envelope: Envelope) -> Vec<TeamEvent> {
        let Some(payload) = envelope.payload else {
            warn!("discarding empty envelope");
            return Vec::new();
        };

        match payload {
            Payload::SyncIdentities(sync) => {
                if self.phase == TeamPhase::Connecting {
                    self.phase = TeamPhase::SelectingIdentity;
                    info!(room = %self.room_code, "connected to host");
                }
                // Idempotent snapshot; always safe to reapply.
                self.taken = sync.reserved.clone();
                vec![TeamEvent::RosterChanged { reserved: sync.reserved }]
            }
            Payload::IdentityAccepted(_) => {
                if self.phase != TeamPhase::SelectingIdentity {
                    warn!(phase = ?self.phase, "discarding identity accept out of phase");
                    return Vec::new();
                }
                let Some(name) = self.pending_identity.take() else {
                    warn!("discarding unsolicited identity accept");
                    return Vec::new();
                };

                info!(identity = %name, "identity accepted");
                self.identity = Some(name.clone());
                self.phase = TeamPhase::AwaitingLaunch;
                vec![TeamEvent::IdentityAccepted { name }]
            }
            Payload::IdentityDenied(_) => {
                let Some(name) = self.pending_identity.take() else {
                    warn!("discarding unsolicited identity denial");
                    return Vec::new();
                };

                debug!(identity = %name, "identity denied; choose again");
                vec![TeamEvent::IdentityDenied]
            }
            Payload::LaunchMission(launch) => {
                if self.phase != TeamPhase::AwaitingLaunch {
                    warn!(phase = ?self.phase, "discarding launch payload out of phase");
                    return Vec::new();
                }

                let mut sectors = Vec::with_capacity(launch.sectors.len());
                for state in launch.sectors {
                    match Sector::try_from(state) {
                        Ok(sector) => sectors.push(sector),
                        Err(reason) => {
                            warn!(reason, "discarding malformed launch payload");
                            return Vec::new();
                        }
                    }
                }
                if sectors.is_empty() {
                    warn!("discarding launch payload with no sectors");
                    return Vec::new();
                }

                info!(sectors = sectors.len(), "mission started");
                self.keyword = Some(launch.keyword);
                self.sectors = sectors;
                self.phase = TeamPhase::Active;
                vec![TeamEvent::MissionStarted]
            }
            Payload::RequestIdentity(_) | Payload::TeamFinished(_) | Payload::TeamProgress(_) => {
                warn!("discarding host-bound message on the team side");
                Vec::new()
            }
        }
    }

    /// Answer the named sector's current question.
    ///
    /// Delegates to the sector state machine; when the answer solves the
    /// sector, the feedback carries a progress report for the host.
    pub fn answer_question(
        &mut self,
        sector_id: SectorId,
        option_index: usize,
        now: TimestampMs,
    ) -> Result<AnswerFeedback, TeamError> {
        if self.phase != TeamPhase::Active {
            return Err(TeamError::MissionNotActive);
        }
        let sector = self
            .sectors
            .iter_mut()
            .find(|s| s.id() == sector_id)
            .ok_or(TeamError::UnknownSector(sector_id))?;

        let outcome = sector.answer(option_index, now)?;
        debug!(sector = sector_id, ?outcome, "answer registered");

        let progress = match outcome {
            AnswerOutcome::Solved => {
                let solved = self.sectors.iter().filter(|s| s.is_solved()).count() as u32;
                self.identity.as_ref().map(|identity| {
                    Payload::TeamProgress(TeamProgress {
                        identity: identity.clone(),
                        solved_sectors: solved,
                    })
                    .into()
                })
            }
            _ => None,
        };

        Ok(AnswerFeedback { outcome, progress })
    }

    /// Periodic lockout sweep; returns the sectors that unlocked.
    pub fn tick(&mut self, now: TimestampMs) -> Vec<SectorId> {
        let mut unlocked = Vec::new();
        for sector in &mut self.sectors {
            if sector.tick(now) {
                debug!(sector = sector.id(), "lockout cleared");
                unlocked.push(sector.id());
            }
        }
        unlocked
    }

    /// Try the entered access codes against the vault.
    ///
    /// Pure positional code equality, one slot per sector. Success moves
    /// the session to `Finished`, reveals the keyword, and yields the
    /// completion report to send; only the first success carries one.
    pub fn submit_vault_codes(&mut self, codes: &[String]) -> Result<VaultSubmission, TeamError> {
        if !matches!(self.phase, TeamPhase::Active | TeamPhase::Finished) {
            return Err(TeamError::MissionNotActive);
        }

        if !vault_open(codes, &self.sectors) {
            debug!("vault attempt denied");
            return Ok(VaultSubmission::Denied);
        }

        let report = (self.phase == TeamPhase::Active)
            .then(|| {
                self.identity.as_ref().map(|identity| {
                    Payload::TeamFinished(TeamFinished { identity: identity.clone() }).into()
                })
            })
            .flatten();

        if self.phase == TeamPhase::Active {
            info!(identity = self.identity.as_deref().unwrap_or(""), "vault opened");
        }
        self.phase = TeamPhase::Finished;

        Ok(VaultSubmission::Opened {
            keyword: self.keyword.clone().unwrap_or_default(),
            report,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    pub fn phase(&self) -> TeamPhase {
        self.phase
    }

    /// Our reserved identity, once granted.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Identities the host reports as taken.
    pub fn taken_identities(&self) -> &[String] {
        &self.taken
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn sector(&self, id: SectorId) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.id() == id)
    }

    /// The mission keyword, held back until the vault opens.
    pub fn keyword(&self) -> Option<&str> {
        (self.phase == TeamPhase::Finished)
            .then_some(self.keyword.as_deref())
            .flatten()
    }
}

// ============================================================================
// Tests
// ============================================================================
