//! Vaultrun Host Session
//!
//! The host is the single source of truth for a live session. It owns:
//! - The peer link registry and the reservation roster
//! - Identity arbitration (at most one holder per squad name)
//! - Mission launch: shuffle, sector partition, access-code assignment
//! - Completion ranking and the monitor's progress view
//!
//! # Architecture
//!
//! The host is a pure state machine over inbound envelopes: the transport
//! decodes each frame and feeds it to [`HostSession::handle_message`], one
//! message to completion at a time. That single-consumer loop is what makes
//! the reservation check-and-mark atomic without locking. All side effects
//! come back as [`Outbound`] values for the transport to deliver; the crate
//! itself performs no I/O and never reads the clock or ambient randomness.

#![deny(unsafe_code)]

pub mod quiz;
pub mod roster;

use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;
use roster::Roster;
use thiserror::Error;
use tracing::{debug, info, warn};
use vaultrun_engine::{Question, SECTOR_COUNT, Sector, TimestampMs};
use vaultrun_wire::{
    Envelope, IdentityAccepted, IdentityDenied, LaunchMission, LinkId, Payload, RoomCode,
    SectorState, SyncIdentities,
};

// ============================================================================
// Outbound Delivery
// ============================================================================

/// Where an outbound envelope is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// One specific link.
    Link(LinkId),
    /// Every currently registered link.
    Broadcast,
}

/// An envelope for the transport to deliver.
///
/// The order of a returned `Vec<Outbound>` is send order on every link it
/// touches, so a requester always sees its accept reply before the roster
/// snapshot that includes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Destination,
    pub envelope: Envelope,
}

impl Outbound {
    fn to_link(link: LinkId, payload: Payload) -> Self {
        Self { to: Destination::Link(link), envelope: payload.into() }
    }

    fn broadcast(payload: Payload) -> Self {
        Self { to: Destination::Broadcast, envelope: payload.into() }
    }
}

// ============================================================================
// Completion Ranking
// ============================================================================

/// One team's finish, in report-arrival order.
///
/// All teams share a single launch timestamp, so arrival order is also
/// elapsed order. The duration is computed once, at first report, and never
/// recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub identity: String,
    pub elapsed_ms: u64,
}

// ============================================================================
// Launch Errors
// ============================================================================

/// Why a mission launch was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// `launch_mission` is one-shot per session; a second call is an error.
    #[error("mission already launched")]
    AlreadyLaunched,
    /// Every sector must carry at least one question.
    #[error("need at least {need} questions to fill every sector, have {have}")]
    NotEnoughQuestions { have: usize, need: usize },
}

// ============================================================================
// Host Session
// ============================================================================

/// Host-authoritative session state.
///
/// Constructing the session *is* starting it: a `HostSession` exists in
/// lobby state from `new`, so "started twice" is unrepresentable. There are
/// no globals; the session lives exactly as long as this value.
pub struct HostSession {
    room_code: RoomCode,
    keyword: String,
    links: Vec<LinkId>,
    roster: Roster,
    completions: Vec<CompletionRecord>,
    /// Solved-sector counts for the monitor, by identity.
    progress: HashMap<String, u32>,
    launch_at: Option<TimestampMs>,
}

impl HostSession {
    /// Open a session in lobby state with an empty roster.
    ///
    /// The keyword is uppercased; it stays secret until a team's vault
    /// opens on their side.
    pub fn new(keyword: impl Into<String>, room_code: RoomCode) -> Self {
        let keyword = keyword.into().to_uppercase();
        info!(room = %room_code, "hosting session");

        Self {
            room_code,
            keyword,
            links: Vec::new(),
            roster: Roster::new(),
            completions: Vec::new(),
            progress: HashMap::new(),
            launch_at: None,
        }
    }

    /// Register a fresh peer link.
    ///
    /// Returns the roster snapshot to send it immediately, so a connecting
    /// team never races against stale reservation information.
    pub fn on_peer_connect(&mut self, link: LinkId) -> Outbound {
        if !self.links.contains(&link) {
            self.links.push(link);
        }
        info!(link, peers = self.links.len(), "peer connected");

        Outbound::to_link(link, self.sync_payload())
    }

    /// Drop a link from the broadcast set.
    ///
    /// Reservations survive: the host does not evict a squad whose link
    /// went away, it just stops sending to it.
    pub fn on_peer_disconnect(&mut self, link: LinkId) {
        self.links.retain(|&l| l != link);
        info!(link, peers = self.links.len(), "peer disconnected");
    }

    /// Handle one inbound envelope to completion.
    ///
    /// `now` is the receipt timestamp, used only for completion durations.
    /// Unknown or host-inappropriate payloads are discarded with a warning.
    pub fn handle_message(
        &mut self,
        link: LinkId,
        envelope: Envelope,
        now: TimestampMs,
    ) -> Vec<Outbound> {
        let Some(payload) = envelope.payload else {
            warn!(link, "discarding empty envelope");
            return Vec::new();
        };

        match payload {
            Payload::RequestIdentity(req) => self.on_reservation_request(link, &req.name),
            Payload::TeamFinished(report) => {
                self.on_completion_report(&report.identity, now);
                Vec::new()
            }
            Payload::TeamProgress(update) => {
                self.on_progress_update(&update.identity, update.solved_sectors);
                Vec::new()
            }
            Payload::SyncIdentities(_)
            | Payload::IdentityAccepted(_)
            | Payload::IdentityDenied(_)
            | Payload::LaunchMission(_) => {
                warn!(link, "discarding team-bound message on the host side");
                Vec::new()
            }
        }
    }

    /// Shuffle the question set, partition it into sectors, and broadcast
    /// the mission payload. One-shot; records the launch timestamp that
    /// every completion duration is measured from.
    pub fn launch_mission<R: Rng>(
        &mut self,
        questions: Vec<Question>,
        now: TimestampMs,
        rng: &mut R,
    ) -> Result<Vec<Outbound>, LaunchError> {
        if self.launch_at.is_some() {
            return Err(LaunchError::AlreadyLaunched);
        }
        if questions.len() < SECTOR_COUNT {
            return Err(LaunchError::NotEnoughQuestions {
                have: questions.len(),
                need: SECTOR_COUNT,
            });
        }

        let total = questions.len();
        let mut rest = questions;
        rest.shuffle(rng);

        // Contiguous near-equal chunks: the first `total % 5` sectors take
        // one extra question, so sizes differ by at most one and none is
        // empty.
        let base = total / SECTOR_COUNT;
        let extra = total % SECTOR_COUNT;
        let mut sectors = Vec::with_capacity(SECTOR_COUNT);
        for id in 1..=SECTOR_COUNT {
            let take = base + usize::from(id <= extra);
            let tail = rest.split_off(take);
            let chunk = std::mem::replace(&mut rest, tail);
            let access_code = rng.gen_range(10u32..100).to_string();
            sectors.push(Sector::new(id as u32, format!("SECTOR_{id:02}"), chunk, access_code));
        }

        self.launch_at = Some(now);
        info!(total, sectors = SECTOR_COUNT, "mission launched");

        let payload = Payload::LaunchMission(LaunchMission {
            keyword: self.keyword.clone(),
            sectors: sectors.iter().map(SectorState::from).collect(),
        });
        Ok(vec![Outbound::broadcast(payload)])
    }

    fn on_reservation_request(&mut self, link: LinkId, name: &str) -> Vec<Outbound> {
        match self.roster.try_reserve(name, link) {
            Ok(()) => {
                info!(link, identity = name, "identity reserved");
                vec![
                    Outbound::to_link(link, Payload::IdentityAccepted(IdentityAccepted {})),
                    Outbound::broadcast(self.sync_payload()),
                ]
            }
            Err(reason) => {
                debug!(link, identity = name, ?reason, "identity denied");
                vec![Outbound::to_link(link, Payload::IdentityDenied(IdentityDenied {}))]
            }
        }
    }

    fn on_completion_report(&mut self, identity: &str, now: TimestampMs) {
        let Some(launch_at) = self.launch_at else {
            warn!(identity, "completion report before launch; discarded");
            return;
        };
        if self.completions.iter().any(|c| c.identity == identity) {
            debug!(identity, "duplicate completion report ignored");
            return;
        }
        if !self.roster.is_reserved(identity) {
            warn!(identity, "completion report from an identity this session never reserved");
        }

        let elapsed_ms = now.saturating_sub(launch_at);
        info!(identity, elapsed_ms, "team finished");
        self.completions.push(CompletionRecord { identity: identity.to_string(), elapsed_ms });
    }

    fn on_progress_update(&mut self, identity: &str, solved_sectors: u32) {
        let entry = self.progress.entry(identity.to_string()).or_insert(0);
        // A late or re-sent report never rolls the monitor backwards.
        *entry = (*entry).max(solved_sectors);
        debug!(identity, solved = *entry, "progress update");
    }

    fn sync_payload(&self) -> Payload {
        Payload::SyncIdentities(SyncIdentities { reserved: self.roster.names() })
    }

    // ------------------------------------------------------------------
    // Monitor accessors
    // ------------------------------------------------------------------

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Registered links, for the transport's broadcast fan-out.
    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    pub fn is_launched(&self) -> bool {
        self.launch_at.is_some()
    }

    /// Reserved identity names, in reservation order.
    pub fn reserved_identities(&self) -> Vec<String> {
        self.roster.names()
    }

    /// Finished teams, in report-arrival order.
    pub fn completions(&self) -> &[CompletionRecord] {
        &self.completions
    }

    /// Reserved identities that have not reported completion yet.
    pub fn teams_in_field(&self) -> Vec<String> {
        self.roster
            .names()
            .into_iter()
            .filter(|name| !self.completions.iter().any(|c| &c.identity == name))
            .collect()
    }

    /// Last reported solved-sector count for an identity; 0 before any
    /// report.
    pub fn progress_of(&self, identity: &str) -> u32 {
        self.progress.get(identity).copied().unwrap_or(0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use vaultrun_engine::DEFAULT_TIME_LIMIT_SECS;
    use vaultrun_wire::{RequestIdentity, TeamFinished, TeamProgress};

    fn session() -> HostSession {
        HostSession::new("atomo", RoomCode::parse("AB3X9").unwrap())
    }

    fn question(n: usize) -> Question {
        Question {
            id: format!("q-{n}"),
            text: format!("pregunta {n}"),
            options: vec!["a".to_string(), "b".to_string()],
            correct_index: 0,
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            image_url: None,
        }
    }

    fn request(name: &str) -> Envelope {
        Payload::RequestIdentity(RequestIdentity { name: name.to_string() }).into()
    }

    fn finished(identity: &str) -> Envelope {
        Payload::TeamFinished(TeamFinished { identity: identity.to_string() }).into()
    }

    fn sync_names(outbound: &Outbound) -> Vec<String> {
        match &outbound.envelope.payload {
            Some(Payload::SyncIdentities(sync)) => sync.reserved.clone(),
            other => panic!("expected roster snapshot, got {other:?}"),
        }
    }

    #[test]
    fn connect_snapshot_reflects_current_roster() {
        let mut host = session();
        host.on_peer_connect(1);
        host.handle_message(1, request("Cobra"), 0);

        let hello = host.on_peer_connect(2);
        assert_eq!(hello.to, Destination::Link(2));
        assert_eq!(sync_names(&hello), vec!["Cobra"]);
        assert_eq!(host.links(), [1, 2]);
    }

    #[test]
    fn racing_requests_get_exactly_one_accept() {
        let mut host = session();
        host.on_peer_connect(1);
        host.on_peer_connect(2);

        // Both teams ask for "Lobo" in the same tick; the host handles each
        // request to completion, so the first one in wins.
        let first = host.handle_message(1, request("Lobo"), 0);
        assert_eq!(first.len(), 2);
        assert_eq!(
            first[0],
            Outbound::to_link(1, Payload::IdentityAccepted(IdentityAccepted {}))
        );
        assert_eq!(first[1].to, Destination::Broadcast);
        assert_eq!(sync_names(&first[1]), vec!["Lobo"]);

        let second = host.handle_message(2, request("Lobo"), 0);
        assert_eq!(
            second,
            vec![Outbound::to_link(2, Payload::IdentityDenied(IdentityDenied {}))]
        );

        // The loser retries under a different name and gets in.
        let retry = host.handle_message(2, request("Oso"), 0);
        assert_eq!(sync_names(&retry[1]), vec!["Lobo", "Oso"]);
        assert_eq!(host.reserved_identities(), ["Lobo", "Oso"]);
    }

    #[test]
    fn names_outside_the_catalog_are_denied() {
        let mut host = session();
        host.on_peer_connect(1);

        let replies = host.handle_message(1, request("Fantasma"), 0);
        assert_eq!(
            replies,
            vec![Outbound::to_link(1, Payload::IdentityDenied(IdentityDenied {}))]
        );
        assert!(host.reserved_identities().is_empty());
    }

    #[test]
    fn launch_splits_twenty_questions_into_five_even_sectors() {
        let mut host = session();
        host.on_peer_connect(1);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let out = host
            .launch_mission((0..20).map(question).collect(), 5_000, &mut rng)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, Destination::Broadcast);
        assert!(host.is_launched());

        let Some(Payload::LaunchMission(launch)) = &out[0].envelope.payload else {
            panic!("expected launch payload");
        };
        assert_eq!(launch.keyword, "ATOMO");
        assert_eq!(launch.sectors.len(), 5);

        for (i, sector) in launch.sectors.iter().enumerate() {
            assert_eq!(sector.id as usize, i + 1);
            assert_eq!(sector.name, format!("SECTOR_{:02}", i + 1));
            assert_eq!(sector.questions.len(), 4);
            let code: u32 = sector.access_code.parse().unwrap();
            assert!((10..100).contains(&code), "code {code} out of range");
            assert!(!sector.solved && !sector.locked);
        }

        // Every ingested question lands in exactly one sector.
        let mut ids: Vec<String> = launch
            .sectors
            .iter()
            .flat_map(|s| s.questions.iter().map(|q| q.id.clone()))
            .collect();
        ids.sort();
        let mut expected: Vec<String> = (0..20).map(|n| format!("q-{n}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn launch_balances_uneven_question_counts() {
        let mut host = session();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let out = host
            .launch_mission((0..12).map(question).collect(), 0, &mut rng)
            .unwrap();
        let Some(Payload::LaunchMission(launch)) = &out[0].envelope.payload else {
            panic!("expected launch payload");
        };

        let sizes: Vec<usize> = launch.sectors.iter().map(|s| s.questions.len()).collect();
        assert_eq!(sizes, [3, 3, 2, 2, 2]);
    }

    #[test]
    fn launch_rejects_thin_question_sets() {
        let mut host = session();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let err = host
            .launch_mission((0..4).map(question).collect(), 0, &mut rng)
            .unwrap_err();
        assert_eq!(err, LaunchError::NotEnoughQuestions { have: 4, need: 5 });
        assert!(!host.is_launched());

        // A failed launch does not burn the one-shot.
        assert!(host.launch_mission((0..5).map(question).collect(), 0, &mut rng).is_ok());
    }

    #[test]
    fn relaunch_is_rejected() {
        let mut host = session();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        host.launch_mission((0..5).map(question).collect(), 0, &mut rng).unwrap();
        let err = host
            .launch_mission((0..5).map(question).collect(), 9_000, &mut rng)
            .unwrap_err();
        assert_eq!(err, LaunchError::AlreadyLaunched);
    }

    #[test]
    fn completion_reports_record_once_with_first_duration() {
        let mut host = session();
        host.on_peer_connect(1);
        host.handle_message(1, request("Cobra"), 0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        host.launch_mission((0..5).map(question).collect(), 10_000, &mut rng).unwrap();

        assert!(host.handle_message(1, finished("Cobra"), 70_000).is_empty());
        assert_eq!(
            host.completions(),
            [CompletionRecord { identity: "Cobra".to_string(), elapsed_ms: 60_000 }]
        );

        // The duplicate neither appends nor recomputes.
        host.handle_message(1, finished("Cobra"), 95_000);
        assert_eq!(host.completions().len(), 1);
        assert_eq!(host.completions()[0].elapsed_ms, 60_000);

        assert!(host.teams_in_field().is_empty());
    }

    #[test]
    fn completion_ranking_follows_arrival_order() {
        let mut host = session();
        host.on_peer_connect(1);
        host.on_peer_connect(2);
        host.handle_message(1, request("Cobra"), 0);
        host.handle_message(2, request("Tigre"), 0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        host.launch_mission((0..10).map(question).collect(), 0, &mut rng).unwrap();

        host.handle_message(2, finished("Tigre"), 40_000);
        host.handle_message(1, finished("Cobra"), 55_000);

        let names: Vec<&str> = host.completions().iter().map(|c| c.identity.as_str()).collect();
        assert_eq!(names, ["Tigre", "Cobra"]);
        assert_eq!(host.teams_in_field(), Vec::<String>::new());
    }

    #[test]
    fn completion_report_before_launch_is_discarded() {
        let mut host = session();
        host.on_peer_connect(1);
        host.handle_message(1, request("Cobra"), 0);

        host.handle_message(1, finished("Cobra"), 30_000);
        assert!(host.completions().is_empty());
        assert_eq!(host.teams_in_field(), ["Cobra"]);
    }

    #[test]
    fn progress_reports_never_regress() {
        let mut host = session();
        host.on_peer_connect(1);

        let update = |n| Envelope::from(Payload::TeamProgress(TeamProgress {
            identity: "Oso".to_string(),
            solved_sectors: n,
        }));

        host.handle_message(1, update(2), 0);
        assert_eq!(host.progress_of("Oso"), 2);

        // A stale re-delivery cannot roll the monitor back.
        host.handle_message(1, update(1), 0);
        assert_eq!(host.progress_of("Oso"), 2);

        host.handle_message(1, update(5), 0);
        assert_eq!(host.progress_of("Oso"), 5);
        assert_eq!(host.progress_of("Cobra"), 0);
    }

    #[test]
    fn team_bound_and_empty_messages_are_discarded() {
        let mut host = session();
        host.on_peer_connect(1);

        let stray = Envelope::from(Payload::IdentityAccepted(IdentityAccepted {}));
        assert!(host.handle_message(1, stray, 0).is_empty());
        assert!(host.handle_message(1, Envelope::default(), 0).is_empty());
        assert!(host.reserved_identities().is_empty());
    }

    #[test]
    fn disconnect_keeps_reservations() {
        let mut host = session();
        host.on_peer_connect(1);
        host.handle_message(1, request("Pantera"), 0);

        host.on_peer_disconnect(1);
        assert!(host.links().is_empty());
        assert_eq!(host.reserved_identities(), ["Pantera"]);
    }
}
