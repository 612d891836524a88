//! Vaultrun Sector Engine
//!
//! This crate contains the pure gameplay state machines owned by a Team
//! Session: quiz sectors that guard two-digit access codes, and the vault
//! check that aggregates those codes into mission completion.
//!
//! # Architecture Constraints
//!
//! The engine MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Use ambient/unseeded randomness
//!
//! Every time-dependent operation takes an explicit millisecond timestamp
//! supplied by the owning session, so the whole crate is deterministic
//! under test.

#![deny(unsafe_code)]

use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Wall-clock instant in milliseconds, supplied by the caller.
pub type TimestampMs = u64;

/// Sector identifier, 1-based within a mission.
pub type SectorId = u32;

// ============================================================================
// Mission Constants
// ============================================================================

/// Number of sectors in every mission.
pub const SECTOR_COUNT: usize = 5;

/// Penalty lockout applied to a sector after a wrong answer.
pub const LOCKOUT_DURATION_MS: u64 = 10_000;

/// Advisory per-question time limit used when the quiz source omits one.
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 45;

// ============================================================================
// Squad Catalog
// ============================================================================

/// A reservable team identity with its display icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Squad {
    pub name: &'static str,
    pub icon: &'static str,
}

/// The fixed catalog of team identities. At most one connected team may
/// hold each name at a time; arbitration is the host's job.
pub const SQUAD_CATALOG: [Squad; 8] = [
    Squad { name: "Cobra", icon: "🐍" },
    Squad { name: "Tigre", icon: "🐅" },
    Squad { name: "Halcón", icon: "🦅" },
    Squad { name: "Lobo", icon: "🐺" },
    Squad { name: "Tiburón", icon: "🦈" },
    Squad { name: "Águila", icon: "🦅" },
    Squad { name: "Pantera", icon: "🐆" },
    Squad { name: "Oso", icon: "🐻" },
];

/// Whether `name` is one of the reservable squad identities.
pub fn squad_in_catalog(name: &str) -> bool {
    SQUAD_CATALOG.iter().any(|s| s.name == name)
}

// ============================================================================
// Core Types
// ============================================================================

/// A single quiz question. Immutable once created.
///
/// `time_limit_secs` is advisory presentation data; nothing in the engine
/// enforces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    /// Unique, stable within a session.
    pub id: String,
    pub text: String,
    /// Ordered option strings.
    pub options: Vec<String>,
    /// Zero-based index of the correct option.
    pub correct_index: usize,
    pub time_limit_secs: u32,
    pub image_url: Option<String>,
}

/// Lifecycle of a sector.
///
/// `Solved` is terminal; `Locked` can only be left via [`Sector::tick`],
/// which restores `Active` at the first question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorPhase {
    /// Accepting answers; `cursor` indexes the question being asked.
    Active { cursor: usize },
    /// Penalty lockout after a wrong answer.
    Locked { until: TimestampMs },
    /// All questions answered correctly.
    Solved,
}

/// Result of a successfully registered answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Correct; the sector moved on to the question at `cursor`.
    Advanced { cursor: usize },
    /// Correct, and it was the last question: the sector is solved.
    Solved,
    /// Wrong; the sector is locked until the given instant and its
    /// progress is reset to the first question.
    LockedOut { until: TimestampMs },
}

/// Why an answer was rejected without being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnswerError {
    #[error("sector is locked until {until}ms")]
    Locked { until: TimestampMs },
    #[error("sector is already solved")]
    AlreadySolved,
}

// ============================================================================
// Sector
// ============================================================================

/// One quiz "room" of questions guarding a two-digit access code.
///
/// A sector belongs to exactly one team session; the host builds the
/// initial set at mission launch and each team evolves its own copy
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    id: SectorId,
    name: String,
    questions: Vec<Question>,
    access_code: String,
    phase: SectorPhase,
}

impl Sector {
    /// Create a fresh sector at its first question.
    ///
    /// # Panics
    /// If `questions` is empty. A sector with no questions is a
    /// data/config error, not a valid state; the host validates question
    /// counts before building sectors.
    pub fn new(
        id: SectorId,
        name: impl Into<String>,
        questions: Vec<Question>,
        access_code: impl Into<String>,
    ) -> Self {
        Self::restore(id, name, questions, access_code, SectorPhase::Active { cursor: 0 })
    }

    /// Reconstruct a sector in an explicit phase, e.g. from a wire payload.
    ///
    /// # Panics
    /// If `questions` is empty, or if an `Active` cursor does not index
    /// into `questions`.
    pub fn restore(
        id: SectorId,
        name: impl Into<String>,
        questions: Vec<Question>,
        access_code: impl Into<String>,
        phase: SectorPhase,
    ) -> Self {
        assert!(!questions.is_empty(), "sector {id} has no questions");
        if let SectorPhase::Active { cursor } = phase {
            assert!(
                cursor < questions.len(),
                "sector {id} cursor {cursor} out of range"
            );
        }

        Self {
            id,
            name: name.into(),
            questions,
            access_code: access_code.into(),
            phase,
        }
    }

    pub fn id(&self) -> SectorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_code(&self) -> &str {
        &self.access_code
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn phase(&self) -> SectorPhase {
        self.phase
    }

    pub fn is_solved(&self) -> bool {
        self.phase == SectorPhase::Solved
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.phase, SectorPhase::Locked { .. })
    }

    /// Lockout expiry, when locked.
    pub fn lockout_end(&self) -> Option<TimestampMs> {
        match self.phase {
            SectorPhase::Locked { until } => Some(until),
            _ => None,
        }
    }

    /// The question currently being asked, when active.
    pub fn current_question(&self) -> Option<&Question> {
        match self.phase {
            SectorPhase::Active { cursor } => self.questions.get(cursor),
            _ => None,
        }
    }

    /// Register an answer to the current question.
    ///
    /// A correct option advances the cursor, solving the sector on the
    /// last question. A wrong option (any index that is not the correct
    /// one, out-of-range included) locks the sector until
    /// `now + LOCKOUT_DURATION_MS` and resets its progress to the first
    /// question: a wrong answer costs the sector's whole run, not just
    /// the current question.
    pub fn answer(
        &mut self,
        option_index: usize,
        now: TimestampMs,
    ) -> Result<AnswerOutcome, AnswerError> {
        let cursor = match self.phase {
            SectorPhase::Active { cursor } => cursor,
            SectorPhase::Locked { until } => return Err(AnswerError::Locked { until }),
            SectorPhase::Solved => return Err(AnswerError::AlreadySolved),
        };

        if option_index == self.questions[cursor].correct_index {
            if cursor + 1 < self.questions.len() {
                self.phase = SectorPhase::Active { cursor: cursor + 1 };
                Ok(AnswerOutcome::Advanced { cursor: cursor + 1 })
            } else {
                self.phase = SectorPhase::Solved;
                Ok(AnswerOutcome::Solved)
            }
        } else {
            let until = now + LOCKOUT_DURATION_MS;
            self.phase = SectorPhase::Locked { until };
            Ok(AnswerOutcome::LockedOut { until })
        }
    }

    /// Clear an expired lockout. This is the only transition out of
    /// `Locked`; the owning session calls it at a regular cadence, and
    /// the check tolerates late calls (`until <= now`, not equality).
    ///
    /// Returns `true` if the sector unlocked on this call.
    pub fn tick(&mut self, now: TimestampMs) -> bool {
        match self.phase {
            SectorPhase::Locked { until } if until <= now => {
                self.phase = SectorPhase::Active { cursor: 0 };
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// Vault
// ============================================================================

/// Check a set of entered access codes against the mission's sectors.
///
/// Succeeds iff there is one entered code per sector and each string-equals
/// the positionally corresponding sector's access code. The check is purely
/// code equality: it deliberately does not require the sectors to be
/// solved, matching the long-standing behavior of the vault screen.
pub fn vault_open(codes: &[String], sectors: &[Sector]) -> bool {
    codes.len() == sectors.len()
        && codes
            .iter()
            .zip(sectors)
            .all(|(code, sector)| code == sector.access_code())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            text: format!("question {id}"),
            options: vec!["right".to_string(), "wrong".to_string()],
            correct_index: 0,
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            image_url: None,
        }
    }

    fn sector_with(count: usize) -> Sector {
        let questions = (0..count).map(|i| question(&format!("q-{i}"))).collect();
        Sector::new(3, "SECTOR_03", questions, "42")
    }

    #[test]
    fn correct_answers_advance_then_solve() {
        let mut sector = sector_with(3);

        assert_eq!(sector.answer(0, 0), Ok(AnswerOutcome::Advanced { cursor: 1 }));
        assert_eq!(sector.answer(0, 0), Ok(AnswerOutcome::Advanced { cursor: 2 }));
        assert_eq!(sector.answer(0, 0), Ok(AnswerOutcome::Solved));
        assert!(sector.is_solved());
    }

    #[test]
    fn wrong_answer_locks_and_resets_progress() {
        let mut sector = sector_with(4);
        let now = 5_000;

        // Three correct answers, then a miss on the fourth question.
        for _ in 0..3 {
            sector.answer(0, now).unwrap();
        }
        let outcome = sector.answer(1, now).unwrap();

        assert_eq!(outcome, AnswerOutcome::LockedOut { until: now + 10_000 });
        assert!(sector.is_locked());
        assert_eq!(sector.lockout_end(), Some(15_000));

        // The whole run is forfeit: after the lockout clears, the cursor
        // is back at the first question.
        sector.tick(15_000);
        assert_eq!(sector.phase(), SectorPhase::Active { cursor: 0 });
    }

    #[test]
    fn locked_sector_rejects_answers_until_tick() {
        let mut sector = sector_with(2);
        sector.answer(1, 1_000).unwrap();

        assert_eq!(sector.answer(0, 2_000), Err(AnswerError::Locked { until: 11_000 }));

        // Expiry alone does not unlock; only the tick does.
        assert_eq!(sector.answer(0, 20_000), Err(AnswerError::Locked { until: 11_000 }));
        assert!(sector.tick(20_000));
        assert_eq!(sector.answer(0, 20_000), Ok(AnswerOutcome::Advanced { cursor: 1 }));
    }

    #[test]
    fn tick_boundary_is_inclusive() {
        let mut sector = sector_with(1);
        let now = 100_000;
        sector.answer(1, now).unwrap();

        assert!(!sector.tick(now + 9_999));
        assert!(sector.is_locked());

        assert!(sector.tick(now + 10_000));
        assert_eq!(sector.phase(), SectorPhase::Active { cursor: 0 });
    }

    #[test]
    fn tick_tolerates_late_calls() {
        let mut sector = sector_with(1);
        sector.answer(1, 0).unwrap();

        // A poll arriving well past the expiry still clears the lock.
        assert!(sector.tick(500_000));
    }

    #[test]
    fn solved_is_terminal() {
        let mut sector = sector_with(1);
        sector.answer(0, 0).unwrap();
        assert!(sector.is_solved());

        assert_eq!(sector.answer(0, 1_000), Err(AnswerError::AlreadySolved));
        assert_eq!(sector.answer(1, 1_000), Err(AnswerError::AlreadySolved));
        assert!(!sector.tick(1_000_000));
        assert!(sector.is_solved());
    }

    #[test]
    fn out_of_range_option_counts_as_wrong() {
        let mut sector = sector_with(2);
        let outcome = sector.answer(17, 1_000).unwrap();
        assert_eq!(outcome, AnswerOutcome::LockedOut { until: 11_000 });
    }

    #[test]
    #[should_panic(expected = "has no questions")]
    fn sector_requires_questions() {
        let _ = Sector::new(1, "SECTOR_01", Vec::new(), "10");
    }

    #[test]
    fn vault_opens_on_exact_codes() {
        let sectors: Vec<Sector> = (1..=5)
            .map(|i| {
                Sector::new(i, format!("SECTOR_0{i}"), vec![question("q")], format!("{}", 10 + i))
            })
            .collect();

        let codes: Vec<String> = (1..=5).map(|i| format!("{}", 10 + i)).collect();
        assert!(vault_open(&codes, &sectors));

        // One wrong slot fails the whole attempt.
        let mut wrong = codes.clone();
        wrong[2] = "99".to_string();
        assert!(!vault_open(&wrong, &sectors));

        // So does a missing slot.
        assert!(!vault_open(&codes[..4], &sectors));
    }

    #[test]
    fn vault_does_not_require_solved_sectors() {
        // Documented permissiveness: the check is code equality only, so a
        // team that guessed the right digits opens the vault without
        // having solved anything.
        let sectors: Vec<Sector> = (1..=5)
            .map(|i| Sector::new(i, format!("SECTOR_0{i}"), vec![question("q")], "77"))
            .collect();
        assert!(sectors.iter().all(|s| !s.is_solved()));

        let codes = vec!["77".to_string(); 5];
        assert!(vault_open(&codes, &sectors));
    }

    #[test]
    fn catalog_has_unique_names() {
        for (i, squad) in SQUAD_CATALOG.iter().enumerate() {
            assert!(squad_in_catalog(squad.name));
            assert!(
                !SQUAD_CATALOG[i + 1..].iter().any(|s| s.name == squad.name),
                "duplicate squad {}",
                squad.name
            );
        }
        assert!(!squad_in_catalog("Fantasma"));
    }
}
