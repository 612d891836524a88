//! Quiz source ingestion.
//!
//! Turns the semicolon-delimited question export into the flat, ordered
//! question sequence the host splits into sectors at launch. The parser is
//! deliberately forgiving: a header row is skipped heuristically, malformed
//! rows are dropped, and missing numeric fields fall back to defaults.
//! Row order is preserved here; the launch shuffle discards it later.

use tracing::warn;
use vaultrun_engine::{DEFAULT_TIME_LIMIT_SECS, Question};

/// Column layout: `kind; text; op1; op2; op3; op4; time; correct; image`.
const MIN_FIELDS: usize = 8;

/// Marker identifying the export's header row.
const HEADER_MARKER: &str = "tipo";

/// Parse a raw question export into normalized questions.
///
/// Yields one [`Question`] per valid row. Rows with fewer than eight
/// delimited fields, or that net fewer than two non-empty options, are
/// skipped. Question ids are `q-<line>` and stable within a session.
pub fn parse(raw: &str) -> Vec<Question> {
    let mut questions = Vec::new();

    for (number, line) in raw.trim().lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if number == 0 && line.to_lowercase().contains(HEADER_MARKER) {
            continue;
        }

        let fields: Vec<&str> = line.split(';').map(|f| unquote(f.trim())).collect();
        if fields.len() < MIN_FIELDS {
            warn!(line = number + 1, "skipping row with too few fields");
            continue;
        }

        // The leading kind column is presentation data; drop it.
        let options: Vec<String> = fields[2..6]
            .iter()
            .filter(|o| !o.is_empty())
            .map(|o| o.to_string())
            .collect();
        if options.len() < 2 {
            warn!(line = number + 1, "skipping row with fewer than two options");
            continue;
        }

        let time_limit_secs = fields[6]
            .parse::<u32>()
            .ok()
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_TIME_LIMIT_SECS);

        // The export's correct column is 1-based. An unparseable value
        // falls back to the first option, and a literal 0 clamps there
        // instead of underflowing.
        let correct_index = fields[7]
            .parse::<usize>()
            .map(|raw| raw.saturating_sub(1))
            .unwrap_or(0);

        let image_url = fields
            .get(8)
            .filter(|u| !u.is_empty())
            .map(|u| u.to_string());

        questions.push(Question {
            id: format!("q-{number}"),
            text: fields[1].to_string(),
            options,
            correct_index,
            time_limit_secs,
            image_url,
        });
    }

    questions
}

/// Strip one pair of surrounding double quotes, if present.
fn unquote(field: &str) -> &str {
    let field = field.strip_prefix('"').unwrap_or(field);
    field.strip_suffix('"').unwrap_or(field)
}

// ============================================================================
// Tests
// ============================================================================
