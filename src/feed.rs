//! Event feeds: JSON lines files holding one envelope per line, in log order.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
    path::Path,
};

use itertools::Itertools as _;
use tracing::{debug, info, warn};

use crate::prelude::*;

/// Parses a feed. Blank lines are skipped; line numbers in errors are
/// one-based.
pub fn parse_envelopes(reader: impl BufRead) -> Result<Vec<Envelope>, Error> {
    let mut envelopes = vec![];

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let envelope = serde_json::from_str(&line).map_err(|e| Error::MalformedEnvelope {
            line: idx + 1,
            reason: e.to_string(),
        })?;

        envelopes.push(envelope);
    }

    Ok(envelopes)
}

pub fn read_envelopes(path: &Path) -> Result<Vec<Envelope>, Error> {
    let file = std::fs::File::open(path)?;
    let envelopes = parse_envelopes(BufReader::new(file))?;

    debug!(path = %path.display(), count = envelopes.len(), "feed loaded");

    Ok(envelopes)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub applied: usize,
    pub skipped: usize,
    pub aborted_handlers: usize,
    pub by_event: HashMap<&'static str, usize>,
    pub cursor: Option<LogPosition>,
}

/// Applies every envelope of a feed in order. A feed that isn't sorted by
/// log position has its out-of-order entries skipped by the engine.
pub fn apply_feed<'a, S, R>(
    engine: &mut Engine<S, R>,
    envelopes: impl IntoIterator<Item = &'a Envelope>,
) -> Result<FeedSummary, Error>
where
    S: StateStore,
    R: ContractReader,
{
    let mut summary = FeedSummary::default();
    let mut names = vec![];

    for envelope in envelopes {
        match engine.process(envelope)? {
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Applied { aborted } => {
                summary.applied += 1;
                summary.aborted_handlers += aborted;
                names.push(envelope.event.name());
            }
        }
    }

    summary.by_event = names.into_iter().counts();
    summary.cursor = engine.cursor();

    if summary.aborted_handlers > 0 {
        warn!(aborted = summary.aborted_handlers, "some handlers were rolled back");
    }

    info!(
        applied = summary.applied,
        skipped = summary.skipped,
        cursor = ?summary.cursor,
        "feed applied"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REWARD: &str = r#"{"block":{"number":10,"timestamp":1600000000,"hash":"0x0000000000000000000000000000000000000000000000000000000000000000"},"transaction":{"hash":"0x0000000000000000000000000000000000000000000000000000000000000001","from":"0x00000000000000000000000000000000000000bb","to":null,"gas_used":21000,"gas_price":"1"},"log_index":0,"address":"0x00000000000000000000000000000000000000cc","event":{"contract":"BondingManager","log":{"event":"Reward","params":{"transcoder":"0x00000000000000000000000000000000000000aa","amount":"5"}}}}"#;

    #[test]
    fn blank_lines_are_skipped() {
        let feed = format!("{REWARD}\n\n{REWARD}\n");
        let envelopes = parse_envelopes(feed.as_bytes()).unwrap();

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].event.name(), "Reward");
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let feed = format!("{REWARD}\nnot json\n");
        let err = parse_envelopes(feed.as_bytes()).unwrap_err();

        assert!(matches!(err, Error::MalformedEnvelope { line: 2, .. }));
    }
}
