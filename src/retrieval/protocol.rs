//! Parser for the lexical engine's line protocol.
//!
//! The engine prints one block per hit:
//!
//! ```text
//! Top 10 documents:
//! DocID: 7, Score: 12.41
//! Passage: the passage text
//! ```
//!
//! Parsing is forgiving. A header whose doc id or score does not parse is
//! recorded as malformed and skipped; every other record still comes
//! through. Lines that are neither headers nor passages are ignored.

const HEADER_PREFIX: &str = "DocID:";
const PASSAGE_PREFIX: &str = "Passage:";
const NO_MATCH_MARKERS: &[&str] = &["No matching documents found.", "No terms found in query."];

/// One well-formed hit.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRecord {
    pub doc_id: String,
    pub score: f32,
    pub passage: Option<String>,
}

/// A header line that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    /// 1-based line number in the engine output
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

/// Outcome of parsing one engine response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    /// Records in output order
    pub records: Vec<EngineRecord>,
    /// Dropped headers
    pub malformed: Vec<MalformedRecord>,
    /// The engine said explicitly that nothing matched
    pub no_match: bool,
    /// A `Top N documents:` banner was seen
    pub listing: bool,
}

impl ParseReport {
    /// Whether the output followed the protocol at all.
    ///
    /// Output with no records, no banner and no "no match" marker cannot be
    /// told apart from garbage.
    pub fn is_recognized(&self) -> bool {
        !self.records.is_empty() || self.no_match || self.listing
    }
}

/// Parse the engine's stdout.
pub fn parse_engine_output(output: &str) -> ParseReport {
    let mut report = ParseReport::default();
    let mut lines = output.lines().enumerate().peekable();

    while let Some((idx, raw)) = lines.next() {
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();

        if let Some(header) = trimmed.strip_prefix(HEADER_PREFIX) {
            let parsed = parse_header(header);

            // A passage line belongs to the header directly above it
            let passage = match lines.peek() {
                Some(&(_, next)) if next.trim_start().starts_with(PASSAGE_PREFIX) => {
                    let body = &next.trim_start().trim_end_matches('\r')[PASSAGE_PREFIX.len()..];
                    let text = body.strip_prefix(' ').unwrap_or(body).to_string();
                    lines.next();
                    Some(text)
                }
                _ => None,
            };

            match parsed {
                Ok((doc_id, score)) => report.records.push(EngineRecord {
                    doc_id,
                    score,
                    passage,
                }),
                Err(reason) => report.malformed.push(MalformedRecord {
                    line_number: idx + 1,
                    line: line.to_string(),
                    reason,
                }),
            }
        } else if NO_MATCH_MARKERS.contains(&trimmed) {
            report.no_match = true;
        } else if is_listing_banner(trimmed) {
            report.listing = true;
        }
    }

    report
}

/// Parse the part of a header after `DocID:`.
fn parse_header(rest: &str) -> Result<(String, f32), String> {
    let (id_part, score_part) = rest
        .split_once(',')
        .ok_or_else(|| "missing score field".to_string())?;

    let doc_id = id_part.trim();
    if doc_id.is_empty() {
        return Err("empty doc id".to_string());
    }
    doc_id
        .parse::<u64>()
        .map_err(|_| format!("doc id is not an integer: {doc_id}"))?;

    let score_text = score_part
        .trim()
        .strip_prefix("Score:")
        .ok_or_else(|| "missing score field".to_string())?
        .trim();
    let score: f32 = score_text
        .parse()
        .map_err(|_| format!("score is not a number: {score_text}"))?;
    if !score.is_finite() {
        return Err(format!("score is not finite: {score_text}"));
    }

    Ok((doc_id.to_string(), score))
}

fn is_listing_banner(line: &str) -> bool {
    line.strip_prefix("Top ")
        .and_then(|rest| rest.strip_suffix(" documents:"))
        .map(|n| n.trim().parse::<usize>().is_ok())
        .unwrap_or(false)
}
