//! Non-game filter (spec §4.2): decides whether a parsed record is
//! eligible for metadata enrichment.

const NON_GAME_TERMS: &[&str] = &[
    "manual", "update", "bios", "soundtrack", "bin", "cue", "txt", "nfo", "sample", "proof",
    "scans", "subs", "dlc", "patch", "firmware", "pdf", "readme", "m3u",
];

/// A filename is ineligible when it ends with `.<term>`, contains
/// `(<term>)` or `[<term>]`, or ends with ` <term>` for any vocabulary term.
pub fn is_eligible(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    let stem = match lower.rfind('.') {
        Some(idx) => &lower[..idx],
        None => lower.as_str(),
    };

    for term in NON_GAME_TERMS {
        if lower.ends_with(&format!(".{term}"))
            || lower.contains(&format!("({term})"))
            || lower.contains(&format!("[{term}]"))
            || stem.ends_with(&format!(" {term}"))
        {
            return false;
        }
    }

    true
}
