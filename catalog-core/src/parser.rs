//! Pure, stateless filename parsing (spec "Filename Parser").
//!
//! Splits a raw archive filename into a base title, the ordered list of
//! bracketed tags, and (if one tag classifies as regional) the region.

/// Region vocabulary: a tag is regional when at least half of its
/// comma/plus-separated, lowercased pieces appear in this set.
const REGION_VOCAB: &[&str] = &[
    "usa", "japan", "europe", "world", "asia", "australia", "brazil", "canada", "china",
    "denmark", "finland", "france", "germany", "greece", "hong kong", "israel", "italy", "korea",
    "netherlands", "norway", "poland", "portugal", "russia", "spain", "sweden", "taiwan", "uk",
    "united kingdom",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedFilename {
    pub base_name: String,
    pub tags: Vec<String>,
    pub region: String,
}

/// Parse a filename into base title, tags, and region (spec §4.1).
pub fn parse(filename: &str) -> ParsedFilename {
    let stem = strip_extension(filename);
    let base_name = base_name(stem);
    let tags = extract_tags(stem);
    let region = classify_region(&tags);
    ParsedFilename { base_name, tags, region }
}

/// Strip the extension: everything from the last `.` onward.
fn strip_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) => &filename[..idx],
        None => filename,
    }
}

/// The portion preceding the first `(` or `[`, trimmed.
fn base_name(stem: &str) -> String {
    let cut = first_bracket_index(stem).unwrap_or(stem.len());
    stem[..cut].trim().to_string()
}

fn first_bracket_index(stem: &str) -> Option<usize> {
    match (stem.find('('), stem.find('[')) {
        (Some(p), Some(b)) => Some(p.min(b)),
        (Some(p), None) => Some(p),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Every substring enclosed by matching `(...)`/`[...]` pairs, in order,
/// matched non-greedily (first closing bracket after the opener).
fn extract_tags(stem: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut rest = stem;

    loop {
        let (open_idx, close_ch) = match (rest.find('('), rest.find('[')) {
            (Some(p), Some(b)) if b < p => (b, ']'),
            (Some(p), Some(_)) => (p, ')'),
            (Some(p), None) => (p, ')'),
            (None, Some(b)) => (b, ']'),
            (None, None) => break,
        };

        let after_open = &rest[open_idx + 1..];
        match after_open.find(close_ch) {
            Some(close_rel) => {
                tags.push(after_open[..close_rel].to_string());
                rest = &after_open[close_rel + 1..];
            }
            None => break, // unmatched bracket: stop scanning
        }
    }

    tags
}

/// The first tag whose comma/plus-split, lowercased pieces are at least
/// half region-vocabulary words. Later region-shaped tags never overwrite.
fn classify_region(tags: &[String]) -> String {
    for tag in tags {
        let pieces: Vec<String> = tag
            .split(|c| c == ',' || c == '+')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        if pieces.is_empty() {
            continue;
        }

        let hits = pieces.iter().filter(|p| REGION_VOCAB.contains(&p.as_str())).count();
        if hits * 2 >= pieces.len() {
            return tag.clone();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_leaf() {
        let p = parse("Super Mario Bros. (USA).nes");
        assert_eq!(p.base_name, "Super Mario Bros.");
        assert_eq!(p.tags, vec!["USA"]);
        assert_eq!(p.region, "USA");
    }

    #[test]
    fn multi_region_tag_is_region() {
        let p = parse("Mega Man (USA, Europe).zip");
        assert_eq!(p.tags, vec!["USA, Europe"]);
        assert_eq!(p.region, "USA, Europe");
    }

    #[test]
    fn language_tag_is_not_region() {
        let p = parse("Chrono Trigger (En,Fr,De).smc");
        assert_eq!(p.tags, vec!["En,Fr,De"]);
        assert_eq!(p.region, "");
    }

    #[test]
    fn base_name_never_contains_brackets() {
        let p = parse("Final Fantasy VII (Disc 1) [!].bin");
        assert!(!p.base_name.contains('('));
        assert!(!p.base_name.contains('['));
        assert_eq!(p.base_name, "Final Fantasy VII");
    }

    #[test]
    fn tags_are_ordered_and_exhaustive() {
        let p = parse("Chrono Trigger (USA) (Rev 1) [T-En].smc");
        assert_eq!(p.tags, vec!["USA", "Rev 1", "T-En"]);
    }

    #[test]
    fn no_extension_still_parses() {
        let p = parse("README");
        assert_eq!(p.base_name, "README");
        assert!(p.tags.is_empty());
    }

    #[test]
    fn first_region_tag_wins() {
        // Two region-shaped tags: "USA" then "Japan" — first one wins.
        let p = parse("Game (USA) (Japan).zip");
        assert_eq!(p.region, "USA");
    }
}
