//! Automatic labels for new runs.

use once_cell::sync::Lazy;
use regex::Regex;

static NUMBERED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(?P<prefix>.*\D)?(?P<number>\d+)\s*$").ok());

/// Label for a new run given the label of the last run of the same kind
///
/// `"Import 2"` becomes `"Import 3"`; an unnumbered label gets ` 2`; with no
/// previous run the kind label is used as is.
#[must_use]
pub fn next_label(previous: Option<&str>, kind_label: &str) -> String {
    let Some(previous) = previous.map(str::trim).filter(|p| !p.is_empty()) else {
        return kind_label.to_string();
    };
    let captures = NUMBERED.as_ref().and_then(|re| re.captures(previous));
    if let Some(caps) = captures {
        let prefix = caps.name("prefix").map_or("", |m| m.as_str());
        if let Some(number) = caps.name("number").and_then(|m| m.as_str().parse::<u64>().ok()) {
            return format!("{}{}", prefix, number + 1);
        }
    }
    format!("{} 2", previous)
}
