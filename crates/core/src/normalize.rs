use once_cell::sync::Lazy;
use regex::Regex;

static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+|_{2,}").expect("emphasis regex"));

/// Replaces Markdown emphasis markers (`*`, `**`, `__`) with a single space.
pub fn strip_emphasis(text: &str) -> String {
    EMPHASIS.replace_all(text, " ").into_owned()
}

/// Cleans extracted page text before chunking: emphasis artifacts are
/// removed, horizontal whitespace is collapsed per line and runs of blank
/// lines shrink to a single paragraph break.
pub fn clean_text(text: &str) -> String {
    let stripped = strip_emphasis(text);
    let mut out = String::with_capacity(stripped.len());
    let mut pending_break = false;
    for line in stripped.lines() {
        let line = normalize_line(line);
        if line.is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        pending_break = false;
    }
    out
}

fn normalize_line(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut prev_space = false;
    for ch in line.chars() {
        if ch.is_whitespace() || ch.is_control() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emphasis_markers_become_spaces() {
        assert_eq!(strip_emphasis("**Scope 1**"), " Scope 1 ");
        assert_eq!(strip_emphasis("__total__ emissions"), " total  emissions");
        assert_eq!(strip_emphasis("snake_case stays"), "snake_case stays");
    }

    #[test]
    fn whitespace_and_blank_lines_collapse() {
        let raw = "  GRI 305:\t\tEmissions  \n\n\n\n**Disclosure**   305-1\nline two\n\n";
        assert_eq!(
            clean_text(raw),
            "GRI 305: Emissions\n\nDisclosure 305-1\nline two"
        );
    }

    #[test]
    fn form_feeds_are_whitespace() {
        assert_eq!(clean_text("a\u{c}b"), "a b");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("\n \n\t\n"), "");
    }
}
