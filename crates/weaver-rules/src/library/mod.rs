//! Built-in rule library.
//!
//! Each rule declares its trigger, condition, action, and the invariants it
//! preserves; all four are constructed from their section of the rules
//! configuration and registered by the daemon at startup.

mod auto_link;
mod auto_tag;
mod daily_note;
mod meeting_note;

pub use auto_link::AutoLinkRule;
pub use auto_tag::AutoTagRule;
pub use daily_note::DailyNoteRule;
pub use meeting_note::MeetingNoteRule;

pub(crate) mod text {
    //! Small text utilities shared by the library rules.

    /// Levenshtein similarity ratio in `[0, 1]`.
    pub fn similarity(a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return 1.0;
        }
        1.0 - levenshtein(a, b) as f64 / longest as f64
    }

    fn levenshtein(a: &str, b: &str) -> usize {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.is_empty() {
            return b.len();
        }
        if b.is_empty() {
            return a.len();
        }
        let mut prev: Vec<usize> = (0..=b.len()).collect();
        let mut current = vec![0; b.len() + 1];
        for (i, ca) in a.iter().enumerate() {
            current[0] = i + 1;
            for (j, cb) in b.iter().enumerate() {
                let substitution = prev[j] + usize::from(ca != cb);
                current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
            }
            std::mem::swap(&mut prev, &mut current);
        }
        prev[b.len()]
    }

    /// Filesystem-safe slug: lowercase alphanumerics joined by dashes.
    pub fn slug(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut pending_dash = false;
        for ch in input.chars() {
            if ch.is_alphanumeric() {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.extend(ch.to_lowercase());
            } else {
                pending_dash = true;
            }
        }
        out
    }

}
