//! Safe wildcard translation for cache queries.
//!
//! User-facing patterns support `*` (any run) and `?` (single character).
//! They are mapped onto SQL `LIKE` with `\` escaping; literal `%`, `_`, and
//! `\` in user input are escaped so input can never splice into the query
//! language. Always pair the output with `ESCAPE '\'`.

/// Translate a `*`/`?` glob into a LIKE pattern.
pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape a literal string for use as a LIKE prefix (no wildcards honored).
pub fn escape_like(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Whether a pattern contains any glob metacharacters.
pub fn has_wildcards(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_and_question_translate() {
        assert_eq!(glob_to_like("proj*"), "proj%");
        assert_eq!(glob_to_like("t?g"), "t_g");
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(glob_to_like("100%_done"), "100\\%\\_done");
        assert_eq!(glob_to_like("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn escape_like_is_wildcard_free() {
        assert_eq!(escape_like("a*b"), "a*b");
        assert_eq!(escape_like("50%"), "50\\%");
    }
}
