//! Shell-style brace expansion for positional source hostnames:
//! `host{a,b}.example` expands to `hosta.example` and `hostb.example`.
//! Unbalanced or comma-less braces are left unexpanded.

/// Expands every string in `inputs`, in order, concatenating each input's
/// own expansion into the flat result.
pub fn expand_all(inputs: &[String]) -> Vec<String> {
    inputs.iter().flat_map(|s| expand(s)).collect()
}

/// Expands a single hostname pattern.
pub fn expand(input: &str) -> Vec<String> {
    let Some((start, end)) = find_first_group(input) else {
        if input.contains('{') || input.contains('}') {
            tracing::warn!(input, "unbalanced brace expression left unexpanded");
        }
        return vec![input.to_string()];
    };

    let prefix = &input[..start];
    let body = &input[start + 1..end];
    let suffix = &input[end + 1..];
    let alternatives = split_top_level(body);

    if alternatives.len() <= 1 {
        tracing::warn!(input, "brace group has no alternatives, left unexpanded");
        return vec![input.to_string()];
    }

    alternatives
        .into_iter()
        .flat_map(|alt| expand(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

/// Finds the first `{` and its balanced matching `}`, honoring nesting.
/// Returns `None` if braces are absent or unbalanced.
fn find_first_group(input: &str) -> Option<(usize, usize)> {
    let bytes = input.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas at brace-nesting depth zero.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
