//! `${VAR}` substitution for configuration values.

/// Replace every `${NAME}` in `value` with the process environment value.
/// Unset variables are left as the literal `${NAME}` text.
pub fn expand_env(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

pub(crate) fn expand_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(resolved) => out.push_str(&resolved),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            _ => {
                // unterminated or empty reference: copy verbatim
                out.push_str(&rest[start..start + 2]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
