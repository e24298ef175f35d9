/// Converts a path template such as `/users/{userId}/messages` to an anchored regex.
///
/// Each `{name}` placeholder matches exactly one non-empty path segment. Everything else is
/// matched literally; braces that do not enclose a valid name are literal too.
pub fn template_to_regex(template: &str) -> String {
    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + len];
        if is_placeholder_name(name) {
            pattern.push_str(&regex::escape(&rest[..open]));
            pattern.push_str(&format!("(?P<{name}>[^/]+)"));
        } else {
            pattern.push_str(&regex::escape(&rest[..=open + len]));
        }
        rest = &rest[open + len + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    pattern
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
