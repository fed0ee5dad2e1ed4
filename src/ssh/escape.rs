//! Shell argument escaping, used by every component that builds a
//! remote command line

/// Quote a value so it survives the remote shell untouched.
///
/// Values without single quotes are wrapped in single quotes; values
/// containing them fall back to double quotes with the characters the
/// shell would still interpret escaped.
pub fn shell_escape(value: &str) -> String {
    if value.is_empty() {
        return "\"\"".to_string();
    }

    if !value.contains('\'') {
        return format!("'{}'", value);
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' | '`' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped.push('"');
    escaped
}
