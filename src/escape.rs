/// Reverse one level of backslash escaping over binding text.
///
/// Applied to the whole text before evaluation under the legacy evaluation
/// version. Unknown escapes drop the backslash; a trailing lone backslash is
/// kept as is.
pub fn unescape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            'x' => match take_hex(&mut chars, 2) {
                Some(ch) => out.push(ch),
                None => out.push('x'),
            },
            'u' if chars.peek() == Some(&'{') => {
                chars.next();
                let digits: String = chars.by_ref().take_while(|c| *c != '}').collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push_str("u{");
                        out.push_str(&digits);
                        out.push('}');
                    }
                }
            }
            'u' => match take_hex(&mut chars, 4) {
                Some(ch) => out.push(ch),
                None => out.push('u'),
            },
            other => out.push(other),
        }
    }
    out
}

/// Consume exactly `n` hex digits if they are all present.
fn take_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, n: usize) -> Option<char> {
    let lookahead: String = chars.clone().take(n).collect();
    if lookahead.chars().count() != n || !lookahead.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    for _ in 0..n {
        chars.next();
    }
    u32::from_str_radix(&lookahead, 16).ok().and_then(char::from_u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn quotes_and_backslashes() {
        assert_eq!(unescape_js(r#"\"Hello!\""#), r#""Hello!""#);
        assert_eq!(unescape_js(r"a\\nb"), r"a\nb");
        assert_eq!(unescape_js(r#"[1, 2, 3].join("\\n")"#), r#"[1, 2, 3].join("\n")"#);
    }

    #[test]
    fn control_and_unicode_escapes() {
        assert_eq!(unescape_js(r"\t\x41B\u{1F600}"), "\tAB\u{1F600}");
        assert_eq!(unescape_js(r"\q"), "q");
        assert_eq!(unescape_js("end\\"), "end\\");
    }

    #[test]
    fn plain_text_is_untouched() {
        let text = "data.items.map(i => i.name)";
        assert_eq!(unescape_js(text), text);
    }
}
