/// Lowercase slug: letters and digits of any script kept, `+`, `#` and `&`
/// spelled out as words, every other run of characters collapsed to a single
/// `-`, no leading/trailing dashes.
///
/// Section ids are path-like (`/news/local/`), so they slugify to `news-local`.
/// Tags keep distinct keys apart: `C++` is `c-plus-plus`, `C#` is `c-sharp`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        let word = match c {
            '+' => Some("plus"),
            '#' => Some("sharp"),
            '&' => Some("and"),
            _ => None,
        };
        if let Some(word) = word {
            if !out.is_empty() {
                out.push('-');
            }
            out.push_str(word);
            pending_dash = true;
        } else if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out
}

/// `news-local` -> `News Local`.
pub fn title_case(slug: &str) -> String {
    slug.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters without splitting a char.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}
