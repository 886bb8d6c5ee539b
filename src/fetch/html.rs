// src/fetch/html.rs
//! Minimal HTML slicing for the scraped portals.
//!
//! Deliberately naive string scanning tailored to the portals' table
//! layouts; tag and attribute matching is ASCII case-insensitive. When a
//! portal redesigns its markup these helpers find nothing, which the
//! fetchers treat as a layout-change failure rather than an empty result.

/// Content between an opening tag (matched as a prefix, attributes allowed)
/// and its closing tag, case-insensitive.
pub fn slice_between_ci<'a>(s: &'a str, open_pat: &str, close_pat: &str) -> Option<&'a str> {
    let lc = lower_ascii(s);
    let open_lc = lower_ascii(open_pat);
    let close_lc = lower_ascii(close_pat);

    let open_idx = lc.find(&open_lc)?;
    let after_open = s[open_idx..].find('>')? + open_idx + 1;
    let close_rel = lc[after_open..].find(&close_lc)?;
    Some(&s[after_open..after_open + close_rel])
}

/// Next `<tag ...>...</tag>` block at or after `from`; returns the span
/// including both tags.
pub fn next_tag_block_ci(
    s: &str,
    open_tag: &str,
    close_tag: &str,
    from: usize,
) -> Option<(usize, usize)> {
    let lc = lower_ascii(s);
    let open_lc = lower_ascii(open_tag);
    let close_lc = lower_ascii(close_tag);

    let start = lc.get(from..)?.find(&open_lc)? + from;
    let open_end = s[start..].find('>')? + start + 1;
    let end_rel = lc[open_end..].find(&close_lc)?;
    Some((start, open_end + end_rel + close_tag.len()))
}

/// Iterate the inner text of every cell tag (`td`/`th`) inside a row block.
pub fn cell_texts(row: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut pos = 0;
    while let Some((start, end)) = next_tag_block_ci(row, "<td", "</td>", pos) {
        cells.push(text_content(&row[start..end]));
        pos = end;
    }
    cells
}

/// Strip tags, decode entities, collapse whitespace.
pub fn text_content(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    let decoded = html_escape::decode_html_entities(&out).to_string();
    crate::normalize::squash_ws(&decoded)
}

/// First `href` attribute value inside a fragment, if any.
pub fn first_href(fragment: &str) -> Option<String> {
    let lc = lower_ascii(fragment);
    let idx = lc.find("href=")?;
    let rest = &fragment[idx + 5..];
    let quote = rest.chars().next()?;
    if quote == '"' || quote == '\'' {
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        Some(inner[..end].to_string())
    } else {
        let end = rest.find([' ', '>']).unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}

fn lower_ascii(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect()
}
