//! Split long replies into messages the chat server accepts.

/// Preferred split points, best first.
const BOUNDARIES: &[&str] = &["\n```\n", "\n\n", "\n"];

/// Split `text` into pieces of at most `max` chars. Concatenating the pieces yields `text`.
///
/// Each cut is placed after the last code-fence, paragraph, or line boundary inside the
/// window, provided that boundary lies past half the window; otherwise the window is cut hard.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if max == 0 {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    loop {
        let Some((window_end, _)) = rest.char_indices().nth(max) else {
            chunks.push(rest.to_string());
            break;
        };
        let window = &rest[..window_end];
        let cut = BOUNDARIES
            .iter()
            .find_map(|b| {
                let end = window.rfind(b)? + b.len();
                (window[..end].chars().count() > max / 2).then_some(end)
            })
            .unwrap_or(window_end);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
        if rest.is_empty() {
            break;
        }
    }
    chunks
}
