/// Short excerpt of `candidate` around the first character where it stops
/// matching `current`: `...<before>{<diverging text>}...`.
pub fn divergence_preview(current: &str, candidate: &str, before: usize, after: usize) -> String {
    let candidate_chars: Vec<char> = candidate.chars().collect();
    let split = current
        .chars()
        .zip(candidate_chars.iter())
        .take_while(|(left, right)| left == *right)
        .count();

    let start = split.saturating_sub(before);
    let end = (split + after).min(candidate_chars.len());
    let context: String = candidate_chars[start..split].iter().collect();
    let diverging: String = candidate_chars[split..end].iter().collect();
    format!("...{context}{{{diverging}}}...")
}

#[cfg(test)]
mod tests {
    use super::divergence_preview;

    #[test]
    fn marks_the_first_diverging_text() {
        let preview = divergence_preview("Line1", "Line1\nLine2b", 10, 60);
        assert_eq!(preview, "...Line1{\nLine2b}...");
    }

    #[test]
    fn context_is_limited_on_both_sides() {
        let current = "0123456789abcdefXYZ";
        let candidate = "0123456789abcdef-the rest of the branch";
        let preview = divergence_preview(current, candidate, 4, 5);
        assert_eq!(preview, "...cdef{-the }...");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let preview = divergence_preview("héllo wörld", "héllo wärld", 3, 2);
        assert_eq!(preview, "...o w{är}...");
    }

    #[test]
    fn truncated_candidate_yields_empty_divergence() {
        assert_eq!(divergence_preview("abcdef", "abc", 10, 60), "...abc{}...");
    }
}
