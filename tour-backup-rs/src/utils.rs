/// Reduce an arbitrary title to something safe for folder and file names:
/// ASCII alphanumerics, `-` and `_` only, runs collapsed, max 50 chars.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
            last_underscore = c == '_';
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    let truncated: String = trimmed.chars().take(50).collect();
    if truncated.is_empty() {
        "untitled".into()
    } else {
        truncated
    }
}

/// ceil(total / per_part); 0 items means 0 parts.
pub fn part_count(total_items: usize, items_per_part: usize) -> i64 {
    if items_per_part == 0 {
        return 0;
    }
    total_items.div_ceil(items_per_part) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_name("Ground Floor (East Wing)"), "Ground_Floor_East_Wing");
        assert_eq!(sanitize_name("a//b??c"), "a_b_c");
        assert_eq!(sanitize_name("___"), "untitled");
        assert_eq!(sanitize_name(""), "untitled");
    }

    #[test]
    fn sanitize_truncates_to_fifty() {
        let long = "x".repeat(80);
        assert_eq!(sanitize_name(&long).len(), 50);
    }

    #[test]
    fn part_count_rounds_up() {
        assert_eq!(part_count(95, 10), 10);
        assert_eq!(part_count(100, 10), 10);
        assert_eq!(part_count(1, 10), 1);
        assert_eq!(part_count(0, 10), 0);
    }
}
