// 🔎 Name matching - normalization + fuzzy comparison for catalog lookups
//
// "Amul Butter 500g", "AMUL BUTTER", "amul  butter." → all "amul butter"

/// Normalize an item name for matching
///
/// - Lowercase
/// - Punctuation becomes whitespace
/// - Drops size/unit tokens ("500g", "1kg", "2l", "250ml", "12pcs", "x2")
/// - Collapses whitespace
pub fn normalize_name(s: &str) -> String {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    lowered
        .split_whitespace()
        .filter(|word| !is_size_token(word))
        .collect::<Vec<_>>()
        .join(" ")
}

const UNIT_SUFFIXES: &[&str] = &[
    "kg", "g", "gm", "gms", "mg", "l", "ltr", "ml", "pc", "pcs", "pack", "oz", "lb",
];

fn is_size_token(word: &str) -> bool {
    // "x2" multipack marker
    if let Some(rest) = word.strip_prefix('x') {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }

    let digits_end = word
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(word.len());

    if digits_end == 0 {
        return false;
    }

    let suffix = &word[digits_end..];
    UNIT_SUFFIXES.contains(&suffix)
}

/// Minimum number of single-character edits (insertions, deletions,
/// substitutions) to change one string into another
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Lowercase, alphanumerics joined by '-'
pub fn slugify(s: &str) -> String {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
