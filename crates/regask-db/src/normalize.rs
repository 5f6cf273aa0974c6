//! Name normalization for exact matching.
//!
//! Company names in the registry carry accents, mixed case, and punctuation
//! ("Viação São João S.A."). Exact matching is defined over a normalized form:
//! lowercase, diacritics folded away, punctuation dropped, whitespace
//! collapsed. The same function is applied at ingestion time (stored in the
//! `*_norm` columns) and at query time, so equality on the normalized form is
//! case- and diacritic-insensitive.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a name or free-text fragment for exact comparison.
///
/// Steps:
/// 1. NFD decomposition, dropping combining marks (folds "ã" to "a")
/// 2. Lowercasing
/// 3. Non-alphanumeric characters become spaces
/// 4. Whitespace runs collapse to a single space; leading/trailing trimmed
pub fn normalize_name(input: &str) -> String {
    let folded: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut out = String::with_capacity(folded.len());
    let mut last_was_space = true;
    for c in folded.chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_trims() {
        assert_eq!(normalize_name("  PETROBRAS  "), "petrobras");
    }

    #[test]
    fn test_folds_diacritics() {
        assert_eq!(normalize_name("Viação São João"), "viacao sao joao");
        assert_eq!(normalize_name("Açúcar União"), "acucar uniao");
    }

    #[test]
    fn test_strips_punctuation() {
        assert_eq!(
            normalize_name("Natura &Co. Holding S.A."),
            "natura co holding s a"
        );
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_name("a   b\t c"), "a b c");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize_name("   "), "");
    }
}
