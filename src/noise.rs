//! Classifies short text fragments produced by misreading avatars, badges
//! and other graphics.

/// Tokens up to this many characters are treated as noise outright.
pub(crate) const ALWAYS_NOISE_MAX_LEN: usize = 2;
/// Upper bound of the "short token" tier where casing and digit mixes matter.
pub(crate) const SHORT_TOKEN_MAX_LEN: usize = 4;

fn has_irregular_casing(token: &str) -> bool {
    let letters = token.chars().filter(|ch| ch.is_alphabetic()).collect::<Vec<_>>();
    // Capitalised, all-lower and all-upper words are regular; an uppercase
    // letter following a lowercase one ("oDe", "xYz") is not.
    letters
        .windows(2)
        .any(|pair| pair[0].is_lowercase() && pair[1].is_uppercase())
}

/// Whether `token` is recognition noise rather than label text.
#[must_use]
pub fn is_noise(token: &str) -> bool {
    let token = token.trim();
    let len = token.chars().count();
    if len <= ALWAYS_NOISE_MAX_LEN {
        return true;
    }

    let has_letter = token.chars().any(char::is_alphabetic);
    let has_digit = token.chars().any(|ch| ch.is_ascii_digit());
    let all_digits = token.chars().all(|ch| ch.is_ascii_digit());

    if all_digits || !has_letter {
        return true;
    }

    if len <= SHORT_TOKEN_MAX_LEN {
        // Mixed letters and digits, or letters with symbols.
        if has_digit || !token.chars().all(char::is_alphabetic) {
            return true;
        }
        return has_irregular_casing(token);
    }

    false
}
