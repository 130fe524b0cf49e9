/// Edit distance between two strings, by `char`, two-row DP.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    // Shorter string drives the row length.
    let (a, b) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if a.is_empty() {
        return b.len();
    }

    let mut prev: Vec<usize> = (0..=a.len()).collect();
    let mut curr = vec![0usize; a.len() + 1];

    for (j, cb) in b.iter().enumerate() {
        curr[0] = j + 1;
        for (i, ca) in a.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[i + 1] = (prev[i + 1] + 1).min(curr[i] + 1).min(prev[i] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[a.len()]
}

/// Whether an OCR token names `key`. Short keys (under four characters) must
/// prefix the token; longer keys may sit anywhere in it, and keys of five or
/// more characters also survive a single misread character.
pub fn token_matches_key(token: &str, key: &str) -> bool {
    if key.is_empty() || token.is_empty() {
        return false;
    }
    if key.chars().count() < 4 {
        return token.starts_with(key);
    }
    if token.contains(key) {
        return true;
    }
    key.chars().count() >= 5 && levenshtein_distance(token, key) <= 1
}
