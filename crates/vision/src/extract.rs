use std::sync::OnceLock;

use dockscan_core::{manifest_from_digits, CompiledProfile, FieldSet, RecognitionResult, Word};
use regex::Regex;
use tracing::debug;

use crate::util::token_matches_key;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_manifest_keyword, r"(?:MS#|M5#|M5N)\s*:?\s*(6100\d{6})");
re!(re_manifest_exact, r"\b6100\d{6}\b");
re!(re_manifest_spaced, r"6\s*1\s*0\s*0[\s-]*\d[\d\s-]{6,8}");

/// A value on the key's line must have its centre within this share of the
/// key's glyph height.
const SAME_LINE_TOLERANCE: f32 = 0.7;

// ── Normalization ─────────────────────────────────────────────────────────────

/// Upper-case and drop control characters (line breaks survive, tabs become
/// spaces).
pub fn normalize_text(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|&c| c == '\n' || !c.is_control())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Fold letters OCR confuses with digits. Only for the numeric path; running
/// this over a model or customer value would corrupt it.
pub fn fold_confusables(text: &str, extended: bool) -> String {
    text.chars()
        .map(|c| match c {
            'O' | 'Q' => '0',
            'I' | 'L' => '1',
            'S' if extended => '5',
            'B' if extended => '8',
            other => other,
        })
        .collect()
}

fn clean_value(token: &str) -> String {
    token.replace([':', '/'], "").trim().to_string()
}

// ── Public extraction API ─────────────────────────────────────────────────────

/// Pulls named fields out of recognized text for one brand profile.
pub struct Extractor<'a> {
    profile: &'a CompiledProfile,
}

impl<'a> Extractor<'a> {
    pub fn new(profile: &'a CompiledProfile) -> Self {
        Self { profile }
    }

    pub fn extract(&self, recognition: &RecognitionResult) -> FieldSet {
        let fields = FieldSet {
            manifest_number: self.find_manifest(recognition),
            model: self.find_model(recognition),
            customer: self.keyed_value(recognition, self.profile.customer_keys()),
        };
        debug!(
            manifest = fields.manifest_number.as_deref().unwrap_or("-"),
            model = fields.model.as_deref().unwrap_or("-"),
            customer = fields.customer.as_deref().unwrap_or("-"),
            "fields extracted"
        );
        fields
    }

    /// Manifest number only: keyed value first, then the profile pattern, then
    /// the cascade over the whole text. Every candidate is re-validated.
    pub fn find_manifest(&self, recognition: &RecognitionResult) -> Option<String> {
        let extended = self.profile.profile.fold_extended_confusables;

        if let Some(value) = self.keyed_value(recognition, self.profile.manifest_keys()) {
            if let Some(m) = manifest_from_digits(&fold_confusables(&value, extended)) {
                return Some(m);
            }
        }

        // Brand patterns are written against the printed text, so they see it
        // before the fold; only the captured value is folded.
        let text = normalize_text(&recognition.raw_text);
        if let Some(re) = &self.profile.manifest_regex {
            let hit = re
                .captures(&text)
                .and_then(|c| manifest_from_digits(&fold_confusables(first_group(&c), extended)));
            if hit.is_some() {
                return hit;
            }
        }
        manifest_cascade(&fold_confusables(&text, extended))
    }

    fn find_model(&self, recognition: &RecognitionResult) -> Option<String> {
        if let Some(value) = self.keyed_value(recognition, self.profile.model_keys()) {
            return Some(value);
        }
        let re = self.profile.model_regex.as_ref()?;
        let text = normalize_text(&recognition.raw_text);
        let caps = re.captures(&text)?;
        Some(clean_value(first_group(&caps))).filter(|v| !v.is_empty())
    }

    /// Value next to one of `keys`: by word geometry when boxes exist, else by
    /// token order on each text line.
    fn keyed_value(&self, recognition: &RecognitionResult, keys: &[String]) -> Option<String> {
        if keys.is_empty() {
            return None;
        }
        if recognition.words.is_empty() {
            line_value(&normalize_text(&recognition.raw_text), keys, &self.all_keys())
        } else {
            geometric_value(&recognition.words, keys, &self.all_keys())
        }
    }

    fn all_keys(&self) -> Vec<&str> {
        self.profile
            .manifest_keys()
            .iter()
            .chain(self.profile.model_keys())
            .chain(self.profile.customer_keys())
            .map(String::as_str)
            .collect()
    }
}

fn first_group<'t>(caps: &regex::Captures<'t>) -> &'t str {
    caps.get(1).or_else(|| caps.get(0)).map_or("", |m| m.as_str())
}

/// Keyword-anchored, exact, spaced digits, then every digit in the text.
pub fn manifest_cascade(folded: &str) -> Option<String> {
    if let Some(c) = re_manifest_keyword().captures(folded) {
        return manifest_from_digits(&c[1]);
    }
    if let Some(m) = re_manifest_exact().find(folded) {
        return manifest_from_digits(m.as_str());
    }
    if let Some(m) = re_manifest_spaced()
        .find_iter(folded)
        .find_map(|m| manifest_from_digits(m.as_str()))
    {
        return Some(m);
    }
    manifest_from_digits(folded)
}

/// The key token itself may carry the value (`MS#6100…`, `MODEL:X1`).
fn inline_value(token: &str, key: &str) -> Option<String> {
    let rest = token.strip_prefix(key)?;
    let glued = key.ends_with(['#', ':']) || rest.starts_with([':', '#', '/']);
    if !glued {
        return None;
    }
    Some(clean_value(rest.trim_start_matches([':', '#', '/']))).filter(|v| !v.is_empty())
}

fn matching_key<'k>(token: &str, keys: &'k [String]) -> Option<&'k str> {
    keys.iter()
        .map(String::as_str)
        .find(|k| token_matches_key(token, k))
}

fn is_key(token: &str, all_keys: &[&str]) -> bool {
    all_keys.iter().any(|k| *k == token)
}

fn geometric_value(words: &[Word], keys: &[String], all_keys: &[&str]) -> Option<String> {
    let tokens: Vec<String> = words.iter().map(|w| normalize_text(w.text.trim())).collect();

    for (i, token) in tokens.iter().enumerate() {
        let Some(key) = matching_key(token, keys) else {
            continue;
        };
        if let Some(v) = inline_value(token, key) {
            return Some(v);
        }

        let kb = words[i].bbox;
        let candidate = |pred: &dyn Fn(usize) -> bool| {
            (i + 1..words.len())
                .filter(|&j| pred(j))
                .map(|j| clean_value(&tokens[j]))
                .find(|v| !v.is_empty() && !is_key(v, all_keys))
        };

        let right = candidate(&|j| {
            let vb = words[j].bbox;
            (kb.center_y() - vb.center_y()).abs() < SAME_LINE_TOLERANCE * kb.height()
                && vb.x0 > kb.x0
        });
        if right.is_some() {
            return right;
        }

        let below = candidate(&|j| {
            let vb = words[j].bbox;
            vb.y0 > kb.y1 && (vb.x0 - kb.x0).abs() < kb.width()
        });
        if below.is_some() {
            return below;
        }
    }
    None
}

fn line_value(text: &str, keys: &[String], all_keys: &[&str]) -> Option<String> {
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for (i, token) in tokens.iter().enumerate() {
            let Some(key) = matching_key(token, keys) else {
                continue;
            };
            if let Some(v) = inline_value(token, key) {
                return Some(v);
            }
            let next = tokens[i + 1..]
                .iter()
                .map(|t| clean_value(t))
                .find(|v| !v.is_empty() && !is_key(v, all_keys));
            if next.is_some() {
                return next;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockscan_core::{BrandProfile, WordBox};

    fn word(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> Word {
        Word { text: text.into(), bbox: WordBox::new(x0, y0, x1, y1), confidence: 90.0 }
    }

    fn words(ws: Vec<Word>) -> RecognitionResult {
        let raw_text = ws.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        RecognitionResult { raw_text, words: ws, overall_confidence: 90.0 }
    }

    fn text(raw: &str) -> RecognitionResult {
        RecognitionResult { raw_text: raw.into(), ..Default::default() }
    }

    fn profile() -> CompiledProfile {
        CompiledProfile::default()
    }

    fn profile_with(f: impl FnOnce(&mut BrandProfile)) -> CompiledProfile {
        let mut p = BrandProfile::default();
        f(&mut p);
        CompiledProfile::new(p)
    }

    #[test]
    fn normalize_uppercases_and_strips_controls() {
        assert_eq!(normalize_text("ms#\r\n61\u{7}00\tx"), "MS#\n6100 X");
    }

    #[test]
    fn fold_basic_and_extended() {
        assert_eq!(fold_confusables("6I0O Q L", false), "6100 0 1");
        assert_eq!(fold_confusables("SB", false), "SB");
        assert_eq!(fold_confusables("SB", true), "58");
    }

    #[test]
    fn model_right_of_key_on_same_line() {
        let p = profile();
        let rec = words(vec![
            word("MODEL", 10.0, 100.0, 70.0, 120.0),
            word("ABC123", 90.0, 102.0, 160.0, 122.0),
        ]);
        assert_eq!(Extractor::new(&p).extract(&rec).model.as_deref(), Some("ABC123"));
    }

    #[test]
    fn model_far_below_and_left_is_not_matched() {
        let p = profile();
        let rec = words(vec![
            word("MODEL", 300.0, 100.0, 360.0, 120.0),
            word("ABC123", 10.0, 400.0, 80.0, 420.0),
        ]);
        assert_eq!(Extractor::new(&p).extract(&rec).model, None);
    }

    #[test]
    fn value_directly_below_key() {
        let p = profile();
        let rec = words(vec![
            word("CONSIGNEE", 20.0, 50.0, 120.0, 70.0),
            word("ACME", 30.0, 80.0, 90.0, 100.0),
        ]);
        assert_eq!(Extractor::new(&p).extract(&rec).customer.as_deref(), Some("ACME"));
    }

    #[test]
    fn separators_are_stripped_and_bare_colon_skipped() {
        let p = profile();
        let rec = words(vec![
            word("MODEL", 10.0, 10.0, 60.0, 30.0),
            word(":", 62.0, 10.0, 66.0, 30.0),
            word("XR/200:", 70.0, 11.0, 140.0, 31.0),
        ]);
        assert_eq!(Extractor::new(&p).extract(&rec).model.as_deref(), Some("XR200"));
    }

    #[test]
    fn model_value_is_never_folded() {
        let p = profile_with(|b| b.fold_extended_confusables = true);
        let rec = words(vec![
            word("MODEL", 10.0, 10.0, 60.0, 30.0),
            word("BOLT-IS", 70.0, 10.0, 140.0, 30.0),
        ]);
        assert_eq!(Extractor::new(&p).extract(&rec).model.as_deref(), Some("BOLT-IS"));
    }

    #[test]
    fn misread_key_still_matches() {
        let p = profile();
        let rec = words(vec![
            word("M0DEL", 10.0, 10.0, 60.0, 30.0),
            word("QX9", 70.0, 10.0, 110.0, 30.0),
        ]);
        assert_eq!(Extractor::new(&p).extract(&rec).model.as_deref(), Some("QX9"));
    }

    #[test]
    fn manifest_from_keyed_word_with_fold() {
        let p = profile();
        let rec = words(vec![
            word("MS#", 10.0, 10.0, 40.0, 30.0),
            word("61OO12345G", 50.0, 10.0, 160.0, 30.0),
            word("MS#", 10.0, 60.0, 40.0, 80.0),
            word("61OOl23456", 50.0, 60.0, 160.0, 80.0),
        ]);
        // The first keyed value is invalid, so the text cascade decides.
        assert_eq!(Extractor::new(&p).extract(&rec).manifest_number.as_deref(), Some("6100123456"));
    }

    #[test]
    fn inline_key_value_token() {
        let p = profile();
        let rec = words(vec![word("MS#6100555444", 10.0, 10.0, 160.0, 30.0)]);
        assert_eq!(Extractor::new(&p).extract(&rec).manifest_number.as_deref(), Some("6100555444"));
    }

    #[test]
    fn cascade_levels() {
        assert_eq!(manifest_cascade("M5N: 6100111222").as_deref(), Some("6100111222"));
        assert_eq!(manifest_cascade("REF 6100222333 X").as_deref(), Some("6100222333"));
        assert_eq!(manifest_cascade("6 1 0 0 3 3 3 4 4 4").as_deref(), Some("6100333444"));
        assert_eq!(manifest_cascade("61-00-12/34/56").as_deref(), Some("6100123456"));
        assert_eq!(manifest_cascade("6100 12345"), None);
        assert_eq!(manifest_cascade(""), None);
    }

    #[test]
    fn extended_fold_is_per_profile() {
        let rec = text("61005S5B88");
        assert_eq!(Extractor::new(&profile()).extract(&rec).manifest_number, None);
        let p = profile_with(|b| b.fold_extended_confusables = true);
        assert_eq!(
            Extractor::new(&p).extract(&rec).manifest_number.as_deref(),
            Some("6100555888")
        );
    }

    #[test]
    fn profile_manifest_pattern_is_revalidated() {
        let p = profile_with(|b| b.manifest_pattern = Some(r"LOT\s*(\d{10})".into()));
        assert_eq!(Extractor::new(&p).extract(&text("LOT 7100123456")).manifest_number, None);
        assert_eq!(
            Extractor::new(&p).extract(&text("LOT 6100123456")).manifest_number.as_deref(),
            Some("6100123456")
        );
    }

    #[test]
    fn profile_model_pattern_fallback() {
        let p = profile_with(|b| b.model_pattern = Some(r"\bMDL-(\w+)".into()));
        let fields = Extractor::new(&p).extract(&text("unit mdl-zx81 serial"));
        assert_eq!(fields.model.as_deref(), Some("ZX81"));
    }

    #[test]
    fn line_fallback_without_word_boxes() {
        let p = profile();
        let rec = text("model: xk200\nconsignee acme corp\nms# 6100987654");
        let fields = Extractor::new(&p).extract(&rec);
        assert_eq!(fields.model.as_deref(), Some("XK200"));
        assert_eq!(fields.customer.as_deref(), Some("ACME"));
        assert_eq!(fields.manifest_number.as_deref(), Some("6100987654"));
    }

    #[test]
    fn header_row_keys_are_not_values() {
        let p = profile();
        let fields = Extractor::new(&p).extract(&text("MODEL CUSTOMER\n"));
        assert_eq!(fields.model, None);
    }

    #[test]
    fn garbage_yields_empty_fieldset() {
        let fields = Extractor::new(&profile()).extract(&text("@@@ ### \u{0} ~~"));
        assert!(fields.is_empty());
    }
}
