//! ASR text post-processing: oral-speech cleanup (repeat collapsing, filler
//! stripping, numeral normalization) and end-of-utterance punctuation
//! correction, gated by a pre-filter and a post-filter that both drop
//! punctuation-only or too-short results. There is a single post-processor
//! here, already filtering on both ends — not split into a filtering and a
//! non-filtering variant.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_MIN_SENTENCE_LEN: usize = 6;

/// Closed set of short acknowledgements the length filter always allows
/// through, even below `min_sentence_len`.
const ALLOWED_SHORT_WORDS: &[&str] = &[
    "是", "不", "对", "好", "行", "嗯", "啊", "错", "有", "没", "可以", "不行", "没有",
];

const COMMON_FILLERS: &[&str] = &["嗯", "啊", "呃", "那个那个", "这个这个"];

static PUNCTUATION_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[。！？，、\s]+$").unwrap());
static COMMON_REPEATS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"(这个)(这个)+").unwrap(), "这个"),
        (Regex::new(r"(那个)(那个)+").unwrap(), "那个"),
        (Regex::new(r"(就是)(就是)+").unwrap(), "就是"),
        (Regex::new(r"(然后)(然后)+").unwrap(), "然后"),
        (Regex::new(r"(还有)(还有)+").unwrap(), "还有"),
    ]
});
static NUMBER_CORRECTIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let digits = [
        ("1", "一"),
        ("2", "两"),
        ("3", "三"),
        ("4", "四"),
        ("5", "五"),
        ("6", "六"),
        ("7", "七"),
        ("8", "八"),
        ("9", "九"),
        ("10", "十"),
    ];
    digits
        .iter()
        .map(|(digit, word)| {
            let pattern = format!(r"{}([下个次点])", digit);
            (Regex::new(&pattern).unwrap(), *word)
        })
        .collect()
});
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"[，、,]\s*$").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r" +([。！？，、])").unwrap());

const TERMINAL_PUNCTUATION: &[char] = &['。', '！', '？', '.', '!', '?'];

#[derive(Debug, Clone)]
pub struct PostProcessorConfig {
    pub enable_oral_cleaning: bool,
    pub enable_number_normalization: bool,
    pub enable_repeat_removal: bool,
    pub enable_punctuation_correction: bool,
    pub min_sentence_len: usize,
}

impl Default for PostProcessorConfig {
    fn default() -> Self {
        Self {
            enable_oral_cleaning: true,
            enable_number_normalization: true,
            enable_repeat_removal: true,
            enable_punctuation_correction: true,
            min_sentence_len: DEFAULT_MIN_SENTENCE_LEN,
        }
    }
}

pub struct PostProcessor {
    config: PostProcessorConfig,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new(PostProcessorConfig::default())
    }
}

impl PostProcessor {
    pub fn new(config: PostProcessorConfig) -> Self {
        Self { config }
    }

    /// Full pipeline: pre-filter, oral cleanup, punctuation correction
    /// (unless `skip_punctuation_correction`, used for partials), post-filter.
    /// Returns an empty string when the result should be dropped entirely.
    pub fn process(&self, text: &str, has_trailing_silence: bool, skip_punctuation_correction: bool) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }

        let text = self.prefilter_invalid(text);
        if text.is_empty() {
            return String::new();
        }

        let text = if self.config.enable_oral_cleaning {
            self.clean_oral_speech(&text)
        } else {
            text
        };

        let text = if self.config.enable_punctuation_correction && !skip_punctuation_correction {
            self.correct_punctuation(&text, has_trailing_silence)
        } else {
            text
        };

        let text = self.postfilter_invalid(&text);
        text.trim().to_string()
    }

    /// Light cleanup only, used for partial results: no filtering, no
    /// punctuation correction.
    pub fn clean_oral_speech(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }
        let mut text = text.to_string();
        if self.config.enable_repeat_removal {
            text = self.remove_repeats(&text);
        }
        if self.config.enable_number_normalization {
            text = self.normalize_numbers(&text);
        }
        self.clean_fillers(&text)
    }

    fn is_allowed_short(text: &str) -> bool {
        ALLOWED_SHORT_WORDS.contains(&text)
    }

    fn too_short(&self, text: &str) -> bool {
        text.chars().count() < self.config.min_sentence_len && !Self::is_allowed_short(text)
    }

    fn prefilter_invalid(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }
        if PUNCTUATION_ONLY.is_match(text) {
            return String::new();
        }
        if text.chars().count() == 1 && "。！？，、".contains(text) {
            return String::new();
        }
        if self.too_short(text) {
            return String::new();
        }
        text.to_string()
    }

    fn postfilter_invalid(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }
        if self.too_short(text) {
            return String::new();
        }
        if PUNCTUATION_ONLY.is_match(text) {
            return String::new();
        }
        text.to_string()
    }

    /// The `regex` crate has no backreferences, so "a unit of 1-3 non-space
    /// characters repeated 3+ times in a row" is detected with an explicit
    /// scan rather than `(\S{1,3})\1{2,}`.
    fn remove_repeats(&self, text: &str) -> String {
        let mut text = collapse_repeated_units(text);
        for (pattern, replacement) in COMMON_REPEATS.iter() {
            text = pattern.replace_all(&text, *replacement).into_owned();
        }
        text
    }

    fn normalize_numbers(&self, text: &str) -> String {
        let mut text = text.to_string();
        for (pattern, replacement) in NUMBER_CORRECTIONS.iter() {
            text = pattern.replace_all(&text, format!("{}$1", replacement)).into_owned();
        }
        text
    }

    /// The `regex` crate has no lookaround, so the three boundary patterns
    /// the original filler-stripping logic relies on (start-of-text,
    /// mid-text, end-of-text, each gated on an adjacent punctuation/
    /// whitespace boundary) are applied with an explicit character scan
    /// instead of `(?<=..)`/`(?=..)` regex lookaround.
    fn clean_fillers(&self, text: &str) -> String {
        fn is_boundary(c: char) -> bool {
            c.is_whitespace() || "，。！？、".contains(c)
        }

        let mut text = text.to_string();
        for filler in COMMON_FILLERS {
            if text.trim() == *filler {
                text.clear();
                continue;
            }
            if text.is_empty() {
                continue;
            }
            let chars: Vec<char> = text.chars().collect();
            let fchars: Vec<char> = filler.chars().collect();
            let flen = fchars.len();
            let mut out = String::with_capacity(text.len());
            let mut i = 0;
            while i < chars.len() {
                let matches_here = i + flen <= chars.len() && chars[i..i + flen] == fchars[..];
                if matches_here {
                    let next_idx = i + flen;
                    let prev_is_boundary = i > 0 && is_boundary(chars[i - 1]);
                    let next_is_boundary = next_idx < chars.len() && is_boundary(chars[next_idx]);
                    let at_text_end = next_idx == chars.len();

                    let start_removable = i == 0 && next_is_boundary;
                    let middle_removable = prev_is_boundary && next_is_boundary;
                    let end_removable = prev_is_boundary && at_text_end;

                    if start_removable || middle_removable || end_removable {
                        i = next_idx;
                        continue;
                    }
                }
                out.push(chars[i]);
                i += 1;
            }
            text = out;
        }
        let text = Regex::new(r" +").unwrap().replace_all(&text, " ").into_owned();
        let text = Regex::new(r" ([，。！？、])")
            .unwrap()
            .replace_all(&text, "$1")
            .into_owned();
        text.trim().to_string()
    }

    fn correct_punctuation(&self, text: &str, has_trailing_silence: bool) -> String {
        let mut text = text.trim().to_string();
        if text.is_empty() {
            return text;
        }

        let has_ending_punct = TERMINAL_PUNCTUATION.iter().any(|p| text.ends_with(*p));

        if has_trailing_silence
            && !has_ending_punct
            && text.chars().count() >= self.config.min_sentence_len
        {
            text = TRAILING_COMMA.replace(&text, "").into_owned();
            if !text.ends_with('。') {
                text.push('。');
            }
        }

        text = collapse_repeated_terminal(&text);
        text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1").into_owned();
        text
    }
}

/// Collapses a run of 3+ consecutive repeats of a 1-3 character unit down to
/// one occurrence, preferring the longest matching unit length at each
/// position (mirroring the greedy `{1,3}` the original regex used before its
/// backreference, which `regex` cannot express directly).
fn collapse_repeated_units(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut out = Vec::with_capacity(n);
    let mut i = 0;
    while i < n {
        let mut collapsed = false;
        for unit_len in (1..=3).rev() {
            if i + unit_len * 3 > n {
                continue;
            }
            let unit = &chars[i..i + unit_len];
            if unit.iter().any(|c| c.is_whitespace()) {
                continue;
            }
            let mut repeat_count = 1;
            let mut j = i + unit_len;
            while j + unit_len <= n && chars[j..j + unit_len] == *unit {
                repeat_count += 1;
                j += unit_len;
            }
            if repeat_count >= 3 {
                out.extend_from_slice(unit);
                i = j;
                collapsed = true;
                break;
            }
        }
        if !collapsed {
            out.push(chars[i]);
            i += 1;
        }
    }
    out.into_iter().collect()
}

/// Collapses a run of identical terminal punctuation marks to one.
fn collapse_repeated_terminal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if "。！？".contains(c) && prev == Some(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Exact-match-or-containment duplicate check shared by the pipeline's
/// final-vs-final dedup rule. `normalize` strips punctuation/whitespace so
/// two transcriptions differing only in trailing punctuation still compare
/// equal.
pub fn normalize_for_dedup(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !"。！？，、.,!?".contains(*c))
        .collect()
}

pub fn is_similar(a: &str, b: &str) -> bool {
    let na = normalize_for_dedup(a);
    let nb = normalize_for_dedup(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb {
        return true;
    }
    let (shorter, longer) = if na.chars().count() <= nb.chars().count() {
        (&na, &nb)
    } else {
        (&nb, &na)
    };
    if longer.contains(shorter.as_str()) {
        let ratio = shorter.chars().count() as f64 / longer.chars().count() as f64;
        return ratio >= 0.7;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pp() -> PostProcessor {
        PostProcessor::default()
    }

    #[test]
    fn drops_punctuation_only_text() {
        assert_eq!(pp().process("。。。", false, false), "");
    }

    #[test]
    fn drops_too_short_text_unless_allow_listed() {
        assert_eq!(pp().process("啊", false, false), "");
        assert_eq!(pp().process("是", false, false), "是");
    }

    #[test]
    fn collapses_conspicuous_repeats() {
        let out = pp().clean_oral_speech("这个这个这个你好");
        assert_eq!(out, "这个你好");
    }

    #[test]
    fn collapses_common_phrase_repeats() {
        let out = pp().clean_oral_speech("然后然后我觉得");
        assert_eq!(out, "然后我觉得");
    }

    #[test]
    fn normalizes_numeral_measure_words() {
        let out = pp().clean_oral_speech("等我1下2个");
        assert_eq!(out, "等我一下两个");
    }

    #[test]
    fn appends_terminal_punctuation_on_trailing_silence() {
        let out = pp().process("我觉得这个岗位很适合我", true, false);
        assert!(out.ends_with('。'));
    }

    #[test]
    fn skips_punctuation_correction_for_partials() {
        let out = pp().process("我觉得这个岗位很适合我", true, true);
        assert!(!out.ends_with('。'));
    }

    #[test]
    fn collapses_repeated_terminal_punctuation() {
        let out = pp().process("你好！！！", false, true);
        assert_eq!(out.matches('！').count(), 1);
    }

    #[test]
    fn dedup_detects_exact_and_punctuation_insensitive_match() {
        assert!(is_similar("你好世界", "你好世界。"));
        assert!(!is_similar("你好世界", "完全不同的话"));
    }

    #[test]
    fn dedup_detects_containment_above_length_ratio() {
        assert!(is_similar("你好世界", "你好世界啊"));
    }

    #[test]
    fn dedup_rejects_containment_below_length_ratio() {
        assert!(!is_similar("你好", "你好这是一段长得多的句子用来测试包含关系"));
    }
}
