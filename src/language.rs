//! Listing language detection.
use once_cell::sync::Lazy;
use whatlang::{Detector, Lang};

/// Opaque text classifier. `None` means the language could not be determined.
pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code of the text's language.
    fn detect(&self, text: &str) -> Option<String>;
}

/// Languages of the marketplace's storefronts.
const CANDIDATES: [Lang; 11] = [
    Lang::Fra,
    Lang::Ita,
    Lang::Eng,
    Lang::Jpn,
    Lang::Deu,
    Lang::Spa,
    Lang::Por,
    Lang::Nld,
    Lang::Pol,
    Lang::Ces,
    Lang::Lit,
];

static DETECTOR: Lazy<Detector> = Lazy::new(|| Detector::with_allowlist(CANDIDATES.to_vec()));

/// Default detector backed by `whatlang`.
///
/// Listing titles are a handful of words, which whatlang never flags as
/// reliable, so the best guess among the storefront languages is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let info = DETECTOR.detect(text)?;
        iso_639_1(info.lang()).map(str::to_string)
    }
}

fn iso_639_1(lang: Lang) -> Option<&'static str> {
    let code = match lang {
        Lang::Fra => "fr",
        Lang::Ita => "it",
        Lang::Eng => "en",
        Lang::Jpn => "ja",
        Lang::Deu => "de",
        Lang::Spa => "es",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Pol => "pl",
        Lang::Ces => "cs",
        Lang::Lit => "lt",
        _ => return None,
    };
    Some(code)
}

/// Flag shown next to a listing. Codes outside the known set render as "Unknown".
pub fn language_flag(code: Option<&str>) -> &'static str {
    match code {
        Some("fr") => "🇫🇷",
        Some("it") => "🇮🇹",
        Some("en") => "🇬🇧",
        Some("ja") => "🇯🇵",
        _ => "Unknown",
    }
}
