use {
    phonenumber::{Mode, country},
    tracing::warn,
};

/// Turns user-entered phone numbers into the digits-only international form.
pub trait PhoneNormalizer: Send + Sync {
    /// E.164 digits without the leading `+`, or `None` if `raw` is not a
    /// valid number.
    fn normalize(&self, raw: &str) -> Option<String>;
}

/// [`PhoneNormalizer`] backed by libphonenumber metadata.
#[derive(Debug, Clone)]
pub struct LibPhoneNormalizer {
    region: Option<country::Id>,
}

impl LibPhoneNormalizer {
    /// `region` is the ISO 3166 code assumed for numbers without a country
    /// prefix. An unknown code means only `+`-prefixed numbers parse.
    pub fn new(region: &str) -> Self {
        let region = match region.trim().to_ascii_uppercase().parse::<country::Id>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(region, "unknown default phone region, numbers need a country code");
                None
            },
        };
        Self { region }
    }
}

impl PhoneNormalizer for LibPhoneNormalizer {
    fn normalize(&self, raw: &str) -> Option<String> {
        // Spreadsheet exports prefix numbers with `=`.
        let cleaned = raw.trim().trim_start_matches('=').trim();
        if cleaned.is_empty() {
            return None;
        }
        let number = phonenumber::parse(self.region, cleaned).ok()?;
        if !phonenumber::is_valid(&number) {
            return None;
        }
        let e164 = number.format().mode(Mode::E164).to_string();
        Some(e164.trim_start_matches('+').to_string())
    }
}
