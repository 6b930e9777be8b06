//! Fixture family detection. The control surface never reports which
//! spectral channel is which, so the family (and with it the ordered
//! wavelength labels) is inferred from the channel count alone.

use std::fmt;

pub const WAVELENGTHS_S7: [&str; 7] = [
    "400nm", "420nm", "450nm", "530nm", "630nm", "660nm", "735nm",
];

pub const WAVELENGTHS_S10: [&str; 10] = [
    "370nm", "400nm", "420nm", "450nm", "530nm", "620nm", "660nm", "735nm", "850nm", "6500k",
];

pub const WAVELENGTHS_DYNA: [&str; 9] = [
    "380nm", "400nm", "420nm", "450nm", "530nm", "620nm", "660nm", "735nm", "5700K",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureFamily {
    S7,
    S10,
    Dyna,
}

impl FixtureFamily {
    /// Map an observed channel count to a family. Anything other than
    /// 7, 9 or 10 channels is unrecognized and must not be commanded.
    pub fn from_channel_count(n: usize) -> Option<Self> {
        match n {
            7 => Some(Self::S7),
            9 => Some(Self::Dyna),
            10 => Some(Self::S10),
            _ => None,
        }
    }

    /// Ordered per-channel labels, used to tag metrics and to address
    /// single-channel writes by wavelength.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Self::S7 => &WAVELENGTHS_S7,
            Self::S10 => &WAVELENGTHS_S10,
            Self::Dyna => &WAVELENGTHS_DYNA,
        }
    }
}

impl fmt::Display for FixtureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::S7 => "s7",
            Self::S10 => "s10",
            Self::Dyna => "dyna",
        };
        f.write_str(s)
    }
}

/// Integer wavelength (or color temperature) from a label: the leading
/// digits of `450nm` or `6500k`. None for labels with no digits.
pub fn label_wavelength(label: &str) -> Option<i64> {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// The two white channels are correlated color temperatures, not
/// wavelengths; their metric fields carry a `k` suffix instead of `nm`.
pub fn label_is_kelvin(label: &str) -> bool {
    matches!(label_wavelength(label), Some(5700) | Some(6500))
}

/// Metric field name for a channel label: `400nm`, `6500k`, `5700k`.
pub fn metric_label(label: &str) -> String {
    match label_wavelength(label) {
        Some(wl) if label_is_kelvin(label) => format!("{wl}k"),
        Some(wl) => format!("{wl}nm"),
        None => label.to_string(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts_map_to_families() {
        assert_eq!(FixtureFamily::from_channel_count(7), Some(FixtureFamily::S7));
        assert_eq!(FixtureFamily::from_channel_count(9), Some(FixtureFamily::Dyna));
        assert_eq!(FixtureFamily::from_channel_count(10), Some(FixtureFamily::S10));
        assert_eq!(FixtureFamily::from_channel_count(0), None);
        assert_eq!(FixtureFamily::from_channel_count(8), None);
        assert_eq!(FixtureFamily::from_channel_count(11), None);
    }

    #[test]
    fn label_counts_match_families() {
        assert_eq!(FixtureFamily::S7.labels().len(), 7);
        assert_eq!(FixtureFamily::Dyna.labels().len(), 9);
        assert_eq!(FixtureFamily::S10.labels().len(), 10);
    }

    #[test]
    fn s10_ends_in_kelvin_channel() {
        assert_eq!(*FixtureFamily::S10.labels().last().unwrap(), "6500k");
        assert_eq!(*FixtureFamily::Dyna.labels().last().unwrap(), "5700K");
    }

    #[test]
    fn wavelength_strips_suffix() {
        assert_eq!(label_wavelength("450nm"), Some(450));
        assert_eq!(label_wavelength("6500k"), Some(6500));
        assert_eq!(label_wavelength("5700K"), Some(5700));
        assert_eq!(label_wavelength("nm"), None);
    }

    #[test]
    fn kelvin_detection() {
        assert!(label_is_kelvin("6500k"));
        assert!(label_is_kelvin("5700K"));
        assert!(!label_is_kelvin("735nm"));
    }

    #[test]
    fn metric_labels_normalize_suffix_case() {
        assert_eq!(metric_label("400nm"), "400nm");
        assert_eq!(metric_label("6500k"), "6500k");
        assert_eq!(metric_label("5700K"), "5700k");
    }
}
