//! Well-known cities for quick selection

use crate::Coordinate;

static PRESETS: [(&str, f64, f64); 10] = [
    ("New York", 40.7128, -74.0060),
    ("Los Angeles", 34.0522, -118.2437),
    ("London", 51.5074, -0.1278),
    ("Paris", 48.8566, 2.3522),
    ("Tokyo", 35.6762, 139.6503),
    ("Sydney", -33.8688, 151.2093),
    ("Beijing", 39.9042, 116.4074),
    ("Shanghai", 31.2304, 121.4737),
    ("Hong Kong", 22.3193, 114.1694),
    ("Singapore", 1.3521, 103.8198),
];

/// All presets, labelled with their city name
pub fn all() -> impl Iterator<Item = Coordinate> {
    PRESETS.iter().map(|(name, lat, lon)| {
        Coordinate::new(*lat, *lon)
            .expect("preset table holds valid coordinates")
            .labeled(*name)
    })
}

/// Looks up a preset by name, ignoring case and surrounding whitespace
pub fn find(name: &str) -> Option<Coordinate> {
    let name = name.trim();
    all().find(|c| c.label().is_some_and(|l| l.eq_ignore_ascii_case(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_is_valid() {
        for (name, lat, lon) in PRESETS.iter() {
            assert!(Coordinate::new(*lat, *lon).is_ok(), "{name} is out of range");
        }
        assert_eq!(all().count(), PRESETS.len());
    }

    #[test]
    fn finds_case_insensitively() {
        let hk = find(" hong kong ").unwrap();
        assert_eq!(hk.label(), Some("Hong Kong"));
        assert_eq!(hk.latitude(), 22.3193);
        assert!(find("Atlantis").is_none());
    }
}
