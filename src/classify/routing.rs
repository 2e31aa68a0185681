//! Label to department routing.

use regex::Regex;
use std::sync::OnceLock;

/// Department for labels the table does not know.
pub const UNASSIGNED_DEPARTMENT: &str = "Unassigned";

const ROUTES: &[(&str, &str)] = &[
    ("potholes and roadcracks", "PWD"),
    ("pothole and roadcracks", "PWD"),
    ("potholes", "PWD"),
    ("pothole", "PWD"),
    ("damaged concrete structures", "PWD"),
    ("damagedroadsigns", "Traffic Department"),
    ("damaged road signs", "Traffic Department"),
    ("illegalparking", "Traffic Police"),
    ("illegal parking", "Traffic Police"),
    ("damagedelectricalpoles", "Electricity Board"),
    ("damaged electrical poles", "Electricity Board"),
    ("garbage", "Sanitation Department"),
    ("deadanimalspollution", "Sanitation Department"),
    ("dead animals pollution", "Sanitation Department"),
    ("fallentrees", "Horticulture Department"),
    ("fallen trees", "Horticulture Department"),
    ("graffitti", "Municipal Corporation"),
    ("graffiti", "Municipal Corporation"),
];

/// Lowercase, trim, turn underscores into spaces and collapse whitespace runs.
pub fn normalize_label(label: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let spaced = label.to_lowercase().replace('_', " ");
    re.replace_all(spaced.trim(), " ").into_owned()
}

/// Department responsible for a classified issue.
pub fn route(label: Option<&str>) -> &'static str {
    let Some(label) = label else {
        return UNASSIGNED_DEPARTMENT;
    };
    let normalized = normalize_label(label);
    ROUTES
        .iter()
        .find(|(key, _)| *key == normalized)
        .map(|(_, department)| *department)
        .unwrap_or(UNASSIGNED_DEPARTMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DEFAULT_LABELS;

    #[test]
    fn normalizes_case_underscores_and_whitespace() {
        assert_eq!(normalize_label("  Fallen_Trees "), "fallen trees");
        assert_eq!(normalize_label("Dead\tAnimals   Pollution"), "dead animals pollution");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn pothole_variants_route_to_pwd() {
        for label in [
            "Pothole and RoadCracks",
            "Potholes and RoadCracks",
            "potholes_and_roadcracks",
            "  POTHOLE  ",
        ] {
            assert_eq!(route(Some(label)), "PWD", "label {label:?}");
        }
    }

    #[test]
    fn every_deployed_class_has_a_department() {
        for label in DEFAULT_LABELS {
            assert_ne!(route(Some(label)), UNASSIGNED_DEPARTMENT, "label {label:?}");
        }
        assert_eq!(route(Some("IllegalParking")), "Traffic Police");
        assert_eq!(route(Some("Graffitti")), "Municipal Corporation");
        assert_eq!(route(Some("graffiti")), "Municipal Corporation");
    }

    #[test]
    fn unknown_and_null_are_unassigned() {
        assert_eq!(route(None), UNASSIGNED_DEPARTMENT);
        assert_eq!(route(Some("stray cow")), UNASSIGNED_DEPARTMENT);
        assert_eq!(route(Some("")), UNASSIGNED_DEPARTMENT);
    }
}
