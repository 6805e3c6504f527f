//! Reduction of intersection results to a single county label.

use std::collections::BTreeSet;

use ava_county_region_models::{Annotation, IntersectionResult, LABEL_DELIMITER};

/// Collapses a region's surviving intersections into its annotation.
///
/// Boundary names are de-duplicated, sorted by byte order, and joined
/// with `|`. No intersections (or only unnamed ones) yield an empty
/// label. The result depends only on the set of names, never on the
/// order the results arrived in.
#[must_use]
pub fn reduce(region_id: &str, results: &[IntersectionResult]) -> Annotation {
    let names: BTreeSet<&str> = results
        .iter()
        .map(|r| r.boundary_name.as_str())
        .filter(|name| !name.is_empty())
        .collect();

    let label = names.into_iter().collect::<Vec<_>>().join(LABEL_DELIMITER);

    Annotation {
        region_id: region_id.to_string(),
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str) -> IntersectionResult {
        IntersectionResult {
            region_id: "R".to_string(),
            boundary_id: format!("id-{name}"),
            boundary_name: name.to_string(),
            area_sq_m: 1.0e8,
        }
    }

    #[test]
    fn no_results_yield_empty_label() {
        let annotation = reduce("R", &[]);
        assert_eq!(annotation.region_id, "R");
        assert_eq!(annotation.label, "");
    }

    #[test]
    fn single_result_has_no_delimiter() {
        assert_eq!(reduce("R", &[result("Napa")]).label, "Napa");
    }

    #[test]
    fn names_are_sorted_and_deduplicated() {
        let results = [
            result("Sonoma"),
            result("Napa"),
            result("Sonoma"),
            result("Lake"),
        ];
        assert_eq!(reduce("R", &results).label, "Lake|Napa|Sonoma");
    }

    #[test]
    fn sort_is_by_byte_order() {
        let results = [result("alpine"), result("Yolo"), result("Butte")];
        assert_eq!(reduce("R", &results).label, "Butte|Yolo|alpine");
    }

    #[test]
    fn empty_names_leave_no_stray_delimiters() {
        let results = [result(""), result("Napa"), result("")];
        assert_eq!(reduce("R", &results).label, "Napa");
        assert_eq!(reduce("R", &[result("")]).label, "");
    }
}
