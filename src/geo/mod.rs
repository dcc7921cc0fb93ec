//! Matching corrected records to the nearest milepost on the same line.

pub mod gpkg;
pub mod projection;

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use tracing::debug;

use crate::error::MatchError;
use crate::model::{GeoMatchResult, LineRefCode, Mileage};
use projection::Point;

#[derive(Debug, Clone, PartialEq)]
pub struct MileageFeature {
    pub id: i64,
    pub lineref: LineRefCode,
    pub linear_value: f64,
    pub geometry: Point,
}

/// The marker layer for one run. Never modified after loading.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    features: Vec<MileageFeature>,
}

impl ReferenceSet {
    pub fn new(features: Vec<MileageFeature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn codes(&self) -> HashSet<&LineRefCode> {
        self.features.iter().map(|feature| &feature.lineref).collect()
    }
}

/// Per-line candidate lists, filled the first time a line is queried.
///
/// Keys are fixed at construction, so each slot is initialised at most once
/// and then only read.
#[derive(Debug, Default)]
pub struct FeatureCache {
    by_code: HashMap<LineRefCode, OnceLock<Vec<usize>>>,
}

impl FeatureCache {
    pub fn for_reference(reference: &ReferenceSet) -> Self {
        Self {
            by_code: reference
                .codes()
                .into_iter()
                .map(|code| (code.clone(), OnceLock::new()))
                .collect(),
        }
    }

    pub fn populated(&self) -> usize {
        self.by_code
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }
}

pub struct GeoMatcher<'a> {
    reference: &'a ReferenceSet,
    cache: FeatureCache,
}

impl<'a> GeoMatcher<'a> {
    pub fn new(reference: &'a ReferenceSet, cache: FeatureCache) -> Self {
        Self { reference, cache }
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    /// Fails with every code missing from the reference set, each once, in
    /// the order first seen.
    pub fn check_known<'c>(
        &self,
        codes: impl IntoIterator<Item = &'c LineRefCode>,
    ) -> Result<(), MatchError> {
        let mut seen = HashSet::new();
        let unknown: Vec<LineRefCode> = codes
            .into_iter()
            .filter(|code| !self.cache.by_code.contains_key(*code))
            .filter(|code| seen.insert(*code))
            .cloned()
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(MatchError::UnknownLineRef(unknown))
        }
    }

    pub fn locate(&self, code: &LineRefCode, mileage: Mileage) -> Result<GeoMatchResult, MatchError> {
        let candidates = self.candidates(code)?;
        let target = target_linear_value(mileage);

        let closest = nearest(candidates.iter().map(|&index| &self.reference.features[index]), target)
            .ok_or_else(|| MatchError::NoMatch(code.clone()))?;

        debug!(
            lineref = %code,
            target,
            feature_id = closest.id,
            linear_value = closest.linear_value,
            "matched milepost"
        );

        let (longitude, latitude) = closest.geometry.to_wgs84();
        Ok(GeoMatchResult {
            longitude,
            latitude,
            parent_feature_id: closest.id,
        })
    }

    fn candidates(&self, code: &LineRefCode) -> Result<&[usize], MatchError> {
        let slot = self
            .cache
            .by_code
            .get(code)
            .ok_or_else(|| MatchError::UnknownLineRef(vec![code.clone()]))?;

        let indices = slot.get_or_init(|| {
            self.reference
                .features
                .iter()
                .enumerate()
                .filter(|(_, feature)| &feature.lineref == code)
                .map(|(index, _)| index)
                .collect()
        });
        Ok(indices)
    }
}

/// Miles and yards read as the integer and fractional digits of one number,
/// so 12 miles 748 yards becomes `12.748`.
///
/// This is not a unit conversion; the marker layer's values follow the same
/// convention.
pub fn target_linear_value(mileage: Mileage) -> f64 {
    let lexical = format!("{}.{}", mileage.miles(), mileage.yards());
    // Two digit runs around a dot always parse.
    lexical.parse().unwrap_or(f64::from(mileage.miles()))
}

/// Closest feature by linear value. Ties keep the earliest candidate.
pub fn nearest<'f>(
    candidates: impl IntoIterator<Item = &'f MileageFeature>,
    target: f64,
) -> Option<&'f MileageFeature> {
    let mut best: Option<(&MileageFeature, f64)> = None;
    for feature in candidates {
        let distance = (feature.linear_value - target).abs();
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((feature, distance)),
        }
    }
    best.map(|(feature, _)| feature)
}

#[cfg(test)]
mod tests {
    use super::projection::Crs;
    use super::*;

    fn code(raw: &str) -> LineRefCode {
        LineRefCode::parse(raw).expect("valid code")
    }

    fn feature(id: i64, lineref: &str, linear_value: f64) -> MileageFeature {
        MileageFeature {
            id,
            lineref: code(lineref),
            linear_value,
            geometry: Point {
                x: id as f64,
                y: 50.0,
                crs: Crs::Wgs84,
            },
        }
    }

    fn reference() -> ReferenceSet {
        ReferenceSet::new(vec![
            feature(1, "ECM1", 10.0),
            feature(2, "ECM1", 20.0),
            feature(3, "LTN1", 21.0),
            feature(4, "ECM1", 30.0),
            feature(5, "ECM1", 20.0),
        ])
    }

    #[test]
    fn nearest_picks_closest_linear_value() {
        let features = [feature(1, "ABC", 10.0), feature(2, "ABC", 20.0), feature(3, "ABC", 30.0)];
        let closest = nearest(&features, 21.0).expect("candidates present");
        assert_eq!(closest.id, 2);
    }

    #[test]
    fn nearest_keeps_first_on_tie() {
        let features = [feature(7, "ABC", 10.0), feature(3, "ABC", 20.0)];
        let closest = nearest(&features, 15.0).expect("candidates present");
        assert_eq!(closest.id, 7);
        assert!(nearest(Vec::<&MileageFeature>::new(), 1.0).is_none());
    }

    #[test]
    fn target_value_concatenates_miles_and_yards() {
        assert!((target_linear_value(Mileage::new(12, 34)) - 12.748).abs() < 1e-9);
        assert!((target_linear_value(Mileage::new(12, 0)) - 12.0).abs() < 1e-9);
        assert!((target_linear_value(Mileage::new(3, 1)) - 3.22).abs() < 1e-9);
        assert!((target_linear_value(Mileage::new(0, 50)) - 0.11).abs() < 1e-9);
    }

    #[test]
    fn target_value_matches_the_written_decimal_exactly() {
        // Summing 1 + 66 / 100 lands one ulp above 1.66.
        assert_eq!(target_linear_value(Mileage::new(1, 3)), 1.66);
        assert_eq!(target_linear_value(Mileage::new(1, 6)), 1.132);
        assert_eq!(target_linear_value(Mileage::new(1, 16)), 1.352);
        assert_eq!(target_linear_value(Mileage::new(12, 34)), 12.748);
    }

    #[test]
    fn locate_stays_on_the_same_line() {
        let reference = reference();
        let matcher = GeoMatcher::new(&reference, FeatureCache::for_reference(&reference));

        // 21 miles 0 chains: LTN1 has an exact value but is another line.
        let result = matcher
            .locate(&code("ECM1"), Mileage::new(21, 0))
            .expect("ECM1 is known");
        assert_eq!(result.parent_feature_id, 2);
        assert_eq!(result.longitude, 2.0);
        assert_eq!(result.latitude, 50.0);
    }

    #[test]
    fn cache_is_filled_lazily_per_code() {
        let reference = reference();
        let matcher = GeoMatcher::new(&reference, FeatureCache::for_reference(&reference));
        assert_eq!(matcher.cache().populated(), 0);

        matcher.locate(&code("ECM1"), Mileage::new(29, 0)).expect("known");
        matcher.locate(&code("ECM1"), Mileage::new(9, 0)).expect("known");
        assert_eq!(matcher.cache().populated(), 1);

        matcher.locate(&code("LTN1"), Mileage::new(1, 0)).expect("known");
        assert_eq!(matcher.cache().populated(), 2);
    }

    #[test]
    fn check_known_lists_each_unknown_code_once() {
        let reference = reference();
        let matcher = GeoMatcher::new(&reference, FeatureCache::for_reference(&reference));
        let input = [code("XYZ"), code("ECM1"), code("ABC2"), code("XYZ")];

        let error = matcher.check_known(&input).expect_err("unknown codes present");
        assert_eq!(error, MatchError::UnknownLineRef(vec![code("XYZ"), code("ABC2")]));
        assert_eq!(
            error.to_string(),
            "2 line reference code(s) not found in reference markers: XYZ ABC2"
        );
        assert!(matcher.check_known(&[code("LTN1")]).is_ok());
    }

    #[test]
    fn locate_unknown_code_is_an_error() {
        let reference = reference();
        let matcher = GeoMatcher::new(&reference, FeatureCache::for_reference(&reference));
        assert!(matches!(
            matcher.locate(&code("QQQ"), Mileage::new(1, 1)),
            Err(MatchError::UnknownLineRef(_))
        ));
    }
}
