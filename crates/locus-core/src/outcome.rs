//! Per-feature analysis outcomes
//!
//! Each concurrent feature task ends in exactly one [`FeatureOutcome`].
//! The join step matches on it exhaustively, so a malformed reply cannot be
//! dropped silently.

use locus_model::{FailureStage, Feature, FeatureAnalysis, ImplementationLocation, TokenUsage};

/// A step of one feature's analysis that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFailure {
    /// Failing step
    pub stage: FailureStage,
    /// Diagnostic message
    pub message: String,
}

impl FeatureFailure {
    /// Retrieval failure
    #[must_use]
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Retrieval,
            message: message.into(),
        }
    }

    /// Localization failure
    #[must_use]
    pub fn localization(message: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Localization,
            message: message.into(),
        }
    }
}

/// Result of analysing one feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureOutcome {
    /// Locations were found
    Found(Vec<ImplementationLocation>),
    /// Analysis completed without locations
    NotFound,
    /// Analysis failed
    Error(FeatureFailure),
}

impl FeatureOutcome {
    /// Outcome of a completed localization
    #[must_use]
    pub fn from_locations(locations: Vec<ImplementationLocation>) -> Self {
        if locations.is_empty() {
            Self::NotFound
        } else {
            Self::Found(locations)
        }
    }

    /// Report entry for `feature`
    #[must_use]
    pub fn into_analysis(self, feature: &Feature) -> FeatureAnalysis {
        match self {
            Self::Found(locations) => FeatureAnalysis::found(feature, locations),
            Self::NotFound => FeatureAnalysis::not_found(feature),
            Self::Error(failure) => FeatureAnalysis::failed(feature, failure.stage, failure.message),
        }
    }
}

/// A feature task's outcome and the tokens it spent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureResult {
    /// Outcome
    pub outcome: FeatureOutcome,
    /// Tokens spent, zero if the model was never called
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_model::{LineRange, LocalizationStatus};

    #[test]
    fn empty_locations_are_not_found() {
        assert_eq!(FeatureOutcome::from_locations(Vec::new()), FeatureOutcome::NotFound);
    }

    #[test]
    fn error_keeps_stage_and_message() {
        let feature = Feature::new(0, "Export CSV");
        let analysis = FeatureOutcome::Error(FeatureFailure::retrieval("index offline"))
            .into_analysis(&feature);
        assert!(analysis.implementation_location.is_empty());
        assert_eq!(
            analysis.status,
            LocalizationStatus::Failed {
                stage: FailureStage::Retrieval,
                message: "index offline".into(),
            }
        );
    }

    #[test]
    fn found_carries_locations_in_order() {
        let feature = Feature::new(1, "Login");
        let locations = vec![
            ImplementationLocation {
                file: "b.ts".into(),
                function: "b".into(),
                lines: LineRange::new(1, 2),
                reason: None,
            },
            ImplementationLocation {
                file: "a.ts".into(),
                function: "a".into(),
                lines: LineRange::new(3, 4),
                reason: None,
            },
        ];
        let analysis = FeatureOutcome::from_locations(locations.clone()).into_analysis(&feature);
        assert_eq!(analysis.status, LocalizationStatus::Found);
        assert_eq!(analysis.implementation_location, locations);
    }
}
