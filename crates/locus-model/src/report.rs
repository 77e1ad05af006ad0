//! Analysis report model
//!
//! The [`AnalysisReport`] is the unit stored in the result cache and
//! returned to callers. Its serialized shape is part of the public contract:
//! every field is always present, absence of evidence is an empty list or a
//! `false` flag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One requested capability, as extracted from the problem description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Position in extraction order
    pub ordinal: usize,
    /// Natural-language statement
    pub statement: String,
}

impl Feature {
    /// Create feature
    #[inline]
    #[must_use]
    pub fn new(ordinal: usize, statement: impl Into<String>) -> Self {
        Self {
            ordinal,
            statement: statement.into(),
        }
    }
}

/// Inclusive 1-based line range, serialized as `"start-end"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineRange {
    /// First line
    pub start: u32,
    /// Last line
    pub end: u32,
}

impl LineRange {
    /// Create a range, swapping bounds if given in reverse
    #[inline]
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Whether a line falls within the range
    #[inline]
    #[must_use]
    pub fn contains(&self, line: u32) -> bool {
        (self.start..=self.end).contains(&line)
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for LineRange {
    type Err = LineRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| LineRangeError(s.to_string()))
        };
        match trimmed.split_once('-') {
            Some((start, end)) => Ok(Self::new(parse(start)?, parse(end)?)),
            None => {
                let line = parse(trimmed)?;
                Ok(Self::new(line, line))
            }
        }
    }
}

impl Serialize for LineRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LineRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Unparseable line range text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid line range: {0:?}")]
pub struct LineRangeError(pub String);

/// A code location claimed to implement a feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationLocation {
    /// File path relative to project root
    pub file: String,
    /// Function or symbol name
    pub function: String,
    /// Line range
    pub lines: LineRange,
    /// Why this code implements the feature
    #[serde(default)]
    pub reason: Option<String>,
}

/// Which per-feature step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Retrieval index query
    Retrieval,
    /// Language model localization call
    Localization,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retrieval => "retrieval",
            Self::Localization => "localization",
        })
    }
}

/// How a feature's location list came to be
///
/// Keeps "searched and found nothing" apart from "could not search".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LocalizationStatus {
    /// At least one location
    Found,
    /// Analysis completed and found nothing
    NotFound,
    /// Analysis failed; the location list is empty by degradation
    Failed {
        /// Step that failed
        stage: FailureStage,
        /// Diagnostic message
        message: String,
    },
}

/// A feature paired with its implementation locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAnalysis {
    /// Feature statement
    pub feature_description: String,
    /// Ordered locations, possibly empty
    pub implementation_location: Vec<ImplementationLocation>,
    /// Provenance of the location list
    pub status: LocalizationStatus,
}

impl FeatureAnalysis {
    /// Feature with locations
    #[must_use]
    pub fn found(feature: &Feature, locations: Vec<ImplementationLocation>) -> Self {
        if locations.is_empty() {
            return Self::not_found(feature);
        }
        Self {
            feature_description: feature.statement.clone(),
            implementation_location: locations,
            status: LocalizationStatus::Found,
        }
    }

    /// Feature searched without result
    #[must_use]
    pub fn not_found(feature: &Feature) -> Self {
        Self {
            feature_description: feature.statement.clone(),
            implementation_location: Vec::new(),
            status: LocalizationStatus::NotFound,
        }
    }

    /// Feature whose analysis failed
    #[must_use]
    pub fn failed(feature: &Feature, stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            feature_description: feature.statement.clone(),
            implementation_location: Vec::new(),
            status: LocalizationStatus::Failed {
                stage,
                message: message.into(),
            },
        }
    }

    /// Whether the analysis degraded
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, LocalizationStatus::Failed { .. })
    }
}

/// Outcome of the generate/execute/repair loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalVerification {
    /// Last attempted test source
    pub generated_test_code: String,
    /// Log of the last execution, or a diagnostic when execution never ran
    pub execution_log: String,
    /// Result of the final attempt only
    pub tests_passed: bool,
    /// Executions consumed
    pub attempts_used: u32,
}

/// Complete feature localization report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AnalysisReport {
    /// Per-feature analyses in extraction order
    pub feature_analysis: Vec<FeatureAnalysis>,
    /// How to run the project
    pub execution_plan_suggestion: String,
    /// Present when verification was requested
    pub functional_verification: Option<FunctionalVerification>,
}

impl AnalysisReport {
    /// Format features and locations as a numbered list
    #[must_use]
    pub fn features_outline(&self) -> String {
        let mut lines = Vec::new();
        for (i, analysis) in self.feature_analysis.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, analysis.feature_description));
            for loc in &analysis.implementation_location {
                lines.push(format!("   - {}: {} (lines {})", loc.file, loc.function, loc.lines));
                if let Some(reason) = &loc.reason {
                    lines.push(format!("     Reason: {reason}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn line_range_parses_common_forms() {
        assert_eq!("13-16".parse::<LineRange>().unwrap(), LineRange::new(13, 16));
        assert_eq!(" 7 - 9 ".parse::<LineRange>().unwrap(), LineRange::new(7, 9));
        assert_eq!("42".parse::<LineRange>().unwrap(), LineRange::new(42, 42));
        assert_eq!("20-10".parse::<LineRange>().unwrap(), LineRange::new(10, 20));
        assert!("ten-twelve".parse::<LineRange>().is_err());
        assert!("".parse::<LineRange>().is_err());
    }

    #[test]
    fn found_with_no_locations_is_not_found() {
        let feature = Feature::new(0, "create channel");
        let analysis = FeatureAnalysis::found(&feature, Vec::new());
        assert_eq!(analysis.status, LocalizationStatus::NotFound);
    }

    #[test]
    fn report_shape_keeps_every_field() {
        let feature = Feature::new(0, "send message");
        let report = AnalysisReport {
            feature_analysis: vec![
                FeatureAnalysis::found(
                    &feature,
                    vec![ImplementationLocation {
                        file: "src/message.ts".into(),
                        function: "send".into(),
                        lines: LineRange::new(3, 8),
                        reason: None,
                    }],
                ),
                FeatureAnalysis::failed(&feature, FailureStage::Retrieval, "index offline"),
            ],
            execution_plan_suggestion: String::new(),
            functional_verification: None,
        };

        let value = serde_json::to_value(&report).unwrap();
        assert!(value["functional_verification"].is_null());
        assert_eq!(value["feature_analysis"][0]["implementation_location"][0]["lines"], "3-8");
        assert_eq!(value["feature_analysis"][0]["status"]["state"], "found");
        assert_eq!(value["feature_analysis"][1]["status"]["stage"], "retrieval");
        assert_eq!(value["feature_analysis"][1]["implementation_location"], serde_json::json!([]));

        let decoded: AnalysisReport = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn outline_lists_locations() {
        let feature = Feature::new(0, "list messages");
        let report = AnalysisReport {
            feature_analysis: vec![FeatureAnalysis::found(
                &feature,
                vec![ImplementationLocation {
                    file: "app/api.py".into(),
                    function: "list_messages".into(),
                    lines: LineRange::new(20, 31),
                    reason: Some("returns messages of a channel".into()),
                }],
            )],
            ..AnalysisReport::default()
        };
        assert_eq!(
            report.features_outline(),
            "1. list messages\n   - app/api.py: list_messages (lines 20-31)\n     Reason: returns messages of a channel"
        );
    }

    proptest! {
        #[test]
        fn prop_line_range_is_ordered(a in 0u32..100_000, b in 0u32..100_000) {
            let range: LineRange = format!("{a}-{b}").parse().unwrap();
            prop_assert!(range.start <= range.end);
            prop_assert!(range.contains(a) && range.contains(b));
        }
    }
}
