//! Sample status values written to the status board.
//!
//! The board owns the status text; this type only fixes which strings the
//! pipeline produces so that operators see the same wording from every stage.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// An identification search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Tandem,
    Mascot,
}

impl SearchEngine {
    pub const ALL: [SearchEngine; 2] = [SearchEngine::Tandem, SearchEngine::Mascot];

    pub fn label(self) -> &'static str {
        match self {
            SearchEngine::Tandem => "Tandem",
            SearchEngine::Mascot => "Mascot",
        }
    }

    /// Name of the queue feeding this engine and of the stage that drains it.
    pub fn queue_name(self) -> &'static str {
        match self {
            SearchEngine::Tandem => "tandem",
            SearchEngine::Mascot => "mascot",
        }
    }
}

impl Display for SearchEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Every status the pipeline writes for a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleStatus {
    WaitingForAnalysis,
    FileMissing(PathBuf),
    Converting,
    Converted,
    SearchRunning(SearchEngine),
    /// Engines whose output exists at the time the status is written.
    SearchFinished(Vec<SearchEngine>),
    AggregationRunning,
    PostprocessingRunning,
    Done,
    Failed { stage: String, reason: String },
    TimedOut { stage: String },
}

impl Display for SampleStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleStatus::WaitingForAnalysis => f.write_str("Waiting for the analysis"),
            SampleStatus::FileMissing(path) => write!(f, "No file found: {}", path.display()),
            SampleStatus::Converting => f.write_str("Converting"),
            SampleStatus::Converted => f.write_str("Converted"),
            SampleStatus::SearchRunning(engine) => write!(f, "Identification ({engine}) running"),
            SampleStatus::SearchFinished(engines) => {
                let mut engines = engines.clone();
                engines.sort();
                engines.dedup();
                // Mascot first, matching the wording operators already filter on
                let label = match engines.as_slice() {
                    [SearchEngine::Tandem, SearchEngine::Mascot] => "Mascot&Tandem".to_string(),
                    [one] => one.label().to_string(),
                    _ => "none".to_string(),
                };
                write!(f, "Identification ({label}) finished")
            }
            SampleStatus::AggregationRunning => f.write_str("Running Scaffold"),
            SampleStatus::PostprocessingRunning => f.write_str("Running postprocessing"),
            SampleStatus::Done => f.write_str("All done"),
            SampleStatus::Failed { stage, reason } => write!(f, "Failed ({stage}): {reason}"),
            SampleStatus::TimedOut { stage } => write!(f, "Timed out ({stage}), will retry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(
            SampleStatus::WaitingForAnalysis.to_string(),
            "Waiting for the analysis"
        );
        assert_eq!(
            SampleStatus::FileMissing(PathBuf::from("/raw/P1/S1.raw")).to_string(),
            "No file found: /raw/P1/S1.raw"
        );
        assert_eq!(
            SampleStatus::SearchRunning(SearchEngine::Tandem).to_string(),
            "Identification (Tandem) running"
        );
        assert_eq!(
            SampleStatus::SearchFinished(vec![SearchEngine::Mascot, SearchEngine::Tandem])
                .to_string(),
            "Identification (Mascot&Tandem) finished"
        );
        assert_eq!(
            SampleStatus::SearchFinished(vec![SearchEngine::Mascot]).to_string(),
            "Identification (Mascot) finished"
        );
        assert_eq!(
            SampleStatus::Failed {
                stage: "convert".into(),
                reason: "exit code 3".into()
            }
            .to_string(),
            "Failed (convert): exit code 3"
        );
    }
}
