use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How many fields make up a sample identity.
///
/// The minimal deployment only tracks `(project, sample)`; the extended one
/// carries the proteolysis protocol and organism along so that later stages
/// can pick search databases and preferences without going back to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaProfile {
    Minimal,
    #[default]
    Extended,
}

impl SchemaProfile {
    /// Number of fields a serialized identity has under this profile.
    pub fn arity(self) -> usize {
        match self {
            SchemaProfile::Minimal => 2,
            SchemaProfile::Extended => 4,
        }
    }
}

/// The natural key of a sample: `(project, sample)`.
pub type SampleKey = (String, String);

/// One unit of work moving through the pipeline.
///
/// Identities are compared by value in full, but uniqueness in every ledger
/// and queue is defined on [`SampleIdentity::key`] only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleIdentity {
    pub project: String,
    pub sample: String,
    pub protocol: Option<String>,
    pub organism: Option<String>,
}

impl SampleIdentity {
    pub fn new(project: impl Into<String>, sample: impl Into<String>) -> Self {
        SampleIdentity {
            project: project.into(),
            sample: sample.into(),
            protocol: None,
            organism: None,
        }
    }

    pub fn extended(
        project: impl Into<String>,
        sample: impl Into<String>,
        protocol: impl Into<String>,
        organism: impl Into<String>,
    ) -> Self {
        SampleIdentity {
            project: project.into(),
            sample: sample.into(),
            protocol: Some(protocol.into()),
            organism: Some(organism.into()),
        }
    }

    pub fn key(&self) -> SampleKey {
        (self.project.clone(), self.sample.clone())
    }

    pub fn has_key(&self, project: &str, sample: &str) -> bool {
        self.project == project && self.sample == sample
    }

    /// Fields in serialization order for the given profile.
    ///
    /// Under the extended profile a missing protocol or organism is written as
    /// an empty field so the arity stays fixed.
    pub fn fields(&self, profile: SchemaProfile) -> Vec<&str> {
        let mut fields = vec![self.project.as_str(), self.sample.as_str()];
        if profile == SchemaProfile::Extended {
            fields.push(self.protocol.as_deref().unwrap_or_default());
            fields.push(self.organism.as_deref().unwrap_or_default());
        }
        fields
    }

    /// Build an identity from already-split fields.
    /// Returns None if the field count does not fit the profile or a key field is empty.
    pub fn from_fields(fields: &[String], profile: SchemaProfile) -> Option<Self> {
        let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
        match (profile, fields) {
            (_, [project, sample]) => Some(SampleIdentity {
                project: non_empty(project)?,
                sample: non_empty(sample)?,
                protocol: None,
                organism: None,
            }),
            (SchemaProfile::Extended, [project, sample, protocol, organism]) => {
                Some(SampleIdentity {
                    project: non_empty(project)?,
                    sample: non_empty(sample)?,
                    protocol: non_empty(protocol),
                    organism: non_empty(organism),
                })
            }
            _ => None,
        }
    }
}

impl Display for SampleIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project, self.sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_fields() {
        let minimal = SampleIdentity::from_fields(&strings(&["P1", "S1"]), SchemaProfile::Minimal);
        assert_eq!(minimal, Some(SampleIdentity::new("P1", "S1")));

        // 4 fields are never valid for the minimal profile
        assert!(SampleIdentity::from_fields(
            &strings(&["P1", "S1", "trypsin", "human"]),
            SchemaProfile::Minimal
        )
        .is_none());

        let ext = SampleIdentity::from_fields(
            &strings(&["P1", "S1", "trypsin", "human"]),
            SchemaProfile::Extended,
        );
        assert_eq!(
            ext,
            Some(SampleIdentity::extended("P1", "S1", "trypsin", "human"))
        );

        // older two-column lines remain readable under the extended profile
        assert_eq!(
            SampleIdentity::from_fields(&strings(&["P1", "S1"]), SchemaProfile::Extended),
            Some(SampleIdentity::new("P1", "S1"))
        );
        assert!(SampleIdentity::from_fields(&strings(&["", "S1"]), SchemaProfile::Minimal).is_none());
        assert!(SampleIdentity::from_fields(&strings(&["P1"]), SchemaProfile::Extended).is_none());
    }

    #[test]
    fn test_fields_keep_arity() {
        let id = SampleIdentity::new("P1", "S1");
        assert_eq!(id.fields(SchemaProfile::Minimal), vec!["P1", "S1"]);
        assert_eq!(id.fields(SchemaProfile::Extended), vec!["P1", "S1", "", ""]);
        assert_eq!(id.to_string(), "P1/S1");
    }
}
