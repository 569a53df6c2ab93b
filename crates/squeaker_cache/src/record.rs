//! Stage and tag record types.
//!
//! A stage record is a tagged variant rather than the free-form map the
//! original tool used: `StageRecord` carries one case per `stage_type`,
//! each with its own fields, behind the common identity fields every
//! stage shares.

use serde::{Deserialize, Serialize};

/// One node of the derivation DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage_type", rename_all = "lowercase")]
pub enum StageRecord {
    Url {
        stage_digest: String,
        stage_key: String,
        image_digest: String,
        url: String,
    },
    Stage {
        stage_digest: String,
        stage_key: String,
        image_digest: String,
        parent: String,
        chunk: String,
        vm: String,
        digest_inputs: Vec<String>,
    },
    Resource {
        stage_digest: String,
        stage_key: String,
        image_digest: String,
        parent: String,
        resource_path: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        resource_digest: Option<String>,
        digest_inputs: Vec<String>,
    },
}

impl StageRecord {
    pub fn stage_digest(&self) -> &str {
        match self {
            StageRecord::Url { stage_digest, .. }
            | StageRecord::Stage { stage_digest, .. }
            | StageRecord::Resource { stage_digest, .. } => stage_digest,
        }
    }

    pub fn image_digest(&self) -> &str {
        match self {
            StageRecord::Url { image_digest, .. }
            | StageRecord::Stage { image_digest, .. }
            | StageRecord::Resource { image_digest, .. } => image_digest,
        }
    }

    pub fn stage_key(&self) -> &str {
        match self {
            StageRecord::Url { stage_key, .. }
            | StageRecord::Stage { stage_key, .. }
            | StageRecord::Resource { stage_key, .. } => stage_key,
        }
    }

    pub fn stage_type(&self) -> &'static str {
        match self {
            StageRecord::Url { .. } => "url",
            StageRecord::Stage { .. } => "stage",
            StageRecord::Resource { .. } => "resource",
        }
    }

    /// The parent stage digest, if this stage has one (everything but `url`).
    pub fn parent(&self) -> Option<&str> {
        match self {
            StageRecord::Url { .. } => None,
            StageRecord::Stage { parent, .. } | StageRecord::Resource { parent, .. } => {
                Some(parent)
            }
        }
    }
}

/// A human-meaningful pointer at a resolved stage, used as a GC root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    pub stage_digest: String,
    pub image_digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_type_round_trips_through_json() {
        let record = StageRecord::Url {
            stage_digest: "d1".into(),
            stage_key: "k1".into(),
            image_digest: "i1".into(),
            url: "file:/tmp/x.zip".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"stage_type\":\"url\""));
        let back: StageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn resource_stage_has_no_resource_digest_when_absent() {
        let record = StageRecord::Resource {
            stage_digest: "d".into(),
            stage_key: "k".into(),
            image_digest: "i".into(),
            parent: "p".into(),
            resource_path: "data.txt".into(),
            resource_digest: None,
            digest_inputs: vec!["p".into(), "i".into()],
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("resource_digest"));
    }
}
