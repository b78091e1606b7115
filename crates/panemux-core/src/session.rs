//! Persisted session records.

use crate::layout::{LayoutNode, PaneRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variables injected into every new shell.
pub const ENV_PROJECT_ID: &str = "PANEMUX_PROJECT_ID";
pub const ENV_SESSION_ID: &str = "PANEMUX_SESSION_ID";
pub const ENV_PANE_ID: &str = "PANEMUX_PANE_ID";
pub const ENV_API_URL: &str = "PANEMUX_API_URL";
pub const ENV_FEATURE_ID: &str = "PANEMUX_FEATURE_ID";

/// A workspace session: a working directory plus its pane layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub branch: String,
    pub work_dir: PathBuf,
    pub layout: LayoutNode,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// New record whose layout is a single freshly minted pane.
    pub fn new(project_id: impl Into<String>, work_dir: impl Into<PathBuf>, role: PaneRole) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            feature_id: None,
            name: String::new(),
            branch: String::new(),
            work_dir: work_dir.into(),
            layout: LayoutNode::leaf(crate::layout::new_pane_id(), role),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a layout mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Environment for a pane's shell. The parent environment and `TERM`
    /// are added by the pty layer.
    pub fn pane_env(&self, pane_id: &str, api_url: &str) -> HashMap<String, String> {
        let mut env = HashMap::from([
            (ENV_PROJECT_ID.to_string(), self.project_id.clone()),
            (ENV_SESSION_ID.to_string(), self.id.clone()),
            (ENV_PANE_ID.to_string(), pane_id.to_string()),
            (ENV_API_URL.to_string(), api_url.to_string()),
        ]);
        if let Some(feature_id) = self.feature_id.as_ref().filter(|f| !f.is_empty()) {
            env.insert(ENV_FEATURE_ID.to_string(), feature_id.clone());
        }
        env
    }
}

/// On-disk form of [`SessionRecord`]; older versions wrote no layout.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredSession {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub branch: String,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub layout: Option<LayoutNode>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl StoredSession {
    /// Apply load-time migrations. A missing layout becomes a single leaf
    /// whose pane id is the session id, which keeps pre-layout single-pane
    /// sessions bound to their existing multiplexer session.
    ///
    /// Returns the record and whether it differs from what was stored.
    pub fn migrate(self) -> (SessionRecord, bool) {
        let (mut layout, mut migrated) = match self.layout {
            Some(layout) => (layout, false),
            None => (LayoutNode::Leaf(crate::layout::Leaf {
                pane_id: self.id.clone(),
                ..Default::default()
            }), true),
        };
        migrated |= layout.normalize_names();
        let feature_id = self.feature_id.filter(|f| !f.is_empty());
        let record = SessionRecord {
            id: self.id,
            project_id: self.project_id,
            feature_id,
            name: self.name,
            branch: self.branch,
            work_dir: self.work_dir,
            layout,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (record, migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_layout_becomes_leaf_named_after_session() {
        let stored: StoredSession = serde_json::from_str(
            r#"{"id":"s1","project_id":"p","work_dir":"/tmp","layout":null,
                "created_at":"2024-05-01T10:00:00+02:00","updated_at":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let (record, migrated) = stored.migrate();
        assert!(migrated);
        assert_eq!(record.layout.collect_leaves(), vec!["s1"]);
        let (leaf, _) = record.layout.find("s1").unwrap();
        assert_eq!(leaf.multiplexer_name, "panemux-s1");
        assert_eq!(leaf.effective_role(), PaneRole::Agent);
    }

    #[test]
    fn current_record_is_not_migrated() {
        let record = SessionRecord::new("proj", "/tmp", PaneRole::Shell);
        let json = serde_json::to_string(&record).unwrap();
        let stored: StoredSession = serde_json::from_str(&json).unwrap();
        let (back, migrated) = stored.migrate();
        assert!(!migrated);
        assert_eq!(back, record);
    }

    #[test]
    fn pane_env_includes_feature_only_when_set() {
        let mut record = SessionRecord::new("proj", "/tmp", PaneRole::Shell);
        let env = record.pane_env("pane", "http://localhost:9800");
        assert_eq!(env[ENV_PROJECT_ID], "proj");
        assert_eq!(env[ENV_SESSION_ID], record.id);
        assert_eq!(env[ENV_PANE_ID], "pane");
        assert_eq!(env[ENV_API_URL], "http://localhost:9800");
        assert!(!env.contains_key(ENV_FEATURE_ID));

        record.feature_id = Some("feat".into());
        let env = record.pane_env("pane", "http://localhost:9800");
        assert_eq!(env[ENV_FEATURE_ID], "feat");
    }
}
