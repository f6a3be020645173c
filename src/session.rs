//! Maps a session identifier to a project root using the manifest's identity hints,
//! buffering events that arrive before resolution completes.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde_json::Value;

use crate::events::HelloBody;

#[derive(Debug, Clone)]
pub struct CandidateRoot {
    pub path: PathBuf,
    pub product_guid: Option<String>,
    pub major_editor_version: Option<String>,
}

/// Supplies the candidate project roots the resolver scans in step 1. The editor
/// installer's recent-projects list lives outside the core; implementations plug it
/// in here.
pub trait RootCandidateSource: Send + Sync {
    fn candidates(&self) -> Vec<CandidateRoot>;
}

pub struct StaticRootCandidates(pub Vec<CandidateRoot>);

impl RootCandidateSource for StaticRootCandidates {
    fn candidates(&self) -> Vec<CandidateRoot> {
        self.0.clone()
    }
}

struct BufferedEvent {
    ty: String,
    body: Value,
}

#[derive(Default)]
struct SessionState {
    root: Option<PathBuf>,
    buffer: VecDeque<BufferedEvent>,
    /// Root handed down by an outer transport layer, used as resolution strategy 3.
    outer_hint: Option<PathBuf>,
}

pub struct SessionResolver {
    sessions: DashMap<String, SessionState>,
    candidate_source: Box<dyn RootCandidateSource>,
}

impl SessionResolver {
    pub fn new(candidate_source: Box<dyn RootCandidateSource>) -> Self {
        Self { sessions: DashMap::new(), candidate_source }
    }

    /// Registers a root resolved by an outer transport layer (resolution strategy 3).
    pub fn set_outer_hint(&self, session: &str, root: PathBuf) {
        let mut entry = self.sessions.entry(session.to_string()).or_default();
        entry.outer_hint = Some(root);
    }

    pub fn resolved_root(&self, session: &str) -> Option<PathBuf> {
        self.sessions.get(session).and_then(|s| s.root.clone())
    }

    /// Attempts resolution from a `hello` body, stopping at the first hit:
    /// 1. candidate roots matched by `productGUID`,
    /// 2. `dataPath`'s parent, if it ends in an assets folder,
    /// 3. a root previously resolved by an outer transport layer,
    /// 4. a tiebreaker match by major editor version.
    pub fn resolve_from_hello(&self, session: &str, hello: &HelloBody) -> Option<PathBuf> {
        let candidates = self.candidate_source.candidates();

        if let Some(guid) = &hello.product_guid {
            if let Some(hit) = candidates.iter().find(|c| c.product_guid.as_deref() == Some(guid.as_str())) {
                return Some(hit.path.clone());
            }
        }

        if let Some(data_path) = &hello.data_path {
            let p = Path::new(data_path);
            if p.file_name().map(|n| n == "Assets").unwrap_or(false) {
                if let Some(parent) = p.parent() {
                    return Some(parent.to_path_buf());
                }
            }
        }

        if let Some(state) = self.sessions.get(session) {
            if let Some(hint) = &state.outer_hint {
                return Some(hint.clone());
            }
        }

        if let Some(version) = &hello.unity_version {
            let major = major_version(version);
            if let Some(hit) = candidates
                .iter()
                .find(|c| c.major_editor_version.as_deref() == Some(major.as_str()))
            {
                return Some(hit.path.clone());
            }
        }

        None
    }

    /// Records a resolved root and returns the buffered events in arrival order, ready
    /// to be drained through the Indexer.
    pub fn mark_resolved(&self, session: &str, root: PathBuf) -> Vec<(String, Value)> {
        let mut entry = self.sessions.entry(session.to_string()).or_default();
        entry.root = Some(root);
        entry.buffer.drain(..).map(|e| (e.ty, e.body)).collect()
    }

    /// Buffers an event in arrival order when the session is not yet resolved.
    pub fn buffer_event(&self, session: &str, ty: &str, body: Value) {
        let mut entry = self.sessions.entry(session.to_string()).or_default();
        entry.buffer.push_back(BufferedEvent { ty: ty.to_string(), body });
    }

    pub fn is_resolved(&self, session: &str) -> bool {
        self.sessions.get(session).map(|s| s.root.is_some()).unwrap_or(false)
    }

    pub fn remove_session(&self, session: &str) {
        self.sessions.remove(session);
    }
}

fn major_version(version: &str) -> String {
    version.split('.').next().unwrap_or(version).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(candidates: Vec<CandidateRoot>) -> SessionResolver {
        SessionResolver::new(Box::new(StaticRootCandidates(candidates)))
    }

    #[test]
    fn resolves_by_product_guid_first() {
        let resolver = resolver_with(vec![CandidateRoot {
            path: PathBuf::from("/projects/Foo"),
            product_guid: Some("abc".into()),
            major_editor_version: None,
        }]);
        let hello = HelloBody { product_guid: Some("abc".into()), cloud_project_id: None, unity_version: None, data_path: None };
        assert_eq!(resolver.resolve_from_hello("s1", &hello), Some(PathBuf::from("/projects/Foo")));
    }

    #[test]
    fn falls_back_to_data_path_parent() {
        let resolver = resolver_with(vec![]);
        let hello = HelloBody {
            product_guid: None,
            cloud_project_id: None,
            unity_version: None,
            data_path: Some("/projects/Bar/Assets".into()),
        };
        assert_eq!(resolver.resolve_from_hello("s1", &hello), Some(PathBuf::from("/projects/Bar")));
    }

    #[test]
    fn buffers_events_before_resolution_and_drains_in_order() {
        let resolver = resolver_with(vec![]);
        resolver.buffer_event("s1", "assets_imported", serde_json::json!({"a": 1}));
        resolver.buffer_event("s1", "assets_imported", serde_json::json!({"a": 2}));
        assert!(!resolver.is_resolved("s1"));
        let drained = resolver.mark_resolved("s1", PathBuf::from("/projects/Baz"));
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].1["a"], 1);
        assert_eq!(drained[1].1["a"], 2);
        assert!(resolver.is_resolved("s1"));
    }
}
