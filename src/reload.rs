//! Reload handler: parses a new configuration document, diffs it against the
//! live registry, and applies the result atomically (spec §4.5).

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::AuthState;
use crate::config::{fan_out, Document, JobSpec};
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::job::{JobRecord, JobState, ProcStatus};
use crate::registry::Registry;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Two-pass decode is unnecessary in serde (unlike the source's Go decoder,
/// which needs a first pass purely to learn `len(programs)` before it can
/// pre-populate a slice of default-valued structs) because `#[serde(default
/// = "...")]` on every `JobSpec` field already gives every omitted field its
/// default on a single decode. The two passes are kept here only
/// conceptually: parse, then validate/fan-out/drop-invalid.
pub fn load(path: &str) -> Result<Document, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut doc: Document = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })?;

    doc.programs = fan_out(doc.programs);
    for spec in &mut doc.programs {
        spec.name = spec.name.trim().to_string();
    }

    let mut seen = std::collections::HashSet::new();
    let mut valid = Vec::with_capacity(doc.programs.len());
    for spec in doc.programs.drain(..) {
        if !spec.is_valid() {
            warn!(name = %spec.name, "dropping invalid job config (empty name or command)");
            continue;
        }
        if !seen.insert(spec.name.clone()) {
            warn!(name = %spec.name, "duplicate job name in config, later entry wins");
        }
        valid.push(spec);
    }
    // Later entries win on duplicate name: keep the last occurrence only.
    let mut by_name: std::collections::HashMap<String, JobSpec> = std::collections::HashMap::new();
    for spec in valid {
        by_name.insert(spec.name.clone(), spec);
    }
    doc.programs = by_name.into_values().collect();
    Ok(doc)
}

/// Runs the full reload algorithm. Called from inside the dispatcher's
/// `Action::Reload` handler, which is itself already serialized against
/// every other action — `dispatcher` is still passed in so the handler can
/// take the pause/resume guard matching the source's structure, even though
/// entering this function already implies no concurrent action is running.
pub fn apply(
    path: &str,
    registry: &Registry,
    auth: &AuthState,
    dispatcher: &Dispatcher,
) -> Result<Vec<ProcStatus>, DispatchError> {
    let doc = load(path).map_err(|e| {
        warn!(error = %e, "reload failed, live registry left unchanged");
        DispatchError::UnknownMethod(format!("config error: {e}"))
    })?;

    let guard = dispatcher.pause();

    auth.apply_password(&doc.password);

    let mut candidates: std::collections::HashMap<String, JobSpec> = doc
        .programs
        .into_iter()
        .map(|spec| (spec.name.clone(), spec))
        .collect();

    // Remove pass.
    for name in registry.names() {
        if !candidates.contains_key(&name) {
            if let Some(rec) = registry.get(&name) {
                let _ = crate::supervisor::stop(&rec);
            }
            registry.remove(&name);
        }
    }

    let mut to_start: Vec<String> = Vec::new();

    // Reconcile + create passes.
    for (name, new_spec) in candidates.drain() {
        match registry.get(&name) {
            Some(rec) => {
                let state = rec.live.lock().state;
                let restart_sensitive_changed = {
                    let old_spec = rec.spec_snapshot();
                    !old_spec.restart_sensitive_eq(&new_spec)
                };
                match state {
                    JobState::Running | JobState::Starting | JobState::Backoff
                        if restart_sensitive_changed =>
                    {
                        let _ = crate::supervisor::stop(&rec);
                        *rec.spec.lock() = new_spec;
                        to_start.push(name);
                    }
                    JobState::Running | JobState::Starting => {
                        hot_patch(&rec, &new_spec);
                    }
                    JobState::Backoff => {
                        let _ = crate::supervisor::stop(&rec);
                        *rec.spec.lock() = new_spec;
                        to_start.push(name);
                    }
                    _ => {
                        let autostart = new_spec.autostart;
                        *rec.spec.lock() = new_spec;
                        if autostart && state.is_terminal() {
                            to_start.push(name);
                        }
                    }
                }
            }
            None => {
                let autostart = new_spec.autostart;
                let rec = Arc::new(JobRecord::new(name.clone(), new_spec));
                registry.insert(rec);
                if autostart {
                    to_start.push(name);
                }
            }
        }
    }

    for name in &to_start {
        if let Some(rec) = registry.get(name) {
            if let Err(e) = crate::supervisor::start(&rec) {
                warn!(job = %name, error = %e, "autostart after reload failed");
            }
        }
    }

    info!(jobs = registry.len(), "reload complete");
    drop(guard);

    Ok(registry.records().iter().map(|r| r.status()).collect())
}

/// Hot-patch restart-insensitive attributes in place without touching the
/// running child (`updateProc` in the source).
fn hot_patch(rec: &Arc<JobRecord>, new_spec: &JobSpec) {
    let mut spec = rec.spec.lock();
    spec.autostart = new_spec.autostart;
    spec.autorestart = new_spec.autorestart;
    spec.exit_codes = new_spec.exit_codes.clone();
    spec.start_time = new_spec.start_time;
    spec.start_retries = new_spec.start_retries;
    spec.stop_signal = new_spec.stop_signal;
    spec.stop_time = new_spec.stop_time;
}

/// Build the initial registry from a freshly loaded document (used at
/// supervisor startup, before the dispatcher exists to pause).
pub fn initial_registry(doc: &Document) -> Registry {
    let registry = Registry::new();
    for spec in &doc.programs {
        registry.insert(Arc::new(JobRecord::new(spec.name.clone(), spec.clone())));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_applies_defaults_and_fanout() {
        let file = write_config(
            r#"{ "Password": "", "ProgList": [
                { "Name": "worker", "Command": "/bin/true", "NumProcs": 2 }
            ] }"#,
        );
        let doc = load(file.path().to_str().unwrap()).unwrap();
        let mut names: Vec<_> = doc.programs.iter().map(|s| s.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["worker0".to_string(), "worker1".to_string()]);
        assert_eq!(doc.programs[0].start_retries, 3);
    }

    #[test]
    fn load_drops_invalid_entries() {
        let file = write_config(
            r#"{ "Password": "", "ProgList": [
                { "Name": "", "Command": "/bin/true" },
                { "Name": "ok", "Command": "" }
            ] }"#,
        );
        let doc = load(file.path().to_str().unwrap()).unwrap();
        assert!(doc.programs.is_empty());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let file = write_config("not json");
        let err = load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
