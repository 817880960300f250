//! Job configuration: defaults, the on-disk document shape, and the restart
//! policy enum. Loading and diffing live in [`crate::reload`].

use serde::{Deserialize, Serialize};

pub const DFL_UMASK: u32 = 0o22;
pub const DFL_STOP_SIGNAL: i32 = libc::SIGTERM;
pub const DFL_START_RETRIES: u32 = 3;
pub const DFL_STOP_TIME: u64 = 10;
pub const DFL_START_TIME: u64 = 10;
pub const DFL_NUM_PROCS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoRestart {
    Never,
    Always,
    Unexpected,
}

impl Default for AutoRestart {
    fn default() -> Self {
        AutoRestart::Unexpected
    }
}

fn default_umask() -> u32 {
    DFL_UMASK
}
fn default_stop_signal() -> i32 {
    DFL_STOP_SIGNAL
}
fn default_start_retries() -> u32 {
    DFL_START_RETRIES
}
fn default_stop_time() -> u64 {
    DFL_STOP_TIME
}
fn default_start_time() -> u64 {
    DFL_START_TIME
}
fn default_num_procs() -> u32 {
    DFL_NUM_PROCS
}
fn default_exit_codes() -> Vec<i32> {
    vec![0, 2]
}

/// One job's configuration as it appears in the `ProgList` of the config
/// document. Wire keys are PascalCase (`Name`, `NumProcs`, `AutoStart`, ...),
/// matching the Go original's untagged exported struct fields, which is why
/// every field below carries an explicit rename rather than relying on
/// `rename_all` alone (`autostart`/`autorestart` have no underscore to split
/// on, so the automatic PascalCase conversion would yield `Autostart`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSpec {
    #[serde(default, rename = "Name")]
    pub name: String,
    #[serde(default, rename = "Command")]
    pub command: String,
    #[serde(default = "default_num_procs", rename = "NumProcs")]
    pub num_procs: u32,
    #[serde(default = "default_umask", rename = "Umask")]
    pub umask: u32,
    #[serde(default, rename = "Outfile")]
    pub outfile: String,
    #[serde(default, rename = "Errfile")]
    pub errfile: String,
    #[serde(default, rename = "WorkingDir")]
    pub working_dir: String,
    #[serde(default, rename = "Env")]
    pub env: Vec<String>,
    #[serde(default, rename = "AutoStart")]
    pub autostart: bool,
    #[serde(default, rename = "AutoRestart")]
    pub autorestart: AutoRestart,
    #[serde(default = "default_exit_codes", rename = "ExitCodes")]
    pub exit_codes: Vec<i32>,
    #[serde(default = "default_start_time", rename = "StartTime")]
    pub start_time: u64,
    #[serde(default = "default_start_retries", rename = "StartRetries")]
    pub start_retries: u32,
    #[serde(default = "default_stop_signal", rename = "StopSignal")]
    pub stop_signal: i32,
    #[serde(default = "default_stop_time", rename = "StopTime")]
    pub stop_time: u64,
}

impl Default for JobSpec {
    fn default() -> Self {
        JobSpec {
            name: String::new(),
            command: String::new(),
            num_procs: DFL_NUM_PROCS,
            umask: DFL_UMASK,
            outfile: String::new(),
            errfile: String::new(),
            working_dir: String::new(),
            env: Vec::new(),
            autostart: false,
            autorestart: AutoRestart::default(),
            exit_codes: default_exit_codes(),
            start_time: DFL_START_TIME,
            start_retries: DFL_START_RETRIES,
            stop_signal: DFL_STOP_SIGNAL,
            stop_time: DFL_STOP_TIME,
        }
    }
}

impl JobSpec {
    /// Validation applied after trimming `name`: both name and command must
    /// be non-empty or the record is dropped with a warning by the loader.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.command.trim().is_empty()
    }

    /// Restart-sensitive attributes: a change in any of these forces a stop
    /// and respawn rather than an in-place patch.
    pub fn restart_sensitive_eq(&self, other: &JobSpec) -> bool {
        self.command == other.command
            && self.outfile == other.outfile
            && self.errfile == other.errfile
            && self.working_dir == other.working_dir
            && self.umask == other.umask
            && env_set_eq(&self.env, &other.env)
    }
}

fn env_set_eq(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

/// Top-level configuration document: `{ "Password": "...", "ProgList": [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, rename = "Password")]
    pub password: String,
    #[serde(default, rename = "ProgList")]
    pub programs: Vec<JobSpec>,
}

/// Expand every `num_procs > 1` entry into `name0 .. name{n-1}` independent
/// specs sharing the same configuration, matching `CreateMultiProcess`.
pub fn fan_out(programs: Vec<JobSpec>) -> Vec<JobSpec> {
    let mut out = Vec::with_capacity(programs.len());
    for spec in programs {
        if spec.num_procs > 1 {
            for i in 0..spec.num_procs {
                let mut clone = spec.clone();
                clone.name = format!("{}{}", spec.name, i);
                out.push(clone);
            }
        } else {
            out.push(spec);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original() {
        let spec = JobSpec::default();
        assert_eq!(spec.umask, 0o22);
        assert_eq!(spec.autorestart, AutoRestart::Unexpected);
        assert_eq!(spec.exit_codes, vec![0, 2]);
        assert_eq!(spec.start_retries, 3);
        assert_eq!(spec.start_time, 10);
        assert_eq!(spec.stop_time, 10);
        assert_eq!(spec.num_procs, 1);
    }

    #[test]
    fn fan_out_expands_numeric_suffixes() {
        let spec = JobSpec {
            name: "worker".into(),
            command: "/bin/true".into(),
            num_procs: 3,
            ..Default::default()
        };
        let expanded = fan_out(vec![spec]);
        let names: Vec<_> = expanded.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["worker0", "worker1", "worker2"]);
    }

    #[test]
    fn env_set_eq_ignores_order() {
        assert!(env_set_eq(
            &["A=1".to_string(), "B=2".to_string()],
            &["B=2".to_string(), "A=1".to_string()]
        ));
        assert!(!env_set_eq(&["A=1".to_string()], &["A=2".to_string()]));
    }

    #[test]
    fn restart_sensitive_eq_ignores_insensitive_fields() {
        let a = JobSpec {
            name: "x".into(),
            command: "/bin/true".into(),
            autostart: false,
            ..Default::default()
        };
        let b = JobSpec {
            autostart: true,
            start_retries: 99,
            ..a.clone()
        };
        assert!(a.restart_sensitive_eq(&b));
    }
}
