//! Wire types for the newline-delimited JSON RPC protocol. Framing and the
//! JSON decoder itself are thin external collaborators (out of scope per the
//! spec); these are just the request/response shapes something has to
//! exercise the dispatcher and registry through.

use serde::{Deserialize, Serialize};

use crate::job::ProcStatus;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: impl Serialize) -> Self {
        Response {
            ok: true,
            result: Some(serde_json::to_value(result).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Response {
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddMethodParams {
    pub method_name: String,
    #[serde(default)]
    pub parameter: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateParams {
    pub password: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct GetStatusParams {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GetLogParams {
    #[serde(default)]
    pub n: i64,
}

/// `GetStatus`'s trailing sentinel element carrying the space-joined list of
/// every job name in the registry, independent of which names were
/// requested, matching the source's client-completion convenience.
pub fn status_with_sentinel(statuses: Vec<ProcStatus>, names: &[String]) -> Vec<ProcStatus> {
    let mut out = statuses;
    out.push(ProcStatus {
        name: names.join(" "),
        pid: 0,
        state: String::new(),
        runtime_secs: 0,
    });
    out
}
