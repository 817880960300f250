//! Minimal JSON-lines-over-TCP RPC server. Each connection runs on its own
//! thread and carries its own authentication flag (see [`crate::auth`]).

pub mod protocol;

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::SupervisorContext;
use crate::dispatcher::{Action, DispatchError};
use protocol::{
    status_with_sentinel, AddMethodParams, AuthenticateParams, GetLogParams, GetStatusParams,
    Request, Response,
};

pub fn spawn(ctx: Arc<SupervisorContext>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!(port, "RPC listener bound");
    std::thread::Builder::new()
        .name("rpc-acceptor".into())
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let ctx = Arc::clone(&ctx);
                        std::thread::spawn(move || handle_connection(ctx, stream));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        })?;
    Ok(())
}

fn handle_connection(ctx: Arc<SupervisorContext>, stream: TcpStream) {
    let conn_id = ulid::Ulid::new();
    let mut authenticated = !ctx.auth.has_password();
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let span = tracing::info_span!("rpc_connection", conn = %conn_id, peer = %peer);
    let _enter = span.enter();
    let reader = BufReader::new(stream.try_clone().expect("clone RPC stream"));
    let mut writer = stream;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&ctx, request, &mut authenticated),
            Err(e) => Response::err(format!("malformed request: {e}")),
        };
        let mut payload = serde_json::to_string(&response).unwrap_or_default();
        payload.push('\n');
        if writer.write_all(payload.as_bytes()).is_err() {
            break;
        }
    }
    info!(peer = %peer, "RPC connection closed");
}

fn dispatch(ctx: &Arc<SupervisorContext>, request: Request, authenticated: &mut bool) -> Response {
    match request.method.as_str() {
        "HasPassword" => Response::ok(ctx.auth.has_password()),
        "Authenticate" => {
            let Ok(params) = serde_json::from_value::<AuthenticateParams>(request.params) else {
                return Response::err("invalid params for Authenticate");
            };
            let ok = ctx.auth.check(&params.password);
            *authenticated = ok;
            Response::ok(ok)
        }
        _ if !*authenticated => Response::err("unauthenticated"),
        "GetProcList" => Response::ok(ctx.registry.names()),
        "GetStatus" => {
            let params = serde_json::from_value::<GetStatusParams>(request.params).unwrap_or_default();
            let statuses: Vec<_> = if params.names.is_empty() {
                ctx.registry.records().iter().map(|r| r.status()).collect()
            } else {
                params
                    .names
                    .iter()
                    .filter_map(|n| ctx.registry.get(n))
                    .map(|r| r.status())
                    .collect()
            };
            Response::ok(status_with_sentinel(statuses, &ctx.registry.names()))
        }
        "GetLog" => {
            let params = serde_json::from_value::<GetLogParams>(request.params).unwrap_or_default();
            let n = if params.n <= 0 { 0 } else { params.n as usize };
            match ctx.log_writer.tail_lines(n) {
                Ok(lines) => Response::ok(lines),
                Err(e) => Response::err(format!("failed to read log: {e}")),
            }
        }
        "AddMethod" => {
            let Ok(params) = serde_json::from_value::<AddMethodParams>(request.params) else {
                return Response::err("invalid params for AddMethod");
            };
            let action = match params.method_name.as_str() {
                "StartProc" => Action::Start(params.parameter),
                "StopProc" => Action::Stop(params.parameter),
                "RestartProc" => Action::Restart(params.parameter),
                "Reload" => Action::Reload(ctx.config_path.clone()),
                "Shutdown" => Action::Shutdown,
                other => return Response::err(format!("unknown method: {other}")),
            };
            match ctx.dispatcher.submit(action) {
                Ok(statuses) => Response::ok(statuses),
                Err(DispatchError::UnknownMethod(m)) => Response::err(m),
                Err(DispatchError::Job(e)) => Response::err(e.to_string()),
            }
        }
        other => Response::err(format!("unknown method: {other}")),
    }
}
