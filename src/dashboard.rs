//! Embedded HTTP dashboard: a thin, fixed-format status page. No templating
//! engine, matching the minimalism of the source's `html.go` (itself a thin
//! template renderer) without loading an HTML template asset this crate
//! does not ship.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::SupervisorContext;

pub fn spawn(ctx: Arc<SupervisorContext>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!(port, "dashboard listener bound");
    std::thread::Builder::new()
        .name("dashboard".into())
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(mut stream) => {
                        // Discard the request line/headers; every request
                        // gets the same snapshot regardless of path.
                        let mut buf = [0u8; 1024];
                        let _ = stream.read(&mut buf);
                        let body = render(&ctx);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = stream.write_all(response.as_bytes());
                    }
                    Err(e) => warn!(error = %e, "dashboard accept failed"),
                }
            }
        })?;
    Ok(())
}

fn render(ctx: &SupervisorContext) -> String {
    let mut out = String::from("NAME\tPID\tSTATE\tRUNTIME(s)\n");
    for rec in ctx.registry.records() {
        let status = rec.status();
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            status.name, status.pid, status.state, status.runtime_secs
        ));
    }
    out
}
