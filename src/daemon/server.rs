//! Socket server: accept loop and per-connection request handling.

use crate::daemon::ShutdownReason;
use crate::daemon::ipc::{
    ErrorPayload, Request, Response, ResponsePayload, decode_request, encode_response,
};
use crate::daemon::repo::RepoCore;
use crate::error::{ErrorCode, Result, Severity};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const CLIENT_POLL: Duration = Duration::from_millis(200);

/// Accept connections until the core stops listening.
///
/// The listener must be non-blocking so the loop can notice shutdown.
pub fn run_acceptor(listener: &UnixListener, core: &Arc<RepoCore>) {
    while core.is_listening() {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let core = Arc::clone(core);
                let spawned = thread::Builder::new()
                    .name("bd-client".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_client(stream, &core) {
                            tracing::debug!(error = %err, "client connection closed with error");
                        }
                    });
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "failed to spawn client handler");
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::debug!("acceptor stopped");
}

/// Serve one connection: one JSON request per line, one response per line.
/// A malformed line gets a parse error and the connection stays open.
fn handle_client(stream: UnixStream, core: &RepoCore) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_POLL))?;
    stream.set_write_timeout(Some(core.config().rpc_timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut line = Vec::new();

    loop {
        // `read_until` keeps partial input in `line` across timeouts.
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if !core.is_listening() && line.is_empty() {
                    return Ok(());
                }
                continue;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }

        let text = String::from_utf8_lossy(&line).trim().to_string();
        line.clear();
        if text.is_empty() {
            continue;
        }

        let (response, shutdown) = match decode_request(&text) {
            Ok(request) => {
                let shutdown = matches!(request, Request::Shutdown);
                (dispatch(core, request), shutdown)
            }
            Err(err) => {
                tracing::debug!(error = %err, "unparseable request");
                (
                    Response::err(ErrorPayload::new(ErrorCode::ParseError, err.to_string())),
                    false,
                )
            }
        };

        writer.write_all(&encode_response(&response)?)?;
        writer.flush()?;

        if shutdown && matches!(response, Response::Ok { .. }) {
            core.request_shutdown(ShutdownReason::Requested);
            return Ok(());
        }
    }
}

/// Run one request against the core. Everything but `ping` and `status`
/// counts as in flight and is refused once the daemon is stopping.
pub fn dispatch(core: &RepoCore, request: Request) -> Response {
    let op = request.name();
    tracing::trace!(op, "request");

    let result = if request.is_control() {
        handle(core, request)
    } else {
        match core.enter() {
            Ok(_in_flight) => handle(core, request),
            Err(err) => Err(err),
        }
    };

    match result {
        Ok(payload) => Response::ok(payload),
        Err(err) => {
            if err.severity() == Severity::Recoverable {
                tracing::debug!(op, error = %err, "request failed");
            } else {
                tracing::warn!(op, error = %err, "request failed");
            }
            Response::err(&err)
        }
    }
}

fn handle(core: &RepoCore, request: Request) -> Result<ResponsePayload> {
    Ok(match request {
        Request::Ping => ResponsePayload::Pong(core.ping_info()),
        Request::Status => ResponsePayload::Status(Box::new(core.status())),
        Request::Get { id } => ResponsePayload::Issue(Box::new(core.get(&id)?)),
        Request::Create { issue, actor } => {
            ResponsePayload::Issue(Box::new(core.create(&issue, &actor)?))
        }
        Request::Update { id, patch, actor } => {
            ResponsePayload::Issue(Box::new(core.update(&id, &patch, &actor)?))
        }
        Request::AddComment { id, text, author } => {
            ResponsePayload::Comment(core.add_comment(&id, &text, &author)?)
        }
        Request::Delete { id, actor, reason } => {
            ResponsePayload::Issue(Box::new(core.delete(&id, &actor, reason.as_deref())?))
        }
        Request::List { filter } => ResponsePayload::Issues(core.list(&filter)?),
        Request::Sync { full } => ResponsePayload::Synced(core.sync_now(full)?.into()),
        Request::Shutdown => ResponsePayload::ShuttingDown,
    })
}
