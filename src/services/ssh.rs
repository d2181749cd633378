use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ssh2::{ErrorCode, Session};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tracing::debug;

use super::{Outcome, ServiceClient, ServiceRegistry};
use crate::tasks::Task;

pub const SERVICE: &str = "ssh";
pub const DEFAULT_PORT: u16 = 22;

// libssh2 session error codes that mean the transport went away mid-auth.
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

pub fn register(registry: &mut ServiceRegistry) {
    registry.register(SERVICE, DEFAULT_PORT, Arc::new(SshClient));
}

/// Password authentication over SSH using libssh2.
pub struct SshClient;

#[async_trait]
impl ServiceClient for SshClient {
    async fn attempt(&self, task: &Task, timeout: Duration) -> Result<Outcome> {
        debug!("SSH executing {}", task.identity());
        let host = task.host.clone();
        let port = task.port;
        let username = task.username.clone();
        let secret = task.secret.clone();

        spawn_blocking(move || try_ssh_login(&host, port, &username, &secret, timeout))
            .await
            .map_err(|e| anyhow!("SSH worker for {}:{} failed: {}", task.host, task.port, e))?
    }
}

fn try_ssh_login(host: &str, port: u16, username: &str, secret: &str, timeout: Duration) -> Result<Outcome> {
    let addr = match (host, port).to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
        Some(addr) => addr,
        None => {
            debug!("SSH could not resolve {}:{}", host, port);
            return Ok(Outcome::ConnectionFailed);
        }
    };

    let tcp = match TcpStream::connect_timeout(&addr, timeout) {
        Ok(tcp) => tcp,
        Err(e) => {
            debug!("SSH connection to {} failed: {}", addr, e);
            return Ok(Outcome::ConnectionFailed);
        }
    };
    tcp.set_read_timeout(Some(timeout))?;
    tcp.set_write_timeout(Some(timeout))?;

    let mut sess = Session::new()?;
    sess.set_tcp_stream(tcp);
    sess.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));

    if let Err(e) = sess.handshake() {
        debug!("SSH handshake with {} failed (timed out?): {}", addr, e);
        return Ok(Outcome::ConnectionFailed);
    }

    let outcome = match sess.userauth_password(username, secret) {
        Ok(()) => Outcome::Authenticated(sess.authenticated()),
        Err(e) => {
            let outcome = classify_auth_error(&e);
            if outcome == Outcome::ConnectionFailed {
                debug!("SSH authentication with {} lost the connection: {}", addr, e);
            }
            outcome
        }
    };

    let _ = sess.disconnect(None, "Closing session", None);
    Ok(outcome)
}

/// Transport errors during `userauth_password` are connection failures;
/// anything else (`-18` authentication failed included) is a rejection.
fn classify_auth_error(err: &ssh2::Error) -> Outcome {
    match err.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV,
        ) => Outcome::ConnectionFailed,
        _ => Outcome::Authenticated(false),
    }
}
