use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::async_native_tls::TlsConnector;
use suppaftp::{AsyncFtpStream, AsyncNativeTlsConnector, AsyncNativeTlsFtpStream, FtpError, Status};
use tokio::time::timeout as with_timeout;
use tracing::debug;

use super::{Outcome, ServiceClient, ServiceRegistry};
use crate::tasks::{format_host, Task};

pub const SERVICE: &str = "ftp";
pub const DEFAULT_PORT: u16 = 21;

const TLS_REQUIRED_MARKERS: [&str; 4] = [
    "SSL/TLS required",
    "TLS required on the control channel",
    "220 TLS go first",
    "SSL connection required",
];

pub fn register(registry: &mut ServiceRegistry) {
    registry.register(SERVICE, DEFAULT_PORT, Arc::new(FtpClient));
}

/// USER/PASS login over FTP, upgrading to explicit FTPS when the server
/// refuses plaintext logins.
pub struct FtpClient;

/// How a reply to the plaintext login should be treated.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Rejected,
    TlsRequired,
    Busy,
    Transport,
}

fn classify(err: &FtpError) -> Reply {
    match err {
        FtpError::ConnectionError(_) => Reply::Transport,
        FtpError::UnexpectedResponse(resp) => {
            classify_reply(&resp.status, &String::from_utf8_lossy(&resp.body))
        }
        other => classify_body(&other.to_string()),
    }
}

/// The status code decides busy servers; only the text can reveal a TLS requirement.
fn classify_reply(status: &Status, body: &str) -> Reply {
    if matches!(status, Status::NotAvailable) {
        Reply::Busy
    } else {
        classify_body(body)
    }
}

fn classify_body(body: &str) -> Reply {
    if TLS_REQUIRED_MARKERS.iter().any(|marker| body.contains(marker)) {
        Reply::TlsRequired
    } else {
        // 530, or any other reply from a live server that did not accept USER/PASS.
        Reply::Rejected
    }
}

/// Runs an FTP step under the per-attempt timeout. `None` means timed out.
async fn bounded<T, F>(limit: Duration, fut: F) -> Option<std::result::Result<T, FtpError>>
where
    F: Future<Output = std::result::Result<T, FtpError>>,
{
    with_timeout(limit, fut).await.ok()
}

#[async_trait]
impl ServiceClient for FtpClient {
    async fn attempt(&self, task: &Task, timeout: Duration) -> Result<Outcome> {
        debug!("FTP executing {}", task.identity());
        let addr = format!("{}:{}", format_host(&task.host), task.port);

        let mut ftp = match bounded(timeout, AsyncFtpStream::connect(addr.as_str())).await {
            Some(Ok(ftp)) => ftp,
            Some(Err(e)) => match classify(&e) {
                Reply::TlsRequired => {
                    debug!("{} indicated TLS is required during connect", addr);
                    return try_ftps_login(&addr, &task.host, &task.username, &task.secret, timeout).await;
                }
                _ => {
                    debug!("FTP connection to {} failed: {}", addr, e);
                    return Ok(Outcome::ConnectionFailed);
                }
            },
            None => {
                debug!("FTP connection to {} timed out", addr);
                return Ok(Outcome::ConnectionFailed);
            }
        };

        let login = bounded(timeout, ftp.login(task.username.as_str(), task.secret.as_str())).await;
        let _ = bounded(timeout, ftp.quit()).await;

        match login {
            Some(Ok(())) => Ok(Outcome::Authenticated(true)),
            Some(Err(e)) => match classify(&e) {
                Reply::Rejected => Ok(Outcome::Authenticated(false)),
                Reply::TlsRequired => {
                    debug!("{} indicated TLS is required, retrying over FTPS", addr);
                    try_ftps_login(&addr, &task.host, &task.username, &task.secret, timeout).await
                }
                Reply::Busy | Reply::Transport => {
                    debug!("FTP login on {} failed: {}", addr, e);
                    Ok(Outcome::ConnectionFailed)
                }
            },
            None => {
                debug!("FTP login on {} timed out", addr);
                Ok(Outcome::ConnectionFailed)
            }
        }
    }
}

async fn try_ftps_login(addr: &str, host: &str, username: &str, secret: &str, timeout: Duration) -> Result<Outcome> {
    let ftp = match bounded(timeout, AsyncNativeTlsFtpStream::connect(addr)).await {
        Some(Ok(ftp)) => ftp,
        _ => return Ok(Outcome::ConnectionFailed),
    };

    let connector = AsyncNativeTlsConnector::from(
        TlsConnector::new()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true),
    );
    let domain = host.trim_start_matches('[').trim_end_matches(']');

    let mut ftp = match bounded(timeout, ftp.into_secure(connector, domain)).await {
        Some(Ok(ftp)) => ftp,
        Some(Err(e)) => {
            debug!("TLS upgrade for {} failed: {}", addr, e);
            return Ok(Outcome::ConnectionFailed);
        }
        None => return Ok(Outcome::ConnectionFailed),
    };

    let login = bounded(timeout, ftp.login(username, secret)).await;
    let _ = bounded(timeout, ftp.quit()).await;

    Ok(match login {
        Some(Ok(())) => Outcome::Authenticated(true),
        Some(Err(e)) => match classify(&e) {
            Reply::Rejected | Reply::TlsRequired => Outcome::Authenticated(false),
            Reply::Busy | Reply::Transport => Outcome::ConnectionFailed,
        },
        None => Outcome::ConnectionFailed,
    })
}
