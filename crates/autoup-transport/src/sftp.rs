//! SFTP transport
//!
//! Each connection is one SSH session authenticated with the configured user and password, with an
//! SFTP channel on top. libssh2 calls block, so every remote operation runs on the blocking pool.
//! Host keys are not verified.

use async_trait::async_trait;
use autoup_config::RemoteConfig;
use autoup_types::{Connector, Error, Result, Transport};
use ssh2::{ErrorCode, Session, Sftp};
use std::fmt;
use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Port used when an address names none
pub const DEFAULT_PORT: u16 = 22;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DIR_MODE: i32 = 0o755;

// SSH_FX_NO_SUCH_FILE and SSH_FX_NO_SUCH_PATH status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

/// Host and port of an SFTP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpAddress {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl SftpAddress {
    /// Parse `sftp://host[:port]` or a bare `host[:port]`
    ///
    /// IPv6 hosts are written in brackets, e.g. `[::1]:2222`.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::config(format!("Invalid sftp address '{}': {}", address, reason))
        };

        let rest = match address.trim().split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("sftp") => rest,
            Some((scheme, _)) => return Err(invalid(&format!("unexpected scheme '{}'", scheme))),
            None => address.trim(),
        };
        let rest = rest.trim_end_matches('/');
        if rest.contains('/') {
            return Err(invalid("paths belong in remote_base_dir"));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '['"))?;
            let port = if tail.is_empty() {
                None
            } else {
                Some(tail.strip_prefix(':').ok_or_else(|| invalid("expected ':' after ']'"))?)
            };
            (host, port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| invalid(&format!("bad port '{}'", port)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SftpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connector opening password-authenticated SFTP sessions
#[derive(Clone)]
pub struct SftpConnector {
    address: SftpAddress,
    user: String,
    password: Option<String>,
}

impl fmt::Debug for SftpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConnector")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SftpConnector {
    /// Create a connector for `user` at `address`
    pub fn new<S: Into<String>>(address: SftpAddress, user: S, password: Option<String>) -> Self {
        Self {
            address,
            user: user.into(),
            password,
        }
    }

    /// Build a connector from a configured remote
    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        let address = SftpAddress::parse(&remote.address)?;
        if remote.user.trim().is_empty() {
            return Err(Error::config(format!(
                "Remote '{}' needs a user for sftp",
                remote.address
            )));
        }
        Ok(Self::new(address, remote.user.clone(), remote.password.clone()))
    }

    /// Server address
    pub fn address(&self) -> &SftpAddress {
        &self.address
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let address = self.address.clone();
        let user = self.user.clone();
        let password = self.password.clone();

        let client = tokio::task::spawn_blocking(move || {
            SftpClient::open(&address, &user, password.as_deref())
        })
        .await
        .map_err(|e| Error::transport(format!("Task join error: {}", e)))??;

        debug!("Connected to {}", self.endpoint());
        Ok(Box::new(SftpTransport {
            endpoint: self.endpoint(),
            client: Some(Arc::new(client)),
        }))
    }

    fn endpoint(&self) -> String {
        format!("sftp://{}@{}", self.user, self.address)
    }
}

struct SftpClient {
    session: Session,
    sftp: Sftp,
}

impl SftpClient {
    fn open(address: &SftpAddress, user: &str, password: Option<&str>) -> Result<Self> {
        let socket = (address.host.as_str(), address.port)
            .to_socket_addrs()
            .map_err(|e| Error::transport(format!("Failed to resolve '{}': {}", address, e)))?
            .next()
            .ok_or_else(|| Error::transport(format!("'{}' resolved to no address", address)))?;

        let tcp = TcpStream::connect_timeout(&socket, CONNECT_TIMEOUT)
            .map_err(|e| Error::transport(format!("Failed to connect to '{}': {}", address, e)))?;

        let ssh = |action: &str, e: ssh2::Error| {
            Error::transport(format!("SSH {} with '{}' failed: {}", action, address, e))
        };

        let mut session = Session::new().map_err(|e| ssh("setup", e))?;
        session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| ssh("handshake", e))?;
        session
            .userauth_password(user, password.unwrap_or_default())
            .map_err(|e| ssh("authentication", e))?;
        if !session.authenticated() {
            return Err(Error::transport(format!(
                "User '{}' was not authenticated by '{}'",
                user, address
            )));
        }
        let sftp = session.sftp().map_err(|e| ssh("sftp channel", e))?;

        Ok(Self { session, sftp })
    }
}

/// Transport issuing SFTP requests over one SSH session
pub struct SftpTransport {
    endpoint: String,
    client: Option<Arc<SftpClient>>,
}

impl fmt::Debug for SftpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpTransport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.client.is_some())
            .finish()
    }
}

impl SftpTransport {
    async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.client.clone().ok_or_else(|| {
            Error::transport(format!("Connection to '{}' is closed", self.endpoint))
        })?;

        tokio::task::spawn_blocking(move || operation(&client.sftp))
            .await
            .map_err(|e| Error::transport(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl Transport for SftpTransport {
    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        let source = local.to_path_buf();
        let target = remote.to_string();
        self.run(move |sftp| upload_blocking(sftp, &source, &target))
            .await?;

        debug!("Uploaded: {} -> {}", local.display(), remote);
        Ok(())
    }

    async fn mkdir(&mut self, remote: &str) -> Result<()> {
        let target = remote.to_string();
        self.run(move |sftp| mkdir_blocking(sftp, &target)).await?;

        debug!("Created directory: {}", remote);
        Ok(())
    }

    async fn remove(&mut self, remote: &str) -> Result<()> {
        let target = PathBuf::from(remote);
        self.run(move |sftp| match sftp.unlink(&target) {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(remote_error("remove", &target, &e)),
        })
        .await?;

        debug!("Removed: {}", remote);
        Ok(())
    }

    async fn remove_directory(&mut self, remote: &str) -> Result<()> {
        let target = PathBuf::from(remote);
        self.run(move |sftp| remove_tree_blocking(sftp, &target))
            .await?;

        debug!("Removed directory: {}", remote);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        let endpoint = self.endpoint.clone();
        tokio::task::spawn_blocking(move || {
            client
                .session
                .disconnect(None, "autoup closing", None)
                .map_err(|e| {
                    Error::transport(format!("Failed to disconnect from '{}': {}", endpoint, e))
                })
        })
        .await
        .map_err(|e| Error::transport(format!("Task join error: {}", e)))?
    }
}

fn is_not_found(error: &ssh2::Error) -> bool {
    matches!(
        error.code(),
        ErrorCode::SFTP(code) if code == FX_NO_SUCH_FILE || code == FX_NO_SUCH_PATH
    )
}

fn remote_error(action: &str, path: &Path, error: &ssh2::Error) -> Error {
    Error::transport(format!(
        "Failed to {} '{}': {}",
        action,
        path.display(),
        error
    ))
}

fn upload_blocking(sftp: &Sftp, local: &Path, remote: &str) -> Result<()> {
    let mut source = File::open(local).map_err(|e| Error::Io {
        message: format!("Failed to open '{}': {}", local.display(), e),
    })?;

    let remote_path = Path::new(remote);
    let mut destination = sftp
        .create(remote_path)
        .map_err(|e| remote_error("create", remote_path, &e))?;

    io::copy(&mut source, &mut destination).map_err(|e| {
        Error::transport(format!(
            "Failed to upload '{}' to '{}': {}",
            local.display(),
            remote,
            e
        ))
    })?;
    Ok(())
}

/// Create `remote` and any missing ancestors
fn mkdir_blocking(sftp: &Sftp, remote: &str) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(remote);

    while let Some(path) = current {
        match sftp.stat(Path::new(path)) {
            Ok(stat) if stat.is_dir() => break,
            Ok(_) => {
                return Err(Error::transport(format!(
                    "Remote '{}' exists and is not a directory",
                    path
                )))
            }
            Err(e) if is_not_found(&e) => {
                missing.push(path);
                current = parent_of(path);
            }
            Err(e) => return Err(remote_error("stat", Path::new(path), &e)),
        }
    }

    for path in missing.into_iter().rev() {
        sftp.mkdir(Path::new(path), DIR_MODE)
            .map_err(|e| remote_error("create directory", Path::new(path), &e))?;
    }
    Ok(())
}

/// Parent of a remote path in either separator style; the filesystem root has none
fn parent_of(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(['/', '\\']);
    let index = trimmed.rfind(['/', '\\'])?;
    let parent = &trimmed[..index];
    if parent.is_empty() || parent.ends_with(':') {
        None
    } else {
        Some(parent)
    }
}

/// Delete a remote directory, descendants first
fn remove_tree_blocking(sftp: &Sftp, remote: &Path) -> Result<()> {
    let entries = match sftp.readdir(remote) {
        Ok(entries) => entries,
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(remote_error("list", remote, &e)),
    };

    for (path, stat) in entries {
        if stat.is_dir() {
            remove_tree_blocking(sftp, &path)?;
        } else {
            match sftp.unlink(&path) {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(remote_error("remove", &path, &e)),
            }
        }
    }

    match sftp.rmdir(remote) {
        Ok(()) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(remote_error("remove directory", remote, &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoup_types::ErrorKind;
    use rstest::rstest;
    use std::net::TcpListener;

    #[rstest]
    #[case("sftp://example.com:2222", "example.com", 2222)]
    #[case("SFTP://example.com", "example.com", 22)]
    #[case("192.168.1.10:22", "192.168.1.10", 22)]
    #[case("backup.lan", "backup.lan", 22)]
    #[case("sftp://[::1]:2200/", "::1", 2200)]
    #[case("[fe80::1]", "fe80::1", 22)]
    fn test_parse_address(#[case] address: &str, #[case] host: &str, #[case] port: u16) {
        let parsed = SftpAddress::parse(address).unwrap();
        assert_eq!(parsed.host, host);
        assert_eq!(parsed.port, port);
    }

    #[rstest]
    #[case("sftp://")]
    #[case(":22")]
    #[case("host:port")]
    #[case("host:70000")]
    #[case("sftp://host/var/www")]
    #[case("[::1")]
    #[case("ftp://host")]
    fn test_parse_rejects(#[case] address: &str) {
        let err = SftpAddress::parse(address).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(SftpAddress::parse("h:23").unwrap().to_string(), "h:23");
        assert_eq!(SftpAddress::parse("[::1]").unwrap().to_string(), "[::1]:22");
    }

    #[rstest]
    #[case("/srv/www/site", Some("/srv/www"))]
    #[case("/srv/", None)]
    #[case("/srv", None)]
    #[case("relative", None)]
    #[case("C:\\mirror\\site", Some("C:\\mirror"))]
    #[case("C:\\mirror", None)]
    fn test_parent_of(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(parent_of(path), expected);
    }

    #[test]
    fn test_from_config_requires_user() {
        let remote = RemoteConfig {
            address: "example.com:22".to_string(),
            ..RemoteConfig::default()
        };
        assert_eq!(
            SftpConnector::from_config(&remote).unwrap_err().kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let remote = RemoteConfig {
            address: "example.com".to_string(),
            user: "deploy".to_string(),
            password: Some("hunter2".to_string()),
        };
        let connector = SftpConnector::from_config(&remote).unwrap();
        assert_eq!(connector.endpoint(), "sftp://deploy@example.com:22");
        assert!(!format!("{:?}", connector).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = SftpConnector::new(
            SftpAddress {
                host: "127.0.0.1".to_string(),
                port,
            },
            "deploy",
            None,
        );

        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.needs_reconnect());
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_operations() {
        let mut transport = SftpTransport {
            endpoint: "sftp://deploy@example.com:22".to_string(),
            client: None,
        };
        let err = transport.mkdir("/srv").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        transport.close().await.unwrap();
    }
}
