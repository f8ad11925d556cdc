//! SSH/SFTP session implementation
//!
//! A session is two independent SSH connections to the same host, both
//! authenticated with the same private key: one carries shell commands, the
//! other an SFTP channel for file transfer. `ssh2` is blocking, so every
//! operation runs inside `spawn_blocking`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use secrecy::ExposeSecret;
use ssh2::{CheckResult, HashType, KnownHostFileKind, OpenFlags, OpenType, Session, Sftp};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{ConnectError, ExecError, TransferError};
use super::path::RemotePath;
use super::relay;
use super::{CommandStatus, Connector, RemoteHost};
use crate::config::{ConnectionSettings, HostKeyPolicy};
use crate::context::{Interrupted, RunContext};

const TRANSFER_CHUNK: usize = 64 * 1024;

/// Opens [`SshSession`]s
#[derive(Debug, Clone)]
pub struct SshConnector {
    forward_stdin: bool,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            forward_stdin: true,
        }
    }
}

impl SshConnector {
    /// Whether local stdin is relayed to remote commands (default: yes)
    pub fn with_stdin(mut self, forward: bool) -> Self {
        self.forward_stdin = forward;
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        ctx: &RunContext,
    ) -> Result<Box<dyn RemoteHost>, ConnectError> {
        ctx.check().map_err(ConnectError::Interrupted)?;

        let ctx = ctx.with_optional_timeout(settings.connect_timeout);
        let token = ctx.token().clone();
        let settings = settings.clone();
        let forward_stdin = self.forward_stdin;

        let handle = tokio::task::spawn_blocking(move || {
            SshSession::connect_blocking(&settings, &ctx, forward_stdin)
        });

        // A blocked handshake cannot be interrupted; on cancel the half-open
        // connection is dropped by the blocking task when it returns.
        let session = tokio::select! {
            joined = handle => joined.map_err(|e| ConnectError::Join(e.to_string()))??,
            _ = token.cancelled() => return Err(ConnectError::Interrupted(Interrupted::Cancelled)),
        };

        Ok(Box::new(session))
    }
}

/// Live shell + SFTP connections to one host
pub struct SshSession {
    endpoint: String,
    shell: Arc<Session>,
    transfer: Arc<Session>,
    sftp: Arc<Sftp>,
    forward_stdin: bool,
    closed: AtomicBool,
}

impl SshSession {
    fn connect_blocking(
        settings: &ConnectionSettings,
        ctx: &RunContext,
        forward_stdin: bool,
    ) -> Result<Self, ConnectError> {
        if let HostKeyPolicy::AcceptAny = settings.host_key_policy {
            tracing::warn!(
                "Host key verification disabled for {}; the remote identity is not checked",
                settings.host
            );
        }

        let shell = open_session(settings, ctx)?;
        tracing::debug!("Shell connection to {} established", settings.endpoint());

        let transfer = open_session(settings, ctx)?;
        let sftp = transfer.sftp().map_err(ConnectError::Sftp)?;
        tracing::debug!("SFTP connection to {} established", settings.endpoint());

        Ok(Self {
            endpoint: settings.endpoint(),
            shell: Arc::new(shell),
            transfer: Arc::new(transfer),
            sftp: Arc::new(sftp),
            forward_stdin,
            closed: AtomicBool::new(false),
        })
    }
}

/// Resolve, connect, handshake, verify, authenticate
fn open_session(settings: &ConnectionSettings, ctx: &RunContext) -> Result<Session, ConnectError> {
    ctx.check().map_err(ConnectError::Interrupted)?;
    let endpoint = format!("{}:{}", settings.host, settings.port);

    let addrs: Vec<SocketAddr> = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|source| ConnectError::Resolve {
            endpoint: endpoint.clone(),
            source,
        })?
        .collect();

    let tcp = connect_tcp(&addrs, &endpoint, ctx)?;

    let mut session = Session::new().map_err(ConnectError::Session)?;
    session.set_tcp_stream(tcp);
    if let Some(remaining) = ctx.remaining() {
        session.set_timeout(remaining.as_millis().clamp(1, u32::MAX as u128) as u32);
    }

    session
        .handshake()
        .map_err(|source| ConnectError::Handshake {
            endpoint: endpoint.clone(),
            source,
        })?;

    verify_host_key(&session, settings)?;

    if let Err(e) = std::fs::metadata(&settings.key_path) {
        return Err(ConnectError::Auth {
            user: settings.user.clone(),
            key: settings.key_path.clone(),
            message: format!("cannot read private key: {}", e),
        });
    }

    let passphrase = settings.passphrase.as_ref().map(|p| p.expose_secret());
    session
        .userauth_pubkey_file(&settings.user, None, &settings.key_path, passphrase)
        .map_err(|e| ConnectError::Auth {
            user: settings.user.clone(),
            key: settings.key_path.clone(),
            message: e.to_string(),
        })?;

    if !session.authenticated() {
        return Err(ConnectError::Auth {
            user: settings.user.clone(),
            key: settings.key_path.clone(),
            message: "server did not accept the key".to_string(),
        });
    }

    // Commands and transfers are bounded by their own RunContext from here on
    session.set_timeout(0);
    Ok(session)
}

fn connect_tcp(
    addrs: &[SocketAddr],
    endpoint: &str,
    ctx: &RunContext,
) -> Result<TcpStream, ConnectError> {
    let mut last_error =
        io::Error::new(ErrorKind::NotFound, "host resolved to no addresses");

    for addr in addrs {
        ctx.check().map_err(ConnectError::Interrupted)?;
        let attempt = match ctx.remaining() {
            Some(remaining) if remaining.is_zero() => {
                return Err(ConnectError::Interrupted(Interrupted::DeadlineExceeded))
            }
            Some(remaining) => TcpStream::connect_timeout(addr, remaining),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("connect to {} failed: {}", addr, e);
                last_error = e;
            }
        }
    }

    Err(ConnectError::Tcp {
        endpoint: endpoint.to_string(),
        source: last_error,
    })
}

/// OpenSSH-style rendering of a SHA-256 host key digest
pub(crate) fn fingerprint_of(digest: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

fn verify_host_key(session: &Session, settings: &ConnectionSettings) -> Result<(), ConnectError> {
    let endpoint = format!("{}:{}", settings.host, settings.port);
    let reject = |reason: String| ConnectError::HostKey {
        endpoint: endpoint.clone(),
        reason,
    };

    match &settings.host_key_policy {
        HostKeyPolicy::AcceptAny => Ok(()),
        HostKeyPolicy::Fingerprint(expected) => {
            let digest = session
                .host_key_hash(HashType::Sha256)
                .ok_or_else(|| reject("server presented no host key".to_string()))?;
            let actual = fingerprint_of(digest);
            if &actual == expected {
                Ok(())
            } else {
                Err(reject(format!(
                    "fingerprint {} does not match pinned {}",
                    actual, expected
                )))
            }
        }
        HostKeyPolicy::KnownHosts(path) => {
            let (key, _) = session
                .host_key()
                .ok_or_else(|| reject("server presented no host key".to_string()))?;
            let mut known = session
                .known_hosts()
                .map_err(|e| reject(format!("known_hosts unavailable: {}", e)))?;
            known
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| reject(format!("cannot read {}: {}", path.display(), e)))?;

            match known.check_port(&settings.host, settings.port, key) {
                CheckResult::Match => Ok(()),
                CheckResult::NotFound => Err(reject(format!(
                    "host is not listed in {} (connect once with ssh, or pass --host-key-fingerprint / --accept-any-host-key)",
                    path.display()
                ))),
                CheckResult::Mismatch => Err(reject(format!(
                    "host key does not match the entry in {}",
                    path.display()
                ))),
                CheckResult::Failure => Err(reject("known_hosts lookup failed".to_string())),
            }
        }
    }
}

/// Run one command on its own channel and relay its streams until it exits
fn exec_blocking(
    session: &Session,
    command: &str,
    forward_stdin: bool,
    ctx: &RunContext,
) -> Result<CommandStatus, ExecError> {
    session.set_blocking(true);
    let mut channel = session
        .channel_session()
        .map_err(|e| ExecError::ChannelOpen(e.to_string()))?;

    channel.exec(command).map_err(|e| ExecError::Start {
        command: command.to_string(),
        message: e.to_string(),
    })?;
    tracing::debug!("Remote command started: {}", command);

    session.set_blocking(false);
    let relayed = relay::relay_streams(
        channel.stream(0),
        channel.stderr(),
        channel.stream(0),
        forward_stdin.then(relay::stdin_feed),
        io::stdout(),
        io::stderr(),
        ctx,
    );
    session.set_blocking(true);

    let stats = match relayed {
        Ok(stats) => stats,
        Err(e) => {
            let _ = channel.close();
            return Err(e);
        }
    };
    tracing::trace!(
        "Relayed {} bytes stdout, {} bytes stderr, {} bytes stdin",
        stats.stdout_bytes,
        stats.stderr_bytes,
        stats.stdin_bytes
    );

    let _ = channel.close();
    channel
        .wait_close()
        .map_err(|e| ExecError::Stream(io::Error::from(e)))?;

    // libssh2 reports 0 when no exit-status was sent; a signal means it died
    if let Ok(signal) = channel.exit_signal() {
        if let Some(name) = signal.exit_signal {
            tracing::warn!("Remote command terminated by signal {}", name);
            return Ok(CommandStatus::UNKNOWN);
        }
    }

    let code = channel
        .exit_status()
        .map_err(|e| ExecError::Stream(io::Error::from(e)))?;
    Ok(CommandStatus::new(code))
}

/// Chunked copy that checks the context between chunks
pub(crate) fn copy_chunks<R: Read, W: Write>(
    source: &mut R,
    sink: &mut W,
    ctx: &RunContext,
) -> Result<u64, TransferError> {
    let mut buf = vec![0u8; TRANSFER_CHUNK];
    let mut total = 0u64;
    loop {
        ctx.check().map_err(TransferError::Interrupted)?;
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::Io(e)),
        };
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
    sink.flush()?;
    Ok(total)
}

fn upload_blocking(
    sftp: &Sftp,
    local: &Path,
    remote: &RemotePath,
    mode: i32,
    ctx: &RunContext,
) -> Result<u64, TransferError> {
    let remote_err = |e: ssh2::Error| TransferError::Remote {
        path: remote.to_string(),
        message: e.to_string(),
    };

    let mut source = std::fs::File::open(local)?;
    let mut dest = sftp
        .open_mode(
            &remote.to_path_buf(),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            mode,
            OpenType::File,
        )
        .map_err(remote_err)?;

    let copied = copy_chunks(&mut source, &mut dest, ctx)?;

    // The open mode only applies on creation; force it for pre-existing files
    if let Err(e) = dest.setstat(ssh2::FileStat {
        size: None,
        uid: None,
        gid: None,
        perm: Some(mode as u32),
        atime: None,
        mtime: None,
    }) {
        tracing::debug!("Could not set mode on {}: {}", remote, e);
    }

    Ok(copied)
}

fn download_blocking(
    sftp: &Sftp,
    remote: &RemotePath,
    local: &Path,
    ctx: &RunContext,
) -> Result<u64, TransferError> {
    // Open the remote side first so a missing artifact leaves no empty local file
    let mut source = sftp
        .open(&remote.to_path_buf())
        .map_err(|e| TransferError::Remote {
            path: remote.to_string(),
            message: e.to_string(),
        })?;
    let mut dest = std::fs::File::create(local)?;
    copy_chunks(&mut source, &mut dest, ctx)
}

#[async_trait]
impl RemoteHost for SshSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exec(&self, command: &str, ctx: &RunContext) -> Result<CommandStatus, ExecError> {
        ctx.check().map_err(ExecError::Interrupted)?;
        let session = self.shell.clone();
        let command = command.to_string();
        let forward_stdin = self.forward_stdin;
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || exec_blocking(&session, &command, forward_stdin, &ctx))
            .await
            .map_err(|e| ExecError::Join(e.to_string()))?
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &RemotePath,
        mode: i32,
        ctx: &RunContext,
    ) -> Result<u64, TransferError> {
        ctx.check().map_err(TransferError::Interrupted)?;
        let sftp = self.sftp.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || upload_blocking(&sftp, &local, &remote, mode, &ctx))
            .await
            .map_err(|e| TransferError::Join(e.to_string()))?
    }

    async fn download(
        &self,
        remote: &RemotePath,
        local: &Path,
        ctx: &RunContext,
    ) -> Result<u64, TransferError> {
        ctx.check().map_err(TransferError::Interrupted)?;
        let sftp = self.sftp.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || download_blocking(&sftp, &remote, &local, &ctx))
            .await
            .map_err(|e| TransferError::Join(e.to_string()))?
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shell.set_blocking(true);
        let _ = self.shell.disconnect(None, "remotebuild finished", None);
        let _ = self.transfer.disconnect(None, "remotebuild finished", None);
        tracing::debug!("Session to {} closed", self.endpoint);
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}
