//! Live relay of a remote command's standard streams
//!
//! Three copy tasks run for the lifetime of one command: remote stdout to local
//! stdout, remote stderr to local stderr, and local stdin to remote stdin. They
//! run inside a `std::thread::scope`, so [`relay_streams`] only returns after
//! every one of them has been joined. The input task is told to stop once both
//! output streams have reached EOF.
//!
//! Remote endpoints are expected to be in non-blocking mode: a read or write
//! that would block returns `WouldBlock` and the task sleeps for
//! [`POLL_INTERVAL`] before retrying, checking the [`RunContext`] every turn.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use super::error::ExecError;
use crate::context::RunContext;

/// Back-off between polls of a non-blocking endpoint
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

const CHUNK_SIZE: usize = 32 * 1024;

/// Bytes moved by each relay task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub stdin_bytes: u64,
}

/// Relay all three streams until both outputs reach EOF
///
/// `stdin` is `None` when input forwarding is disabled; the remote side then
/// simply never receives input.
#[allow(clippy::too_many_arguments)]
pub fn relay_streams<RO, RE, WI, LO, LE>(
    remote_stdout: RO,
    remote_stderr: RE,
    remote_stdin: WI,
    stdin: Option<&Receiver<Vec<u8>>>,
    local_stdout: LO,
    local_stderr: LE,
    ctx: &RunContext,
) -> Result<RelayStats, ExecError>
where
    RO: Read + Send,
    RE: Read + Send,
    WI: Write + Send,
    LO: Write + Send,
    LE: Write + Send,
{
    let outputs_done = AtomicBool::new(false);

    thread::scope(|scope| {
        let input = scope.spawn(|| match stdin {
            Some(rx) => copy_input(rx, remote_stdin, &outputs_done, ctx),
            None => Ok(0),
        });
        let stderr = scope.spawn(|| copy_output(remote_stderr, local_stderr, ctx));
        let stdout = scope.spawn(|| copy_output(remote_stdout, local_stdout, ctx));

        let stdout_result = join(stdout);
        let stderr_result = join(stderr);
        outputs_done.store(true, Ordering::SeqCst);
        let stdin_result = join(input);

        Ok(RelayStats {
            stdout_bytes: stdout_result?,
            stderr_bytes: stderr_result?,
            stdin_bytes: stdin_result?,
        })
    })
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, Result<T, ExecError>>) -> Result<T, ExecError> {
    handle
        .join()
        .map_err(|_| ExecError::Join("relay task panicked".to_string()))?
}

/// Copy a remote output stream to a local writer, flushing after every chunk
pub fn copy_output<R: Read, W: Write>(
    mut source: R,
    mut sink: W,
    ctx: &RunContext,
) -> Result<u64, ExecError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        ctx.check().map_err(ExecError::Interrupted)?;
        match source.read(&mut buf) {
            Ok(0) => {
                sink.flush()?;
                return Ok(total);
            }
            Ok(n) => {
                sink.write_all(&buf[..n])?;
                sink.flush()?;
                total += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(ExecError::Stream(e)),
        }
    }
}

/// Forward chunks from the local stdin channel to the remote input until the
/// outputs are done or local stdin hits EOF
pub fn copy_input<W: Write>(
    chunks: &Receiver<Vec<u8>>,
    mut sink: W,
    outputs_done: &AtomicBool,
    ctx: &RunContext,
) -> Result<u64, ExecError> {
    let mut total = 0u64;

    while !outputs_done.load(Ordering::SeqCst) {
        ctx.check().map_err(ExecError::Interrupted)?;
        match chunks.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                write_all_polling(&mut sink, &chunk, outputs_done, ctx)?;
                total += chunk.len() as u64;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(total)
}

/// `write_all` for a non-blocking sink
fn write_all_polling<W: Write>(
    sink: &mut W,
    mut data: &[u8],
    outputs_done: &AtomicBool,
    ctx: &RunContext,
) -> Result<(), ExecError> {
    while !data.is_empty() {
        ctx.check().map_err(ExecError::Interrupted)?;
        match sink.write(data) {
            Ok(0) => {
                return Err(ExecError::Stream(io::Error::new(
                    ErrorKind::WriteZero,
                    "remote stdin closed",
                )))
            }
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                // The remote process may have exited without draining its input
                if outputs_done.load(Ordering::SeqCst) {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(ExecError::Stream(e)),
        }
    }
    loop {
        match sink.flush() {
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if outputs_done.load(Ordering::SeqCst) {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL);
            }
            other => return other.map_err(ExecError::Stream),
        }
    }
}

/// Process-wide reader of local stdin
///
/// Stdin can only be read by one owner, and a blocked read cannot be
/// interrupted, so one detached thread owns it for the life of the process and
/// publishes chunks on a channel. Each command's input task drains the channel
/// while that command runs; nothing per-command is left behind.
pub fn stdin_feed() -> &'static Receiver<Vec<u8>> {
    static FEED: OnceLock<Receiver<Vec<u8>>> = OnceLock::new();

    FEED.get_or_init(|| {
        let (tx, rx) = crossbeam_channel::unbounded();
        let spawned = thread::Builder::new()
            .name("stdin-feed".to_string())
            .spawn(move || {
                let mut stdin = io::stdin().lock();
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    match stdin.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            tracing::debug!("stdin feed stopped: {}", e);
                            break;
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("could not start stdin reader, input will not be forwarded: {}", e);
        }
        rx
    })
}
