//! Filesystem-backed stand-in for a build host
//!
//! Remote absolute paths map under a temp directory. `mkdir -p` is carried
//! out for real; configure/build commands only return the configured exit
//! code. Uploads into a missing directory fail the way SFTP would.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use remotebuild::config::ConnectionSettings;
use remotebuild::context::RunContext;
use remotebuild::remote::{
    CommandStatus, ConnectError, Connector, ExecError, RemoteHost, RemotePath, TransferError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Exec(String),
    Upload(String),
    Download(String),
}

#[derive(Debug, Default)]
pub struct HostState {
    pub root: PathBuf,
    pub events: Mutex<Vec<Event>>,
    pub closed: AtomicBool,
    pub connects: AtomicUsize,
    pub configure_exit: Mutex<i32>,
    pub build_exit: Mutex<i32>,
    /// Remote paths whose upload fails
    pub reject_uploads: Mutex<Vec<String>>,
}

impl HostState {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            ..Default::default()
        })
    }

    pub fn local(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Exec(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FakeHost {
    state: Arc<HostState>,
}

#[async_trait]
impl RemoteHost for FakeHost {
    fn endpoint(&self) -> &str {
        "builder@fake:22"
    }

    async fn exec(&self, command: &str, ctx: &RunContext) -> Result<CommandStatus, ExecError> {
        ctx.check().map_err(ExecError::Interrupted)?;
        self.state.record(Event::Exec(command.to_string()));

        if let Some(dir) = command.strip_prefix("mkdir -p ") {
            std::fs::create_dir_all(self.state.local(dir))?;
            return Ok(CommandStatus::new(0));
        }
        if command.contains(" --build ") {
            return Ok(CommandStatus::new(*self.state.build_exit.lock().unwrap()));
        }
        if command.contains(" .. -DCMAKE_BUILD_TYPE=") {
            return Ok(CommandStatus::new(*self.state.configure_exit.lock().unwrap()));
        }
        Ok(CommandStatus::new(127))
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &RemotePath,
        _mode: i32,
        ctx: &RunContext,
    ) -> Result<u64, TransferError> {
        ctx.check().map_err(TransferError::Interrupted)?;
        self.state.record(Event::Upload(remote.to_string()));

        if self
            .state
            .reject_uploads
            .lock()
            .unwrap()
            .iter()
            .any(|p| p == remote.as_str())
        {
            return Err(TransferError::Remote {
                path: remote.to_string(),
                message: "permission denied".to_string(),
            });
        }

        let target = self.state.local(remote.as_str());
        if !target.parent().map(Path::is_dir).unwrap_or(false) {
            return Err(TransferError::Remote {
                path: remote.to_string(),
                message: "no such file".to_string(),
            });
        }
        Ok(std::fs::copy(local, target)?)
    }

    async fn download(
        &self,
        remote: &RemotePath,
        local: &Path,
        ctx: &RunContext,
    ) -> Result<u64, TransferError> {
        ctx.check().map_err(TransferError::Interrupted)?;
        self.state.record(Event::Download(remote.to_string()));

        let source = self.state.local(remote.as_str());
        if !source.is_file() {
            return Err(TransferError::Remote {
                path: remote.to_string(),
                message: "no such file".to_string(),
            });
        }
        Ok(std::fs::copy(source, local)?)
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeConnector {
    pub state: Arc<HostState>,
    pub refuse: bool,
}

impl FakeConnector {
    pub fn new(state: Arc<HostState>) -> Self {
        Self {
            state,
            refuse: false,
        }
    }

    pub fn refusing(state: Arc<HostState>) -> Self {
        Self {
            state,
            refuse: true,
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        _ctx: &RunContext,
    ) -> Result<Box<dyn RemoteHost>, ConnectError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(ConnectError::Tcp {
                endpoint: settings.endpoint(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(Box::new(FakeHost {
            state: self.state.clone(),
        }))
    }
}

pub fn fake_host(state: &Arc<HostState>) -> FakeHost {
    FakeHost {
        state: state.clone(),
    }
}
