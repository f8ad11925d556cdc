/*!
 * Remote command lines for the build toolchain
 */

use crate::config::BuildSettings;
use crate::remote::{shell_quote, RemotePath};

/// Parallelism passed to the native build tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jobs {
    /// Ask the remote host for its processor count at build time
    RemoteProcessorCount,
    Fixed(u32),
}

impl Jobs {
    fn render(&self) -> String {
        match self {
            Jobs::RemoteProcessorCount => "$(nproc)".to_string(),
            Jobs::Fixed(n) => n.to_string(),
        }
    }
}

/// Builds the configure and build command lines
#[derive(Debug, Clone)]
pub struct Toolchain {
    program: String,
    build_type: String,
    extra_args: String,
    jobs: Jobs,
}

impl Toolchain {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            build_type: "Release".to_string(),
            extra_args: String::new(),
            jobs: Jobs::RemoteProcessorCount,
        }
    }

    pub fn from_settings(build: &BuildSettings) -> Self {
        Self {
            program: build.toolchain.clone(),
            build_type: build.build_type.clone(),
            extra_args: build.cmake_args.trim().to_string(),
            jobs: build.jobs.map_or(Jobs::RemoteProcessorCount, Jobs::Fixed),
        }
    }

    pub fn with_build_type(mut self, build_type: impl Into<String>) -> Self {
        self.build_type = build_type.into();
        self
    }

    /// Extra configure arguments, inserted verbatim (shell syntax is the caller's)
    pub fn with_extra_args(mut self, args: impl Into<String>) -> Self {
        self.extra_args = args.into().trim().to_string();
        self
    }

    pub fn with_jobs(mut self, jobs: Jobs) -> Self {
        self.jobs = jobs;
        self
    }

    /// `cd <dir> && <tool> .. -DCMAKE_BUILD_TYPE=<type> <extra>`
    pub fn configure_command(&self, build_dir: &RemotePath) -> String {
        let mut cmd = format!(
            "cd {} && {} .. -DCMAKE_BUILD_TYPE={}",
            build_dir.quoted(),
            self.program,
            shell_quote(&self.build_type)
        );
        if !self.extra_args.is_empty() {
            cmd.push(' ');
            cmd.push_str(&self.extra_args);
        }
        cmd
    }

    /// `cd <dir> && <tool> --build . -- -j<n>`
    pub fn build_command(&self, build_dir: &RemotePath) -> String {
        format!(
            "cd {} && {} --build . -- -j{}",
            build_dir.quoted(),
            self.program,
            self.jobs.render()
        )
    }
}

/// `mkdir -p <dir>`; idempotent on the remote side
pub fn mkdir_command(dir: &RemotePath) -> String {
    format!("mkdir -p {}", dir.quoted())
}

/// The fixed build directory under a remote project root
pub fn build_dir(remote_root: &RemotePath) -> RemotePath {
    remote_root.join("build")
}
