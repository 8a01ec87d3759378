//! Component D: boots the user's server as a child process and guarantees its teardown.
//!
//! Grounded on [`crate::hooks`]'s `tokio::process::Command` + `Stdio` + `.spawn()`/`.wait()`
//! idiom, generalized from "fire a hook and wait for it to exit" into "spawn, probe for
//! readiness, hold the handle open, kill on demand."

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::BootError;

/// Where the crawl origin comes from.
#[derive(Debug, Clone)]
pub enum ServerSpec {
    /// An already-listening server; the supervisor does not own or probe it.
    Origin(Url),
    /// A child process to spawn. The allocated port is appended as `--port=<port>` and exported
    /// as `FLEDGE_PORT`.
    Spawn { program: PathBuf, args: Vec<String> },
}

/// Tunables for port allocation, readiness polling, and termination.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_port_attempts: u32,
    pub readiness_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
    pub graceful_timeout: Duration,
    pub hard_kill_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_port_attempts: 3,
            readiness_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(200),
            probe_interval: Duration::from_millis(50),
            graceful_timeout: Duration::from_secs(5),
            hard_kill_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Starting,
    Ready,
    Failed,
    Dead,
}

/// Owns (at most) one child process for the lifetime of a build.
pub struct ServerSupervisor {
    spec: ServerSpec,
    config: SupervisorConfig,
    cancellation: CancellationToken,
    state: State,
    child: Option<Arc<StdMutex<Option<Child>>>>,
    stderr_tail: Arc<StdMutex<String>>,
}

impl ServerSupervisor {
    pub fn new(spec: ServerSpec, config: SupervisorConfig, cancellation: CancellationToken) -> Self {
        Self {
            spec,
            config,
            cancellation,
            state: State::Idle,
            child: None,
            stderr_tail: Arc::new(StdMutex::new(String::new())),
        }
    }

    /// Bring the server to `Ready` and return its origin.
    ///
    /// For [`ServerSpec::Origin`] this is a no-op: per the Coordinator's sequencing, a
    /// pre-existing origin is never supervised or probed, only treated as already ready.
    pub async fn boot(&mut self) -> Result<Url, BootError> {
        let program = match &self.spec {
            ServerSpec::Origin(url) => {
                self.state = State::Ready;
                return Ok(url.clone());
            }
            ServerSpec::Spawn { program, .. } => program.clone(),
        };

        self.state = State::Starting;
        let deadline_total = self.config.readiness_timeout;

        let mut attempt = 1u32;
        loop {
            if self.cancellation.is_cancelled() {
                self.state = State::Failed;
                return Err(BootError::Cancelled);
            }

            let port = self.allocate_port(attempt)?;
            self.spawn_child(port)?;

            let deadline = Instant::now() + deadline_total;
            match self.wait_ready(port, deadline).await {
                Ok(()) => {
                    self.state = State::Ready;
                    let origin = Url::parse(&format!("http://127.0.0.1:{port}/"))
                        .expect("constructed loopback URL is always valid");
                    return Ok(origin);
                }
                Err(BootError::ChildExited { stderr_tail, .. }) if attempt < self.config.max_port_attempts && looks_like_port_conflict(&stderr_tail) => {
                    tracing::warn!(attempt, port, "child reported port conflict, retrying allocation");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                    continue;
                }
                Err(err) => {
                    self.state = State::Failed;
                    return Err(err);
                }
            }
        }
    }

    fn allocate_port(&self, attempt: u32) -> Result<u16, BootError> {
        // Bind to an OS-assigned port on a throwaway listener, read it back, then drop the
        // listener so the child can bind the same port a moment later.
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
            .map_err(|_| BootError::PortAllocation(attempt))?;
        let port = listener
            .local_addr()
            .map_err(|_| BootError::PortAllocation(attempt))?
            .port();
        drop(listener);
        Ok(port)
    }

    fn spawn_child(&mut self, port: u16) -> Result<(), BootError> {
        let ServerSpec::Spawn { program, args } = &self.spec else {
            unreachable!("spawn_child is only called for ServerSpec::Spawn");
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(format!("--port={port}"))
            .env("FLEDGE_PORT", port.to_string())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::piped());

        // Put the child in its own process group so a later kill can signal the whole
        // descendant tree (a shell wrapper, `npm start`, etc.), not just this one PID.
        #[cfg(unix)]
        command.process_group(0);

        tracing::info!(program = %dunce::simplified(program).display(), port, "spawning server child");

        let mut child = command.spawn().map_err(|source| BootError::Spawn {
            program: program.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_capture(stderr, Arc::clone(&self.stderr_tail));
        }

        let handle = Arc::new(StdMutex::new(Some(child)));
        register_for_global_cleanup(&handle);
        self.child = Some(handle);

        Ok(())
    }

    async fn wait_ready(&mut self, port: u16, deadline: Instant) -> Result<(), BootError> {
        let handle = self.child.clone().expect("spawn_child ran first");

        loop {
            if self.cancellation.is_cancelled() {
                self.kill().await.ok();
                return Err(BootError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(BootError::ReadinessTimeout(self.config.readiness_timeout));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let probe_budget = self.config.probe_timeout.min(remaining);

            let probe = tokio::time::timeout(probe_budget, TcpStream::connect(("127.0.0.1", port)));
            let exited = wait_for_exit(&handle);

            tokio::select! {
                biased;
                Ok(Ok(_)) = probe => return Ok(()),
                status = exited => {
                    let status = status.map_err(|source| BootError::Spawn { program: self.program_path(), source })?;
                    let tail = self.stderr_tail.lock().expect("stderr_tail mutex poisoned").clone();
                    return Err(BootError::ChildExited { status: status.code(), stderr_tail: tail });
                }
                _ = tokio::time::sleep(self.config.probe_interval.min(remaining)) => {}
            }
        }
    }

    fn program_path(&self) -> PathBuf {
        match &self.spec {
            ServerSpec::Spawn { program, .. } => program.clone(),
            ServerSpec::Origin(_) => PathBuf::new(),
        }
    }

    /// Terminate the child (if any): register the exit listener, send a graceful signal, escalate
    /// to a hard kill on timeout, then release all resources. A no-op for [`ServerSpec::Origin`].
    pub async fn kill(&mut self) -> Result<(), BootError> {
        let Some(handle) = self.child.take() else {
            self.state = State::Dead;
            return Ok(());
        };

        let exited = wait_for_exit(&handle);
        send_graceful_terminate(&handle);

        let status = tokio::time::timeout(self.config.graceful_timeout, exited).await;
        if status.is_err() {
            send_hard_kill(&handle);
            let _ = tokio::time::timeout(self.config.hard_kill_timeout, wait_for_exit(&handle)).await;
        }

        unregister_from_global_cleanup(&handle);
        self.state = State::Dead;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.child.take() {
            if let Ok(mut guard) = handle.lock() {
                if let Some(child) = guard.as_mut() {
                    kill_process_group(child);
                }
            }
        }
    }
}

fn looks_like_port_conflict(stderr_tail: &str) -> bool {
    let lower = stderr_tail.to_ascii_lowercase();
    lower.contains("eaddrinuse") || (lower.contains("address") && lower.contains("in use"))
}

/// Read the child's stderr into a bounded tail buffer, capped so a misbehaving child can't grow
/// our memory usage unbounded.
fn spawn_stderr_capture(stderr: tokio::process::ChildStderr, tail: Arc<StdMutex<String>>) {
    const MAX_TAIL: usize = 8192;
    tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut stderr = stderr;
        let mut buf = [0u8; 1024];
        loop {
            let Ok(n) = stderr.read(&mut buf).await else {
                break;
            };
            if n == 0 {
                break;
            }
            if let Ok(mut guard) = tail.lock() {
                guard.push_str(&String::from_utf8_lossy(&buf[..n]));
                if guard.len() > MAX_TAIL {
                    let excess = guard.len() - MAX_TAIL;
                    guard.drain(..excess);
                }
            }
        }
    });
}

async fn wait_for_exit(handle: &Arc<StdMutex<Option<Child>>>) -> Result<std::process::ExitStatus, std::io::Error> {
    // The child handle is held behind a sync `Mutex` so the global cleanup hook (which may run
    // from a panic handler) never needs an async context; `.wait()` itself is awaited outside
    // the lock by briefly taking ownership of the future through a polling loop.
    loop {
        let mut done = false;
        {
            if let Ok(mut guard) = handle.lock() {
                if let Some(child) = guard.as_mut() {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Ok(status);
                    }
                } else {
                    done = true;
                }
            }
        }
        if done {
            return Err(std::io::Error::other("child already reaped"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn send_graceful_terminate(handle: &Arc<StdMutex<Option<Child>>>) {
    #[cfg(unix)]
    {
        if let Ok(guard) = handle.lock() {
            if let Some(child) = guard.as_ref() {
                if let Some(pid) = child.id() {
                    // Negative pid signals the whole process group, not just the direct child.
                    unsafe {
                        libc::kill(-(pid as i32), libc::SIGTERM);
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        send_hard_kill(handle);
    }
}

fn send_hard_kill(handle: &Arc<StdMutex<Option<Child>>>) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(child) = guard.as_mut() {
            kill_process_group(child);
        }
    }
}

/// Hard-kill `child`'s entire process group on Unix (it was spawned into its own group in
/// [`ServerSupervisor::spawn_child`]); falls back to killing just the direct child everywhere
/// else, and wherever the pid can't be read back.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            return;
        }
    }
    let _ = child.start_kill();
}

/// Process-wide registry of live children, so that a panic anywhere in the process still kills
/// every spawned server. Rust has no portable `atexit` equivalent without an extra dependency;
/// a panic hook plus `Drop` plus the caller's own Ctrl-C handling (see `main.rs`) covers the
/// documented exit paths without one.
static REGISTRY: OnceLock<StdMutex<Vec<Weak<StdMutex<Option<Child>>>>>> = OnceLock::new();
static HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

fn registry() -> &'static StdMutex<Vec<Weak<StdMutex<Option<Child>>>>> {
    REGISTRY.get_or_init(|| StdMutex::new(Vec::new()))
}

fn register_for_global_cleanup(handle: &Arc<StdMutex<Option<Child>>>) {
    if let Ok(mut reg) = registry().lock() {
        reg.push(Arc::downgrade(handle));
    }
    install_exit_hook();
}

fn unregister_from_global_cleanup(handle: &Arc<StdMutex<Option<Child>>>) {
    if let Ok(mut reg) = registry().lock() {
        reg.retain(|weak| !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(handle)));
    }
}

fn install_exit_hook() {
    HOOK_INSTALLED.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            kill_all_registered();
            previous(info);
        }));
    });
}

/// Hard-kill every still-registered child. Safe to call from a panic hook or a signal handler;
/// idempotent.
pub fn kill_all_registered() {
    let Some(reg) = REGISTRY.get() else {
        return;
    };
    let Ok(reg) = reg.lock() else {
        return;
    };
    for weak in reg.iter() {
        if let Some(handle) = weak.upgrade() {
            if let Ok(mut guard) = handle.lock() {
                if let Some(child) = guard.as_mut() {
                    let _ = child.start_kill();
                }
            }
        }
    }
}
