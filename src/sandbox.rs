// src/sandbox.rs
//! Runs generated code in a throwaway child process.
//!
//! Failures of the generated program (non-zero exit, signal, timeout) come back as an
//! `AttemptResult`. Only problems with the sandbox itself surface as `SandboxFault`.

use log::{debug, warn};
use std::future::Future;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::config::SandboxConfig;
use crate::errors::{AgentError, Result};
use crate::models::{AttemptResult, ExitStatus};

/// Environment variables the interpreter may inherit; everything else is cleared.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "LANG", "LC_ALL"];

/// Extra time given to output readers after the execution limit.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Something that can execute a generated program under a time limit.
pub trait CodeRunner: Send + Sync {
    fn run(
        &self,
        code: &str,
        time_limit: Duration,
    ) -> impl Future<Output = Result<AttemptResult>> + Send;
}

pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn command(&self, script: &std::path::Path, workdir: &std::path::Path, time_limit: Duration) -> Command {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.args)
            .arg(script)
            .current_dir(workdir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in PASSTHROUGH_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("HOME", workdir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1");

        #[cfg(unix)]
        apply_isolation(&mut cmd, &self.config, time_limit);

        cmd
    }
}

impl CodeRunner for Sandbox {
    async fn run(&self, code: &str, time_limit: Duration) -> Result<AttemptResult> {
        let workdir = tempfile::Builder::new()
            .prefix("quiz-sandbox-")
            .tempdir()
            .map_err(|e| AgentError::SandboxFault(format!("create work dir: {}", e)))?;
        let script = workdir.path().join(&self.config.script_name);
        tokio::fs::write(&script, code)
            .await
            .map_err(|e| AgentError::SandboxFault(format!("write script: {}", e)))?;

        let mut child = self
            .command(&script, workdir.path(), time_limit)
            .spawn()
            .map_err(|e| {
                AgentError::SandboxFault(format!("spawn '{}': {}", self.config.interpreter, e))
            })?;
        let pid = child.id();
        debug!("sandbox child {:?} started, limit {:?}", pid, time_limit);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::SandboxFault("stdout was not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::SandboxFault("stderr was not piped".to_string()))?;

        // Readers stop at the limit plus a short drain window even if an escaped process
        // still holds a pipe open.
        let drain_deadline = Instant::now() + time_limit + OUTPUT_DRAIN_GRACE;
        let limit = self.config.output_limit;
        let stdout_task = tokio::spawn(read_limited(stdout, limit, drain_deadline));
        let stderr_task = tokio::spawn(read_limited(stderr, limit, drain_deadline));

        let status = match tokio::time::timeout(time_limit, child.wait()).await {
            Ok(Ok(status)) => match status.code() {
                Some(code) => ExitStatus::Exited(code),
                None => ExitStatus::Signaled,
            },
            Ok(Err(e)) => {
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                return Err(AgentError::SandboxFault(format!("wait for child: {}", e)));
            }
            Err(_) => {
                warn!("sandbox child {:?} exceeded {:?}, killing", pid, time_limit);
                ExitStatus::Timeout
            }
        };

        // Background processes the program started die with the attempt, whatever the exit.
        if let Some(pid) = pid {
            kill_group(pid);
        }
        if status == ExitStatus::Timeout {
            if let Err(e) = child.kill().await {
                debug!("kill after timeout: {}", e);
            }
        }

        let stdout = join_output(stdout_task, "stdout", drain_deadline).await?;
        let stderr = join_output(stderr_task, "stderr", drain_deadline).await?;
        debug!("sandbox child {:?} finished: {}", pid, status);

        Ok(AttemptResult {
            code: code.to_string(),
            stdout,
            stderr,
            status,
        })
    }
}

async fn read_limited<R>(
    mut reader: R,
    limit: usize,
    deadline: Instant,
) -> std::io::Result<(Vec<u8>, usize)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut dropped = 0;
    let mut buf = [0u8; 8192];
    loop {
        let n = match tokio::time::timeout_at(deadline, reader.read(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                debug!("output pipe still open at deadline, stopped reading");
                break;
            }
        };
        if n == 0 {
            break;
        }
        let take = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&buf[..take]);
        dropped += n - take;
    }
    Ok((kept, dropped))
}

async fn join_output(
    mut handle: JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
    label: &str,
    deadline: Instant,
) -> Result<String> {
    let joined = match tokio::time::timeout_at(deadline + OUTPUT_DRAIN_GRACE, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            handle.abort();
            warn!("sandbox {} reader did not finish, output discarded", label);
            return Ok(String::new());
        }
    };
    let (bytes, dropped) = joined
        .map_err(|e| AgentError::SandboxFault(format!("{} reader failed: {}", label, e)))?
        .map_err(|e| AgentError::SandboxFault(format!("read {}: {}", label, e)))?;
    if dropped > 0 {
        warn!("sandbox {} truncated by {} bytes", label, dropped);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // The child leads its own process group, so this also reaches anything it forked.
    // After a normal exit the group may already be empty (ESRCH).
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}): {}", pid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(unix)]
fn apply_isolation(cmd: &mut Command, config: &SandboxConfig, time_limit: Duration) {
    let cpu_secs = time_limit.as_secs() + 1;
    let memory = config.memory_limit_bytes;
    let isolate_network = !config.allow_network;

    unsafe {
        cmd.pre_exec(move || {
            // Own process group, so a timeout can kill everything the program forked.
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            {
                set_limit(libc::RLIMIT_CORE, 0)?;
                set_limit(libc::RLIMIT_CPU, cpu_secs)?;
                if let Some(bytes) = memory {
                    set_limit(libc::RLIMIT_AS, bytes)?;
                }
                if isolate_network
                    && libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) != 0
                {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

#[cfg(target_os = "linux")]
fn set_limit(resource: libc::__rlimit_resource_t, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig {
            interpreter: "sh".to_string(),
            args: Vec::new(),
            script_name: "solution.sh".to_string(),
            allow_network: true,
            memory_limit_bytes: None,
            output_limit: 1024,
        })
    }

    #[tokio::test]
    async fn captures_stdout() {
        let result = shell_sandbox().run("echo 42", Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.status, ExitStatus::Exited(0));
        assert_eq!(result.stdout, "42\n");
        assert_eq!(result.code, "echo 42");
    }

    #[tokio::test]
    async fn preserves_stderr_on_failure() {
        let result = shell_sandbox()
            .run("echo 'name error' >&2\nexit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, ExitStatus::Exited(3));
        assert_eq!(result.stderr, "name error\n");
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let started = std::time::Instant::now();
        let result = shell_sandbox()
            .run("sleep 30\necho late", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(result.status, ExitStatus::Timeout);
        assert!(result.stdout.is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn background_job_does_not_hold_the_caller() {
        let started = std::time::Instant::now();
        let result = shell_sandbox()
            .run("sleep 30 &\necho 42", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(result.status, ExitStatus::Exited(0));
        assert_eq!(result.stdout, "42\n");
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        // Zombies count as gone; only their exit status is left.
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.split_whitespace().next().map(|state| state != "Z" && state != "X")
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn detached_background_job_is_killed_after_exit() {
        let result = shell_sandbox()
            .run("sleep 37 >/dev/null 2>&1 </dev/null &\necho $!", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(result.status, ExitStatus::Exited(0));
        let pid: u32 = result.stdout.trim().parse().unwrap();

        let mut alive = true;
        for _ in 0..40 {
            if !is_running(pid) {
                alive = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background sleep {} outlived the attempt", pid);
    }

    #[tokio::test]
    async fn reader_gives_up_on_a_pipe_that_never_closes() {
        let (_writer, reader) = tokio::io::duplex(64);
        let started = std::time::Instant::now();
        let (bytes, dropped) = read_limited(reader, 1024, Instant::now() + Duration::from_millis(100))
            .await
            .unwrap();
        assert!(bytes.is_empty());
        assert_eq!(dropped, 0);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        unsafe { std::env::set_var("QUIZ_AGENT_SANDBOX_PROBE", "leaked") };
        let result = shell_sandbox()
            .run("echo \"${QUIZ_AGENT_SANDBOX_PROBE:-clean}\"", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "clean");
    }

    #[tokio::test]
    async fn output_is_truncated_to_limit() {
        let result = shell_sandbox()
            .run("i=0\nwhile [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.stdout.len(), 1024);
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_fault() {
        let sandbox = Sandbox::new(SandboxConfig {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..SandboxConfig::default()
        });
        let err = sandbox.run("print(1)", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AgentError::SandboxFault(_)));
    }
}
