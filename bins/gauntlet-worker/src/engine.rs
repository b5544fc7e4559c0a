/// Execution Engine - Sandboxed Code Execution
///
/// **Core Responsibility:**
/// Execute source code once against one stdin payload and capture raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker today, anything behind `Sandbox`)
/// - Engine does NOT know scoring rules
/// - Engine does NOT compare outputs
/// - Engine returns raw outputs for the runner to classify
///
/// **Sandbox Lifecycle:**
/// Every execution gets a fresh container that is removed by a guard on
/// every exit path: normal exit, timeout, crash, cancellation or panic.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use gauntlet_common::languages::LanguageConfig;
use std::collections::HashMap;
use std::future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Safety limits to prevent pathological inputs from reaching Docker.
/// Source and stdin travel base64-encoded in environment variables, which
/// the kernel caps at 128 KiB each.
pub const MAX_SOURCE_CODE_BYTES: usize = 64 * 1024;
pub const MAX_TEST_INPUT_BYTES: usize = gauntlet_common::validator::MAX_TEST_INPUT_BYTES;
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Budget for setup and compilation; never charged to the solution's timeout
const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);
/// Exit code reported when setup or compilation outruns its budget
const COMPILE_TIMEOUT_EXIT: i64 = 124;

const WORK_DIR: &str = "/sandbox";
const PIDS_LIMIT: i64 = 64;
const SANDBOX_USER: &str = "65534:65534";

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox layer itself is unusable; nothing was learned about the submission
    #[error("sandbox infrastructure unavailable: {0}")]
    Infrastructure(String),

    #[error("execution cancelled")]
    Cancelled,

    /// The request was refused before any container was created
    #[error("execution rejected: {0}")]
    Rejected(String),
}

/// Receiving side of a cancellation signal
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Sending side of a cancellation signal
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_handle, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                future::pending::<()>().await;
            }
        }
    }

    /// Derive a signal that fires when either this one or the returned handle fires
    pub fn child(&self) -> (CancelHandle, CancelSignal) {
        let (handle, signal) = cancel_pair();
        if self.is_cancelled() {
            handle.cancel();
            return (handle, signal);
        }

        let mut parent = self.clone();
        let tx = handle.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => {
                    tx.send_replace(true);
                }
                _ = tx.closed() => {}
            }
        });
        (handle, signal)
    }
}

/// One execution request: the submission, one stdin payload and hard limits
#[derive(Debug, Clone, Copy)]
pub struct SandboxRequest<'a> {
    pub language: &'a LanguageConfig,
    pub source_code: &'a str,
    pub stdin: &'a str,
    pub timeout_ms: u64,
    pub memory_limit_mb: u64,
}

/// Raw execution output for a single run
/// Produced by a Sandbox, classified by the runner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExecution {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub memory_exceeded: bool,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(
        &self,
        request: SandboxRequest<'_>,
        cancel: CancelSignal,
    ) -> Result<RawExecution, SandboxError>;
}

/// Reject requests the transport cannot carry
pub fn check_request_size(request: &SandboxRequest<'_>) -> Result<(), SandboxError> {
    if request.source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(SandboxError::Rejected(format!(
            "source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )));
    }
    if request.stdin.len() > MAX_TEST_INPUT_BYTES {
        return Err(SandboxError::Rejected(format!(
            "test input exceeds maximum size of {} bytes",
            MAX_TEST_INPUT_BYTES
        )));
    }
    Ok(())
}

fn memory_bytes(memory_limit_mb: u64) -> Result<i64, SandboxError> {
    i64::try_from(memory_limit_mb)
        .ok()
        .and_then(|mb| mb.checked_mul(1024 * 1024))
        .ok_or_else(|| {
            SandboxError::Rejected(format!(
                "memory limit of {} MB is out of range",
                memory_limit_mb
            ))
        })
}

/// Shell script run inside the container: materialise source and stdin in
/// the work dir, compile if the language needs it, announce the run phase
/// on stderr, then run.
fn build_script(language: &LanguageConfig) -> String {
    let mut script = format!(
        "set -e\ncd {work}\nprintf '%s' \"$SOURCE_CODE\" | base64 -d > {file}\nprintf '%s' \"$TEST_INPUT\" | base64 -d > .stdin\n",
        work = WORK_DIR,
        file = language.source_file,
    );
    if let Some(compile) = &language.compile_command {
        // Compiler chatter must not reach stdout
        script.push_str(&format!("{} 1>&2\n", compile));
    }
    script.push_str("printf '%s\\n' \"$RUN_MARKER\" >&2\n");
    script.push_str(&format!("exec {} < .stdin\n", language.run_command));
    script
}

fn push_capped(buffer: &mut String, chunk: &[u8]) {
    if buffer.len() >= MAX_OUTPUT_BYTES {
        return;
    }
    let text = String::from_utf8_lossy(chunk);
    let room = MAX_OUTPUT_BYTES - buffer.len();
    if text.len() <= room {
        buffer.push_str(&text);
    } else {
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        buffer.push_str(&text[..cut]);
    }
}

/// Splits the container log stream at the run marker. Everything before it
/// is setup output (compiler diagnostics); only what follows belongs to the run.
struct PhasedLogs {
    needle: String,
    window: String,
    setup: String,
    stdout: String,
    stderr: String,
    running: bool,
}

impl PhasedLogs {
    fn new(marker: &str) -> Self {
        Self {
            needle: format!("{}\n", marker),
            window: String::new(),
            setup: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            running: false,
        }
    }

    /// Returns true when this chunk switched the stream into the run phase
    fn push(&mut self, output: LogOutput) -> bool {
        match output {
            LogOutput::StdOut { message } if self.running => {
                push_capped(&mut self.stdout, &message);
                false
            }
            LogOutput::StdErr { message } if self.running => {
                push_capped(&mut self.stderr, &message);
                false
            }
            LogOutput::StdOut { message } => {
                push_capped(&mut self.setup, &message);
                false
            }
            LogOutput::StdErr { message } => self.scan_for_marker(&message),
            _ => false,
        }
    }

    fn scan_for_marker(&mut self, message: &[u8]) -> bool {
        push_capped(&mut self.setup, message);
        self.window.push_str(&String::from_utf8_lossy(message));

        if let Some(pos) = self.window.find(&self.needle) {
            let after = self.window.split_off(pos + self.needle.len());
            self.window.clear();
            self.running = true;
            push_capped(&mut self.stderr, after.as_bytes());
            return true;
        }

        // Keep just enough to catch a marker split across chunks
        let keep = self.needle.len();
        if self.window.len() > keep {
            let mut cut = self.window.len() - keep;
            while !self.window.is_char_boundary(cut) {
                cut += 1;
            }
            self.window.drain(..cut);
        }
        false
    }
}

enum Setup {
    Ready,
    Exited,
    TimedOut,
}

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Cannot be async in Drop; force removal also kills a running container
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %self.container_id, "No runtime available to remove container");
            return;
        };
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        runtime.spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker
                .remove_container(&container_id, Some(remove_options))
                .await
            {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

enum Outcome {
    Exited(i64),
    TimedOut,
    Cancelled,
}

/// Docker-based sandbox
///
/// **Docker Execution Rules:**
/// 1. Pulls the language image if not present
/// 2. Creates a single-use container with:
///    - Network disabled
///    - All capabilities dropped, no-new-privileges, unprivileged user
///    - Read-only root file system plus a size-bounded tmpfs work dir
///    - Memory limit with swap disabled, CPU and pid limits
/// 3. Injects source code and stdin through the environment
/// 4. Gives setup and compilation their own budget, then enforces the
///    wall-clock limit on the run phase alone and kills the container on breach
/// 5. Streams stdout/stderr and reads the OOM flag
/// 6. Removes the container through `ContainerGuard`
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon and verify it answers
    pub async fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::Infrastructure(format!("failed to connect to Docker daemon: {}", e))
        })?;
        docker.ping().await.map_err(|e| {
            SandboxError::Infrastructure(format!("Docker daemon did not answer ping: {}", e))
        })?;
        Ok(Self { docker })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = image, "Image cache hit");
            return Ok(());
        }

        warn!(image = image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                SandboxError::Infrastructure(format!("failed to pull image '{}': {}", image, e))
            })?;
        }

        info!(image = image, "Image pulled");
        Ok(())
    }

    fn container_config(
        &self,
        request: &SandboxRequest<'_>,
        marker: &str,
    ) -> Result<Config<String>, SandboxError> {
        let memory_bytes = memory_bytes(request.memory_limit_mb)?;
        let nano_cpus = (request.language.cpu_limit as f64 * 1_000_000_000.0) as i64;

        let env = vec![
            format!(
                "SOURCE_CODE={}",
                general_purpose::STANDARD.encode(request.source_code)
            ),
            format!("TEST_INPUT={}", general_purpose::STANDARD.encode(request.stdin)),
            format!("RUN_MARKER={}", marker),
            format!("HOME={}", WORK_DIR),
        ];

        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            WORK_DIR.to_string(),
            "rw,exec,nosuid,nodev,size=64m,mode=1777".to_string(),
        );
        tmpfs.insert("/tmp".to_string(), "rw,nosuid,nodev,size=16m".to_string());

        Ok(Config {
            image: Some(request.language.image.clone()),
            entrypoint: Some(vec![]),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                build_script(request.language),
            ]),
            env: Some(env),
            user: Some(SANDBOX_USER.to_string()),
            working_dir: Some(WORK_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(memory_bytes),
                memory_swap: Some(memory_bytes),
                nano_cpus: Some(nano_cpus),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                readonly_rootfs: Some(true),
                tmpfs: Some(tmpfs),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn wait_for_exit(&self, container_id: &str) -> Result<i64, SandboxError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::Infrastructure(format!(
                "failed waiting for container: {}",
                e
            ))),
            None => Err(SandboxError::Infrastructure(
                "container wait stream ended without a status".to_string(),
            )),
        }
    }

    async fn was_oom_killed(&self, container_id: &str) -> bool {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                warn!(container_id = container_id, error = %e, "Failed to inspect container");
                false
            }
        }
    }

    async fn kill(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = container_id, error = %e, "Failed to kill container");
        }
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(language = %request.language.name, timeout_ms = request.timeout_ms)
    )]
    async fn execute(
        &self,
        request: SandboxRequest<'_>,
        mut cancel: CancelSignal,
    ) -> Result<RawExecution, SandboxError> {
        check_request_size(&request)?;
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        self.ensure_image(&request.language.image).await?;

        let marker = format!("gauntlet-run-{}", uuid::Uuid::new_v4().simple());
        let config = self.container_config(&request, &marker)?;
        let container_name = format!("gauntlet-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| {
                SandboxError::Infrastructure(format!("failed to create container: {}", e))
            })?;

        let container_id = container.id;

        // Set up the cleanup guard immediately after creation
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                SandboxError::Infrastructure(format!("failed to start container: {}", e))
            })?;

        let log_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });
        let mut logs = self.docker.logs(&container_id, log_options);
        let mut phased = PhasedLogs::new(&marker);

        // Setup and compilation run on their own clock
        let setup_started = Instant::now();
        let setup_deadline = tokio::time::sleep(COMPILE_TIMEOUT);
        tokio::pin!(setup_deadline);
        let setup = loop {
            tokio::select! {
                chunk = logs.next() => match chunk {
                    Some(Ok(output)) => {
                        if phased.push(output) {
                            break Setup::Ready;
                        }
                    }
                    Some(Err(e)) => {
                        return Err(SandboxError::Infrastructure(format!(
                            "failed reading container logs: {}",
                            e
                        )));
                    }
                    None => break Setup::Exited,
                },
                _ = &mut setup_deadline => break Setup::TimedOut,
                _ = cancel.cancelled() => {
                    self.kill(&container_id).await;
                    return Err(SandboxError::Cancelled);
                }
            }
        };
        let setup_time_ms = setup_started.elapsed().as_millis() as u64;

        match setup {
            Setup::Ready => {}
            Setup::Exited => {
                // Compilation failed; the run never started
                let code = self.wait_for_exit(&container_id).await?;
                debug!(container_id = %container_id, exit_code = code, setup_time_ms, "Setup failed");
                return Ok(RawExecution {
                    stderr: phased.setup,
                    exit_code: Some(code),
                    memory_exceeded: self.was_oom_killed(&container_id).await,
                    ..Default::default()
                });
            }
            Setup::TimedOut => {
                warn!(container_id = %container_id, setup_time_ms, "Compilation exceeded its budget");
                self.kill(&container_id).await;
                return Ok(RawExecution {
                    stderr: format!(
                        "compilation exceeded {} seconds\n{}",
                        COMPILE_TIMEOUT.as_secs(),
                        phased.setup
                    ),
                    exit_code: Some(COMPILE_TIMEOUT_EXIT),
                    ..Default::default()
                });
            }
        }

        let run_started = Instant::now();
        let timeout = Duration::from_millis(request.timeout_ms);
        let run = async {
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(output) => {
                        phased.push(output);
                    }
                    Err(e) => {
                        warn!(container_id = %container_id, error = %e, "Error reading container logs");
                        break;
                    }
                }
            }
            self.wait_for_exit(&container_id).await
        };
        let outcome = tokio::select! {
            exit = run => Outcome::Exited(exit?),
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };
        let execution_time_ms = run_started.elapsed().as_millis() as u64;

        let exit_code = match outcome {
            Outcome::Exited(code) => Some(code),
            Outcome::TimedOut => {
                warn!(
                    container_id = %container_id,
                    execution_time_ms = execution_time_ms,
                    "Execution timed out, killing container"
                );
                self.kill(&container_id).await;
                None
            }
            Outcome::Cancelled => {
                self.kill(&container_id).await;
                return Err(SandboxError::Cancelled);
            }
        };

        let timed_out = exit_code.is_none();
        // A bare 137 is any SIGKILL; only the cgroup flag proves the OOM killer
        let memory_exceeded = !timed_out && self.was_oom_killed(&container_id).await;

        debug!(
            container_id = %container_id,
            exit_code = ?exit_code,
            setup_time_ms,
            execution_time_ms = execution_time_ms,
            timed_out = timed_out,
            memory_exceeded = memory_exceeded,
            "Container finished"
        );

        Ok(RawExecution {
            stdout: phased.stdout,
            stderr: phased.stderr,
            exit_code,
            execution_time_ms,
            timed_out,
            memory_exceeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language(compile: Option<&str>) -> LanguageConfig {
        LanguageConfig {
            name: "java".to_string(),
            version: "21".to_string(),
            image: "eclipse-temurin:21-jdk".to_string(),
            source_file: "Main.java".to_string(),
            compile_command: compile.map(str::to_string),
            run_command: "java -cp . Main".to_string(),
            cpu_limit: 1.0,
        }
    }

    #[test]
    fn test_script_without_compile_step() {
        let script = build_script(&language(None));
        assert!(script.starts_with("set -e\ncd /sandbox\n"));
        assert!(script.contains("base64 -d > Main.java"));
        assert!(script.ends_with("exec java -cp . Main < .stdin\n"));
        assert!(!script.contains("1>&2"));
    }

    #[test]
    fn test_script_compiles_to_stderr() {
        let script = build_script(&language(Some("javac Main.java")));
        let compile = script.find("javac Main.java 1>&2").unwrap();
        let run = script.find("exec java").unwrap();
        assert!(compile < run);
    }

    #[test]
    fn test_script_announces_run_after_compile() {
        let script = build_script(&language(Some("javac Main.java")));
        let compile = script.find("javac Main.java").unwrap();
        let marker = script.find("\"$RUN_MARKER\" >&2").unwrap();
        let run = script.find("exec java").unwrap();
        assert!(compile < marker && marker < run);
    }

    #[test]
    fn test_memory_limit_conversion_is_checked() {
        assert_eq!(memory_bytes(128).unwrap(), 128 * 1024 * 1024);
        assert!(matches!(memory_bytes(1 << 53), Err(SandboxError::Rejected(_))));
        assert!(matches!(memory_bytes(u64::MAX), Err(SandboxError::Rejected(_))));
    }

    #[test]
    fn test_container_config_refuses_overflowing_memory() {
        let engine = DockerEngine {
            docker: Docker::connect_with_local_defaults().unwrap(),
        };
        let lang = language(None);
        let request = SandboxRequest {
            language: &lang,
            source_code: "class Main {}",
            stdin: "",
            timeout_ms: 1000,
            memory_limit_mb: 1 << 53,
        };
        assert!(engine.container_config(&request, "marker").is_err());

        let config = engine
            .container_config(
                &SandboxRequest {
                    memory_limit_mb: 64,
                    ..request
                },
                "marker",
            )
            .unwrap();
        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert!(config.env.unwrap().contains(&"RUN_MARKER=marker".to_string()));
    }

    fn stdout(text: &'static str) -> LogOutput {
        LogOutput::StdOut {
            message: text.into(),
        }
    }

    fn stderr(text: &'static str) -> LogOutput {
        LogOutput::StdErr {
            message: text.into(),
        }
    }

    #[test]
    fn test_compiler_output_stays_out_of_the_run() {
        let mut logs = PhasedLogs::new("gauntlet-run-abc");
        assert!(!logs.push(stderr("Main.java:3: warning: unchecked\n")));
        assert!(!logs.push(stdout("noise\n")));
        assert!(logs.push(stderr("gauntlet-run-abc\n")));
        assert!(!logs.push(stdout("5\n")));
        assert!(!logs.push(stderr("boom\n")));

        assert_eq!(logs.stdout, "5\n");
        assert_eq!(logs.stderr, "boom\n");
        assert!(logs.setup.contains("warning: unchecked"));
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut logs = PhasedLogs::new("gauntlet-run-abc");
        assert!(!logs.push(stderr("compiling\ngauntlet-ru")));
        assert!(logs.push(stderr("n-abc\nearly stderr")));
        assert_eq!(logs.stderr, "early stderr");
        assert!(logs.stdout.is_empty());
    }

    #[test]
    fn test_compile_failure_never_enters_run() {
        let mut logs = PhasedLogs::new("gauntlet-run-abc");
        assert!(!logs.push(stderr("error: expected `;`\n")));
        assert!(!logs.running);
        assert!(logs.stderr.is_empty());
        assert!(logs.setup.starts_with("error: expected"));
    }

    #[test]
    fn test_request_size_limits() {
        let lang = language(None);
        let big = "x".repeat(MAX_SOURCE_CODE_BYTES + 1);
        let request = SandboxRequest {
            language: &lang,
            source_code: &big,
            stdin: "",
            timeout_ms: 1000,
            memory_limit_mb: 64,
        };
        assert!(matches!(
            check_request_size(&request),
            Err(SandboxError::Rejected(_))
        ));

        let ok = SandboxRequest {
            source_code: "print(1)",
            ..request
        };
        assert!(check_request_size(&ok).is_ok());
    }

    #[test]
    fn test_output_cap_respects_char_boundaries() {
        let mut buffer = "a".repeat(MAX_OUTPUT_BYTES - 1);
        push_capped(&mut buffer, "é".as_bytes());
        assert_eq!(buffer.len(), MAX_OUTPUT_BYTES - 1);
        push_capped(&mut buffer, b"b");
        assert_eq!(buffer.len(), MAX_OUTPUT_BYTES);
        push_capped(&mut buffer, b"more");
        assert_eq!(buffer.len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn test_cancel_signal_fires() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let (parent_handle, parent) = cancel_pair();
        let (_child_handle, mut child) = parent.child();

        parent_handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child signal should fire after parent");
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_touch_parent() {
        let (_parent_handle, parent) = cancel_pair();
        let (child_handle, child) = parent.child();

        child_handle.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let mut signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
    }
}
