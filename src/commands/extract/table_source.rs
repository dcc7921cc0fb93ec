//! Where detected tables come from.
//!
//! Table detection and OCR happen outside this crate. A source either reads
//! a JSON sidecar written next to each image or runs an external command that
//! prints the table JSON on stdout.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use crate::table::GridTable;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub trait TableSource: Send + Sync {
    fn describe(&self) -> String;

    fn load(&self, image: &Path) -> Result<GridTable>;
}

#[derive(Debug, Default)]
pub struct SidecarTableSource;

impl SidecarTableSource {
    pub fn sidecar_path(image: &Path) -> PathBuf {
        image.with_extension("json")
    }
}

impl TableSource for SidecarTableSource {
    fn describe(&self) -> String {
        "sidecar".to_string()
    }

    fn load(&self, image: &Path) -> Result<GridTable> {
        let path = Self::sidecar_path(image);
        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        GridTable::from_json(&raw).with_context(|| format!("invalid table in {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct CommandTableSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTableSource {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Result<Self> {
        if !command_available(&program) {
            bail!("table command is not runnable: {program}");
        }
        Ok(Self {
            program,
            args,
            timeout,
        })
    }
}

impl TableSource for CommandTableSource {
    fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        format!("command: {}", parts.join(" "))
    }

    fn load(&self, image: &Path) -> Result<GridTable> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {} for {}", self.program, image.display()))?;

        let output = wait_with_timeout(child, self.timeout)
            .with_context(|| format!("{} failed for {}", self.program, image.display()))?;

        if !output.success {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} returned non-zero exit status for {}: {}",
                self.program,
                image.display(),
                stderr.trim()
            );
        }

        GridTable::from_json(&output.stdout)
            .with_context(|| format!("invalid table output for {}", image.display()))
    }
}

fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

struct CapturedOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<CapturedOutput> {
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("timed out after {} ms", timeout.as_millis());
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CapturedOutput {
        success: status.success(),
        stdout: join_reader(stdout)?,
        stderr: join_reader(stderr)?,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Option<R>,
) -> Option<thread::JoinHandle<std::io::Result<Vec<u8>>>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => match handle.join() {
            Ok(result) => result.context("failed to read child output"),
            Err(_) => bail!("child output reader panicked"),
        },
        None => Ok(Vec::new()),
    }
}
