//! Running the external conversion, search and aggregation tools.

use anyhow::{bail, Context, Result};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for the output pipes to close once the shell is gone.
/// A daemonized grandchild can hold them open indefinitely.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Quote `value` for `sh` unless it is made only of characters that are safe
/// unquoted.
pub fn shell_quote(value: &str) -> Cow<'_, str> {
    let safe = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+:=@%,".contains(&b));
    if safe {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r"'\''")))
    }
}

fn is_placeholder(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
}

/// Substitute `{name}` placeholders in a command line with shell-quoted values.
///
/// Only lower-case names are placeholders, and `${...}` is left for the shell.
/// A placeholder without a value is an error.
pub fn render_command(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let shell_expansion = out.ends_with('$');
        match after.find('}') {
            Some(end) if !shell_expansion && is_placeholder(&after[..end]) => {
                let key = &after[..end];
                let Some((_, value)) = vars.iter().find(|(k, _)| *k == key) else {
                    bail!("unknown placeholder {{{key}}} in command '{template}'");
                };
                out.push_str(&shell_quote(value));
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Exited(i32),
    Signalled(i32),
    /// Killed after running past the configured limit.
    TimedOut,
}

impl Display for ToolStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Exited(code) => write!(f, "exit code {code}"),
            ToolStatus::Signalled(signal) => write!(f, "killed by signal {signal}"),
            ToolStatus::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolRun {
    pub status: ToolStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolRun {
    pub fn success(&self) -> bool {
        self.status == ToolStatus::Exited(0)
    }

    /// Status plus the last line of stderr, for logs and failure reasons.
    pub fn summary(&self) -> String {
        match self.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => format!("{} ({})", self.status, last.trim()),
            None => self.status.to_string(),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            // whatever was read before an error is still worth logging
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Output read by `drain`, or nothing if the pipe is still open after `grace`.
/// The reader thread is left behind in that case.
fn collect(output: Receiver<Vec<u8>>, grace: Duration) -> String {
    String::from_utf8_lossy(&output.recv_timeout(grace).unwrap_or_default()).into_owned()
}

fn kill_group(child: &Child) {
    // the tool runs in its own process group, so this reaches its children too
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<ToolStatus> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(match (status.code(), status.signal()) {
                (Some(code), _) => ToolStatus::Exited(code),
                (None, signal) => ToolStatus::Signalled(signal.unwrap_or_default()),
            });
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_group(child);
            child.wait()?;
            return Ok(ToolStatus::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run `command` with `sh -c` and wait for it, at most `timeout` if given.
///
/// A non-zero exit is reported in the returned status, not as an error; only
/// failing to start or wait for the shell is.
pub fn run_tool(command: &str, timeout: Option<Duration>) -> Result<ToolRun> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .with_context(|| format!("starting `{command}`"))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let status = wait(&mut child, timeout).with_context(|| format!("waiting for `{command}`"))?;
    let stdout = collect(stdout, PIPE_GRACE);
    let stderr = collect(stderr, PIPE_GRACE);
    Ok(ToolRun {
        status,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_command() -> Result<()> {
        assert_eq!(
            render_command(
                "conv.sh {infile} {outdir}",
                &[("infile", "/raw/P1/S1.raw"), ("outdir", "/proc/P1")]
            )?,
            "conv.sh /raw/P1/S1.raw /proc/P1"
        );
        assert_eq!(
            render_command("cat {infile}", &[("infile", "/raw/My Project/it's.raw")])?,
            r"cat '/raw/My Project/it'\''s.raw'"
        );
        assert_eq!(
            render_command("echo ${home} {X} {} {infile", &[])?,
            "echo ${home} {X} {} {infile"
        );
        assert!(render_command("tandem {input}", &[("infile", "x")]).is_err());
        Ok(())
    }

    #[test]
    fn test_exit_status_and_output() -> Result<()> {
        let run = run_tool("echo out; echo first >&2; echo last >&2; exit 3", None)?;
        assert_eq!(run.status, ToolStatus::Exited(3));
        assert!(!run.success());
        assert_eq!(run.stdout, "out\n");
        assert_eq!(run.summary(), "exit code 3 (last)");

        assert!(run_tool("true", None)?.success());
        assert_eq!(
            run_tool("kill -9 $$", None)?.status,
            ToolStatus::Signalled(9)
        );
        Ok(())
    }

    #[test]
    fn test_timeout_kills_the_tool() -> Result<()> {
        let started = Instant::now();
        let run = run_tool("sleep 30; echo never", Some(Duration::from_millis(200)))?;
        assert_eq!(run.status, ToolStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(run.stdout, "");
        Ok(())
    }

    #[test]
    fn test_timeout_with_daemonized_child() -> Result<()> {
        // the detached sleep keeps stdout open after its process group is killed
        let started = Instant::now();
        let run = run_tool(
            "setsid sleep 30 & sleep 30",
            Some(Duration::from_millis(200)),
        )?;
        assert_eq!(run.status, ToolStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn test_exited_tool_leaving_a_daemon_behind() -> Result<()> {
        let started = Instant::now();
        let run = run_tool("setsid sleep 30 & echo done", None)?;
        assert!(run.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        Ok(())
    }
}
