use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HookError;
use crate::plan::environment::environment_name;
use crate::runner::context::UnitContext;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default limit for a single hook or suite hook.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// A hook body executed as `<shell> -c <script>` with the declared pages
/// sourced first.
#[derive(Debug, Clone)]
pub struct ShellHook {
    pub shell: String,
    pub command: String,
    pub pages: Vec<PathBuf>,
    pub timeout: Duration,
}

impl ShellHook {
    /// Full script text handed to the shell.
    pub fn script(&self) -> String {
        let mut script = String::new();
        for page in &self.pages {
            script.push_str(&format!(". \"{}\"\n", shell_escape(&page.to_string_lossy())));
        }
        script.push_str(&self.command);
        script
    }

    /// Run the hook for the unit in `ctx`. Exit status 0 passes, 1 is an
    /// assertion failure, anything else a code error. Protocol lines on
    /// stdout are recorded on the context.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] for a failing, killed or unspawnable hook.
    pub fn run(&self, ctx: &mut UnitContext) -> Result<(), HookError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(self.script()).envs(hook_environment(ctx));
        if let Some(dir) = ctx.report_dir() {
            cmd.current_dir(dir);
        }

        let child = spawn_group(&mut cmd)
            .map_err(|e| HookError::code(format!("failed to start {}: {e}", self.shell)))?;
        let output = supervise(child, self.timeout, || ctx.is_cancelled())
            .map_err(|e| HookError::code(format!("failed to wait for hook: {e}")))?;

        for line in output.stdout.lines() {
            apply_protocol_line(ctx, line);
        }
        if !output.stderr.trim().is_empty() {
            ctx.log.debug(&format!("stderr: {}", output.stderr.trim_end()));
        }

        if output.interrupted {
            return Err(HookError::code("hook killed: execution interrupted"));
        }
        if output.timed_out {
            return Err(HookError::code(format!(
                "hook exceeded timeout of {}s",
                self.timeout.as_secs()
            )));
        }
        match output.exit_code {
            0 => Ok(()),
            1 => Err(HookError::Assertion(last_line(&output.stderr).unwrap_or_else(|| {
                "hook exited with status 1".to_owned()
            }))),
            code => Err(HookError::Code {
                message: format!("hook exited with status {code}"),
                description: output.stderr,
            }),
        }
    }
}

/// Raw output from a hook process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub interrupted: bool,
}

/// Run `script` through `<shell> -c` in `dir`, under the same timeout and
/// cancellation handling as unit hooks.
///
/// # Errors
///
/// Returns the I/O error if the shell cannot be started or waited for.
pub fn run_script(
    shell: &str,
    script: &str,
    dir: &Path,
    timeout: Duration,
    cancelled: impl Fn() -> bool,
) -> std::io::Result<ProcessOutput> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(script).current_dir(dir);
    supervise(spawn_group(&mut cmd)?, timeout, cancelled)
}

/// Spawn `cmd` with piped output, leading its own process group on unix
/// so [`terminate`] reaches everything it starts.
fn spawn_group(cmd: &mut Command) -> std::io::Result<Child> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
}

/// Wait for `child`, killing it on timeout or when `cancelled` turns
/// true. Output is drained on separate threads so a chatty child cannot
/// block on a full pipe.
fn supervise(
    mut child: Child,
    timeout: Duration,
    cancelled: impl Fn() -> bool,
) -> std::io::Result<ProcessOutput> {
    let start = Instant::now();
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let mut timed_out = false;
    let mut interrupted = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancelled() {
            interrupted = true;
        } else if start.elapsed() > timeout {
            timed_out = true;
        }
        if interrupted || timed_out {
            terminate(&mut child);
            break child.wait()?;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // A killed hook may leave grandchildren holding the pipes open; its
    // output is dropped rather than waited for.
    let killed = interrupted || timed_out;
    let collect = |handle: thread::JoinHandle<String>| {
        if killed {
            String::new()
        } else {
            handle.join().unwrap_or_default()
        }
    };

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: collect(stdout),
        stderr: collect(stderr),
        duration: start.elapsed(),
        timed_out,
        interrupted,
    })
}

/// Kill the child and, on unix, the process group it leads.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(child.id() as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            warn!(pgid = %pgid, error = %e, "could not kill hook process group");
        }
    }
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), error = %e, "hook already exited");
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn apply_protocol_line(ctx: &mut UnitContext, line: &str) {
    if let Some(msg) = line.strip_prefix("STEP:") {
        ctx.step(msg.trim());
    } else if let Some(file) = line.strip_prefix("SCREENSHOT:") {
        ctx.screenshot(file.trim());
    } else if let Some(msg) = line.strip_prefix("ERROR:") {
        ctx.error(msg.trim(), String::new());
    } else if !line.trim().is_empty() {
        ctx.log.debug(line);
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_owned)
}

/// Environment variables describing the unit to a hook process.
pub fn hook_environment(ctx: &UnitContext) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for (key, value) in &ctx.data {
        if key == "env" {
            if let Value::Object(env) = value {
                for (k, v) in env {
                    vars.push((format!("ENV_{}", env_key(k)), env_value(v)));
                }
            }
            continue;
        }
        vars.push((format!("DATA_{}", env_key(key)), env_value(value)));
    }
    for (key, value) in ctx.secrets.iter() {
        vars.push((format!("SECRET_{}", env_key(key)), env_value(value)));
    }
    vars.push(("TEST_NAME".into(), ctx.test_name.to_string()));
    vars.push(("BROWSER".into(), ctx.browser.name.clone()));
    vars.push(("BROWSER_REMOTE".into(), ctx.browser.remote.to_string()));
    vars.push(("ENVIRONMENT".into(), environment_name(&ctx.data).to_owned()));
    if let Some(dir) = ctx.report_dir() {
        vars.push(("REPORT_DIR".into(), dir.to_string_lossy().into_owned()));
    }
    if let Some(url) = &ctx.settings.remote_url {
        vars.push(("REMOTE_URL".into(), url.clone()));
    }
    vars
}

/// `user-name` → `USER_NAME`.
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Escape a string for safe use in a shell double-quoted context.
///
/// Escapes: backslash, double-quote, backtick, dollar sign.
pub fn shell_escape(s: &str) -> String {
    let mut result = String::new();
    for ch in s.chars() {
        match ch {
            '\\' | '"' | '`' | '$' => {
                result.push('\\');
                result.push(ch);
            }
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use crate::plan::browser::BrowserDefinition;
    use crate::plan::execution_list::ExecutionUnit;
    use crate::project::settings::{Dict, Settings};
    use crate::runner::dispatch::CancelToken;
    use crate::runner::driver::NoDriver;

    fn context(report_dir: Option<PathBuf>) -> UnitContext {
        let Value::Object(data) = json!({
            "user-name": "alice",
            "retries": 3,
            "env": {"name": "staging", "url": "http://staging"}
        }) else {
            unreachable!()
        };
        let mut secrets = Dict::new();
        secrets.insert("token".into(), json!("s3cret"));
        let unit = ExecutionUnit {
            test_name: "auth.login".parse().unwrap(),
            data_set: data,
            secrets: Arc::new(secrets),
            browser: BrowserDefinition {
                name: "firefox".into(),
                full_name: None,
                remote: false,
                capabilities: Dict::new(),
            },
            report_dir,
        };
        UnitContext::new(
            &unit,
            Arc::new(Settings::default()),
            Arc::new(NoDriver),
            CancelToken::new(),
        )
    }

    fn hook(command: &str) -> ShellHook {
        ShellHook {
            shell: "/bin/sh".into(),
            command: command.into(),
            pages: vec![],
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn environment_names_and_values() {
        let ctx = context(None);
        let vars: std::collections::HashMap<_, _> = hook_environment(&ctx).into_iter().collect();
        assert_eq!(vars["DATA_USER_NAME"], "alice");
        assert_eq!(vars["DATA_RETRIES"], "3");
        assert_eq!(vars["ENV_URL"], "http://staging");
        assert_eq!(vars["ENV_NAME"], "staging");
        assert_eq!(vars["SECRET_TOKEN"], "s3cret");
        assert_eq!(vars["BROWSER"], "firefox");
        assert_eq!(vars["BROWSER_REMOTE"], "false");
        assert_eq!(vars["TEST_NAME"], "auth.login");
        assert!(!vars.contains_key("DATA_ENV"));
    }

    #[test]
    fn exit_zero_passes() {
        let mut ctx = context(None);
        assert!(hook("exit 0").run(&mut ctx).is_ok());
    }

    #[test]
    fn exit_one_is_assertion_with_stderr_message() {
        let mut ctx = context(None);
        let err = hook("echo 'title mismatch' >&2; exit 1").run(&mut ctx).unwrap_err();
        assert_eq!(err, HookError::Assertion("title mismatch".into()));
    }

    #[test]
    fn other_exit_codes_are_code_errors() {
        let mut ctx = context(None);
        let err = hook("exit 3").run(&mut ctx).unwrap_err();
        assert!(matches!(err, HookError::Code { .. }));
        assert_eq!(err.to_string(), "hook exited with status 3");
    }

    #[test]
    fn missing_shell_is_code_error() {
        let mut ctx = context(None);
        let mut h = hook("true");
        h.shell = "/definitely/not/a/shell".into();
        assert!(matches!(h.run(&mut ctx), Err(HookError::Code { .. })));
    }

    #[test]
    fn stdout_protocol_is_recorded() {
        let mut ctx = context(None);
        hook("echo 'STEP: open page'; echo 'SCREENSHOT: shot.png'; echo 'ERROR: banner missing'; echo noise")
            .run(&mut ctx)
            .unwrap();
        assert_eq!(ctx.steps().len(), 1);
        assert_eq!(ctx.steps()[0].message, "open page");
        assert_eq!(ctx.steps()[0].screenshot.as_deref(), Some("shot.png"));
        assert_eq!(ctx.errors()[0].message, "banner missing");
    }

    #[test]
    fn data_reaches_the_hook() {
        let mut ctx = context(None);
        hook(r#"test "$DATA_USER_NAME" = alice && test "$ENV_NAME" = staging"#)
            .run(&mut ctx)
            .unwrap();
    }

    #[test]
    fn runs_in_report_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(Some(dir.path().to_path_buf()));
        hook("touch marker").run(&mut ctx).unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn pages_are_sourced_first() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("login.sh");
        std::fs::write(&page, "login_url() { echo \"$ENV_URL/login\"; }\n").unwrap();
        let mut h = hook(r#"test "$(login_url)" = http://staging/login"#);
        h.pages = vec![page];
        let mut ctx = context(None);
        h.run(&mut ctx).unwrap();
    }

    #[test]
    fn timeout_kills_the_hook() {
        let mut ctx = context(None);
        let mut h = hook("sleep 5");
        h.timeout = Duration::from_millis(100);
        let start = Instant::now();
        let err = h.run(&mut ctx).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn timeout_kills_background_children_too() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(Some(dir.path().to_path_buf()));
        let mut h = hook("(sleep 1; touch late) & wait");
        h.timeout = Duration::from_millis(100);
        h.run(&mut ctx).unwrap_err();
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("late").exists());
    }

    #[test]
    fn run_script_reports_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_script(
            "/bin/sh",
            "echo ready; exit 4",
            dir.path(),
            Duration::from_secs(30),
            || false,
        )
        .unwrap();
        assert_eq!(output.exit_code, 4);
        assert_eq!(output.stdout.trim(), "ready");
        assert!(!output.timed_out);
    }

    #[test]
    fn cancellation_kills_the_hook() {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let flag = AtomicBool::new(true);
        let output = supervise(child, Duration::from_secs(30), || flag.load(Ordering::SeqCst)).unwrap();
        assert!(output.interrupted);
        assert!(output.duration < Duration::from_secs(4));
    }

    #[test]
    fn escapes_double_quote_context() {
        assert_eq!(shell_escape(r#"a"b$c`d\e"#), r#"a\"b\$c\`d\\e"#);
    }
}
