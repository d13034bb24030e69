use std::process::{Child, Command, Stdio};
use std::thread;
use tracing::{info, warn};

/// Fire-and-forget OS banner, used when no overlay can be shown.
pub fn post_banner(title: &str, message: &str) -> bool {
    let Some(mut command) = banner_command(title, message) else {
        info!(stage = "banner", title, "no banner facility on this platform: {message}");
        return false;
    };

    match command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => {
            info!(stage = "banner", title, "fell back to banner notification: {message}");
            reap(child);
            true
        }
        Err(err) => {
            warn!(stage = "banner", "failed to post banner notification: {err}");
            false
        }
    }
}

/// Waits for the helper on a detached thread so it does not linger as a zombie.
fn reap(mut child: Child) {
    let spawned = thread::Builder::new()
        .name("screencal-banner".to_string())
        .spawn(move || {
            if let Err(err) = child.wait() {
                warn!(stage = "banner", "failed to wait for banner helper: {err}");
            }
        });
    if let Err(err) = spawned {
        warn!(stage = "banner", "failed to spawn banner reaper thread: {err}");
    }
}

#[cfg(target_os = "macos")]
fn banner_command(title: &str, message: &str) -> Option<Command> {
    let script = format!(
        "display notification {} with title {}",
        applescript_string(message),
        applescript_string(title)
    );
    let mut command = Command::new("osascript");
    command.arg("-e").arg(script);
    Some(command)
}

#[cfg(target_os = "linux")]
fn banner_command(title: &str, message: &str) -> Option<Command> {
    let mut command = Command::new("notify-send");
    command.arg(title).arg(message);
    Some(command)
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn banner_command(_title: &str, _message: &str) -> Option<Command> {
    None
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\n', '\r'], " ");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::{applescript_string, reap};
    use std::process::{Command, Stdio};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn quotes_and_escapes_applescript_strings() {
        assert_eq!(applescript_string("plain"), "\"plain\"");
        assert_eq!(
            applescript_string("say \"hi\"\\now\nplease"),
            "\"say \\\"hi\\\"\\\\now please\""
        );
    }

    #[cfg(unix)]
    #[test]
    fn reaped_helper_leaves_no_zombie() {
        let child = Command::new("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn true");
        let pid = child.id();
        reap(child);

        let status = format!("/proc/{pid}/status");
        if !std::path::Path::new("/proc/self/status").exists() {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let zombie = std::fs::read_to_string(&status)
                .map(|text| text.lines().any(|line| line.starts_with("State:") && line.contains('Z')))
                .unwrap_or(false);
            if !zombie && !std::path::Path::new(&status).exists() {
                break;
            }
            assert!(Instant::now() < deadline, "banner helper {pid} was never reaped");
            thread::sleep(Duration::from_millis(20));
        }
    }
}
