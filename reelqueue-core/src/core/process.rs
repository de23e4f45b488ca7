use crate::core::paths::{bin_name, managed_bin_dir};

fn enhanced_path() -> Option<String> {
    let bin_dir = managed_bin_dir()?;
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// Child process with the managed bin dir on `PATH`, UTF-8 output forced and
/// the child killed if its handle is dropped.
pub fn command<S: AsRef<std::ffi::OsStr>>(program: S) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = enhanced_path() {
        cmd.env("PATH", path);
    }
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.kill_on_drop(true);
    cmd
}

/// Locates `tool` on `PATH` (it must answer `version_arg`) or in the managed
/// bin dir.
pub async fn find_tool(tool: &str, version_arg: &str) -> Option<std::path::PathBuf> {
    let name = bin_name(tool);

    if let Ok(status) = command(&name)
        .arg(version_arg)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
    {
        if status.success() {
            return Some(std::path::PathBuf::from(name));
        }
    }

    let managed = managed_bin_dir()?.join(&name);
    if managed.exists() {
        return Some(managed);
    }

    None
}
