//! Service registration with the Windows service control manager.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::process::Command;

pub const SERVICE_NAME: &str = "Integra";

fn run_cmd(prog: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(prog).args(args).status()?;
    if !status.success() {
        return Err(anyhow!("{} {} failed with {}", prog, args.join(" "), status));
    }
    Ok(())
}

/// The command line the service manager runs.
pub fn service_command(exe: &Path) -> String {
    format!("\"{}\" run", exe.display())
}

/// Registers the service (demand start). Returns a description of what was
/// done, or on platforms without a service manager, what to run instead.
pub fn register(exe: &Path) -> Result<String> {
    let bin_path = service_command(exe);
    if cfg!(windows) {
        run_cmd(
            "sc.exe",
            &["create", SERVICE_NAME, "binPath=", &bin_path, "start=", "demand"],
        )?;
        Ok(format!("service {SERVICE_NAME} installed"))
    } else {
        Ok(format!(
            "no service manager integration on this platform; run `{bin_path}` under your init system"
        ))
    }
}

pub fn unregister() -> Result<String> {
    if cfg!(windows) {
        run_cmd("sc.exe", &["delete", SERVICE_NAME])?;
        Ok(format!("service {SERVICE_NAME} removed"))
    } else {
        Ok("no service manager integration on this platform; nothing to remove".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_command_quotes_the_executable() {
        let cmd = service_command(Path::new("C:/Program Files/Integra/integra.exe"));
        assert_eq!(cmd, "\"C:/Program Files/Integra/integra.exe\" run");
    }
}
