//! Best-effort auto-relaunch registration for the next host session.
//!
//! A [`StartupHook`] installs one entry that the host starts at the next
//! logon. Registration is a convenience only: the resume marker plus an
//! explicit `resume` is always enough to continue a halted session.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{GlobalConfig, RelaunchMode};
use crate::{AppError, Result};

const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

/// Program and arguments started by the relaunch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchCommand {
    /// Executable to start.
    pub program: PathBuf,
    /// Arguments passed to it.
    pub args: Vec<String>,
}

impl RelaunchCommand {
    /// Build the command for this configuration.
    ///
    /// `notify` mode starts the launcher helper next to the current
    /// executable; `resume` mode restarts the current executable with the
    /// `resume` subcommand.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the current executable cannot be
    /// located.
    pub fn for_config(config: &GlobalConfig, config_path: &Path) -> Result<Self> {
        let current = std::env::current_exe()
            .map_err(|err| AppError::Startup(format!("cannot locate executable: {err}")))?;
        let config_arg = config_path.display().to_string();

        let command = match config.relaunch.mode {
            RelaunchMode::Notify => {
                let name = if cfg!(windows) {
                    "install-queue-launcher.exe"
                } else {
                    "install-queue-launcher"
                };
                Self {
                    program: current.with_file_name(name),
                    args: vec!["--config".into(), config_arg],
                }
            }
            RelaunchMode::Resume => Self {
                program: current,
                args: vec!["--config".into(), config_arg, "resume".into()],
            },
        };
        Ok(command)
    }

    /// Render as a single command line, quoting parts that contain spaces.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Installs and removes the auto-relaunch entry.
pub trait StartupHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Arrange for `command` to start at the next host session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the entry cannot be written.
    fn register<'a>(
        &'a self,
        command: &'a RelaunchCommand,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Remove the entry. Removing an absent entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the entry exists but cannot be removed.
    fn unregister(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Windows per-user `Run` registry value, written through `reg.exe`.
#[derive(Debug, Clone)]
pub struct RunKeyHook {
    value_name: String,
}

impl RunKeyHook {
    /// Hook writing the value `value_name`.
    #[must_use]
    pub fn new(value_name: impl Into<String>) -> Self {
        Self {
            value_name: value_name.into(),
        }
    }

    async fn reg(args: &[&str]) -> Result<std::process::Output> {
        Command::new("reg.exe")
            .args(args)
            .output()
            .await
            .map_err(|err| AppError::Startup(format!("failed to run reg.exe: {err}")))
    }
}

impl StartupHook for RunKeyHook {
    fn name(&self) -> &'static str {
        "run_key"
    }

    fn register<'a>(
        &'a self,
        command: &'a RelaunchCommand,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let line = command.command_line();
            let output = Self::reg(&[
                "add",
                RUN_KEY,
                "/v",
                self.value_name.as_str(),
                "/t",
                "REG_SZ",
                "/d",
                line.as_str(),
                "/f",
            ])
            .await?;
            if !output.status.success() {
                return Err(AppError::Startup(format!(
                    "reg.exe add failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            info!(value = self.value_name, "run key registered");
            Ok(())
        })
    }

    fn unregister(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let query = Self::reg(&["query", RUN_KEY, "/v", self.value_name.as_str()]).await?;
            if !query.status.success() {
                debug!(value = self.value_name, "run key absent");
                return Ok(());
            }
            let output = Self::reg(&["delete", RUN_KEY, "/v", self.value_name.as_str(), "/f"]).await?;
            if !output.status.success() {
                return Err(AppError::Startup(format!(
                    "reg.exe delete failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            info!(value = self.value_name, "run key removed");
            Ok(())
        })
    }
}

/// XDG autostart desktop entry.
#[derive(Debug, Clone)]
pub struct AutostartHook {
    entry_path: PathBuf,
    app_name: String,
}

impl AutostartHook {
    /// Hook writing `<dir>/<app_name>.desktop`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            entry_path: dir.into().join(format!("{app_name}.desktop")),
            app_name,
        }
    }

    /// Hook in the user's autostart directory.
    ///
    /// Uses `$XDG_CONFIG_HOME/autostart`, falling back to
    /// `$HOME/.config/autostart`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if neither variable is set.
    pub fn from_env(app_name: impl Into<String>) -> Result<Self> {
        let config_home = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME")
                    .filter(|v| !v.is_empty())
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .ok_or_else(|| AppError::Startup("neither XDG_CONFIG_HOME nor HOME is set".into()))?;
        Ok(Self::new(config_home.join("autostart"), app_name))
    }

    /// Path of the desktop entry this hook manages.
    #[must_use]
    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    fn render(&self, command: &RelaunchCommand) -> String {
        format!(
            "[Desktop Entry]\nType=Application\nName={}\nExec={}\nX-GNOME-Autostart-enabled=true\nNoDisplay=true\n",
            self.app_name,
            command.command_line()
        )
    }
}

impl StartupHook for AutostartHook {
    fn name(&self) -> &'static str {
        "xdg_autostart"
    }

    fn register<'a>(
        &'a self,
        command: &'a RelaunchCommand,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let startup_err =
                |err: std::io::Error| AppError::Startup(format!("autostart entry: {err}"));
            if let Some(dir) = self.entry_path.parent() {
                tokio::fs::create_dir_all(dir).await.map_err(startup_err)?;
            }
            let tmp = self.entry_path.with_extension("desktop.tmp");
            tokio::fs::write(&tmp, self.render(command))
                .await
                .map_err(startup_err)?;
            tokio::fs::rename(&tmp, &self.entry_path)
                .await
                .map_err(startup_err)?;
            info!(path = %self.entry_path.display(), "autostart entry registered");
            Ok(())
        })
    }

    fn unregister(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.entry_path).await {
                Ok(()) => {
                    info!(path = %self.entry_path.display(), "autostart entry removed");
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(AppError::Startup(format!("autostart entry: {err}"))),
            }
        })
    }
}

/// Registers nothing; used when relaunch is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledHook;

impl StartupHook for DisabledHook {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn register<'a>(
        &'a self,
        _command: &'a RelaunchCommand,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }

    fn unregister(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Pick the hook for this host according to configuration.
///
/// Falls back to [`DisabledHook`] when relaunch is disabled or no autostart
/// directory can be determined.
#[must_use]
pub fn platform_hook(config: &GlobalConfig) -> Arc<dyn StartupHook> {
    if !config.relaunch.enabled {
        return Arc::new(DisabledHook);
    }
    if cfg!(windows) {
        return Arc::new(RunKeyHook::new(config.relaunch.app_name.clone()));
    }
    match AutostartHook::from_env(config.relaunch.app_name.clone()) {
        Ok(hook) => Arc::new(hook),
        Err(err) => {
            tracing::warn!(%err, "auto-relaunch unavailable");
            Arc::new(DisabledHook)
        }
    }
}
