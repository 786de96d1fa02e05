//! Static file server process: detection, spawning and readiness

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::LaunchConfig;
use crate::error::{E2eError, E2eResult};

/// Name of the static server binary shipped alongside the harness
pub const SERVER_BINARY: &str = "notes-e2e-web";

/// Handle to a static server process this harness started
pub struct ServerHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl ServerHandle {
    /// Spawn `binary` on `config.port` and wait until it answers. Dropping
    /// the future while it waits stops the child along with its handle.
    pub async fn spawn(binary: &Path, config: &ServerConfig) -> E2eResult<Self> {
        let port = config.port;
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning static server on port {}", port);

        let mut cmd = Command::new(binary);
        cmd.arg("--port")
            .arg(port.to_string())
            .arg("--root")
            .arg(&config.root)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "Failed to spawn {}: {}",
                binary.display(),
                e
            ))
        })?;

        let mut handle = ServerHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        handle.wait_until_ready(config.startup_timeout).await?;

        info!("Static server is up at {}", base_url);
        Ok(handle)
    }

    /// Poll the root URL until any HTTP response comes back.
    async fn wait_until_ready(&mut self, timeout_duration: Duration) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Some(status) = self.child.try_wait()? {
                return Err(E2eError::ServerStartup(format!(
                    "{} exited during startup with {}",
                    SERVER_BINARY, status
                )));
            }

            match client.get(&self.base_url).send().await {
                Ok(resp) => {
                    debug!("Readiness probe answered {}", resp.status());
                    return Ok(());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for static server to start...");
                    }
                    // Connection refused is expected while the server binds
                    if !e.is_connect() {
                        warn!("Readiness probe error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::ServerNotReady {
            port: self.port,
            attempts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Stop the server: SIGTERM, a short grace period, then kill.
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        info!("Stopping static server (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                for _ in 0..10 {
                    if self.child.try_wait()?.is_some() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// How to start the static server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Explicit binary; otherwise looked up next to the current executable, then on PATH
    pub binary_path: Option<PathBuf>,

    /// Directory to serve
    pub root: PathBuf,

    pub port: u16,

    /// Timeout for the server to answer
    pub startup_timeout: Duration,
}

impl ServerConfig {
    pub fn from_launch(launch: &LaunchConfig) -> Self {
        Self {
            binary_path: launch.server_binary.clone(),
            root: launch.serve_root.clone(),
            port: launch.port,
            startup_timeout: launch.startup_timeout(),
        }
    }
}

/// True if something accepts TCP connections on `127.0.0.1:port`.
pub async fn is_port_listening(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        timeout(Duration::from_millis(500), TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Find the static server binary.
pub fn locate_server_binary(explicit: Option<&Path>) -> E2eResult<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(E2eError::ServerStartup(format!(
                "configured server binary {} does not exist",
                path.display()
            )))
        };
    }

    let file_name = format!("{}{}", SERVER_BINARY, std::env::consts::EXE_SUFFIX);

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        // Test binaries live one level below the cargo target dir
        for candidate in [dir.join(&file_name), dir.join("..").join(&file_name)] {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(E2eError::ServerStartup(format!(
        "{} not found next to the current executable or on PATH",
        SERVER_BINARY
    )))
}

/// Make sure a server answers on `config.port`. An existing listener is
/// adopted and `None` is returned; otherwise the spawned server's handle is.
pub async fn ensure_server_running(config: &ServerConfig) -> E2eResult<Option<ServerHandle>> {
    if is_port_listening(config.port).await {
        info!("Port {} already in use, reusing the running server", config.port);
        return Ok(None);
    }

    let binary = locate_server_binary(config.binary_path.as_deref())?;
    debug!("Using static server binary {}", binary.display());
    Ok(Some(ServerHandle::spawn(&binary, config).await?))
}
