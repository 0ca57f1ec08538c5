//! Test server management: spawns and tears down `switchboxd` instances.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::time::sleep;

/// A running `switchboxd` instance under test.
pub struct TestServer {
    child: Child,
    port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn a new `switchboxd` listening on `127.0.0.1:<port>` with short
    /// idle timeouts suited to fast-running tests.
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        Self::spawn_with_timeouts(port, 2_000, 20)
            .await
    }

    /// Spawn with an explicit silence timeout, for timeout-scenario tests.
    pub async fn spawn_with_timeouts(
        port: u16,
        silence_ms: u64,
        check_timeouts_ms: u64,
    ) -> anyhow::Result<Self> {
        let data_dir = std::env::temp_dir().join(format!("switchboxd-test-{port}"));
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "test-relay"

[server.idle_timeouts]
silence_ms = {silence_ms}
check_timeouts_ms = {check_timeouts_ms}
reopen_backoff_ms = 100

[[endpoints]]
listen = "127.0.0.1:{port}"
label = "test"
"#
        );
        std::fs::write(&config_path, config_content)?;

        let cargo_manifest_dir = env!("CARGO_MANIFEST_DIR");
        let binary_path = PathBuf::from(cargo_manifest_dir).join("target/debug/switchboxd");

        let child = Command::new(&binary_path)
            .arg("--config")
            .arg(config_path.to_str().unwrap())
            .spawn()?;

        let server = Self { child, port, data_dir };
        server.wait_until_ready().await?;
        Ok(server)
    }

    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..30 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("switchboxd did not start listening within 3 seconds")
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
