use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::AsyncReadExt,
    net::TcpListener,
    process::{Child, Command},
    time::timeout,
};

const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn cli_reports_unreachable_broker() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("mqtt_chat");
    let port = closed_port().await?;

    let mut child = spawn_client(&binary, "alice", &["--transport", "tcp", "--port", &port.to_string()])?;
    let (status, stderr) = wait_with_stderr(&mut child).await?;

    assert!(!status.success(), "client should fail without a broker");
    assert!(
        stderr.contains("failed to connect to mqtt://127.0.0.1"),
        "unexpected stderr: {stderr}"
    );
    Ok(())
}

#[tokio::test]
async fn cli_rejects_blank_username_before_connecting() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("mqtt_chat");

    let mut child = spawn_client(&binary, " ", &[])?;
    let (status, stderr) = wait_with_stderr(&mut child).await?;

    assert!(!status.success());
    assert!(stderr.contains("invalid connection parameters"), "unexpected stderr: {stderr}");
    Ok(())
}

fn spawn_client(binary: &Path, username: &str, extra: &[&str]) -> Result<Child> {
    let mut cmd = Command::new(binary);
    cmd.arg("--host")
        .arg("127.0.0.1")
        .arg("--username")
        .arg(username)
        .arg("--topic")
        .arg("room1")
        .arg("--connect-timeout")
        .arg("2")
        .args(extra)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    cmd.spawn().context("failed to spawn client")
}

async fn wait_with_stderr(child: &mut Child) -> Result<(std::process::ExitStatus, String)> {
    let mut stderr = child
        .stderr
        .take()
        .context("client stderr missing after spawn")?;

    let mut output = String::new();
    timeout(EXIT_TIMEOUT, stderr.read_to_string(&mut output))
        .await
        .context("timed out reading client stderr")??;
    let status = timeout(EXIT_TIMEOUT, child.wait())
        .await
        .context("timed out waiting for client to exit")??;
    Ok((status, output))
}

async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
