//! Run a command in a fresh sandbox and stream its output.
//!
//! Usage: SANDBOX_API_KEY=... cargo run -p exec-demo -- "echo hello"

use anyhow::Context;
use sandbox_client::{Sandbox, SandboxConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let api_key =
        std::env::var("SANDBOX_API_KEY").context("SANDBOX_API_KEY must be set")?;
    let cmd = std::env::args()
        .nth(1)
        .context("usage: exec-demo <command>")?;

    let sandbox = Sandbox::create(SandboxConfig::new(api_key).cwd("/home/user")).await?;
    println!("sandbox {} ready", sandbox.id());

    let process = sandbox.start_process(&cmd).await?;
    let mut stdout = process.subscribe_stdout().await?;
    let mut stderr = process.subscribe_stderr().await?;
    let mut exit = process.subscribe_exit().await?;

    loop {
        tokio::select! {
            event = stdout.recv() => match event {
                Some(Ok(event)) => println!("{}", event.line),
                Some(Err(e)) => eprintln!("stdout stream error: {e}"),
                None => break,
            },
            event = stderr.recv() => match event {
                Some(Ok(event)) => eprintln!("{}", event.line),
                Some(Err(e)) => eprintln!("stderr stream error: {e}"),
                None => break,
            },
            event = exit.recv() => {
                if event.is_some() {
                    println!("process exited");
                }
                break;
            }
        }
    }

    stdout.close().await;
    stderr.close().await;
    exit.close().await;
    sandbox.stop().await?;
    Ok(())
}
