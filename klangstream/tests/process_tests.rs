#![cfg(unix)]

use futures::StreamExt;
use klangstream::{ExtractionProcess, Governor, StreamError};
use std::time::Duration;
use tokio::process::Command;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[tokio::test]
async fn test_dropping_stream_kills_process_within_a_second() -> anyhow::Result<()> {
    let governor = Governor::new(2);
    let slot = governor.try_acquire().unwrap();
    let process = ExtractionProcess::spawn(
        "abc",
        sh("while :; do printf xxxxxxxx; sleep 0.05; done"),
        slot,
    )?;
    let mut exit = process.exit_watch();

    let mut stream = Box::pin(process.into_stream());
    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    let finished = tokio::time::timeout(Duration::from_secs(1), exit.wait_for(Option::is_some))
        .await?
        .map(|e| (*e).clone())?
        .unwrap();
    assert!(finished.cancelled);
    assert!(!finished.success);
    assert_eq!(governor.active(), 0);
    Ok(())
}

#[tokio::test]
async fn test_natural_completion_releases_slot() -> anyhow::Result<()> {
    let governor = Governor::new(1);
    let process = ExtractionProcess::spawn("abc", sh("printf done"), governor.try_acquire().unwrap())?;
    let mut exit = process.exit_watch();

    let chunks: Vec<_> = process.into_stream().collect().await;
    let bytes: Vec<u8> = chunks
        .into_iter()
        .map(|c| c.unwrap())
        .flat_map(|b| b.to_vec())
        .collect();
    assert_eq!(bytes, b"done");

    let finished = exit.wait_for(Option::is_some).await.map(|e| (*e).clone())?.unwrap();
    assert_eq!(finished.code, Some(0));
    assert!(!finished.cancelled);
    assert_eq!(governor.active(), 0);
    Ok(())
}

#[tokio::test]
async fn test_spawn_failure_releases_slot() {
    let governor = Governor::new(1);
    let result = ExtractionProcess::spawn(
        "abc",
        Command::new("/nonexistent/extractor"),
        governor.try_acquire().unwrap(),
    );

    assert!(matches!(result, Err(StreamError::ProcessSpawn(_))));
    assert_eq!(governor.active(), 0);
}

#[tokio::test]
async fn test_stalled_process_is_killed() -> anyhow::Result<()> {
    let governor = Governor::new(1);
    let process = ExtractionProcess::spawn("abc", sh("sleep 30"), governor.try_acquire().unwrap())?
        .with_stall_timeout(Duration::from_millis(200));
    let mut exit = process.exit_watch();

    let items: Vec<_> = process.into_stream().collect().await;
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].as_ref().unwrap_err().kind(),
        std::io::ErrorKind::TimedOut
    );

    let finished = tokio::time::timeout(Duration::from_secs(1), exit.wait_for(Option::is_some))
        .await?
        .map(|e| (*e).clone())?
        .unwrap();
    assert!(finished.cancelled);
    assert_eq!(governor.active(), 0);
    Ok(())
}

#[tokio::test]
async fn test_explicit_cancel_terminates_stream() -> anyhow::Result<()> {
    let governor = Governor::new(1);
    let process = ExtractionProcess::spawn(
        "abc",
        sh("while :; do printf x; sleep 0.05; done"),
        governor.try_acquire().unwrap(),
    )?;
    let token = process.cancel_token();
    let stream = process.into_stream();

    token.cancel();
    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect::<Vec<_>>()).await?;
    // Le processus tué ne se termine pas avec succès : le flux finit en erreur
    assert!(items.last().unwrap().is_err());
    Ok(())
}

/// Vrai tant que le processus existe et n'est pas un zombie
#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancel_kills_grandchildren() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pid_file = dir.path().join("helper.pid");
    let governor = Governor::new(1);
    let process = ExtractionProcess::spawn(
        "abc",
        sh(&format!(
            "sleep 30 & echo $! > {}; while :; do printf x; sleep 0.05; done",
            pid_file.display()
        )),
        governor.try_acquire().unwrap(),
    )?;
    let mut exit = process.exit_watch();

    let mut stream = Box::pin(process.into_stream());
    assert!(stream.next().await.unwrap().is_ok());
    let helper: u32 = std::fs::read_to_string(&pid_file)?.trim().parse()?;
    assert!(is_running(helper));
    drop(stream);

    tokio::time::timeout(Duration::from_secs(1), exit.wait_for(Option::is_some)).await??;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while is_running(helper) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!is_running(helper), "helper process {} survived", helper);
    Ok(())
}

#[tokio::test]
async fn test_process_lingering_after_stdout_close_is_killed() -> anyhow::Result<()> {
    let governor = Governor::new(1);
    let process = ExtractionProcess::spawn(
        "abc",
        sh("printf partial; exec 1>&-; sleep 30"),
        governor.try_acquire().unwrap(),
    )?
    .with_stall_timeout(Duration::from_millis(200));
    let mut exit = process.exit_watch();

    let items: Vec<_> =
        tokio::time::timeout(Duration::from_secs(2), process.into_stream().collect::<Vec<_>>()).await?;
    assert_eq!(items.len(), 2);
    assert_eq!(&items[0].as_ref().unwrap()[..], b"partial");
    assert!(items[1].is_err());

    let finished = tokio::time::timeout(Duration::from_secs(1), exit.wait_for(Option::is_some))
        .await?
        .map(|e| (*e).clone())?
        .unwrap();
    assert!(finished.cancelled);
    assert_eq!(governor.active(), 0);
    Ok(())
}
