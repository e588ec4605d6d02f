//! OS signal handling
//!
//! SIGINT and SIGTERM end the process. SIGHUP, SIGUSR1 and SIGUSR2 are
//! logged and otherwise ignored so that they do not kill the relay.

use log::warn;
use std::io;

/// Wait for a terminating signal and return its name
#[cfg(unix)]
pub async fn wait_for_termination() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => return Ok("SIGINT"),
            _ = terminate.recv() => return Ok("SIGTERM"),
            _ = hangup.recv() => warn!("received signal: SIGHUP, ignore"),
            _ = user1.recv() => warn!("received signal: SIGUSR1, ignore"),
            _ = user2.recv() => warn!("received signal: SIGUSR2, ignore"),
        }
    }
}

/// Wait for a terminating signal and return its name
#[cfg(not(unix))]
pub async fn wait_for_termination() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
