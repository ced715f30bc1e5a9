//! Server log tailing
//!
//! Polls the server for new log output on a fixed cadence and writes it
//! to the console. Runs until the process is interrupted; a transport
//! error ends the stream and surfaces to the top-level handler.

use std::io::Write;
use std::time::Duration;

use crate::client::MaximoClient;
use crate::dbconfig::Sleeper;
use crate::error::DeployResult;

/// Stream the server log forever, polling every `interval`.
pub fn run<C, S>(client: &C, sleeper: &S, interval: Duration) -> DeployResult<()>
where
    C: MaximoClient + ?Sized,
    S: Sleeper,
{
    let stdout = std::io::stdout();
    loop {
        let chunk = client.fetch_log()?;
        emit(&chunk, &mut stdout.lock())?;
        sleeper.sleep(interval);
    }
}

/// Write one polled chunk, ensuring it ends on a line boundary so
/// interleaved local output stays readable.
fn emit<W: Write>(chunk: &str, out: &mut W) -> DeployResult<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    out.write_all(chunk.as_bytes())?;
    if !chunk.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
