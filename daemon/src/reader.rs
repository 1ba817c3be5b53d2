/// Line reader for the backend's stdout.
///
/// Checks the handshake, forwards every later line to the raw-line channel,
/// and feeds it to a [`RecordParser`]. Completed records go out on their
/// kind's channel. Sends await channel capacity, so a slow dispatcher stalls
/// reading rather than growing a queue.
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info};

use crate::event::EventSenders;
use crate::parser::{self, ProtocolError, RecordParser};
use crate::record::Record;

/// Reads until EOF, a read error, or a closed channel.
///
/// Only framing violations are returned as errors; read failures are logged
/// and end the loop since the backend owns connection health.
pub async fn run<R>(mut reader: R, senders: EventSenders) -> Result<(), ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut parser = RecordParser::new();
    let mut buf = Vec::new();
    let mut first = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!("backend output closed");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                error!("failed to read backend output: {e}");
                return Ok(());
            }
        }

        let line = decode_line(&buf);

        if first {
            first = false;
            parser::expect_handshake(&line)?;
            info!("{line}");
            continue;
        }

        let record = parser.feed(&line)?;

        if senders.lines.send(line).await.is_err() {
            break;
        }

        let delivered = match record {
            Some(Record::Presence(event)) => senders.presence.send(event).await.is_ok(),
            Some(Record::PolicyChange(change)) => senders.policy.send(change).await.is_ok(),
            None => true,
        };
        if !delivered {
            break;
        }
    }

    debug!("dispatcher gone; reader stopping");
    Ok(())
}

/// Strips the line terminator and decodes lossily.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
