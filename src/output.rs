//! Forwards the output of child processes, one prefixed line at a time.

use std::borrow::Cow;

use time::{macros::format_description, OffsetDateTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tracing::Level;

/// How forwarded output lines are decorated.
#[derive(Copy, Clone, Debug, Default)]
pub struct OutputOptions {
    /// Remove ANSI escape sequences (for example, when our own output
    /// is not a terminal).
    pub strip_ansi: bool,

    /// Prefix every line with a UTC timestamp.
    pub timestamps: bool,
}

/// Formats a single output line from the process labeled `label`.
pub fn format_line(label: &str, line: &str, timestamp: Option<&str>, strip_ansi: bool) -> String {
    let line = if strip_ansi {
        console::strip_ansi_codes(line)
    } else {
        line.into()
    };

    match timestamp {
        Some(timestamp) => format!("{timestamp}: {label} | {line}"),
        None => format!("{label} | {line}"),
    }
}

fn now() -> Option<String> {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .ok()
}

/// Decodes one line read from a process, dropping the line terminator.
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub fn line_text(buf: &[u8]) -> Cow<'_, str> {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line)
}

/// Spawns a task that copies `reader` to our stdout line by line until
/// the process closes its end of the pipe. The pipe is always drained to
/// the end so the process never sees a closed pipe.
pub(crate) fn forward<R>(label: String, reader: R, options: OutputOptions)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut stdout = tokio::io::stdout();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let timestamp = if options.timestamps { now() } else { None };
                    let mut formatted = format_line(
                        &label,
                        &line_text(&buf),
                        timestamp.as_deref(),
                        options.strip_ansi,
                    );
                    formatted.push('\n');

                    // One write per line keeps lines from different
                    // processes from interleaving.
                    if let Err(err) = stdout.write_all(formatted.as_bytes()).await {
                        tracing::event!(Level::WARN, %label, ?err, "Unable to write process output");
                    }
                }
                Err(err) => {
                    tracing::event!(Level::WARN, %label, ?err, "Unable to read process output; discarding the rest");
                    if let Err(err) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                        tracing::event!(Level::WARN, %label, ?err, "Unable to drain process output");
                    }
                    break;
                }
            }
        }
    });
}
