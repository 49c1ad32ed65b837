use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    line::{read_line, write_line},
};

/// A connected chat client, split into what the UI renders and what it
/// submits.
pub struct ChatClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ChatClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        info!("connected to {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Received server lines as a lazy stream, plus the sending half.
    pub fn split(self) -> (impl Stream<Item = io::Result<String>>, LineSender) {
        (
            received_lines(self.reader),
            LineSender {
                writer: self.writer,
            },
        )
    }
}

pub struct LineSender {
    writer: OwnedWriteHalf,
}

impl LineSender {
    pub async fn send_line(&mut self, text: &str) -> io::Result<()> {
        write_line(&mut self.writer, text).await
    }

    pub async fn shutdown(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

/// Yields each line the server sends until EOF; a read error is yielded once
/// and ends the stream.
pub fn received_lines<R>(reader: R) -> impl Stream<Item = io::Result<String>>
where
    R: AsyncBufRead + Unpin,
{
    futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match read_line(&mut reader).await {
            Ok(Some(line)) => Some((Ok(line), Some(reader))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    })
}

/// Prints every server line to stdout and sends every stdin line to the
/// server until either side closes.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (lines, mut sender) = ChatClient::connect(&args.server).await?.split();
    tokio::pin!(lines);

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            received = lines.next() => {
                if !handle_server_line(received).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &mut sender).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    sender.shutdown().await;
    Ok(())
}

async fn handle_server_line(received: Option<io::Result<String>>) -> Result<bool> {
    match received {
        Some(line) => {
            let line = line.context("failed to read from server")?;
            write_stdout(&line).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    sender: &mut LineSender,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(true);
    }

    sender.send_line(text).await?;
    Ok(true)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
