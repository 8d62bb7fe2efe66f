use std::net::SocketAddr;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    codec,
    console::ConsoleCommand,
    message::{ClientToServer, ServerToClient},
};

/// Framed connection to a relay, speaking the client side of the protocol.
pub struct RelayClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buffer: BytesMut,
}

impl RelayClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            buffer: BytesMut::new(),
        })
    }

    pub async fn send(&mut self, message: &ClientToServer) -> io::Result<()> {
        self.send_payload(&message.encode()).await
    }

    /// Frames and sends an arbitrary payload, valid message or not.
    pub async fn send_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        self.send_raw(&codec::encode_frame(payload)).await
    }

    /// Writes bytes to the socket exactly as given.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Waits for the next server message. `Ok(None)` means the relay closed
    /// the connection. Cancel safe: partial frames stay buffered.
    pub async fn recv(&mut self) -> Result<Option<ServerToClient>> {
        loop {
            if let Some((payload, consumed)) = codec::try_extract_frame(&self.buffer) {
                let message = ServerToClient::decode(payload)
                    .context("relay sent an undecodable message")?;
                self.buffer.advance(consumed);
                return Ok(Some(message));
            }
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = RelayClient::connect(args.server).await?;
    info!("connected to {}", args.server);

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut client, &mut stdin, &mut input).await?;
    shutdown_connection(&mut client).await;

    Ok(())
}

async fn run_client_loop(
    client: &mut RelayClient,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_message = client.recv() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, client).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(message: Result<Option<ServerToClient>>) -> Result<bool> {
    match message? {
        Some(message) => {
            write_stdout(&render_server_message(&message)).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** relay closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    client: &mut RelayClient,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    let command = match ConsoleCommand::parse(text) {
        Ok(command) => command,
        Err(err) => {
            write_stderr(&format!("!!! {err}")).await?;
            return Ok(true);
        }
    };

    let leaving = command == ConsoleCommand::Quit;
    client.send(&command.into_message()).await?;
    if leaving {
        write_stdout("*** leaving relay").await?;
        return Ok(false);
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(client: &mut RelayClient) {
    if let Err(error) = client.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

pub fn render_server_message(message: &ServerToClient) -> String {
    match message {
        ServerToClient::AssignClientId { id } => format!("*** you are client {id}"),
        ServerToClient::ClientConnected { id } => format!("*** client {id} connected"),
        ServerToClient::ClientDisconnected { id } => format!("*** client {id} disconnected"),
        ServerToClient::BroadcastChatMessage { sender, text } => format!("<{sender}> {text}"),
        ServerToClient::BroadcastBytes { sender, bytes } => {
            format!("[bytes from {sender}] {}", String::from_utf8_lossy(bytes))
        }
        ServerToClient::Data { label, bytes } => {
            format!("[data {label}] {}", String::from_utf8_lossy(bytes))
        }
        ServerToClient::BinaryMessageFrom { sender, bytes } => {
            format!("[direct from {sender}] {}", String::from_utf8_lossy(bytes))
        }
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
