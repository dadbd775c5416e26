//! Outbound request serialization toward agent sockets.

use crate::command::Command;
use std::{io, net::Ipv4Addr, time::Duration};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

/// Reply sent to a REST client whose request outgrew the receive buffer.
pub(crate) const PAYLOAD_TOO_LARGE: &[u8] =
    b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n";

/// Serializes `command` as an HTTP/1.1 request.
///
/// The body is the command's explicit JSON payload when it has one, its
/// serialized target parameters otherwise.
pub(crate) fn serialize(command: &Command) -> Vec<u8> {
    let body = match &command.body {
        Some(body) => body.to_string(),
        None => command.params.to_json().to_string(),
    };

    let mut out = Vec::with_capacity(64 + body.len());
    out.extend_from_slice(command.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(command.kind.path().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\nContent-Length: ");
    out.extend_from_slice(body.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(body.as_bytes());
    out
}

/// Writes `command` to the agent's open socket.
pub(crate) async fn send_command(
    stream: &mut TcpStream,
    command: &Command,
    write_timeout: Duration,
) -> io::Result<()> {
    write_bytes(stream, &serialize(command), write_timeout).await
}

/// Pushes the configuration poll emitted right after an agent connects.
pub(crate) async fn send_refresh(
    stream: &mut TcpStream,
    ip: Ipv4Addr,
    write_timeout: Duration,
) -> io::Result<()> {
    send_command(stream, &Command::refresh(ip), write_timeout).await
}

pub(crate) async fn write_bytes(
    stream: &mut TcpStream,
    bytes: &[u8],
    write_timeout: Duration,
) -> io::Result<()> {
    tokio::select! {
        biased;

        result = stream.write_all(bytes) => result,
        _ = sleep(write_timeout) => {
            Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
        },
    }
}

#[cfg(test)]
mod serialization {
    use super::*;
    use crate::{
        command::{CommandKind, CommandParams},
        http::types::Method,
    };
    use serde_json::json;

    #[test]
    fn payload_too_large_literal() {
        assert_eq!(
            PAYLOAD_TOO_LARGE,
            b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn refresh_carries_the_agent_ip() {
        let out = serialize(&Command::refresh(Ipv4Addr::new(192, 168, 2, 25)));

        let expected = b"GET /refresh HTTP/1.1\r\nContent-Length: 24\r\n\r\n\
                       {\"ips\":[\"192.168.2.25\"]}";
        assert_eq!(out, expected);
    }

    #[test]
    fn explicit_body_overrides_params() {
        let command = Command {
            id: 7,
            method: Method::Post,
            kind: CommandKind::Shell,
            params: CommandParams {
                ips: vec![Ipv4Addr::new(10, 0, 0, 1)],
            },
            body: Some(json!({"cmd": "ls"})),
        };

        let out = serialize(&command);
        assert_eq!(
            out,
            b"POST /shell/run HTTP/1.1\r\nContent-Length: 12\r\n\r\n{\"cmd\":\"ls\"}"
        );
    }

    #[test]
    fn empty_params_still_form_a_body() {
        let command = Command {
            id: 1,
            method: Method::Get,
            kind: CommandKind::Probe,
            params: CommandParams::default(),
            body: None,
        };

        assert_eq!(
            serialize(&command),
            b"GET /probe HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"ips\":[]}"
        );
    }
}
