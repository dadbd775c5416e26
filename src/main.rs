use anyhow::Context;
use fleetgate::{
    bind,
    cli::Opts,
    config::Config,
    db::{Database, DbError, MemoryDb},
    dispatch::{Dispatch, HandlerError, InboundRequest, InboundResponse, ResponseOutcome},
    limits::ServerLimits,
    logging, Server,
};
use serde_json::json;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::info;

/// Built-in REST surface of the daemon.
///
/// Endpoint logic beyond this skeleton belongs in external tooling; the
/// daemon only proves out the seams: an authenticated health check and an
/// inventory lookup through the [`Database`] interface.
struct Gateway {
    db: MemoryDb,
    api_token: Option<String>,
}

impl Dispatch for Gateway {
    async fn dispatch_request(
        &self,
        request: InboundRequest<'_>,
        stream: &mut TcpStream,
    ) -> Result<(), HandlerError> {
        let reply = self.route(&request);
        stream.write_all(&reply).await?;
        Ok(())
    }

    async fn dispatch_response(
        &self,
        response: InboundResponse<'_>,
        _stream: &mut TcpStream,
    ) -> Result<ResponseOutcome, HandlerError> {
        info!(
            remote = %response.remote,
            last_cmd_id = ?response.last_cmd_id,
            "agent response processed"
        );
        Ok(ResponseOutcome::Idle)
    }
}

impl Gateway {
    fn route(&self, request: &InboundRequest<'_>) -> Vec<u8> {
        if let Some(token) = self.api_token.as_deref() {
            if request.auth_token != Some(token) {
                return reply("401 Unauthorized", &json!({"error": "bad token"}));
            }
        }

        match request_target(request.payload) {
            Some(("GET", "/ping")) => reply("200 OK", &json!({"status": "up"})),
            Some(("POST", "/computer")) => self.computer_reply(request.body),
            _ => reply("404 Not Found", &json!({"error": "no such endpoint"})),
        }
    }

    fn computer_reply(&self, body: &[u8]) -> Vec<u8> {
        #[derive(serde::Deserialize)]
        struct Lookup {
            ip: std::net::Ipv4Addr,
        }

        let Ok(lookup) = serde_json::from_slice::<Lookup>(body) else {
            return reply("400 Bad Request", &json!({"error": "expected an ip field"}));
        };

        match self.db.computer_by_ip(lookup.ip) {
            Ok(computer) => reply(
                "200 OK",
                &json!({
                    "id": computer.id,
                    "name": computer.name,
                    "center": computer.center,
                    "room": computer.room,
                    "procedure": computer.procedure,
                }),
            ),
            Err(DbError::NotFound(ip)) => reply(
                "404 Not Found",
                &json!({"error": format!("unknown computer {ip}")}),
            ),
            Err(err) => reply(
                "500 Internal Server Error",
                &json!({"error": err.to_string()}),
            ),
        }
    }
}

/// Splits the request line into method and target; everything past that is
/// the dispatcher's private business anyway.
fn request_target(payload: &[u8]) -> Option<(&str, &str)> {
    let line_end = payload.iter().position(|&byte| byte == b'\r')?;
    let line = std::str::from_utf8(&payload[..line_end]).ok()?;
    let mut parts = line.split(' ');
    Some((parts.next()?, parts.next()?))
}

fn reply(status: &str, body: &serde_json::Value) -> Vec<u8> {
    let body = body.to_string();
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::read();
    let _guard = logging::init(logging::level_filter(opts.debug), opts.logfile.as_deref())?;

    let config = Config::load(&opts.config)
        .with_context(|| format!("cannot load configuration {}", opts.config.display()))?;

    let mut db = MemoryDb::new();
    for entry in &config.database.computers {
        db.insert(entry.ip, entry.computer.clone());
    }

    let limits = ServerLimits {
        keepalive_slots: config.keepalive_slots,
        ..ServerLimits::default()
    };

    let rest = bind(config.rest_port)?;
    let agent = bind(config.agent_port)?;
    info!(
        rest_port = config.rest_port,
        agent_port = config.agent_port,
        "fleetgate listening"
    );

    Server::builder()
        .rest_listener(rest)
        .agent_listener(agent)
        .dispatch(Gateway {
            db,
            api_token: config.api_token.clone(),
        })
        .limits(limits)
        .build()
        .launch()
        .await;

    Ok(())
}

#[cfg(test)]
mod routing {
    use super::*;
    use fleetgate::db::Computer;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn gateway() -> Gateway {
        let mut db = MemoryDb::new();
        db.insert(
            Ipv4Addr::new(192, 168, 2, 10),
            Computer {
                id: 1,
                name: "lab-a-01".into(),
                center: 1,
                room: 2,
                procedure: 0,
            },
        );
        Gateway {
            db,
            api_token: Some("secret".into()),
        }
    }

    fn request<'a>(payload: &'a [u8], body: &'a [u8], auth: Option<&'a str>) -> InboundRequest<'a> {
        InboundRequest {
            payload,
            body,
            auth_token: auth,
            remote: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000),
        }
    }

    #[test]
    fn ping_with_token() {
        let gateway = gateway();
        let payload = b"GET /ping HTTP/1.1\r\n\r\n";

        let reply = gateway.route(&request(payload, b"", Some("secret")));
        assert!(reply.starts_with(b"HTTP/1.1 200 OK\r\n"));

        let reply = gateway.route(&request(payload, b"", Some("wrong")));
        assert!(reply.starts_with(b"HTTP/1.1 401 Unauthorized\r\n"));

        let reply = gateway.route(&request(payload, b"", None));
        assert!(reply.starts_with(b"HTTP/1.1 401 Unauthorized\r\n"));
    }

    #[test]
    fn computer_lookup() {
        let gateway = gateway();
        let payload = b"POST /computer HTTP/1.1\r\n\r\n";

        let reply = gateway.route(&request(
            payload,
            br#"{"ip": "192.168.2.10"}"#,
            Some("secret"),
        ));
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("lab-a-01"));

        let reply = gateway.route(&request(
            payload,
            br#"{"ip": "10.9.9.9"}"#,
            Some("secret"),
        ));
        assert!(reply.starts_with(b"HTTP/1.1 404 Not Found\r\n"));

        let reply = gateway.route(&request(payload, b"not json", Some("secret")));
        assert!(reply.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn unknown_endpoint_is_404() {
        let gateway = gateway();
        let payload = b"GET /nope HTTP/1.1\r\n\r\n";

        let reply = gateway.route(&request(payload, b"", Some("secret")));
        assert!(reply.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn request_line_parsing() {
        assert_eq!(
            request_target(b"GET /ping HTTP/1.1\r\n\r\n"),
            Some(("GET", "/ping"))
        );
        assert_eq!(request_target(b"no line ending"), None);
    }
}
