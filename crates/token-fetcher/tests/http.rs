#![allow(unused_crate_dependencies)]
#![allow(clippy::unwrap_used)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use token_fetcher::{DEFAULT_SCOPES, ErrorHint, ExchangeError, RopcRequest, acquire_token, write_failure_report};

fn spawn_http_server(body: String, status_line: &'static str) -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            // Read and discard request headers (until \r\n\r\n)
            let mut buf = [0u8; 1024];
            let mut req = Vec::new();
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        req.extend_from_slice(&buf[..n]);
                        if req.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                }
            }

            let mut response = format!("{status_line}\r\n");
            response.push_str("Content-Type: application/json\r\n");
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("Connection: close\r\n");
            response.push_str("\r\n");

            let _ = stream.write_all(response.as_bytes());
            let _ = stream.write_all(body.as_bytes());
            let _ = stream.flush();

            thread::sleep(Duration::from_millis(50));
        }
    });

    addr
}

fn request() -> RopcRequest {
    RopcRequest {
        client_id: "client-123".to_owned(),
        username: "user@example.com".to_owned(),
        password: "hunter2".to_owned(),
        scopes: DEFAULT_SCOPES.iter().map(|scope| (*scope).to_owned()).collect(),
    }
}

#[tokio::test]
async fn grant_returns_token_and_writes_report() {
    let body = r#"{"access_token":"abc.def.ghi","expires_in":3600,"token_type":"Bearer","scope":"openid profile"}"#;
    let addr = spawn_http_server(body.to_owned(), "HTTP/1.1 200 OK");

    let client = reqwest::Client::new();
    let mut report = String::new();

    let token = acquire_token(&mut report, &client, &format!("http://{addr}/tenant-123"), &request())
        .await
        .unwrap();

    assert_eq!(token, "abc.def.ghi");

    // The token is printed verbatim between two rule lines.
    let rule = "=".repeat(80);
    assert!(report.contains(&format!("{rule}\nabc.def.ghi\n{rule}")));
    assert!(report.contains("Expires in: 3600 seconds"));
    assert!(report.contains("Token type: Bearer"));
    assert!(report.contains("Scope: openid profile"));
}

#[tokio::test]
async fn grant_with_sparse_metadata_reports_placeholders() {
    let body = r#"{"access_token":"tok"}"#;
    let addr = spawn_http_server(body.to_owned(), "HTTP/1.1 200 OK");

    let client = reqwest::Client::new();
    let mut report = String::new();

    let token = acquire_token(&mut report, &client, &format!("http://{addr}/t"), &request())
        .await
        .unwrap();

    assert_eq!(token, "tok");
    assert!(report.contains("Expires in: N/A seconds"));
    assert!(report.contains("Token type: N/A"));
    assert!(report.contains("Scope: N/A"));
}

#[tokio::test]
async fn rejection_is_classified_and_reported() {
    let body = r#"{"error":"invalid_grant","error_description":"AADSTS50126: invalid username or password"}"#;
    let addr = spawn_http_server(body.to_owned(), "HTTP/1.1 400 Bad Request");

    let client = reqwest::Client::new();
    let mut report = String::new();

    let err = acquire_token(&mut report, &client, &format!("http://{addr}/t"), &request())
        .await
        .unwrap_err();

    // Nothing was written on the failure path; the caller renders the report.
    assert!(report.is_empty());

    let ExchangeError::Rejected(rejection) = err else {
        panic!("expected a rejection, got: {err}");
    };

    assert_eq!(rejection.error, "invalid_grant");
    assert_eq!(rejection.hint(), Some(ErrorHint::InvalidCredentials));

    let mut failure = String::new();
    write_failure_report(&mut failure, &rejection).unwrap();

    assert!(failure.contains("Invalid username or password"));
    // The raw payload is shown as formatted JSON.
    assert!(failure.contains("\"error\": \"invalid_grant\""));
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let addr = spawn_http_server("<html>gateway timeout</html>".to_owned(), "HTTP/1.1 504 Gateway Timeout");

    let client = reqwest::Client::new();
    let mut report = String::new();

    let err = acquire_token(&mut report, &client, &format!("http://{addr}/t"), &request())
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::Malformed(_)));
    assert!(err.to_string().contains("504"));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    // Bind then drop, so the port is very likely closed.
    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        listener.local_addr().unwrap()
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let mut report = String::new();

    let err = acquire_token(&mut report, &client, &format!("http://{addr}/t"), &request())
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::Transport(_)));
}
