//! A canned HTTP endpoint on localhost, for tests of code that talks to a remote service which
//! can't be run locally (the IAM token service, or COS itself with IAM bearer auth).
use crate::Result;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};
use url::Url;

/// Accept a single connection and answer its request with `status` and `body`.
///
/// Returns the endpoint's base URL and a handle that resolves to the raw request as received,
/// headers included.  Any further connection is refused.
pub async fn serve_once(
    status: &'static str,
    content_type: &'static str,
    body: &'static str,
) -> Result<(Url, JoinHandle<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/", listener.local_addr()?).parse()?;

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept failed");

        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read failed");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);

            if request_complete(&request) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write failed");
        socket.shutdown().await.ok();

        String::from_utf8_lossy(&request).into_owned()
    });

    Ok((url, handle))
}

/// Headers are in and the body has reached its declared length
fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);

    let Some((headers, body)) = text.split_once("\r\n\r\n") else {
        return false;
    };

    let content_length = header_values(headers, "content-length")
        .first()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    body.len() >= content_length
}

/// Every value of header `name` in a raw request, matched case-insensitively
pub fn header_values(request: &str, name: &str) -> Vec<String> {
    let headers = request.split("\r\n\r\n").next().unwrap_or_default();

    headers
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .filter(|(header, _)| header.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim().to_string())
        .collect()
}
