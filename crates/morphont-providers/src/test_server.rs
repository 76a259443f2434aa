//! A one-shot HTTP server answering canned responses, one per connection.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicUsize, Ordering},
};

use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpListener,
};

pub fn response(status: &str, content_type: &str, body: &str) -> String {
  format!(
    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\
     Connection: close\r\n\r\n{body}",
    body.len()
  )
}

pub fn unavailable() -> String { response("503 Service Unavailable", "text/plain", "") }

pub fn json(body: &str) -> String { response("200 OK", "application/json", body) }

pub struct TestServer {
  pub url:      String,
  pub served:   Arc<AtomicUsize>,
  /// Request lines received, in order.
  pub requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
  pub fn served(&self) -> usize { self.served.load(Ordering::SeqCst) }

  pub fn requests(&self) -> Vec<String> { self.requests.lock().unwrap().clone() }
}

pub async fn serve(responses: Vec<String>) -> TestServer {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let served = Arc::new(AtomicUsize::new(0));
  let requests = Arc::new(Mutex::new(Vec::new()));

  let (counter, log) = (served.clone(), requests.clone());
  tokio::spawn(async move {
    for response in responses {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = vec![0u8; 16 * 1024];
      let n = socket.read(&mut buf).await.unwrap_or(0);
      let head = String::from_utf8_lossy(&buf[..n]);
      log.lock().unwrap().push(head.lines().next().unwrap_or_default().to_owned());
      counter.fetch_add(1, Ordering::SeqCst);
      socket.write_all(response.as_bytes()).await.unwrap();
      let _ = socket.shutdown().await;
    }
  });

  TestServer { url: format!("http://{addr}"), served, requests }
}
