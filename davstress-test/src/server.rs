//! Exposes an in-process WebDAV stand-in for use in integration tests.
//!
//! The server accepts `PUT` and `DELETE` on any path, authenticated with HTTP basic auth. It keeps
//! track of stored files and request counts so that tests can assert on what a load run did.
//!
//! ```
//! use davstress_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new("secret").await;
//!    let url = server.url("/remote.php/dav/files/user0/file.txt");
//!    // use the URL in tests...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Basic;
use futures_util::StreamExt;

type Auth = Option<TypedHeader<Authorization<Basic>>>;

#[derive(Debug, Default)]
struct Storage {
    password: String,
    fail_deletes: bool,
    puts: AtomicU64,
    deletes: AtomicU64,
    bytes: AtomicU64,
    files: Mutex<HashMap<String, u64>>,
}

impl Storage {
    /// Accepts requests whose username appears as a segment of the path.
    fn authorize(&self, auth: &Auth, path: &str) -> Result<(), StatusCode> {
        let Some(TypedHeader(Authorization(basic))) = auth else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        if basic.password() != self.password {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if !path.split('/').any(|segment| segment == basic.username()) {
            return Err(StatusCode::FORBIDDEN);
        }

        Ok(())
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn put_file(
    State(storage): State<Arc<Storage>>,
    Path(path): Path<String>,
    auth: Auth,
    body: Body,
) -> StatusCode {
    if let Err(status) = storage.authorize(&auth, &path) {
        return status;
    }

    let mut size = 0;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => size += chunk.len() as u64,
            Err(_) => return StatusCode::BAD_REQUEST,
        }
    }

    storage.puts.fetch_add(1, Ordering::Relaxed);
    storage.bytes.fetch_add(size, Ordering::Relaxed);
    match storage.files().insert(path, size) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::CREATED,
    }
}

async fn delete_file(
    State(storage): State<Arc<Storage>>,
    Path(path): Path<String>,
    auth: Auth,
) -> StatusCode {
    if let Err(status) = storage.authorize(&auth, &path) {
        return status;
    }

    storage.deletes.fetch_add(1, Ordering::Relaxed);
    if storage.fail_deletes {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    match storage.files().remove(&path) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// An in-process WebDAV stand-in for use in integration tests.
///
/// Files are not stored, only their sizes. The server listens on a random available port on
/// localhost and shuts down when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    storage: Arc<Storage>,
}

impl TestServer {
    /// Starts a server that accepts every user with the given password.
    pub async fn new(password: &str) -> Self {
        Self::start(Storage {
            password: password.to_owned(),
            ..Default::default()
        })
    }

    /// Starts a server that accepts uploads but answers every `DELETE` with a server error.
    pub async fn failing_deletes(password: &str) -> Self {
        Self::start(Storage {
            password: password.to_owned(),
            fail_deletes: true,
            ..Default::default()
        })
    }

    fn start(storage: Storage) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let storage = Arc::new(storage);
        let app = Router::new()
            .route("/{*path}", put(put_file).delete(delete_file))
            .with_state(Arc::clone(&storage));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            storage,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Number of accepted uploads.
    pub fn puts(&self) -> u64 {
        self.storage.puts.load(Ordering::Relaxed)
    }

    /// Number of authorized delete requests, including failed ones.
    pub fn deletes(&self) -> u64 {
        self.storage.deletes.load(Ordering::Relaxed)
    }

    /// Total number of body bytes received by uploads.
    pub fn bytes_received(&self) -> u64 {
        self.storage.bytes.load(Ordering::Relaxed)
    }

    /// Paths of files that are currently stored, sorted.
    pub fn stored_files(&self) -> Vec<String> {
        let mut files: Vec<_> = self.storage.files().keys().cloned().collect();
        files.sort();
        files
    }

    /// Size of the stored file at `path`, if any.
    pub fn file_size(&self, path: &str) -> Option<u64> {
        self.storage.files().get(path.trim_start_matches('/')).copied()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
