// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scriptable mock HTTP server for exercising the flusher and the
//! control-plane client against real sockets.

// Each test binary uses a different subset of the helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Mock HTTP server on a random port. Responses default to one status code;
/// individual paths can queue a sequence of statuses that are consumed one
/// request at a time before falling back to the default.
#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    scripted: Arc<Mutex<HashMap<String, VecDeque<(u16, String)>>>>,
    default_status: Arc<AtomicU16>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with_status(204).await
    }

    pub async fn start_with_status(default_status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("failed to get local addr");

        let server = MockServer {
            addr,
            received: Arc::new(Mutex::new(Vec::new())),
            scripted: Arc::new(Mutex::new(HashMap::new())),
            default_status: Arc::new(AtomicU16::new(default_status)),
        };

        let accept_state = server.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let io = TokioIo::new(stream);
                let state = accept_state.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let query = req.uri().query().map(str::to_string);
                            let headers: Vec<(String, String)> = req
                                .headers()
                                .iter()
                                .map(|(k, v)| {
                                    (k.to_string(), v.to_str().unwrap_or("").to_string())
                                })
                                .collect();
                            let body = req
                                .into_body()
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes().to_vec())
                                .unwrap_or_default();

                            state.received.lock().unwrap().push(ReceivedRequest {
                                method,
                                path: path.clone(),
                                query,
                                headers,
                                body,
                            });

                            let (status, body) = state.next_response(&path);
                            Ok::<_, hyper::http::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from(body)))
                                    .unwrap(),
                            )
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        server
    }

    fn next_response(&self, path: &str) -> (u16, String) {
        let mut scripted = self.scripted.lock().unwrap();
        if let Some(queue) = scripted.get_mut(path) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        (self.default_status.load(Ordering::SeqCst), String::new())
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue one status (with empty body) for the next request to `path`.
    pub fn queue_status(&self, path: &str, status: u16) {
        self.queue_response(path, status, "");
    }

    pub fn queue_response(&self, path: &str, status: u16, body: &str) {
        self.scripted
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }

    pub fn requests_for_path(&self, path: &str) -> Vec<ReceivedRequest> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }
}
