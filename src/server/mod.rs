use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use futures::StreamExt;
use hyper::{
    body::{self, HttpBody},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::{cache::AddressCache, dns::Connector, intake::Intake};
use auth::PasswordGate;

pub mod auth;
pub mod client_ip;
pub mod listing;

const TEXT: &str = "text/plain; charset=utf-8";
const HTML: &str = "text/html; charset=utf-8";

/// Largest request body read. A report or password form is a few dozen bytes.
const MAX_BODY_BYTES: usize = 4 * 1024;

/// Everything the HTTP handlers share.
pub struct App<C: Connector> {
    intake: Intake<C>,
    cache: Arc<AddressCache>,
    gate: PasswordGate,
    trust_forwarded: bool,
}

impl<C: Connector> App<C> {
    pub fn new(
        intake: Intake<C>,
        cache: Arc<AddressCache>,
        gate: PasswordGate,
        trust_forwarded: bool,
    ) -> Self {
        Self {
            intake,
            cache,
            gate,
            trust_forwarded,
        }
    }

    pub async fn route(&self, req: Request<Body>, peer: SocketAddr) -> Response<Body> {
        let client_ip = client_ip::observe(req.headers(), peer, self.trust_forwarded);
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        debug!(%method, path = %path, client_ip = %client_ip, "request");

        match (&method, path.as_str()) {
            (&Method::POST, "/") => self.report(req, client_ip).await,
            (_, "/") => respond(StatusCode::OK, TEXT, client_ip),
            (&Method::GET, "/list") => respond(StatusCode::OK, HTML, listing::PASSWORD_FORM),
            (&Method::POST, "/list") => self.list(req, client_ip).await,
            (_, "/list") => respond(StatusCode::METHOD_NOT_ALLOWED, TEXT, ""),
            _ => respond(StatusCode::NOT_FOUND, TEXT, "Not Found"),
        }
    }

    /// Accepts a report. The response never reflects what happened to it.
    async fn report(&self, req: Request<Body>, client_ip: String) -> Response<Body> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        let query = req.uri().query().map(str::to_owned);

        let bytes = match read_body(req.into_body()).await {
            Ok(bytes) => bytes,
            Err(BodyError::TooLarge) => {
                debug!("dropping oversized report body");
                return respond(StatusCode::OK, TEXT, "");
            }
            Err(e) => {
                warn!("failed to read report body: {}", e);
                return respond(StatusCode::BAD_REQUEST, TEXT, "");
            }
        };

        let report = if is_json {
            match serde_json::from_slice::<ReportBody>(&bytes) {
                Ok(report) => report,
                Err(e) => {
                    debug!("rejecting report: {}", e);
                    return respond(StatusCode::BAD_REQUEST, TEXT, "Invalid JSON data");
                }
            }
        } else {
            ReportBody::from_form(query.as_deref(), &bytes)
        };

        self.intake.handle(&report.host, &report.ipv6, &client_ip).await;

        respond(StatusCode::OK, TEXT, "")
    }

    async fn list(&self, req: Request<Body>, client_ip: String) -> Response<Body> {
        let password = match read_body(req.into_body()).await {
            Ok(bytes) => form_urlencoded::parse(&bytes)
                .find(|(k, _)| k == "password")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default(),
            Err(e) => {
                warn!("failed to read listing body: {}", e);
                String::new()
            }
        };

        if !self.gate.check(&password).await {
            return respond(StatusCode::OK, TEXT, client_ip);
        }

        let records = self.cache.list_fresh().await;
        respond(StatusCode::OK, HTML, listing::render(&records))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReportBody {
    #[serde(default)]
    host: String,
    #[serde(default)]
    ipv6: String,
}

impl ReportBody {
    /// Form fields from the query string, overridden by the body.
    fn from_form(query: Option<&str>, body: &[u8]) -> Self {
        let mut report = Self::default();

        let pairs = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .chain(form_urlencoded::parse(body));
        for (key, value) in pairs {
            match key.as_ref() {
                "host" => report.host = value.into_owned(),
                "ipv6" => report.ipv6 = value.into_owned(),
                _ => {}
            }
        }

        report
    }
}

#[derive(Debug, Error)]
enum BodyError {
    #[error("request body too large")]
    TooLarge,
    #[error(transparent)]
    Read(#[from] hyper::Error),
}

/// Buffers a request body of at most [`MAX_BODY_BYTES`], giving up as soon
/// as the declared length or the bytes received so far exceed it.
async fn read_body(mut body: Body) -> Result<Vec<u8>, BodyError> {
    if HttpBody::size_hint(&body).lower() > MAX_BODY_BYTES as u64 {
        return Err(BodyError::TooLarge);
    }

    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Serves `app` until ctrl-c.
pub async fn serve<C: Connector>(addr: SocketAddr, app: Arc<App<C>>) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let app = Arc::clone(&app);
        let peer = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let app = Arc::clone(&app);
                async move { Ok::<_, Infallible>(app.route(req, peer).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("listening on http://{}", addr);

    server.with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::fake::FakeDns;
    use crate::dns::RecordType;
    use crate::intake::Targets;
    use crate::target::{Credentials, ProviderTarget};
    use std::time::Duration;

    struct Harness {
        app: App<FakeDns>,
        cache: Arc<AddressCache>,
        dns: FakeDns,
    }

    fn harness(password: Option<&str>) -> Harness {
        let targets = Targets::from([(
            "home".to_string(),
            ProviderTarget {
                credentials: Credentials {
                    access_key_id: "id".into(),
                    access_key_secret: "secret".into(),
                    region: "cn-hangzhou".into(),
                },
                endpoint: None,
                domains: vec!["www:example.com".into()],
                sync_ipv4: false,
            },
        )]);
        let cache = Arc::new(AddressCache::default());
        let dns = FakeDns::default();
        let intake = Intake::new(Arc::clone(&cache), Arc::new(targets), Arc::new(dns.clone()));
        let gate = PasswordGate::new(password.map(auth::hash_password), None);

        Harness {
            app: App::new(intake, Arc::clone(&cache), gate, true),
            cache,
            dns,
        }
    }

    fn peer() -> SocketAddr {
        "203.0.113.7:40000".parse().unwrap()
    }

    fn post(path: &str, content_type: &str, body: &str) -> Request<Body> {
        Request::post(path)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn text(response: Response<Body>) -> String {
        let bytes = body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn form_report_takes_ipv4_from_connection() {
        let h = harness(None);
        let req = post(
            "/",
            "application/x-www-form-urlencoded",
            "host=laptop&ipv6=2001%3Adb8%3A%3A1&ipv4=9.9.9.9",
        );

        let response = h.app.route(req, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "");

        let records = h.cache.list_fresh().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host, "laptop");
        assert_eq!(records[0].ipv6, "2001:db8::1");
        assert_eq!(records[0].ipv4, "203.0.113.7");
    }

    #[tokio::test]
    async fn json_report_triggers_reconciliation() {
        let h = harness(None);
        let req = post(
            "/",
            "application/json",
            r#"{"host": "home", "ipv6": "2001:db8::2"}"#,
        );

        let response = h.app.route(req, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.dns.value("www.example.com", RecordType::Aaaa).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("record was never created");
        assert_eq!(
            h.dns.value("www.example.com", RecordType::Aaaa).as_deref(),
            Some("2001:db8::2")
        );
    }

    #[tokio::test]
    async fn invalid_json_is_rejected() {
        let h = harness(None);
        let response = h.app.route(post("/", "application/json", "{host"), peer()).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text(response).await, "Invalid JSON data");
        assert_eq!(h.cache.len().await, 0);
    }

    #[tokio::test]
    async fn oversized_report_is_silently_ignored() {
        let h = harness(None);
        let body = format!("host={}&ipv6=2001:db8::1", "x".repeat(17));

        let response = h
            .app
            .route(post("/", "application/x-www-form-urlencoded", &body), peer())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.cache.len().await, 0);
    }

    #[tokio::test]
    async fn huge_report_body_is_not_buffered() {
        let h = harness(None);
        let body = format!("host=home&ipv6=2001:db8::1&pad={}", "x".repeat(MAX_BODY_BYTES));

        let response = h
            .app
            .route(post("/", "application/x-www-form-urlencoded", &body), peer())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "");
        assert_eq!(h.cache.len().await, 0);
    }

    #[tokio::test]
    async fn streamed_body_is_cut_off_without_length() {
        let chunks = (0..64).map(|_| Ok::<_, std::io::Error>(vec![b'a'; 1024]));
        let body = Body::wrap_stream(futures::stream::iter(chunks));
        assert_eq!(HttpBody::size_hint(&body).lower(), 0);

        assert!(matches!(read_body(body).await, Err(BodyError::TooLarge)));
        assert_eq!(read_body(Body::from("host=home")).await.unwrap(), b"host=home");
    }

    #[tokio::test]
    async fn oversized_listing_form_is_denied() {
        let h = harness(None);
        let body = format!("password={}", "p".repeat(MAX_BODY_BYTES));

        let response = h
            .app
            .route(post("/list", "application/x-www-form-urlencoded", &body), peer())
            .await;
        assert_eq!(text(response).await, "203.0.113.7");
    }

    #[tokio::test]
    async fn root_echoes_client_ip() {
        let h = harness(None);
        let req = Request::get("/")
            .header("X-Forwarded-For", "198.51.100.4, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(text(h.app.route(req, peer()).await).await, "198.51.100.4");
    }

    #[tokio::test]
    async fn listing_requires_password() {
        let h = harness(Some("letmein"));
        h.cache.report("home", "2001:db8::1", "1.2.3.4").await;

        let form = h
            .app
            .route(Request::get("/list").body(Body::empty()).unwrap(), peer())
            .await;
        assert!(text(form).await.contains(r#"name="password""#));

        let denied = h
            .app
            .route(post("/list", "application/x-www-form-urlencoded", "password=nope"), peer())
            .await;
        assert_eq!(text(denied).await, "203.0.113.7");

        let allowed = h
            .app
            .route(post("/list", "application/x-www-form-urlencoded", "password=letmein"), peer())
            .await;
        assert_eq!(allowed.headers()[CONTENT_TYPE], HTML);
        let html = text(allowed).await;
        assert!(html.contains("<td>home</td><td>2001:db8::1</td><td>1.2.3.4</td>"));
    }

    #[tokio::test]
    async fn first_listing_password_is_adopted() {
        let h = harness(None);

        let first = h
            .app
            .route(post("/list", "application/x-www-form-urlencoded", "password=fresh"), peer())
            .await;
        assert!(text(first).await.contains("<table"));

        let other = h
            .app
            .route(post("/list", "application/x-www-form-urlencoded", "password=other"), peer())
            .await;
        assert_eq!(text(other).await, "203.0.113.7");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let h = harness(None);
        let response = h
            .app
            .route(Request::get("/admin").body(Body::empty()).unwrap(), peer())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
