use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use futures::StreamExt;
use meter_client::domain::NewReading;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

#[derive(Clone)]
struct SharedSender {
    tx: mpsc::Sender<Envelope<NewReading>>,
}

/// External reading feed: `POST /ingest/readings` with a JSON array of
/// readings, handed downstream through a bounded channel.
#[derive(Clone)]
pub struct ReadingFeedSource {
    receiver: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Envelope<NewReading>>>>>,
}

#[derive(serde::Deserialize)]
struct IncomingReading {
    meter_id: String,
    power_kw: f64,
    voltage: f64,
    current: f64,
    /// Defaults to the time the request was received.
    #[serde(default, with = "time::serde::rfc3339::option")]
    timestamp: Option<OffsetDateTime>,
}

impl IncomingReading {
    fn into_new_reading(self, received: OffsetDateTime) -> NewReading {
        NewReading {
            meter_id: self.meter_id,
            power_kw: self.power_kw,
            voltage: self.voltage,
            current: self.current,
            timestamp: self.timestamp.unwrap_or(received),
        }
    }
}

impl ReadingFeedSource {
    /// Source plus the router that feeds it, without binding a listener.
    pub fn channel(channel_capacity: usize) -> (Self, Router) {
        let (tx, rx) = mpsc::channel(channel_capacity);

        let app = Router::new()
            .route("/ingest/readings", post(ingest_readings))
            .with_state(SharedSender { tx });

        let source = Self {
            receiver: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        };
        (source, app)
    }

    pub async fn new(bind_addr: &str, channel_capacity: usize) -> Result<Self, PipelineError> {
        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| PipelineError::Source(format!("invalid bind addr: {e}")))?;

        let (source, app) = Self::channel(channel_capacity);

        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    tracing::info!(%addr, "reading feed listening");
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        tracing::error!(error = %e, "reading feed server error");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind reading feed listener");
                }
            }
        });

        Ok(source)
    }
}

#[async_trait::async_trait]
impl Source<NewReading> for ReadingFeedSource {
    async fn stream(&self) -> EnvelopeStream<NewReading> {
        let mut guard = self.receiver.lock().await;
        match guard.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "reading feed stream already taken; only one consumer supported".to_string(),
                ))
            })),
        }
    }
}

async fn ingest_readings(
    State(sender): State<SharedSender>,
    Json(payload): Json<Vec<IncomingReading>>,
) -> Result<StatusCode, StatusCode> {
    metrics::counter!("http_ingest_requests_total").increment(1);

    let received = OffsetDateTime::now_utc();
    for incoming in payload {
        let env = Envelope::now(incoming.into_new_reading(received));

        if sender.tx.send(env).await.is_err() {
            // Channel closed; treat as server error
            metrics::counter!("http_ingest_failed_total").increment(1);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ingest/readings")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn posted_readings_reach_the_stream() {
        let (source, app) = ReadingFeedSource::channel(8);

        let body = r#"[
            {"meter_id":"ENG-B1-WA","power_kw":4.4,"voltage":220,"current":20,"timestamp":"2024-06-01T10:00:00Z"},
            {"meter_id":"LIB-B3-WC","power_kw":1.1,"voltage":230,"current":5}
        ]"#;
        let res = app.oneshot(post_json(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        let mut stream = source.stream().await;
        let first = stream.next().await.unwrap().unwrap().payload;
        assert_eq!(first.meter_id, "ENG-B1-WA");
        assert_eq!(first.timestamp, time::macros::datetime!(2024-06-01 10:00:00 UTC));

        let second = stream.next().await.unwrap().unwrap().payload;
        assert_eq!(second.meter_id, "LIB-B3-WC");
        assert!(second.timestamp > time::macros::datetime!(2024-06-01 10:00:00 UTC));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (_source, app) = ReadingFeedSource::channel(8);
        let res = app.oneshot(post_json(r#"{"meter_id":"ENG-B1-WA"}"#)).await.unwrap();
        assert!(res.status().is_client_error());
    }

    #[tokio::test]
    async fn second_consumer_gets_an_error() {
        let (source, _app) = ReadingFeedSource::channel(1);
        let _first = source.stream().await;
        let mut second = source.stream().await;
        assert!(matches!(second.next().await, Some(Err(PipelineError::Source(_)))));
    }
}
