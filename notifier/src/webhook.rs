use crate::config::WebhookConfig;
use crate::errors::NotifyError;
use crate::event::{NotificationEvent, Outcome};
use serde::Serialize;
use url::Url;

/// A channel that can deliver a notification event.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError>;

    fn channel_name(&self) -> &str;
}

/// Posts events to a chat webhook.
///
/// The body carries both `text` and `content` so it is accepted by Slack and
/// Discord style endpoints, plus an embed with the details.
pub struct WebhookNotifier {
    url: Url,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    content: String,
    embeds: [Embed<'a>; 1],
}

#[derive(Serialize)]
struct Embed<'a> {
    title: String,
    description: &'a str,
    color: u32,
    timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField<'a>>,
}

#[derive(Serialize)]
struct EmbedField<'a> {
    name: &'static str,
    value: &'a str,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(WebhookNotifier {
            url: config.url.clone(),
            client,
        })
    }
}

fn payload(event: &NotificationEvent) -> WebhookPayload<'_> {
    let (emoji, color) = match event.outcome {
        Outcome::Success => ("\u{2705}", 0x2ECC71),
        Outcome::Error => ("\u{274C}", 0xE74C3C),
    };
    let title = format!("{emoji} {} sync {}", event.job, event.outcome.as_str());
    let text = format!("{title}: {}", event.message);

    let fields = event
        .details
        .as_deref()
        .map(|details| EmbedField {
            name: "Details",
            value: details,
        })
        .into_iter()
        .collect();

    WebhookPayload {
        content: text.clone(),
        text,
        embeds: [Embed {
            title,
            description: &event.message,
            color,
            timestamp: event.timestamp.to_rfc3339(),
            fields,
        }],
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload(event))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    // Captures posted bodies and answers with `status`.
    async fn start_hook(status: StatusCode) -> (Url, Arc<Mutex<Vec<serde_json::Value>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let captured = received.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let captured = captured.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let captured = captured.clone();
                        async move {
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            captured
                                .lock()
                                .unwrap()
                                .push(serde_json::from_slice(&body).unwrap());
                            let mut response = Response::new(Full::new(Bytes::new()));
                            *response.status_mut() = status;
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        let url = Url::parse(&format!("http://127.0.0.1:{port}/hook")).unwrap();
        (url, received)
    }

    fn config(url: Url) -> WebhookConfig {
        WebhookConfig {
            url,
            attempts: 3,
            base_delay_ms: 1,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_send_posts_chat_payload() {
        let (url, received) = start_hook(StatusCode::NO_CONTENT).await;
        let notifier = WebhookNotifier::new(&config(url)).unwrap();

        let event = NotificationEvent::error("dsc", "sync failed", Some("upstream 503"));
        notifier.send(&event).await.unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        let body = &bodies[0];
        assert_eq!(body["text"], body["content"]);
        assert!(body["text"].as_str().unwrap().contains("sync failed"));
        assert_eq!(body["embeds"][0]["color"], 0xE74C3C);
        assert!(body["embeds"][0]["title"].as_str().unwrap().contains("dsc"));
        assert_eq!(body["embeds"][0]["fields"][0]["value"], "upstream 503");
        assert_eq!(notifier.channel_name(), "webhook");
    }

    #[tokio::test]
    async fn test_send_reports_error_status() {
        let (url, _received) = start_hook(StatusCode::BAD_GATEWAY).await;
        let notifier = WebhookNotifier::new(&config(url)).unwrap();

        let err = notifier
            .send(&NotificationEvent::error("dpd", "failed", None))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status, .. } if status == StatusCode::BAD_GATEWAY));
    }
}
