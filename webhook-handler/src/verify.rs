//! Webhook request verification.
//!
//! [`Verifier::verify`] turns one inbound request into exactly one
//! [`Outcome`]:
//!
//! ```text
//! route match → header presence → body drain → signature → JSON parse
//!      │               │               │            │            │
//!   NotMine        Rejected        Rejected     Rejected     Rejected
//! ```
//!
//! Every step short-circuits. Only a request that passes all of them yields
//! [`Outcome::Accepted`].

use std::borrow::Cow;
use std::sync::Arc;

use futures::{pin_mut, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{HookOptions, DEFAULT_MAX_BODY_BYTES};
use crate::web::headers::{
    non_empty, HeaderLookup, HeaderSet, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
};
use crate::web::signature::verify_signature;

/// Boxed transport error from a body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Types
// =============================================================================

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedEvent {
    /// Value of `X-GitHub-Event`
    pub event_type: String,
    /// Value of `X-GitHub-Delivery`
    pub delivery_id: String,
    /// Parsed request body
    pub payload: serde_json::Value,
    /// Request target (path and query) the delivery arrived on
    pub source_url: String,
}

/// Failure to buffer the request body.
#[derive(Debug, Error)]
pub enum BodyReadError {
    #[error(transparent)]
    Transport(BoxError),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Why a request on the webhook route was refused.
#[derive(Debug, Error)]
pub enum RejectionReason {
    #[error("No X-Hub-Signature found on request")]
    MissingSignature,

    #[error("No X-Github-Event found on request")]
    MissingEventType,

    #[error("No X-Github-Delivery found on request")]
    MissingDeliveryId,

    #[error("X-Hub-Signature does not match blob signature")]
    SignatureMismatch,

    #[error(transparent)]
    BodyReadFailure(#[from] BodyReadError),

    #[error(transparent)]
    MalformedJson(#[from] serde_json::Error),
}

impl RejectionReason {
    /// Stable snake_case name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectionReason::MissingSignature => "missing_signature",
            RejectionReason::MissingEventType => "missing_event_type",
            RejectionReason::MissingDeliveryId => "missing_delivery_id",
            RejectionReason::SignatureMismatch => "signature_mismatch",
            RejectionReason::BodyReadFailure(_) => "body_read_failure",
            RejectionReason::MalformedJson(_) => "malformed_json",
        }
    }
}

/// Result of verifying one request.
#[derive(Debug)]
pub enum Outcome {
    /// The request is for another route; the caller should keep routing it.
    NotMine,
    /// The request is for this route but failed verification.
    Rejected(RejectionReason),
    /// The request is authentic and well-formed.
    Accepted(VerifiedEvent),
}

impl Outcome {
    /// `None` for [`Outcome::NotMine`], otherwise the verification result.
    pub fn into_result(self) -> Option<Result<VerifiedEvent, RejectionReason>> {
        match self {
            Outcome::NotMine => None,
            Outcome::Rejected(reason) => Some(Err(reason)),
            Outcome::Accepted(event) => Some(Ok(event)),
        }
    }

    pub fn is_not_mine(&self) -> bool {
        matches!(self, Outcome::NotMine)
    }
}

/// Read-only view of an inbound request.
///
/// `body` yields chunks of the raw request body in order.
#[derive(Debug)]
pub struct IncomingRequest<B, H = HeaderSet> {
    pub url: String,
    pub headers: H,
    pub body: B,
}

impl<B, H> IncomingRequest<B, H> {
    pub fn new(url: impl Into<String>, headers: H, body: B) -> Self {
        Self {
            url: url.into(),
            headers,
            body,
        }
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// Stateless verifier for one webhook route.
///
/// Cloning is cheap; all clones share the same immutable options.
#[derive(Debug, Clone)]
pub struct Verifier {
    options: Arc<HookOptions>,
    max_body_bytes: usize,
}

impl Verifier {
    pub fn new(options: HookOptions) -> Self {
        Self {
            options: Arc::new(options),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Limit the number of body bytes buffered per request.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn options(&self) -> &HookOptions {
        &self.options
    }

    /// Whether `url` is exactly this verifier's route.
    ///
    /// `url` is the full request target, so a query string never matches a
    /// route configured without one.
    pub fn matches_route(&self, url: &str) -> bool {
        url == self.options.path()
    }

    /// Verify one request.
    ///
    /// The body is only read when the route matches and all identifying
    /// headers are present.
    pub async fn verify<B, C, E, H>(&self, request: IncomingRequest<B, H>) -> Outcome
    where
        B: Stream<Item = Result<C, E>>,
        C: AsRef<[u8]>,
        E: Into<BoxError>,
        H: HeaderLookup,
    {
        let IncomingRequest { url, headers, body } = request;

        if !self.matches_route(&url) {
            debug!(url = %url, route = %self.options.path(), "webhook_route_not_matched");
            return Outcome::NotMine;
        }

        let (signature, event_type, delivery_id) = match required_headers(&headers) {
            Ok(values) => values,
            Err(reason) => return rejected(reason, None),
        };

        let data = match read_body(body, self.max_body_bytes).await {
            Ok(data) => data,
            Err(e) => return rejected(e.into(), Some(&*delivery_id)),
        };

        match self.check(&url, &signature, &event_type, &delivery_id, &data) {
            Ok(event) => {
                info!(
                    event_type = %event.event_type,
                    delivery_id = %event.delivery_id,
                    body_length = data.len(),
                    "webhook_verified"
                );
                Outcome::Accepted(event)
            }
            Err(reason) => rejected(reason, Some(&*delivery_id)),
        }
    }

    /// Signature check and JSON parse over a fully buffered body.
    fn check(
        &self,
        url: &str,
        signature: &str,
        event_type: &str,
        delivery_id: &str,
        data: &[u8],
    ) -> Result<VerifiedEvent, RejectionReason> {
        // Signed over the raw bytes, before any parsing
        if !verify_signature(self.options.secret(), data, signature) {
            return Err(RejectionReason::SignatureMismatch);
        }

        let payload = serde_json::from_slice(data)?;

        Ok(VerifiedEvent {
            event_type: event_type.to_string(),
            delivery_id: delivery_id.to_string(),
            payload,
            source_url: url.to_string(),
        })
    }
}

/// Fetch the signature, event and delivery headers, in that order.
fn required_headers<H>(
    headers: &H,
) -> Result<(Cow<'_, str>, Cow<'_, str>, Cow<'_, str>), RejectionReason>
where
    H: HeaderLookup + ?Sized,
{
    let signature =
        non_empty(headers, SIGNATURE_HEADER).ok_or(RejectionReason::MissingSignature)?;
    let event_type = non_empty(headers, EVENT_HEADER).ok_or(RejectionReason::MissingEventType)?;
    let delivery_id =
        non_empty(headers, DELIVERY_HEADER).ok_or(RejectionReason::MissingDeliveryId)?;

    Ok((signature, event_type, delivery_id))
}

/// Drain a body stream into one buffer, failing once `limit` bytes are exceeded.
pub async fn read_body<B, C, E>(body: B, limit: usize) -> Result<Vec<u8>, BodyReadError>
where
    B: Stream<Item = Result<C, E>>,
    C: AsRef<[u8]>,
    E: Into<BoxError>,
{
    pin_mut!(body);

    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| BodyReadError::Transport(e.into()))?;
        let chunk = chunk.as_ref();

        if data.len() + chunk.len() > limit {
            return Err(BodyReadError::TooLarge { limit });
        }
        data.extend_from_slice(chunk);
    }

    Ok(data)
}

fn rejected(reason: RejectionReason, delivery_id: Option<&str>) -> Outcome {
    warn!(
        reason = reason.kind(),
        delivery_id = delivery_id.unwrap_or_default(),
        error = %reason,
        "webhook_rejected"
    );
    Outcome::Rejected(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::signature::{sign_blob, SIGNATURE_PREFIX};
    use futures::stream;
    use serde_json::json;
    use std::io;

    const BODY: &str = r#"{"some":"github","object":"with","properties":true}"#;

    fn verifier(path: &str) -> Verifier {
        Verifier::new(HookOptions::new(path, "bogus").unwrap())
    }

    fn body(data: &str) -> impl Stream<Item = Result<Vec<u8>, io::Error>> {
        stream::iter(vec![Ok(data.as_bytes().to_vec())])
    }

    fn signed_headers(event: &str, data: &str) -> HeaderSet {
        [
            (SIGNATURE_HEADER, sign_blob("bogus", data.as_bytes()).unwrap()),
            (EVENT_HEADER, event.to_string()),
            (DELIVERY_HEADER, "bogus".to_string()),
        ]
        .into_iter()
        .collect()
    }

    fn bogus_headers() -> HeaderSet {
        [
            (SIGNATURE_HEADER, "bogus"),
            (EVENT_HEADER, "bogus"),
            (DELIVERY_HEADER, "bogus"),
        ]
        .into_iter()
        .collect()
    }

    async fn verify_with(v: &Verifier, url: &str, headers: HeaderSet, data: &str) -> Outcome {
        v.verify(IncomingRequest::new(url, headers, body(data))).await
    }

    #[tokio::test]
    async fn test_ignores_other_routes() {
        let v = verifier("/some/url");

        for url in ["/", "/some/url/", "/some"] {
            let outcome = verify_with(&v, url, bogus_headers(), BODY).await;
            assert!(outcome.is_not_mine(), "{} should not match", url);
            assert!(outcome.into_result().is_none());
        }
    }

    #[tokio::test]
    async fn test_not_mine_does_not_read_body() {
        let v = verifier("/some/url");
        let failing = stream::iter(vec![Err::<Vec<u8>, _>(io::Error::other("boom"))]);

        let outcome = v
            .verify(IncomingRequest::new("/other", bogus_headers(), failing))
            .await;
        assert!(outcome.is_not_mine());
    }

    #[tokio::test]
    async fn test_matching_route_with_bad_signature_is_rejected() {
        let v = verifier("/some/url");
        let outcome = verify_with(&v, "/some/url", bogus_headers(), BODY).await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectionReason::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_accepts_signed_blob() {
        let v = verifier("/");
        let outcome = verify_with(&v, "/", signed_headers("push", BODY), BODY).await;

        match outcome {
            Outcome::Accepted(event) => {
                assert_eq!(
                    event,
                    VerifiedEvent {
                        event_type: "push".to_string(),
                        delivery_id: "bogus".to_string(),
                        payload: json!({"some": "github", "object": "with", "properties": true}),
                        source_url: "/".to_string(),
                    }
                );
            }
            other => panic!("Expected Accepted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepts_signed_blob_with_alt_event() {
        let v = verifier("/");
        let outcome = verify_with(&v, "/", signed_headers("issue", BODY), BODY).await;

        let event = outcome.into_result().unwrap().unwrap();
        assert_eq!(event.event_type, "issue");
        assert_eq!(event.delivery_id, "bogus");
        assert_eq!(event.source_url, "/");
    }

    #[tokio::test]
    async fn test_accepts_body_split_across_chunks() {
        let v = verifier("/");
        let (head, tail) = BODY.split_at(10);
        let chunks = stream::iter(vec![
            Ok::<_, io::Error>(head.as_bytes().to_vec()),
            Ok(Vec::new()),
            Ok(tail.as_bytes().to_vec()),
        ]);

        let outcome = v
            .verify(IncomingRequest::new("/", signed_headers("push", BODY), chunks))
            .await;
        assert!(matches!(outcome, Outcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_rejects_badly_signed_blob() {
        let v = verifier("/");
        let mut headers = signed_headers("push", BODY);
        let signature = sign_blob("bogus", BODY.as_bytes()).unwrap();
        // Break the first hex digit of the digest
        let at = SIGNATURE_PREFIX.len();
        let flipped = if &signature[at..at + 1] == "0" { "1" } else { "0" };
        headers.insert(
            SIGNATURE_HEADER,
            format!("{}{}{}", &signature[..at], flipped, &signature[at + 1..]),
        );

        let outcome = verify_with(&v, "/", headers, BODY).await;
        match outcome {
            Outcome::Rejected(reason) => {
                assert_eq!(
                    reason.to_string(),
                    "X-Hub-Signature does not match blob signature"
                );
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_signature_from_other_secret() {
        let v = verifier("/");
        let mut headers = signed_headers("push", BODY);
        headers.insert(SIGNATURE_HEADER, sign_blob("other", BODY.as_bytes()).unwrap());

        let outcome = verify_with(&v, "/", headers, BODY).await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectionReason::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_rejects_missing_headers_in_order() {
        let v = verifier("/");

        let mut headers = signed_headers("push", BODY);
        headers.remove(SIGNATURE_HEADER);
        headers.remove(EVENT_HEADER);
        let outcome = verify_with(&v, "/", headers, BODY).await;
        match outcome {
            Outcome::Rejected(reason) => {
                assert!(matches!(reason, RejectionReason::MissingSignature));
                assert_eq!(reason.to_string(), "No X-Hub-Signature found on request");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }

        let mut headers = signed_headers("push", BODY);
        headers.remove(EVENT_HEADER);
        headers.remove(DELIVERY_HEADER);
        let outcome = verify_with(&v, "/", headers, BODY).await;
        match outcome {
            Outcome::Rejected(reason) => {
                assert!(matches!(reason, RejectionReason::MissingEventType));
                assert_eq!(reason.to_string(), "No X-Github-Event found on request");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }

        let mut headers = signed_headers("push", BODY);
        headers.remove(DELIVERY_HEADER);
        let outcome = verify_with(&v, "/", headers, BODY).await;
        match outcome {
            Outcome::Rejected(reason) => {
                assert!(matches!(reason, RejectionReason::MissingDeliveryId));
                assert_eq!(reason.to_string(), "No X-Github-Delivery found on request");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_header_counts_as_missing() {
        let v = verifier("/");
        let mut headers = signed_headers("push", BODY);
        headers.insert(EVENT_HEADER, "");

        let outcome = verify_with(&v, "/", headers, BODY).await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectionReason::MissingEventType)
        ));
    }

    #[tokio::test]
    async fn test_header_names_are_case_insensitive() {
        let v = verifier("/");
        let headers: HeaderSet = [
            ("X-Hub-Signature", sign_blob("bogus", BODY.as_bytes()).unwrap()),
            ("X-GitHub-Event", "push".to_string()),
            ("X-GitHub-Delivery", "bogus".to_string()),
        ]
        .into_iter()
        .collect();

        let outcome = verify_with(&v, "/", headers, BODY).await;
        assert!(matches!(outcome, Outcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_json() {
        let v = verifier("/");
        let data = "{";
        let parse_error = serde_json::from_str::<serde_json::Value>(data).unwrap_err();

        let outcome = verify_with(&v, "/", signed_headers("push", data), data).await;
        match outcome {
            Outcome::Rejected(reason @ RejectionReason::MalformedJson(_)) => {
                // Parser message passes through unchanged
                assert_eq!(reason.to_string(), parse_error.to_string());
            }
            other => panic!("Expected MalformedJson, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_body_read_failure() {
        let v = verifier("/");
        let chunks = stream::iter(vec![
            Ok(BODY.as_bytes().to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
        ]);

        let outcome = v
            .verify(IncomingRequest::new("/", signed_headers("push", BODY), chunks))
            .await;
        match outcome {
            Outcome::Rejected(reason @ RejectionReason::BodyReadFailure(_)) => {
                assert_eq!(reason.to_string(), "connection reset");
            }
            other => panic!("Expected BodyReadFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let v = verifier("/").with_max_body_bytes(8);

        let outcome = verify_with(&v, "/", signed_headers("push", BODY), BODY).await;
        match outcome {
            Outcome::Rejected(RejectionReason::BodyReadFailure(BodyReadError::TooLarge {
                limit,
            })) => assert_eq!(limit, 8),
            other => panic!("Expected TooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_body_exact_limit() {
        let data = read_body(body("12345678"), 8).await.unwrap();
        assert_eq!(data, b"12345678");
    }

    #[test]
    fn test_rejection_kinds() {
        assert_eq!(RejectionReason::MissingSignature.kind(), "missing_signature");
        assert_eq!(RejectionReason::SignatureMismatch.kind(), "signature_mismatch");
        assert_eq!(
            RejectionReason::from(BodyReadError::TooLarge { limit: 1 }).kind(),
            "body_read_failure"
        );
    }
}
