//! PaySuite HTTP client.
//!
//! ```text
//! POST {base}/payments        -> { "status": "success", "data": { "id", "checkout_url", .. } }
//! GET  {base}/payments/{id}   -> { "status": "success", "data": { "id", "transaction": { "status" } } }
//! ```

use super::{
    json_id, CreatedPayment, PaymentProvider, PaymentRequest, ProviderError, ProviderFuture,
    ProviderResult, RemotePaymentState,
};
use crate::config::ProviderConfig;
use crate::metrics;
use crate::types::PaymentMethod;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    amount: String,
    reference: &'a str,
    description: &'a str,
    return_url: &'a str,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
}

/// PaySuite API client.
#[derive(Clone, Debug)]
pub struct PaySuiteClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl PaySuiteClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ticketing/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// API URL with `segments` appended as escaped path segments, so a
    /// provider ID cannot change the request path.
    fn endpoint(&self, segments: &[&str]) -> ProviderResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.api_base)
            .map_err(|e| ProviderError::Transport(format!("invalid PaySuite API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::Transport("PaySuite API base cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn create(&self, request: PaymentRequest) -> ProviderResult<CreatedPayment> {
        let token = self.config.api_token()?;
        let url = self.endpoint(&["payments"])?;
        let body = CreatePaymentBody {
            amount: request.amount.to_decimal_string(),
            reference: request.reference.as_str(),
            description: &request.description,
            return_url: &request.return_url,
            callback_url: &request.callback_url,
            method: request.method.as_ref().map(PaymentMethod::as_str),
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .timeout(self.config.create_timeout())
            .send()
            .await
            .map_err(transport_error)?;

        let data = read_envelope(response, &[StatusCode::OK, StatusCode::CREATED]).await?;
        let provider_id = json_id(data.get("id"))
            .ok_or_else(|| ProviderError::InvalidResponse("missing data.id".to_string()))?;
        let checkout_url = data
            .get("checkout_url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        tracing::info!(
            reference = %request.reference,
            provider_id = %provider_id,
            has_checkout = checkout_url.is_some(),
            "PaySuite payment request created"
        );

        Ok(CreatedPayment {
            provider_id,
            checkout_url,
            raw: data,
        })
    }

    async fn fetch(&self, provider_id: String) -> ProviderResult<RemotePaymentState> {
        let token = self.config.api_token()?;
        let url = self.endpoint(&["payments", &provider_id])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.fetch_timeout())
            .send()
            .await
            .map_err(transport_error)?;

        let data = read_envelope(response, &[StatusCode::OK]).await?;
        tracing::debug!(provider_id = %provider_id, "PaySuite payment fetched");
        Ok(RemotePaymentState { raw: data })
    }
}

impl PaymentProvider for PaySuiteClient {
    fn create_payment_request(&self, request: PaymentRequest) -> ProviderFuture<'_, CreatedPayment> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.create(request).await;
            observe("create", &result, started.elapsed());
            result
        })
    }

    fn fetch_payment_state(&self, provider_id: String) -> ProviderFuture<'_, RemotePaymentState> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.fetch(provider_id).await;
            observe("fetch", &result, started.elapsed());
            result
        })
    }
}

fn observe<T>(operation: &'static str, result: &ProviderResult<T>, elapsed: Duration) {
    let label = match result {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(operation, error = %e, "PaySuite request failed");
            e.kind()
        }
    };
    metrics::record_provider_request(operation, label, elapsed.as_secs_f64());
}

fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(error.to_string())
    }
}

/// Unwrap `{ "status": "success", "data": {..} }`, returning `data`.
async fn read_envelope(response: reqwest::Response, accepted: &[StatusCode]) -> ProviderResult<Value> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport_error)?;
    let body: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    let succeeded = body.get("status").and_then(Value::as_str) == Some("success");
    if !accepted.contains(&status) || !succeeded {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("PaySuite error ({})", status.as_u16()), str::to_string);
        return Err(ProviderError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    match body.get("data") {
        Some(data @ Value::Object(_)) => Ok(data.clone()),
        _ => Err(ProviderError::InvalidResponse("missing data object".to_string())),
    }
}
