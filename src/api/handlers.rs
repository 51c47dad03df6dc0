//! Request handlers: payload parsing and task dispatch.

use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::normalize::coerce::{coerce_i64, coerce_string};
use crate::reconcile::ReconcileOptions;
use crate::tasks::{PerformanceSelector, Pipeline};
use crate::util::env::env_req;

/// Merge the request into one JSON object: a non-empty body is parsed as
/// JSON, otherwise the query string's pairs become string fields.
pub fn payload_from_request(req: &HttpRequest, body: &[u8]) -> Result<Value> {
    if !body.is_empty() {
        return serde_json::from_slice(body).context("parsing request body as JSON");
    }
    let mut object = Map::new();
    for (key, value) in url::form_urlencoded::parse(req.query_string().as_bytes()) {
        object.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    Ok(Value::Object(object))
}

/// A payload field, or the equivalent environment variable when absent.
fn field_or_env(payload: &Value, field: &str, env_key: &str) -> Result<i64> {
    match payload.get(field) {
        Some(value) if !value.is_null() => coerce_i64(field, value),
        _ => env_req(env_key)?
            .parse()
            .with_context(|| format!("parsing env {env_key}")),
    }
}

fn selector_from(payload: &Value) -> Result<PerformanceSelector> {
    match payload.get("performance_id") {
        Some(value) if !value.is_null() => coerce_string("performance_id", value)?.parse(),
        _ => env_req("PERFORMANCE_ID")?.parse(),
    }
}

/// Run the named task. Shared by the HTTP handler and the CLI.
pub async fn run_task(payload: &Value) -> Result<()> {
    let task_name = coerce_string(
        "task_name",
        payload
            .get("task_name")
            .ok_or_else(|| anyhow!("payload missing task_name"))?,
    )?;
    if payload
        .get("secret_function")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        info!("no secret hook is built in; running the task normally");
    }

    let pipeline = Pipeline::from_env()?;
    match task_name.as_str() {
        "seats" => {
            let selector = selector_from(payload)?;
            let performance_id = pipeline.resolve_performance_id(selector).await?;
            let params = crate::fetch::QueryParams {
                performance_id,
                mode_of_sale_id: field_or_env(payload, "mode_of_sale_id", "MODE_OF_SALE_ID")?,
                constituent_id: field_or_env(payload, "constituent_id", "CONSTITUENT_ID")?,
                source_id: field_or_env(payload, "source_id", "SOURCE_ID")?,
            };
            pipeline
                .seats_task(&params, &ReconcileOptions::default())
                .await?;
        }
        "events" => {
            let save = !payload
                .get("dont_save")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            pipeline.events_task(save).await?;
        }
        other => return Err(anyhow!("task {other:?} not found")),
    }
    info!("execution finished");
    Ok(())
}

/// `POST /`: run a task, answer `"Pipeline Complete"`. Failures surface as
/// 500s with the error chain in the body.
pub async fn run_pipeline(req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let payload = match payload_from_request(&req, &body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "bad request payload");
            return HttpResponse::BadRequest().body(format!("{e:#}"));
        }
    };
    match run_task(&payload).await {
        Ok(()) => HttpResponse::Ok().body("Pipeline Complete"),
        Err(e) => {
            error!(error = %e, "task failed");
            HttpResponse::InternalServerError().body(format!("{e:#}"))
        }
    }
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use serde_json::json;

    #[test]
    fn json_body_wins_over_query_string() {
        let req = TestRequest::post().uri("/?task_name=events").to_http_request();
        let body = serde_json::to_vec(&json!({"task_name": "seats"})).unwrap();
        let payload = payload_from_request(&req, &body).unwrap();
        assert_eq!(payload["task_name"], "seats");
    }

    #[test]
    fn query_string_payloads_parse_as_string_fields() {
        let req = TestRequest::post()
            .uri("/?task_name=seats&performance_id=soonest_2&mode_of_sale_id=6")
            .to_http_request();
        let payload = payload_from_request(&req, b"").unwrap();
        assert_eq!(payload["task_name"], "seats");
        assert_eq!(payload["performance_id"], "soonest_2");
        // Numeric fields arrive as strings and still coerce.
        assert_eq!(coerce_i64("mode_of_sale_id", &payload["mode_of_sale_id"]).unwrap(), 6);
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let err = run_task(&json!({"task_name": "plot"})).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn missing_task_name_is_an_error() {
        let err = run_task(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("task_name"));
    }
}
