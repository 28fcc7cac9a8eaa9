//! GitHub event handlers.

use async_trait::async_trait;
use hookcatch_core::Delivery;
use serde_json::Value;
use tracing::info;

use super::{as_object, field_or_unknown};
use crate::processor::WebhookHandler;

/// Logs repository, branch and commit count of a push.
pub struct PushHandler;

impl PushHandler {
    fn branch(payload: &Value) -> String {
        let git_ref = field_or_unknown(payload.get("ref"));
        git_ref.strip_prefix("refs/heads/").map(str::to_string).unwrap_or(git_ref)
    }
}

#[async_trait]
impl WebhookHandler for PushHandler {
    fn name(&self) -> &'static str {
        "github_push"
    }

    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let payload = as_object(&delivery.payload)?;
        let repository =
            field_or_unknown(payload.get("repository").and_then(|r| r.get("full_name")));
        let commits = payload.get("commits").and_then(Value::as_array).map_or(0, Vec::len);

        info!(
            delivery_id = %delivery.id,
            repository = %repository,
            branch = %Self::branch(&delivery.payload),
            commits,
            "github push received"
        );
        Ok(())
    }
}

/// Logs number, action and title of a pull request event.
pub struct PullRequestHandler;

#[async_trait]
impl WebhookHandler for PullRequestHandler {
    fn name(&self) -> &'static str {
        "github_pull_request"
    }

    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let payload = as_object(&delivery.payload)?;
        let pull_request = payload.get("pull_request");

        info!(
            delivery_id = %delivery.id,
            number = %field_or_unknown(pull_request.and_then(|pr| pr.get("number"))),
            action = %field_or_unknown(payload.get("action")),
            title = %field_or_unknown(pull_request.and_then(|pr| pr.get("title"))),
            "github pull request event"
        );
        Ok(())
    }
}
