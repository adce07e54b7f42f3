use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use surge_runner::prelude::*;

const HTTP_REQ_DURATION: &str = "http_req_duration";
const HTTP_REQ_FAILED: &str = "http_req_failed";

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_TEAM_NAME: &str = "load-team";

/// (id, name, active). The inactive user checks that reviewers are filtered by activity.
const USERS: [(&str, &str, bool); 5] = [
    ("load-u1", "Load Alice", true),
    ("load-u2", "Load Bob", true),
    ("load-u3", "Load Carol", true),
    ("load-u4", "Load Dave", true),
    ("load-u5", "Load Eve", false),
];

#[derive(Debug, Default)]
struct ScenarioValues {
    client: reqwest::Client,
    base_url: String,
    author: String,
    reviewers: Vec<String>,
}

impl UserValuesConstraint for ScenarioValues {}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    pr: Option<PullRequest>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    #[serde(default)]
    assigned_reviewers: Vec<String>,
}

fn setup(ctx: &mut RunnerContext<ScenarioValues>) -> HookResult {
    let base_url = std::env::var("SURGE_BASE_URL")
        .ok()
        .or_else(|| ctx.connection_string().map(|s| s.to_string()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let team_name =
        std::env::var("SURGE_TEAM_NAME").unwrap_or_else(|_| DEFAULT_TEAM_NAME.to_string());

    let members = USERS
        .iter()
        .map(|(id, name, active)| {
            json!({
                "user_id": id,
                "username": name,
                "is_active": active,
            })
        })
        .collect::<Vec<_>>();

    let client = ctx.get().client.clone();
    let url = format!("{base_url}/team/add");
    let (status, body) = ctx.executor().execute_in_place(async move {
        let response = client
            .post(url)
            .json(&json!({ "team_name": team_name, "members": members }))
            .send()
            .await
            .context("Failed to register team")?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    })?;

    // The team already exists if this is not the first run against the service.
    if status != StatusCode::CREATED && status != StatusCode::BAD_REQUEST {
        anyhow::bail!("team/add failed: {status} {body}");
    }

    log::info!("Registered team with {} members at {base_url}", USERS.len());

    let values = ctx.get_mut();
    values.base_url = base_url;
    values.author = USERS[0].0.to_string();
    values.reviewers = USERS[1..4].iter().map(|(id, _, _)| id.to_string()).collect();

    Ok(())
}

/// Send a request and record its duration and whether it failed. Statuses of 400 and above count
/// as failed requests, as do transport errors.
async fn send(
    ctx: &IterationContext<ScenarioValues>,
    request: RequestBuilder,
) -> anyhow::Result<Response> {
    let start = Instant::now();
    let result = request.send().await;
    ctx.record_trend(HTTP_REQ_DURATION, start.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(response) => {
            ctx.record_rate(
                HTTP_REQ_FAILED,
                response.status().is_client_error() || response.status().is_server_error(),
            );
            Ok(response)
        }
        Err(e) => {
            ctx.record_rate(HTTP_REQ_FAILED, true);
            Err(e.into())
        }
    }
}

fn unique_id(prefix: &str, ctx: &IterationContext<ScenarioValues>) -> String {
    format!(
        "{prefix}-{}-{}-{}",
        ctx.scenario_iteration(),
        chrono::Utc::now().timestamp_millis(),
        nanoid::nanoid!(8)
    )
}

/// Rotate through the reviewers by the iteration number within the scenario.
fn reviewer_for(reviewers: &[String], scenario_iteration: u64) -> Option<&str> {
    if reviewers.is_empty() {
        return None;
    }
    let index = (scenario_iteration % reviewers.len() as u64) as usize;
    Some(&reviewers[index])
}

async fn create_pull_request(
    ctx: &IterationContext<ScenarioValues>,
    pr_id: &str,
    name_prefix: &str,
) -> anyhow::Result<Response> {
    let values = ctx.get();
    let request = values
        .client
        .post(format!("{}/pullRequest/create", values.base_url))
        .json(&json!({
            "pull_request_id": pr_id,
            "pull_request_name": format!("{name_prefix}-{pr_id}"),
            "author_id": values.author,
        }));

    send(ctx, request).await
}

async fn create_pr(ctx: IterationContext<ScenarioValues>) -> HookResult {
    let pr_id = unique_id("pr-create", &ctx);
    let response = create_pull_request(&ctx, &pr_id, "feature").await?;

    ctx.check("create status is 201", response.status() == StatusCode::CREATED);
    let body = response.json::<PullRequestResponse>().await;
    ctx.check("create has reviewers array", body.is_ok());

    Ok(())
}

async fn reassign_merge(ctx: IterationContext<ScenarioValues>) -> HookResult {
    let pr_id = unique_id("pr-reassign", &ctx);
    let response = create_pull_request(&ctx, &pr_id, "bugfix").await?;
    if response.status() != StatusCode::CREATED {
        ctx.check("create before reassign ok", false);
        return Ok(());
    }

    let assigned = response
        .json::<PullRequestResponse>()
        .await
        .ok()
        .and_then(|body| body.pr)
        .map(|pr| pr.assigned_reviewers)
        .unwrap_or_default();
    let Some(old_reviewer) = assigned.first() else {
        return Ok(());
    };

    let values = ctx.get();
    let reassign = send(
        &ctx,
        values
            .client
            .post(format!("{}/pullRequest/reassign", values.base_url))
            .json(&json!({
                "pull_request_id": pr_id,
                "old_user_id": old_reviewer,
            })),
    )
    .await?;
    ctx.check("reassign status 200", reassign.status() == StatusCode::OK);

    let merge = send(
        &ctx,
        values
            .client
            .post(format!("{}/pullRequest/merge", values.base_url))
            .json(&json!({ "pull_request_id": pr_id })),
    )
    .await?;
    ctx.check("merge status 200", merge.status() == StatusCode::OK);
    let body = merge.json::<PullRequestResponse>().await;
    ctx.check("merge returns reviewers", body.is_ok());

    Ok(())
}

async fn get_review(ctx: IterationContext<ScenarioValues>) -> HookResult {
    let values = ctx.get();
    let Some(reviewer) = reviewer_for(&values.reviewers, ctx.scenario_iteration()) else {
        anyhow::bail!("No reviewers were registered by setup");
    };

    let response = send(
        &ctx,
        values
            .client
            .get(format!("{}/users/getReview", values.base_url))
            .query(&[("user_id", reviewer)]),
    )
    .await?;
    ctx.check("getReview status 200", response.status() == StatusCode::OK);

    // Think time
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}

fn main() -> SurgeResult<ExitCode> {
    let builder = RunDefinitionBuilder::<ScenarioValues>::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_connection_string(DEFAULT_BASE_URL)
        .use_setup(setup)
        .use_named_behaviour("create_pr", create_pr)
        .use_named_behaviour("reassign_merge", reassign_merge)
        .use_named_behaviour("get_review", get_review)
        .add_scenario(
            "create_pr",
            "create_pr",
            ExecutorPolicy::constant_arrival_rate(5.0, Duration::from_secs(60), 10),
        )
        .add_scenario(
            "reassign_merge",
            "reassign_merge",
            ExecutorPolicy::ramping_arrival_rate(
                1.0,
                vec![
                    Stage::new(5.0, Duration::from_secs(30)),
                    Stage::new(5.0, Duration::from_secs(60)),
                    Stage::new(1.0, Duration::from_secs(30)),
                ],
                15,
            )
            .with_max_vus(30),
        )
        .add_scenario(
            "get_review",
            "get_review",
            ExecutorPolicy::constant_vus(10, Duration::from_secs(90)),
        )
        .add_threshold(HTTP_REQ_FAILED, &["rate<0.01"], false)
        .add_threshold(HTTP_REQ_DURATION, &["p(95)<200"], false)
        .add_capture_env("SURGE_BASE_URL")
        .add_capture_env("SURGE_TEAM_NAME");

    let summary = run(builder)?;

    Ok(ExitCode::from(summary.exit_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewers_rotate_by_scenario_iteration() {
        let reviewers = USERS[1..4]
            .iter()
            .map(|(id, _, _)| id.to_string())
            .collect::<Vec<_>>();

        let picked = (0..6)
            .filter_map(|i| reviewer_for(&reviewers, i))
            .collect::<Vec<_>>();
        assert_eq!(
            vec!["load-u2", "load-u3", "load-u4", "load-u2", "load-u3", "load-u4"],
            picked
        );
        assert_eq!(None, reviewer_for(&[], 7));
    }
}
