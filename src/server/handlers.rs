use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AppError, AppState};
use crate::{
    core::{self, answer_poll, overview, parse_form, sweep, Poll},
    store,
};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IndexParams {
    tree: Option<String>,
    master: Option<String>,
    branch: Option<String>,
    buildername: Option<String>,
    builddir: Option<String>,
    slave: Option<String>,
}

impl IndexParams {
    fn is_poll(&self) -> bool {
        self.master.is_some()
            || self.branch.is_some()
            || self.buildername.is_some()
            || self.builddir.is_some()
            || self.slave.is_some()
    }

    fn into_poll(self) -> Result<Poll, AppError> {
        fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::BadRequest(format!("Missing poll parameter '{}'", name)))
        }
        let builddir = required(self.builddir, "builddir")?;
        Ok(Poll {
            master: required(self.master, "master")?,
            branch: required(self.branch, "branch")?,
            buildername: self
                .buildername
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| builddir.clone()),
            slave: required(self.slave, "slave")?,
            builddir,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CleanupParams {
    pass: Option<String>,
}

/// Runs store work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn identity(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get(state.config.identity_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) async fn index_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<IndexParams>,
) -> Result<Response, AppError> {
    if let Some(tree) = params.tree {
        return tree_handler(state, tree).await;
    }
    if params.is_poll() {
        return poll_handler(state, params.into_poll()?).await;
    }
    let who = identity(&state, &headers);
    page_handler(state, who).await
}

async fn tree_handler(state: AppState, tree: String) -> Result<Response, AppError> {
    let store = state.store.clone();
    let name = tree.clone();
    let found = blocking(move || {
        let mut connection = store.get_connection()?;
        Ok(store::tree_get(&mut connection, &name)?)
    })
    .await?;
    match found {
        Some(record) => Ok(record.lastclobber.unwrap_or_default().into_response()),
        None => {
            warn!("Unknown tree '{}' requested", tree);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Couldn't get last clobber time for {}", tree),
            )
                .into_response())
        }
    }
}

async fn poll_handler(state: AppState, poll: Poll) -> Result<Response, AppError> {
    let store = state.store.clone();
    let instructions = blocking(move || {
        let mut connection = store.get_connection()?;
        let instructions = answer_poll(&mut connection, &poll, Utc::now().timestamp())?;
        debug!(
            "Poll from {} on {} for {}: {} instruction(s)",
            poll.slave,
            poll.master,
            poll.builddir,
            instructions.len()
        );
        Ok(instructions)
    })
    .await?;
    let body = instructions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(body.into_response())
}

async fn page_handler(state: AppState, who: Option<String>) -> Result<Response, AppError> {
    let store = state.store.clone();
    let view = blocking(move || {
        let mut connection = store.get_connection()?;
        Ok(overview(&mut connection)?)
    })
    .await?;
    let may_broadcast = who
        .as_deref()
        .map_or(false, |who| state.policy.may_broadcast(who));

    let mut context = tera::Context::from_serialize(&view)?;
    context.insert("who", &who);
    context.insert("may_broadcast", &may_broadcast);
    let page = state.templates.render("index.html", &context)?;
    Ok(Html(page).into_response())
}

pub(crate) async fn submit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let who = identity(&state, &headers).ok_or_else(|| {
        AppError::Unauthorized(format!(
            "Missing identity header '{}'",
            state.config.identity_header
        ))
    })?;
    let commands = parse_form(&fields)?;

    let store = state.store.clone();
    let policy = state.policy.clone();
    let release_prefix = state.config.release_prefix.clone();
    let summary = blocking(move || {
        let mut connection = store.get_connection()?;
        Ok(core::submit(
            &mut connection,
            policy.as_ref(),
            &release_prefix,
            &who,
            &commands,
            Utc::now(),
        )?)
    })
    .await?;
    debug!("Submitted {:?}", summary);
    Ok(Redirect::to(uri.path()).into_response())
}

pub(crate) async fn cleanup_handler(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Response, AppError> {
    let authorized = match (&state.config.cleanup_password, &params.pass) {
        (Some(expected), Some(given)) => expected == given,
        _ => false,
    };
    if !authorized {
        warn!("Rejected maintenance request");
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, "no.").into_response());
    }

    let store = state.store.clone();
    let retention = state.config.retention();
    let release_prefix = state.config.release_prefix.clone();
    let report = blocking(move || {
        let mut connection = store.get_connection()?;
        Ok(sweep(
            &mut connection,
            Utc::now().timestamp(),
            retention,
            &release_prefix,
        )?)
    })
    .await?;
    Ok(report.to_string().into_response())
}
