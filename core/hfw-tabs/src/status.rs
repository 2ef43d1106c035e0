//! `status` and `reset`: inspect or clear a scope's shared session.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use hfw_session::{CookieScope, LivenessConfig, SharedSession, SharedStore};

use crate::scope::{self, ScopeArgs};

#[derive(Serialize)]
struct StatusReport<'a> {
    scope: &'a CookieScope,
    data_path: &'a Path,
    cookies: BTreeMap<&'static str, String>,
    session: &'a SharedSession,
}

pub fn run(config: &LivenessConfig, args: &ScopeArgs) -> Result<(), String> {
    let page = args.page();
    let store = scope::open_store(config, page.scope())?;
    let session = store.load()?;
    println!("{}", render(page.scope(), store.data_path(), &session)?);
    Ok(())
}

pub fn reset(config: &LivenessConfig, args: &ScopeArgs) -> Result<(), String> {
    let page = args.page();
    let store = scope::open_store(config, page.scope())?;
    store.clear()?;
    tracing::info!(domain = %page.scope().domain, path = %page.scope().path, "Shared session reset");
    println!(
        "Cleared shared session for {}{}",
        page.scope().domain,
        page.scope().path
    );
    Ok(())
}

fn render(scope: &CookieScope, data_path: &Path, session: &SharedSession) -> Result<String, String> {
    let report = StatusReport {
        scope,
        data_path,
        cookies: session.cookie_view().into_iter().collect(),
        session,
    };
    serde_json::to_string_pretty(&report)
        .map_err(|e| format!("Failed to serialize session status: {}", e))
}
