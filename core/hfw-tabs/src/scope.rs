use clap::Args;
use std::sync::Arc;

use hfw_session::{CookieScope, FileSharedStore, LivenessConfig, PageLifecycle, SessionIdentity};

/// Cookie scope flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Cookie domain of the session
    #[arg(long, default_value = "localhost")]
    pub domain: String,

    /// Cookie path of the session
    #[arg(long, default_value = "/")]
    pub path: String,
}

impl SessionIdentity for ScopeArgs {
    fn cookie_path(&self) -> String {
        self.path.clone()
    }

    fn cookie_domain(&self) -> String {
        self.domain.clone()
    }
}

impl ScopeArgs {
    pub fn page(&self) -> PageLifecycle {
        PageLifecycle::on_init(self)
    }
}

pub fn open_store(
    config: &LivenessConfig,
    scope: &CookieScope,
) -> Result<Arc<FileSharedStore>, String> {
    let store_dir = config.resolve_store_dir()?;
    Ok(Arc::new(FileSharedStore::new(
        &store_dir,
        scope,
        config.lock_timeout(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        scope: ScopeArgs,
    }

    #[test]
    fn defaults_to_root_of_localhost() {
        let harness = Harness::parse_from(["hfw-tabs"]);
        let page = harness.scope.page();
        assert_eq!(page.scope(), &CookieScope::new("/", "localhost"));
    }

    #[test]
    fn explicit_scope_keys_the_store() {
        let temp = tempfile::tempdir().unwrap();
        let config = LivenessConfig {
            store_dir: Some(temp.path().to_path_buf()),
            ..LivenessConfig::default()
        };
        let harness =
            Harness::parse_from(["hfw-tabs", "--domain", "example.com", "--path", "/hfw"]);
        let scope = harness.scope.page().scope().clone();

        let store = open_store(&config, &scope).unwrap();
        assert_eq!(
            store.data_path(),
            temp.path().join(format!("{}.json", scope.storage_key()))
        );
    }
}
