//! Host locale probe.

use tokio::process::Command;
use tracing::{info, warn};

use deckard_core::LocaleSet;

/// Lists the UTF-8 locales installed on the host with `locale -a`.
///
/// When the probe cannot run, every language is treated as available and
/// the worker falls back on its own if a locale turns out to be missing.
pub async fn probe_locales() -> LocaleSet {
    match Command::new("locale").arg("-a").output().await {
        Ok(out) if out.status.success() => {
            let set = LocaleSet::from_listing(&String::from_utf8_lossy(&out.stdout));
            info!(locales = set.len(), "Probed host locales");
            set
        }
        Ok(out) => {
            warn!(status = %out.status, "locale -a failed, accepting every language");
            LocaleSet::permissive()
        }
        Err(e) => {
            warn!(error = %e, "Could not run locale -a, accepting every language");
            LocaleSet::permissive()
        }
    }
}
