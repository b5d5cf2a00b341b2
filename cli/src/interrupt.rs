// sluice-cli/src/interrupt.rs

//! Ctrl-C handling. The first interrupt cancels the run so the session is
//! still released; a second one abandons the release.

use sluice::RunContext;
use std::future::Future;
use tracing::warn;

/// Exit status after a second interrupt, as a shell reports SIGINT.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Cancels `ctx` on the first interrupt from `next_interrupt` and returns
/// `true` on the second. Returns `false` if the signal source fails.
pub async fn watch<F, Fut>(ctx: RunContext, mut next_interrupt: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: Future<Output = std::io::Result<()>>,
{
  if next_interrupt().await.is_err() {
    return false;
  }
  warn!("interrupt received, cancelling pipeline (interrupt again to exit now)");
  ctx.cancel();

  if next_interrupt().await.is_err() {
    return false;
  }
  warn!("second interrupt received, exiting without releasing the session");
  true
}
