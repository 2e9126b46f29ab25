use std::time::Duration;

use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{state::AppState, tryon::repo_types::TryOnSession};

/// Sessions and their results are kept this long after creation.
pub const RETENTION: time::Duration = time::Duration::hours(24);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_deleted: u64,
    pub images_deleted: u64,
    pub failures: u64,
}

/// Sweeps immediately, then once per `SWEEP_INTERVAL`.
pub fn spawn(st: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_expired(&st, OffsetDateTime::now_utc()).await {
                Ok(report) if report == SweepReport::default() => debug!("nothing to sweep"),
                Ok(report) => info!(
                    sessions_deleted = report.sessions_deleted,
                    images_deleted = report.images_deleted,
                    failures = report.failures,
                    "expired sessions swept"
                ),
                Err(e) => error!(error = ?e, "sweep failed"),
            }
        }
    })
}

/// Deletes every session created before `now - RETENTION` along with its result image.
/// A failing session is logged and skipped.
pub async fn sweep_expired(st: &AppState, now: OffsetDateTime) -> anyhow::Result<SweepReport> {
    let expired = st.sessions.list_created_before(now - RETENTION).await?;
    let mut report = SweepReport::default();

    for session in expired {
        match remove_session(st, &session).await {
            Ok(images) => {
                report.sessions_deleted += 1;
                report.images_deleted += images;
            }
            Err(e) => {
                warn!(error = ?e, session_id = %session.session_id, "failed to sweep session");
                report.failures += 1;
            }
        }
    }
    Ok(report)
}

/// Result file first, then the session row, then the image row the row pointed at.
async fn remove_session(st: &AppState, session: &TryOnSession) -> anyhow::Result<u64> {
    let result = match session.result_image_id {
        Some(id) => st.images.find_by_id(id).await?,
        None => None,
    };
    if let Some(image) = &result {
        st.storage.delete_object(&image.storage_key).await?;
    }

    st.sessions.delete(session.id).await?;

    let Some(image) = result else {
        return Ok(0);
    };
    Ok(u64::from(st.images.delete(image.id).await?))
}
