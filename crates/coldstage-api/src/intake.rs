//! Job intake: admission checks in front of the job store.
//!
//! Order matters: blacklist first, then the resubmission throttle, then the
//! insert. The insert doubles as the queue publish, so an accepted request
//! is visible to workers atomically.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use coldstage_core::{load_optional_list, Error, IntakeConfig, JobStore, Result};

pub struct IntakeService {
    jobs: Arc<dyn JobStore>,
    /// Lowercased requester addresses that are always rejected.
    blacklist: HashSet<String>,
    min_resubmit_interval: chrono::Duration,
}

impl IntakeService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        blacklist: HashSet<String>,
        min_resubmit_interval: chrono::Duration,
    ) -> Self {
        Self {
            jobs,
            blacklist: blacklist.into_iter().map(|e| e.to_lowercase()).collect(),
            min_resubmit_interval,
        }
    }

    /// Build from configuration, loading the blacklist file at startup.
    pub fn from_config(jobs: Arc<dyn JobStore>, config: &IntakeConfig) -> Result<Self> {
        let blacklist = load_optional_list(config.blacklist_file.as_deref())?;
        info!(
            subsystem = "intake",
            blacklist_entries = blacklist.len(),
            throttle_mins = config.min_resubmit_interval.num_minutes(),
            "Intake service initialized"
        );
        Ok(Self::new(jobs, blacklist, config.min_resubmit_interval))
    }

    /// Admit a retrieval request and enqueue it. Returns the new job id.
    pub async fn submit(
        &self,
        user_email: &str,
        sda_path: &str,
        source_ip: Option<&str>,
    ) -> Result<i64> {
        let user_email = user_email.trim();
        if user_email.is_empty() || !user_email.contains('@') {
            return Err(Error::InvalidInput(
                "user_email must be a valid address".into(),
            ));
        }
        let file_name = sda_path
            .trim()
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("invalid archive path: {sda_path}")))?
            .to_string();

        if self.blacklist.contains(&user_email.to_lowercase()) {
            info!(
                subsystem = "intake",
                user_email,
                "Rejected blacklisted requester"
            );
            return Err(Error::Forbidden);
        }

        if let Some((existing_job_id, created)) = self
            .jobs
            .latest_for_requester(user_email, &file_name)
            .await?
        {
            if Utc::now() - created < self.min_resubmit_interval {
                info!(
                    subsystem = "intake",
                    user_email,
                    file_name = %file_name,
                    existing_job_id,
                    "Throttled duplicate submission"
                );
                return Err(Error::TooManyRequests { existing_job_id });
            }
        }

        let job_id = self
            .jobs
            .submit(user_email, sda_path.trim(), &file_name, source_ip)
            .await?;
        info!(
            subsystem = "intake",
            op = "submit",
            job_id,
            user_email,
            file_name = %file_name,
            "Job accepted"
        );
        Ok(job_id)
    }
}
