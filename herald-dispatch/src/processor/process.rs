//! Resolution of a single job

use std::sync::atomic::Ordering;

use chrono::Utc;
use herald_common::{audit, outgoing, tracing};

use crate::{
    config::EngineConfig,
    engine::{Counters, EngineState},
    error::{SendError, TransientError},
    rate_limiter::Reservation,
    reply::{ReplyPolicy, Stage},
    types::{Job, JobState, OutboundMessage},
};

/// Drive one dequeued job to its next state
#[tracing::instrument(level = "trace", skip_all, fields(job_id = %job.id, lead_id = %job.lead.id))]
pub(crate) async fn process_job(state: &EngineState, mut job: Job) {
    let config = state.config.load();
    let now = Utc::now();

    let stage = state
        .replies
        .stage_of(&job.lead.id, config.follow_up_wait(), now);
    if stage == Stage::HumanMode {
        tracing::debug!("Lead is in human mode, dropping job");
        state.queue.complete(&job.id);
        Counters::bump(&state.counters.cancelled);
        return;
    }

    let Some(domain) = job.lead.domain() else {
        let reason = format!("Lead address {} has no domain", job.lead.address);
        state.dead_letter(job, reason);
        return;
    };

    let reservation = match state.pool.next(&domain, &config) {
        Ok(reservation) => {
            state.no_account_streak.store(0, Ordering::Relaxed);
            reservation
        }
        Err(e) => {
            let streak = state.no_account_streak.fetch_add(1, Ordering::Relaxed) + 1;
            Counters::bump(&state.counters.no_account);
            if streak > config.no_account_alert_threshold {
                tracing::warn!(
                    streak,
                    threshold = config.no_account_alert_threshold,
                    "No sending account available for an extended period"
                );
            } else {
                tracing::debug!(error = %e, streak, "No account available, requeueing");
            }
            state.queue.requeue_after(job, config.no_account_delay());
            return;
        }
    };

    let subject = choose_subject(state, &job, stage, &config, now);
    let body = job
        .body
        .clone()
        .unwrap_or_else(|| config.default_body.clone());
    let message = OutboundMessage {
        to: job.lead.address.clone(),
        subject,
        body,
    };

    audit::log_send_attempt(
        &job.id.to_string(),
        job.lead.id.as_str(),
        &job.lead.address,
        reservation.account.id.as_str(),
        job.attempts + 1,
    );

    let timeout = config.send_timeout();
    let result = tokio::time::timeout(
        timeout,
        state.transport.send(&reservation.account, &message),
    )
    .await
    .unwrap_or_else(|_| {
        Err(TransientError::Timeout(format!(
            "Send did not complete within {}s",
            timeout.as_secs()
        ))
        .into())
    });

    match result {
        Ok(receipt) => {
            job.state = JobState::Sent;
            state
                .replies
                .record_send(&job.lead.id, &message.subject, receipt.sent_at);
            state.queue.complete(&job.id);
            Counters::bump(&state.counters.sent);

            outgoing!(
                level = INFO,
                job_id = %job.id,
                account = %reservation.account.id,
                attempt = job.attempts + 1,
                "Message sent to lead {}",
                job.lead.id
            );
            audit::log_send_success(
                &job.id.to_string(),
                job.lead.id.as_str(),
                &job.lead.address,
                reservation.account.id.as_str(),
                &message.subject,
                receipt
                    .sent_at
                    .signed_duration_since(job.created_at)
                    .num_milliseconds(),
            );
        }
        Err(error) => handle_failure(state, job, &reservation, error, &config),
    }
}

/// Reuse the previous subject only for follow-ups whose content is still fresh
fn choose_subject(
    state: &EngineState,
    job: &Job,
    stage: Stage,
    config: &EngineConfig,
    now: chrono::DateTime<Utc>,
) -> String {
    if stage == Stage::FollowUp
        && let Some(lead) = state.replies.state(&job.lead.id)
        && let Some(last_subject) = lead.last_subject
    {
        let last_reply_at = lead.last_reply_at.or(job.lead.last_reply_at);
        let threshold = config.retry_policy().refresh_threshold();
        if !ReplyPolicy::should_refresh_content(last_reply_at, threshold, now) {
            return last_subject;
        }
    }

    state.subjects.generate(&job.intent, &config.subjects)
}

fn handle_failure(
    state: &EngineState,
    mut job: Job,
    reservation: &Reservation,
    error: SendError,
    config: &EngineConfig,
) {
    if error.never_transmitted() {
        state.pool.release(reservation);
    }

    job.last_error = Some(error.to_string());

    if let SendError::Quota(reason) = &error {
        state
            .monitor
            .report_quota_exhausted(&reservation.account.id, reason);
    }

    if state.replies.is_human_mode(&job.lead.id) {
        tracing::debug!(error = %error, "Lead replied while the send was in flight, not retrying");
        state.queue.complete(&job.id);
        Counters::bump(&state.counters.cancelled);
        return;
    }

    if !error.is_retryable() {
        state.dead_letter(job, error.to_string());
        return;
    }

    job.attempts += 1;
    let policy = config.retry_policy();
    if !policy.should_retry(job.attempts) {
        let reason = format!("Retry budget exhausted after {} attempts: {error}", job.attempts);
        state.dead_letter(job, reason);
        return;
    }

    let delay = if error.is_quota() {
        config.no_account_delay()
    } else {
        policy.delay_for(job.attempts)
    };

    tracing::info!(
        account = %reservation.account.id,
        attempt = job.attempts,
        remaining = policy.remaining_attempts(job.attempts),
        retry_delay_secs = delay.as_secs(),
        error = %error,
        "Send failed, scheduled retry"
    );

    job.state = JobState::RetryWait;
    Counters::bump(&state.counters.retried);
    state.queue.requeue_after(job, delay);
}
