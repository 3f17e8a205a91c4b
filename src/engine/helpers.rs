use crate::types::RetryConfig;
use std::time::Duration;

/// Exponential backoff with jitter: `base * 2^(attempt-1) + jitter`, capped.
///
/// Jitter is up to the base delay or one second, whichever is smaller.
pub(super) fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config
        .base_delay_ms
        .saturating_mul(1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX));

    let max_jitter = config.base_delay_ms.min(1000);
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    let delay_ms = base_delay.saturating_add(jitter).min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Transient context for one agent step.
pub(super) fn step_notes(step: usize, steps: usize, policy_note: Option<&str>) -> Vec<String> {
    let mut notes = vec![format!("Step {step} of {steps}")];
    if let Some(note) = policy_note {
        notes.push(note.to_string());
    }
    notes
}
