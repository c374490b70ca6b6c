use crate::error::AlertError;
use crate::events::AlertEvent;
use log::{info, warn};
use std::io::Write;
use std::process::{Command, Stdio};

/// Maximum subject length handed to a notifier
pub const MAX_SUBJECT_LENGTH: usize = 256;

/// Maximum body length handed to a notifier
pub const MAX_BODY_LENGTH: usize = 1024;

/// Delivery channel for alert events
///
/// Implementations own transport (log, external program, e-mail gateway).
/// They are driven from the dispatcher thread and may block. A notifier that
/// blocks long enough fills the alert channel; alerts raised meanwhile are
/// dropped at ingestion and their metric's cooldown is reopened, so the
/// next abnormal average for that metric alerts again.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send {
    /// Deliver one alert
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` when the transport rejected
    /// the alert; the dispatcher keeps it for a later retry.
    fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError>;

    /// Short name used in log lines
    fn name(&self) -> &str;
}

/// Notifier that writes alerts to the application log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
        warn!("{}", event.subject());
        for line in event.body().lines().filter(|line| !line.is_empty()) {
            warn!("  {}", line);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Notifier that hands each alert to an external program
///
/// The program receives the event as one JSON object on stdin, with the
/// formatted subject and body in `HEALTH_ALERT_SUBJECT` and
/// `HEALTH_ALERT_BODY`. A non-zero exit status counts as a failed delivery.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl Notifier for CommandNotifier {
    fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| AlertError::NotificationFailed(format!("Failed to encode alert: {}", e)))?;

        let subject = truncate_text(&event.subject(), MAX_SUBJECT_LENGTH);
        let body = truncate_text(&event.body(), MAX_BODY_LENGTH);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("HEALTH_ALERT_SUBJECT", &subject)
            .env("HEALTH_ALERT_BODY", &body)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AlertError::NotificationFailed(format!(
                    "Failed to execute {}: {}",
                    self.program, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AlertError::NotificationFailed(format!(
                "{} failed with status {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        info!("Delivered alert through {}", self.program);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Truncate text to at most `max_length` bytes, ending in "..."
///
/// Cuts on a UTF-8 character boundary.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }

    format!("{}...", &text[..truncate_at])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;
    use chrono::Utc;

    fn sample_event() -> AlertEvent {
        AlertEvent {
            metric: Metric::Spo2,
            average: 91.5,
            count: 4,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.deliver(&sample_event()).is_ok());
        assert_eq!(LogNotifier.name(), "log");
    }

    #[test]
    fn test_text_truncation() {
        let long_text = "a".repeat(300);
        let truncated = truncate_text(&long_text, MAX_SUBJECT_LENGTH);
        assert!(truncated.len() <= MAX_SUBJECT_LENGTH);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_text("short", MAX_SUBJECT_LENGTH), "short");
    }

    #[test]
    fn test_utf8_truncation_safety() {
        for text in ["37.6 °C °C °C °C", "🚀🎉🌟🚀🎉🌟", "世界你好世界你好"] {
            for max_length in [3, 5, 8, 11] {
                let result = truncate_text(text, max_length);
                assert!(result.len() <= max_length, "{:?} exceeds {}", result, max_length);
                if text.len() > max_length {
                    assert!(result.ends_with("..."));
                }
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_success() {
        let notifier = CommandNotifier::new(
            "sh".to_string(),
            vec!["-c".to_string(), "cat > /dev/null".to_string()],
        );
        assert!(notifier.deliver(&sample_event()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_receives_event_json() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("alert.json");
        let notifier = CommandNotifier::new(
            "sh".to_string(),
            vec!["-c".to_string(), format!("cat > {}", out.display())],
        );

        notifier.deliver(&sample_event()).unwrap();

        let written: AlertEvent =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written.metric, Metric::Spo2);
        assert_eq!(written.count, 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_reports_failure() {
        let notifier = CommandNotifier::new(
            "sh".to_string(),
            vec!["-c".to_string(), "cat > /dev/null; echo boom >&2; exit 3".to_string()],
        );
        match notifier.deliver(&sample_event()) {
            Err(AlertError::NotificationFailed(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_command_notifier_missing_program() {
        let notifier = CommandNotifier::new("/nonexistent/notify-bin".to_string(), vec![]);
        assert!(matches!(
            notifier.deliver(&sample_event()),
            Err(AlertError::NotificationFailed(_))
        ));
    }
}
