//! The inbound control channel.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A control command sent by a consumer to a running execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Suspend scheduling at the next band boundary.
    Pause,
    /// Resume a paused run.
    Resume,
    /// Cancel the run.
    Cancel,
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Sending half of a run's control channel.
pub type ControlSender = mpsc::UnboundedSender<ControlCommand>;

/// Receiving half of a run's control channel (owned by the scheduler).
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlCommand>;

/// Create a control channel pair.
///
/// Commands are tiny and rare; an unbounded channel keeps `send` infallible
/// for the registry while the scheduler polls with `try_recv` between bands
/// and between retries.
#[must_use]
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_roundtrip_serde() {
        for cmd in [
            ControlCommand::Pause,
            ControlCommand::Resume,
            ControlCommand::Cancel,
        ] {
            let json = serde_json::to_string(&cmd).unwrap();
            let back: ControlCommand = serde_json::from_str(&json).unwrap();
            assert_eq!(cmd, back);
        }
        assert_eq!(
            serde_json::to_string(&ControlCommand::Cancel).unwrap(),
            "\"cancel\""
        );
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (tx, mut rx) = control_channel();
        tx.send(ControlCommand::Pause).unwrap();
        tx.send(ControlCommand::Resume).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ControlCommand::Pause);
        assert_eq!(rx.try_recv().unwrap(), ControlCommand::Resume);
        assert!(rx.try_recv().is_err());
    }
}
