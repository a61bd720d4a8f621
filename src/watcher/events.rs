//! Balance change events delivered to consumers

use serde::Serialize;

/// Lamports per SOL, the display conversion constant
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Balance update event
///
/// One event per accepted notification. `delta` is computed against the
/// balance of the previous *delivered* event (0 for the first observation);
/// updates dropped by the throttle never influence it.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceChangeEvent {
    /// Account the event belongs to
    pub account: String,
    /// Slot at which the new balance was observed
    pub slot: u64,
    /// Absolute balance after the change, in lamports
    pub balance: u64,
    /// Signed difference from the previously delivered balance
    pub delta: i64,
    /// Wall-clock timestamp in milliseconds since epoch
    pub timestamp: u64,
    /// Balance in SOL, fixed two decimal places
    pub formatted_balance: String,
    /// Delta in SOL, fixed two decimal places with explicit sign
    pub formatted_delta: String,
}

impl BalanceChangeEvent {
    /// Build an event from a raw notification and the computed delta
    pub fn new(account: &str, slot: u64, balance: u64, delta: i64) -> Self {
        Self {
            account: account.to_string(),
            slot,
            balance,
            delta,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            formatted_balance: format_sol(balance),
            formatted_delta: format_sol_delta(delta),
        }
    }
}

/// Format a lamport amount as SOL with two decimal places
pub fn format_sol(lamports: u64) -> String {
    format!("{:.2}", lamports as f64 / LAMPORTS_PER_SOL as f64)
}

/// Format a signed lamport delta as SOL with two decimal places
pub fn format_sol_delta(delta: i64) -> String {
    format!("{:+.2}", delta as f64 / LAMPORTS_PER_SOL as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sol() {
        assert_eq!(format_sol(0), "0.00");
        assert_eq!(format_sol(1_500_000_000), "1.50");
        assert_eq!(format_sol(LAMPORTS_PER_SOL), "1.00");
        assert_eq!(format_sol(25_000_000), "0.03");
    }

    #[test]
    fn test_format_sol_delta_signed() {
        assert_eq!(format_sol_delta(500_000_000), "+0.50");
        assert_eq!(format_sol_delta(-20_000_000), "-0.02");
        assert_eq!(format_sol_delta(0), "+0.00");
    }

    #[test]
    fn test_event_construction() {
        let event = BalanceChangeEvent::new("someaccount", 42, 2_000_000_000, -500_000_000);

        assert_eq!(event.account, "someaccount");
        assert_eq!(event.slot, 42);
        assert_eq!(event.balance, 2_000_000_000);
        assert_eq!(event.delta, -500_000_000);
        assert_eq!(event.formatted_balance, "2.00");
        assert_eq!(event.formatted_delta, "-0.50");
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_event_serializes() {
        let event = BalanceChangeEvent::new("acct", 1, 1_000_000_000, 0);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"balance\":1000000000"));
        assert!(json.contains("\"formatted_balance\":\"1.00\""));
    }
}
