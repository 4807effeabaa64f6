//! invtrack-ledger
//!
//! Per-guild membership bookkeeping:
//! - [`MemberHistoryLedger`]: join / leave / rejoin history, never deleted.
//! - [`InviterCountLedger`]: active credited members per inviter, plus the
//!   member -> inviter index used to know whom to decrement on leave.
//!
//! Both are plain single-guild structures; the runtime keys them by guild and
//! serializes access. Counters are `u64` and every subtraction saturates at 0.

mod adjust;
mod counts;
mod history;

pub use adjust::{positive_amount, AdjustmentError};
pub use counts::InviterCountLedger;
pub use history::{JoinKind, MemberHistoryLedger};
