//! Integration tests for bisync-engine
//!
//! Drives full runs against real temporary directories through the
//! local tree adapter and checks both trees and the persisted history.

mod common;

mod test_lockout;
mod test_runs;
mod test_safety;
