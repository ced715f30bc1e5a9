//! Database configuration sequencer
//!
//! When a pre-deploy configuration declares object changes, the server may
//! need a database configuration run, and that run may need the whole
//! server placed in Admin Mode first. This module drives that protocol as
//! an explicit state machine: check whether configuration is required,
//! check whether Admin Mode is needed, transition the server in, apply,
//! poll to completion, transition back out.
//!
//! Polling is bounded only by the server reaching a terminal state; there
//! is no client-side retry limit. A server that never completes holds the
//! tool until the operator interrupts it.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::client::MaximoClient;
use crate::error::{DeployError, DeployResult};
use crate::models::PreDeployConfig;

/// Fixed delay between protocol polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Vendor error-code pattern: a BMX*E code followed by a message separator
static VENDOR_ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"BMX.*?E -").unwrap());

/// Configuration message codes that end the run even though they are not
/// formatted as errors
const FATAL_CODES: [&str; 1] = ["BMXAA6819I"];

/// Injectable delay so tests can run the protocol without real waiting
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real delay between polls
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Counts naps instead of sleeping, for tests
#[cfg(test)]
#[derive(Default)]
pub struct NoopSleeper {
    pub naps: std::cell::Cell<usize>,
}

#[cfg(test)]
impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: Duration) {
        self.naps.set(self.naps.get() + 1);
    }
}

/// Phase of one admin-mode/schema-change cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CheckingRequired,
    CheckingAdminMode,
    AdminModeRequesting,
    AdminModeOn,
    ConfigApplying,
    ConfigInProgress,
    ConfigComplete,
    AdminModeReleasing,
    Failed,
}

/// Drives one database configuration cycle against the server.
///
/// Created per artifact; failure is fatal to that artifact only and
/// surfaces as exactly one error.
pub struct DbConfigSequencer<'a, C: MaximoClient + ?Sized, S: Sleeper> {
    client: &'a C,
    sleeper: &'a S,
    allow_admin_mode: bool,
    phase: Phase,
}

impl<'a, C: MaximoClient + ?Sized, S: Sleeper> DbConfigSequencer<'a, C, S> {
    pub fn new(client: &'a C, sleeper: &'a S, allow_admin_mode: bool) -> Self {
        Self {
            client,
            sleeper,
            allow_admin_mode,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn fail(&mut self, message: String) -> DeployError {
        self.enter(Phase::Failed);
        DeployError::DbConfig { message }
    }

    /// Run the cycle for one pre-deploy configuration.
    pub fn run(&mut self, pre: &PreDeployConfig) -> DeployResult<()> {
        if !pre.wants_db_config() {
            return Ok(());
        }

        self.enter(Phase::CheckingRequired);
        if !self.client.db_config_required()? {
            self.enter(Phase::Idle);
            return Ok(());
        }

        println!("Checking if Admin Mode is required to apply changes to the database.");
        self.enter(Phase::CheckingAdminMode);
        if !self.client.db_config_requires_admin_mode()? {
            println!("Admin Mode is not required to apply changes to the database.");
            self.apply_and_poll()?;
            self.enter(Phase::Idle);
            return Ok(());
        }

        println!("Admin Mode is required to apply changes to the database.");
        if !self.allow_admin_mode {
            return Err(self.fail(
                "The command line parameter --allow-admin-mode is false, but the script cannot be deployed until the database configurations have been applied.\nThe configurations have been added to Maximo and can be manually applied by an administrator.".to_string(),
            ));
        }
        if pre.no_admin_mode {
            return Err(self.fail(
                "The script deployment specifies that Admin Mode should not be applied, but the script cannot be deployed until the database configurations have been applied.\nThe configurations have been added to Maximo and can be manually applied by an administrator.".to_string(),
            ));
        }

        self.enter(Phase::AdminModeRequesting);
        println!("Requesting Admin Mode On");
        self.client.set_admin_mode_on()?;
        self.sleeper.sleep(POLL_INTERVAL);
        println!("Requested Admin Mode On");
        while !self.client.is_admin_mode_on()? {
            self.sleeper.sleep(POLL_INTERVAL);
            println!("Waiting for Admin Mode On");
        }
        self.enter(Phase::AdminModeOn);
        println!("Admin Mode is On, applying database configurations.");

        self.apply_and_poll()?;

        self.enter(Phase::AdminModeReleasing);
        println!("Requesting Admin Mode Off");
        self.client.set_admin_mode_off()?;
        self.sleeper.sleep(POLL_INTERVAL);
        println!("Requested Admin Mode Off");
        while self.client.is_admin_mode_on()? {
            self.sleeper.sleep(POLL_INTERVAL);
            println!("Waiting for Admin Mode Off");
        }
        self.sleeper.sleep(POLL_INTERVAL);
        println!("Admin Mode is Off");
        self.enter(Phase::Idle);

        Ok(())
    }

    /// Issue the apply call, wait for the server to pick it up, then poll
    /// to completion while watching the status messages for error codes.
    fn apply_and_poll(&mut self) -> DeployResult<()> {
        self.enter(Phase::ConfigApplying);
        self.client.apply_db_config()?;
        println!("Requested database configuration start");

        while !self.client.db_config_in_progress()? {
            self.sleeper.sleep(POLL_INTERVAL);
        }

        self.enter(Phase::ConfigInProgress);
        while self.client.db_config_in_progress()? {
            self.sleeper.sleep(POLL_INTERVAL);

            let messages = self.client.db_config_messages()?;
            if messages.is_empty() {
                println!("Waiting for database configuration to complete");
                continue;
            }
            for line in messages.lines() {
                if is_config_error(line) {
                    return Err(self.fail(format!(
                        "An error occurred during database configuration: {line}"
                    )));
                }
            }
            if let Some(last) = messages.lines().last() {
                println!("{last}");
            }
        }

        self.enter(Phase::ConfigComplete);
        println!("Database configuration is complete");
        Ok(())
    }
}

/// A status line that carries a vendor error code or a known fatal code
fn is_config_error(line: &str) -> bool {
    VENDOR_ERROR.is_match(line) || FATAL_CODES.iter().any(|code| line.starts_with(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;

    fn pre_deploy(json: &str) -> PreDeployConfig {
        PreDeployConfig::parse("scripts/test.predeploy.json", json.to_string()).unwrap()
    }

    const ONE_CHANGE: &str = r#"{"maxObjects":[{"objectName":"CUSTOBJ"}]}"#;

    #[test]
    fn empty_change_list_never_touches_the_client() {
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, true);

        sequencer.run(&pre_deploy("{}")).unwrap();
        assert!(client.calls.borrow().is_empty());
        assert_eq!(sequencer.phase(), Phase::Idle);
    }

    #[test]
    fn not_required_short_circuits() {
        let client = MockClient::new();
        client.db_config_required.set(false);
        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, false);

        sequencer.run(&pre_deploy(ONE_CHANGE)).unwrap();
        assert_eq!(*client.calls.borrow(), vec!["db_config_required"]);
        assert_eq!(sequencer.phase(), Phase::Idle);
    }

    #[test]
    fn admin_mode_disallowed_fails_with_zero_admin_calls() {
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(true);
        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, false);

        let err = sequencer.run(&pre_deploy(ONE_CHANGE)).unwrap_err();
        assert!(err.to_string().contains("--allow-admin-mode is false"));
        assert_eq!(sequencer.phase(), Phase::Failed);
        assert_eq!(client.call_count("set_admin_mode_on"), 0);
        assert_eq!(client.call_count("is_admin_mode_on"), 0);
        assert_eq!(client.call_count("apply_db_config"), 0);
    }

    #[test]
    fn no_admin_mode_flag_fails_before_any_admin_call() {
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(true);
        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, true);

        let pre = pre_deploy(r#"{"maxObjects":[{}],"noAdminMode":true}"#);
        let err = sequencer.run(&pre).unwrap_err();
        assert!(err.to_string().contains("Admin Mode should not be applied"));
        assert_eq!(client.call_count("set_admin_mode_on"), 0);
    }

    #[test]
    fn full_admin_cycle_runs_in_order() {
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(true);
        // admin mode: off on first poll, then on; off again while releasing
        client
            .admin_on_polls
            .borrow_mut()
            .extend([false, true, true, false]);
        // config: not yet started, started, finished
        client
            .in_progress_polls
            .borrow_mut()
            .extend([false, true, true, false]);
        client
            .message_polls
            .borrow_mut()
            .push_back("BMXAA6820I - Reconfiguring CUSTOBJ".to_string());

        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, true);
        sequencer.run(&pre_deploy(ONE_CHANGE)).unwrap();
        assert_eq!(sequencer.phase(), Phase::Idle);

        assert_eq!(client.call_count("set_admin_mode_on"), 1);
        assert_eq!(client.call_count("set_admin_mode_off"), 1);
        assert_eq!(client.call_count("apply_db_config"), 1);

        let calls = client.calls.borrow();
        let position = |name: &str| calls.iter().position(|c| c == name).unwrap();
        assert!(position("set_admin_mode_on") < position("apply_db_config"));
        assert!(position("apply_db_config") < position("set_admin_mode_off"));
        // apply only once admin mode reported on
        let last_admin_poll_before_apply = calls
            .iter()
            .take(position("apply_db_config"))
            .filter(|c| *c == "is_admin_mode_on")
            .count();
        assert!(last_admin_poll_before_apply >= 1);
        assert!(sleeper.naps.get() > 0);
    }

    #[test]
    fn direct_apply_skips_admin_mode_entirely() {
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(false);
        client
            .in_progress_polls
            .borrow_mut()
            .extend([true, false]);

        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, false);
        sequencer.run(&pre_deploy(ONE_CHANGE)).unwrap();

        assert_eq!(client.call_count("set_admin_mode_on"), 0);
        assert_eq!(client.call_count("set_admin_mode_off"), 0);
        assert_eq!(client.call_count("apply_db_config"), 1);
        assert_eq!(sequencer.phase(), Phase::Idle);
    }

    #[test]
    fn vendor_error_code_aborts_polling_immediately() {
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(false);
        // config stays in progress; the error message must end the loop
        client
            .in_progress_polls
            .borrow_mut()
            .extend([true, true]);
        client
            .message_polls
            .borrow_mut()
            .push_back("BMXAA7595E - Database configuration failed for CUSTOBJ".to_string());

        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, false);
        let err = sequencer.run(&pre_deploy(ONE_CHANGE)).unwrap_err();

        assert!(err
            .to_string()
            .contains("An error occurred during database configuration: BMXAA7595E"));
        assert_eq!(sequencer.phase(), Phase::Failed);
        // one poll saw in-progress, the message check fired, and nothing
        // was polled after that
        assert_eq!(client.call_count("db_config_messages"), 1);
        assert_eq!(client.call_count("db_config_in_progress"), 2);
    }

    #[test]
    fn known_fatal_code_aborts_even_without_error_suffix() {
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(false);
        client.in_progress_polls.borrow_mut().extend([true, true]);
        client
            .message_polls
            .borrow_mut()
            .push_back("BMXAA6819I - Configuration stopped by administrator".to_string());

        let sleeper = NoopSleeper::default();
        let mut sequencer = DbConfigSequencer::new(&client, &sleeper, false);
        let err = sequencer.run(&pre_deploy(ONE_CHANGE)).unwrap_err();
        assert!(err.to_string().contains("BMXAA6819I"));
    }

    #[test]
    fn vendor_error_pattern_matches_codes_only() {
        assert!(is_config_error("BMXAA7595E - Database configuration failed"));
        assert!(is_config_error("BMXAA6819I - stopped"));
        assert!(!is_config_error("BMXAA6820I - Reconfiguring CUSTOBJ"));
        assert!(!is_config_error("Applying changes to table A"));
    }
}
