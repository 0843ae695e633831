//! [`OperatorConfirmation`] – proof that a human approved one safety-relevant
//! action.
//!
//! Dropping into a damped or zero-torque state, changing the balance
//! controller, or releasing arm torque for teaching can drop the robot. Those
//! calls take an `OperatorConfirmation` by value, so they cannot be reached
//! from code that does not hold one.
//!
//! The token is:
//! - bound to a single [`SafetyAction`] and rejected for any other,
//! - consumed on use (no `Clone`, no `Copy`),
//! - `!Send`, so it cannot be moved into a spawned background task.
//!
//! # Ways to obtain one
//!
//! 1. [`ConfirmationRequest::accept`] with the phrase the operator typed.
//! 2. [`OperatorConfirmation::confirm_from_env`] for scripted sessions
//!    (`STRIDER_CONFIRM=<phrase>`).
//! 3. `OperatorConfirmation::for_test` under `cfg(test)` or the `test-util`
//!    feature.
//!
//! # Example
//!
//! ```
//! use strider_kernel::confirmation::ConfirmationRequest;
//! use strider_types::{FsmState, SafetyAction};
//!
//! let request = ConfirmationRequest::new(SafetyAction::Transition(FsmState::Damp));
//! assert_eq!(request.phrase(), "DAMP");
//!
//! let token = request.accept("DAMP").unwrap();
//! assert!(token.redeem(SafetyAction::Transition(FsmState::Damp)).is_ok());
//! ```
//!
//! The token cannot cross threads:
//!
//! ```compile_fail
//! fn assert_send<T: Send>() {}
//! assert_send::<strider_kernel::OperatorConfirmation>();
//! ```

use std::marker::PhantomData;

use strider_types::{SafetyAction, StriderError};
use thiserror::Error;
use tracing::info;

/// Environment variable read by [`OperatorConfirmation::confirm_from_env`].
pub const CONFIRM_ENV_VAR: &str = "STRIDER_CONFIRM";

/// Why a confirmation could not be produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("environment variable {var} is not set")]
    EnvNotSet { var: String },

    #[error("typed '{typed}' but confirmation requires '{expected}'")]
    PhraseMismatch { expected: String, typed: String },
}

// ────────────────────────────────────────────────────────────────────────────
// ConfirmationRequest
// ────────────────────────────────────────────────────────────────────────────

/// A pending question to the operator: "type PHRASE to confirm ACTION".
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    action: SafetyAction,
}

impl ConfirmationRequest {
    pub fn new(action: SafetyAction) -> Self {
        Self { action }
    }

    pub fn action(&self) -> SafetyAction {
        self.action
    }

    /// Exact text the operator must type.
    pub fn phrase(&self) -> String {
        self.action.phrase()
    }

    /// Prompt suitable for a terminal.
    pub fn prompt(&self) -> String {
        format!("Type {} to confirm {}: ", self.phrase(), self.action)
    }

    /// Turn the operator's typed answer into a token.
    ///
    /// Surrounding whitespace is ignored; the comparison is otherwise exact.
    pub fn accept(self, operator_input: &str) -> Result<OperatorConfirmation, ConfirmationError> {
        let expected = self.phrase();
        let typed = operator_input.trim();
        if typed == expected {
            info!(action = %self.action, "operator confirmed safety action");
            Ok(OperatorConfirmation::new(self.action))
        } else {
            Err(ConfirmationError::PhraseMismatch {
                expected,
                typed: typed.to_string(),
            })
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OperatorConfirmation
// ────────────────────────────────────────────────────────────────────────────

/// Move-only capability for exactly one [`SafetyAction`].
#[derive(Debug)]
#[must_use = "a confirmation does nothing until it is redeemed"]
pub struct OperatorConfirmation {
    action: SafetyAction,
    _not_send: PhantomData<*const ()>,
}

impl OperatorConfirmation {
    fn new(action: SafetyAction) -> Self {
        Self {
            action,
            _not_send: PhantomData,
        }
    }

    /// Confirm `action` from `STRIDER_CONFIRM`, whose value must equal the
    /// action's phrase.
    pub fn confirm_from_env(action: SafetyAction) -> Result<Self, ConfirmationError> {
        let typed = std::env::var(CONFIRM_ENV_VAR).map_err(|_| ConfirmationError::EnvNotSet {
            var: CONFIRM_ENV_VAR.to_string(),
        })?;
        ConfirmationRequest::new(action).accept(&typed)
    }

    /// Token for tests. Not available in normal builds.
    #[cfg(any(test, feature = "test-util"))]
    pub fn for_test(action: SafetyAction) -> Self {
        Self::new(action)
    }

    /// The action this token was issued for.
    pub fn action(&self) -> SafetyAction {
        self.action
    }

    /// Spend the token on `requested`.
    ///
    /// Fails with [`StriderError::ConfirmationMismatch`] when the token was
    /// issued for a different action. The token is consumed either way.
    pub fn redeem(self, requested: SafetyAction) -> Result<(), StriderError> {
        if self.action == requested {
            Ok(())
        } else {
            Err(StriderError::ConfirmationMismatch {
                confirmed: self.action.to_string(),
                requested: requested.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_types::FsmState;

    #[test]
    fn accept_exact_phrase() {
        let req = ConfirmationRequest::new(SafetyAction::Transition(FsmState::ZeroTorque));
        let token = req.accept("  ZERO_TORQUE\n").unwrap();
        assert_eq!(token.action(), SafetyAction::Transition(FsmState::ZeroTorque));
    }

    #[test]
    fn reject_wrong_phrase() {
        let req = ConfirmationRequest::new(SafetyAction::Transition(FsmState::Damp));
        let err = req.accept("damp").unwrap_err();
        assert_eq!(
            err,
            ConfirmationError::PhraseMismatch {
                expected: "DAMP".into(),
                typed: "damp".into()
            }
        );
    }

    #[test]
    fn prompt_mentions_phrase_and_action() {
        let req = ConfirmationRequest::new(SafetyAction::TeachCompliance);
        let prompt = req.prompt();
        assert!(prompt.contains("RELEASE_ARMS"));
        assert!(prompt.contains("compliance"));
    }

    #[test]
    fn redeem_for_other_action_fails() {
        let token = OperatorConfirmation::for_test(SafetyAction::Transition(FsmState::Sit));
        let err = token
            .redeem(SafetyAction::Transition(FsmState::ZeroTorque))
            .unwrap_err();
        assert!(matches!(err, StriderError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn confirm_from_env_checks_value() {
        // SAFETY: single-threaded test; no other test touches STRIDER_CONFIRM.
        unsafe { std::env::remove_var(CONFIRM_ENV_VAR) };
        assert!(matches!(
            OperatorConfirmation::confirm_from_env(SafetyAction::BalanceMode(1)),
            Err(ConfirmationError::EnvNotSet { .. })
        ));

        unsafe { std::env::set_var(CONFIRM_ENV_VAR, "BALANCE_1") };
        let token = OperatorConfirmation::confirm_from_env(SafetyAction::BalanceMode(1)).unwrap();
        assert!(token.redeem(SafetyAction::BalanceMode(1)).is_ok());

        unsafe { std::env::set_var(CONFIRM_ENV_VAR, "BALANCE_0") };
        assert!(OperatorConfirmation::confirm_from_env(SafetyAction::BalanceMode(1)).is_err());
        unsafe { std::env::remove_var(CONFIRM_ENV_VAR) };
    }
}
