//! Authentication gate.
//!
//! Holds the signed-in identity and gates navigation. The gate is an
//! explicit value the caller owns and passes around; nothing here is
//! process-global. The only persisted artifact is a marker file recording
//! that a prior session exists — profile fields live in memory only, so a
//! full restart re-enters the Checking state.

use std::path::PathBuf;
use tracing::{debug, warn};

use crate::api::{ApiClient, NewUser, Session, UserRecord};
use crate::error::{Error, Result};
use crate::platform::Platform;

/// Where the gate is in the authentication lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
  Unauthenticated,
  /// Identity round trip in flight; dependent UI shows a loading indicator
  Checking,
  Authenticated,
}

/// What the caller should do on mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDirective {
  /// No prior-session marker: go straight to the sign-in entry point
  RedirectToSignIn,
  /// A marker exists: run `check_auth_user` to confirm the session
  CheckSession,
}

pub struct SessionGate<P> {
  api: ApiClient<P>,
  state: AuthState,
  session: Session,
  marker_path: PathBuf,
}

impl<P: Platform> SessionGate<P> {
  pub fn new(api: ApiClient<P>, marker_path: PathBuf) -> Self {
    Self {
      api,
      state: AuthState::Unauthenticated,
      session: Session::default(),
      marker_path,
    }
  }

  pub fn state(&self) -> AuthState {
    self.state
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn is_authenticated(&self) -> bool {
    self.state == AuthState::Authenticated
  }

  /// Initial-mount decision, made without a network call.
  pub fn mount(&self) -> GateDirective {
    if self.marker_path.exists() {
      GateDirective::CheckSession
    } else {
      GateDirective::RedirectToSignIn
    }
  }

  /// One round trip to confirm identity. Returns `Ok(true)` and holds the
  /// populated session on success; an absent or expired session resets the
  /// gate and returns `Ok(false)`. Transport failures are not an answer
  /// about the session, so they propagate as errors.
  pub async fn check_auth_user(&mut self) -> Result<bool> {
    self.state = AuthState::Checking;

    match self.api.get_current_user().await {
      Ok(user) => {
        self.session = Session::from(user);
        self.state = AuthState::Authenticated;
        Ok(true)
      }
      Err(Error::Unauthorized) | Err(Error::NotFound) => {
        debug!("identity check found no valid session");
        self.reset();
        Ok(false)
      }
      Err(e) => {
        self.reset();
        Err(e)
      }
    }
  }

  /// Create an account, sign in with it, and confirm identity.
  pub async fn sign_up(&mut self, user: &NewUser) -> Result<bool> {
    self.api.create_user_account(user).await?;
    self.sign_in(&user.email, &user.password).await
  }

  /// Create a session and confirm identity. The marker is written as soon
  /// as the session exists, before the confirmation round trip.
  pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<bool> {
    self.api.sign_in(email, password).await?;
    self.write_marker();
    self.check_auth_user().await
  }

  /// Delete the remote session and reset the gate.
  pub async fn sign_out(&mut self) -> Result<()> {
    self.api.sign_out().await?;
    self.clear_marker();
    self.reset();
    Ok(())
  }

  /// Signed-up user record for the current session, bypassing the gate's
  /// in-memory copy.
  pub async fn current_user(&self) -> Result<UserRecord> {
    self.api.get_current_user().await
  }

  fn reset(&mut self) {
    self.session = Session::default();
    self.state = AuthState::Unauthenticated;
  }

  fn write_marker(&self) {
    if let Some(parent) = self.marker_path.parent() {
      if let Err(e) = std::fs::create_dir_all(parent) {
        warn!(error = %e, "failed to create session marker directory");
        return;
      }
    }
    let stamp = chrono::Utc::now().to_rfc3339();
    if let Err(e) = std::fs::write(&self.marker_path, stamp) {
      warn!(error = %e, "failed to write session marker");
    }
  }

  fn clear_marker(&self) {
    if self.marker_path.exists() {
      if let Err(e) = std::fs::remove_file(&self.marker_path) {
        warn!(error = %e, "failed to remove session marker");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CollectionsConfig;
  use crate::platform::{FaultPoint, MemoryPlatform};
  use std::sync::Arc;

  fn gate_with_platform() -> (Arc<MemoryPlatform>, SessionGate<MemoryPlatform>, tempfile::TempDir) {
    let platform = Arc::new(MemoryPlatform::new());
    let api = ApiClient::new(Arc::clone(&platform), CollectionsConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let gate = SessionGate::new(api, dir.path().join("session"));
    (platform, gate, dir)
  }

  fn new_user() -> NewUser {
    NewUser {
      name: "Alice".to_string(),
      username: "ab".to_string(),
      email: "a@b.com".to_string(),
      password: "12345678".to_string(),
    }
  }

  #[tokio::test]
  async fn mount_without_marker_redirects_to_sign_in() {
    let (_platform, gate, _dir) = gate_with_platform();
    assert_eq!(gate.mount(), GateDirective::RedirectToSignIn);
    assert_eq!(gate.state(), AuthState::Unauthenticated);
  }

  #[tokio::test]
  async fn sign_up_flow_authenticates_and_writes_marker() {
    let (_platform, mut gate, _dir) = gate_with_platform();

    let authenticated = gate.sign_up(&new_user()).await.unwrap();
    assert!(authenticated);
    assert_eq!(gate.state(), AuthState::Authenticated);
    assert_eq!(gate.session().username, "ab");
    assert_eq!(gate.session().email, "a@b.com");
    assert!(gate.session().authenticated);

    // Marker written: a remount would check the session instead of redirecting
    assert_eq!(gate.mount(), GateDirective::CheckSession);
  }

  #[tokio::test]
  async fn failed_identity_check_resets_without_navigation() {
    let (_platform, mut gate, _dir) = gate_with_platform();

    // No session at all: the check answers false, not an error
    let authenticated = gate.check_auth_user().await.unwrap();
    assert!(!authenticated);
    assert_eq!(gate.state(), AuthState::Unauthenticated);
    assert_eq!(gate.session(), &Session::default());
  }

  #[tokio::test]
  async fn transport_failure_during_check_propagates() {
    let (platform, mut gate, _dir) = gate_with_platform();
    gate.sign_up(&new_user()).await.unwrap();

    platform.fail_next(
      FaultPoint::GetAccount,
      Error::Transport("backend down".to_string()),
    );

    let result = gate.check_auth_user().await;
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(gate.state(), AuthState::Unauthenticated);
  }

  #[tokio::test]
  async fn sign_out_clears_session_and_marker() {
    let (_platform, mut gate, _dir) = gate_with_platform();
    gate.sign_up(&new_user()).await.unwrap();
    assert!(gate.is_authenticated());

    gate.sign_out().await.unwrap();
    assert_eq!(gate.state(), AuthState::Unauthenticated);
    assert!(!gate.session().authenticated);
    assert_eq!(gate.mount(), GateDirective::RedirectToSignIn);

    // The remote session is gone too
    let authenticated = gate.check_auth_user().await.unwrap();
    assert!(!authenticated);
  }

  #[tokio::test]
  async fn wrong_password_surfaces_as_unauthorized() {
    let (_platform, mut gate, _dir) = gate_with_platform();
    gate.sign_up(&new_user()).await.unwrap();
    gate.sign_out().await.unwrap();

    let result = gate.sign_in("a@b.com", "wrong-password").await;
    assert!(matches!(result, Err(Error::Unauthorized)));
    assert_eq!(gate.state(), AuthState::Unauthenticated);
  }
}
